//! Configuration sources.

pub mod workspace_file;
