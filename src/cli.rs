//! CLI domain: parse, route, help, output, and presentation only.
//! No lifecycle logic; a single route table dispatches to the coordinator.

mod help;
mod output;
mod parse;
mod presentation;
mod route;

pub use help::{command_name, is_mutating};
pub use output::{exit_code, map_error};
pub use parse::{Cli, Commands, GenerateMode, OutputFormat};
pub use presentation::{
    format_accepted, format_completion, format_execution, format_sections, format_versions,
};
pub use route::RunContext;
