//! Integration tests for the execution lifecycle coordinator

mod cli_commands;
mod config_integration;
mod scenarios;
mod support;
