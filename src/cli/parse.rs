//! CLI parse: clap types for Quire. No behavior; definitions only.

use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

/// Quire CLI - Document execution lifecycle coordinator
#[derive(Parser)]
#[command(name = "quire")]
#[command(about = "Dispatch, watch and manage LLM document generation runs")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Document to operate on
    #[arg(long, short = 'd', global = true)]
    pub document: Option<String>,

    /// Directory holding quire.toml
    #[arg(long, default_value = ".")]
    pub dir: PathBuf,

    /// Configuration file path (overrides default config loading)
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Return once the service accepted the request instead of waiting for completion
    #[arg(long, global = true)]
    pub no_wait: bool,

    /// Output format
    #[arg(long, value_enum, default_value_t = OutputFormat::Text, global = true)]
    pub format: OutputFormat,

    /// Enable verbose logging
    #[arg(long)]
    pub verbose: bool,

    /// Disable logging entirely
    #[arg(long)]
    pub quiet: bool,

    /// Log level (trace, debug, info, warn, error, off)
    #[arg(long)]
    pub log_level: Option<String>,

    /// Log format (json, text)
    #[arg(long)]
    pub log_format: Option<String>,

    /// Log output (stdout, stderr, file)
    #[arg(long)]
    pub log_output: Option<String>,

    /// Log file path (if output is "file")
    #[arg(long)]
    pub log_file: Option<PathBuf>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    Text,
    Json,
}

/// Whole-document generation modes
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum GenerateMode {
    /// Every section
    Full,
    /// Only the first section
    FullSingle,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Create a new version of the document
    Generate {
        /// LLM to generate with
        #[arg(long)]
        llm: String,
        /// Instructions passed to the LLM
        #[arg(long, default_value = "")]
        instructions: String,
        #[arg(long, value_enum, default_value_t = GenerateMode::Full)]
        mode: GenerateMode,
        /// Version name (default: "Version N")
        #[arg(long)]
        name: Option<String>,
    },
    /// Regenerate one section, or a section and everything after it
    Regenerate {
        /// Section to regenerate
        section: String,
        /// Execution to regenerate (default: the active version)
        #[arg(long)]
        execution: Option<String>,
        /// Also regenerate every later section
        #[arg(long)]
        from: bool,
        #[arg(long)]
        llm: String,
        #[arg(long, default_value = "")]
        instructions: String,
    },
    /// Approve a version, locking it against edits
    Approve { execution: String },
    /// Return an approved version to draft
    Disapprove { execution: String },
    /// Fetch the current status of a version
    Status {
        /// Execution to inspect (default: the active version)
        execution: Option<String>,
    },
    /// List the document's versions
    Versions,
    /// Show the document's sections and what can be done with them
    Sections,
    /// Copy a version
    Clone { execution: String },
    /// Delete a version
    Delete { execution: String },
    /// Replace the output of one section
    Edit {
        execution: String,
        section: String,
        /// New content
        #[arg(long)]
        content: String,
    },
    /// Remove the output of one section
    ClearSection { execution: String, section: String },
    /// Wait for an in-flight version to finish
    Wait {
        /// Execution to wait for (default: the one in flight)
        execution: Option<String>,
    },
}
