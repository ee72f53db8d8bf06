//! CLI help and command-name contract for logging.

use crate::cli::parse::Commands;

/// Command name recorded on the command's log events (e.g. "generate", "clear_section").
pub fn command_name(command: &Commands) -> &'static str {
    match command {
        Commands::Generate { .. } => "generate",
        Commands::Regenerate { .. } => "regenerate",
        Commands::Approve { .. } => "approve",
        Commands::Disapprove { .. } => "disapprove",
        Commands::Status { .. } => "status",
        Commands::Versions => "versions",
        Commands::Sections => "sections",
        Commands::Clone { .. } => "clone",
        Commands::Delete { .. } => "delete",
        Commands::Edit { .. } => "edit",
        Commands::ClearSection { .. } => "clear_section",
        Commands::Wait { .. } => "wait",
    }
}

/// Whether the command changes anything on the service.
pub fn is_mutating(command: &Commands) -> bool {
    !matches!(
        command,
        Commands::Status { .. } | Commands::Versions | Commands::Sections | Commands::Wait { .. }
    )
}
