//! CLI route: single route table and run context. Dispatches to the coordinator and presentation.

use crate::cli::help::{command_name, is_mutating};
use crate::cli::parse::{Commands, GenerateMode, OutputFormat};
use crate::cli::presentation::{
    format_accepted, format_completion, format_execution, format_sections, format_versions,
};
use crate::config::{ConfigLoader, QuireConfig};
use crate::coordinator::{Coordinator, ExecutionHandle, RequestParams};
use crate::error::CoordinatorError;
use crate::execution::ExecutionMode;
use crate::poller::CompletionEvent;
use crate::types::{DocumentId, ExecutionId, SectionId};
use futures::StreamExt;
use std::path::PathBuf;
use std::time::Instant;
use tracing::{debug, info};

/// Runtime context for CLI execution: configuration and the coordinator.
pub struct RunContext {
    coordinator: Coordinator,
    document_id: Option<DocumentId>,
    format: OutputFormat,
    wait: bool,
}

impl RunContext {
    /// Create run context from a config directory and optional config path. Uses ConfigLoader only.
    pub fn new(
        dir: PathBuf,
        config_path: Option<PathBuf>,
        document: Option<String>,
        format: OutputFormat,
        wait: bool,
    ) -> Result<Self, CoordinatorError> {
        let config = match config_path {
            Some(path) => ConfigLoader::load_from_file(&path)?,
            None => ConfigLoader::load(&dir)?,
        };
        Self::with_config(&config.validated()?, document, format, wait)
    }

    pub fn with_config(
        config: &QuireConfig,
        document: Option<String>,
        format: OutputFormat,
        wait: bool,
    ) -> Result<Self, CoordinatorError> {
        let coordinator = Coordinator::from_config(config)?;
        Ok(Self::from_coordinator(coordinator, document, format, wait))
    }

    pub fn from_coordinator(
        coordinator: Coordinator,
        document: Option<String>,
        format: OutputFormat,
        wait: bool,
    ) -> Self {
        Self {
            coordinator,
            document_id: document.map(DocumentId::new),
            format,
            wait,
        }
    }

    pub fn coordinator(&self) -> &Coordinator {
        &self.coordinator
    }

    pub async fn execute(&self, command: &Commands) -> Result<String, CoordinatorError> {
        let started = Instant::now();
        let document_id = self.document()?;
        self.coordinator.load_document(&document_id).await?;
        self.coordinator.hydrate(&document_id).await?;
        self.coordinator.focus_document(&document_id);

        let result = self.execute_inner(command, &document_id).await;
        info!(
            command = command_name(command),
            mutating = is_mutating(command),
            ok = result.is_ok(),
            duration_ms = started.elapsed().as_millis() as u64,
            "Command finished"
        );
        self.coordinator.shutdown();
        result
    }

    fn document(&self) -> Result<DocumentId, CoordinatorError> {
        self.document_id
            .clone()
            .ok_or_else(|| CoordinatorError::InvalidRequest("--document is required".to_string()))
    }

    async fn execute_inner(&self, command: &Commands, document_id: &DocumentId) -> Result<String, CoordinatorError> {
        let coordinator = &self.coordinator;
        match command {
            Commands::Generate {
                llm,
                instructions,
                mode,
                name,
            } => {
                let mode = match mode {
                    GenerateMode::Full => ExecutionMode::Full,
                    GenerateMode::FullSingle => ExecutionMode::FullSingle,
                };
                let params = RequestParams {
                    llm_id: llm.clone(),
                    instructions: instructions.clone(),
                    name: name.clone(),
                    ..RequestParams::default()
                };
                let handle = coordinator.request_execution(document_id, mode, params).await?;
                self.finish(handle).await
            }
            Commands::Regenerate {
                section,
                execution,
                from,
                llm,
                instructions,
            } => {
                let mode = if *from { ExecutionMode::From } else { ExecutionMode::Single };
                let params = RequestParams {
                    llm_id: llm.clone(),
                    instructions: instructions.clone(),
                    section_id: Some(SectionId::new(section.clone())),
                    execution_id: execution.clone().map(ExecutionId::new),
                    name: None,
                };
                let handle = coordinator.request_execution(document_id, mode, params).await?;
                self.finish(handle).await
            }
            Commands::Approve { execution } => {
                let handle = coordinator.approve(&ExecutionId::new(execution.clone())).await?;
                if !self.wait {
                    return format_accepted(handle.execution_id.as_str(), None, self.format);
                }
                let event = handle.wait().await?;
                format_completion(&event, self.format)
            }
            Commands::Disapprove { execution } => {
                let updated = coordinator.disapprove(&ExecutionId::new(execution.clone())).await?;
                format_execution(&updated, self.format)
            }
            Commands::Status { execution } => {
                let execution_id = match execution {
                    Some(id) => ExecutionId::new(id.clone()),
                    None => self.active(document_id)?,
                };
                let execution = coordinator.refresh(&execution_id).await?;
                format_execution(&execution, self.format)
            }
            Commands::Versions => format_versions(&coordinator.version_list(document_id), self.format),
            Commands::Sections => format_sections(&coordinator.section_list(document_id)?, self.format),
            Commands::Clone { execution } => {
                let copy = coordinator.clone_execution(&ExecutionId::new(execution.clone())).await?;
                format_execution(&copy, self.format)
            }
            Commands::Delete { execution } => {
                let active = coordinator.delete_execution(&ExecutionId::new(execution.clone())).await?;
                Ok(match active {
                    Some(active) => format!("Deleted {}; active version is now {}", execution, active),
                    None => format!("Deleted {}; the document has no versions left", execution),
                })
            }
            Commands::Edit {
                execution,
                section,
                content,
            } => {
                let execution_id = ExecutionId::new(execution.clone());
                coordinator
                    .edit_section_output(&execution_id, &SectionId::new(section.clone()), content)
                    .await?;
                format_execution(&coordinator.execution(&execution_id)?, self.format)
            }
            Commands::ClearSection { execution, section } => {
                let execution_id = ExecutionId::new(execution.clone());
                coordinator
                    .delete_section_output(&execution_id, &SectionId::new(section.clone()))
                    .await?;
                format_execution(&coordinator.execution(&execution_id)?, self.format)
            }
            Commands::Wait { execution } => {
                let execution_id = match execution {
                    Some(id) => ExecutionId::new(id.clone()),
                    None => match coordinator.store().in_flight(document_id) {
                        Some(id) => id,
                        None => return Ok("Nothing in flight.".to_string()),
                    },
                };
                let mut stream = coordinator.watch_completion(&execution_id, ExecutionMode::Full)?;
                match stream.next().await {
                    Some(event) => self.report(event),
                    None => Err(CoordinatorError::WatchCancelled(execution_id)),
                }
            }
        }
    }

    fn active(&self, document_id: &DocumentId) -> Result<ExecutionId, CoordinatorError> {
        self.coordinator
            .active_execution(document_id)
            .map(|e| e.id)
            .ok_or_else(|| CoordinatorError::InvalidRequest(format!("Document {} has no versions", document_id)))
    }

    async fn finish(&self, handle: ExecutionHandle) -> Result<String, CoordinatorError> {
        if handle.attached {
            debug!(execution_id = %handle.execution_id, "Attached to running regeneration");
        }
        if !self.wait {
            return format_accepted(
                handle.execution_id.as_str(),
                handle.job_id.as_ref().map(|j| j.as_str()),
                self.format,
            );
        }
        let event = handle.wait().await?;
        self.report(event)
    }

    fn report(&self, event: CompletionEvent) -> Result<String, CoordinatorError> {
        let event = event.into_result()?;
        format_completion(&event, self.format)
    }
}
