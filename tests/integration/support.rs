//! In-memory generation service and fixtures shared by the integration tests.

use async_trait::async_trait;
use parking_lot::Mutex;
use quire::config::PollingConfig;
use quire::document::{Document, Section, SectionKind};
use quire::error::ServiceError;
use quire::execution::{Execution, ExecutionStatus, SectionOutput};
use quire::service::{
    CreateExecutionRequest, CreateExecutionResponse, ExecutionStatusReport, GenerationService,
    SectionStatusReport,
};
use quire::types::{DocumentId, ExecutionId, JobId, SectionId, SectionOutputId};
use quire::Coordinator;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

pub const DOC: &str = "doc-1";

/// Document with three AI sections and one reference section.
pub fn document() -> Document {
    Document::new(
        DOC,
        "Quarterly report",
        vec![
            Section::new("s1", SectionKind::Ai, 1),
            Section::new("s2", SectionKind::Ai, 2),
            Section::new("s3", SectionKind::Ai, 3),
            Section::new("refs", SectionKind::Reference, 4),
        ],
    )
}

pub fn doc_id() -> DocumentId {
    DocumentId::new(DOC)
}

pub fn polling(retry_budget: u32) -> PollingConfig {
    PollingConfig {
        retry_budget,
        ..PollingConfig::default()
    }
}

/// Status report listing `sections` in document order; `None` content means unpopulated.
pub fn report(status: ExecutionStatus, sections: &[(&str, Option<&str>)]) -> ExecutionStatusReport {
    ExecutionStatusReport {
        status,
        sections: sections
            .iter()
            .map(|(section, content)| SectionStatusReport {
                section_id: Some(SectionId::from(*section)),
                output_id: None,
                output: content.map(str::to_string),
                status: if content.is_some() {
                    ExecutionStatus::Completed
                } else {
                    ExecutionStatus::Running
                },
            })
            .collect(),
        instruction: "write".to_string(),
        llm_id: "gpt".to_string(),
    }
}

/// Every content section of [`document`] populated with `prefix-N`.
pub fn filled(status: ExecutionStatus, prefix: &str) -> ExecutionStatusReport {
    let contents: Vec<String> = (1..=3).map(|n| format!("{prefix}-{n}")).collect();
    report(
        status,
        &[
            ("s1", Some(contents[0].as_str())),
            ("s2", Some(contents[1].as_str())),
            ("s3", Some(contents[2].as_str())),
        ],
    )
}

#[derive(Default)]
struct FakeState {
    documents: HashMap<DocumentId, Document>,
    executions: HashMap<ExecutionId, Execution>,
    scripts: HashMap<ExecutionId, VecDeque<Result<ExecutionStatusReport, ServiceError>>>,
    last: HashMap<ExecutionId, Result<ExecutionStatusReport, ServiceError>>,
    failures: HashMap<&'static str, ServiceError>,
    calls: Vec<String>,
    next_id: u64,
}

/// Generation service double.
///
/// Status polls return the scripted responses for an execution in order, then keep
/// repeating the last one until the next mutation of that execution. Without a script,
/// a poll reports the remote status.
#[derive(Default)]
pub struct FakeService {
    state: Mutex<FakeState>,
}

impl FakeService {
    pub fn new() -> Arc<Self> {
        let service = Arc::new(Self::default());
        service.add_document(document());
        service
    }

    pub fn add_document(&self, document: Document) {
        self.state.lock().documents.insert(document.id.clone(), document);
    }

    /// Queue status responses for an execution (ids are handed out as `exec-1`, `exec-2`, ...).
    pub fn script(&self, execution_id: &str, responses: Vec<Result<ExecutionStatusReport, ServiceError>>) {
        self.state
            .lock()
            .scripts
            .entry(ExecutionId::new(execution_id))
            .or_default()
            .extend(responses);
    }

    /// Fail the next call of `operation` with `error`.
    pub fn fail_next(&self, operation: &'static str, error: ServiceError) {
        self.state.lock().failures.insert(operation, error);
    }

    /// Put an execution on the remote side only.
    pub fn seed(&self, execution: Execution) {
        self.state.lock().executions.insert(execution.id.clone(), execution);
    }

    /// Drop an execution as another client would.
    pub fn delete_execution_remotely(&self, execution_id: &ExecutionId) {
        let mut state = self.state.lock();
        state.executions.remove(execution_id);
        state.scripts.remove(execution_id);
        state.last.remove(execution_id);
    }

    pub fn calls(&self, operation: &str) -> usize {
        self.state.lock().calls.iter().filter(|c| c.as_str() == operation).count()
    }

    /// Id the next created or cloned execution will get.
    pub fn next_execution_id(&self) -> String {
        format!("exec-{}", self.state.lock().next_id + 1)
    }

    pub fn total_calls(&self) -> usize {
        self.state.lock().calls.len()
    }

    fn enter(&self, operation: &'static str) -> Result<(), ServiceError> {
        let mut state = self.state.lock();
        state.calls.push(operation.to_string());
        match state.failures.remove(operation) {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }

    fn with_remote<T>(
        &self,
        execution_id: &ExecutionId,
        f: impl FnOnce(&mut Execution) -> T,
    ) -> Result<T, ServiceError> {
        let mut state = self.state.lock();
        state
            .executions
            .get_mut(execution_id)
            .map(f)
            .ok_or_else(|| ServiceError::NotFound(format!("execution {}", execution_id)))
    }
}

#[async_trait]
impl GenerationService for FakeService {
    async fn create_execution(&self, request: CreateExecutionRequest) -> Result<CreateExecutionResponse, ServiceError> {
        self.enter("create_execution")?;
        tokio::task::yield_now().await;
        let mut state = self.state.lock();
        state.next_id += 1;
        let job_id = JobId::new(format!("job-{}", state.next_id));
        let execution_id = match request.execution_id {
            Some(existing) => {
                state.last.remove(&existing);
                if let Some(remote) = state.executions.get_mut(&existing) {
                    remote.status = ExecutionStatus::Queued;
                }
                existing
            }
            None => {
                let id = ExecutionId::new(format!("exec-{}", state.next_id));
                let mut remote = Execution::new(
                    id.clone(),
                    request.document_id,
                    "remote",
                    request.llm_id,
                    request.instructions,
                );
                remote.status = ExecutionStatus::Queued;
                state.executions.insert(id.clone(), remote);
                id
            }
        };
        Ok(CreateExecutionResponse { execution_id, job_id })
    }

    async fn get_execution_status(&self, execution_id: &ExecutionId) -> Result<ExecutionStatusReport, ServiceError> {
        self.enter("get_execution_status")?;
        let mut state = self.state.lock();
        let scripted = state.scripts.get_mut(execution_id).and_then(|queue| queue.pop_front());
        if let Some(response) = scripted {
            if let (Ok(report), Some(remote)) = (&response, state.executions.get_mut(execution_id)) {
                remote.status = report.status;
            }
            state.last.insert(execution_id.clone(), response.clone());
            return response;
        }
        if let Some(last) = state.last.get(execution_id) {
            return last.clone();
        }
        match state.executions.get(execution_id) {
            Some(remote) => Ok(ExecutionStatusReport {
                status: remote.status,
                sections: Vec::new(),
                instruction: remote.instructions.clone(),
                llm_id: remote.llm_id.clone(),
            }),
            None => Err(ServiceError::NotFound(format!("execution {}", execution_id))),
        }
    }

    async fn approve_execution(&self, execution_id: &ExecutionId) -> Result<(), ServiceError> {
        self.enter("approve_execution")?;
        self.state.lock().last.remove(execution_id);
        self.with_remote(execution_id, |remote| remote.status = ExecutionStatus::Approving)
    }

    async fn disapprove_execution(&self, execution_id: &ExecutionId) -> Result<(), ServiceError> {
        self.enter("disapprove_execution")?;
        self.state.lock().last.remove(execution_id);
        self.with_remote(execution_id, |remote| remote.status = ExecutionStatus::Draft)
    }

    async fn clone_execution(&self, execution_id: &ExecutionId) -> Result<ExecutionId, ServiceError> {
        self.enter("clone_execution")?;
        let mut state = self.state.lock();
        let source = state
            .executions
            .get(execution_id)
            .cloned()
            .ok_or_else(|| ServiceError::NotFound(format!("execution {}", execution_id)))?;
        state.next_id += 1;
        let id = ExecutionId::new(format!("exec-{}", state.next_id));
        let mut copy = source;
        copy.id = id.clone();
        copy.status = ExecutionStatus::Completed;
        state.executions.insert(id.clone(), copy);
        Ok(id)
    }

    async fn delete_execution(&self, execution_id: &ExecutionId) -> Result<(), ServiceError> {
        self.enter("delete_execution")?;
        self.state
            .lock()
            .executions
            .remove(execution_id)
            .map(|_| ())
            .ok_or_else(|| ServiceError::NotFound(format!("execution {}", execution_id)))
    }

    async fn list_executions(&self, document_id: &DocumentId) -> Result<Vec<Execution>, ServiceError> {
        self.enter("list_executions")?;
        Ok(self
            .state
            .lock()
            .executions
            .values()
            .filter(|e| &e.document_id == document_id)
            .cloned()
            .collect())
    }

    async fn update_section_output(
        &self,
        execution_id: &ExecutionId,
        section_id: &SectionId,
        content: &str,
    ) -> Result<SectionOutput, ServiceError> {
        self.enter("update_section_output")?;
        self.with_remote(execution_id, |_| {
            SectionOutput::new(
                SectionOutputId::new(format!("edit-{}-{}", execution_id, section_id)),
                Some(section_id.clone()),
                content,
            )
        })
    }

    async fn delete_section_output(&self, execution_id: &ExecutionId, _: &SectionId) -> Result<(), ServiceError> {
        self.enter("delete_section_output")?;
        self.with_remote(execution_id, |_| ())
    }

    async fn get_document(&self, document_id: &DocumentId) -> Result<Document, ServiceError> {
        self.enter("get_document")?;
        self.state
            .lock()
            .documents
            .get(document_id)
            .cloned()
            .ok_or_else(|| ServiceError::NotFound(format!("document {}", document_id)))
    }
}

/// Coordinator over a fresh fake service with [`document`] registered.
pub fn coordinator(retry_budget: u32) -> (Coordinator, Arc<FakeService>) {
    let service = FakeService::new();
    let coordinator = Coordinator::new(service.clone(), polling(retry_budget));
    coordinator.register_document(document());
    (coordinator, service)
}

/// Run a full generation to completion with contents `prefix-1..3`.
pub async fn completed_execution(coordinator: &Coordinator, service: &FakeService, prefix: &str) -> ExecutionId {
    let next = service.next_execution_id();
    service.script(&next, vec![Ok(filled(ExecutionStatus::Completed, prefix))]);
    let handle = coordinator
        .create_full(&doc_id(), "gpt", "write")
        .await
        .expect("create");
    assert_eq!(handle.execution_id.as_str(), next);
    handle.wait().await.expect("completion");
    handle.execution_id
}
