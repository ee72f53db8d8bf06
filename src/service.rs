//! Generation service boundary
//!
//! The coordinator never generates content itself; it dispatches requests to a generation
//! service and observes the results by polling. [`GenerationService`] is that contract,
//! [`HttpGenerationService`] speaks it over REST.

use crate::config::ServiceConfig;
use crate::document::Document;
use crate::error::ServiceError;
use crate::execution::{Execution, ExecutionMode, ExecutionStatus, SectionOutput};
use crate::types::{DocumentId, ExecutionId, JobId, SectionId, SectionOutputId};
use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, Response};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

/// Request to create a new execution or regenerate part of an existing one
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateExecutionRequest {
    pub document_id: DocumentId,
    pub llm_id: String,
    pub instructions: String,
    pub mode: ExecutionMode,
    /// Present only for `single`/`from`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_section_id: Option<SectionId>,
    /// Present only for `single`/`from`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub execution_id: Option<ExecutionId>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateExecutionResponse {
    pub execution_id: ExecutionId,
    pub job_id: JobId,
}

/// Status of one section within a status report
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SectionStatusReport {
    #[serde(default)]
    pub section_id: Option<SectionId>,
    #[serde(default)]
    pub output_id: Option<SectionOutputId>,
    /// Content, absent while the section is unpopulated
    #[serde(default)]
    pub output: Option<String>,
    pub status: ExecutionStatus,
}

impl SectionStatusReport {
    pub fn is_failed(&self) -> bool {
        matches!(self.status, ExecutionStatus::Failed | ExecutionStatus::Cancelled)
    }

    /// Output record for this entry; `position` names it when the service omitted an id.
    pub fn to_output(&self, execution_id: &ExecutionId, position: usize) -> Option<SectionOutput> {
        let content = self.output.as_ref()?;
        let id = self
            .output_id
            .clone()
            .unwrap_or_else(|| SectionOutputId::new(format!("{execution_id}:{position}")));
        Some(SectionOutput::new(id, self.section_id.clone(), content.clone()))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionStatusReport {
    pub status: ExecutionStatus,
    #[serde(default)]
    pub sections: Vec<SectionStatusReport>,
    #[serde(default)]
    pub instruction: String,
    #[serde(default)]
    pub llm_id: String,
}

impl ExecutionStatusReport {
    /// Populated outputs in report order.
    pub fn outputs(&self, execution_id: &ExecutionId) -> Vec<SectionOutput> {
        self.sections
            .iter()
            .enumerate()
            .filter_map(|(position, section)| section.to_output(execution_id, position))
            .collect()
    }
}

/// Generation service contract
#[async_trait]
pub trait GenerationService: Send + Sync {
    async fn create_execution(
        &self,
        request: CreateExecutionRequest,
    ) -> Result<CreateExecutionResponse, ServiceError>;

    async fn get_execution_status(
        &self,
        execution_id: &ExecutionId,
    ) -> Result<ExecutionStatusReport, ServiceError>;

    async fn approve_execution(&self, execution_id: &ExecutionId) -> Result<(), ServiceError>;

    async fn disapprove_execution(&self, execution_id: &ExecutionId) -> Result<(), ServiceError>;

    /// Returns the id of the copy.
    async fn clone_execution(&self, execution_id: &ExecutionId) -> Result<ExecutionId, ServiceError>;

    async fn delete_execution(&self, execution_id: &ExecutionId) -> Result<(), ServiceError>;

    /// Authoritative execution list of a document.
    async fn list_executions(&self, document_id: &DocumentId) -> Result<Vec<Execution>, ServiceError>;

    async fn update_section_output(
        &self,
        execution_id: &ExecutionId,
        section_id: &SectionId,
        content: &str,
    ) -> Result<SectionOutput, ServiceError>;

    async fn delete_section_output(
        &self,
        execution_id: &ExecutionId,
        section_id: &SectionId,
    ) -> Result<(), ServiceError>;

    async fn get_document(&self, document_id: &DocumentId) -> Result<Document, ServiceError>;
}

fn map_http_error(error: reqwest::Error) -> ServiceError {
    if let Some(status) = error.status() {
        match status.as_u16() {
            404 => ServiceError::NotFound(error.to_string()),
            code => ServiceError::Rejected {
                status: code,
                message: error.to_string(),
            },
        }
    } else if error.is_timeout() {
        ServiceError::Transport(format!("Request timeout: {}", error))
    } else if error.is_connect() {
        ServiceError::Transport(format!("Connection error: {}", error))
    } else if error.is_decode() {
        ServiceError::InvalidResponse(format!("Failed to parse response: {}", error))
    } else {
        ServiceError::Transport(format!("HTTP error: {}", error))
    }
}

#[derive(Deserialize)]
struct CloneResponse {
    execution_id: ExecutionId,
}

#[derive(Serialize)]
struct SectionContent<'a> {
    content: &'a str,
}

/// REST client for the generation service
pub struct HttpGenerationService {
    client: Client,
    base_url: String,
    api_key: Option<String>,
}

impl HttpGenerationService {
    pub fn new(config: &ServiceConfig) -> Result<Self, ServiceError> {
        let client = Client::builder()
            .no_proxy()
            .connect_timeout(Duration::from_secs(10))
            .timeout(Duration::from_millis(config.request_timeout_ms))
            .build()
            .map_err(|e| ServiceError::Transport(format!("Failed to create HTTP client: {}", e)))?;
        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path)
    }

    fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.api_key {
            Some(key) => request.header("Authorization", format!("Bearer {}", key)),
            None => request,
        }
    }

    async fn send(&self, request: RequestBuilder) -> Result<Response, ServiceError> {
        let response = self
            .authorize(request)
            .send()
            .await
            .map_err(map_http_error)?;
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let message = response
            .text()
            .await
            .unwrap_or_else(|_| "Unknown error".to_string());
        Err(match status.as_u16() {
            404 => ServiceError::NotFound(message),
            502..=504 => ServiceError::Transport(format!("Upstream unavailable ({}): {}", status, message)),
            code => ServiceError::Rejected { status: code, message },
        })
    }

    async fn send_json<T: DeserializeOwned>(&self, request: RequestBuilder) -> Result<T, ServiceError> {
        self.send(request)
            .await?
            .json()
            .await
            .map_err(|e| ServiceError::InvalidResponse(format!("Failed to parse response: {}", e)))
    }
}

#[async_trait]
impl GenerationService for HttpGenerationService {
    async fn create_execution(
        &self,
        request: CreateExecutionRequest,
    ) -> Result<CreateExecutionResponse, ServiceError> {
        debug!(document_id = %request.document_id, mode = %request.mode, "POST executions");
        self.send_json(self.client.post(self.url("executions")).json(&request))
            .await
    }

    async fn get_execution_status(
        &self,
        execution_id: &ExecutionId,
    ) -> Result<ExecutionStatusReport, ServiceError> {
        self.send_json(
            self.client
                .get(self.url(&format!("executions/{}/status", execution_id))),
        )
        .await
    }

    async fn approve_execution(&self, execution_id: &ExecutionId) -> Result<(), ServiceError> {
        self.send(
            self.client
                .post(self.url(&format!("executions/{}/approve", execution_id))),
        )
        .await
        .map(|_| ())
    }

    async fn disapprove_execution(&self, execution_id: &ExecutionId) -> Result<(), ServiceError> {
        self.send(
            self.client
                .post(self.url(&format!("executions/{}/disapprove", execution_id))),
        )
        .await
        .map(|_| ())
    }

    async fn clone_execution(&self, execution_id: &ExecutionId) -> Result<ExecutionId, ServiceError> {
        let response: CloneResponse = self
            .send_json(
                self.client
                    .post(self.url(&format!("executions/{}/clone", execution_id))),
            )
            .await?;
        Ok(response.execution_id)
    }

    async fn delete_execution(&self, execution_id: &ExecutionId) -> Result<(), ServiceError> {
        self.send(
            self.client
                .delete(self.url(&format!("executions/{}", execution_id))),
        )
        .await
        .map(|_| ())
    }

    async fn list_executions(&self, document_id: &DocumentId) -> Result<Vec<Execution>, ServiceError> {
        self.send_json(
            self.client
                .get(self.url(&format!("documents/{}/executions", document_id))),
        )
        .await
    }

    async fn update_section_output(
        &self,
        execution_id: &ExecutionId,
        section_id: &SectionId,
        content: &str,
    ) -> Result<SectionOutput, ServiceError> {
        self.send_json(
            self.client
                .put(self.url(&format!("executions/{}/sections/{}", execution_id, section_id)))
                .json(&SectionContent { content }),
        )
        .await
    }

    async fn delete_section_output(
        &self,
        execution_id: &ExecutionId,
        section_id: &SectionId,
    ) -> Result<(), ServiceError> {
        self.send(
            self.client
                .delete(self.url(&format!("executions/{}/sections/{}", execution_id, section_id))),
        )
        .await
        .map(|_| ())
    }

    async fn get_document(&self, document_id: &DocumentId) -> Result<Document, ServiceError> {
        self.send_json(self.client.get(self.url(&format!("documents/{}", document_id))))
            .await
    }
}
