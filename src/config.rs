//! Configuration System
//!
//! Layered configuration for the coordinator: built-in defaults, then `quire.toml` (and
//! `quire.{QUIRE_ENV}.toml`) from the working directory or an explicit file, then
//! `QUIRE__*` environment variables. Validation reports every problem at once.

use crate::error::CoordinatorError;
use crate::logging::LoggingConfig;
use serde::{Deserialize, Serialize};
use std::time::Duration;

mod facade;
mod merge;
mod sources;

pub use facade::ConfigLoader;

/// Root configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct QuireConfig {
    /// Generation service connection
    #[serde(default)]
    pub service: ServiceConfig,

    /// Watch cadence and retry budget
    #[serde(default)]
    pub polling: PollingConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Generation service connection settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceConfig {
    #[serde(default = "default_base_url")]
    pub base_url: String,

    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,

    /// Bearer token sent with every request
    #[serde(default)]
    pub api_key: Option<String>,
}

fn default_base_url() -> String {
    "http://localhost:8080/api".to_string()
}

fn default_request_timeout_ms() -> u64 {
    30_000
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            request_timeout_ms: default_request_timeout_ms(),
            api_key: None,
        }
    }
}

impl ServiceConfig {
    pub fn validate(&self) -> Result<(), String> {
        if !(self.base_url.starts_with("http://") || self.base_url.starts_with("https://")) {
            return Err(format!("base_url must be an http(s) URL, got '{}'", self.base_url));
        }
        if self.request_timeout_ms == 0 {
            return Err("request_timeout_ms must be greater than zero".to_string());
        }
        Ok(())
    }
}

/// Polling cadence per watch kind
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PollingConfig {
    /// Partial regeneration (`single`/`from`) watches
    #[serde(default = "default_section_interval_ms")]
    pub section_interval_ms: u64,

    /// Approval watches
    #[serde(default = "default_approval_interval_ms")]
    pub approval_interval_ms: u64,

    /// Whole-document generation watches
    #[serde(default = "default_execution_interval_ms")]
    pub execution_interval_ms: u64,

    /// Consecutive transport failures tolerated before a watch settles as unknown
    #[serde(default = "default_retry_budget")]
    pub retry_budget: u32,
}

fn default_section_interval_ms() -> u64 {
    2000
}

fn default_approval_interval_ms() -> u64 {
    1000
}

fn default_execution_interval_ms() -> u64 {
    2000
}

fn default_retry_budget() -> u32 {
    3
}

impl Default for PollingConfig {
    fn default() -> Self {
        Self {
            section_interval_ms: default_section_interval_ms(),
            approval_interval_ms: default_approval_interval_ms(),
            execution_interval_ms: default_execution_interval_ms(),
            retry_budget: default_retry_budget(),
        }
    }
}

impl PollingConfig {
    pub fn section_interval(&self) -> Duration {
        Duration::from_millis(self.section_interval_ms)
    }

    pub fn approval_interval(&self) -> Duration {
        Duration::from_millis(self.approval_interval_ms)
    }

    pub fn execution_interval(&self) -> Duration {
        Duration::from_millis(self.execution_interval_ms)
    }

    pub fn validate(&self) -> Result<(), Vec<String>> {
        let mut errors = Vec::new();
        for (name, value) in [
            ("section_interval_ms", self.section_interval_ms),
            ("approval_interval_ms", self.approval_interval_ms),
            ("execution_interval_ms", self.execution_interval_ms),
        ] {
            if value == 0 {
                errors.push(format!("{} must be greater than zero", name));
            }
        }
        if self.retry_budget == 0 {
            errors.push("retry_budget must be at least 1".to_string());
        }
        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}

/// Configuration validation errors
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    Service(String),
    Polling(String),
    Logging(String),
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ValidationError::Service(msg) => write!(f, "Service: {}", msg),
            ValidationError::Polling(msg) => write!(f, "Polling: {}", msg),
            ValidationError::Logging(msg) => write!(f, "Logging: {}", msg),
        }
    }
}

impl std::error::Error for ValidationError {}

impl QuireConfig {
    /// Validate the entire configuration
    pub fn validate(&self) -> Result<(), Vec<ValidationError>> {
        let mut errors = Vec::new();

        if let Err(e) = self.service.validate() {
            errors.push(ValidationError::Service(e));
        }
        if let Err(problems) = self.polling.validate() {
            errors.extend(problems.into_iter().map(ValidationError::Polling));
        }
        if let Err(e) = self.logging.validate() {
            errors.push(ValidationError::Logging(e));
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }

    /// Validate, folding every problem into one error.
    pub fn validated(self) -> Result<Self, CoordinatorError> {
        self.validate().map_err(|errors| {
            let msgs: Vec<String> = errors.iter().map(|e| e.to_string()).collect();
            CoordinatorError::ConfigError(format!(
                "Configuration validation failed:\n{}",
                msgs.join("\n")
            ))
        })?;
        Ok(self)
    }
}
