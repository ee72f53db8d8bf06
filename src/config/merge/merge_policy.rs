//! Merge rules: defaults, override order, conflict handling.

use config::Config;
use config::ConfigBuilder;
use config::ConfigError;

/// Create a Config builder with merge policy defaults applied.
///
/// Later sources (files, environment) override these keys one by one, so a file that only
/// sets `polling.retry_budget` keeps every other default.
pub fn builder_with_defaults() -> Result<ConfigBuilder<config::builder::DefaultState>, ConfigError>
{
    Config::builder()
        .set_default("service.base_url", "http://localhost:8080/api")?
        .set_default("service.request_timeout_ms", 30_000i64)?
        .set_default("polling.section_interval_ms", 2000i64)?
        .set_default("polling.approval_interval_ms", 1000i64)?
        .set_default("polling.execution_interval_ms", 2000i64)?
        .set_default("polling.retry_budget", 3i64)
}
