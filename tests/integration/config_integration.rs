//! Integration tests for Configuration System

use quire::config::{ConfigLoader, QuireConfig};
use quire::error::CoordinatorError;
use quire::Coordinator;
use tempfile::TempDir;

#[test]
fn test_directory_without_config_uses_defaults() {
    let temp_dir = TempDir::new().unwrap();
    let config = ConfigLoader::load(temp_dir.path()).unwrap();
    let defaults = QuireConfig::default();
    assert_eq!(config.service, defaults.service);
    assert_eq!(config.polling, defaults.polling);
    assert_eq!(config.logging, defaults.logging);
}

#[test]
fn test_workspace_file_overrides_individual_keys() {
    let temp_dir = TempDir::new().unwrap();
    std::fs::write(
        temp_dir.path().join("quire.toml"),
        r#"
[service]
base_url = "https://generation.internal/api"
request_timeout_ms = 5000

[polling]
approval_interval_ms = 250

[logging]
format = "json"
output = "stdout"

[logging.modules]
"quire::poller" = "debug"
"#,
    )
    .unwrap();

    let config = ConfigLoader::load(temp_dir.path()).unwrap();
    assert_eq!(config.service.base_url, "https://generation.internal/api");
    assert_eq!(config.service.request_timeout_ms, 5000);
    assert_eq!(config.polling.approval_interval_ms, 250);
    assert_eq!(config.polling.section_interval_ms, 2000);
    assert_eq!(config.polling.retry_budget, 3);
    assert_eq!(config.logging.format, "json");
    assert_eq!(
        config.logging.modules.get("quire::poller").map(String::as_str),
        Some("debug")
    );
    assert!(config.validate().is_ok());
}

#[test]
fn test_missing_explicit_file_is_an_error() {
    let temp_dir = TempDir::new().unwrap();
    let result = ConfigLoader::load_from_file(&temp_dir.path().join("absent.toml"));
    assert!(result.is_err());
}

#[test]
fn test_invalid_file_fails_validation() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("bad.toml");
    std::fs::write(
        &path,
        r#"
[service]
base_url = "ftp://nowhere"

[polling]
retry_budget = 0

[logging]
level = "chatty"
"#,
    )
    .unwrap();

    let config = ConfigLoader::load_from_file(&path).unwrap();
    let errors = config.clone().validate().unwrap_err();
    assert_eq!(errors.len(), 3);
    assert!(matches!(config.validated(), Err(CoordinatorError::ConfigError(_))));
}

#[tokio::test]
async fn test_coordinator_builds_from_config() {
    let config = QuireConfig::default();
    let coordinator = Coordinator::from_config(&config).unwrap();
    assert_eq!(coordinator.polling(), &config.polling);
    assert!(coordinator.executions(&"doc".into()).is_empty());
}
