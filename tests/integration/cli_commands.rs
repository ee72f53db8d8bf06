//! Integration tests for the CLI route table

use super::support::{filled, polling, report, FakeService, DOC};
use clap::Parser;
use quire::cli::{Cli, Commands, OutputFormat, RunContext};
use quire::error::CoordinatorError;
use quire::execution::ExecutionStatus;
use quire::Coordinator;
use std::sync::Arc;

fn context(service: &Arc<FakeService>, format: OutputFormat, wait: bool) -> RunContext {
    let coordinator = Coordinator::new(service.clone(), polling(3));
    RunContext::from_coordinator(coordinator, Some(DOC.to_string()), format, wait)
}

fn parse(args: &[&str]) -> Commands {
    let mut argv = vec!["quire", "-d", DOC];
    argv.extend_from_slice(args);
    Cli::try_parse_from(argv).unwrap().command
}

#[tokio::test(start_paused = true)]
async fn generate_waits_for_completion() {
    let service = FakeService::new();
    service.script("exec-1", vec![Ok(filled(ExecutionStatus::Completed, "v1"))]);
    let ctx = context(&service, OutputFormat::Text, true);

    let output = ctx
        .execute(&parse(&["generate", "--llm", "gpt", "--instructions", "write"]))
        .await
        .unwrap();
    assert_eq!(output, "Execution exec-1: completed");
    assert_eq!(service.calls("get_document"), 1);
    assert_eq!(service.calls("list_executions"), 1);
}

#[tokio::test(start_paused = true)]
async fn no_wait_returns_after_acceptance() {
    let service = FakeService::new();
    let ctx = context(&service, OutputFormat::Json, false);

    let output = ctx
        .execute(&parse(&["generate", "--llm", "gpt", "--mode", "full-single"]))
        .await
        .unwrap();
    let value: serde_json::Value = serde_json::from_str(&output).unwrap();
    assert_eq!(value["execution_id"], "exec-1");
    assert_eq!(value["job_id"], "job-1");
    assert_eq!(value["status"], "accepted");
}

#[tokio::test(start_paused = true)]
async fn versions_lists_hydrated_executions() {
    let service = FakeService::new();
    service.script("exec-1", vec![Ok(filled(ExecutionStatus::Completed, "v1"))]);
    context(&service, OutputFormat::Text, true)
        .execute(&parse(&["generate", "--llm", "gpt"]))
        .await
        .unwrap();

    // A fresh process only knows what the service lists.
    let output = context(&service, OutputFormat::Json, true)
        .execute(&parse(&["versions"]))
        .await
        .unwrap();
    let value: serde_json::Value = serde_json::from_str(&output).unwrap();
    assert_eq!(value["versions"][0]["execution_id"], "exec-1");
    assert_eq!(value["versions"][0]["status"], "completed");
    assert_eq!(value["versions"][0]["is_active"], true);
}

#[tokio::test(start_paused = true)]
async fn approve_after_hydration() {
    let service = FakeService::new();
    service.script("exec-1", vec![Ok(filled(ExecutionStatus::Completed, "v1"))]);
    context(&service, OutputFormat::Text, true)
        .execute(&parse(&["generate", "--llm", "gpt"]))
        .await
        .unwrap();

    service.script("exec-1", vec![Ok(report(ExecutionStatus::Approved, &[]))]);
    let output = context(&service, OutputFormat::Text, true)
        .execute(&parse(&["approve", "exec-1"]))
        .await
        .unwrap();
    assert_eq!(output, "Execution exec-1: approved");
}

#[tokio::test(start_paused = true)]
async fn missing_document_is_reported() {
    let service = FakeService::new();
    let coordinator = Coordinator::new(service.clone(), polling(3));
    let ctx = RunContext::from_coordinator(coordinator, None, OutputFormat::Text, true);
    let err = ctx.execute(&Commands::Versions).await.unwrap_err();
    assert!(matches!(err, CoordinatorError::InvalidRequest(_)));
    assert_eq!(service.total_calls(), 0);

    let ctx = RunContext::from_coordinator(
        Coordinator::new(service.clone(), polling(3)),
        Some("unknown".to_string()),
        OutputFormat::Text,
        true,
    );
    let err = ctx.execute(&Commands::Versions).await.unwrap_err();
    assert!(matches!(err, CoordinatorError::Service { operation: "get_document", .. }));
}

#[tokio::test(start_paused = true)]
async fn sections_table_lists_every_section() {
    let service = FakeService::new();
    let output = context(&service, OutputFormat::Json, true)
        .execute(&parse(&["sections"]))
        .await
        .unwrap();
    let value: serde_json::Value = serde_json::from_str(&output).unwrap();
    let sections = value["sections"].as_array().unwrap();
    assert_eq!(sections.len(), 4);
    assert_eq!(sections[3]["kind"], "reference");
    // Nothing is regenerable until a version exists.
    assert_eq!(sections[0]["regenerable"], false);
}
