//! End-to-end lifecycle walkthroughs against the in-memory service.

use super::support::{completed_execution, coordinator, doc_id, filled, report};
use futures::StreamExt;
use quire::error::{CoordinatorError, ServiceError};
use quire::execution::{ExecutionMode, ExecutionStatus};
use quire::guard::GuardedOperation;
use quire::poller::FinalStatus;
use quire::RequestParams;

fn params() -> RequestParams {
    RequestParams {
        llm_id: "gpt".to_string(),
        instructions: "write".to_string(),
        ..RequestParams::default()
    }
}

#[tokio::test(start_paused = true)]
async fn second_request_is_rejected_while_the_first_is_in_flight() {
    let (coordinator, service) = coordinator(3);
    service.script(
        "exec-1",
        vec![
            Ok(report(ExecutionStatus::Running, &[("s1", None), ("s2", None), ("s3", None)])),
            Ok(filled(ExecutionStatus::Completed, "v1")),
        ],
    );

    let handle = coordinator
        .request_execution(&doc_id(), ExecutionMode::Full, params())
        .await
        .unwrap();
    assert_eq!(handle.execution_id.as_str(), "exec-1");
    assert!(coordinator
        .execution(&handle.execution_id)
        .unwrap()
        .status
        .is_in_flight());

    let err = coordinator
        .request_execution(
            &doc_id(),
            ExecutionMode::Single,
            RequestParams {
                section_id: Some("s2".into()),
                ..params()
            },
        )
        .await
        .err()
        .unwrap();
    match err {
        CoordinatorError::ExecutionInProgress { in_flight, .. } => {
            assert_eq!(in_flight, Some(handle.execution_id.clone()))
        }
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(service.calls("create_execution"), 1);

    let event = handle.wait().await.unwrap();
    assert_eq!(event.status, FinalStatus::Completed);
    assert!(coordinator
        .check(&doc_id(), &GuardedOperation::Create(ExecutionMode::Full))
        .is_allowed());
}

#[tokio::test(start_paused = true)]
async fn single_section_regeneration_changes_only_that_section() {
    let (coordinator, service) = coordinator(3);
    let e1 = completed_execution(&coordinator, &service, "v1").await;

    service.script(
        "exec-1",
        vec![
            Ok(report(
                ExecutionStatus::Running,
                &[("s1", Some("v1-1")), ("s2", None), ("s3", Some("v1-3"))],
            )),
            Ok(filled(ExecutionStatus::Completed, "v2")),
        ],
    );
    let handle = coordinator
        .regenerate_single(&e1, &"s2".into(), "gpt", "tighten")
        .await
        .unwrap();

    assert!(coordinator.is_section_regenerating(&e1, 1));
    assert!(!coordinator.is_section_regenerating(&e1, 0));
    assert!(!coordinator.is_section_regenerating(&e1, 2));
    assert!(coordinator.should_display_existing());

    let event = handle.wait().await.unwrap();
    assert_eq!(event.status, FinalStatus::Completed);
    assert!(event.failed_sections.is_empty());

    let execution = coordinator.execution(&e1).unwrap();
    assert_eq!(execution.status, ExecutionStatus::Completed);
    let contents: Vec<&str> = execution.sections.iter().map(|o| o.content.as_str()).collect();
    assert_eq!(contents, vec!["v1-1", "v2-2", "v1-3"]);
    assert!(!coordinator.is_section_regenerating(&e1, 1));
}

#[tokio::test(start_paused = true)]
async fn approval_locks_the_version_until_disapproved() {
    let (coordinator, service) = coordinator(3);
    let e1 = completed_execution(&coordinator, &service, "v1").await;

    service.script(
        "exec-1",
        vec![
            Ok(report(ExecutionStatus::Approving, &[])),
            Ok(report(ExecutionStatus::Approved, &[])),
        ],
    );
    let approval = coordinator.approve(&e1).await.unwrap();
    assert_eq!(approval.reverts_to, ExecutionStatus::Completed);
    assert_eq!(coordinator.execution(&e1).unwrap().status, ExecutionStatus::Approving);

    let err = coordinator
        .regenerate_from(&e1, &"s1".into(), "gpt", "again")
        .await
        .err()
        .unwrap();
    assert!(matches!(err, CoordinatorError::ExecutionImmutable { .. }));

    let event = approval.wait().await.unwrap();
    assert_eq!(event.status, FinalStatus::Approved);
    assert_eq!(coordinator.execution(&e1).unwrap().status, ExecutionStatus::Approved);

    let draft = coordinator.disapprove(&e1).await.unwrap();
    assert_eq!(draft.status, ExecutionStatus::Draft);
    assert!(draft.status.is_mutable());

    service.script("exec-1", vec![Ok(filled(ExecutionStatus::Completed, "v2"))]);
    let handle = coordinator
        .regenerate_from(&e1, &"s1".into(), "gpt", "again")
        .await
        .unwrap();
    for index in 0..3 {
        assert!(coordinator.is_section_regenerating(&e1, index));
    }
    let event = handle.wait().await.unwrap();
    assert_eq!(event.status, FinalStatus::Completed);

    let execution = coordinator.execution(&e1).unwrap();
    assert_eq!(execution.status, ExecutionStatus::Draft);
    let contents: Vec<&str> = execution.sections.iter().map(|o| o.content.as_str()).collect();
    assert_eq!(contents, vec!["v2-1", "v2-2", "v2-3"]);
}

#[tokio::test(start_paused = true)]
async fn transient_transport_failures_within_budget_still_complete_once() {
    let (coordinator, service) = coordinator(3);
    service.script(
        "exec-1",
        vec![
            Err(ServiceError::Transport("connection reset".to_string())),
            Err(ServiceError::Transport("connection reset".to_string())),
            Ok(filled(ExecutionStatus::Completed, "v1")),
        ],
    );

    let handle = coordinator
        .request_execution(&doc_id(), ExecutionMode::Full, params())
        .await
        .unwrap();
    let mut first = handle.completion();
    let mut second = coordinator
        .watch_completion(&handle.execution_id, ExecutionMode::Full)
        .unwrap();

    let event = first.next().await.unwrap();
    assert_eq!(event.status, FinalStatus::Completed);
    assert!(first.next().await.is_none());
    assert_eq!(second.next().await, Some(event));
    assert!(second.next().await.is_none());

    assert_eq!(service.calls("get_execution_status"), 3);
    assert_eq!(
        coordinator.execution(&handle.execution_id).unwrap().status,
        ExecutionStatus::Completed
    );
}
