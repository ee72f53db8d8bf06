use super::{any_status, execution};
use proptest::prelude::*;
use quire::execution::{ExecutionMode, ExecutionStatus, ExecutionStore, Observation, OutputPatch};
use quire::guard::{Admission, GuardedOperation, MutualExclusionGuard};
use quire::types::{DocumentId, ExecutionId};

const DOCUMENTS: [&str; 2] = ["doc-a", "doc-b"];

#[derive(Debug, Clone)]
enum Step {
    Insert { document: usize, status: ExecutionStatus },
    Transition { target: usize, next: ExecutionStatus },
    Observe { target: usize, status: ExecutionStatus },
    Remove { target: usize },
}

fn step() -> impl Strategy<Value = Step> {
    prop_oneof![
        (0..DOCUMENTS.len(), any_status()).prop_map(|(document, status)| Step::Insert { document, status }),
        (0..8usize, any_status()).prop_map(|(target, next)| Step::Transition { target, next }),
        (0..8usize, any_status()).prop_map(|(target, status)| Step::Observe { target, status }),
        (0..8usize).prop_map(|target| Step::Remove { target }),
    ]
}

fn assert_single_flight(store: &ExecutionStore) {
    for document in DOCUMENTS {
        let document_id = DocumentId::new(document);
        let in_flight: Vec<ExecutionId> = store
            .list(&document_id)
            .into_iter()
            .filter(|e| e.status.is_in_flight())
            .map(|e| e.id)
            .collect();
        assert!(in_flight.len() <= 1, "{} has {:?} in flight", document, in_flight);
        assert_eq!(store.in_flight(&document_id), in_flight.first().cloned());
    }
}

proptest! {
    #[test]
    fn store_never_holds_two_in_flight_executions_per_document(steps in prop::collection::vec(step(), 1..40)) {
        let store = ExecutionStore::new();
        let mut ids: Vec<ExecutionId> = Vec::new();

        for (n, step) in steps.into_iter().enumerate() {
            match step {
                Step::Insert { document, status } => {
                    let id = format!("exec-{}", n);
                    if store.insert(execution(&id, DOCUMENTS[document], status)).is_ok() {
                        ids.push(ExecutionId::new(id));
                    }
                }
                Step::Transition { target, next } => {
                    if let Some(id) = ids.get(target) {
                        if let Ok(current) = store.get(id) {
                            let _ = store.transition(id, current.status, next);
                        }
                    }
                }
                Step::Observe { target, status } => {
                    if let Some(id) = ids.get(target) {
                        if let Ok(current) = store.get(id) {
                            let _ = store.apply_observation(
                                id,
                                Observation { epoch: current.epoch, status, outputs: OutputPatch::Keep },
                            );
                        }
                    }
                }
                Step::Remove { target } => {
                    if let Some(id) = ids.get(target) {
                        let _ = store.remove(id);
                    }
                }
            }
            assert_single_flight(&store);
        }
    }

    #[test]
    fn guard_admits_one_reservation_per_document(picks in prop::collection::vec((0..DOCUMENTS.len(), any::<bool>()), 1..30)) {
        let store = ExecutionStore::new();
        let guard = MutualExclusionGuard::new();
        let mut held = vec![None, None];

        for (document, release) in picks {
            let document_id = DocumentId::new(DOCUMENTS[document]);
            if release {
                held[document] = None;
                prop_assert!(guard.reserved_by(&document_id).is_none());
                continue;
            }
            let operation = GuardedOperation::Create(ExecutionMode::Full);
            match guard.admit(&store, &document_id, &operation) {
                Ok(Admission::Reserved(reservation)) => {
                    prop_assert!(held[document].is_none());
                    held[document] = Some(reservation);
                }
                Ok(Admission::Attached(_)) => prop_assert!(false, "create never attaches"),
                Err(_) => prop_assert!(held[document].is_some()),
            }
            prop_assert_eq!(guard.reserved_by(&document_id).is_some(), held[document].is_some());
        }
    }
}
