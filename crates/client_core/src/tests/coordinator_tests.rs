use super::*;
use crate::{
    selection::ChangeOrigin,
    test_support::{directory, store_a, store_b, RecordingBackend},
};

fn coordinator(backend: &Arc<RecordingBackend>) -> AttendanceCoordinator {
    AttendanceCoordinator::from_backend(Arc::clone(backend), directory())
}

fn checked_in_at(backend: &Arc<RecordingBackend>, location: Location) -> AttendanceCoordinator {
    let mut coordinator = coordinator(backend);
    coordinator.on_initial_fetch(Some(location));
    coordinator
}

#[tokio::test]
async fn initial_fetch_of_null_is_absent_without_calls() {
    let backend = RecordingBackend::new();
    let mut coordinator = coordinator(&backend);

    let outcome = coordinator.on_initial_fetch(None);

    assert_eq!(coordinator.state(), AttendanceState::Absent);
    assert!(outcome.ops().is_empty());
    assert!(backend.calls().is_empty());
}

#[tokio::test]
async fn initial_fetch_mirrors_backend_location_and_selection() {
    let backend = RecordingBackend::new();
    let mut coordinator = coordinator(&backend);

    let outcome = coordinator.on_initial_fetch(Some(store_a()));

    assert!(outcome.is_applied());
    assert_eq!(coordinator.state().location(), Some(&store_a()));
    assert_eq!(
        coordinator.selection().current(),
        Selection::Location("StoreA".into())
    );
    assert!(backend.calls().is_empty());
}

#[tokio::test]
async fn manual_select_from_absent_clocks_in_once() {
    let backend = RecordingBackend::new();
    let mut coordinator = coordinator(&backend);
    coordinator.on_initial_fetch(None);

    let outcome = coordinator
        .on_manual_select(Selection::Location("StoreA".into()))
        .await;

    assert_eq!(backend.calls(), vec![SessionOp::ClockIn(LocationId(5))]);
    assert_eq!(outcome.ops(), vec![SessionOp::ClockIn(LocationId(5))]);
    assert_eq!(coordinator.state().location(), Some(&store_a()));
}

#[tokio::test]
async fn switching_locations_closes_then_opens() {
    let backend = RecordingBackend::new();
    let mut coordinator = checked_in_at(&backend, store_a());

    coordinator
        .on_manual_select(Selection::Location("StoreB".into()))
        .await;

    assert_eq!(
        backend.calls(),
        vec![SessionOp::ClockOut, SessionOp::ClockIn(LocationId(7))]
    );
    assert_eq!(backend.max_in_flight(), 1);
    assert_eq!(coordinator.state().location(), Some(&store_b()));
}

#[tokio::test]
async fn detection_of_other_location_closes_then_opens() {
    let backend = RecordingBackend::new();
    let mut coordinator = checked_in_at(&backend, store_b());

    coordinator.on_detect(LocationId(5)).await;

    assert_eq!(
        backend.calls(),
        vec![SessionOp::ClockOut, SessionOp::ClockIn(LocationId(5))]
    );
    assert_eq!(coordinator.state().location(), Some(&store_a()));
    assert_eq!(
        coordinator.selection().current(),
        Selection::Location("StoreA".into())
    );
}

#[tokio::test]
async fn checkout_clocks_out_once_and_resets_picker_with_suppressed_echo() {
    let backend = RecordingBackend::new();
    let mut coordinator = checked_in_at(&backend, store_a());

    coordinator.request_checkout().await;

    assert_eq!(backend.calls(), vec![SessionOp::ClockOut]);
    assert_eq!(coordinator.state(), AttendanceState::Absent);
    assert_eq!(coordinator.selection().current(), Selection::Absent);

    // The picker reports the programmatic reset back; it must not re-enter.
    assert_eq!(coordinator.selection().observe_change(Selection::Absent), None);
    assert!(!coordinator.selection().is_gate_armed());
    assert_eq!(backend.calls(), vec![SessionOp::ClockOut]);
}

#[tokio::test]
async fn unknown_detection_is_a_silent_no_op() {
    let backend = RecordingBackend::new();
    let mut coordinator = checked_in_at(&backend, store_a());
    let before = coordinator.state();

    let outcome = coordinator.on_detect(LocationId(999)).await;

    assert_eq!(
        outcome,
        TransitionOutcome::Ignored {
            origin: Origin::Detection,
            reason: IgnoreReason::UnknownLocation
        }
    );
    assert_eq!(coordinator.state(), before);
    assert!(backend.calls().is_empty());
}

#[tokio::test]
async fn selecting_or_detecting_current_location_is_idempotent() {
    let backend = RecordingBackend::new();
    let mut coordinator = checked_in_at(&backend, store_a());

    let by_name = coordinator
        .on_manual_select(Selection::Location("StoreA".into()))
        .await;
    let by_scan = coordinator.on_detect(LocationId(5)).await;

    assert!(!by_name.is_applied());
    assert!(!by_scan.is_applied());
    assert!(backend.calls().is_empty());
}

#[tokio::test]
async fn checkout_while_absent_issues_nothing() {
    let backend = RecordingBackend::new();
    let mut coordinator = coordinator(&backend);

    let outcome = coordinator.request_checkout().await;

    assert_eq!(
        outcome,
        TransitionOutcome::Ignored {
            origin: Origin::Manual,
            reason: IgnoreReason::AlreadyCurrent
        }
    );
    assert!(backend.calls().is_empty());
}

#[tokio::test]
async fn unknown_selection_name_is_ignored() {
    let backend = RecordingBackend::new();
    let mut coordinator = coordinator(&backend);

    let outcome = coordinator
        .on_manual_select(Selection::Location("Basement".into()))
        .await;

    assert!(!outcome.is_applied());
    assert_eq!(coordinator.state(), AttendanceState::Absent);
    assert!(backend.calls().is_empty());
}

#[tokio::test]
async fn non_numeric_payload_is_ignored_and_numeric_payload_resolves() {
    let backend = RecordingBackend::new();
    let mut coordinator = coordinator(&backend);

    let garbage = coordinator.on_detect_payload("https://example.org/7").await;
    assert_eq!(
        garbage,
        TransitionOutcome::Ignored {
            origin: Origin::Detection,
            reason: IgnoreReason::InvalidPayload
        }
    );
    assert!(backend.calls().is_empty());

    coordinator.on_detect_payload(" 7\n").await;
    assert_eq!(backend.calls(), vec![SessionOp::ClockIn(LocationId(7))]);
}

#[tokio::test]
async fn failed_operations_keep_optimistic_state_and_report_outcomes() {
    let backend = RecordingBackend::new();
    backend.fail_with_status(503);
    let mut coordinator = checked_in_at(&backend, store_a());

    let outcome = coordinator.on_detect(LocationId(7)).await;

    // ClockIn still follows a failed ClockOut.
    assert_eq!(
        backend.calls(),
        vec![SessionOp::ClockOut, SessionOp::ClockIn(LocationId(7))]
    );
    assert_eq!(coordinator.state().location(), Some(&store_b()));
    assert_eq!(
        coordinator.last_outcomes(),
        &[
            OpOutcome {
                op: SessionOp::ClockOut,
                result: Err(ErrorKind::Http(503))
            },
            OpOutcome {
                op: SessionOp::ClockIn(LocationId(7)),
                result: Err(ErrorKind::Http(503))
            },
        ]
    );
    match outcome {
        TransitionOutcome::Applied { outcomes, .. } => {
            assert!(outcomes.iter().all(|o| !o.succeeded()))
        }
        other => panic!("expected applied transition, got {other:?}"),
    }
}

#[tokio::test]
async fn state_and_events_are_published_in_order() {
    let backend = RecordingBackend::new();
    let mut coordinator = coordinator(&backend);
    let mut events = coordinator.subscribe_events();
    let mut state = coordinator.subscribe_state();

    coordinator.on_detect(LocationId(5)).await;

    assert!(state.has_changed().expect("sender alive"));
    assert_eq!(state.borrow_and_update().location(), Some(&store_a()));

    match events.recv().await.expect("state event") {
        AttendanceEvent::StateChanged { state, origin } => {
            assert_eq!(origin, Origin::Detection);
            assert_eq!(state.location(), Some(&store_a()));
        }
        other => panic!("unexpected event {other:?}"),
    }
    match events.recv().await.expect("op event") {
        AttendanceEvent::OperationCompleted(outcome) => {
            assert_eq!(outcome.op, SessionOp::ClockIn(LocationId(5)));
            assert!(outcome.succeeded());
        }
        other => panic!("unexpected event {other:?}"),
    }
}

#[tokio::test]
async fn detection_write_is_tagged_system_and_echo_is_consumed_once() {
    let backend = RecordingBackend::new();
    let mut coordinator = coordinator(&backend);
    let mut changes = coordinator.selection().subscribe();

    coordinator.on_detect(LocationId(7)).await;

    let change = changes.borrow_and_update().clone();
    assert_eq!(change.origin, ChangeOrigin::System);
    assert_eq!(change.value, Selection::Location("StoreB".into()));

    let store = coordinator.selection().clone();
    assert_eq!(store.observe_change(Selection::Location("StoreB".into())), None);
    // A second identical notification is a genuine user action again.
    assert_eq!(
        store.observe_change(Selection::Location("StoreB".into())),
        Some(Selection::Location("StoreB".into()))
    );
}

#[tokio::test]
async fn manual_select_leaves_gate_disarmed() {
    let backend = RecordingBackend::new();
    let mut coordinator = coordinator(&backend);
    let store = coordinator.selection().clone();

    let picked = store
        .observe_change(Selection::Location("StoreA".into()))
        .expect("user change admitted");
    coordinator.on_manual_select(picked).await;

    assert!(!store.is_gate_armed());
    assert_eq!(
        store.observe_change(Selection::Absent),
        Some(Selection::Absent)
    );
}

#[tokio::test]
async fn sync_from_backend_seeds_state_without_session_calls() {
    let backend = RecordingBackend::new();
    backend.set_current(Some(store_b()));
    let mut coordinator = coordinator(&backend);

    let outcome = coordinator
        .sync_from_backend(UserId(1))
        .await
        .expect("sync");

    assert!(outcome.is_applied());
    assert_eq!(coordinator.state().location(), Some(&store_b()));
    assert!(backend.calls().is_empty());
}

#[tokio::test]
async fn sync_failure_surfaces_error_and_keeps_state() {
    let backend = RecordingBackend::new();
    backend.fail_with_status(401);
    let mut coordinator = coordinator(&backend);

    let err = coordinator
        .sync_from_backend(UserId(1))
        .await
        .expect_err("sync must fail");

    assert_eq!(err.kind(), ErrorKind::Http(401));
    assert_eq!(coordinator.state(), AttendanceState::Absent);
}

#[tokio::test]
async fn refresh_directory_replaces_known_locations() {
    let backend = RecordingBackend::new();
    backend.set_locations(vec![Location::new(42, "Harbour")]);
    let mut coordinator = coordinator(&backend);

    assert_eq!(coordinator.refresh_directory().await.expect("load"), 1);
    assert!(!coordinator.on_detect(LocationId(5)).await.is_applied());
    assert!(coordinator.on_detect(LocationId(42)).await.is_applied());
    assert_eq!(backend.calls(), vec![SessionOp::ClockIn(LocationId(42))]);
}

#[test]
fn plan_covers_every_transition_shape() {
    let absent = AttendanceState::Absent;
    let at_a = AttendanceState::CheckedIn {
        location: store_a(),
        since: Utc::now(),
    };

    assert!(plan_transition(&absent, &Target::Absent).is_empty());
    assert_eq!(
        plan_transition(&absent, &Target::Location(store_a())),
        vec![SessionOp::ClockIn(LocationId(5))]
    );
    assert_eq!(
        plan_transition(&at_a, &Target::Absent),
        vec![SessionOp::ClockOut]
    );
    assert!(plan_transition(&at_a, &Target::Location(store_a())).is_empty());
    assert_eq!(
        plan_transition(&at_a, &Target::Location(store_b())),
        vec![SessionOp::ClockOut, SessionOp::ClockIn(LocationId(7))]
    );
}

#[tokio::test]
async fn unknown_pick_puts_picker_back_on_held_location() {
    let backend = RecordingBackend::new();
    let mut coordinator = checked_in_at(&backend, store_a());
    let store = coordinator.selection().clone();

    let picked = store
        .observe_change(Selection::Location("Warehouse".into()))
        .expect("user change admitted");
    let outcome = coordinator.on_manual_select(picked).await;

    assert_eq!(
        outcome,
        TransitionOutcome::Ignored {
            origin: Origin::Manual,
            reason: IgnoreReason::UnknownLocation
        }
    );
    assert_eq!(store.current(), coordinator.state().selection());
    assert_eq!(store.subscribe().borrow().origin, ChangeOrigin::System);
    assert!(backend.calls().is_empty());

    // The widget reports the reset back; it is not a new pick.
    assert_eq!(store.observe_change(Selection::Location("StoreA".into())), None);
}

#[tokio::test]
async fn checkout_while_absent_resets_a_stale_picker() {
    let backend = RecordingBackend::new();
    let mut coordinator = coordinator(&backend);
    let store = coordinator.selection().clone();
    store.observe_change(Selection::Location("Warehouse".into()));

    coordinator.request_checkout().await;

    assert_eq!(store.current(), Selection::Absent);
    assert!(backend.calls().is_empty());
}
