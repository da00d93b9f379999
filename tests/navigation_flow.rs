//! End-to-end navigation scenarios over the public API.

use std::sync::Arc;
use std::time::Duration;

use formflow::config::FlowConfig;
use formflow::notifications::{FlowEvent, NotificationService, RecordingSink};
use formflow::progress::{MockProgressSaver, MockSaveMode, ProgressPersister};
use formflow::steps::{MockFieldValidator, StepDescriptor, StepFieldMap, StepValidator};
use formflow::tracker::OperationTracker;
use formflow::NavigationController;

struct Flow {
    controller: Arc<NavigationController>,
    validator: Arc<MockFieldValidator>,
    saver: Arc<MockProgressSaver>,
    persister: Arc<ProgressPersister>,
    sink: Arc<RecordingSink>,
}

/// A four-step car-listing flow: vehicle details, pricing, photos,
/// review.
fn listing_flow(save_mode: MockSaveMode) -> Flow {
    let config = FlowConfig::default();
    let sink = Arc::new(RecordingSink::new());
    let events = Arc::new(NotificationService::new().with_sink(sink.clone()));

    let validator = Arc::new(MockFieldValidator::new());
    let map = StepFieldMap::new()
        .with_step("vehicle", ["vin", "make", "model"])
        .with_step("pricing", ["price"])
        .with_step("photos", Vec::<String>::new())
        .with_step("review", Vec::<String>::new());
    let step_validator = StepValidator::new(validator.clone(), map);

    let saver = Arc::new(MockProgressSaver::new(save_mode));
    let persister = Arc::new(ProgressPersister::with_saver(events.clone(), saver.clone()));
    let tracker = Arc::new(OperationTracker::new(config.tracker.clone()));

    let steps = vec![
        StepDescriptor::new("vehicle", 0).with_required_fields(["vin", "make", "model"]),
        StepDescriptor::new("pricing", 1).with_required_fields(["price"]),
        StepDescriptor::new("photos", 2),
        StepDescriptor::new("review", 3),
    ];

    let controller = NavigationController::new(
        steps,
        step_validator,
        persister.clone(),
        tracker,
        events,
        config.navigation,
    )
    .expect("flow has steps");

    Flow {
        controller: Arc::new(controller),
        validator,
        saver,
        persister,
        sink,
    }
}

#[tokio::test]
async fn walks_forward_through_the_whole_flow() {
    let flow = listing_flow(MockSaveMode::Succeed);

    assert!(flow.controller.next_step().await);
    assert!(flow.controller.next_step().await);
    assert!(flow.controller.next_step().await);

    assert_eq!(flow.controller.current_step(), 3);
    assert_eq!(flow.controller.completed_steps(), vec![0, 1, 2]);
    assert_eq!(flow.saver.call_count(), 3);
}

#[tokio::test]
async fn unset_vin_blocks_forward_navigation() {
    let flow = listing_flow(MockSaveMode::Succeed);
    flow.validator.set_field_error("vin", "VIN is required");

    assert!(!flow.controller.request_step(1).await);
    assert_eq!(flow.controller.current_step(), 0);

    let snapshot = flow.controller.snapshot();
    assert_eq!(
        snapshot.validation_errors.get("vin"),
        Some(&"VIN is required".to_string())
    );
    assert_eq!(
        snapshot.step_validation_errors.get("vehicle"),
        Some(&true)
    );

    // Fixing the field unblocks the same request
    flow.validator.clear_field_error("vin");
    assert!(flow.controller.request_step(1).await);
    assert_eq!(flow.controller.current_step(), 1);
}

#[tokio::test]
async fn backward_navigation_never_validates() {
    let flow = listing_flow(MockSaveMode::Succeed);
    assert!(flow.controller.request_step(2).await);
    let forward_validations = flow.validator.call_count();

    // Break the current step's own fields; backward still succeeds
    flow.validator.set_field_error("price", "Price must be positive");
    assert!(flow.controller.request_step(1).await);
    assert_eq!(flow.controller.current_step(), 1);
    assert_eq!(flow.validator.call_count(), forward_validations);
}

#[tokio::test]
async fn persistence_failure_never_traps_the_user() {
    let flow = listing_flow(MockSaveMode::Error);

    assert!(flow.controller.next_step().await);
    assert_eq!(flow.controller.current_step(), 1);
    assert!(flow
        .sink
        .contains(|e| matches!(e, FlowEvent::ProgressSaveFailed { .. })));
}

#[tokio::test]
async fn save_function_can_be_bound_after_construction() {
    let config = FlowConfig::default();
    let events = Arc::new(NotificationService::disabled());
    let validator = Arc::new(MockFieldValidator::new());
    let step_validator = StepValidator::new(
        validator,
        StepFieldMap::new().with_step("vehicle", Vec::<String>::new()),
    );
    // No saver yet: the real one needs the total step count below
    let persister = Arc::new(ProgressPersister::new(events.clone()));
    let tracker = Arc::new(OperationTracker::new(config.tracker.clone()));

    let steps = vec![
        StepDescriptor::new("vehicle", 0),
        StepDescriptor::new("review", 1),
    ];
    let controller = NavigationController::new(
        steps,
        step_validator,
        persister.clone(),
        tracker,
        events,
        config.navigation,
    )
    .expect("flow has steps");

    // Navigation works before the saver exists; the save just fails softly
    assert!(controller.request_step(1).await);

    let saver = Arc::new(MockProgressSaver::new(MockSaveMode::Succeed));
    persister.update_saver(saver.clone());

    assert!(controller.request_step(0).await);
    assert_eq!(saver.call_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn watchdog_recovers_a_hung_navigation() {
    let flow = listing_flow(MockSaveMode::Hang);

    let controller = flow.controller.clone();
    let attempt = tokio::spawn(async move { controller.request_step(1).await });
    tokio::task::yield_now().await;
    assert!(flow.controller.is_navigating());

    // The lock timeout is 10s; the lock must be free soon after
    // without any external intervention
    tokio::time::sleep(Duration::from_secs(11)).await;
    assert!(!flow.controller.is_navigating());
    assert!(flow
        .sink
        .contains(|e| matches!(e, FlowEvent::NavigationTimedOut { .. })));

    // The hung attempt eventually resolves and reports no change
    tokio::time::sleep(Duration::from_secs(30)).await;
    assert!(!attempt.await.expect("attempt task completes"));
    assert_eq!(flow.controller.current_step(), 0);

    // The flow is usable again
    flow.saver.set_mode(MockSaveMode::Succeed);
    assert!(flow.controller.request_step(1).await);
}

#[tokio::test(start_paused = true)]
async fn overlapping_requests_are_rejected_not_queued() {
    let flow = listing_flow(MockSaveMode::Hang);

    let controller = flow.controller.clone();
    let first = tokio::spawn(async move { controller.request_step(1).await });
    tokio::task::yield_now().await;

    // While the first is suspended mid-save, a second request bounces
    assert!(!flow.controller.request_step(2).await);
    assert!(flow
        .sink
        .contains(|e| matches!(e, FlowEvent::NavigationRejected { requested: 2 })));
    assert_eq!(flow.controller.current_step(), 0);

    tokio::time::sleep(Duration::from_secs(45)).await;
    let _ = first.await;
}

#[tokio::test]
async fn current_step_stays_in_range() {
    let flow = listing_flow(MockSaveMode::Succeed);
    let total = flow.controller.total_steps();

    assert!(!flow.controller.request_step(total).await);
    assert!(!flow.controller.request_step(usize::MAX).await);
    assert!(!flow.controller.previous_step().await);

    for target in [2, 0, 3, 1, 1] {
        let _ = flow.controller.request_step(target).await;
        assert!(flow.controller.current_step() < total);
    }
}

#[tokio::test]
async fn completion_marking_is_idempotent() {
    let flow = listing_flow(MockSaveMode::Succeed);

    // Bouncing between the same two steps re-marks them repeatedly
    assert!(flow.controller.request_step(1).await);
    assert!(flow.controller.request_step(0).await);
    assert!(flow.controller.request_step(1).await);
    assert!(flow.controller.request_step(0).await);

    assert_eq!(flow.controller.completed_steps(), vec![0, 1]);
}

#[tokio::test]
async fn teardown_releases_navigation_state() {
    let flow = listing_flow(MockSaveMode::Succeed);
    assert!(flow.controller.request_step(1).await);

    flow.controller.shutdown();
    assert!(!flow.controller.is_navigating());

    // Shutdown is idempotent, and the persister outlives it
    flow.controller.shutdown();
    assert!(flow.persister.save_current_progress().await);
}
