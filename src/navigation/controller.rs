use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use uuid::Uuid;

use super::watchdog::LockWatchdog;
use super::SharedNavState;
use crate::config::NavigationConfig;
use crate::error::NavigationError;
use crate::notifications::{FlowEvent, NotificationService};
use crate::progress::ProgressPersister;
use crate::state::{NavigationSnapshot, NavigationState};
use crate::steps::{StepDescriptor, StepValidator, ValidationOutcome};
use crate::tracker::{OperationTracker, Severity, TrackOptions};

/// Sequences validation, persistence, and step mutation for the flow.
///
/// A transition runs under a mutual-exclusion lock: a second request
/// arriving while one is in flight is rejected outright, not queued.
/// Every lock acquisition is stamped with a fresh request id, and
/// every post-await mutation re-checks the stamp, so a completion
/// arriving after the watchdog discarded its lock cannot clobber
/// newer state.
pub struct NavigationController {
    steps: Vec<StepDescriptor>,
    state: SharedNavState,
    validator: StepValidator,
    persister: Arc<ProgressPersister>,
    tracker: Arc<OperationTracker>,
    events: Arc<NotificationService>,
    watchdog: LockWatchdog,
}

impl NavigationController {
    pub fn new(
        steps: Vec<StepDescriptor>,
        validator: StepValidator,
        persister: Arc<ProgressPersister>,
        tracker: Arc<OperationTracker>,
        events: Arc<NotificationService>,
        config: NavigationConfig,
    ) -> Result<Self, NavigationError> {
        if steps.is_empty() {
            return Err(NavigationError::NoSteps);
        }

        let state: SharedNavState = Arc::new(Mutex::new(NavigationState::new(steps.len())));
        let watchdog = LockWatchdog::new(state.clone(), events.clone(), config);

        Ok(Self {
            steps,
            state,
            validator,
            persister,
            tracker,
            events,
            watchdog,
        })
    }

    /// Request a move to `target`. Returns whether the current step
    /// changed. Out-of-range targets and requests arriving while a
    /// transition is in flight are rejected as no-ops.
    pub async fn request_step(&self, target: usize) -> bool {
        self.watchdog.ensure_sweep();

        let (request_id, current) = {
            let mut st = self.lock_state();
            if !st.in_range(target) {
                tracing::warn!(
                    requested = target,
                    total = st.total_steps,
                    "Requested step out of range"
                );
                return false;
            }
            if target == st.current_step {
                tracing::debug!(step = target, "Already on requested step");
                return false;
            }
            match st.acquire_lock() {
                Some(id) => (id, st.current_step),
                None => {
                    tracing::warn!(requested = target, "Navigation already in progress");
                    self.events
                        .notify(&FlowEvent::NavigationRejected { requested: target });
                    return false;
                }
            }
        };

        self.watchdog.arm(request_id);
        tracing::debug!(%request_id, from = current, to = target, "Navigation lock acquired");

        let changed = self.perform_transition(request_id, current, target).await;

        // Cleanup path: runs whichever branch the transition took.
        // Releasing is a no-op if the watchdog already discarded the lock.
        self.watchdog.disarm();
        self.lock_state().release_lock(request_id);

        changed
    }

    /// Move forward one step.
    pub async fn next_step(&self) -> bool {
        let current = self.current_step();
        self.request_step(current + 1).await
    }

    /// Move back one step. Backward moves never validate.
    pub async fn previous_step(&self) -> bool {
        let current = self.current_step();
        if current == 0 {
            return false;
        }
        self.request_step(current - 1).await
    }

    /// Validate the step the user is currently on. The step's custom
    /// predicate is authoritative when declared; otherwise the
    /// field-mapped validator is consulted.
    pub async fn validate_current_step(&self) -> bool {
        let current = self.current_step();
        let outcome = self.run_validation(current).await;
        outcome.apply_to_state(&mut self.lock_state());
        outcome.passed
    }

    async fn run_validation(&self, step_index: usize) -> ValidationOutcome {
        let step = &self.steps[step_index];

        if let Some(predicate) = &step.validate {
            let passed = predicate();
            return if passed {
                ValidationOutcome::pass_for(&step.id)
            } else {
                ValidationOutcome::fail_closed(&step.id)
            };
        }

        let step_id = step.id.clone();
        self.tracker
            .track(
                "validate_step",
                TrackOptions::new()
                    .severity(Severity::Warning)
                    .fallback(ValidationOutcome::fail_closed(&step_id)),
                async { Ok(self.validator.validate_step(&step_id).await) },
            )
            .await
            .unwrap_or_else(|_| ValidationOutcome::fail_closed(&step.id))
    }

    async fn perform_transition(&self, request_id: Uuid, current: usize, target: usize) -> bool {
        if target > current {
            let outcome = self.run_validation(current).await;

            {
                let mut st = self.lock_state();
                if !st.holds_lock(request_id) {
                    tracing::debug!(%request_id, "Lock superseded during validation, dropping result");
                    return false;
                }
                outcome.apply_to_state(&mut st);
            }

            if !outcome.passed {
                let step = &self.steps[current];
                let (field, message) = outcome
                    .first_error_on(self.validator.field_map(), &step.id)
                    .map_or_else(
                        || {
                            (
                                None,
                                "Please complete this step before continuing".to_string(),
                            )
                        },
                        |(field, message)| (Some(field), message),
                    );
                tracing::info!(step = %step.id, field = field.as_deref(), "Forward navigation blocked by validation");
                self.events.notify(&FlowEvent::ValidationFailed {
                    step_id: step.id.clone(),
                    field,
                    message,
                });
                return false;
            }
        }

        // Persistence failure must never trap the user on a step: a
        // failed or timed-out save is logged and navigation proceeds.
        let saved = self
            .tracker
            .track(
                "save_progress",
                TrackOptions::new().fallback(false),
                async { Ok(self.persister.save_current_progress().await) },
            )
            .await
            .unwrap_or(false);
        if !saved {
            tracing::debug!("Progress save did not land, continuing navigation");
        }

        let from = {
            let mut st = self.lock_state();
            if !st.holds_lock(request_id) {
                tracing::debug!(%request_id, "Lock superseded during save, dropping step change");
                return false;
            }
            st.mark_step_complete(current);
            let from = st.current_step;
            st.current_step = target;
            from
        };

        tracing::info!(from, to = target, "Step changed");
        self.events
            .notify(&FlowEvent::StepChanged { from, to: target });
        true
    }

    /// Release everything on teardown: watchdog tasks and any held
    /// lock, so no state leaks across session lifetimes.
    pub fn shutdown(&self) {
        self.watchdog.shutdown();
        let mut st = self.lock_state();
        if st.force_release_lock().is_some() {
            tracing::debug!("Released navigation lock on teardown");
        }
    }

    pub fn snapshot(&self) -> NavigationSnapshot {
        self.lock_state().snapshot()
    }

    pub fn current_step(&self) -> usize {
        self.lock_state().current_step
    }

    pub fn completed_steps(&self) -> Vec<usize> {
        self.lock_state().completed_step_indices()
    }

    pub fn is_navigating(&self) -> bool {
        self.lock_state().is_navigating
    }

    pub fn total_steps(&self) -> usize {
        self.steps.len()
    }

    pub fn step(&self, index: usize) -> Option<&StepDescriptor> {
        self.steps.get(index)
    }

    fn lock_state(&self) -> MutexGuard<'_, NavigationState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Drop for NavigationController {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TrackerConfig;
    use crate::notifications::RecordingSink;
    use crate::progress::{MockProgressSaver, MockSaveMode};
    use crate::steps::{MockFieldValidator, StepFieldMap};
    use crate::tracker::OperationTracker;
    use std::time::Duration;

    struct Harness {
        controller: Arc<NavigationController>,
        validator: Arc<MockFieldValidator>,
        saver: Arc<MockProgressSaver>,
        sink: Arc<RecordingSink>,
    }

    fn harness(save_mode: MockSaveMode) -> Harness {
        let sink = Arc::new(RecordingSink::new());
        let events = Arc::new(NotificationService::new().with_sink(sink.clone()));

        let validator = Arc::new(MockFieldValidator::new());
        let map = StepFieldMap::new()
            .with_step("vehicle", ["vin", "make"])
            .with_step("pricing", ["price"])
            .with_step("review", Vec::<String>::new());
        let step_validator = StepValidator::new(validator.clone(), map);

        let saver = Arc::new(MockProgressSaver::new(save_mode));
        let persister = Arc::new(ProgressPersister::with_saver(events.clone(), saver.clone()));
        let tracker = Arc::new(OperationTracker::new(TrackerConfig::default()));

        let steps = vec![
            StepDescriptor::new("vehicle", 0).with_required_fields(["vin", "make"]),
            StepDescriptor::new("pricing", 1).with_required_fields(["price"]),
            StepDescriptor::new("review", 2),
        ];

        let controller = NavigationController::new(
            steps,
            step_validator,
            persister,
            tracker,
            events,
            NavigationConfig::default(),
        )
        .unwrap();

        Harness {
            controller: Arc::new(controller),
            validator,
            saver,
            sink,
        }
    }

    #[test]
    fn test_empty_steps_rejected() {
        let events = Arc::new(NotificationService::disabled());
        let validator = StepValidator::new(
            Arc::new(MockFieldValidator::new()),
            StepFieldMap::new(),
        );
        let persister = Arc::new(ProgressPersister::new(events.clone()));
        let tracker = Arc::new(OperationTracker::new(TrackerConfig::default()));

        let result = NavigationController::new(
            Vec::new(),
            validator,
            persister,
            tracker,
            events,
            NavigationConfig::default(),
        );
        assert!(matches!(result, Err(NavigationError::NoSteps)));
    }

    #[tokio::test]
    async fn test_forward_move_validates_and_saves() {
        let h = harness(MockSaveMode::Succeed);

        assert!(h.controller.request_step(1).await);
        assert_eq!(h.controller.current_step(), 1);
        assert_eq!(h.controller.completed_steps(), vec![0]);
        assert_eq!(h.validator.call_count(), 1);
        assert_eq!(h.saver.call_count(), 1);
        assert!(!h.controller.is_navigating());
    }

    #[tokio::test]
    async fn test_forward_blocked_by_invalid_field() {
        let h = harness(MockSaveMode::Succeed);
        h.validator.set_field_error("vin", "VIN is required");

        assert!(!h.controller.request_step(1).await);
        assert_eq!(h.controller.current_step(), 0);

        let snapshot = h.controller.snapshot();
        assert_eq!(
            snapshot.validation_errors.get("vin"),
            Some(&"VIN is required".to_string())
        );
        assert!(h.sink.contains(|e| matches!(
            e,
            FlowEvent::ValidationFailed { field: Some(f), .. } if f == "vin"
        )));
        // No save attempt for a blocked transition
        assert_eq!(h.saver.call_count(), 0);
    }

    #[tokio::test]
    async fn test_backward_move_skips_validation() {
        let h = harness(MockSaveMode::Succeed);
        assert!(h.controller.request_step(2).await);
        assert_eq!(h.validator.call_count(), 1);

        // Step 2's fields are intentionally broken; backward still works
        h.validator.set_field_error("price", "Price must be positive");
        assert!(h.controller.previous_step().await);
        assert_eq!(h.controller.current_step(), 1);
        // Validation was not consulted for the backward move
        assert_eq!(h.validator.call_count(), 1);
    }

    #[tokio::test]
    async fn test_save_failure_does_not_block_navigation() {
        let h = harness(MockSaveMode::Error);

        assert!(h.controller.request_step(1).await);
        assert_eq!(h.controller.current_step(), 1);
        assert!(h
            .sink
            .contains(|e| matches!(e, FlowEvent::ProgressSaveFailed { .. })));
    }

    #[tokio::test]
    async fn test_out_of_range_is_noop() {
        let h = harness(MockSaveMode::Succeed);
        assert!(!h.controller.request_step(9).await);
        assert_eq!(h.controller.current_step(), 0);
    }

    #[tokio::test]
    async fn test_same_step_is_noop() {
        let h = harness(MockSaveMode::Succeed);
        assert!(!h.controller.request_step(0).await);
        assert_eq!(h.saver.call_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_request_rejected() {
        let h = harness(MockSaveMode::Hang);

        let first = {
            let controller = h.controller.clone();
            tokio::spawn(async move { controller.request_step(1).await })
        };
        // Let the first request reach its hung save
        tokio::task::yield_now().await;
        assert!(h.controller.is_navigating());

        // Second request is rejected outright, not deferred
        assert!(!h.controller.request_step(2).await);
        assert!(h
            .sink
            .contains(|e| matches!(e, FlowEvent::NavigationRejected { requested: 2 })));
        assert_eq!(h.controller.current_step(), 0);

        // Watchdog frees the lock; the hung request resolves late and
        // its result is dropped
        tokio::time::sleep(Duration::from_secs(31)).await;
        assert!(!first.await.unwrap());
        assert!(!h.controller.is_navigating());
        assert!(h
            .sink
            .contains(|e| matches!(e, FlowEvent::NavigationTimedOut { .. })));
        assert_eq!(h.controller.current_step(), 0);

        // The flow recovers: a fresh request succeeds
        h.saver.set_mode(MockSaveMode::Succeed);
        assert!(h.controller.request_step(1).await);
        assert_eq!(h.controller.current_step(), 1);
    }

    #[tokio::test]
    async fn test_custom_predicate_is_authoritative() {
        let sink = Arc::new(RecordingSink::new());
        let events = Arc::new(NotificationService::new().with_sink(sink.clone()));
        let validator = Arc::new(MockFieldValidator::new());
        // The field validator would fail vin, but the predicate wins
        validator.set_field_error("vin", "VIN is required");
        let map = StepFieldMap::new().with_step("vehicle", ["vin"]);
        let step_validator = StepValidator::new(validator.clone(), map);
        let persister = Arc::new(ProgressPersister::with_saver(
            events.clone(),
            Arc::new(MockProgressSaver::new(MockSaveMode::Succeed)),
        ));
        let tracker = Arc::new(OperationTracker::new(TrackerConfig::default()));

        let steps = vec![
            StepDescriptor::new("vehicle", 0).with_predicate(Arc::new(|| true)),
            StepDescriptor::new("review", 1),
        ];
        let controller = NavigationController::new(
            steps,
            step_validator,
            persister,
            tracker,
            events,
            NavigationConfig::default(),
        )
        .unwrap();

        assert!(controller.request_step(1).await);
        assert_eq!(controller.current_step(), 1);
        assert_eq!(validator.call_count(), 0);
    }

    #[tokio::test]
    async fn test_validate_current_step_reports_without_moving() {
        let h = harness(MockSaveMode::Succeed);
        h.validator.set_field_error("vin", "VIN is required");

        assert!(!h.controller.validate_current_step().await);
        assert_eq!(h.controller.current_step(), 0);

        h.validator.clear_field_error("vin");
        assert!(h.controller.validate_current_step().await);
    }

    #[tokio::test]
    async fn test_shutdown_releases_held_lock() {
        let h = harness(MockSaveMode::Succeed);
        // Take the lock directly to simulate teardown mid-transition
        h.controller.lock_state().acquire_lock().unwrap();
        assert!(h.controller.is_navigating());

        h.controller.shutdown();
        assert!(!h.controller.is_navigating());
    }
}
