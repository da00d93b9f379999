use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use std::time::Duration;
use uuid::Uuid;

/// The holder of the navigation lock, stamped with a fresh request id
/// on every acquisition so late completions under a superseded id can
/// be detected and dropped.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LockHolder {
    pub request_id: Uuid,
    pub acquired_at: DateTime<Utc>,
}

/// Shared mutable state of the navigation subsystem.
///
/// Mutated only by the `NavigationController`; the host reads
/// snapshots. Invariants: at most one lock holder at any time, and
/// `current_step` always within `[0, total_steps)`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NavigationState {
    pub current_step: usize,
    pub total_steps: usize,
    pub completed_steps: BTreeSet<usize>,
    pub is_navigating: bool,
    /// Field name -> message, for fields on the step the user is on
    #[serde(default)]
    pub validation_errors: HashMap<String, String>,
    /// Step id -> invalid flag, across all steps whose mapping
    /// contains a failing field
    #[serde(default)]
    pub step_validation_errors: HashMap<String, bool>,
    #[serde(default)]
    pub lock_holder: Option<LockHolder>,
}

impl NavigationState {
    pub fn new(total_steps: usize) -> Self {
        Self {
            current_step: 0,
            total_steps,
            completed_steps: BTreeSet::new(),
            is_navigating: false,
            validation_errors: HashMap::new(),
            step_validation_errors: HashMap::new(),
            lock_holder: None,
        }
    }

    /// Mark a step complete. Idempotent: re-marking an already
    /// complete step reports `false` so callers can skip update churn.
    pub fn mark_step_complete(&mut self, index: usize) -> bool {
        if index >= self.total_steps {
            return false;
        }
        self.completed_steps.insert(index)
    }

    pub fn is_step_complete(&self, index: usize) -> bool {
        self.completed_steps.contains(&index)
    }

    /// Order-stable view of completed step indices for UI consumption.
    pub fn completed_step_indices(&self) -> Vec<usize> {
        self.completed_steps.iter().copied().collect()
    }

    pub fn in_range(&self, index: usize) -> bool {
        index < self.total_steps
    }

    /// Try to take the navigation lock. Returns the fresh request id,
    /// or `None` if another request already holds it.
    pub fn acquire_lock(&mut self) -> Option<Uuid> {
        if self.lock_holder.is_some() {
            return None;
        }
        let request_id = Uuid::new_v4();
        self.lock_holder = Some(LockHolder {
            request_id,
            acquired_at: Utc::now(),
        });
        self.is_navigating = true;
        Some(request_id)
    }

    /// Whether the given request still holds the lock. Post-await
    /// mutations check this before touching state.
    pub fn holds_lock(&self, request_id: Uuid) -> bool {
        self.lock_holder
            .as_ref()
            .is_some_and(|h| h.request_id == request_id)
    }

    /// Release the lock if the given request still holds it.
    pub fn release_lock(&mut self, request_id: Uuid) -> bool {
        if self.holds_lock(request_id) {
            self.lock_holder = None;
            self.is_navigating = false;
            true
        } else {
            false
        }
    }

    /// Discard whatever lock is held, whoever holds it. Used by the
    /// watchdog and on teardown.
    pub fn force_release_lock(&mut self) -> Option<LockHolder> {
        let stale = self.lock_holder.take();
        if stale.is_some() {
            self.is_navigating = false;
        }
        stale
    }

    /// How long the current lock has been held, if one is held.
    pub fn lock_age(&self) -> Option<Duration> {
        let holder = self.lock_holder.as_ref()?;
        let age = Utc::now().signed_duration_since(holder.acquired_at);
        Some(age.to_std().unwrap_or(Duration::ZERO))
    }

    /// Whether the held lock is older than the given timeout.
    pub fn lock_expired(&self, timeout: Duration) -> bool {
        let Some(holder) = self.lock_holder.as_ref() else {
            return false;
        };
        let deadline = holder.acquired_at
            + ChronoDuration::from_std(timeout).unwrap_or_else(|_| ChronoDuration::seconds(0));
        Utc::now() >= deadline
    }

    pub fn set_field_errors(&mut self, errors: HashMap<String, String>) {
        self.validation_errors = errors;
    }

    pub fn clear_field_errors(&mut self) {
        self.validation_errors.clear();
    }

    pub fn set_step_invalid(&mut self, step_id: &str, invalid: bool) {
        if invalid {
            self.step_validation_errors.insert(step_id.to_string(), true);
        } else {
            self.step_validation_errors.remove(step_id);
        }
    }

    pub fn snapshot(&self) -> NavigationSnapshot {
        NavigationSnapshot {
            current_step: self.current_step,
            total_steps: self.total_steps,
            completed_steps: self.completed_step_indices(),
            is_navigating: self.is_navigating,
            validation_errors: self.validation_errors.clone(),
            step_validation_errors: self.step_validation_errors.clone(),
        }
    }
}

/// Read-only view of the navigation state handed to the host layer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NavigationSnapshot {
    pub current_step: usize,
    pub total_steps: usize,
    pub completed_steps: Vec<usize>,
    pub is_navigating: bool,
    pub validation_errors: HashMap<String, String>,
    pub step_validation_errors: HashMap<String, bool>,
}
