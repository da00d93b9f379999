use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;

use super::descriptor::StepFieldMap;
use crate::state::NavigationState;

/// The injected field-level validation capability. The concrete
/// schema (required fields, VIN length, and so on) lives with the
/// host; the core only needs pass/fail plus the current error map.
#[async_trait]
pub trait FieldValidator: Send + Sync {
    /// Run validation for the named fields. `Ok(true)` means all pass.
    async fn trigger_validation(&self, fields: &[String]) -> anyhow::Result<bool>;

    /// Current error map, keyed by field name.
    fn current_errors(&self) -> HashMap<String, String>;
}

/// Result of validating one step's registered fields.
#[derive(Debug, Clone)]
pub struct ValidationOutcome {
    pub passed: bool,
    /// Field -> message, as reported by the collaborator
    pub errors: HashMap<String, String>,
    /// Steps whose invalid flag this outcome updates: on failure,
    /// every step whose mapping contains a failing field; on success,
    /// the validated step (so a stale flag clears)
    pub affected_steps: Vec<String>,
}

impl ValidationOutcome {
    pub fn pass() -> Self {
        Self {
            passed: true,
            errors: HashMap::new(),
            affected_steps: Vec::new(),
        }
    }

    /// Success for one specific step, clearing any stale invalid flag
    /// it carries.
    pub fn pass_for(step_id: &str) -> Self {
        Self {
            passed: true,
            errors: HashMap::new(),
            affected_steps: vec![step_id.to_string()],
        }
    }

    /// Failure with no field detail, marking only the given step
    /// invalid. Used when validation itself could not run.
    pub fn fail_closed(step_id: &str) -> Self {
        Self {
            passed: false,
            errors: HashMap::new(),
            affected_steps: vec![step_id.to_string()],
        }
    }

    /// The first failing field registered to the given step, in the
    /// step's own field order. `None` when the failure belongs
    /// entirely to other steps.
    pub fn first_error_on(&self, map: &StepFieldMap, step_id: &str) -> Option<(String, String)> {
        map.fields_for(step_id)
            .iter()
            .find_map(|field| self.errors.get(field).map(|msg| (field.clone(), msg.clone())))
    }

    /// Write the outcome into the shared navigation state: the field
    /// error map wholesale, and an invalid flag on every affected step.
    pub fn apply_to_state(&self, state: &mut NavigationState) {
        if self.passed {
            state.clear_field_errors();
        } else {
            state.set_field_errors(self.errors.clone());
        }
        for step_id in &self.affected_steps {
            state.set_step_invalid(step_id, !self.passed);
        }
    }
}

/// Validates one step at a time by delegating to the injected
/// [`FieldValidator`] and bucketing failures per step.
///
/// Never panics and never propagates: collaborator errors are treated
/// as "invalid" so a broken validator cannot let an unchecked step
/// through.
pub struct StepValidator {
    validator: Arc<dyn FieldValidator>,
    map: StepFieldMap,
}

impl StepValidator {
    pub fn new(validator: Arc<dyn FieldValidator>, map: StepFieldMap) -> Self {
        Self { validator, map }
    }

    pub fn field_map(&self) -> &StepFieldMap {
        &self.map
    }

    pub async fn validate_step(&self, step_id: &str) -> ValidationOutcome {
        let fields = self.map.fields_for(step_id);
        if fields.is_empty() {
            // Steps with no registered fields (e.g. a review page) pass
            return ValidationOutcome::pass_for(step_id);
        }

        match self.validator.trigger_validation(fields).await {
            Ok(true) => ValidationOutcome::pass_for(step_id),
            Ok(false) => {
                let errors = self.validator.current_errors();
                let affected: BTreeSet<String> = errors
                    .keys()
                    .flat_map(|field| self.map.steps_containing(field))
                    .map(ToString::to_string)
                    .collect();
                tracing::debug!(
                    step = step_id,
                    failing_fields = errors.len(),
                    "Step validation failed"
                );
                ValidationOutcome {
                    passed: false,
                    errors,
                    affected_steps: affected.into_iter().collect(),
                }
            }
            Err(e) => {
                // Fail closed: an erroring validator blocks the step
                tracing::warn!(step = step_id, error = %e, "Field validator errored, treating step as invalid");
                ValidationOutcome {
                    passed: false,
                    errors: HashMap::new(),
                    affected_steps: vec![step_id.to_string()],
                }
            }
        }
    }
}

/// Mock implementation for testing
#[derive(Default)]
pub struct MockFieldValidator {
    /// Field -> message to report as failing
    errors: Mutex<HashMap<String, String>>,
    /// Simulate the collaborator itself erroring
    erroring: Mutex<bool>,
    /// Fields passed to each trigger_validation call
    pub calls: Mutex<Vec<Vec<String>>>,
}

impl MockFieldValidator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_field_error(&self, field: &str, message: &str) {
        self.lock_errors().insert(field.to_string(), message.to_string());
    }

    pub fn clear_field_error(&self, field: &str) {
        self.lock_errors().remove(field);
    }

    pub fn set_erroring(&self, erroring: bool) {
        *self.erroring.lock().unwrap_or_else(PoisonError::into_inner) = erroring;
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    fn lock_errors(&self) -> std::sync::MutexGuard<'_, HashMap<String, String>> {
        self.errors.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl FieldValidator for MockFieldValidator {
    async fn trigger_validation(&self, fields: &[String]) -> anyhow::Result<bool> {
        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(fields.to_vec());

        if *self.erroring.lock().unwrap_or_else(PoisonError::into_inner) {
            anyhow::bail!("validator unavailable");
        }

        let errors = self.lock_errors();
        Ok(!fields.iter().any(|f| errors.contains_key(f)))
    }

    fn current_errors(&self) -> HashMap<String, String> {
        self.lock_errors().clone()
    }
}
