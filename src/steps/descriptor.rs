use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// Custom validation predicate for a step. When present, its result is
/// authoritative and the field-mapped validator is not consulted.
pub type StepPredicate = Arc<dyn Fn() -> bool + Send + Sync>;

/// One page/section of the flow. Immutable; supplied by the host at
/// construction. The controller never creates or destroys these.
#[derive(Clone)]
pub struct StepDescriptor {
    pub id: String,
    pub position: usize,
    pub required_fields: Vec<String>,
    pub validate: Option<StepPredicate>,
}

impl StepDescriptor {
    pub fn new(id: impl Into<String>, position: usize) -> Self {
        Self {
            id: id.into(),
            position,
            required_fields: Vec::new(),
            validate: None,
        }
    }

    pub fn with_required_fields<I, S>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.required_fields = fields.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_predicate(mut self, predicate: StepPredicate) -> Self {
        self.validate = Some(predicate);
        self
    }

    pub fn has_predicate(&self) -> bool {
        self.validate.is_some()
    }
}

impl fmt::Debug for StepDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StepDescriptor")
            .field("id", &self.id)
            .field("position", &self.position)
            .field("required_fields", &self.required_fields)
            .field("validate", &self.validate.as_ref().map(|_| "<predicate>"))
            .finish()
    }
}

/// Static mapping from step id to the field names validated on that
/// step. Distinct UI numbering schemes get distinct maps; they are
/// never merged.
#[derive(Debug, Clone, Default)]
pub struct StepFieldMap {
    fields_by_step: HashMap<String, Vec<String>>,
}

impl StepFieldMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_step<I, S>(mut self, step_id: impl Into<String>, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.fields_by_step
            .insert(step_id.into(), fields.into_iter().map(Into::into).collect());
        self
    }

    /// Fields registered for a step; empty when the step declares none.
    pub fn fields_for(&self, step_id: &str) -> &[String] {
        self.fields_by_step
            .get(step_id)
            .map_or(&[], Vec::as_slice)
    }

    /// Every step whose mapping contains the field. A field may
    /// legitimately belong to more than one step.
    pub fn steps_containing(&self, field: &str) -> Vec<&str> {
        let mut steps: Vec<&str> = self
            .fields_by_step
            .iter()
            .filter(|(_, fields)| fields.iter().any(|f| f == field))
            .map(|(step, _)| step.as_str())
            .collect();
        steps.sort_unstable();
        steps
    }

    pub fn contains_step(&self, step_id: &str) -> bool {
        self.fields_by_step.contains_key(step_id)
    }
}
