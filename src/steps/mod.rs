//! Step definitions and validation wiring.

mod descriptor;
mod validator;

pub use descriptor::{StepDescriptor, StepFieldMap, StepPredicate};
pub use validator::{FieldValidator, MockFieldValidator, StepValidator, ValidationOutcome};
