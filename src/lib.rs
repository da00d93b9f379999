//! formflow - step-navigation and upload orchestration for multi-step
//! submission flows.
//!
//! The core of a multi-step form lives here: the lock-guarded step
//! state machine with watchdog recovery, the late-bound progress
//! persister, the tracked-operation timeout race, and the upload
//! lifecycle with bounded retry and submission-time finalization.
//! Field validation schemas, step rendering, real persistence calls,
//! and real byte transfer are injected collaborators.

pub mod config;
pub mod error;
pub mod logging;
pub mod navigation;
pub mod notifications;
pub mod progress;
pub mod state;
pub mod steps;
pub mod tracker;
pub mod uploads;

pub use config::FlowConfig;
pub use error::{NavigationError, TrackError, UploadError};
pub use navigation::NavigationController;
pub use notifications::{FlowEvent, NotificationService, NotificationSink};
pub use progress::{ProgressPersister, ProgressSaver};
pub use state::{NavigationSnapshot, NavigationState};
pub use steps::{FieldValidator, StepDescriptor, StepFieldMap, StepValidator};
pub use tracker::{OperationTracker, TrackOptions};
pub use uploads::{FileHandle, UploadCategory, UploadLifecycleManager, Uploader};
