//! Step navigation: the lock-guarded transition state machine and its
//! watchdog recovery.

mod controller;
mod watchdog;

pub use controller::NavigationController;
pub use watchdog::LockWatchdog;

use std::sync::{Arc, Mutex};

use crate::state::NavigationState;

/// The navigation subsystem's single shared mutable resource. Only
/// ever mutated through the controller (and the watchdog's forced
/// release); the guard is never held across an await point.
pub(crate) type SharedNavState = Arc<Mutex<NavigationState>>;
