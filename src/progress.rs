//! Progress persistence indirection.
//!
//! The concrete save implementation is usually built from values (like
//! the total step count) that are only known after the controller is
//! constructed, so the persister holds a one-slot replaceable
//! reference instead of a captured closure. Every save call reads the
//! slot at call time, so a replacement is visible to all holders
//! without re-wiring.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};

use async_trait::async_trait;

use crate::notifications::{FlowEvent, NotificationService};

/// The injected persistence capability: persist the current form
/// state, reporting whether the write landed.
#[async_trait]
pub trait ProgressSaver: Send + Sync {
    async fn save(&self) -> anyhow::Result<bool>;
}

/// Holds the replaceable saver and the autosave pause count.
///
/// Persistence failure is never allowed to trap the user on a step:
/// failures are logged, surfaced as a non-blocking warning event, and
/// reported to the caller as `false` so navigation can proceed anyway.
pub struct ProgressPersister {
    saver: RwLock<Option<Arc<dyn ProgressSaver>>>,
    pause_depth: AtomicUsize,
    events: Arc<NotificationService>,
}

impl ProgressPersister {
    pub fn new(events: Arc<NotificationService>) -> Self {
        Self {
            saver: RwLock::new(None),
            pause_depth: AtomicUsize::new(0),
            events,
        }
    }

    pub fn with_saver(events: Arc<NotificationService>, saver: Arc<dyn ProgressSaver>) -> Self {
        let persister = Self::new(events);
        persister.update_saver(saver);
        persister
    }

    /// Replace the save implementation. In-flight calls keep whatever
    /// reference they already cloned out of the slot.
    pub fn update_saver(&self, saver: Arc<dyn ProgressSaver>) {
        *self
            .saver
            .write()
            .unwrap_or_else(PoisonError::into_inner) = Some(saver);
    }

    pub fn has_saver(&self) -> bool {
        self.saver
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }

    /// Pause autosave. Reference-counted: every pause must be matched
    /// by a resume before saves run again.
    pub fn pause_autosave(&self) -> usize {
        let depth = self.pause_depth.fetch_add(1, Ordering::SeqCst) + 1;
        tracing::debug!(depth, "Autosave paused");
        depth
    }

    /// Resume autosave. Saturates at zero so an unmatched resume
    /// cannot wrap the counter.
    pub fn resume_autosave(&self) -> usize {
        let prev = self
            .pause_depth
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |d| d.checked_sub(1))
            .unwrap_or(0);
        let depth = prev.saturating_sub(1);
        tracing::debug!(depth, "Autosave resumed");
        depth
    }

    pub fn is_paused(&self) -> bool {
        self.pause_depth.load(Ordering::SeqCst) > 0
    }

    /// Persist now. Returns `true` when the save landed (or was
    /// intentionally skipped while paused), `false` on any failure.
    pub async fn save_current_progress(&self) -> bool {
        if self.is_paused() {
            tracing::debug!("Autosave paused, skipping save");
            return true;
        }

        let saver = self
            .saver
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();

        let Some(saver) = saver else {
            tracing::warn!("No save function bound yet, skipping save");
            self.events.notify(&FlowEvent::ProgressSaveFailed {
                reason: "save function not bound".to_string(),
            });
            return false;
        };

        match saver.save().await {
            Ok(true) => true,
            Ok(false) => {
                tracing::warn!("Progress save reported failure");
                self.events.notify(&FlowEvent::ProgressSaveFailed {
                    reason: "save reported failure".to_string(),
                });
                false
            }
            Err(e) => {
                tracing::warn!(error = %e, "Progress save errored");
                self.events.notify(&FlowEvent::ProgressSaveFailed {
                    reason: e.to_string(),
                });
                false
            }
        }
    }
}

/// How the mock saver behaves on each call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MockSaveMode {
    Succeed,
    Reject,
    Error,
    /// Never resolves; for exercising the watchdog
    Hang,
}

/// Mock implementation for testing
pub struct MockProgressSaver {
    mode: Mutex<MockSaveMode>,
    pub calls: AtomicUsize,
}

impl MockProgressSaver {
    pub fn new(mode: MockSaveMode) -> Self {
        Self {
            mode: Mutex::new(mode),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn set_mode(&self, mode: MockSaveMode) {
        *self.mode.lock().unwrap_or_else(PoisonError::into_inner) = mode;
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ProgressSaver for MockProgressSaver {
    async fn save(&self) -> anyhow::Result<bool> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let mode = *self.mode.lock().unwrap_or_else(PoisonError::into_inner);
        match mode {
            MockSaveMode::Succeed => Ok(true),
            MockSaveMode::Reject => Ok(false),
            MockSaveMode::Error => anyhow::bail!("persistence unavailable"),
            MockSaveMode::Hang => {
                std::future::pending::<()>().await;
                unreachable!()
            }
        }
    }
}
