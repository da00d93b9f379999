//! Watchdog recovery for the navigation lock.
//!
//! Two independent lines of defense keep a hung navigation attempt
//! from wedging the flow: a per-lock timer armed on acquisition, and a
//! periodic sweep that checks lock age in case the timer's owner was
//! torn down before it could fire.

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use chrono::Utc;
use tokio::task::JoinHandle;
use uuid::Uuid;

use super::SharedNavState;
use crate::config::NavigationConfig;
use crate::notifications::{FlowEvent, NotificationService};

pub struct LockWatchdog {
    state: SharedNavState,
    events: Arc<NotificationService>,
    config: NavigationConfig,
    timer: Mutex<Option<JoinHandle<()>>>,
    sweep: Mutex<Option<JoinHandle<()>>>,
}

impl LockWatchdog {
    pub fn new(
        state: SharedNavState,
        events: Arc<NotificationService>,
        config: NavigationConfig,
    ) -> Self {
        Self {
            state,
            events,
            config,
            timer: Mutex::new(None),
            sweep: Mutex::new(None),
        }
    }

    /// Arm the per-lock timer for a fresh acquisition. Any previous
    /// timer is cancelled first.
    pub fn arm(&self, request_id: Uuid) {
        let state = self.state.clone();
        let events = self.events.clone();
        let timeout = self.config.lock_timeout();

        let handle = tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            if force_release(&state, &events, Some(request_id), None) {
                tracing::warn!(%request_id, ?timeout, "Navigation watchdog fired, lock force-released");
            }
        });

        let mut slot = self.timer.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(old) = slot.replace(handle) {
            old.abort();
        }
    }

    /// Cancel the per-lock timer on normal release.
    pub fn disarm(&self) {
        if let Some(handle) = self
            .timer
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            handle.abort();
        }
    }

    /// Make sure the periodic sweep is running. Called from async
    /// context so the task lands on the host's runtime.
    pub fn ensure_sweep(&self) {
        let mut slot = self.sweep.lock().unwrap_or_else(PoisonError::into_inner);
        if slot.as_ref().is_some_and(|h| !h.is_finished()) {
            return;
        }

        let state = self.state.clone();
        let events = self.events.clone();
        let timeout = self.config.lock_timeout();
        let interval = self.config.sweep_interval();

        *slot = Some(tokio::spawn(async move {
            let start = tokio::time::Instant::now() + interval;
            let mut ticker = tokio::time::interval_at(start, interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                sweep_once(&state, &events, timeout);
            }
        }));
    }

    /// Cancel both tasks. Safe to call repeatedly.
    pub fn shutdown(&self) {
        self.disarm();
        if let Some(handle) = self
            .sweep
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            handle.abort();
        }
    }
}

impl Drop for LockWatchdog {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Release the lock if it is still held (by `expected`, when given;
/// only past `min_age`, when given). Checked and taken under a single
/// lock acquisition. Reports whether a stale lock was discarded.
fn force_release(
    state: &SharedNavState,
    events: &NotificationService,
    expected: Option<Uuid>,
    min_age: Option<Duration>,
) -> bool {
    let stale = {
        let mut st = state.lock().unwrap_or_else(PoisonError::into_inner);

        if let Some(request_id) = expected {
            // A newer request may hold the lock by now; leave it alone
            if !st.holds_lock(request_id) {
                return false;
            }
        }
        if let Some(age) = min_age {
            if !st.lock_expired(age) {
                return false;
            }
        }

        st.force_release_lock()
    };

    let Some(stale) = stale else {
        return false;
    };

    let held_secs = Utc::now()
        .signed_duration_since(stale.acquired_at)
        .num_seconds()
        .max(0) as u64;
    events.notify(&FlowEvent::NavigationTimedOut {
        request_id: stale.request_id,
        held_secs,
    });
    true
}

/// One sweep pass: discard the lock only when it has outlived the
/// configured timeout.
fn sweep_once(state: &SharedNavState, events: &NotificationService, timeout: Duration) {
    if force_release(state, events, None, Some(timeout)) {
        tracing::warn!(?timeout, "Sweep found an expired navigation lock, force-released");
    }
}
