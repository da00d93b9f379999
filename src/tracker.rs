//! Tracked asynchronous operations.
//!
//! Wraps an operation in a timeout race and keeps structured
//! start/finish records for a bounded observation window. This is a
//! cross-cutting diagnostic aid used around validation and save calls,
//! not a control-flow primitive.

use std::future::Future;
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::time::Instant;
use uuid::Uuid;

use crate::config::TrackerConfig;
use crate::error::TrackError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackStatus {
    Pending,
    Resolved,
    Rejected,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Info,
    Warning,
    Critical,
}

/// One tracked operation. Created on start, mutated exactly once on
/// completion, retained for the configured window then pruned.
#[derive(Debug, Clone)]
pub struct TrackRecord {
    pub id: Uuid,
    pub name: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub status: TrackStatus,
    pub severity: Severity,
    pub recoverable: bool,
    pub error: Option<String>,
    finished_instant: Option<Instant>,
}

impl TrackRecord {
    pub fn duration(&self) -> Option<chrono::Duration> {
        self.finished_at.map(|end| end - self.started_at)
    }
}

/// Options for a tracked operation. The fallback makes a
/// non-critical failure resolve with a stand-in value instead of
/// propagating.
pub struct TrackOptions<T> {
    pub timeout: Option<Duration>,
    pub critical: bool,
    pub severity: Severity,
    pub fallback: Option<T>,
}

impl<T> Default for TrackOptions<T> {
    fn default() -> Self {
        Self {
            timeout: None,
            critical: false,
            severity: Severity::Info,
            fallback: None,
        }
    }
}

impl<T> TrackOptions<T> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn critical(mut self) -> Self {
        self.critical = true;
        self.severity = Severity::Critical;
        self
    }

    pub fn severity(mut self, severity: Severity) -> Self {
        self.severity = severity;
        self
    }

    pub fn fallback(mut self, value: T) -> Self {
        self.fallback = Some(value);
        self
    }
}

/// Races operations against a timeout and records the outcome.
pub struct OperationTracker {
    config: TrackerConfig,
    records: Mutex<Vec<TrackRecord>>,
}

impl OperationTracker {
    pub fn new(config: TrackerConfig) -> Self {
        Self {
            config,
            records: Mutex::new(Vec::new()),
        }
    }

    /// Run `operation` under the tracker. On success, the operation's
    /// value. On timeout or error: the fallback if one was supplied
    /// and the operation is not critical, otherwise the error.
    pub async fn track<T, F>(
        &self,
        name: &str,
        opts: TrackOptions<T>,
        operation: F,
    ) -> Result<T, TrackError>
    where
        F: Future<Output = anyhow::Result<T>>,
    {
        self.prune_expired();

        let TrackOptions {
            timeout,
            critical,
            severity,
            fallback,
        } = opts;
        let recoverable = !critical && fallback.is_some();
        let id = self.open_record(name, severity, recoverable);
        let timeout = timeout.unwrap_or_else(|| self.config.default_timeout());

        match tokio::time::timeout(timeout, operation).await {
            Ok(Ok(value)) => {
                self.close_record(id, TrackStatus::Resolved, None);
                Ok(value)
            }
            Ok(Err(e)) => {
                self.close_record(id, TrackStatus::Rejected, Some(e.to_string()));
                if !critical {
                    if let Some(fallback) = fallback {
                        tracing::debug!(operation = name, error = %e, "Tracked operation failed, using fallback");
                        return Ok(fallback);
                    }
                }
                Err(TrackError::Failed {
                    name: name.to_string(),
                    source: e,
                })
            }
            Err(_) => {
                self.close_record(id, TrackStatus::Rejected, Some("timed out".to_string()));
                tracing::warn!(operation = name, ?timeout, "Tracked operation timed out");
                if !critical {
                    if let Some(fallback) = fallback {
                        return Ok(fallback);
                    }
                }
                Err(TrackError::TimedOut {
                    name: name.to_string(),
                    timeout,
                })
            }
        }
    }

    /// Read-only view of the record table for diagnostics.
    pub fn snapshot(&self) -> Vec<TrackRecord> {
        self.lock_records().clone()
    }

    pub fn pending_count(&self) -> usize {
        self.lock_records()
            .iter()
            .filter(|r| r.status == TrackStatus::Pending)
            .count()
    }

    fn open_record(&self, name: &str, severity: Severity, recoverable: bool) -> Uuid {
        let id = Uuid::new_v4();
        self.lock_records().push(TrackRecord {
            id,
            name: name.to_string(),
            started_at: Utc::now(),
            finished_at: None,
            status: TrackStatus::Pending,
            severity,
            recoverable,
            error: None,
            finished_instant: None,
        });
        id
    }

    fn close_record(&self, id: Uuid, status: TrackStatus, error: Option<String>) {
        if let Some(record) = self.lock_records().iter_mut().find(|r| r.id == id) {
            record.status = status;
            record.finished_at = Some(Utc::now());
            record.finished_instant = Some(Instant::now());
            record.error = error;
        }
    }

    /// Drop completed records older than the retention window so the
    /// table stays bounded over a long session.
    fn prune_expired(&self) {
        let retention = self.config.retention();
        let now = Instant::now();
        self.lock_records().retain(|r| match r.finished_instant {
            Some(finished) => now.duration_since(finished) < retention,
            None => true,
        });
    }

    fn lock_records(&self) -> std::sync::MutexGuard<'_, Vec<TrackRecord>> {
        self.records.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
