use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Utc};
use futures_util::future::join_all;
use serde::{Deserialize, Serialize};
use tokio::sync::Semaphore;
use tokio::time::Instant;

use super::photo::{FileHandle, PhotoSet};
use super::retry::RetryPolicy;
use super::{UploadCategory, Uploader};
use crate::config::UploadsConfig;
use crate::error::UploadError;
use crate::notifications::{FlowEvent, NotificationService};
use crate::progress::ProgressPersister;

/// A locally selected file waiting for submission-time upload.
#[derive(Debug, Clone)]
pub struct PendingFile {
    pub file: FileHandle,
    pub category: UploadCategory,
    pub queued_at: DateTime<Utc>,
}

/// Read-only upload progress handed to the host layer (e.g. to gate a
/// submit button).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadProgress {
    pub active: usize,
    pub pending: usize,
    pub complete: bool,
}

/// Coordinates the whole upload lifecycle: the pending-file queue,
/// pausing autosave while transfers are in flight, bounded retry per
/// file, and finalization once the parent record's identifier exists.
///
/// Explicitly constructed and handed to whatever submit-time code
/// needs it; there is no ambient global instance.
pub struct UploadLifecycleManager {
    uploader: Arc<dyn Uploader>,
    persister: Arc<ProgressPersister>,
    events: Arc<NotificationService>,
    config: UploadsConfig,
    pending: Mutex<Vec<PendingFile>>,
    /// Remote refs uploaded before the parent record existed
    unassociated: Mutex<Vec<String>>,
    photos: Mutex<PhotoSet>,
    active: AtomicUsize,
    last_activity: Mutex<Option<Instant>>,
    fan_out: Arc<Semaphore>,
}

impl UploadLifecycleManager {
    pub fn new(
        uploader: Arc<dyn Uploader>,
        persister: Arc<ProgressPersister>,
        events: Arc<NotificationService>,
        config: UploadsConfig,
    ) -> Self {
        let fan_out = Arc::new(Semaphore::new(config.max_concurrent.max(1)));
        Self {
            uploader,
            persister,
            events,
            config,
            pending: Mutex::new(Vec::new()),
            unassociated: Mutex::new(Vec::new()),
            photos: Mutex::new(PhotoSet::new()),
            active: AtomicUsize::new(0),
            last_activity: Mutex::new(None),
            fan_out,
        }
    }

    /// Queue a file for deferred upload at finalization time. Does not
    /// transfer anything yet.
    pub fn register_pending_file(&self, file: FileHandle, category: UploadCategory) {
        tracing::debug!(file = %file.name, ?category, "File queued for upload");
        self.lock_pending().push(PendingFile {
            file,
            category,
            queued_at: Utc::now(),
        });
        self.touch_activity();
    }

    pub fn pending_count(&self) -> usize {
        self.lock_pending().len()
    }

    /// Queue every photo that has not been uploaded yet.
    pub fn queue_unuploaded_photos(&self) {
        let files: Vec<FileHandle> = self
            .lock_photos()
            .files_awaiting_upload()
            .into_iter()
            .cloned()
            .collect();
        for file in files {
            self.register_pending_file(file, UploadCategory::Photo);
        }
    }

    /// Open an upload burst. The first concurrent burst pauses
    /// autosave so a save cannot capture a record referencing files
    /// mid-transfer.
    pub fn start_upload(&self) {
        let prev = self.active.fetch_add(1, Ordering::SeqCst);
        if prev == 0 {
            self.persister.pause_autosave();
        }
        self.touch_activity();
        tracing::debug!(active = prev + 1, "Upload burst started");
    }

    /// Close an upload burst. Autosave resumes only when the last
    /// overlapping burst finishes.
    pub fn finish_upload(&self, success: bool, error: Option<&str>) {
        let prev = self
            .active
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .unwrap_or(0);
        if prev == 1 {
            self.persister.resume_autosave();
        }
        self.touch_activity();
        if success {
            tracing::debug!(active = prev.saturating_sub(1), "Upload burst finished");
        } else {
            tracing::warn!(
                error = error.unwrap_or("unknown"),
                "Upload burst finished with failure"
            );
        }
    }

    pub fn active_uploads(&self) -> usize {
        self.active.load(Ordering::SeqCst)
    }

    /// Immediate-mode upload with bounded retry. Without a parent id
    /// the file lands unassociated and is reconciled at finalization.
    pub async fn upload_direct(
        &self,
        file: &FileHandle,
        parent_id: Option<&str>,
        category: UploadCategory,
    ) -> Result<String, UploadError> {
        self.start_upload();
        let result = self.upload_with_retry(file, parent_id, category).await;
        match &result {
            Ok(remote_ref) => {
                if parent_id.is_none() {
                    self.lock_unassociated().push(remote_ref.clone());
                }
                self.finish_upload(true, None);
            }
            Err(e) => {
                let message = e.to_string();
                self.finish_upload(false, Some(&message));
            }
        }
        result
    }

    /// Upload or reconcile everything pending, now that the parent
    /// record's identifier is known. A missing id is a hard failure
    /// for this call: nothing is attempted, the result is empty, and
    /// the identifier is never guessed.
    pub async fn finalize_uploads(&self, parent_id: Option<&str>) -> Vec<String> {
        let Some(parent_id) = parent_id else {
            tracing::warn!("Finalize called without a parent record id, refusing to upload");
            return Vec::new();
        };

        let batch: Vec<PendingFile> = self.lock_pending().drain(..).collect();

        if batch.is_empty() {
            return self.reconcile_unassociated(parent_id).await;
        }

        tracing::info!(parent_id, files = batch.len(), "Finalizing pending uploads");
        self.start_upload();

        let results = join_all(batch.iter().map(|pf| {
            let semaphore = self.fan_out.clone();
            async move {
                let _permit = semaphore.acquire_owned().await.ok()?;
                self.upload_with_retry(&pf.file, Some(parent_id), pf.category)
                    .await
                    .ok()
            }
        }))
        .await;

        self.finish_upload(true, None);

        // Per-file failures were reported on their own; the batch
        // aggregates whichever files made it.
        let uploaded: Vec<String> = results.into_iter().flatten().collect();
        self.events.notify(&FlowEvent::UploadsFinalized {
            parent_id: parent_id.to_string(),
            uploaded: uploaded.len(),
        });
        uploaded
    }

    /// Bind previously-uploaded-but-unassociated files to the parent.
    async fn reconcile_unassociated(&self, parent_id: &str) -> Vec<String> {
        let refs: Vec<String> = self.lock_unassociated().drain(..).collect();
        if refs.is_empty() {
            tracing::debug!(parent_id, "Nothing pending and nothing to reconcile");
            return Vec::new();
        }

        let mut reconciled = Vec::new();
        for remote_ref in refs {
            match self.uploader.associate(&remote_ref, parent_id).await {
                Ok(()) => reconciled.push(remote_ref),
                Err(e) => {
                    tracing::warn!(remote_ref = %remote_ref, error = %e, "Failed to associate uploaded file");
                    // Keep it for a later finalization attempt
                    self.lock_unassociated().push(remote_ref);
                }
            }
        }

        self.events.notify(&FlowEvent::UploadsFinalized {
            parent_id: parent_id.to_string(),
            uploaded: reconciled.len(),
        });
        reconciled
    }

    async fn upload_with_retry(
        &self,
        file: &FileHandle,
        parent_id: Option<&str>,
        category: UploadCategory,
    ) -> Result<String, UploadError> {
        let mut policy = RetryPolicy::new(self.config.max_attempts);
        self.events.notify(&FlowEvent::UploadStarted {
            file: file.name.clone(),
        });
        let mut last_error = String::from("upload never attempted");

        while !policy.exhausted() {
            let attempt_id = policy.begin_attempt();
            let attempt = policy.attempts();
            self.touch_activity();
            tracing::debug!(file = %file.name, attempt, %attempt_id, "Uploading file");

            match self.uploader.upload(file, parent_id, category).await {
                Ok(remote_ref) => {
                    self.touch_activity();
                    tracing::info!(file = %file.name, attempt, "Upload completed");
                    self.events.notify(&FlowEvent::UploadCompleted {
                        file: file.name.clone(),
                        remote_ref: remote_ref.clone(),
                    });
                    return Ok(remote_ref);
                }
                Err(e) => {
                    last_error = e.to_string();
                    tracing::warn!(file = %file.name, attempt, error = %e, "Upload attempt failed");
                    if policy.exhausted() {
                        break;
                    }
                    self.events.notify(&FlowEvent::UploadRetried {
                        file: file.name.clone(),
                        attempt: attempt + 1,
                    });
                    tokio::time::sleep(self.config.backoff_delay(attempt)).await;
                }
            }
        }

        self.touch_activity();
        self.events.notify(&FlowEvent::UploadFailed {
            file: file.name.clone(),
            attempts: policy.attempts(),
            error: last_error.clone(),
        });
        Err(UploadError::attempts_exhausted(
            &file.name,
            policy.attempts(),
            last_error,
        ))
    }

    /// Whether every upload is done, with a trailing quiet window: the
    /// gap between a finished transfer and the next one in a batch
    /// must not read as completion.
    pub fn uploads_complete(&self) -> bool {
        if self.active.load(Ordering::SeqCst) > 0 {
            return false;
        }
        match *self
            .last_activity
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
        {
            None => true,
            Some(at) => at.elapsed() >= self.config.quiet_window(),
        }
    }

    pub fn progress(&self) -> UploadProgress {
        UploadProgress {
            active: self.active_uploads(),
            pending: self.pending_count(),
            complete: self.uploads_complete(),
        }
    }

    /// Mutate the photo slots under the manager's lock.
    pub fn with_photos<R>(&self, f: impl FnOnce(&mut PhotoSet) -> R) -> R {
        let mut photos = self.lock_photos();
        let result = f(&mut photos);
        drop(photos);
        self.touch_activity();
        result
    }

    pub fn live_preview_count(&self) -> usize {
        self.lock_photos().live_preview_count()
    }

    /// Release previews and rebalance autosave. Called on host
    /// teardown; also runs on drop.
    pub fn teardown(&self) {
        self.lock_photos().clear();
        let active = self.active.swap(0, Ordering::SeqCst);
        if active > 0 {
            tracing::warn!(active, "Teardown with uploads still active, resuming autosave");
            self.persister.resume_autosave();
        }
    }

    fn touch_activity(&self) {
        *self
            .last_activity
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(Instant::now());
    }

    fn lock_pending(&self) -> MutexGuard<'_, Vec<PendingFile>> {
        self.pending.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_unassociated(&self) -> MutexGuard<'_, Vec<String>> {
        self.unassociated
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_photos(&self) -> MutexGuard<'_, PhotoSet> {
        self.photos.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Drop for UploadLifecycleManager {
    fn drop(&mut self) {
        self.teardown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notifications::RecordingSink;
    use crate::uploads::MockUploader;
    use std::time::Duration;

    struct Harness {
        manager: UploadLifecycleManager,
        uploader: Arc<MockUploader>,
        persister: Arc<ProgressPersister>,
        sink: Arc<RecordingSink>,
    }

    fn harness() -> Harness {
        let sink = Arc::new(RecordingSink::new());
        let events = Arc::new(NotificationService::new().with_sink(sink.clone()));
        let uploader = Arc::new(MockUploader::new());
        let persister = Arc::new(ProgressPersister::new(events.clone()));
        let manager = UploadLifecycleManager::new(
            uploader.clone(),
            persister.clone(),
            events,
            UploadsConfig::default(),
        );
        Harness {
            manager,
            uploader,
            persister,
            sink,
        }
    }

    fn file(name: &str) -> FileHandle {
        FileHandle::new(name, "image/jpeg", 2048)
    }

    #[tokio::test]
    async fn test_register_does_not_upload() {
        let h = harness();
        h.manager
            .register_pending_file(file("front.jpg"), UploadCategory::Photo);
        assert_eq!(h.manager.pending_count(), 1);
        assert_eq!(h.uploader.upload_call_count(), 0);
    }

    #[tokio::test]
    async fn test_finalize_without_parent_id_is_empty_and_silent() {
        let h = harness();
        h.manager
            .register_pending_file(file("front.jpg"), UploadCategory::Photo);

        let uploaded = h.manager.finalize_uploads(None).await;
        assert!(uploaded.is_empty());
        assert_eq!(h.uploader.upload_call_count(), 0);
        // The queue is untouched for a later, properly-identified call
        assert_eq!(h.manager.pending_count(), 1);
    }

    #[tokio::test]
    async fn test_finalize_uploads_pending_batch() {
        let h = harness();
        h.manager
            .register_pending_file(file("front.jpg"), UploadCategory::Photo);
        h.manager
            .register_pending_file(file("title.pdf"), UploadCategory::Document);

        let uploaded = h.manager.finalize_uploads(Some("listing-42")).await;
        assert_eq!(uploaded.len(), 2);
        assert!(uploaded
            .iter()
            .all(|r| r.contains("listing-42")));
        assert_eq!(h.manager.pending_count(), 0);
        assert!(h.sink.contains(|e| matches!(
            e,
            FlowEvent::UploadsFinalized { parent_id, uploaded: 2 } if parent_id == "listing-42"
        )));
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_is_bounded_and_terminal() {
        let h = harness();
        h.uploader.always_fail("front.jpg");
        h.manager
            .register_pending_file(file("front.jpg"), UploadCategory::Photo);

        let uploaded = h.manager.finalize_uploads(Some("listing-42")).await;
        assert!(uploaded.is_empty());
        // Exactly the configured maximum, then terminal
        assert_eq!(h.uploader.upload_call_count(), 3);
        assert!(h.sink.contains(|e| matches!(
            e,
            FlowEvent::UploadFailed { attempts: 3, .. }
        )));
    }

    #[tokio::test(start_paused = true)]
    async fn test_transient_failure_recovers_within_budget() {
        let h = harness();
        h.uploader.fail_times("front.jpg", 2);
        h.manager
            .register_pending_file(file("front.jpg"), UploadCategory::Photo);

        let uploaded = h.manager.finalize_uploads(Some("listing-42")).await;
        assert_eq!(uploaded.len(), 1);
        assert_eq!(h.uploader.upload_call_count(), 3);
        assert!(h
            .sink
            .contains(|e| matches!(e, FlowEvent::UploadRetried { attempt: 2, .. })));
    }

    #[tokio::test(start_paused = true)]
    async fn test_per_file_failure_does_not_fail_batch() {
        let h = harness();
        h.uploader.always_fail("broken.jpg");
        h.manager
            .register_pending_file(file("broken.jpg"), UploadCategory::Photo);
        h.manager
            .register_pending_file(file("good.jpg"), UploadCategory::Photo);

        let uploaded = h.manager.finalize_uploads(Some("listing-42")).await;
        assert_eq!(uploaded.len(), 1);
        assert!(uploaded[0].contains("good.jpg"));
    }

    #[tokio::test]
    async fn test_pause_is_reference_counted_across_bursts() {
        let h = harness();

        h.manager.start_upload();
        h.manager.start_upload();
        assert!(h.persister.is_paused());

        h.manager.finish_upload(true, None);
        // One burst still open; autosave must stay paused
        assert!(h.persister.is_paused());

        h.manager.finish_upload(true, None);
        assert!(!h.persister.is_paused());

        // An unmatched finish must not re-trigger a resume imbalance
        h.manager.finish_upload(true, None);
        assert!(!h.persister.is_paused());
    }

    #[tokio::test(start_paused = true)]
    async fn test_completion_respects_quiet_window() {
        let h = harness();
        assert!(h.manager.uploads_complete());

        h.manager.start_upload();
        assert!(!h.manager.uploads_complete());

        h.manager.finish_upload(true, None);
        // Inside the trailing quiet window the gap is not trusted
        assert!(!h.manager.uploads_complete());

        tokio::time::advance(Duration::from_secs(3)).await;
        assert!(h.manager.uploads_complete());
    }

    #[tokio::test]
    async fn test_direct_upload_without_parent_reconciles_later() {
        let h = harness();
        let remote = h
            .manager
            .upload_direct(&file("front.jpg"), None, UploadCategory::Photo)
            .await
            .unwrap();
        assert!(remote.contains("unassigned"));
        assert!(!h.persister.is_paused());

        // Finalize with no pending files associates the earlier upload
        let reconciled = h.manager.finalize_uploads(Some("listing-42")).await;
        assert_eq!(reconciled, vec![remote.clone()]);
        assert_eq!(h.uploader.associate_call_count(), 1);

        // A second finalize has nothing left to do
        assert!(h.manager.finalize_uploads(Some("listing-42")).await.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_direct_upload_failure_reports_terminal_error() {
        let h = harness();
        h.uploader.always_fail("front.jpg");

        let err = h
            .manager
            .upload_direct(&file("front.jpg"), Some("listing-42"), UploadCategory::Photo)
            .await
            .unwrap_err();
        assert!(err.is_terminal());
        assert_eq!(h.manager.active_uploads(), 0);
        assert!(!h.persister.is_paused());
    }

    #[tokio::test]
    async fn test_queue_unuploaded_photos() {
        let h = harness();
        h.manager.with_photos(|photos| {
            photos.set_slot("front", file("front.jpg"));
            photos.set_slot("rear", file("rear.jpg"));
            photos.mark_slot_uploaded("rear", "https://storage.example/1/rear.jpg");
        });

        h.manager.queue_unuploaded_photos();
        assert_eq!(h.manager.pending_count(), 1);
    }

    #[tokio::test]
    async fn test_teardown_revokes_previews_and_rebalances_autosave() {
        let h = harness();
        h.manager.with_photos(|photos| {
            photos.set_slot("front", file("front.jpg"));
            photos.add_additional(file("extra.jpg"));
        });
        assert_eq!(h.manager.live_preview_count(), 2);

        h.manager.start_upload();
        assert!(h.persister.is_paused());

        h.manager.teardown();
        assert_eq!(h.manager.live_preview_count(), 0);
        assert!(!h.persister.is_paused());
        assert_eq!(h.manager.active_uploads(), 0);
    }
}
