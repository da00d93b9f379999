//! Upload lifecycle: pending-file queue, autosave coordination,
//! bounded retry, and submission-time finalization.

mod manager;
mod photo;
mod retry;

pub use manager::{PendingFile, UploadLifecycleManager, UploadProgress};
pub use photo::{FileHandle, PhotoFile, PhotoSet, PreviewRef, PreviewRegistry};
pub use retry::RetryPolicy;

use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// What kind of asset a file is uploaded as. The storage backend may
/// route categories to different buckets or processing pipelines.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UploadCategory {
    Photo,
    Document,
}

/// The injected storage capability. Uploading without a parent id is
/// allowed (the file lands unassociated); `associate` later binds such
/// a reference to its parent record.
#[async_trait]
pub trait Uploader: Send + Sync {
    async fn upload(
        &self,
        file: &FileHandle,
        parent_id: Option<&str>,
        category: UploadCategory,
    ) -> anyhow::Result<String>;

    async fn associate(&self, remote_ref: &str, parent_id: &str) -> anyhow::Result<()>;
}

/// Mock implementation for testing
#[derive(Default)]
pub struct MockUploader {
    /// File name -> number of times its upload should fail before
    /// succeeding. `u32::MAX` fails forever.
    failures: Mutex<HashMap<String, u32>>,
    /// (file name, parent id, category) per upload call
    pub upload_calls: Mutex<Vec<(String, Option<String>, UploadCategory)>>,
    /// (remote ref, parent id) per associate call
    pub associate_calls: Mutex<Vec<(String, String)>>,
}

impl MockUploader {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the named file fail `times` attempts before succeeding.
    pub fn fail_times(&self, file_name: &str, times: u32) {
        self.failures
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(file_name.to_string(), times);
    }

    /// Make the named file fail every attempt.
    pub fn always_fail(&self, file_name: &str) {
        self.fail_times(file_name, u32::MAX);
    }

    pub fn upload_call_count(&self) -> usize {
        self.upload_calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn associate_call_count(&self) -> usize {
        self.associate_calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

#[async_trait]
impl Uploader for MockUploader {
    async fn upload(
        &self,
        file: &FileHandle,
        parent_id: Option<&str>,
        category: UploadCategory,
    ) -> anyhow::Result<String> {
        self.upload_calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push((file.name.clone(), parent_id.map(ToString::to_string), category));

        let mut failures = self.failures.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(remaining) = failures.get_mut(&file.name) {
            if *remaining > 0 {
                if *remaining != u32::MAX {
                    *remaining -= 1;
                }
                anyhow::bail!("storage rejected '{}'", file.name);
            }
        }
        drop(failures);

        let parent = parent_id.unwrap_or("unassigned");
        Ok(format!("https://storage.example/{parent}/{}", file.name))
    }

    async fn associate(&self, remote_ref: &str, parent_id: &str) -> anyhow::Result<()> {
        self.associate_calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push((remote_ref.to_string(), parent_id.to_string()));
        Ok(())
    }
}
