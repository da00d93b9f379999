//! Photo slots and preview-reference ownership.
//!
//! Every selected photo gets a locally generated preview reference.
//! Previews hold a real resource on the host side, so the reference
//! must be revoked when the slot's file is replaced or removed, and on
//! teardown.

use std::collections::{HashMap, HashSet};
use std::sync::{Mutex, PoisonError};

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Opaque handle to a locally selected file. The bytes stay with the
/// host; the core only needs identity and display metadata.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileHandle {
    pub id: Uuid,
    pub name: String,
    pub content_type: String,
    pub size_bytes: u64,
}

impl FileHandle {
    pub fn new(name: impl Into<String>, content_type: impl Into<String>, size_bytes: u64) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            content_type: content_type.into(),
            size_bytes,
        }
    }
}

/// A live preview reference. Only the registry that issued it can
/// revoke it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PreviewRef {
    id: Uuid,
}

impl PreviewRef {
    pub fn id(&self) -> Uuid {
        self.id
    }
}

/// Issues and revokes preview references, tracking which are live so
/// teardown can prove nothing leaked.
#[derive(Debug, Default)]
pub struct PreviewRegistry {
    live: Mutex<HashSet<Uuid>>,
}

impl PreviewRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn create(&self) -> PreviewRef {
        let id = Uuid::new_v4();
        self.lock_live().insert(id);
        PreviewRef { id }
    }

    /// Revoke one reference. Idempotent.
    pub fn revoke(&self, preview: &PreviewRef) -> bool {
        let released = self.lock_live().remove(&preview.id);
        if released {
            tracing::trace!(preview = %preview.id, "Preview reference revoked");
        }
        released
    }

    /// Revoke everything still live; returns how many were released.
    pub fn revoke_all(&self) -> usize {
        let mut live = self.lock_live();
        let count = live.len();
        live.clear();
        count
    }

    pub fn live_count(&self) -> usize {
        self.lock_live().len()
    }

    fn lock_live(&self) -> std::sync::MutexGuard<'_, HashSet<Uuid>> {
        self.live.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// One photo occupying a required slot or the additional collection.
#[derive(Debug)]
pub struct PhotoFile {
    pub file: FileHandle,
    pub preview: PreviewRef,
    pub uploaded: bool,
    pub remote_ref: Option<String>,
}

/// The required-photo slots plus the unordered additional collection,
/// with preview ownership handled on every mutation.
#[derive(Debug, Default)]
pub struct PhotoSet {
    registry: PreviewRegistry,
    slots: HashMap<String, PhotoFile>,
    additional: Vec<PhotoFile>,
}

impl PhotoSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Put a file in a required slot, releasing the previous
    /// occupant's preview if the slot was already filled.
    pub fn set_slot(&mut self, slot: &str, file: FileHandle) {
        let photo = PhotoFile {
            file,
            preview: self.registry.create(),
            uploaded: false,
            remote_ref: None,
        };
        if let Some(replaced) = self.slots.insert(slot.to_string(), photo) {
            self.registry.revoke(&replaced.preview);
        }
    }

    /// Empty a required slot, releasing its preview.
    pub fn clear_slot(&mut self, slot: &str) -> Option<FileHandle> {
        let removed = self.slots.remove(slot)?;
        self.registry.revoke(&removed.preview);
        Some(removed.file)
    }

    pub fn slot(&self, slot: &str) -> Option<&PhotoFile> {
        self.slots.get(slot)
    }

    pub fn add_additional(&mut self, file: FileHandle) {
        self.additional.push(PhotoFile {
            file,
            preview: self.registry.create(),
            uploaded: false,
            remote_ref: None,
        });
    }

    /// Remove an additional photo by file id, releasing its preview.
    pub fn remove_additional(&mut self, file_id: Uuid) -> Option<FileHandle> {
        let index = self.additional.iter().position(|p| p.file.id == file_id)?;
        let removed = self.additional.remove(index);
        self.registry.revoke(&removed.preview);
        Some(removed.file)
    }

    pub fn additional(&self) -> &[PhotoFile] {
        &self.additional
    }

    /// Flag a slot's photo as uploaded with its remote reference.
    pub fn mark_slot_uploaded(&mut self, slot: &str, remote_ref: impl Into<String>) -> bool {
        match self.slots.get_mut(slot) {
            Some(photo) => {
                photo.uploaded = true;
                photo.remote_ref = Some(remote_ref.into());
                true
            }
            None => false,
        }
    }

    /// Files not yet uploaded, across slots and the additional set.
    pub fn files_awaiting_upload(&self) -> Vec<&FileHandle> {
        self.slots
            .values()
            .chain(self.additional.iter())
            .filter(|p| !p.uploaded)
            .map(|p| &p.file)
            .collect()
    }

    pub fn live_preview_count(&self) -> usize {
        self.registry.live_count()
    }

    /// Release every preview and drop all photos. Used on teardown.
    pub fn clear(&mut self) {
        self.slots.clear();
        self.additional.clear();
        let released = self.registry.revoke_all();
        if released > 0 {
            tracing::debug!(released, "Released photo previews on teardown");
        }
    }
}

impl Drop for PhotoSet {
    fn drop(&mut self) {
        // A panicking host must still not leak preview resources
        self.clear();
    }
}
