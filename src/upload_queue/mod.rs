// Module declarations
mod hashing;
mod processor;
mod queue_manager;
mod types;
pub mod upload;

pub use hashing::calculate_content_key;
pub use processor::ImportProcessor;
pub use types::*;

use crate::error::Result;
use crate::events::{EventBus, EventReceiver, QueueEvent};
use indexmap::IndexMap;
use std::sync::{Arc, Mutex};

use queue_manager::Entries;

/// Canonical list of files selected for import, in display order
///
/// Cheap to clone; clones share the same queue.
#[derive(Clone)]
pub struct UploadQueueStore {
    entries: Entries,
    events: EventBus<QueueEvent>,
}

impl std::fmt::Debug for UploadQueueStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UploadQueueStore")
            .field("entries", &"<queued items>")
            .field("subscribers", &self.events.receiver_count())
            .finish()
    }
}

impl Default for UploadQueueStore {
    fn default() -> Self {
        Self::new()
    }
}

impl UploadQueueStore {
    pub fn new() -> Self {
        Self {
            entries: Arc::new(Mutex::new(IndexMap::new())),
            events: EventBus::new(QUEUE_EVENT_CAPACITY),
        }
    }

    /// Queue files, silently skipping any whose signature is already present
    pub fn admit(&self, files: Vec<QueuedFile>) -> Result<AdmitReport> {
        self.admit_with_policy(files, DuplicatePolicy::Skip)
    }

    pub fn admit_with_policy(
        &self,
        files: Vec<QueuedFile>,
        policy: DuplicatePolicy,
    ) -> Result<AdmitReport> {
        queue_manager::admit(&self.entries, &self.events, files, policy)
    }

    pub fn remove(&self, signature: &Signature) -> Result<bool> {
        queue_manager::remove(&self.entries, &self.events, signature)
    }

    pub fn update(&self, signature: &Signature, patch: ItemPatch) -> Result<bool> {
        queue_manager::update(&self.entries, &self.events, signature, patch)
    }

    /// Claim an item for upload; `None` if it is gone or already uploading
    pub fn begin_upload(
        &self,
        signature: &Signature,
    ) -> Result<Option<(UploadQueueItem, QueuedFile)>> {
        queue_manager::begin_upload(&self.entries, &self.events, signature)
    }

    pub fn rename(&self, id: &str, new_display_name: &str) -> Result<bool> {
        queue_manager::rename(&self.entries, &self.events, id, new_display_name)
    }

    /// Empty the queue
    pub fn clear(&self) -> Result<usize> {
        queue_manager::clear_where(&self.entries, &self.events, |_| true)
    }

    /// Drop completed items, keeping pending, in-flight and failed ones
    pub fn clear_finished(&self) -> Result<usize> {
        queue_manager::clear_where(&self.entries, &self.events, |item| {
            item.status == UploadStatus::Completed
        })
    }

    /// Snapshot of every item in insertion order
    pub fn items(&self) -> Result<Vec<UploadQueueItem>> {
        Ok(self
            .entries
            .lock()?
            .values()
            .map(|entry| entry.item.clone())
            .collect())
    }

    pub fn get(&self, signature: &Signature) -> Result<Option<UploadQueueItem>> {
        Ok(self
            .entries
            .lock()?
            .get(signature)
            .map(|entry| entry.item.clone()))
    }

    pub fn get_by_id(&self, id: &str) -> Result<Option<UploadQueueItem>> {
        Ok(self
            .entries
            .lock()?
            .values()
            .find(|entry| entry.item.id == id)
            .map(|entry| entry.item.clone()))
    }

    /// Borrow the owned file for an upload; the queue keeps ownership
    pub fn file(&self, signature: &Signature) -> Result<Option<QueuedFile>> {
        Ok(self
            .entries
            .lock()?
            .get(signature)
            .map(|entry| entry.file.clone()))
    }

    pub fn len(&self) -> usize {
        self.entries.lock().map(|queue| queue.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn counts(&self) -> Result<QueueCounts> {
        queue_manager::counts(&self.entries)
    }

    pub fn subscribe(&self) -> EventReceiver<QueueEvent> {
        self.events.subscribe()
    }
}
