//! Type definitions for the upload queue.
//!
//! Defines the queued file, its dedup signature, the per-item state machine
//! and the import result payload.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use std::sync::Arc;

use crate::error::{Result, SyncError};

// Capacity of the queue event bus (slow subscribers see `Lagged` past this)
pub const QUEUE_EVENT_CAPACITY: usize = 256;

/// Dedup key: `"{name}-{size}-{last_modified}"`
///
/// Independent of the display name, so renaming never changes identity.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Signature(String);

impl Signature {
    pub fn of(name: &str, size: u64, last_modified: i64) -> Self {
        Signature(format!("{}-{}-{}", name, size, last_modified))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A file selected for import; the queue entry owns it until removal
#[derive(Debug, Clone)]
pub struct QueuedFile {
    pub name: String,
    pub size: u64,
    pub mime_type: String,
    /// Milliseconds since the Unix epoch
    pub last_modified: i64,
    body: Arc<[u8]>,
}

impl QueuedFile {
    pub fn new(
        name: impl Into<String>,
        mime_type: impl Into<String>,
        last_modified: i64,
        bytes: Vec<u8>,
    ) -> Self {
        Self {
            name: name.into(),
            size: bytes.len() as u64,
            mime_type: mime_type.into(),
            last_modified,
            body: Arc::from(bytes),
        }
    }

    pub fn from_path(path: &Path) -> Result<Self> {
        let name = path
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| {
                SyncError::Validation(format!("Invalid file name: {}", path.display()))
            })?
            .to_string();

        let metadata = std::fs::metadata(path)?;
        let last_modified = metadata
            .modified()
            .ok()
            .map(|t| DateTime::<Utc>::from(t).timestamp_millis())
            .unwrap_or(0);

        let bytes = std::fs::read(path)?;
        let mime_type = guess_mime_type(&name).to_string();

        Ok(Self::new(name, mime_type, last_modified, bytes))
    }

    pub fn signature(&self) -> Signature {
        Signature::of(&self.name, self.size, self.last_modified)
    }

    /// Cheap handle to the bytes for an in-flight upload
    pub fn body(&self) -> Arc<[u8]> {
        Arc::clone(&self.body)
    }
}

pub fn guess_mime_type(file_name: &str) -> &'static str {
    let extension = file_name
        .rsplit_once('.')
        .map(|(_, ext)| ext.to_ascii_lowercase())
        .unwrap_or_default();

    match extension.as_str() {
        "csv" => "text/csv",
        "xlsx" => "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet",
        "xls" => "application/vnd.ms-excel",
        "json" => "application/json",
        _ => "application/octet-stream",
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UploadStatus {
    Pending,
    Uploading,
    Completed,
    Error,
}

impl UploadStatus {
    /// Allowed moves: pending -> {pending, uploading}, uploading -> {completed, error},
    /// error -> uploading (retry). Completed only leaves the queue by removal.
    pub fn can_transition_to(self, next: UploadStatus) -> bool {
        use UploadStatus::*;
        matches!(
            (self, next),
            (Pending, Pending)
                | (Pending, Uploading)
                | (Uploading, Completed)
                | (Uploading, Error)
                | (Error, Uploading)
        )
    }

    pub fn is_finished(self) -> bool {
        matches!(self, UploadStatus::Completed | UploadStatus::Error)
    }
}

impl fmt::Display for UploadStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            UploadStatus::Pending => "pending",
            UploadStatus::Uploading => "uploading",
            UploadStatus::Completed => "completed",
            UploadStatus::Error => "error",
        };
        f.write_str(s)
    }
}

/// Server-side import result attached when an item finishes
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportMeta {
    pub imported_count: u64,
    pub error_count: u64,
    #[serde(default)]
    pub error_details: Vec<String>,
}

/// How a completed import actually went; `Completed` alone says nothing about success
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ImportOutcome {
    Imported,
    Partial,
    NothingImported,
    /// No rows imported and no row errors
    Empty,
}

impl ImportMeta {
    pub fn outcome(&self) -> ImportOutcome {
        match (self.imported_count, self.error_count) {
            (0, 0) => ImportOutcome::Empty,
            (0, _) => ImportOutcome::NothingImported,
            (_, 0) => ImportOutcome::Imported,
            _ => ImportOutcome::Partial,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadQueueItem {
    pub id: String,
    pub signature: Signature,
    pub display_name: String,
    pub file_name: String,
    pub size: u64,
    pub mime_type: String,
    pub last_modified: i64,
    /// SHA256 of the file bytes
    pub content_key: String,
    pub status: UploadStatus,
    /// 0-100, advisory
    pub progress: u8,
    pub error: Option<String>,
    pub meta: Option<ImportMeta>,
    pub queued_at: DateTime<Utc>,
}

impl UploadQueueItem {
    pub(crate) fn admit(file: &QueuedFile, content_key: String) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            signature: file.signature(),
            display_name: file.name.clone(),
            file_name: file.name.clone(),
            size: file.size,
            mime_type: file.mime_type.clone(),
            last_modified: file.last_modified,
            content_key,
            status: UploadStatus::Pending,
            progress: 0,
            error: None,
            meta: None,
            queued_at: Utc::now(),
        }
    }

    /// Outcome of a completed item; `None` until the import finished with a result
    pub fn outcome(&self) -> Option<ImportOutcome> {
        match self.status {
            UploadStatus::Completed => self.meta.as_ref().map(ImportMeta::outcome),
            _ => None,
        }
    }
}

/// Partial update applied by the uploader
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ItemPatch {
    pub status: Option<UploadStatus>,
    pub progress: Option<u8>,
    /// `Some(None)` clears a previous error
    pub error: Option<Option<String>>,
    /// Only taken when the patch moves the item into `Completed` or `Error`
    pub meta: Option<ImportMeta>,
}

impl ItemPatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn status(status: UploadStatus) -> Self {
        Self {
            status: Some(status),
            ..Self::default()
        }
    }

    pub fn with_progress(mut self, progress: u8) -> Self {
        self.progress = Some(progress.min(100));
        self
    }

    pub fn with_error(mut self, error: impl Into<String>) -> Self {
        self.error = Some(Some(error.into()));
        self
    }

    pub fn clear_error(mut self) -> Self {
        self.error = Some(None);
        self
    }

    pub fn with_meta(mut self, meta: ImportMeta) -> Self {
        self.meta = Some(meta);
        self
    }
}

/// What to do when an admitted file's signature is already queued
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum DuplicatePolicy {
    /// Keep the existing item untouched
    #[default]
    Skip,
    /// Swap in a fresh pending item at the same position, unless an upload is in flight
    Replace,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AdmitReport {
    pub admitted: Vec<Signature>,
    pub duplicates: Vec<Signature>,
    pub replaced: Vec<Signature>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueCounts {
    pub pending: usize,
    pub uploading: usize,
    pub completed: usize,
    pub error: usize,
    pub total: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_signature_format() {
        let file = QueuedFile::new("inv.csv", "text/csv", 1000, vec![0; 1024]);
        assert_eq!(file.signature().as_str(), "inv.csv-1024-1000");
    }

    #[test]
    fn test_state_machine_edges() {
        use UploadStatus::*;

        assert!(Pending.can_transition_to(Uploading));
        assert!(Pending.can_transition_to(Pending));
        assert!(!Pending.can_transition_to(Completed));
        assert!(!Pending.can_transition_to(Error));

        assert!(Uploading.can_transition_to(Completed));
        assert!(Uploading.can_transition_to(Error));
        assert!(!Uploading.can_transition_to(Pending));

        assert!(Error.can_transition_to(Uploading));
        assert!(!Error.can_transition_to(Completed));
        assert!(!Error.can_transition_to(Pending));

        for next in [Pending, Uploading, Completed, Error] {
            assert!(!Completed.can_transition_to(next));
        }
    }

    #[test]
    fn test_import_outcome() {
        let meta = |imported, errors| ImportMeta {
            imported_count: imported,
            error_count: errors,
            error_details: Vec::new(),
        };
        assert_eq!(meta(10, 0).outcome(), ImportOutcome::Imported);
        assert_eq!(meta(10, 2).outcome(), ImportOutcome::Partial);
        assert_eq!(meta(0, 2).outcome(), ImportOutcome::NothingImported);
        assert_eq!(meta(0, 0).outcome(), ImportOutcome::Empty);
    }

    #[test]
    fn test_mime_guess() {
        assert_eq!(guess_mime_type("Invoices.CSV"), "text/csv");
        assert_eq!(guess_mime_type("ledger.xls"), "application/vnd.ms-excel");
        assert_eq!(guess_mime_type("README"), "application/octet-stream");
    }

    #[test]
    fn test_patch_progress_is_clamped() {
        let patch = ItemPatch::new().with_progress(250);
        assert_eq!(patch.progress, Some(100));
    }
}
