//! Queue operations - admit, remove, update, rename and query upload items.
//!
//! All mutations happen under one lock and never await, so each is atomic
//! with respect to other callers.

use crate::error::{Result, SyncError};
use crate::events::{EventBus, QueueEvent};
use crate::logging::{log_debug, log_info, log_warn};
use indexmap::IndexMap;
use std::sync::{Arc, Mutex};

use super::hashing::calculate_content_key;
use super::types::{
    AdmitReport, DuplicatePolicy, ItemPatch, QueueCounts, QueuedFile, Signature, UploadQueueItem,
    UploadStatus,
};

/// One queue slot: the item's state plus the file it exclusively owns
#[derive(Debug)]
pub(crate) struct QueueEntry {
    pub item: UploadQueueItem,
    pub file: QueuedFile,
}

pub(crate) type Entries = Arc<Mutex<IndexMap<Signature, QueueEntry>>>;

fn publish(events: &EventBus<QueueEvent>, event: QueueEvent) {
    // No subscribers is fine
    let _ = events.publish(event);
}

/// Admit files, deduplicating on signature across the whole queue
pub fn admit(
    entries: &Entries,
    events: &EventBus<QueueEvent>,
    files: Vec<QueuedFile>,
    policy: DuplicatePolicy,
) -> Result<AdmitReport> {
    let mut report = AdmitReport::default();

    // Hash before taking the lock; files can be large
    let keyed: Vec<(QueuedFile, String)> = files
        .into_iter()
        .map(|file| {
            let content_key = calculate_content_key(&file.body());
            (file, content_key)
        })
        .collect();

    let mut queue = entries.lock()?;

    for (file, content_key) in keyed {
        let signature = file.signature();

        let Some(existing) = queue.get(&signature) else {
            let item = UploadQueueItem::admit(&file, content_key);
            log_debug(
                "upload-queue",
                &format!("📥 Queued {} ({} bytes)", item.file_name, item.size),
            )
            .unwrap_or_default();
            publish(
                events,
                QueueEvent::Admitted {
                    id: item.id.clone(),
                    signature: signature.clone(),
                },
            );
            queue.insert(signature.clone(), QueueEntry { item, file });
            report.admitted.push(signature);
            continue;
        };

        let replaceable = existing.item.status != UploadStatus::Uploading;
        if policy == DuplicatePolicy::Replace && replaceable {
            let content = if existing.item.content_key == content_key {
                "same content"
            } else {
                "new content"
            };
            let item = UploadQueueItem::admit(&file, content_key);
            log_info(
                "upload-queue",
                &format!(
                    "🔁 Replacing {} ({} -> fresh pending item, {})",
                    item.file_name, existing.item.status, content
                ),
            )
            .unwrap_or_default();
            publish(
                events,
                QueueEvent::Replaced {
                    id: item.id.clone(),
                    signature: signature.clone(),
                },
            );
            // Same key: IndexMap keeps the original position
            queue.insert(signature.clone(), QueueEntry { item, file });
            report.replaced.push(signature);
        } else {
            log_info(
                "upload-queue",
                &format!(
                    "⚡ Skipping duplicate: {} (already queued, {})",
                    file.name, existing.item.status
                ),
            )
            .unwrap_or_default();
            publish(
                events,
                QueueEvent::Duplicate {
                    signature: signature.clone(),
                },
            );
            report.duplicates.push(signature);
        }
    }

    Ok(report)
}

/// Remove by signature, dropping the owned file. Returns whether anything was removed.
pub fn remove(
    entries: &Entries,
    events: &EventBus<QueueEvent>,
    signature: &Signature,
) -> Result<bool> {
    let removed = entries.lock()?.shift_remove(signature);

    match removed {
        Some(entry) => {
            log_debug(
                "upload-queue",
                &format!("🗑 Removed {} from queue", entry.item.display_name),
            )
            .unwrap_or_default();
            publish(
                events,
                QueueEvent::Removed {
                    signature: signature.clone(),
                },
            );
            Ok(true)
        }
        None => Ok(false),
    }
}

/// Merge a patch into the matching item
///
/// Returns `Ok(false)` if the signature is not queued. A status the state
/// machine does not allow is rejected and the item is left untouched.
pub fn update(
    entries: &Entries,
    events: &EventBus<QueueEvent>,
    signature: &Signature,
    patch: ItemPatch,
) -> Result<bool> {
    let mut queue = entries.lock()?;
    let Some(entry) = queue.get_mut(signature) else {
        return Ok(false);
    };
    let item = &mut entry.item;

    let from = item.status;
    let to = patch.status.unwrap_or(from);

    // Re-stating the current status is a plain field update, not a transition
    if to != from && !from.can_transition_to(to) {
        log_warn(
            "upload-queue",
            &format!("⚠ Rejected {} -> {} for {}", from, to, item.display_name),
        )
        .unwrap_or_default();
        return Err(SyncError::InvalidTransition(format!(
            "{} cannot move from {} to {}",
            item.display_name, from, to
        )));
    }

    item.status = to;

    if let Some(progress) = patch.progress {
        item.progress = progress.min(100);
    }

    if let Some(error) = patch.error {
        item.error = error;
    }

    if let Some(meta) = patch.meta {
        if to != from && to.is_finished() {
            item.meta = Some(meta);
        } else {
            log_debug(
                "upload-queue",
                &format!(
                    "Ignoring import result for {} outside a finishing transition",
                    item.display_name
                ),
            )
            .unwrap_or_default();
        }
    }

    if to != from {
        publish(
            events,
            QueueEvent::StatusChanged {
                id: item.id.clone(),
                signature: signature.clone(),
                from,
                to,
            },
        );
    }

    Ok(true)
}

/// Claim an item for upload, moving pending or error to uploading in one step
///
/// Returns the item and the file to send, or `None` when the item is gone or
/// another runner already holds it.
pub fn begin_upload(
    entries: &Entries,
    events: &EventBus<QueueEvent>,
    signature: &Signature,
) -> Result<Option<(UploadQueueItem, QueuedFile)>> {
    let mut queue = entries.lock()?;
    let Some(entry) = queue.get_mut(signature) else {
        return Ok(None);
    };

    let from = entry.item.status;
    if from == UploadStatus::Uploading || !from.can_transition_to(UploadStatus::Uploading) {
        log_debug(
            "upload-queue",
            &format!("Not starting {}: already {}", entry.item.display_name, from),
        )
        .unwrap_or_default();
        return Ok(None);
    }

    entry.item.status = UploadStatus::Uploading;
    entry.item.progress = 0;
    entry.item.error = None;
    publish(
        events,
        QueueEvent::StatusChanged {
            id: entry.item.id.clone(),
            signature: signature.clone(),
            from,
            to: UploadStatus::Uploading,
        },
    );

    Ok(Some((entry.item.clone(), entry.file.clone())))
}

/// Rename by id; blank names keep the current name. Returns whether the id exists.
pub fn rename(
    entries: &Entries,
    events: &EventBus<QueueEvent>,
    id: &str,
    new_display_name: &str,
) -> Result<bool> {
    let mut queue = entries.lock()?;
    let Some(entry) = queue.values_mut().find(|entry| entry.item.id == id) else {
        return Ok(false);
    };

    let trimmed = new_display_name.trim();
    if trimmed.is_empty() {
        return Ok(true);
    }

    entry.item.display_name = trimmed.to_string();
    publish(
        events,
        QueueEvent::Renamed {
            id: id.to_string(),
            display_name: entry.item.display_name.clone(),
        },
    );

    Ok(true)
}

/// Drop every item matching `predicate`, returning how many were removed
pub fn clear_where<F>(
    entries: &Entries,
    events: &EventBus<QueueEvent>,
    predicate: F,
) -> Result<usize>
where
    F: Fn(&UploadQueueItem) -> bool,
{
    let mut queue = entries.lock()?;
    let before = queue.len();
    queue.retain(|_, entry| !predicate(&entry.item));
    let count = before - queue.len();

    if count > 0 {
        log_info("upload-queue", &format!("🧹 Cleared {} items", count)).unwrap_or_default();
        publish(events, QueueEvent::Cleared { count });
    }

    Ok(count)
}

pub fn counts(entries: &Entries) -> Result<QueueCounts> {
    let queue = entries.lock()?;
    let mut counts = QueueCounts {
        total: queue.len(),
        ..QueueCounts::default()
    };

    for entry in queue.values() {
        match entry.item.status {
            UploadStatus::Pending => counts.pending += 1,
            UploadStatus::Uploading => counts.uploading += 1,
            UploadStatus::Completed => counts.completed += 1,
            UploadStatus::Error => counts.error += 1,
        }
    }

    Ok(counts)
}
