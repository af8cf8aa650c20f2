//! Import runner that drives queued items through the status state machine.
//!
//! pending -> uploading -> completed | error, with a bounded number of
//! imports in flight and a dashboard refresh signal after every finish.

use crate::error::Result;
use crate::logging::{log_error, log_info, log_warn, log_with_details};
use crate::refresh::RefreshOrchestrator;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

use super::types::{ImportMeta, ItemPatch, Signature, UploadStatus};
use super::upload::{classify_error, ImportRequest, Importer};
use super::UploadQueueStore;

#[derive(Clone)]
pub struct ImportProcessor {
    store: UploadQueueStore,
    importer: Arc<dyn Importer>,
    refresh: RefreshOrchestrator,
    semaphore: Arc<Semaphore>,
}

impl std::fmt::Debug for ImportProcessor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ImportProcessor")
            .field("store", &self.store)
            .field("importer", &"<importer>")
            .field("available_permits", &self.semaphore.available_permits())
            .finish()
    }
}

impl ImportProcessor {
    pub fn new(
        store: UploadQueueStore,
        importer: Arc<dyn Importer>,
        refresh: RefreshOrchestrator,
        max_concurrent: usize,
    ) -> Self {
        Self {
            store,
            importer,
            refresh,
            semaphore: Arc::new(Semaphore::new(max_concurrent.max(1))),
        }
    }

    /// Import every pending item; returns how many imports were attempted
    pub async fn run_pending(&self) -> Result<usize> {
        let pending: Vec<Signature> = self
            .store
            .items()?
            .into_iter()
            .filter(|item| item.status == UploadStatus::Pending)
            .map(|item| item.signature)
            .collect();

        if pending.is_empty() {
            return Ok(0);
        }

        log_info(
            "upload-queue",
            &format!("📤 Importing {} pending files", pending.len()),
        )
        .unwrap_or_default();

        let mut tasks = JoinSet::new();
        for signature in pending {
            let processor = self.clone();
            tasks.spawn(async move { processor.import_item(&signature).await });
        }

        let mut attempted = 0;
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(Ok(true)) => attempted += 1,
                Ok(Ok(false)) => {}
                Ok(Err(e)) => {
                    log_error("upload-queue", &format!("Import task failed: {}", e))
                        .unwrap_or_default();
                }
                Err(e) => {
                    log_error("upload-queue", &format!("Import task panicked: {}", e))
                        .unwrap_or_default();
                }
            }
        }

        Ok(attempted)
    }

    /// Re-submit a failed item (error -> uploading). Returns false if it is not in `Error`.
    pub async fn retry(&self, signature: &Signature) -> Result<bool> {
        match self.store.get(signature)? {
            Some(item) if item.status == UploadStatus::Error => self.import_item(signature).await,
            _ => Ok(false),
        }
    }

    /// Import one item; false if it was gone or not in a startable state
    pub async fn import_item(&self, signature: &Signature) -> Result<bool> {
        let _permit = self
            .semaphore
            .acquire()
            .await
            .map_err(|e| crate::error::SyncError::Other(e.to_string()))?;

        // Overlapping runs race here; only one of them gets the item
        let Some((item, file)) = self.store.begin_upload(signature)? else {
            return Ok(false);
        };

        log_info(
            "upload-queue",
            &format!("📤 Uploading {} ({} bytes)", item.display_name, item.size),
        )
        .unwrap_or_default();

        let request = ImportRequest {
            signature: signature.clone(),
            display_name: item.display_name.clone(),
            file,
        };
        let result = self.importer.import(&request).await;

        let patch = match result {
            Ok(meta) => {
                log_info(
                    "upload-queue",
                    &format!(
                        "✓ Import finished: {} ({} imported, {} row errors)",
                        item.display_name, meta.imported_count, meta.error_count
                    ),
                )
                .unwrap_or_default();
                ItemPatch::status(UploadStatus::Completed)
                    .with_progress(100)
                    .with_meta(meta)
            }
            Err(failure) => {
                let error_type = classify_error(&failure.message);
                log_error(
                    "upload-queue",
                    &format!(
                        "✗ Import failed ({:?}, {}): {} - {}",
                        error_type,
                        if error_type.is_retryable() {
                            "retry may succeed"
                        } else {
                            "fix the file before retrying"
                        },
                        item.display_name,
                        failure.message
                    ),
                )
                .unwrap_or_default();

                let mut patch =
                    ItemPatch::status(UploadStatus::Error).with_error(failure.message.clone());
                if !failure.error_details.is_empty() {
                    log_with_details(
                        "upload-queue",
                        "WARN",
                        &format!("Row errors in {}", item.display_name),
                        serde_json::json!({
                            "signature": signature.as_str(),
                            "errors": &failure.error_details,
                        }),
                    )
                    .unwrap_or_default();
                    patch = patch.with_meta(ImportMeta {
                        imported_count: 0,
                        error_count: failure.error_details.len() as u64,
                        error_details: failure.error_details,
                    });
                }
                patch
            }
        };

        // The item may have been removed while in flight; the server side still changed
        if let Err(e) = self.store.update(signature, patch) {
            log_warn(
                "upload-queue",
                &format!("⚠ Could not record import result for {}: {}", signature, e),
            )
            .unwrap_or_default();
        }

        self.refresh.trigger_refresh();
        Ok(true)
    }
}
