//! Queue -> import -> debounced dashboard refresh, end to end with in-memory fakes.

use async_trait::async_trait;
use portal_sync::api::ApiClient;
use portal_sync::config::SyncConfig;
use portal_sync::error::{Result, SyncError};
use portal_sync::live::{Transport, TransportStream};
use portal_sync::session::PortalSession;
use portal_sync::sync::{Dashboard, DashboardData, Fetcher, Versioned};
use portal_sync::upload_queue::upload::{ImportFailure, ImportRequest, Importer};
use portal_sync::upload_queue::{ImportMeta, ImportOutcome, QueuedFile, UploadStatus};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;

/// Live channel that never comes up
struct Offline;

#[async_trait]
impl Transport for Offline {
    async fn open(&self, _token: &str) -> Result<Box<dyn TransportStream>> {
        Err(SyncError::Transport("offline".to_string()))
    }
}

#[derive(Default)]
struct CountingFetcher {
    calls: AtomicUsize,
}

#[async_trait]
impl Fetcher<Dashboard> for CountingFetcher {
    async fn fetch(&self, _token: &str) -> Result<Versioned<DashboardData>> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst) as u64;
        Ok(Versioned::unversioned(DashboardData {
            summary: serde_json::json!({ "fetches": call + 1 }),
            ..DashboardData::default()
        }))
    }
}

/// Rejects files named `bad*`, reports zero rows for `empty*`
struct FakeImporter;

#[async_trait]
impl Importer for FakeImporter {
    async fn import(
        &self,
        request: &ImportRequest,
    ) -> std::result::Result<ImportMeta, ImportFailure> {
        sleep(Duration::from_millis(100)).await;
        let name = request.file.name.as_str();
        if name.starts_with("bad") {
            return Err(ImportFailure::new("Import failed with status 422: bad header row")
                .with_details(vec!["row 1: missing invoice number".to_string()]));
        }
        if name.starts_with("empty") {
            return Ok(ImportMeta::default());
        }
        Ok(ImportMeta {
            imported_count: 12,
            error_count: 0,
            error_details: Vec::new(),
        })
    }
}

fn session() -> PortalSession {
    let config = SyncConfig {
        server_url: Some("http://localhost:4000/api".to_string()),
        auth_token: Some("token-1".to_string()),
        ..SyncConfig::default()
    };
    PortalSession::with_transport(config, Arc::new(Offline)).unwrap()
}

fn csv(name: &str, last_modified: i64) -> QueuedFile {
    QueuedFile::new(name, "text/csv", last_modified, b"invoice,amount\n1,10\n".to_vec())
}

#[tokio::test(start_paused = true)]
async fn test_finished_imports_trigger_one_soft_refresh() {
    let session = session();
    let fetcher = Arc::new(CountingFetcher::default());
    let dashboard = session.mount_with::<Dashboard>(fetcher.clone()).await.unwrap();
    session.follow(dashboard.follow_refreshes(session.refresh(), Duration::from_secs(2)));
    assert_eq!(fetcher.calls.load(Ordering::SeqCst), 1);

    let report = session
        .store()
        .admit(vec![csv("jan.csv", 1), csv("bad.csv", 2), csv("empty.csv", 3)])
        .unwrap();
    assert_eq!(report.admitted.len(), 3);

    let attempted = session.processor(Arc::new(FakeImporter)).run_pending().await.unwrap();
    assert_eq!(attempted, 3);
    assert_eq!(session.refresh().refresh_trigger(), 3);

    let items = session.store().items().unwrap();
    assert_eq!(items[0].status, UploadStatus::Completed);
    assert_eq!(items[0].outcome(), Some(ImportOutcome::Imported));
    assert_eq!(items[1].status, UploadStatus::Error);
    assert_eq!(items[1].error.as_deref(), Some("Import failed with status 422: bad header row"));
    assert_eq!(
        items[1].meta.as_ref().unwrap().error_details,
        vec!["row 1: missing invoice number".to_string()]
    );
    assert_eq!(items[2].status, UploadStatus::Completed);
    assert_eq!(items[2].outcome(), Some(ImportOutcome::Empty));

    // The burst collapses into a single refetch, without a loading flash
    let mut changes = dashboard.watch();
    sleep(Duration::from_millis(2_100)).await;
    assert_eq!(fetcher.calls.load(Ordering::SeqCst), 2);
    assert!(changes.has_changed().unwrap());
    assert!(!changes.borrow_and_update().loading);

    sleep(Duration::from_secs(5)).await;
    assert_eq!(fetcher.calls.load(Ordering::SeqCst), 2);
}

#[tokio::test(start_paused = true)]
async fn test_failed_item_retries_and_duplicates_leave_it_alone() {
    let session = session();
    let store = session.store();
    let processor = session.processor(Arc::new(FakeImporter));

    store.admit(vec![csv("bad.csv", 1000)]).unwrap();
    processor.run_pending().await.unwrap();

    let failed = store.items().unwrap().remove(0);
    assert_eq!(failed.status, UploadStatus::Error);

    // Re-adding the same file is a no-op while the failed item is inspected
    let report = store.admit(vec![csv("bad.csv", 1000)]).unwrap();
    assert_eq!(report.duplicates, vec![failed.signature.clone()]);
    assert_eq!(store.get(&failed.signature).unwrap().unwrap(), failed);

    // Retry goes back through uploading and fails again the same way
    assert!(processor.retry(&failed.signature).await.unwrap());
    let retried = store.get(&failed.signature).unwrap().unwrap();
    assert_eq!(retried.status, UploadStatus::Error);
    assert_eq!(retried.id, failed.id);
}

#[tokio::test]
async fn test_session_close_releases_queue() {
    let session = session();
    session.store().admit(vec![csv("jan.csv", 1)]).unwrap();

    session.close().unwrap();
    assert!(session.store().is_empty());
    assert!(session.is_closed());
}

#[test]
fn test_api_client_is_a_fetcher_for_both_resources() {
    fn assert_fetcher<R: portal_sync::sync::Resource, F: Fetcher<R>>() {}
    assert_fetcher::<Dashboard, ApiClient>();
    assert_fetcher::<portal_sync::sync::Subscription, ApiClient>();
}
