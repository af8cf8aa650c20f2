//! Session lifetime: everything created at login and torn down at logout.

use std::sync::{Arc, Mutex};

use crate::api::ApiClient;
use crate::config::SyncConfig;
use crate::error::{ErrorContext, Result};
use crate::live::{default_transport, ConnectionManager, ReconnectPolicy, Transport};
use crate::logging::{log_info, log_warn};
use crate::refresh::{RefreshOrchestrator, RefreshSubscriber};
use crate::shutdown::ShutdownCoordinator;
use crate::sync::{Dashboard, Fetcher, LiveResource, MountOptions, Resource, Subscription};
use crate::upload_queue::upload::{HttpImporter, Importer};
use crate::upload_queue::{ImportProcessor, UploadQueueStore};

pub struct PortalSession {
    config: SyncConfig,
    token: String,
    store: UploadQueueStore,
    refresh: RefreshOrchestrator,
    connections: ConnectionManager,
    shutdown: ShutdownCoordinator,
    api: Arc<ApiClient>,
    refreshers: Mutex<Vec<RefreshSubscriber>>,
}

impl PortalSession {
    /// Session against the configured server, live over SSE with long-poll fallback
    pub fn open(config: SyncConfig) -> Result<Self> {
        let transport = default_transport(&config)?;
        Self::with_transport(config, transport)
    }

    pub fn with_transport(config: SyncConfig, transport: Arc<dyn Transport>) -> Result<Self> {
        let token = config
            .require_token()
            .context("Cannot open session")?
            .to_string();
        let api = Arc::new(ApiClient::new(&config).context("Cannot open session")?);
        let shutdown = ShutdownCoordinator::new();
        let connections = ConnectionManager::with_shutdown(
            transport,
            ReconnectPolicy::from_config(&config.reconnect),
            shutdown.child_token(),
        );

        log_info("session", "Session opened").unwrap_or_default();

        Ok(Self {
            config,
            token,
            store: UploadQueueStore::new(),
            refresh: RefreshOrchestrator::new(),
            connections,
            shutdown,
            api,
            refreshers: Mutex::new(Vec::new()),
        })
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    pub fn store(&self) -> &UploadQueueStore {
        &self.store
    }

    pub fn refresh(&self) -> &RefreshOrchestrator {
        &self.refresh
    }

    pub fn connections(&self) -> &ConnectionManager {
        &self.connections
    }

    pub fn api(&self) -> Arc<ApiClient> {
        Arc::clone(&self.api)
    }

    /// Mount `R` with the session token, polling interval and shutdown signal
    pub async fn mount_with<R: Resource>(
        &self,
        fetcher: Arc<dyn Fetcher<R>>,
    ) -> Result<LiveResource<R>> {
        LiveResource::mount_with_cancel(
            &self.token,
            fetcher,
            &self.connections,
            MountOptions::from_config(&self.config),
            self.shutdown.child_token(),
        )
        .await
    }

    /// Dashboard resource, soft-refreshed after each burst of finished imports
    pub async fn mount_dashboard(&self) -> Result<LiveResource<Dashboard>> {
        let dashboard = self.mount_with::<Dashboard>(self.api.clone()).await?;
        self.follow(dashboard.follow_refreshes(&self.refresh, self.config.refresh_debounce()));
        Ok(dashboard)
    }

    pub async fn mount_subscription(&self) -> Result<LiveResource<Subscription>> {
        self.mount_with::<Subscription>(self.api.clone()).await
    }

    /// Keep a refresh subscriber alive for the rest of the session
    pub fn follow(&self, subscriber: RefreshSubscriber) {
        match self.refreshers.lock() {
            Ok(mut refreshers) => {
                refreshers.retain(|existing| !existing.is_finished());
                refreshers.push(subscriber);
            }
            Err(e) => {
                log_warn("session", &format!("⚠ Dropping refresh subscriber: {}", e))
                    .unwrap_or_default();
            }
        }
    }

    /// Import runner over this session's queue and refresh signal
    pub fn processor(&self, importer: Arc<dyn Importer>) -> ImportProcessor {
        ImportProcessor::new(
            self.store.clone(),
            importer,
            self.refresh.clone(),
            self.config.max_concurrent_imports,
        )
    }

    pub fn http_processor(&self) -> Result<ImportProcessor> {
        Ok(self.processor(Arc::new(HttpImporter::new(&self.config)?)))
    }

    pub fn is_closed(&self) -> bool {
        self.shutdown.is_shutdown()
    }

    /// Cancel every session task, drop the live connection and empty the queue
    pub fn close(&self) -> Result<()> {
        if self.shutdown.is_shutdown() {
            return Ok(());
        }
        self.shutdown.shutdown();
        self.refreshers.lock()?.clear();
        self.connections.disconnect()?;
        let cleared = self.store.clear()?;
        log_info(
            "session",
            &format!("Session closed ({} queued files released)", cleared),
        )
        .unwrap_or_default();
        Ok(())
    }
}

impl Drop for PortalSession {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            log_warn("session", &format!("⚠ Session close failed: {}", e)).unwrap_or_default();
        }
    }
}
