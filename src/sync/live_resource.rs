//! Live-data synchronization for one resource.
//!
//! Authoritative fetch on mount, then push updates over the shared live
//! connection. While the connection is not live, the resource polls on a
//! fixed interval; polling stops as soon as the connection reports
//! `Connected` and resumes when it drops.
//!
//! Every applied datum gets a local receipt sequence. When the server
//! stamps data with its own sequence, anything older than what is held is
//! discarded, so a slow poll response cannot overwrite a fresher push.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::future::BoxFuture;
use futures::FutureExt;
use serde::Serialize;
use std::marker::PhantomData;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::config::{SyncConfig, DEFAULT_POLL_INTERVAL_SECS};
use crate::error::{Result, SyncError};
use crate::events::{EventReceiver, LiveEvent};
use crate::live::{ConnectionHandle, ConnectionManager, ConnectionStatus};
use crate::logging::{log_debug, log_info, log_warn};
use crate::refresh::{RefreshOrchestrator, RefreshSubscriber, Refreshable};

use super::resource::{Fetcher, Resource, Versioned};

/// Connection state as a consumer sees it
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncStatus {
    Connected,
    Disconnected,
    Polling,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceState<T> {
    pub data: Option<T>,
    pub loading: bool,
    pub error: Option<String>,
    pub is_live: bool,
    pub connection_status: SyncStatus,
    pub last_updated: Option<DateTime<Utc>>,
    /// Local receipt order of the held datum
    pub sequence: u64,
    /// Highest server sequence applied so far
    pub server_sequence: Option<u64>,
}

impl<T> Default for ResourceState<T> {
    fn default() -> Self {
        Self {
            data: None,
            loading: false,
            error: None,
            is_live: false,
            connection_status: SyncStatus::Disconnected,
            last_updated: None,
            sequence: 0,
            server_sequence: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MountOptions {
    pub poll_interval: Duration,
}

impl Default for MountOptions {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(DEFAULT_POLL_INTERVAL_SECS),
        }
    }
}

impl MountOptions {
    pub fn from_config(config: &SyncConfig) -> Self {
        Self {
            poll_interval: config.poll_interval(),
        }
    }
}

struct Inner<R: Resource> {
    token: String,
    fetcher: Arc<dyn Fetcher<R>>,
    state: watch::Sender<ResourceState<R::Data>>,
    mounted: AtomicBool,
    receipts: AtomicU64,
    connection: Mutex<Option<ConnectionHandle>>,
    _resource: PhantomData<fn() -> R>,
}

impl<R: Resource> Inner<R> {
    fn is_live(&self) -> bool {
        self.state.borrow().is_live
    }

    fn is_mounted(&self) -> bool {
        self.mounted.load(Ordering::SeqCst)
    }

    /// Apply `update` unless unmounted; returns whether state changed
    fn mutate(&self, update: impl FnOnce(&mut ResourceState<R::Data>) -> bool) -> bool {
        if !self.is_mounted() {
            return false;
        }
        self.state.send_if_modified(update)
    }

    fn apply(&self, incoming: Versioned<R::Data>, source: &str) -> bool {
        let receipt = self.receipts.fetch_add(1, Ordering::SeqCst) + 1;
        let applied = self.mutate(|state| {
            if let (Some(held), Some(new)) = (state.server_sequence, incoming.sequence) {
                if new < held {
                    return false;
                }
            }
            state.data = Some(incoming.data);
            state.error = None;
            state.loading = false;
            state.sequence = receipt;
            state.server_sequence = match (state.server_sequence, incoming.sequence) {
                (Some(held), Some(new)) => Some(held.max(new)),
                (held, new) => new.or(held),
            };
            state.last_updated = Some(Utc::now());
            true
        });

        if !applied && self.is_mounted() {
            log_debug(
                R::NAME,
                &format!("Discarded stale {} data (sequence {:?})", source, incoming.sequence),
            )
            .unwrap_or_default();
        }
        applied
    }

    fn fail(&self, error: SyncError, source: &str) {
        log_warn(R::NAME, &format!("⚠ {} fetch failed: {}", source, error)).unwrap_or_default();
        let message = error.to_string();
        self.mutate(|state| {
            state.error = Some(message);
            state.loading = false;
            true
        });
    }

    async fn fetch(&self, show_loading: bool, source: &str) {
        if show_loading {
            self.mutate(|state| {
                let changed = !state.loading;
                state.loading = true;
                changed
            });
        }

        match self.fetcher.fetch(&self.token).await {
            Ok(versioned) => {
                self.apply(versioned, source);
            }
            Err(e) => self.fail(e, source),
        }
    }

    async fn poll_tick(&self) -> bool {
        if self.is_live() {
            return false;
        }
        self.fetch(false, "poll").await;
        true
    }

    /// `polling` is whether the poll loop is running for this resource
    fn on_connection(&self, status: ConnectionStatus, polling: bool) {
        let is_live = status == ConnectionStatus::Connected;
        let label = match status {
            ConnectionStatus::Connected => SyncStatus::Connected,
            _ if polling => SyncStatus::Polling,
            _ => SyncStatus::Disconnected,
        };
        self.mutate(|state| {
            let changed = state.is_live != is_live || state.connection_status != label;
            state.is_live = is_live;
            state.connection_status = label;
            changed
        });
    }

    fn on_push(&self, channel: &str, payload: serde_json::Value, sequence: Option<u64>) {
        match serde_json::from_value::<R::Data>(payload) {
            Ok(data) => {
                if self.apply(Versioned { data, sequence }, "push") {
                    log_debug(R::NAME, &format!("Applied push from {}", channel))
                        .unwrap_or_default();
                }
            }
            Err(e) => {
                log_warn(R::NAME, &format!("⚠ Ignoring malformed {} payload: {}", channel, e))
                    .unwrap_or_default();
            }
        }
    }
}

#[async_trait]
impl<R: Resource> Refreshable for Inner<R> {
    async fn soft_refresh(&self) {
        self.fetch(false, "refresh").await;
    }
}

/// Push, poll and status handling until cancelled
///
/// A poll in flight is driven alongside the status and event arms, so a slow
/// request never holds up pushes or the switch to live.
async fn run<R: Resource>(
    inner: Arc<Inner<R>>,
    mut status: watch::Receiver<ConnectionStatus>,
    mut events: EventReceiver<LiveEvent>,
    poll_interval: Duration,
    cancel: CancellationToken,
) {
    let mut status_open = true;
    let mut events_open = true;
    let mut next_poll: Option<Instant> = None;
    let mut in_flight: Option<BoxFuture<'_, bool>> = None;

    loop {
        let current = *status.borrow_and_update();
        inner.on_connection(current, true);

        if current == ConnectionStatus::Connected {
            let was_waiting = next_poll.take().is_some();
            let was_polling = in_flight.take().is_some();
            if was_waiting || was_polling {
                log_info(R::NAME, "✓ Live connection up, polling stopped").unwrap_or_default();
            }
        } else if next_poll.is_none() && in_flight.is_none() {
            next_poll = Some(Instant::now() + poll_interval);
        }

        tokio::select! {
            _ = cancel.cancelled() => break,
            changed = status.changed(), if status_open => {
                if changed.is_err() {
                    status_open = false;
                }
            }
            received = events.recv(), if events_open => match received {
                Ok(envelope) => match envelope.payload {
                    LiveEvent::Push { channel, payload, server_sequence }
                        if R::accepts(&channel) =>
                    {
                        inner.on_push(&channel, payload, server_sequence);
                    }
                    LiveEvent::ConnectError { error } => {
                        log_debug(R::NAME, &format!("Live connect error: {}", error))
                            .unwrap_or_default();
                    }
                    LiveEvent::Disconnected { reason } => {
                        log_debug(R::NAME, &format!("Live channel closed: {}", reason))
                            .unwrap_or_default();
                    }
                    _ => {}
                },
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    log_warn(R::NAME, &format!("⚠ Missed {} live events", skipped))
                        .unwrap_or_default();
                }
                Err(broadcast::error::RecvError::Closed) => events_open = false,
            },
            _ = poll_due(next_poll) => {
                next_poll = None;
                in_flight = Some(inner.poll_tick().boxed());
            }
            _ = poll_finished(&mut in_flight) => {
                in_flight = None;
            }
        }
    }

    // Session shutdown; nothing keeps this resource current anymore
    drop(in_flight);
    inner.on_connection(ConnectionStatus::Disconnected, false);
}

async fn poll_due(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

async fn poll_finished(poll: &mut Option<BoxFuture<'_, bool>>) -> bool {
    match poll {
        Some(poll) => poll.await,
        None => std::future::pending().await,
    }
}

/// A mounted resource: `{ data, loading, error, is_live, connection_status }` plus refresh
pub struct LiveResource<R: Resource> {
    inner: Arc<Inner<R>>,
    cancel: CancellationToken,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl<R: Resource> LiveResource<R> {
    /// Fetch current state, then join the live connection for `token`
    pub async fn mount(
        token: &str,
        fetcher: Arc<dyn Fetcher<R>>,
        connections: &ConnectionManager,
        options: MountOptions,
    ) -> Result<Self> {
        Self::mount_with_cancel(token, fetcher, connections, options, CancellationToken::new())
            .await
    }

    /// Like [`mount`](Self::mount), stopping when `cancel` fires
    pub async fn mount_with_cancel(
        token: &str,
        fetcher: Arc<dyn Fetcher<R>>,
        connections: &ConnectionManager,
        options: MountOptions,
        cancel: CancellationToken,
    ) -> Result<Self> {
        if token.trim().is_empty() {
            return Err(SyncError::Config(format!(
                "Cannot mount {} without an auth token",
                R::NAME
            )));
        }

        let (state, _) = watch::channel(ResourceState {
            loading: true,
            ..ResourceState::default()
        });
        let inner = Arc::new(Inner {
            token: token.to_string(),
            fetcher,
            state,
            mounted: AtomicBool::new(true),
            receipts: AtomicU64::new(0),
            connection: Mutex::new(None),
            _resource: PhantomData,
        });

        inner.fetch(true, "initial").await;

        let handle = connections.acquire(token)?;
        let status = handle.watch_status();
        let events = handle.subscribe();
        *inner.connection.lock()? = Some(handle);

        let task = tokio::spawn(run(
            Arc::clone(&inner),
            status,
            events,
            options.poll_interval,
            cancel.clone(),
        ));

        log_info(R::NAME, "Mounted").unwrap_or_default();

        Ok(Self {
            inner,
            cancel,
            task: Mutex::new(Some(task)),
        })
    }

    pub fn snapshot(&self) -> ResourceState<R::Data> {
        self.inner.state.borrow().clone()
    }

    pub fn data(&self) -> Option<R::Data> {
        self.inner.state.borrow().data.clone()
    }

    pub fn is_live(&self) -> bool {
        self.inner.is_live()
    }

    pub fn connection_status(&self) -> SyncStatus {
        self.inner.state.borrow().connection_status
    }

    pub fn watch(&self) -> watch::Receiver<ResourceState<R::Data>> {
        self.inner.state.subscribe()
    }

    pub fn is_mounted(&self) -> bool {
        self.inner.is_mounted()
    }

    /// Immediate authoritative fetch, showing the loading state
    pub async fn refresh(&self) {
        self.inner.fetch(true, "refresh").await;
    }

    /// Fetch without flipping `loading`
    pub async fn soft_refresh(&self) {
        self.inner.fetch(false, "refresh").await;
    }

    /// One poll; a no-op returning `false` while the connection is live
    pub async fn poll_tick(&self) -> bool {
        self.inner.poll_tick().await
    }

    /// Handle for refreshers that must not keep the resource mounted
    pub fn refresh_target(&self) -> Arc<dyn Refreshable> {
        self.inner.clone()
    }

    /// Soft-refresh after each debounced burst of import completions
    pub fn follow_refreshes(
        &self,
        orchestrator: &RefreshOrchestrator,
        debounce: Duration,
    ) -> RefreshSubscriber {
        RefreshSubscriber::spawn(
            orchestrator,
            self.refresh_target(),
            debounce,
            self.cancel.child_token(),
        )
    }

    /// Stop all timers and listeners and release the connection handle
    pub fn unmount(&self) {
        if !self.inner.mounted.swap(false, Ordering::SeqCst) {
            return;
        }
        self.cancel.cancel();
        if let Ok(mut task) = self.task.lock() {
            if let Some(task) = task.take() {
                task.abort();
            }
        }
        let handle = self
            .inner
            .connection
            .lock()
            .ok()
            .and_then(|mut connection| connection.take());
        drop(handle);
        log_info(R::NAME, "Unmounted").unwrap_or_default();
    }
}

#[async_trait]
impl<R: Resource> Refreshable for LiveResource<R> {
    async fn soft_refresh(&self) {
        self.inner.fetch(false, "refresh").await;
    }
}

impl<R: Resource> Drop for LiveResource<R> {
    fn drop(&mut self) {
        self.unmount();
    }
}

impl<R: Resource> std::fmt::Debug for LiveResource<R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.inner.state.borrow();
        f.debug_struct("LiveResource")
            .field("resource", &R::NAME)
            .field("loading", &state.loading)
            .field("is_live", &state.is_live)
            .field("connection_status", &state.connection_status)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::live::{Frame, ReconnectPolicy, Transport, TransportKind, TransportStream};
    use crate::sync::{Dashboard, DashboardData, Subscription, SubscriptionData};
    use serde_json::json;
    use std::collections::VecDeque;
    use std::sync::atomic::AtomicUsize;
    use tokio::sync::{mpsc, Notify};
    use tokio::time::sleep;

    /// Answers from a script, then repeats the last answer
    struct ScriptedFetcher<R: Resource> {
        calls: AtomicUsize,
        answers: Mutex<VecDeque<Result<Versioned<R::Data>>>>,
        last: Mutex<Option<Versioned<R::Data>>>,
        gate: Option<Arc<Notify>>,
    }

    impl<R: Resource> ScriptedFetcher<R> {
        fn new(answers: Vec<Result<Versioned<R::Data>>>) -> Arc<Self> {
            Arc::new(Self {
                calls: AtomicUsize::new(0),
                answers: Mutex::new(answers.into()),
                last: Mutex::new(None),
                gate: None,
            })
        }

        fn gated(answers: Vec<Result<Versioned<R::Data>>>, gate: Arc<Notify>) -> Arc<Self> {
            Arc::new(Self {
                calls: AtomicUsize::new(0),
                answers: Mutex::new(answers.into()),
                last: Mutex::new(None),
                gate: Some(gate),
            })
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl<R: Resource> Fetcher<R> for ScriptedFetcher<R> {
        async fn fetch(&self, _token: &str) -> Result<Versioned<R::Data>> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            if call > 0 {
                if let Some(gate) = &self.gate {
                    gate.notified().await;
                }
            }
            let next = self.answers.lock().unwrap().pop_front();
            match next {
                Some(Ok(versioned)) => {
                    *self.last.lock().unwrap() = Some(versioned.clone());
                    Ok(versioned)
                }
                Some(Err(e)) => Err(e),
                None => self
                    .last
                    .lock()
                    .unwrap()
                    .clone()
                    .ok_or_else(|| SyncError::Fetch("no data".to_string())),
            }
        }
    }

    /// `open` waits until allowed, then yields frames sent on a channel
    struct GatedTransport {
        allowed: watch::Receiver<bool>,
        frames: Mutex<Option<mpsc::UnboundedReceiver<Frame>>>,
    }

    struct ChannelStream(mpsc::UnboundedReceiver<Frame>);

    #[async_trait]
    impl TransportStream for ChannelStream {
        fn kind(&self) -> TransportKind {
            TransportKind::Stream
        }

        async fn next_frame(&mut self) -> Result<Option<Frame>> {
            Ok(self.0.recv().await)
        }
    }

    #[async_trait]
    impl Transport for GatedTransport {
        async fn open(&self, _token: &str) -> Result<Box<dyn TransportStream>> {
            let mut allowed = self.allowed.clone();
            loop {
                let open = *allowed.borrow_and_update();
                if open {
                    break;
                }
                if allowed.changed().await.is_err() {
                    return Err(SyncError::Transport("gate closed".to_string()));
                }
            }
            let frames = self
                .frames
                .lock()
                .unwrap()
                .take()
                .ok_or_else(|| SyncError::Transport("already open".to_string()))?;
            Ok(Box::new(ChannelStream(frames)))
        }
    }

    struct Harness {
        manager: ConnectionManager,
        allow: watch::Sender<bool>,
        frames: mpsc::UnboundedSender<Frame>,
    }

    fn harness(live: bool) -> Harness {
        let (allow, allowed) = watch::channel(live);
        let (frames, rx) = mpsc::unbounded_channel();
        let transport = Arc::new(GatedTransport {
            allowed,
            frames: Mutex::new(Some(rx)),
        });
        Harness {
            manager: ConnectionManager::new(transport, ReconnectPolicy::legacy()),
            allow,
            frames,
        }
    }

    fn dashboard(total: u64) -> DashboardData {
        DashboardData {
            summary: json!({ "total": total }),
            ..DashboardData::default()
        }
    }

    fn fixed(total: u64) -> Arc<ScriptedFetcher<Dashboard>> {
        ScriptedFetcher::new(vec![Ok(Versioned::unversioned(dashboard(total)))])
    }

    async fn mount<R: Resource>(h: &Harness, fetcher: Arc<ScriptedFetcher<R>>) -> LiveResource<R> {
        LiveResource::<R>::mount("token", fetcher, &h.manager, MountOptions::default())
            .await
            .unwrap()
    }

    fn total(resource: &LiveResource<Dashboard>) -> Option<u64> {
        resource
            .data()
            .and_then(|data| data.summary["total"].as_u64())
    }

    #[tokio::test(start_paused = true)]
    async fn test_mount_fetches_then_goes_live() {
        let h = harness(true);
        let fetcher = fixed(1);
        let resource = mount(&h, fetcher.clone()).await;

        let state = resource.snapshot();
        assert!(!state.loading);
        assert_eq!(total(&resource), Some(1));
        assert_eq!(fetcher.calls(), 1);

        sleep(Duration::from_millis(10)).await;
        assert!(resource.is_live());
        assert_eq!(resource.connection_status(), SyncStatus::Connected);
    }

    #[tokio::test(start_paused = true)]
    async fn test_poll_tick_is_noop_while_live() {
        let h = harness(true);
        let fetcher = fixed(1);
        let resource = mount(&h, fetcher.clone()).await;
        sleep(Duration::from_millis(10)).await;

        for _ in 0..10 {
            assert!(!resource.poll_tick().await);
        }
        assert_eq!(fetcher.calls(), 1);

        // And the background loop never polls either
        sleep(Duration::from_secs(300)).await;
        assert_eq!(fetcher.calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_polling_stops_once_connected() {
        let h = harness(false);
        let fetcher = fixed(1);
        let resource = mount(&h, fetcher.clone()).await;
        assert!(!resource.is_live());

        // Initial fetch plus polls at 30s, 60s and 90s
        sleep(Duration::from_millis(90_500)).await;
        assert_eq!(fetcher.calls(), 4);

        h.allow.send_replace(true);
        sleep(Duration::from_millis(10)).await;
        assert!(resource.is_live());

        sleep(Duration::from_secs(120)).await;
        assert_eq!(fetcher.calls(), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_polling_resumes_after_disconnect() {
        let h = harness(true);
        let fetcher = fixed(1);
        let resource = mount(&h, fetcher.clone()).await;
        sleep(Duration::from_millis(10)).await;
        assert!(resource.is_live());

        h.manager.disconnect().unwrap();
        sleep(Duration::from_millis(10)).await;
        assert!(!resource.is_live());
        assert_eq!(resource.connection_status(), SyncStatus::Polling);

        sleep(Duration::from_secs(61)).await;
        assert_eq!(fetcher.calls(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_push_replaces_data() {
        let h = harness(true);
        let fetcher = fixed(1);
        let resource = mount(&h, fetcher).await;
        sleep(Duration::from_millis(10)).await;

        h.frames
            .send(Frame {
                event: "billing:update".to_string(),
                data: json!({ "subscription": {} }),
                sequence: None,
            })
            .unwrap();
        h.frames
            .send(Frame {
                event: "dashboard:update".to_string(),
                data: json!({ "summary": { "total": 7 } }),
                sequence: None,
            })
            .unwrap();
        sleep(Duration::from_millis(10)).await;

        assert_eq!(total(&resource), Some(7));
        assert_eq!(resource.snapshot().sequence, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stale_fetch_does_not_overwrite_newer_push() {
        let h = harness(true);
        let gate = Arc::new(Notify::new());
        let fetcher = ScriptedFetcher::<Dashboard>::gated(
            vec![
                Ok(Versioned { data: dashboard(1), sequence: Some(10) }),
                Ok(Versioned { data: dashboard(2), sequence: Some(11) }),
            ],
            gate.clone(),
        );
        let resource = mount(&h, fetcher.clone()).await;
        sleep(Duration::from_millis(10)).await;

        // Refetch issued before the push, answered after it
        let target = resource.refresh_target();
        let in_flight = tokio::spawn(async move { target.soft_refresh().await });
        sleep(Duration::from_millis(10)).await;
        assert_eq!(fetcher.calls(), 2);

        h.frames
            .send(Frame {
                event: "dashboard:update".to_string(),
                data: json!({ "summary": { "total": 3 } }),
                sequence: Some(12),
            })
            .unwrap();
        sleep(Duration::from_millis(10)).await;
        assert_eq!(total(&resource), Some(3));

        gate.notify_one();
        in_flight.await.unwrap();

        assert_eq!(total(&resource), Some(3));
        assert_eq!(resource.snapshot().server_sequence, Some(12));
    }

    #[tokio::test(start_paused = true)]
    async fn test_fetch_error_keeps_previous_data() {
        let h = harness(true);
        let fetcher = ScriptedFetcher::<Subscription>::new(vec![
            Ok(Versioned::unversioned(SubscriptionData {
                subscription: json!({ "plan": "pro" }),
                catalog: json!([]),
            })),
            Err(SyncError::Fetch("Session expired".to_string())),
        ]);
        let resource = mount(&h, fetcher).await;

        resource.refresh().await;

        let state = resource.snapshot();
        assert!(!state.loading);
        assert_eq!(state.error.as_deref(), Some("Fetch error: Session expired"));
        assert_eq!(state.data.unwrap().subscription["plan"], "pro");

        // The next success clears the error
        resource.refresh().await;
        assert_eq!(resource.snapshot().error, None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_no_state_change_after_unmount() {
        let h = harness(true);
        let gate = Arc::new(Notify::new());
        let fetcher = ScriptedFetcher::<Dashboard>::gated(
            vec![
                Ok(Versioned::unversioned(dashboard(1))),
                Ok(Versioned::unversioned(dashboard(2))),
            ],
            gate.clone(),
        );
        let resource = mount(&h, fetcher.clone()).await;
        sleep(Duration::from_millis(10)).await;

        let target = resource.refresh_target();
        let in_flight = tokio::spawn(async move { target.soft_refresh().await });
        sleep(Duration::from_millis(10)).await;
        assert_eq!(fetcher.calls(), 2);

        let mut changes = resource.watch();
        changes.borrow_and_update();
        resource.unmount();
        assert!(!resource.is_mounted());
        assert_eq!(h.manager.handle_count(), 0);

        gate.notify_one();
        in_flight.await.unwrap();

        assert!(!changes.has_changed().unwrap());
        assert_eq!(total(&resource), Some(1));
    }

    #[tokio::test(start_paused = true)]
    async fn test_mount_requires_token() {
        let h = harness(true);
        let fetcher = ScriptedFetcher::<Dashboard>::new(vec![]);
        let options = MountOptions::default();
        let result =
            LiveResource::<Dashboard>::mount("  ", fetcher.clone(), &h.manager, options).await;
        assert!(matches!(result, Err(SyncError::Config(_))));
        assert_eq!(fetcher.calls(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_shared_connection_survives_one_unmount() {
        let h = harness(true);
        let dashboard_fetcher = fixed(1);
        let subscription_fetcher = ScriptedFetcher::<Subscription>::new(vec![Ok(
            Versioned::unversioned(SubscriptionData::default()),
        )]);

        let dash = mount(&h, dashboard_fetcher).await;
        let sub = mount(&h, subscription_fetcher).await;
        sleep(Duration::from_millis(10)).await;
        assert_eq!(h.manager.handle_count(), 2);

        drop(dash);
        sleep(Duration::from_millis(10)).await;
        assert!(sub.is_live());
        assert_eq!(h.manager.handle_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_push_applies_while_poll_is_stalled() {
        let h = harness(false);
        let gate = Arc::new(Notify::new());
        let fetcher = ScriptedFetcher::<Dashboard>::gated(
            vec![Ok(Versioned::unversioned(dashboard(1)))],
            gate,
        );
        let resource = mount(&h, fetcher.clone()).await;

        // The poll at 30s never answers
        sleep(Duration::from_secs(31)).await;
        assert_eq!(fetcher.calls(), 2);
        assert_eq!(resource.connection_status(), SyncStatus::Polling);

        sleep(Duration::from_secs(4)).await;
        h.allow.send_replace(true);
        sleep(Duration::from_millis(10)).await;
        assert!(resource.is_live());
        assert_eq!(resource.connection_status(), SyncStatus::Connected);

        sleep(Duration::from_secs(5)).await;
        h.frames
            .send(Frame {
                event: "dashboard:update".to_string(),
                data: json!({ "summary": { "total": 9 } }),
                sequence: None,
            })
            .unwrap();
        sleep(Duration::from_millis(10)).await;
        assert_eq!(total(&resource), Some(9));

        // Live: the stalled poll was dropped and no new one starts
        sleep(Duration::from_secs(60)).await;
        assert_eq!(fetcher.calls(), 2);
        assert_eq!(total(&resource), Some(9));
    }

    #[tokio::test(start_paused = true)]
    async fn test_status_is_polling_before_first_connection_outcome() {
        let h = harness(false);
        let resource = mount(&h, fixed(1)).await;
        sleep(Duration::from_millis(10)).await;

        assert!(!resource.is_live());
        assert_eq!(resource.connection_status(), SyncStatus::Polling);
    }
}
