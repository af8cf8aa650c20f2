//! Reference-counted live connection.
//!
//! One physical connection per auth token. Consumers hold a
//! [`ConnectionHandle`]; the connection's driver task runs until the last
//! handle is released, the token changes, or [`ConnectionManager::disconnect`]
//! is called.

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::watch;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::error::Result;
use crate::events::{EventBus, EventReceiver, LiveEvent};
use crate::logging::{log_debug, log_error, log_info, log_warn};

use super::backoff::{ReconnectDelay, ReconnectPolicy};
use super::transport::Transport;

const LIVE_EVENT_CAPACITY: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionStatus {
    Disconnected,
    Connecting,
    Connected,
}

impl std::fmt::Display for ConnectionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConnectionStatus::Disconnected => write!(f, "disconnected"),
            ConnectionStatus::Connecting => write!(f, "connecting"),
            ConnectionStatus::Connected => write!(f, "connected"),
        }
    }
}

struct SharedConnection {
    id: u64,
    token: String,
    handles: Mutex<usize>,
    status: watch::Sender<ConnectionStatus>,
    events: EventBus<LiveEvent>,
    cancel: CancellationToken,
    closed: AtomicBool,
}

impl SharedConnection {
    fn set_status(&self, status: ConnectionStatus) {
        self.status.send_replace(status);
    }

    fn publish(&self, event: LiveEvent) {
        // No receivers is normal between consumers
        let _ = self.events.publish(event);
    }

    fn teardown(&self, reason: &str) {
        self.cancel.cancel();
        self.set_status(ConnectionStatus::Disconnected);
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.publish(LiveEvent::Disconnected {
            reason: reason.to_string(),
        });
        log_info(
            "live",
            &format!("Connection #{} torn down: {}", self.id, reason),
        )
        .unwrap_or_default();
    }
}

#[derive(Default)]
struct ManagerState {
    current: Option<Arc<SharedConnection>>,
    next_id: u64,
}

/// Hands out handles to the process-wide live connection
#[derive(Clone)]
pub struct ConnectionManager {
    state: Arc<Mutex<ManagerState>>,
    transport: Arc<dyn Transport>,
    policy: ReconnectPolicy,
    shutdown: CancellationToken,
}

impl ConnectionManager {
    pub fn new(transport: Arc<dyn Transport>, policy: ReconnectPolicy) -> Self {
        Self::with_shutdown(transport, policy, CancellationToken::new())
    }

    /// Driver tasks stop when `shutdown` is cancelled
    pub fn with_shutdown(
        transport: Arc<dyn Transport>,
        policy: ReconnectPolicy,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            state: Arc::new(Mutex::new(ManagerState::default())),
            transport,
            policy,
            shutdown,
        }
    }

    /// Join the connection for `token`, creating it if needed
    ///
    /// A different token tears down the existing connection first. Must be
    /// called inside a tokio runtime.
    pub fn acquire(&self, token: &str) -> Result<ConnectionHandle> {
        let mut state = self.state.lock()?;

        if let Some(current) = state.current.as_ref() {
            if current.token == token && !current.cancel.is_cancelled() {
                *current.handles.lock()? += 1;
                return Ok(ConnectionHandle::new(Arc::clone(current), self));
            }
        }

        if let Some(previous) = state.current.take() {
            previous.teardown("token changed");
        }

        state.next_id += 1;
        let (status, _) = watch::channel(ConnectionStatus::Disconnected);
        let connection = Arc::new(SharedConnection {
            id: state.next_id,
            token: token.to_string(),
            handles: Mutex::new(1),
            status,
            events: EventBus::new(LIVE_EVENT_CAPACITY),
            cancel: self.shutdown.child_token(),
            closed: AtomicBool::new(false),
        });
        state.current = Some(Arc::clone(&connection));
        drop(state);

        log_info("live", &format!("Opening connection #{}", connection.id)).unwrap_or_default();

        tokio::spawn(drive(
            Arc::clone(&connection),
            Arc::clone(&self.transport),
            self.policy.clone(),
        ));

        Ok(ConnectionHandle::new(connection, self))
    }

    /// Tear down the current connection regardless of outstanding handles
    pub fn disconnect(&self) -> Result<()> {
        let previous = self.state.lock()?.current.take();
        if let Some(connection) = previous {
            connection.teardown("io client disconnect");
        }
        Ok(())
    }

    pub fn status(&self) -> ConnectionStatus {
        self.current()
            .map(|connection| *connection.status.borrow())
            .unwrap_or(ConnectionStatus::Disconnected)
    }

    pub fn active_token(&self) -> Option<String> {
        self.current().map(|connection| connection.token.clone())
    }

    pub fn handle_count(&self) -> usize {
        self.current()
            .and_then(|connection| connection.handles.lock().ok().map(|count| *count))
            .unwrap_or(0)
    }

    fn current(&self) -> Option<Arc<SharedConnection>> {
        self.state
            .lock()
            .ok()
            .and_then(|state| state.current.clone())
    }

    fn release(&self, connection: &Arc<SharedConnection>) -> Result<()> {
        let mut state = self.state.lock()?;
        let remaining = {
            let mut handles = connection.handles.lock()?;
            *handles = handles.saturating_sub(1);
            *handles
        };

        if remaining > 0 {
            return Ok(());
        }

        let is_current = state
            .current
            .as_ref()
            .map(|current| Arc::ptr_eq(current, connection))
            .unwrap_or(false);
        if is_current {
            state.current = None;
        }
        drop(state);

        connection.teardown("last handle released");
        Ok(())
    }
}

/// A consumer's share of the live connection; released on drop
pub struct ConnectionHandle {
    connection: Arc<SharedConnection>,
    manager: ConnectionManager,
    released: bool,
}

impl ConnectionHandle {
    fn new(connection: Arc<SharedConnection>, manager: &ConnectionManager) -> Self {
        Self {
            connection,
            manager: manager.clone(),
            released: false,
        }
    }

    pub fn status(&self) -> ConnectionStatus {
        *self.connection.status.borrow()
    }

    pub fn watch_status(&self) -> watch::Receiver<ConnectionStatus> {
        self.connection.status.subscribe()
    }

    pub fn subscribe(&self) -> EventReceiver<LiveEvent> {
        self.connection.events.subscribe()
    }

    pub fn token(&self) -> &str {
        &self.connection.token
    }

    pub fn connection_id(&self) -> u64 {
        self.connection.id
    }

    pub fn release(mut self) -> Result<()> {
        self.released = true;
        self.manager.release(&self.connection)
    }
}

impl Clone for ConnectionHandle {
    fn clone(&self) -> Self {
        if let Ok(mut handles) = self.connection.handles.lock() {
            *handles += 1;
        }
        Self::new(Arc::clone(&self.connection), &self.manager)
    }
}

impl Drop for ConnectionHandle {
    fn drop(&mut self) {
        if !self.released {
            self.released = true;
            if let Err(e) = self.manager.release(&self.connection) {
                log_error("live", &format!("Failed to release connection handle: {}", e))
                    .unwrap_or_default();
            }
        }
    }
}

impl std::fmt::Debug for ConnectionHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionHandle")
            .field("connection", &self.connection.id)
            .field("status", &self.status())
            .finish()
    }
}

/// Open, forward frames, reconnect per policy; exits on cancellation
async fn drive(
    connection: Arc<SharedConnection>,
    transport: Arc<dyn Transport>,
    policy: ReconnectPolicy,
) {
    let cancel = connection.cancel.clone();
    let mut failures: u32 = 0;

    loop {
        if cancel.is_cancelled() {
            break;
        }

        connection.set_status(ConnectionStatus::Connecting);
        let opened = tokio::select! {
            opened = transport.open(&connection.token) => opened,
            _ = cancel.cancelled() => break,
        };

        match opened {
            Ok(mut stream) => {
                let opened_at = Instant::now();
                connection.set_status(ConnectionStatus::Connected);
                connection.publish(LiveEvent::Connected);
                log_info(
                    "live",
                    &format!(
                        "✓ Connection #{} live via {:?}",
                        connection.id,
                        stream.kind()
                    ),
                )
                .unwrap_or_default();

                let reason = loop {
                    tokio::select! {
                        frame = stream.next_frame() => match frame {
                            Ok(Some(frame)) => {
                                log_debug("live", &format!("Push event {}", frame.event))
                                    .unwrap_or_default();
                                connection.publish(LiveEvent::Push {
                                    channel: frame.event,
                                    payload: frame.data,
                                    server_sequence: frame.sequence,
                                });
                            }
                            Ok(None) => break "transport close".to_string(),
                            Err(e) => break format!("transport error: {}", e),
                        },
                        _ = cancel.cancelled() => {
                            connection.set_status(ConnectionStatus::Disconnected);
                            return;
                        }
                    }
                };

                // Open-then-drop loops must still back off
                let uptime = opened_at.elapsed();
                if policy.is_stable(uptime) {
                    failures = 0;
                } else {
                    failures += 1;
                }

                connection.set_status(ConnectionStatus::Disconnected);
                connection.publish(LiveEvent::Disconnected {
                    reason: reason.clone(),
                });
                log_warn(
                    "live",
                    &format!(
                        "⚠ Connection #{} dropped after {}s: {}",
                        connection.id,
                        uptime.as_secs(),
                        reason
                    ),
                )
                .unwrap_or_default();
            }
            Err(e) => {
                failures += 1;
                connection.set_status(ConnectionStatus::Disconnected);
                connection.publish(LiveEvent::ConnectError {
                    error: e.to_string(),
                });
                log_warn(
                    "live",
                    &format!(
                        "⚠ Connection #{} attempt {} failed: {}",
                        connection.id, failures, e
                    ),
                )
                .unwrap_or_default();
            }
        }

        let delay = match policy.next_delay(failures) {
            ReconnectDelay::Retry(delay) => delay,
            ReconnectDelay::Exhausted(delay) => {
                log_info(
                    "live",
                    &format!(
                        "Reconnect attempts exhausted, retrying upgrade in {}s",
                        delay.as_secs()
                    ),
                )
                .unwrap_or_default();
                delay
            }
            ReconnectDelay::GiveUp => {
                log_warn("live", "Reconnect attempts exhausted, staying on polling")
                    .unwrap_or_default();
                break;
            }
        };

        tokio::select! {
            _ = tokio::time::sleep(delay) => {}
            _ = cancel.cancelled() => break,
        }
    }

    connection.set_status(ConnectionStatus::Disconnected);
}
