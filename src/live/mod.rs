//! Live push channel: transports, reconnection, and the shared connection.

pub mod backoff;
pub mod connection;
pub mod long_poll;
pub mod sse;
pub mod transport;

use std::sync::Arc;

use crate::config::SyncConfig;
use crate::error::Result;

pub use backoff::{ReconnectDelay, ReconnectPolicy};
pub use connection::{ConnectionHandle, ConnectionManager, ConnectionStatus};
pub use long_poll::LongPollTransport;
pub use sse::{SseParser, SseTransport};
pub use transport::{FallbackTransport, Frame, Transport, TransportKind, TransportStream};

/// Event stream first, long polling when the upgrade fails
pub fn default_transport(config: &SyncConfig) -> Result<Arc<dyn Transport>> {
    let server_url = config.require_server_url()?;
    let primary = SseTransport::new(server_url, &config.endpoints.live_stream)?;
    let fallback = LongPollTransport::new(server_url, &config.endpoints.live_poll)?;
    Ok(Arc::new(FallbackTransport::new(
        Arc::new(primary),
        Arc::new(fallback),
    )))
}
