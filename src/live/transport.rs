//! Live channel transport seam.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::error::Result;
use crate::logging::log_warn;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransportKind {
    /// Persistent server-to-client stream
    Stream,
    /// Repeated HTTP requests
    LongPoll,
}

/// One named event off the wire
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Frame {
    pub event: String,
    #[serde(default)]
    pub data: serde_json::Value,
    #[serde(default)]
    pub sequence: Option<u64>,
}

/// An open channel. `Ok(None)` means the server closed it cleanly.
#[async_trait]
pub trait TransportStream: Send {
    fn kind(&self) -> TransportKind;

    async fn next_frame(&mut self) -> Result<Option<Frame>>;
}

#[async_trait]
pub trait Transport: Send + Sync {
    async fn open(&self, token: &str) -> Result<Box<dyn TransportStream>>;
}

/// Prefer `primary`; drop to `fallback` when it cannot be opened
pub struct FallbackTransport {
    primary: Arc<dyn Transport>,
    fallback: Arc<dyn Transport>,
}

impl FallbackTransport {
    pub fn new(primary: Arc<dyn Transport>, fallback: Arc<dyn Transport>) -> Self {
        Self { primary, fallback }
    }
}

#[async_trait]
impl Transport for FallbackTransport {
    async fn open(&self, token: &str) -> Result<Box<dyn TransportStream>> {
        match self.primary.open(token).await {
            Ok(stream) => Ok(stream),
            Err(e) => {
                log_warn(
                    "live",
                    &format!("⚠ Stream upgrade failed ({}), falling back to long polling", e),
                )
                .unwrap_or_default();
                self.fallback.open(token).await
            }
        }
    }
}
