//! Long-polling transport, used when the event stream cannot be opened.

use async_trait::async_trait;
use std::collections::VecDeque;
use std::time::Duration;

use crate::api::endpoint_url;
use crate::error::{Result, SyncError};

use super::transport::{Frame, Transport, TransportKind, TransportStream};

/// Pause after an empty answer, for servers that reply without holding the request
const EMPTY_POLL_DELAY: Duration = Duration::from_secs(1);

pub struct LongPollTransport {
    client: reqwest::Client,
    url: url::Url,
}

impl LongPollTransport {
    pub fn new(server_url: &str, path: &str) -> Result<Self> {
        Ok(Self {
            client: reqwest::Client::new(),
            url: endpoint_url(server_url, path)?,
        })
    }
}

async fn poll_once(
    client: &reqwest::Client,
    url: &url::Url,
    token: &str,
    since: u64,
) -> Result<Vec<Frame>> {
    let mut url = url.clone();
    url.query_pairs_mut().append_pair("since", &since.to_string());

    let response = client
        .get(url)
        .bearer_auth(token)
        .send()
        .await
        .map_err(|e| SyncError::Transport(format!("Long poll failed: {}", e)))?;

    if !response.status().is_success() {
        return Err(SyncError::Transport(format!(
            "Long poll failed with status {}",
            response.status()
        )));
    }

    response
        .json::<Vec<Frame>>()
        .await
        .map_err(|e| SyncError::Transport(format!("Invalid long poll response: {}", e)))
}

#[async_trait]
impl Transport for LongPollTransport {
    async fn open(&self, token: &str) -> Result<Box<dyn TransportStream>> {
        // The first poll doubles as the handshake
        let frames = poll_once(&self.client, &self.url, token, 0).await?;

        let mut stream = LongPollStream {
            client: self.client.clone(),
            url: self.url.clone(),
            token: token.to_string(),
            since: 0,
            pending: VecDeque::new(),
            idle_delay: EMPTY_POLL_DELAY,
        };
        stream.enqueue(frames);
        Ok(Box::new(stream))
    }
}

struct LongPollStream {
    client: reqwest::Client,
    url: url::Url,
    token: String,
    since: u64,
    pending: VecDeque<Frame>,
    idle_delay: Duration,
}

impl LongPollStream {
    fn enqueue(&mut self, frames: Vec<Frame>) {
        for frame in frames {
            if let Some(sequence) = frame.sequence {
                self.since = self.since.max(sequence);
            }
            self.pending.push_back(frame);
        }
    }
}

#[async_trait]
impl TransportStream for LongPollStream {
    fn kind(&self) -> TransportKind {
        TransportKind::LongPoll
    }

    async fn next_frame(&mut self) -> Result<Option<Frame>> {
        // The server holds each request open until it has events or times out
        while self.pending.is_empty() {
            let frames = poll_once(&self.client, &self.url, &self.token, self.since).await?;
            if frames.is_empty() {
                tokio::time::sleep(self.idle_delay).await;
            }
            self.enqueue(frames);
        }
        Ok(self.pending.pop_front())
    }
}
