use super::types::EventSequence;
use chrono::{DateTime, Utc};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::broadcast;

/// A published event stamped with its bus sequence and publish time
#[derive(Debug, Clone)]
pub struct Envelope<T> {
    pub sequence: EventSequence,
    pub timestamp: DateTime<Utc>,
    pub payload: T,
}

pub type EventReceiver<T> = broadcast::Receiver<Envelope<T>>;

/// Fan-out bus; every subscriber sees every event published after it subscribed
#[derive(Debug)]
pub struct EventBus<T> {
    sender: broadcast::Sender<Envelope<T>>,
    sequence: Arc<AtomicU64>,
}

// Manual impl: derive would require `T: Clone` for the bus handle itself
impl<T> Clone for EventBus<T> {
    fn clone(&self) -> Self {
        Self {
            sender: self.sender.clone(),
            sequence: Arc::clone(&self.sequence),
        }
    }
}

impl<T: Clone + Send + 'static> EventBus<T> {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self {
            sender,
            sequence: Arc::new(AtomicU64::new(1)),
        }
    }

    /// Publish an event, returning its sequence number
    ///
    /// Fails only when nobody is subscribed; the sequence is consumed either way.
    pub fn publish(&self, payload: T) -> Result<EventSequence, String> {
        let sequence = self.sequence.fetch_add(1, Ordering::SeqCst);

        let envelope = Envelope {
            sequence,
            timestamp: Utc::now(),
            payload,
        };

        self.sender
            .send(envelope)
            .map(|_| sequence)
            .map_err(|e| format!("Failed to publish event: {}", e))
    }

    pub fn subscribe(&self) -> EventReceiver<T> {
        self.sender.subscribe()
    }

    /// Sequence the next published event will get
    pub fn current_sequence(&self) -> EventSequence {
        self.sequence.load(Ordering::SeqCst)
    }

    pub fn receiver_count(&self) -> usize {
        self.sender.receiver_count()
    }
}
