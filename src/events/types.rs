use crate::upload_queue::{Signature, UploadStatus};
use serde::{Deserialize, Serialize};

/// Sequence number for ordering events
pub type EventSequence = u64;

/// Push channel carrying fresh dashboard aggregates
pub const PUSH_DASHBOARD: &str = "dashboard:update";

/// Push channel carrying subscription state
pub const PUSH_SUBSCRIPTION: &str = "subscription:update";

/// Push channel carrying billing changes (same shape as subscription state)
pub const PUSH_BILLING: &str = "billing:update";

/// Everything the connection manager tells its subscribers
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum LiveEvent {
    Connected,

    Disconnected {
        reason: String,
    },

    /// The transport could not be opened at all
    ConnectError {
        error: String,
    },

    /// Application-level push (`dashboard:update`, ...)
    Push {
        channel: String,
        payload: serde_json::Value,
        /// Server-assigned ordering key, when the server sends one
        server_sequence: Option<u64>,
    },
}

impl LiveEvent {
    pub fn event_type(&self) -> &str {
        match self {
            LiveEvent::Connected => "connect",
            LiveEvent::Disconnected { .. } => "disconnect",
            LiveEvent::ConnectError { .. } => "connect_error",
            LiveEvent::Push { channel, .. } => channel,
        }
    }
}

/// Upload queue mutations, in the order they were applied
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum QueueEvent {
    Admitted {
        id: String,
        signature: Signature,
    },

    /// Admission skipped because the signature is already queued
    Duplicate {
        signature: Signature,
    },

    /// An existing item was swapped out under `DuplicatePolicy::Replace`
    Replaced {
        id: String,
        signature: Signature,
    },

    Removed {
        signature: Signature,
    },

    StatusChanged {
        id: String,
        signature: Signature,
        from: UploadStatus,
        to: UploadStatus,
    },

    Renamed {
        id: String,
        display_name: String,
    },

    Cleared {
        count: usize,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_live_event_types() {
        assert_eq!(LiveEvent::Connected.event_type(), "connect");
        assert_eq!(
            LiveEvent::Disconnected {
                reason: "transport close".to_string()
            }
            .event_type(),
            "disconnect"
        );
        let push = LiveEvent::Push {
            channel: PUSH_DASHBOARD.to_string(),
            payload: serde_json::json!({}),
            server_sequence: None,
        };
        assert_eq!(push.event_type(), "dashboard:update");
    }

    #[test]
    fn test_live_event_serialization_is_tagged() {
        let json = serde_json::to_value(LiveEvent::ConnectError {
            error: "refused".to_string(),
        })
        .unwrap();
        assert_eq!(json["type"], "connect_error");
        assert_eq!(json["error"], "refused");
    }
}
