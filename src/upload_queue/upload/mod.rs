//! Import transport for queued files.
//!
//! The processor only sees the `Importer` seam; `HttpImporter` is the
//! multipart implementation used against the portal backend.

pub mod http;
pub mod retry;

pub use http::HttpImporter;
pub use retry::{classify_error, ErrorType};

use async_trait::async_trait;
use std::fmt;

use super::types::{ImportMeta, QueuedFile, Signature};

/// One file handed to an importer
#[derive(Debug, Clone)]
pub struct ImportRequest {
    pub signature: Signature,
    pub display_name: String,
    pub file: QueuedFile,
}

/// Why an import did not produce a result
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImportFailure {
    pub message: String,
    /// Row-level validation failures, when the server reported any
    pub error_details: Vec<String>,
}

impl ImportFailure {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            error_details: Vec::new(),
        }
    }

    pub fn with_details(mut self, details: Vec<String>) -> Self {
        self.error_details = details;
        self
    }
}

impl fmt::Display for ImportFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

impl std::error::Error for ImportFailure {}

#[async_trait]
pub trait Importer: Send + Sync {
    async fn import(&self, request: &ImportRequest) -> Result<ImportMeta, ImportFailure>;
}
