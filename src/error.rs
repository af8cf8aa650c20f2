use thiserror::Error;

/// Portal sync errors
#[derive(Debug, Error)]
pub enum SyncError {
    /// Configuration file errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Live channel errors (connect, stream, close)
    #[error("Transport error: {0}")]
    Transport(String),

    /// Resource fetch errors (initial load, poll, refresh)
    #[error("Fetch error: {0}")]
    Fetch(String),

    /// Validation errors (file metadata, names, etc.)
    #[error("Validation error: {0}")]
    Validation(String),

    /// Upload item state machine violations
    #[error("Invalid transition: {0}")]
    InvalidTransition(String),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// HTTP request errors
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Endpoint URL errors
    #[error("URL error: {0}")]
    Url(#[from] url::ParseError),

    /// Mutex poison error
    #[error("Lock poisoned: {0}")]
    LockPoisoned(String),

    /// Generic error with context
    #[error("{0}")]
    Other(String),
}

pub type Result<T> = std::result::Result<T, SyncError>;

/// Errors end up as human-readable state (`error` fields), so they convert to String
impl From<SyncError> for String {
    fn from(err: SyncError) -> String {
        err.to_string()
    }
}

impl From<Box<dyn std::error::Error>> for SyncError {
    fn from(err: Box<dyn std::error::Error>) -> Self {
        SyncError::Other(err.to_string())
    }
}

impl<T> From<std::sync::PoisonError<T>> for SyncError {
    fn from(err: std::sync::PoisonError<T>) -> Self {
        SyncError::LockPoisoned(err.to_string())
    }
}

/// Helper trait for adding context to errors
pub trait ErrorContext<T> {
    fn context(self, msg: &str) -> Result<T>;
}

impl<T, E: Into<SyncError>> ErrorContext<T> for std::result::Result<T, E> {
    fn context(self, msg: &str) -> Result<T> {
        self.map_err(|e| {
            let err: SyncError = e.into();
            match err {
                SyncError::Config(s) => SyncError::Config(format!("{}: {}", msg, s)),
                SyncError::Transport(s) => SyncError::Transport(format!("{}: {}", msg, s)),
                SyncError::Fetch(s) => SyncError::Fetch(format!("{}: {}", msg, s)),
                SyncError::Validation(s) => SyncError::Validation(format!("{}: {}", msg, s)),
                SyncError::InvalidTransition(s) => {
                    SyncError::InvalidTransition(format!("{}: {}", msg, s))
                }
                SyncError::LockPoisoned(s) => SyncError::LockPoisoned(format!("{}: {}", msg, s)),
                SyncError::Other(s) => SyncError::Other(format!("{}: {}", msg, s)),
                other @ (SyncError::Io(_)
                | SyncError::Json(_)
                | SyncError::Http(_)
                | SyncError::Url(_)) => other,
            }
        })
    }
}
