//! Import failure classification.
//!
//! Failures are never retried automatically (retry is a user action), but
//! the class decides how loudly a failure is logged and what the UI hints.

/// Error classification for a failed import
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorType {
    /// Client errors (400-499) - the file or request is wrong, a retry will fail again
    Client,
    /// Server errors (500-599) - temporary issues, a retry may succeed
    Server,
    /// Network errors - connection issues, a retry may succeed
    Network,
}

impl ErrorType {
    pub fn is_retryable(self) -> bool {
        self != ErrorType::Client
    }
}

/// Classify an error message into an ErrorType
pub fn classify_error(error: &str) -> ErrorType {
    if error.contains("status 400")
        || error.contains("Bad Request")
        || error.contains("status 401")
        || error.contains("Unauthorized")
        || error.contains("status 403")
        || error.contains("Forbidden")
        || error.contains("status 404")
        || error.contains("Not Found")
        || error.contains("status 413")
        || error.contains("status 415")
        || error.contains("status 422")
        || error.contains("validation failed")
        || error.contains("invalid input")
    {
        return ErrorType::Client;
    }

    if error.contains("status 5")
        || error.contains("Internal Server Error")
        || error.contains("Service Unavailable")
        || error.contains("Gateway Timeout")
    {
        return ErrorType::Server;
    }

    // Connection issues, timeouts, etc.
    ErrorType::Network
}
