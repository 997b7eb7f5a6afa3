//! Application error types.
//!
//! All errors use `thiserror` for automatic Error trait derivation. Decode and
//! verify failures never escape the inbound pipeline: they are logged and the
//! offending event is dropped. Only request-level failures reach callers.

use thiserror::Error;

/// Application result type.
pub type Result<T> = std::result::Result<T, Error>;

/// Main error enum for the protocol engine.
#[derive(Error, Debug)]
pub enum Error {
    /// Envelope authentication or parse failure at either layer.
    #[error("decryption error: {0}")]
    Decryption(String),

    /// Envelope opened but its contents are inconsistent (id/hash mismatch, wrong kind).
    #[error("malformed envelope: {0}")]
    MalformedEnvelope(String),

    /// Public state event is missing a required tag or carries an unparseable value.
    #[error("incomplete record: {0}")]
    IncompleteRecord(String),

    /// Protocol message whose content does not fit its action.
    #[error("invalid message: {0}")]
    InvalidMessage(String),

    /// No reply arrived within the configured window.
    #[error("request timeout: {0}")]
    RequestTimeout(String),

    /// No relay accepted the published event.
    #[error("publish failure: {0}")]
    PublishFailure(String),

    /// Pending work swept on shutdown.
    #[error("operation cancelled: {0}")]
    Cancelled(String),

    /// Operation needs a signing identity and none is set.
    #[error("no identity configured")]
    NoIdentity,

    /// Operation needs a live transport.
    #[error("not connected: {0}")]
    NotConnected(String),

    /// Caller-supplied input rejected before anything was sent.
    #[error("validation error: {0}")]
    Validation(String),

    /// Configuration could not be read or is inconsistent.
    #[error("config error: {0}")]
    Config(String),

    /// Key parsing, signing or verification failures.
    #[error("crypto error: {0}")]
    Crypto(String),

    /// Serialization/deserialization errors.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// I/O errors.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Whether a caller may reasonably retry the same operation.
    ///
    /// The engine itself never retries.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Error::RequestTimeout(_) | Error::PublishFailure(_))
    }
}

// Convenience constructors
impl Error {
    pub fn decryption(msg: impl Into<String>) -> Self {
        Self::Decryption(msg.into())
    }

    pub fn malformed_envelope(msg: impl Into<String>) -> Self {
        Self::MalformedEnvelope(msg.into())
    }

    pub fn incomplete_record(msg: impl Into<String>) -> Self {
        Self::IncompleteRecord(msg.into())
    }

    pub fn invalid_message(msg: impl Into<String>) -> Self {
        Self::InvalidMessage(msg.into())
    }

    pub fn request_timeout(msg: impl Into<String>) -> Self {
        Self::RequestTimeout(msg.into())
    }

    pub fn publish_failure(msg: impl Into<String>) -> Self {
        Self::PublishFailure(msg.into())
    }

    pub fn cancelled(msg: impl Into<String>) -> Self {
        Self::Cancelled(msg.into())
    }

    pub fn not_connected(msg: impl Into<String>) -> Self {
        Self::NotConnected(msg.into())
    }

    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    pub fn crypto(msg: impl Into<String>) -> Self {
        Self::Crypto(msg.into())
    }
}

impl From<hex::FromHexError> for Error {
    fn from(err: hex::FromHexError) -> Self {
        Error::Crypto(format!("hex decode: {}", err))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_timeouts_and_publish_failures_are_retryable() {
        assert!(Error::request_timeout("req 1").is_retryable());
        assert!(Error::publish_failure("0 relays").is_retryable());
        assert!(!Error::decryption("bad tag").is_retryable());
        assert!(!Error::NoIdentity.is_retryable());
        assert!(!Error::cancelled("shutdown").is_retryable());
    }

    #[test]
    fn test_display_carries_context() {
        let err = Error::incomplete_record("missing tag f");
        assert_eq!(err.to_string(), "incomplete record: missing tag f");
    }
}
