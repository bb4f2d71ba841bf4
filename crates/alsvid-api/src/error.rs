//! Error types for the API layer.

use thiserror::Error;

/// Result type for API operations.
pub type ApiResult<T> = Result<T, ApiError>;

/// Errors that can occur in the settings, authentication, and HTTP layers.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ApiError {
    /// Settings file missing, unreadable, or malformed.
    #[error("Configuration error: {0}")]
    Config(String),

    /// An operation addressed a host with no entry in the settings.
    #[error("Host not configured: {0}")]
    HostNotConfigured(String),

    /// Device flow denied or expired, or the refresh token was rejected.
    /// The session is over; a new device-flow login is required.
    #[error("Authorisation error: {0}")]
    Authorisation(String),

    /// Transport-level failure (timeout, connection reset, DNS).
    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    /// The response body did not match the expected wire contract.
    #[error("Protocol error at {endpoint}: {message}")]
    Protocol {
        /// URL whose response failed to decode.
        endpoint: String,
        /// Decoder message.
        message: String,
    },

    /// The server answered with a non-success status.
    #[error("API error ({status}): {message}")]
    Api {
        /// HTTP status code.
        status: u16,
        /// Response body, verbatim.
        message: String,
    },
}
