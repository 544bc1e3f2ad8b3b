use thiserror::Error;

/// Top-level error type for the `eltalink-api` crate.
///
/// One variant per failure class the controller can produce:
/// rejected credentials, transport failures, request timeouts, unexpected
/// API responses, and malformed caller-supplied device identifiers.
/// `eltalink-core` maps these into user-facing diagnostics.
#[derive(Debug, Error)]
pub enum Error {
    /// Login rejected (bad PoP credential) or token refused by the device.
    #[error("authentication failed: {message}")]
    Authentication { message: String },

    /// Transport-level failure (connection refused, DNS, TLS), after any
    /// local retries have been exhausted.
    #[error("connection error: {message}")]
    Connection { message: String },

    /// Request deadline exceeded, after any local retries have been exhausted.
    #[error("request timed out: {message}")]
    Timeout { message: String },

    /// Unexpected status code or malformed payload from the API.
    #[error("API error: {message}")]
    Api { status: Option<u16>, message: String },

    /// Caller-supplied device identifier is malformed.
    #[error("invalid device: {message}")]
    InvalidDevice { message: String },
}

impl Error {
    /// The HTTP status carried by an [`Api`](Self::Api) error, if any.
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Api { status, .. } => *status,
            _ => None,
        }
    }

    /// Returns `true` if re-authenticating might resolve this error.
    pub fn is_auth(&self) -> bool {
        matches!(self, Self::Authentication { .. })
    }
}
