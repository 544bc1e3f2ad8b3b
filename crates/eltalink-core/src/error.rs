use std::fmt;

use thiserror::Error;

use eltalink_api::Error as ApiError;

/// Notification category for a failed refresh.
///
/// A pure function of the underlying error kind; each category carries
/// its own user-facing troubleshooting text.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    Connection,
    Authentication,
    Timeout,
    Api,
    Unexpected,
}

impl ErrorCategory {
    pub fn from_error(err: &ApiError) -> Self {
        match err {
            ApiError::Connection { .. } => Self::Connection,
            ApiError::Authentication { .. } => Self::Authentication,
            ApiError::Timeout { .. } => Self::Timeout,
            ApiError::Api { .. } => Self::Api,
            ApiError::InvalidDevice { .. } => Self::Unexpected,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Connection => "connection",
            Self::Authentication => "authentication",
            Self::Timeout => "timeout",
            Self::Api => "api",
            Self::Unexpected => "unexpected",
        }
    }

    /// Troubleshooting steps for a degraded notification body.
    pub fn troubleshooting(&self) -> &'static str {
        match self {
            Self::Connection => {
                "Verify the device is powered on, check network connectivity, \
                 ensure the firewall allows HTTPS traffic, and verify the IP \
                 address and port are correct."
            }
            Self::Authentication => {
                "Verify the PoP credential in the connection settings and \
                 reconfigure the integration if needed."
            }
            Self::Timeout => {
                "Check network latency to the device, verify it is not \
                 overloaded, and try restarting it."
            }
            Self::Api | Self::Unexpected => {
                "Check the device logs for details and try restarting the \
                 integration."
            }
        }
    }
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Top-level error type for the `eltalink-core` crate.
#[derive(Debug, Error)]
pub enum CoreError {
    /// A refresh cycle failed. Carries the user-facing message assembled
    /// by the coordinator plus the original client error.
    #[error("device data update failed: {message}")]
    UpdateFailed {
        category: ErrorCategory,
        message: String,
        #[source]
        source: ApiError,
    },
}
