use std::time::Duration;

use http::StatusCode;
use thiserror::Error;

/// Failure of a client operation.
///
/// Values are `Clone` so a single outcome can be handed to every caller
/// that joined a coalesced operation.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ClientError {
    /// Token does not have the `header.payload.signature` shape or its
    /// payload carries no usable `exp` claim
    #[error("invalid token format: {0}")]
    InvalidTokenFormat(String),

    /// Refresh endpoint rejected the session or could not be reached
    #[error("token refresh failed: {0}")]
    RefreshFailed(String),

    /// 401/403 after the single recovery attempt
    #[error("unauthorized ({status}): {message}")]
    Unauthorized { status: StatusCode, message: String },

    /// Attempt exceeded its deadline
    #[error("request timed out after {0:?}")]
    Timeout(Duration),

    /// No endpoint in the configured set responded
    #[error("network unreachable: {0}")]
    NetworkUnreachable(String),

    /// Non-2xx response carrying a server-supplied message
    #[error("server error ({status}): {message}")]
    ServerError {
        status: StatusCode,
        message: String,
        errors: Option<Vec<serde_json::Value>>,
    },

    /// Persisted credential storage failed
    #[error("credential storage error: {0}")]
    Storage(String),
}

impl ClientError {
    /// Message suitable for showing to an end user.
    pub fn user_message(&self) -> String {
        match self {
            ClientError::Timeout(_) => {
                "The server is taking too long to respond. Please check your internet connection and try again.".to_owned()
            }
            ClientError::NetworkUnreachable(_) => {
                "Unable to reach the server. Please check your internet connection and try again.".to_owned()
            }
            ClientError::Unauthorized { .. } | ClientError::RefreshFailed(_) => {
                "Your session has expired. Please sign in again.".to_owned()
            }
            ClientError::InvalidTokenFormat(_) => {
                "Received an invalid session from the server. Please sign in again.".to_owned()
            }
            ClientError::ServerError { message, .. } => message.to_owned(),
            ClientError::Storage(_) => "Unable to access saved session data.".to_owned(),
        }
    }

    pub fn status(&self) -> Option<StatusCode> {
        match self {
            ClientError::Unauthorized { status, .. } | ClientError::ServerError { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// Transport problems leave the session untouched.
    pub fn is_transport(&self) -> bool {
        matches!(self, ClientError::Timeout(_) | ClientError::NetworkUnreachable(_))
    }
}

/// Map a reqwest failure onto the transport half of the taxonomy.
pub(crate) fn from_transport(err: &reqwest::Error, timeout: Duration) -> ClientError {
    if err.is_timeout() {
        ClientError::Timeout(timeout)
    } else {
        ClientError::NetworkUnreachable(err.to_string())
    }
}
