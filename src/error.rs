//! Error types

use thiserror::Error;

/// Errors from the persisted key-value store
#[derive(Debug, Error)]
pub enum StoreError {
    /// Backend failure (connection lost, command rejected, ...)
    #[error("state store error: {0}")]
    Backend(String),
    /// Error during serialization/deserialization of a persisted value
    #[error("serialization error: {0}")]
    Serialization(String),
}

#[cfg(feature = "redis-store")]
impl From<redis::RedisError> for StoreError {
    fn from(err: redis::RedisError) -> Self {
        StoreError::Backend(err.to_string())
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(err: serde_json::Error) -> Self {
        StoreError::Serialization(err.to_string())
    }
}

/// Transport-level errors talking to the storefront API
#[derive(Debug, Error)]
pub enum ApiError {
    /// The request exceeded the configured timeout
    #[error("request timed out")]
    Timeout,
    /// Connection refused, DNS failure, reset, ...
    #[error("network error: {0}")]
    Network(String),
    /// The server rejected the credentials or token
    #[error("unauthorized")]
    Unauthorized,
    /// Resource not found
    #[error("not found: {0}")]
    NotFound(String),
    /// Any other non-success status
    #[error("server error ({status}): {message}")]
    Http { status: u16, message: String },
    /// The response body could not be decoded
    #[error("parse error: {0}")]
    Parse(String),
}

impl ApiError {
    /// Whether the failure is worth retrying later (offline, timeout, 5xx).
    pub fn is_transient(&self) -> bool {
        match self {
            ApiError::Timeout | ApiError::Network(_) => true,
            ApiError::Http { status, .. } => *status >= 500,
            _ => false,
        }
    }
}

impl From<reqwest::Error> for ApiError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            ApiError::Timeout
        } else if err.is_decode() {
            ApiError::Parse(err.to_string())
        } else {
            ApiError::Network(err.to_string())
        }
    }
}

/// Errors surfaced by sign-in and sign-up
#[derive(Debug, Error)]
pub enum AuthError {
    /// Unknown user, wrong password, or missing credentials
    #[error("invalid credentials: {0}")]
    InvalidCredentials(String),
    /// The auth endpoint could not be reached or failed internally
    #[error("server unavailable: {0}")]
    ServerUnavailable(String),
    /// The auth request timed out
    #[error("sign-in timed out")]
    Timeout,
    /// The server refused the request (validation failure, duplicate account)
    #[error("request rejected ({status}): {message}")]
    Rejected { status: u16, message: String },
    /// Persisting the new session failed
    #[error(transparent)]
    Storage(#[from] StoreError),
}

impl From<ApiError> for AuthError {
    fn from(err: ApiError) -> Self {
        match err {
            ApiError::Timeout => AuthError::Timeout,
            ApiError::Unauthorized => AuthError::InvalidCredentials("invalid password".to_string()),
            ApiError::NotFound(_) => AuthError::InvalidCredentials("user not found".to_string()),
            ApiError::Http { status, message } if (400..500).contains(&status) => {
                AuthError::Rejected { status, message }
            }
            other => AuthError::ServerUnavailable(other.to_string()),
        }
    }
}

/// Errors from cart and order operations
#[derive(Debug, Error)]
pub enum CartError {
    /// No active session; the caller should prompt for sign-in
    #[error("please sign in to modify your bag")]
    NotAuthenticated,
    /// Persisting the cart failed
    #[error(transparent)]
    Storage(#[from] StoreError),
    /// Remote call failed (orders only; cart saves are queued instead)
    #[error(transparent)]
    Api(#[from] ApiError),
}

/// Errors surfaced by an explicit sync
#[derive(Debug, Error)]
pub enum SyncError {
    /// No active session
    #[error("no user signed in")]
    NotAuthenticated,
    /// The round trip to the server failed
    #[error("sync failed: {0}")]
    Network(#[from] ApiError),
    /// Persisting the synced cart failed
    #[error(transparent)]
    Storage(#[from] StoreError),
}
