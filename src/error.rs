//! Error types for the servicecreator controller
//!
//! Errors are classified at the point of origin: the worker only needs to know
//! whether an item should be retried or dropped, so every variant answers
//! [`Error::is_retryable`].

use thiserror::Error;

/// Main error type for servicecreator operations
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// Kubernetes API error
    #[error("kubernetes error: {0}")]
    Kube(#[from] kube::Error),

    /// The exposure annotation does not hold a usable port number
    #[error("invalid port {value:?} for {key}: {reason}")]
    InvalidPort {
        /// `namespace/name` of the Deployment carrying the annotation
        key: String,
        /// The raw annotation value
        value: String,
        /// Why the value was rejected
        reason: String,
    },

    /// The local Deployment cache never finished its initial list
    #[error("cache sync error: {0}")]
    CacheSync(String),

    /// Configuration or client construction error
    #[error("configuration error: {0}")]
    Config(String),
}

impl Error {
    /// Create an invalid port error
    pub fn invalid_port(
        key: impl Into<String>,
        value: impl Into<String>,
        reason: impl Into<String>,
    ) -> Self {
        Self::InvalidPort {
            key: key.into(),
            value: value.into(),
            reason: reason.into(),
        }
    }

    /// Create a cache sync error with the given message
    pub fn cache_sync(msg: impl Into<String>) -> Self {
        Self::CacheSync(msg.into())
    }

    /// Create a configuration error with the given message
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Whether retrying the same work item can succeed later.
    ///
    /// A malformed port never becomes valid by waiting, so it is terminal.
    /// API errors are assumed transient.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Kube(_) => true,
            Self::InvalidPort { .. } => false,
            Self::CacheSync(_) => false,
            Self::Config(_) => false,
        }
    }
}

/// Returns true if the API server answered 404 Not Found
pub fn is_not_found(err: &kube::Error) -> bool {
    matches!(err, kube::Error::Api(ae) if ae.code == 404)
}

/// Returns true if the API server rejected a create because the object exists
pub fn is_already_exists(err: &kube::Error) -> bool {
    matches!(err, kube::Error::Api(ae) if ae.code == 409 && ae.reason == "AlreadyExists")
}
