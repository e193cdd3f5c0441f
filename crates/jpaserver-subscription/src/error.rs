//! Subscription error types.

use jpaserver_core::CoreError;
use jpaserver_search::SearchError;
use thiserror::Error;

/// Result type for subscription operations.
pub type SubscriptionResult<T> = Result<T, SubscriptionError>;

/// A frame or close could not be written to the client.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Transport write failed: {message}")]
pub struct TransportWriteError {
    message: String,
}

impl TransportWriteError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    /// The outbound side of the connection is gone.
    pub fn closed() -> Self {
        Self::new("connection closed")
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

/// Errors that can occur while binding, polling or delivering.
#[derive(Debug, Error)]
pub enum SubscriptionError {
    /// Bind request without a usable subscription id
    #[error("Invalid bind request: {0}")]
    InvalidBindRequest(String),

    /// Bind request naming a subscription that does not exist
    #[error("Unknown subscription: {0}")]
    UnknownSubscription(String),

    /// A subscription failed validation when persisted
    #[error("{0}")]
    PersistenceValidation(String),

    /// Operation not allowed in the current session state
    #[error("Invalid session state: {0}")]
    InvalidState(String),

    /// Outbound frame could not be written
    #[error("{0}")]
    Transport(#[from] TransportWriteError),

    #[error("{0}")]
    Search(#[from] SearchError),

    #[error("{0}")]
    Core(#[from] CoreError),
}

impl SubscriptionError {
    pub fn invalid_state(message: impl Into<String>) -> Self {
        Self::InvalidState(message.into())
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::PersistenceValidation(message.into())
    }
}
