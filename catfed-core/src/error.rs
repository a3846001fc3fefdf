//! Endpoint error types with clear, actionable messages

use thiserror::Error;

/// Result alias used by every manager operation
pub type Result<T> = std::result::Result<T, FederationError>;

/// Errors surfaced by the federation endpoint managers
#[derive(Error, Debug)]
pub enum FederationError {
    /// The filter expression could not be parsed
    #[error("Invalid query at offset {offset}: {message}")]
    InvalidQuery { message: String, offset: usize },

    /// The backing catalog cannot be reached; callers may retry with backoff
    #[error("Catalog unavailable: {reason}")]
    CatalogUnavailable { reason: String },

    /// The record behind a result graph no longer exists
    #[error("Record not found: {id}\n\nThe result graph refers to a record that was removed after the query ran.")]
    RecordNotFound { id: String },

    /// Upload to the delivery sink failed after exhausting retries
    #[error("Delivery of '{filename}' failed after {attempts} attempt(s): {reason}")]
    DeliveryFailed {
        filename: String,
        attempts: u32,
        reason: String,
    },

    /// Another upload to the same filename is in flight or already done
    #[error("Conflicting delivery: '{filename}' is already being uploaded or was already delivered")]
    ConflictingDelivery { filename: String },

    /// A callback target did not answer its ping or exhausted its attempts
    #[error("Callback unreachable: {target}: {reason}")]
    CallbackUnreachable { target: String, reason: String },

    /// The order request failed validation
    #[error("Invalid order: {reason}")]
    InvalidOrder { reason: String },

    /// Building the order package failed
    #[error("Failed to build order package '{filename}'")]
    Packaging {
        filename: String,
        #[source]
        source: std::io::Error,
    },

    /// A result graph lacks its identifier or status, or its structure is broken
    #[error("Malformed result graph: {reason}")]
    MalformedGraph { reason: String },
}

impl FederationError {
    pub fn invalid_query(message: impl Into<String>, offset: usize) -> Self {
        Self::InvalidQuery {
            message: message.into(),
            offset,
        }
    }

    /// Only a catalog outage is worth retrying; every other failure is
    /// either permanent or already went through its own retry budget.
    pub fn is_retryable(&self) -> bool {
        matches!(self, FederationError::CatalogUnavailable { .. })
    }

    /// Log sink-facing failures under the `delivery` target
    pub fn log_if_delivery_failure(&self) {
        match self {
            FederationError::DeliveryFailed { .. }
            | FederationError::ConflictingDelivery { .. } => {
                tracing::error!(target: "delivery", "DELIVERY FAILURE: {}", self);
            }
            _ => {}
        }
    }
}
