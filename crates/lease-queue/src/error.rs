//! Error types for queue operations.

use crate::message::{MessageId, QueueName};
use thiserror::Error;

/// Comprehensive error type for all queue operations
#[derive(Debug, Error)]
pub enum QueueError {
    #[error("Queue not found: {queue_name}")]
    QueueNotFound { queue_name: QueueName },

    #[error("Queue already exists: {queue_name}")]
    QueueAlreadyExists { queue_name: QueueName },

    /// The presented lease token does not admit the operation.
    ///
    /// Deliberately carries no reason: a deleted message, a wrong token and a
    /// lease that was reassigned to another consumer all look the same.
    #[error("Lease token rejected for message {message_id}")]
    LeaseRejected { message_id: MessageId },

    #[error("Permission denied for operation: {operation}")]
    PermissionDenied { operation: String },

    #[error("Invalid argument: {0}")]
    InvalidArgument(#[from] ValidationError),

    #[error("Configuration error: {0}")]
    ConfigurationError(#[from] ConfigurationError),
}

impl QueueError {
    /// Classify the error for the transport layer
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::QueueNotFound { .. } => ErrorKind::NotFound,
            Self::QueueAlreadyExists { .. } => ErrorKind::AlreadyExists,
            Self::LeaseRejected { .. } => ErrorKind::Fencing,
            Self::PermissionDenied { .. } => ErrorKind::Authorization,
            Self::InvalidArgument(_) => ErrorKind::InvalidArgument,
            Self::ConfigurationError(_) => ErrorKind::Configuration,
        }
    }
}

/// Coarse error classification shared with the transport layer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    NotFound,
    AlreadyExists,
    Fencing,
    InvalidArgument,
    Authorization,
    Configuration,
}

/// Configuration errors
#[derive(Debug, Error)]
pub enum ConfigurationError {
    #[error("Invalid configuration: {message}")]
    Invalid { message: String },

    #[error("Configuration parsing failed: {message}")]
    Parsing { message: String },
}

impl From<::config::ConfigError> for ConfigurationError {
    fn from(err: ::config::ConfigError) -> Self {
        Self::Parsing {
            message: err.to_string(),
        }
    }
}

/// Validation errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("Required field missing: {field}")]
    Required { field: String },

    #[error("Invalid format for {field}: {message}")]
    InvalidFormat { field: String, message: String },

    #[error("Value out of range for {field}: {message}")]
    OutOfRange { field: String, message: String },

    #[error("Too many entries for {field}: {count} (max: {max})")]
    TooMany {
        field: String,
        count: usize,
        max: usize,
    },
}

#[cfg(test)]
#[path = "error_tests.rs"]
mod tests;
