//! Error types for the enrollment orchestrator.

use crate::retry::RetryPolicy;
use crate::wizard::Field;

/// Display text used when a failure carries no structured message.
pub const UNKNOWN_ERROR_MESSAGE: &str = "An unknown error occurred. Please try again.";

/// Configuration-related errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },
}

/// Hand-off store errors.
#[derive(Debug, thiserror::Error)]
pub enum DatabaseError {
    #[error("Connection pool error: {0}")]
    Pool(String),

    #[error("Query failed: {0}")]
    Query(String),

    #[error("Migration failed: {0}")]
    Migration(String),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

/// A local, pre-network validation failure. Blocks a step transition.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{message}")]
pub struct ValidationError {
    /// The field the message belongs to, when there is one.
    pub field: Option<Field>,
    pub message: String,
}

impl ValidationError {
    pub fn field(field: Field, message: impl Into<String>) -> Self {
        Self {
            field: Some(field),
            message: message.into(),
        }
    }

    pub fn general(message: impl Into<String>) -> Self {
        Self {
            field: None,
            message: message.into(),
        }
    }
}

/// Raw failure of a remote call, before classification.
///
/// `status` is `None` for pure transport failures (connect, timeout, DNS).
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("remote call failed (status {status:?}): {message}")]
pub struct CallError {
    pub status: Option<u16>,
    pub message: String,
}

impl CallError {
    pub fn transport(message: impl Into<String>) -> Self {
        Self {
            status: None,
            message: message.into(),
        }
    }

    pub fn status(status: u16, message: impl Into<String>) -> Self {
        Self {
            status: Some(status),
            message: message.into(),
        }
    }

    /// Whether the policy allows another attempt after this failure.
    pub fn is_retryable(&self, policy: &RetryPolicy) -> bool {
        match self.status {
            Some(status) => !policy.non_retryable_statuses.contains(&status),
            None => true,
        }
    }

    /// Classify into the user-facing taxonomy. Called once per call, at the
    /// executor boundary.
    pub fn classify(self, policy: &RetryPolicy) -> EnrollmentError {
        match self.status {
            Some(status)
                if policy.non_retryable_statuses.contains(&status)
                    || (400..500).contains(&status) =>
            {
                EnrollmentError::Client {
                    status,
                    message: self.message,
                }
            }
            status => EnrollmentError::Network {
                status,
                message: self.message,
            },
        }
    }
}

/// User-facing error taxonomy of the enrollment flow.
#[derive(Debug, thiserror::Error)]
pub enum EnrollmentError {
    #[error("Validation failed: {0}")]
    Validation(#[from] ValidationError),

    #[error("Verification failed: {message}")]
    Verification { message: String },

    #[error("Network error (status {status:?}): {message}")]
    Network {
        status: Option<u16>,
        message: String,
    },

    #[error("Request rejected with status {status}: {message}")]
    Client { status: u16, message: String },

    #[error("{operation} is not allowed while {state}")]
    InvalidState { operation: String, state: String },

    #[error("Enrollment session has been disposed")]
    Disposed,

    #[error("Hand-off store error: {0}")]
    Store(#[from] DatabaseError),

    #[error("{}", UNKNOWN_ERROR_MESSAGE)]
    Unknown,
}

impl EnrollmentError {
    /// Text for the error banner.
    pub fn user_message(&self) -> String {
        match self {
            Self::Validation(e) => e.message.clone(),
            Self::Verification { message } => message.clone(),
            Self::Network { .. } => {
                "The server could not be reached. Please try again shortly.".to_string()
            }
            Self::Client { message, .. } if !message.is_empty() => message.clone(),
            Self::InvalidState { .. } | Self::Disposed => self.to_string(),
            Self::Client { .. } | Self::Store(_) | Self::Unknown => {
                UNKNOWN_ERROR_MESSAGE.to_string()
            }
        }
    }

    /// The field an inline message belongs to, if any.
    pub fn field(&self) -> Option<Field> {
        match self {
            Self::Validation(e) => e.field,
            _ => None,
        }
    }
}
