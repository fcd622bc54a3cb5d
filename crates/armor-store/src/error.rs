use std::fmt;

use armor_reconcile::UpstreamStatus;

/// Errors a [`crate::PolicyStore`] implementation may return.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// The provider answered with a non-success HTTP status.
    Api { status: u16, message: String },
    /// A long-running operation finished with an error.
    Operation { status: Option<u16>, message: String },
    /// Network or transport failure.
    Transport(String),
    /// A response payload could not be decoded.
    Decode(String),
}

impl StoreError {
    pub fn api(status: u16, message: impl Into<String>) -> Self {
        StoreError::Api {
            status,
            message: message.into(),
        }
    }

    pub fn not_found(resource: impl fmt::Display) -> Self {
        Self::api(404, format!("The resource '{resource}' was not found"))
    }

    pub fn already_exists(resource: impl fmt::Display) -> Self {
        Self::api(409, format!("The resource '{resource}' already exists"))
    }
}

impl fmt::Display for StoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StoreError::Api { status, message } => {
                write!(f, "provider api error status={status}: {message}")
            }
            StoreError::Operation {
                status: Some(s),
                message,
            } => write!(f, "operation failed status={s}: {message}"),
            StoreError::Operation {
                status: None,
                message,
            } => write!(f, "operation failed: {message}"),
            StoreError::Transport(msg) => write!(f, "transport error: {msg}"),
            StoreError::Decode(msg) => write!(f, "decode error: {msg}"),
        }
    }
}

impl std::error::Error for StoreError {}

impl UpstreamStatus for StoreError {
    fn status(&self) -> Option<u16> {
        match self {
            StoreError::Api { status, .. } => Some(*status),
            StoreError::Operation { status, .. } => *status,
            StoreError::Transport(_) | StoreError::Decode(_) => None,
        }
    }
}
