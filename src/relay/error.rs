use crate::session::SessionError;
use crate::store::StoreError;
use thiserror::Error;

/// Error kinds surfaced to clients through acks. The `Display` form is the
/// wire-visible message.
#[derive(Error, Debug)]
pub enum RelayError {
    #[error("Invalid passphrase")]
    InvalidPassphrase,

    #[error("Session not found")]
    SessionNotFound,

    #[error("Not joined to this session")]
    NotInSession,

    #[error("Invalid session token")]
    InvalidSessionToken,

    #[error("Content not found")]
    NotFound,

    #[error("{0}")]
    InvalidArgument(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<StoreError> for RelayError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound(_) => RelayError::NotFound,
            StoreError::InvalidArgument(msg) => RelayError::InvalidArgument(msg),
            StoreError::ChunksMissing { .. } => RelayError::InvalidArgument(err.to_string()),
            other => RelayError::Storage(other.to_string()),
        }
    }
}

impl From<SessionError> for RelayError {
    fn from(err: SessionError) -> Self {
        match err {
            SessionError::InvalidPassphrase => RelayError::InvalidPassphrase,
            SessionError::NotFound(_) => RelayError::SessionNotFound,
            SessionError::InvalidArgument(msg) => RelayError::InvalidArgument(msg),
            other => RelayError::Internal(other.to_string()),
        }
    }
}

pub type RelayResult<T> = Result<T, RelayError>;
