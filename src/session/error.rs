use thiserror::Error;

#[derive(Error, Debug)]
pub enum SessionError {
    #[error("Invalid passphrase")]
    InvalidPassphrase,

    #[error("Session not found: {0}")]
    NotFound(String),

    #[error("{0}")]
    InvalidArgument(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<sqlx::Error> for SessionError {
    fn from(err: sqlx::Error) -> Self {
        SessionError::Database(err.to_string())
    }
}

pub type SessionResult<T> = Result<T, SessionError>;
