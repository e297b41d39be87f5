use thiserror::Error;

#[derive(Error, Debug)]
pub enum GraveError {
    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Codec error: {0}")]
    Codec(String),

    #[error("Transaction error: {0}")]
    Transaction(String),

    #[error("Connection error: {0}")]
    Connection(String),

    #[error("World error: {0}")]
    World(String),

    #[error("Presenter error: {0}")]
    Presenter(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Tombstone {0} not found")]
    NotFound(i64),

    #[error("Lock error: {0}")]
    LockError(String),

    #[error("Background worker error: {0}")]
    Worker(String),

    #[error("I/O error: {0}")]
    Io(String),
}

pub type Result<T> = std::result::Result<T, GraveError>;

impl GraveError {
    /// True when retrying on a fresh connection may succeed.
    pub fn is_connection(&self) -> bool {
        matches!(self, GraveError::Connection(_))
    }
}

impl<T> From<std::sync::PoisonError<T>> for GraveError {
    fn from(err: std::sync::PoisonError<T>) -> Self {
        Self::LockError(err.to_string())
    }
}

impl From<std::io::Error> for GraveError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}

impl From<rmp_serde::encode::Error> for GraveError {
    fn from(err: rmp_serde::encode::Error) -> Self {
        Self::Codec(err.to_string())
    }
}

impl From<rmp_serde::decode::Error> for GraveError {
    fn from(err: rmp_serde::decode::Error) -> Self {
        Self::Codec(err.to_string())
    }
}

impl From<tokio_postgres::Error> for GraveError {
    fn from(err: tokio_postgres::Error) -> Self {
        if err.is_closed() {
            Self::Connection(err.to_string())
        } else {
            Self::Storage(err.to_string())
        }
    }
}
