use silo_types::TransactionId;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ServerError {
    #[error("protocol error: {0}")]
    Protocol(#[from] silo_protocol::ProtocolError),

    #[error("store error: {0}")]
    Store(#[from] silo_store::StoreError),

    #[error("lock error: {0}")]
    Lock(#[from] silo_lock::LockError),

    #[error("transaction not found: {0}")]
    TransactionNotFound(TransactionId),

    #[error("repository is locked by {holder}")]
    LockHeld { holder: String },

    #[error("lock expired before publish; commit aborted")]
    LockExpired,

    #[error("configuration error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type ServerResult<T> = Result<T, ServerError>;
