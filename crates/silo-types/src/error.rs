use thiserror::Error;

/// Errors from parsing or constructing foundation types.
#[derive(Debug, Error)]
pub enum TypeError {
    #[error("invalid hex: {0}")]
    InvalidHex(String),

    #[error("invalid length: expected {expected} bytes, got {actual}")]
    InvalidLength { expected: usize, actual: usize },

    #[error("invalid transaction id: {0}")]
    InvalidTransactionId(String),
}
