use silo_protocol::ProtocolError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AgentError {
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("liveness probe timed out")]
    ProbeTimeout,

    #[error("unexpected reply: expected {expected}, got {actual}")]
    UnexpectedReply {
        expected: &'static str,
        actual: &'static str,
    },

    #[error("configuration error: {0}")]
    Config(String),
}

impl AgentError {
    /// Transient failures are retried by the supervised session loop;
    /// anything else aborts it.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::Io(_)
                | Self::ProbeTimeout
                | Self::Protocol(ProtocolError::ConnectionClosed)
                | Self::Protocol(ProtocolError::Io(_))
        )
    }
}

pub type AgentResult<T> = Result<T, AgentError>;
