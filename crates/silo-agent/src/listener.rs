use std::net::SocketAddr;
use std::path::Path;

use serde::{Deserialize, Serialize};
use silo_protocol::Transport;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpListener;
use tracing::{debug, info, warn};

use crate::error::{AgentError, AgentResult};
use crate::message::{AgentFacts, ControlMessage, Packet, DEFAULT_PORT};

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AgentConfig {
    pub bind_addr: SocketAddr,
    /// Hex-encoded public key presented in identify replies.
    pub public_key_hex: String,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([0, 0, 0, 0], DEFAULT_PORT)),
            public_key_hex: String::new(),
        }
    }
}

impl AgentConfig {
    /// Load from a TOML file.
    pub fn from_file(path: &Path) -> AgentResult<Self> {
        let raw = std::fs::read_to_string(path)?;
        toml::from_str(&raw).map_err(|e| AgentError::Config(e.to_string()))
    }

    pub fn public_key(&self) -> AgentResult<Vec<u8>> {
        hex::decode(&self.public_key_hex).map_err(|e| AgentError::Config(e.to_string()))
    }
}

/// The agent side of the control-plane: answers `Ping` and `Identify` on
/// every accepted connection.
pub struct AgentListener {
    config: AgentConfig,
}

impl AgentListener {
    pub fn new(config: AgentConfig) -> Self {
        Self { config }
    }

    pub async fn serve(self) -> AgentResult<()> {
        let listener = TcpListener::bind(self.config.bind_addr).await?;
        info!("silo agent listening on {}", self.config.bind_addr);
        self.serve_on(listener).await
    }

    pub async fn serve_on(self, listener: TcpListener) -> AgentResult<()> {
        let public_key = self.config.public_key()?;
        loop {
            let (stream, peer) = listener.accept().await?;
            debug!(%peer, "control connection accepted");
            let facts = AgentFacts::gather(public_key.clone());
            tokio::spawn(async move {
                match respond(stream, facts).await {
                    Ok(()) => debug!(%peer, "control session closed"),
                    Err(e) => warn!(%peer, "control session failed: {e}"),
                }
            });
        }
    }
}

/// Answer probes on one stream until it closes.
///
/// Replies carry the correlation ID of the packet that prompted them and may
/// be interleaved with other exchanges on the same stream; the prober's
/// multiplexer sorts them out.
pub async fn respond<S>(stream: S, facts: AgentFacts) -> AgentResult<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut transport = Transport::new(stream);
    while let Some(packet) = transport.recv::<Packet>().await? {
        let reply = match packet.body {
            ControlMessage::Ping { timestamp_millis } => {
                Packet::reply_to(packet.id, ControlMessage::Ping { timestamp_millis })
            }
            ControlMessage::Identify { .. } => {
                Packet::reply_to(packet.id, ControlMessage::IdentifyReply(facts.clone()))
            }
            // A reply arriving at the agent is a protocol violation.
            ControlMessage::IdentifyReply(_) => {
                return Err(AgentError::UnexpectedReply {
                    expected: "Ping or Identify",
                    actual: "IdentifyReply",
                });
            }
        };
        transport.send(&reply).await?;
    }
    Ok(())
}
