//! Agent control-plane for Silo.
//!
//! A deliberately small protocol (`Ping` echo and `Identify`) that
//! exercises the asynchronous side of the wire layer: every request carries
//! its own correlation ID and any number may be in flight at once, so a
//! liveness probe is never stuck behind a slow identify.
//!
//! The agent side is [`AgentListener`], answering probes on port 8081 by
//! default. The monitoring side is [`Monitor`]: a supervised session loop
//! that identifies the agent once, then pings every ten seconds, and
//! reconnects after a fixed delay when the session fails, discarding all
//! in-flight state. That whole-session retry is a property of this plane
//! only; the repository RPC never retries on its own.

pub mod error;
pub mod listener;
pub mod message;
pub mod monitor;

pub use error::{AgentError, AgentResult};
pub use listener::{AgentConfig, AgentListener};
pub use message::{AgentFacts, ControlMessage, Packet, CONTROL_PROTOCOL_VERSION, DEFAULT_PORT};
pub use monitor::{ControlClient, Monitor, RetryPolicy};
