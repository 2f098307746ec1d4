use serde::{Deserialize, Serialize};
use silo_protocol::{Correlated, Message};
use uuid::Uuid;

/// Version of the control-plane message set, reported by `Identify`.
pub const CONTROL_PROTOCOL_VERSION: u32 = 1;

/// Default agent listening port.
pub const DEFAULT_PORT: u16 = 8081;

/// Control-plane message bodies. `Ping` is echoed back verbatim;
/// `Identify` is answered with [`ControlMessage::IdentifyReply`].
#[derive(Clone, Debug, Serialize, Deserialize)]
pub enum ControlMessage {
    Ping { timestamp_millis: i64 },
    Identify { public_key: Vec<u8> },
    IdentifyReply(AgentFacts),
}

/// What an agent says about itself.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentFacts {
    pub public_key: Vec<u8>,
    pub os: String,
    pub arch: String,
    pub protocol_version: u32,
    pub hostname: String,
    pub cpu_count: u32,
}

impl AgentFacts {
    /// Gather facts about the host this process runs on.
    pub fn gather(public_key: Vec<u8>) -> Self {
        Self {
            public_key,
            os: std::env::consts::OS.to_string(),
            arch: std::env::consts::ARCH.to_string(),
            protocol_version: CONTROL_PROTOCOL_VERSION,
            hostname: gethostname::gethostname().to_string_lossy().into_owned(),
            cpu_count: num_cpus::get() as u32,
        }
    }
}

/// One control-plane frame: a correlation ID plus a body.
///
/// Requests and responses to the same exchange share the ID; that pairing is
/// the only ordering the control-plane offers.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Packet {
    pub id: Uuid,
    pub body: ControlMessage,
}

impl Packet {
    /// A liveness probe stamped with the current wall clock.
    pub fn ping(timestamp_millis: i64) -> Self {
        Self {
            id: Uuid::new_v4(),
            body: ControlMessage::Ping { timestamp_millis },
        }
    }

    /// An identify request carrying the prober's public key.
    pub fn identify(public_key: Vec<u8>) -> Self {
        Self {
            id: Uuid::new_v4(),
            body: ControlMessage::Identify { public_key },
        }
    }

    /// A reply correlated to the packet that prompted it.
    pub fn reply_to(id: Uuid, body: ControlMessage) -> Self {
        Self { id, body }
    }
}

impl Message for Packet {
    fn type_tag(&self) -> u8 {
        match self.body {
            ControlMessage::Ping { .. } => 1,
            ControlMessage::Identify { .. } => 2,
            ControlMessage::IdentifyReply(_) => 3,
        }
    }

    fn type_name(&self) -> &'static str {
        match self.body {
            ControlMessage::Ping { .. } => "Ping",
            ControlMessage::Identify { .. } => "Identify",
            ControlMessage::IdentifyReply(_) => "IdentifyReply",
        }
    }
}

impl Correlated for Packet {
    fn correlation_id(&self) -> Uuid {
        self.id
    }
}
