//! Wire layer for Silo.
//!
//! Three pieces share this crate:
//!
//! - the framed codec (`[u32 len][u8 tag][bincode payload]`) with a closed
//!   registry of message kinds,
//! - the async [`Transport`] carrying framed messages over one ordered
//!   stream in both directions,
//! - the [`Multiplexer`] that correlates concurrent requests to their
//!   responses by ID for the asynchronous control-plane.
//!
//! The repository RPC itself runs turn-based (one request outstanding at a
//! time); that discipline lives in `silo-client`, which owns a [`Transport`]
//! exclusively.

pub mod codec;
pub mod error;
pub mod message;
pub mod mux;
pub mod transport;

pub use error::{ProtocolError, ProtocolResult};
pub use message::{Message, Request, Response, MAX_MESSAGE_SIZE, PROTOCOL_VERSION, RESPONSE_TAG_BIT};
pub use mux::{Correlated, Multiplexer};
pub use transport::{FramedReceiver, FramedSender, Transport};
