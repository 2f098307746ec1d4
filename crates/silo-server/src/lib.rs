//! Repository server for Silo.
//!
//! Each accepted connection is served by its own task running a turn-based
//! session loop: read one request, apply it, write exactly one response,
//! repeat. Transactions live in a registry constructed per connection, so a
//! transaction id is meaningless on any other connection: the bearer
//! capability cannot leak across sessions. Commits publish staged writes to
//! the underlying store under the repository's exclusive advisory lock.

pub mod config;
pub mod error;
pub mod registry;
pub mod server;
pub mod session;

pub use config::ServerConfig;
pub use error::{ServerError, ServerResult};
pub use registry::{Transaction, TransactionRegistry};
pub use server::Server;
pub use session::Session;
