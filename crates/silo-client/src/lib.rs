//! Turn-based repository client for Silo.
//!
//! The client owns its connection and issues one request at a time, blocking
//! until the matching response arrives before the next request goes out.
//! That single-outstanding-request discipline is enforced by `&mut self` on
//! every call: the borrow checker is the turn-taking mechanism. Repository
//! mutations are linearized per connection anyway, so the trade against
//! concurrency buys a 1:1 request/response log.

pub mod client;
pub mod error;

pub use client::{DedupReport, RepositoryClient};
pub use error::{ClientError, ClientResult};
