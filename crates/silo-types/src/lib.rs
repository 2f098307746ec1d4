//! Foundation types for Silo.
//!
//! This crate provides the identifiers used throughout the Silo repository
//! core. Every other Silo crate depends on `silo-types`.
//!
//! # Key Types
//!
//! - [`Checksum`] — Content-addressed identifier (256-bit BLAKE3 hash)
//! - [`TransactionId`] — Opaque random identifier for an open transaction

pub mod checksum;
pub mod error;
pub mod transaction;

pub use checksum::Checksum;
pub use error::TypeError;
pub use transaction::TransactionId;
