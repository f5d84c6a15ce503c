//! tapwire auth - pluggable authentication handshake
//!
//! This crate provides:
//! - The closed set of credential strategies and their validated factory
//! - SCRAM proof computation (plain SHA-256 and PBKDF2-SHA256 derivation)
//! - The external token-signer interface
//! - The negotiator driving a handshake session to completion

mod method;
mod negotiator;
pub mod scram;
mod signer;

pub use method::*;
pub use negotiator::*;
pub use signer::*;
