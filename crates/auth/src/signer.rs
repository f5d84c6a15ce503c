//! External token-signing capability
//!
//! Some deployments can mint assertion tokens locally, others only carry
//! pre-signed ones. Signing is injected as a capability: the toolkit never
//! implements it, and its absence is a structural precondition failure
//! caught before any network activity.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum SignerError {
    #[error("signing failed: {0}")]
    Signing(String),
}

/// Produces a signed token string for a claims set. The signing key lives
/// inside the implementation, supplied by the embedding application.
pub trait TokenSigner: Send + Sync {
    fn sign(&self, claims: &serde_json::Value) -> Result<String, SignerError>;
}
