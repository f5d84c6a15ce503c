//! tapwire proxy - bidirectional intercepting relay
//!
//! This crate provides:
//! - `ProxyServer`: accepts clients and opens a matching target connection
//!   per session
//! - `ProxySession`: relays decoded messages in both directions through
//!   per-direction transform hooks

mod hooks;
mod server;
mod session;

pub use hooks::*;
pub use server::*;
pub use session::*;
