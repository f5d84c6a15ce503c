//! tapwire transport - framed connections over TCP
//!
//! This crate provides:
//! - `Connection`: a framed, optionally TLS-upgraded TCP connection
//! - Route-hint traversal through an intermediate router
//! - The request-response primitive (`send` / `send_receive`)

mod connection;
mod request;
mod tls;

pub use connection::*;
pub use tls::*;
