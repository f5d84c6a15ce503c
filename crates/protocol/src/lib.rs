//! tapwire protocol - framing and layer composition
//!
//! This crate provides:
//! - Length-prefixed transport framing with keep-alive probe handling
//! - A typed layer tree model for decoded payloads
//! - A composition registry resolving nested protocol layers
//! - Codecs for the protocol family's known variants

mod frame;
mod layer;
mod registry;
pub mod variants;

pub use frame::*;
pub use layer::*;
pub use registry::*;
