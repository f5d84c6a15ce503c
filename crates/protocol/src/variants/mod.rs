//! Codecs for the protocol family's known variants
//!
//! Each variant owns its sub-header layout; the frame codec stays
//! layout-agnostic. The concrete byte layouts used here are this
//! implementation's documented choice (see DESIGN.md).

pub mod dialog;
pub mod msg;
pub mod sql;

use std::sync::Arc;

use crate::registry::CompositionRegistry;

/// Registry preloaded with every variant codec and the stock bindings.
///
/// The dialog-process-queue rule is registered ahead of the item rule on
/// purpose: both ride the dialog envelope and the first match wins.
pub fn standard_registry() -> CompositionRegistry {
    let mut registry = CompositionRegistry::new();

    registry.register(Arc::new(dialog::DialogCodec));
    registry.register(Arc::new(dialog::DialogItemCodec));
    registry.register(Arc::new(dialog::DpqCodec));
    registry.register(Arc::new(msg::MsgCodec));
    registry.register(Arc::new(sql::SqlCodec));

    registry.bind(dialog::DIALOG, dialog::envelope_carries_dpq, dialog::DPQ);
    registry.bind(dialog::DIALOG, |_| true, dialog::DIALOG_ITEM);
    registry.bind(dialog::DIALOG_ITEM, |_| true, dialog::DIALOG_ITEM);

    registry
}
