//! Demonstration intercept hook
//!
//! Reports input fields found in client-originated screen messages,
//! flagging hidden-input (password) fields, and forwards every message
//! unchanged. Server traffic passes through untouched.

use tracing::info;

use tapwire_protocol::LayerNode;
use tapwire_protocol::variants::dialog;
use tapwire_proxy::{HookAction, TransformHook};

pub struct InputFieldReporter;

impl TransformHook for InputFieldReporter {
    fn client_to_target(&self, tree: LayerNode) -> HookAction {
        for item in tree.walk().filter(|n| n.tag == dialog::DIALOG_ITEM) {
            let Ok(group) = item.expect_u8("group") else {
                continue;
            };
            if group != dialog::GROUP_INPUT {
                continue;
            }

            let text = item
                .field("value")
                .and_then(|v| v.as_bytes())
                .map(|raw| String::from_utf8_lossy(raw).into_owned())
                .unwrap_or_default();

            if dialog::is_hidden(item) {
                // A hidden-input field is almost certainly a password.
                info!(field = %text, "password field");
            } else {
                info!(field = %text, "regular field");
            }
        }

        HookAction::Forward(tree)
    }
}
