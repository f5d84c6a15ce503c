//! Transform hooks
//!
//! Hooks receive the fully resolved layer tree for each relayed message,
//! so they can inspect deep fields without re-implementing parsing. The
//! default behavior on both directions is to forward unchanged.

use tapwire_protocol::LayerNode;

/// Relay direction a message is traveling in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    ClientToTarget,
    TargetToClient,
}

impl std::fmt::Display for Direction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Direction::ClientToTarget => write!(f, "client-to-target"),
            Direction::TargetToClient => write!(f, "target-to-client"),
        }
    }
}

/// What a hook decided to do with a message.
pub enum HookAction {
    /// Re-encode the (possibly mutated) tree and forward it.
    Forward(LayerNode),
    /// Swallow the message; nothing is forwarded.
    Drop,
    /// Tear the session down.
    Terminate,
}

/// Per-direction message transforms supplied by the embedding application.
pub trait TransformHook: Send + Sync {
    fn client_to_target(&self, tree: LayerNode) -> HookAction {
        HookAction::Forward(tree)
    }

    fn target_to_client(&self, tree: LayerNode) -> HookAction {
        HookAction::Forward(tree)
    }
}

/// Forwards everything unchanged in both directions.
pub struct IdentityHook;

impl TransformHook for IdentityHook {}
