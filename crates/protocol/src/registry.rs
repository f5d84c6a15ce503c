//! Composition registry
//!
//! Resolves which codec applies to a frame's body and, recursively, to
//! nested sub-payloads. Rules are an ordered list of
//! `(parent_tag, predicate) -> child_tag` bindings evaluated in
//! registration order; the first match wins. Unmatched payloads are not an
//! error: they stay attached to their node as opaque trailing bytes, which
//! keeps unregistered payload kinds forward-compatible.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::{trace, warn};

use crate::layer::{LayerError, LayerNode, LayerTag};

/// Hard cap on the number of nodes resolved per tree. Self-referential
/// bindings are legal, so resolution is bounded by byte progress plus this
/// depth limit rather than left to run unchecked.
pub const MAX_COMPOSITION_DEPTH: usize = 4096;

/// Decodes and re-encodes one layer kind.
pub trait LayerCodec: Send + Sync {
    fn tag(&self) -> LayerTag;

    /// Decode this layer's own fields from `raw`, leaving any trailing
    /// bytes in the node's `payload`.
    fn decode(&self, raw: &[u8]) -> Result<LayerNode, LayerError>;

    /// Re-encode this layer's fields, appending the already-encoded child
    /// bytes (or the untouched payload for a leaf).
    fn encode(&self, node: &LayerNode, child: &[u8]) -> Result<Vec<u8>, LayerError>;
}

type Predicate = Box<dyn Fn(&LayerNode) -> bool + Send + Sync>;

struct CompositionRule {
    parent: LayerTag,
    matches: Predicate,
    child: LayerTag,
}

/// Rule table resolving nested layer types.
///
/// Read-only after initialization; shared across sessions behind an `Arc`.
pub struct CompositionRegistry {
    codecs: HashMap<LayerTag, Arc<dyn LayerCodec>>,
    rules: Vec<CompositionRule>,
    max_depth: usize,
}

impl Default for CompositionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl CompositionRegistry {
    pub fn new() -> Self {
        Self {
            codecs: HashMap::new(),
            rules: Vec::new(),
            max_depth: MAX_COMPOSITION_DEPTH,
        }
    }

    pub fn with_max_depth(mut self, max_depth: usize) -> Self {
        self.max_depth = max_depth;
        self
    }

    /// Make a codec available for decoding and re-encoding.
    pub fn register(&mut self, codec: Arc<dyn LayerCodec>) {
        self.codecs.insert(codec.tag(), codec);
    }

    /// Bind `parent` payloads satisfying `predicate` to the `child` codec.
    /// Bindings are evaluated in registration order; first match wins.
    pub fn bind<F>(&mut self, parent: LayerTag, predicate: F, child: LayerTag)
    where
        F: Fn(&LayerNode) -> bool + Send + Sync + 'static,
    {
        self.rules.push(CompositionRule {
            parent,
            matches: Box::new(predicate),
            child,
        });
    }

    pub fn codec(&self, tag: LayerTag) -> Option<&Arc<dyn LayerCodec>> {
        self.codecs.get(tag)
    }

    /// Decode `raw` as a `tag` layer and resolve its nested sub-layers.
    ///
    /// An unregistered tag yields a single opaque leaf retaining the full
    /// input, not an error.
    pub fn decode_tree(&self, tag: LayerTag, raw: &[u8]) -> Result<LayerNode, LayerError> {
        let mut node = match self.codecs.get(tag) {
            Some(codec) => codec.decode(raw)?,
            None => {
                trace!(tag, len = raw.len(), "no codec registered, opaque leaf");
                return Ok(LayerNode::opaque(tag, raw.to_vec()));
            }
        };

        self.resolve(&mut node)?;
        Ok(node)
    }

    /// Populate children along the chain until no rule matches, no bytes
    /// remain, a child makes no byte progress, or the depth cap is hit.
    pub fn resolve(&self, node: &mut LayerNode) -> Result<(), LayerError> {
        let mut cur = node;
        let mut depth = 0usize;

        loop {
            depth += 1;
            if depth > self.max_depth {
                warn!(
                    tag = cur.tag,
                    max_depth = self.max_depth,
                    "composition depth cap reached, remaining bytes left opaque"
                );
                return Ok(());
            }

            if cur.child.is_none() && !cur.payload.is_empty() {
                let rule = self
                    .rules
                    .iter()
                    .find(|r| r.parent == cur.tag && (r.matches)(cur));

                match rule {
                    None => trace!(
                        tag = cur.tag,
                        len = cur.payload.len(),
                        "no composition rule matched, leaving opaque payload"
                    ),
                    Some(rule) => match self.codecs.get(rule.child) {
                        None => warn!(
                            parent = cur.tag,
                            child = rule.child,
                            "rule names an unregistered codec, leaving opaque payload"
                        ),
                        Some(codec) => {
                            let child = codec.decode(&cur.payload)?;
                            if child.payload.len() >= cur.payload.len() {
                                warn!(
                                    parent = cur.tag,
                                    child = rule.child,
                                    "child layer consumed no bytes, stopping resolution"
                                );
                            } else {
                                trace!(
                                    parent = cur.tag,
                                    child = child.tag,
                                    depth,
                                    "resolved sub-layer"
                                );
                                cur.set_child(child);
                            }
                        }
                    },
                }
            }

            match cur.child.as_deref_mut() {
                Some(next) => cur = next,
                None => return Ok(()),
            }
        }
    }

    /// Re-encode a tree back to payload bytes.
    ///
    /// Nodes with a registered codec are re-encoded from their decoded
    /// fields (a normalizing re-encode); nodes without one re-emit their
    /// raw bytes unchanged. Chains are folded from the tail so unbounded
    /// sibling chains stay off the call stack.
    pub fn encode_tree(&self, node: &LayerNode) -> Result<Vec<u8>, LayerError> {
        let chain: Vec<&LayerNode> = node.walk().collect();

        let mut body: Vec<u8> = Vec::new();
        for cur in chain.iter().rev() {
            body = match self.codecs.get(cur.tag) {
                Some(codec) => {
                    let tail = if cur.child.is_some() {
                        std::mem::take(&mut body)
                    } else {
                        cur.payload.clone()
                    };
                    codec.encode(cur, &tail)?
                }
                None => cur.raw.clone(),
            };
        }

        Ok(body)
    }
}
