//! Request-response primitive
//!
//! Sends one encoded message and synchronously awaits the next frame of
//! the expected top-level type. Keep-alive probes received while waiting
//! are echoed back and skipped; any other unexpected frame is a protocol
//! violation, surfaced rather than silently discarded.

use tracing::{debug, trace};

use tapwire_protocol::{CompositionRegistry, LayerNode, LayerTag};

use crate::connection::{Connection, ConnectionError};

impl Connection {
    /// Encode `node` through the registry and write it as one frame.
    pub async fn send(
        &mut self,
        registry: &CompositionRegistry,
        node: &LayerNode,
    ) -> Result<(), ConnectionError> {
        let payload = registry.encode_tree(node)?;
        self.write_frame(&payload).await
    }

    /// Await the next application frame and require its top-level type to
    /// be `expected`.
    pub async fn receive(
        &mut self,
        registry: &CompositionRegistry,
        expected: LayerTag,
    ) -> Result<LayerNode, ConnectionError> {
        loop {
            let frame = self.read_frame().await?.ok_or(ConnectionError::Closed)?;

            if self.codec().is_probe(&frame) {
                trace!(peer = %self.peer, "echoing keep-alive probe while waiting");
                self.send_probe().await?;
                continue;
            }

            let tree = registry.decode_tree(self.variant, &frame.payload)?;
            if tree.tag != expected {
                return Err(ConnectionError::ProtocolViolation {
                    expected: expected.to_string(),
                    got: tree.tag.to_string(),
                });
            }

            debug!(peer = %self.peer, tag = tree.tag, "response received");
            return Ok(tree);
        }
    }

    /// Send `node`, then await a frame of the `expected` top-level type.
    pub async fn send_receive(
        &mut self,
        registry: &CompositionRegistry,
        node: &LayerNode,
        expected: LayerTag,
    ) -> Result<LayerNode, ConnectionError> {
        self.send(registry, node).await?;
        self.receive(registry, expected).await
    }
}
