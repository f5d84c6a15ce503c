//! Screen-rendering variant
//!
//! A two-byte envelope followed either by a chain of screen items or, when
//! the envelope flags say so, by a dialog-process-queue body. Items are
//! self-referential: each item's trailing bytes are its next sibling.
//!
//! Item layout: group(u8) kind(u8) attrs(u8) len(u16 BE) value[len].
//! Attribute bit 0 marks a hidden-input (password) field.

use bytes::BufMut;

use crate::layer::{FieldValue, LayerError, LayerNode, LayerTag};
use crate::registry::LayerCodec;

pub const DIALOG: LayerTag = "dialog";
pub const DIALOG_ITEM: LayerTag = "dialog.item";
pub const DPQ: LayerTag = "dpq";

/// Envelope flag: the body is a dialog-process-queue report, not items.
pub const FLAG_DPQ: u8 = 0x80;

/// Item attribute: hidden-input field (rendered masked by the client).
pub const ATTR_HIDDEN: u8 = 0x01;

/// Item groups seen in screen payloads.
pub const GROUP_INPUT: u8 = 0x12;

const ENVELOPE_LEN: usize = 2;
const ITEM_HEADER_LEN: usize = 5;

/// Discriminator predicate for the dpq binding.
pub fn envelope_carries_dpq(node: &LayerNode) -> bool {
    node.field("flags")
        .and_then(FieldValue::as_u8)
        .is_some_and(|flags| flags & FLAG_DPQ != 0)
}

/// Whether an item carries the hidden-input attribute.
pub fn is_hidden(item: &LayerNode) -> bool {
    item.field("attrs")
        .and_then(FieldValue::as_u8)
        .is_some_and(|attrs| attrs & ATTR_HIDDEN != 0)
}

/// Set or clear the hidden-input attribute on an item.
pub fn set_hidden(item: &mut LayerNode, hidden: bool) {
    let attrs = item
        .field("attrs")
        .and_then(FieldValue::as_u8)
        .unwrap_or(0);
    let attrs = if hidden {
        attrs | ATTR_HIDDEN
    } else {
        attrs & !ATTR_HIDDEN
    };
    item.set_field("attrs", FieldValue::U8(attrs));
}

/// Build an outbound envelope; append items via [`push_item`].
pub fn envelope(version: u8, flags: u8) -> LayerNode {
    LayerNode::build(DIALOG)
        .with_field("version", FieldValue::U8(version))
        .with_field("flags", FieldValue::U8(flags))
}

/// Build one outbound screen item.
pub fn item(group: u8, kind: u8, attrs: u8, value: &[u8]) -> LayerNode {
    LayerNode::build(DIALOG_ITEM)
        .with_field("group", FieldValue::U8(group))
        .with_field("kind", FieldValue::U8(kind))
        .with_field("attrs", FieldValue::U8(attrs))
        .with_field("value", FieldValue::Bytes(value.to_vec()))
}

/// Append `item` at the end of the envelope's item chain.
pub fn push_item(envelope: &mut LayerNode, item: LayerNode) {
    let mut cur = envelope;
    while cur.child.is_some() {
        cur = cur.child.as_deref_mut().unwrap();
    }
    cur.set_child(item);
}

pub struct DialogCodec;

impl LayerCodec for DialogCodec {
    fn tag(&self) -> LayerTag {
        DIALOG
    }

    fn decode(&self, raw: &[u8]) -> Result<LayerNode, LayerError> {
        if raw.len() < ENVELOPE_LEN {
            return Err(LayerError::ShortPayload {
                tag: DIALOG,
                need: ENVELOPE_LEN,
                have: raw.len(),
            });
        }

        let mut node = LayerNode::new(DIALOG, raw.to_vec());
        node.push_field("version", FieldValue::U8(raw[0]));
        node.push_field("flags", FieldValue::U8(raw[1]));
        node.payload = raw[ENVELOPE_LEN..].to_vec();
        Ok(node)
    }

    fn encode(&self, node: &LayerNode, child: &[u8]) -> Result<Vec<u8>, LayerError> {
        let mut out = Vec::with_capacity(ENVELOPE_LEN + child.len());
        out.put_u8(node.expect_u8("version")?);
        out.put_u8(node.expect_u8("flags")?);
        out.extend_from_slice(child);
        Ok(out)
    }
}

pub struct DialogItemCodec;

impl LayerCodec for DialogItemCodec {
    fn tag(&self) -> LayerTag {
        DIALOG_ITEM
    }

    fn decode(&self, raw: &[u8]) -> Result<LayerNode, LayerError> {
        if raw.len() < ITEM_HEADER_LEN {
            return Err(LayerError::ShortPayload {
                tag: DIALOG_ITEM,
                need: ITEM_HEADER_LEN,
                have: raw.len(),
            });
        }

        let len = u16::from_be_bytes([raw[3], raw[4]]) as usize;
        if raw.len() < ITEM_HEADER_LEN + len {
            return Err(LayerError::ShortPayload {
                tag: DIALOG_ITEM,
                need: ITEM_HEADER_LEN + len,
                have: raw.len(),
            });
        }

        let mut node = LayerNode::new(DIALOG_ITEM, raw.to_vec());
        node.push_field("group", FieldValue::U8(raw[0]));
        node.push_field("kind", FieldValue::U8(raw[1]));
        node.push_field("attrs", FieldValue::U8(raw[2]));
        node.push_field(
            "value",
            FieldValue::Bytes(raw[ITEM_HEADER_LEN..ITEM_HEADER_LEN + len].to_vec()),
        );
        node.payload = raw[ITEM_HEADER_LEN + len..].to_vec();
        Ok(node)
    }

    fn encode(&self, node: &LayerNode, child: &[u8]) -> Result<Vec<u8>, LayerError> {
        let value = node.expect_bytes("value")?;
        if value.len() > u16::MAX as usize {
            return Err(LayerError::ValueTooLarge {
                tag: DIALOG_ITEM,
                field: "value",
            });
        }

        let mut out = Vec::with_capacity(ITEM_HEADER_LEN + value.len() + child.len());
        out.put_u8(node.expect_u8("group")?);
        out.put_u8(node.expect_u8("kind")?);
        out.put_u8(node.expect_u8("attrs")?);
        out.put_u16(value.len() as u16);
        out.extend_from_slice(value);
        out.extend_from_slice(child);
        Ok(out)
    }
}

/// Dialog-process-queue body: queue_id(u16 BE) depth(u16 BE).
pub struct DpqCodec;

impl LayerCodec for DpqCodec {
    fn tag(&self) -> LayerTag {
        DPQ
    }

    fn decode(&self, raw: &[u8]) -> Result<LayerNode, LayerError> {
        if raw.len() < 4 {
            return Err(LayerError::ShortPayload {
                tag: DPQ,
                need: 4,
                have: raw.len(),
            });
        }

        let mut node = LayerNode::new(DPQ, raw.to_vec());
        node.push_field("queue_id", FieldValue::U16(u16::from_be_bytes([raw[0], raw[1]])));
        node.push_field("depth", FieldValue::U16(u16::from_be_bytes([raw[2], raw[3]])));
        node.payload = raw[4..].to_vec();
        Ok(node)
    }

    fn encode(&self, node: &LayerNode, child: &[u8]) -> Result<Vec<u8>, LayerError> {
        let mut out = Vec::with_capacity(4 + child.len());
        out.put_u16(node.expect_u16("queue_id")?);
        out.put_u16(node.expect_u16("depth")?);
        out.extend_from_slice(child);
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::variants::standard_registry;

    fn sample_envelope() -> LayerNode {
        let mut env = envelope(1, 0);
        push_item(&mut env, item(GROUP_INPUT, 0x09, 0, b"jdoe"));
        push_item(&mut env, item(GROUP_INPUT, 0x09, ATTR_HIDDEN, b"hunter2"));
        push_item(&mut env, item(0x10, 0x01, 0, b"OK"));
        env
    }

    #[test]
    fn test_item_chain_roundtrip() {
        let registry = standard_registry();
        let wire = registry.encode_tree(&sample_envelope()).unwrap();

        let tree = registry.decode_tree(DIALOG, &wire).unwrap();
        assert_eq!(tree.tag, DIALOG);
        // Envelope plus three items.
        assert_eq!(tree.depth(), 4);

        let values: Vec<&[u8]> = tree
            .walk()
            .filter(|n| n.tag == DIALOG_ITEM)
            .map(|n| n.expect_bytes("value").unwrap())
            .collect();
        assert_eq!(values, vec![&b"jdoe"[..], &b"hunter2"[..], &b"OK"[..]]);
    }

    #[test]
    fn test_hidden_attribute_visible_per_item() {
        let registry = standard_registry();
        let wire = registry.encode_tree(&sample_envelope()).unwrap();
        let tree = registry.decode_tree(DIALOG, &wire).unwrap();

        let hidden: Vec<bool> = tree
            .walk()
            .filter(|n| n.tag == DIALOG_ITEM)
            .map(is_hidden)
            .collect();
        assert_eq!(hidden, vec![false, true, false]);
    }

    #[test]
    fn test_set_hidden_survives_reencode() {
        let registry = standard_registry();
        let wire = registry.encode_tree(&sample_envelope()).unwrap();
        let mut tree = registry.decode_tree(DIALOG, &wire).unwrap();

        tree.for_each_mut(|node| {
            if node.tag == DIALOG_ITEM {
                set_hidden(node, true);
            }
        });

        let rewire = registry.encode_tree(&tree).unwrap();
        let reread = registry.decode_tree(DIALOG, &rewire).unwrap();
        assert!(
            reread
                .walk()
                .filter(|n| n.tag == DIALOG_ITEM)
                .all(|n| is_hidden(n))
        );
    }

    #[test]
    fn test_dpq_flag_selects_queue_body() {
        let registry = standard_registry();

        let env = envelope(1, FLAG_DPQ)
            .with_payload(vec![0x00, 0x07, 0x00, 0x02]);
        let wire = registry.encode_tree(&env).unwrap();

        let tree = registry.decode_tree(DIALOG, &wire).unwrap();
        let tags: Vec<_> = tree.walk().map(|n| n.tag).collect();
        assert_eq!(tags, vec![DIALOG, DPQ]);

        let dpq = tree.child.as_deref().unwrap();
        assert_eq!(dpq.expect_u16("queue_id").unwrap(), 7);
        assert_eq!(dpq.expect_u16("depth").unwrap(), 2);
    }

    #[test]
    fn test_short_item_is_error() {
        let registry = standard_registry();
        // Envelope followed by a two-byte stub that cannot be an item.
        let err = registry.decode_tree(DIALOG, &[1, 0, 0x12, 0x09]);
        assert!(err.is_err());
    }

    #[test]
    fn test_item_declared_longer_than_buffer() {
        let codec = DialogItemCodec;
        let raw = [0x12, 0x09, 0x00, 0x00, 0x10, b'x'];
        assert!(matches!(
            codec.decode(&raw),
            Err(LayerError::ShortPayload { .. })
        ));
    }
}
