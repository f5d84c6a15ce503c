//! Database variant
//!
//! Envelope: kind(u8) op(u8) status(u8) reserved(u8), followed by a field
//! list: count(u16 BE) then count entries of len(u16 BE) + bytes. The
//! authentication handshake rides this variant; field semantics per
//! operation are the negotiator's business.

use bytes::BufMut;

use crate::layer::{FieldValue, LayerError, LayerNode, LayerTag};
use crate::registry::LayerCodec;

pub const SQL: LayerTag = "sql";

pub const KIND_REQUEST: u8 = 0x01;
pub const KIND_REPLY: u8 = 0x02;

/// Version/product exchange.
pub const OP_HELLO: u8 = 0x01;
/// Authentication challenge exchange.
pub const OP_AUTH: u8 = 0x02;
/// Final authentication verdict.
pub const OP_FINAL: u8 = 0x03;

pub const STATUS_OK: u8 = 0x00;
pub const STATUS_ERROR: u8 = 0x01;

/// Protocol revision announced in the hello exchange.
pub const PROTOCOL_VERSION: u32 = 1;

const ENVELOPE_LEN: usize = 4;

/// Ordered list of length-prefixed opaque fields.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FieldList(pub Vec<Vec<u8>>);

impl FieldList {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, field: impl Into<Vec<u8>>) {
        self.0.push(field.into());
    }

    pub fn with(mut self, field: impl Into<Vec<u8>>) -> Self {
        self.push(field);
        self
    }

    pub fn get(&self, index: usize) -> Option<&[u8]> {
        self.0.get(index).map(Vec::as_slice)
    }

    pub fn get_str(&self, index: usize) -> Option<String> {
        self.get(index)
            .map(|raw| String::from_utf8_lossy(raw).into_owned())
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn parse(raw: &[u8]) -> Result<Self, LayerError> {
        if raw.len() < 2 {
            return Err(LayerError::ShortPayload {
                tag: SQL,
                need: 2,
                have: raw.len(),
            });
        }

        let count = u16::from_be_bytes([raw[0], raw[1]]) as usize;
        let mut fields = Vec::with_capacity(count);
        let mut at = 2usize;

        for _ in 0..count {
            if raw.len() < at + 2 {
                return Err(LayerError::Malformed {
                    tag: SQL,
                    reason: format!("field list truncated at offset {at}"),
                });
            }
            let len = u16::from_be_bytes([raw[at], raw[at + 1]]) as usize;
            at += 2;
            if raw.len() < at + len {
                return Err(LayerError::Malformed {
                    tag: SQL,
                    reason: format!("field of {len} bytes truncated at offset {at}"),
                });
            }
            fields.push(raw[at..at + len].to_vec());
            at += len;
        }

        Ok(Self(fields))
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, LayerError> {
        if self.0.len() > u16::MAX as usize {
            return Err(LayerError::ValueTooLarge {
                tag: SQL,
                field: "fields",
            });
        }

        let mut out = Vec::new();
        out.put_u16(self.0.len() as u16);
        for field in &self.0 {
            if field.len() > u16::MAX as usize {
                return Err(LayerError::ValueTooLarge {
                    tag: SQL,
                    field: "fields",
                });
            }
            out.put_u16(field.len() as u16);
            out.extend_from_slice(field);
        }
        Ok(out)
    }
}

/// Build an outbound request envelope around `fields`.
pub fn request(op: u8, fields: &FieldList) -> Result<LayerNode, LayerError> {
    Ok(LayerNode::build(SQL)
        .with_field("kind", FieldValue::U8(KIND_REQUEST))
        .with_field("op", FieldValue::U8(op))
        .with_field("status", FieldValue::U8(STATUS_OK))
        .with_payload(fields.to_bytes()?))
}

/// Build a reply envelope; used by embedding test servers.
pub fn reply(op: u8, status: u8, fields: &FieldList) -> Result<LayerNode, LayerError> {
    Ok(LayerNode::build(SQL)
        .with_field("kind", FieldValue::U8(KIND_REPLY))
        .with_field("op", FieldValue::U8(op))
        .with_field("status", FieldValue::U8(status))
        .with_payload(fields.to_bytes()?))
}

pub fn op(node: &LayerNode) -> Result<u8, LayerError> {
    node.expect_u8("op")
}

pub fn status(node: &LayerNode) -> Result<u8, LayerError> {
    node.expect_u8("status")
}

pub fn fields(node: &LayerNode) -> Result<FieldList, LayerError> {
    FieldList::parse(&node.payload)
}

/// The reason string carried by an error reply, when present.
pub fn error_reason(node: &LayerNode) -> Option<String> {
    if status(node).ok()? == STATUS_OK {
        return None;
    }
    fields(node).ok()?.get_str(0)
}

pub struct SqlCodec;

impl LayerCodec for SqlCodec {
    fn tag(&self) -> LayerTag {
        SQL
    }

    fn decode(&self, raw: &[u8]) -> Result<LayerNode, LayerError> {
        if raw.len() < ENVELOPE_LEN {
            return Err(LayerError::ShortPayload {
                tag: SQL,
                need: ENVELOPE_LEN,
                have: raw.len(),
            });
        }

        let mut node = LayerNode::new(SQL, raw.to_vec());
        node.push_field("kind", FieldValue::U8(raw[0]));
        node.push_field("op", FieldValue::U8(raw[1]));
        node.push_field("status", FieldValue::U8(raw[2]));
        node.payload = raw[ENVELOPE_LEN..].to_vec();
        Ok(node)
    }

    fn encode(&self, node: &LayerNode, child: &[u8]) -> Result<Vec<u8>, LayerError> {
        let mut out = Vec::with_capacity(ENVELOPE_LEN + child.len());
        out.put_u8(node.expect_u8("kind")?);
        out.put_u8(node.expect_u8("op")?);
        out.put_u8(node.expect_u8("status")?);
        out.put_u8(0);
        out.extend_from_slice(child);
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_field_list_roundtrip() {
        let fields = FieldList::new()
            .with(&b"jdoe"[..])
            .with(&b""[..])
            .with(vec![0xFF; 300]);

        let bytes = fields.to_bytes().unwrap();
        let parsed = FieldList::parse(&bytes).unwrap();
        assert_eq!(parsed, fields);
    }

    #[test]
    fn test_field_list_truncated() {
        let bytes = FieldList::new().with(&b"abcdef"[..]).to_bytes().unwrap();
        assert!(FieldList::parse(&bytes[..bytes.len() - 1]).is_err());
        assert!(FieldList::parse(&bytes[..3]).is_err());
    }

    #[test]
    fn test_request_reply_roundtrip() {
        let codec = SqlCodec;
        let fields = FieldList::new().with(&b"SCRAMSHA256"[..]);

        let node = request(OP_AUTH, &fields).unwrap();
        let wire = codec.encode(&node, &node.payload).unwrap();
        let decoded = codec.decode(&wire).unwrap();

        assert_eq!(decoded.expect_u8("kind").unwrap(), KIND_REQUEST);
        assert_eq!(op(&decoded).unwrap(), OP_AUTH);
        assert_eq!(status(&decoded).unwrap(), STATUS_OK);
        assert_eq!(
            self::fields(&decoded).unwrap().get(0),
            Some(&b"SCRAMSHA256"[..])
        );
    }

    #[test]
    fn test_error_reason_extraction() {
        let codec = SqlCodec;
        let fields = FieldList::new().with(&b"authentication failed"[..]);
        let node = reply(OP_FINAL, STATUS_ERROR, &fields).unwrap();
        let wire = codec.encode(&node, &node.payload).unwrap();
        let decoded = codec.decode(&wire).unwrap();

        assert_eq!(
            error_reason(&decoded).as_deref(),
            Some("authentication failed")
        );

        let ok = reply(OP_FINAL, STATUS_OK, &FieldList::new()).unwrap();
        let ok_wire = codec.encode(&ok, &ok.payload).unwrap();
        assert_eq!(error_reason(&codec.decode(&ok_wire).unwrap()), None);
    }
}
