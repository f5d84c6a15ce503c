//! Message-relay variant
//!
//! Fixed header: flag(u8) iflag(u8) opcode(u8) reserved(u8)
//! fromname[32] toname[32], names space-padded. The body, when present,
//! is free-form message text.

use crate::layer::{FieldValue, LayerError, LayerNode, LayerTag};
use crate::registry::LayerCodec;

pub const MSG: LayerTag = "msg";

/// Fixed width of the client-name fields.
pub const NAME_LEN: usize = 32;

pub const HEADER_LEN: usize = 4 + 2 * NAME_LEN;

/// Internal flag: login/administrative exchange.
pub const IFLAG_LOGIN: u8 = 0x08;
/// Internal flag: deliver the body to the named peer.
pub const IFLAG_DELIVER: u8 = 0x01;
/// Header flag: a body follows the header.
pub const FLAG_BODY: u8 = 0x02;
/// Opcode for delivering a one-shot message.
pub const OPCODE_DELIVER: u8 = 0x01;

fn padded_name(tag: LayerTag, field: &'static str, name: &str) -> Result<[u8; NAME_LEN], LayerError> {
    let bytes = name.as_bytes();
    if bytes.len() > NAME_LEN {
        return Err(LayerError::ValueTooLarge { tag, field });
    }
    let mut out = [b' '; NAME_LEN];
    out[..bytes.len()].copy_from_slice(bytes);
    Ok(out)
}

fn trimmed_name(raw: &[u8]) -> String {
    String::from_utf8_lossy(raw).trim_end().to_string()
}

/// Build an outbound message-relay header.
pub fn header(flag: u8, iflag: u8, opcode: u8, fromname: &str, toname: &str) -> LayerNode {
    LayerNode::build(MSG)
        .with_field("flag", FieldValue::U8(flag))
        .with_field("iflag", FieldValue::U8(iflag))
        .with_field("opcode", FieldValue::U8(opcode))
        .with_field("fromname", FieldValue::Str(fromname.to_string()))
        .with_field("toname", FieldValue::Str(toname.to_string()))
}

/// The login exchange announces the same name on both sides.
pub fn login(client_name: &str) -> LayerNode {
    header(0x00, IFLAG_LOGIN, 0x00, client_name, client_name)
}

/// A one-shot delivery to `toname` carrying `body`.
pub fn deliver(fromname: &str, toname: &str, body: &[u8]) -> LayerNode {
    header(FLAG_BODY, IFLAG_DELIVER, OPCODE_DELIVER, fromname, toname)
        .with_payload(body.to_vec())
}

pub struct MsgCodec;

impl LayerCodec for MsgCodec {
    fn tag(&self) -> LayerTag {
        MSG
    }

    fn decode(&self, raw: &[u8]) -> Result<LayerNode, LayerError> {
        if raw.len() < HEADER_LEN {
            return Err(LayerError::ShortPayload {
                tag: MSG,
                need: HEADER_LEN,
                have: raw.len(),
            });
        }

        let mut node = LayerNode::new(MSG, raw.to_vec());
        node.push_field("flag", FieldValue::U8(raw[0]));
        node.push_field("iflag", FieldValue::U8(raw[1]));
        node.push_field("opcode", FieldValue::U8(raw[2]));
        node.push_field("fromname", FieldValue::Str(trimmed_name(&raw[4..4 + NAME_LEN])));
        node.push_field(
            "toname",
            FieldValue::Str(trimmed_name(&raw[4 + NAME_LEN..HEADER_LEN])),
        );
        node.payload = raw[HEADER_LEN..].to_vec();
        Ok(node)
    }

    fn encode(&self, node: &LayerNode, child: &[u8]) -> Result<Vec<u8>, LayerError> {
        let mut out = Vec::with_capacity(HEADER_LEN + child.len());
        out.push(node.expect_u8("flag")?);
        out.push(node.expect_u8("iflag")?);
        out.push(node.expect_u8("opcode")?);
        out.push(0);
        out.extend_from_slice(&padded_name(MSG, "fromname", node.expect_str("fromname")?)?);
        out.extend_from_slice(&padded_name(MSG, "toname", node.expect_str("toname")?)?);
        out.extend_from_slice(child);
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_header_roundtrip() {
        let codec = MsgCodec;
        let node = deliver("alice", "bob", b"hello there");

        let wire = codec.encode(&node, &node.payload).unwrap();
        assert_eq!(wire.len(), HEADER_LEN + 11);

        let decoded = codec.decode(&wire).unwrap();
        assert_eq!(decoded.expect_u8("flag").unwrap(), FLAG_BODY);
        assert_eq!(decoded.expect_u8("iflag").unwrap(), IFLAG_DELIVER);
        assert_eq!(decoded.expect_u8("opcode").unwrap(), OPCODE_DELIVER);
        assert_eq!(decoded.expect_str("fromname").unwrap(), "alice");
        assert_eq!(decoded.expect_str("toname").unwrap(), "bob");
        assert_eq!(decoded.payload, b"hello there");
    }

    #[test]
    fn test_login_header_shape() {
        let codec = MsgCodec;
        let node = login("listener-1");
        let wire = codec.encode(&node, &[]).unwrap();
        let decoded = codec.decode(&wire).unwrap();

        assert_eq!(decoded.expect_u8("iflag").unwrap(), IFLAG_LOGIN);
        assert_eq!(decoded.expect_str("fromname").unwrap(), "listener-1");
        assert_eq!(decoded.expect_str("toname").unwrap(), "listener-1");
        assert!(decoded.payload.is_empty());
    }

    #[test]
    fn test_name_too_long_rejected() {
        let codec = MsgCodec;
        let node = login(&"x".repeat(NAME_LEN + 1));
        assert!(matches!(
            codec.encode(&node, &[]),
            Err(LayerError::ValueTooLarge { .. })
        ));
    }

    #[test]
    fn test_short_header_rejected() {
        let codec = MsgCodec;
        assert!(matches!(
            codec.decode(&[0; 10]),
            Err(LayerError::ShortPayload { .. })
        ));
    }
}
