//! Composition registry integration tests
//!
//! Spec-level properties of layer resolution across the shipped variant
//! codecs: bounded self-referential chains, opaque fallbacks, rule
//! ordering, and normalizing re-encode.

use tapwire_protocol::variants::{dialog, standard_registry};
use tapwire_protocol::{CompositionRegistry, FieldValue, LayerNode};

fn chain_of(n: usize) -> LayerNode {
    let mut envelope = dialog::envelope(1, 0);
    for i in 0..n {
        dialog::push_item(
            &mut envelope,
            dialog::item(dialog::GROUP_INPUT, 0x09, 0, format!("field-{i}").as_bytes()),
        );
    }
    envelope
}

/// A chain of N items terminates the layer tree at depth N, regardless of N.
#[test]
fn test_item_chain_terminates_at_depth_n() {
    let registry = standard_registry();

    for n in [0usize, 1, 3, 64, 500] {
        let wire = registry.encode_tree(&chain_of(n)).unwrap();
        let tree = registry.decode_tree(dialog::DIALOG, &wire).unwrap();

        // Envelope node plus one node per item.
        assert_eq!(tree.depth(), n + 1, "chain of {n} items");
        let last = tree.walk().last().unwrap();
        assert!(last.payload.is_empty(), "no dangling bytes after item {n}");
    }
}

/// An unregistered type tag resolves to a single opaque leaf retaining the
/// full input.
#[test]
fn test_unknown_type_tag_resolves_opaque() {
    let registry = standard_registry();
    let raw = b"\x01\x02completely opaque bytes".to_vec();

    let tree = registry.decode_tree("unregistered", &raw).unwrap();
    assert_eq!(tree.depth(), 1);
    assert_eq!(tree.raw, raw);
    assert!(tree.child.is_none());

    // Round-trips untouched.
    assert_eq!(registry.encode_tree(&tree).unwrap(), raw);
}

/// Both queue reports and item chains ride the dialog envelope; the rule
/// registered first wins when its discriminator matches.
#[test]
fn test_rule_order_discriminates_same_envelope() {
    let registry = standard_registry();

    let queue = dialog::envelope(1, dialog::FLAG_DPQ).with_payload(vec![0, 9, 0, 1]);
    let wire = registry.encode_tree(&queue).unwrap();
    let tree = registry.decode_tree(dialog::DIALOG, &wire).unwrap();
    assert_eq!(tree.child.as_deref().unwrap().tag, dialog::DPQ);

    let items = registry.encode_tree(&chain_of(1)).unwrap();
    let tree = registry.decode_tree(dialog::DIALOG, &items).unwrap();
    assert_eq!(tree.child.as_deref().unwrap().tag, dialog::DIALOG_ITEM);
}

/// Decode-encode round trip is stable, and field mutation lands in the
/// re-encoded bytes.
#[test]
fn test_normalizing_reencode_roundtrip() {
    let registry = standard_registry();
    let wire = registry.encode_tree(&chain_of(3)).unwrap();

    let tree = registry.decode_tree(dialog::DIALOG, &wire).unwrap();
    assert_eq!(registry.encode_tree(&tree).unwrap(), wire);

    let mut mutated = tree;
    mutated.for_each_mut(|node| {
        if node.tag == dialog::DIALOG_ITEM {
            node.set_field("value", FieldValue::Bytes(b"rewritten".to_vec()));
        }
    });

    let rewire = registry.encode_tree(&mutated).unwrap();
    let reread = registry.decode_tree(dialog::DIALOG, &rewire).unwrap();
    for item in reread.walk().filter(|n| n.tag == dialog::DIALOG_ITEM) {
        assert_eq!(item.expect_bytes("value").unwrap(), b"rewritten");
    }
}

/// A registry with a low depth cap stops producing children there instead
/// of descending without bound.
#[test]
fn test_depth_cap_bounds_resolution() {
    let mut registry = CompositionRegistry::new().with_max_depth(4);
    let stock = standard_registry();

    // Rebuild the stock bindings on the capped registry.
    registry.register(std::sync::Arc::new(dialog::DialogCodec));
    registry.register(std::sync::Arc::new(dialog::DialogItemCodec));
    registry.bind(dialog::DIALOG, |_| true, dialog::DIALOG_ITEM);
    registry.bind(dialog::DIALOG_ITEM, |_| true, dialog::DIALOG_ITEM);

    let wire = stock.encode_tree(&chain_of(10)).unwrap();
    let tree = registry.decode_tree(dialog::DIALOG, &wire).unwrap();
    assert!(tree.depth() <= 5, "depth {} exceeds cap", tree.depth());

    // The unresolved remainder stays on the last node as opaque payload.
    let last = tree.walk().last().unwrap();
    assert!(!last.payload.is_empty());
}
