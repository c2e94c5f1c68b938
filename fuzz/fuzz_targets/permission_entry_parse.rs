#![no_main]

use libfuzzer_sys::fuzz_target;
use ward_core::{pattern_covers, validate_node, PermissionEntry, NEGATION_MARKER};

fuzz_target!(|data: &[u8]| {
    let raw = String::from_utf8_lossy(data);
    let entry = PermissionEntry::parse(&raw);

    match entry {
        PermissionEntry::Grant(node) => {
            assert_eq!(node, raw.as_ref());
            assert!(entry.value());
        }
        PermissionEntry::Deny(node) => {
            assert!(raw.starts_with(NEGATION_MARKER));
            assert_eq!(node.len() + NEGATION_MARKER.len_utf8(), raw.len());
            assert!(!entry.value());
        }
    }

    if validate_node(&raw).is_ok() {
        assert!(!entry.node().is_empty());
        assert!(!raw.chars().any(char::is_whitespace));
        assert!(pattern_covers(entry.node(), entry.node()));
    }
});
