#![no_main]

use std::collections::BTreeSet;

use libfuzzer_sys::fuzz_target;
use ward_core::{grants_cover, SENSITIVE_NODES};
use ward_perms::plan_overlay;

fuzz_target!(|data: &[u8]| {
    let raw = String::from_utf8_lossy(data);
    let permissions = raw
        .split('\n')
        .filter(|line| !line.is_empty())
        .map(str::to_string)
        .collect::<BTreeSet<_>>();
    let plan = plan_overlay(&permissions);

    assert!(plan.len() >= permissions.len());
    for node in SENSITIVE_NODES {
        if !grants_cover(permissions.iter().map(String::as_str), node) {
            assert_eq!(plan.effective(node), Some(false));
        }
    }
});
