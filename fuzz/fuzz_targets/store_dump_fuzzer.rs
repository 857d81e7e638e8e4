//! Fuzz target for decoding untrusted store contents
//!
//! Any JSON tree may sit in the shared store. Snapshot decoding, the
//! invariant checks and the record decoders must report problems, never
//! panic.

#![no_main]

use duochat_core::{
    path::StorePath,
    records::{decode_messages, decode_roster},
};
use duochat_harness::{InvariantRegistry, SystemSnapshot};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let Ok(tree) = serde_json::from_slice::<serde_json::Value>(data) else {
        return;
    };

    let snapshot = SystemSnapshot::from_dump(&tree);
    let registry = InvariantRegistry::standard();
    let first = registry.check_all(&snapshot);

    let mut next = snapshot.clone();
    next.record_history(&snapshot);
    let _ = registry.check_all(&next);

    // Malformed records always surface as violations.
    if !snapshot.malformed.is_empty() {
        assert!(first.is_err());
    }

    let path = StorePath::root();
    let _ = decode_messages(&path, Some(tree.clone()));
    let _ = decode_roster(&path, Some(tree));
});
