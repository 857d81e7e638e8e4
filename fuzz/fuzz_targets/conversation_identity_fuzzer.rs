//! Fuzz target for user ids and conversation id derivation
//!
//! # Invariants
//!
//! - A uid is accepted only without the join boundary or reserved characters
//! - Deriving is commutative
//! - The key holds exactly one join boundary
//! - Only the two participants are members
//! - Self-conversations are rejected

#![no_main]

use arbitrary::Arbitrary;
use duochat_core::{
    derive_id,
    identity::{JOIN_BOUNDARY, MAX_USER_ID_LEN},
    path::{PathSegment, RESERVED_CHARS},
    UserId,
};
use libfuzzer_sys::fuzz_target;

#[derive(Debug, Arbitrary)]
struct Input {
    a: String,
    b: String,
    other: String,
}

fn accepted(raw: &str) -> bool {
    !raw.is_empty()
        && raw.len() <= MAX_USER_ID_LEN
        && !raw.contains(JOIN_BOUNDARY)
        && !raw.chars().any(|c| RESERVED_CHARS.contains(&c) || c.is_control())
}

fuzz_target!(|input: Input| {
    let a = UserId::new(input.a.as_str());
    let b = UserId::new(input.b.as_str());
    assert_eq!(a.is_ok(), accepted(&input.a), "uid acceptance for {:?}", input.a);
    assert_eq!(b.is_ok(), accepted(&input.b), "uid acceptance for {:?}", input.b);

    let (Ok(a), Ok(b)) = (a, b) else {
        return;
    };

    if a == b {
        assert!(derive_id(&a, &b).is_err(), "self-conversation accepted");
        return;
    }

    let ab = derive_id(&a, &b).expect("distinct valid uids");
    let ba = derive_id(&b, &a).expect("distinct valid uids");
    assert_eq!(ab, ba);
    assert_eq!(ab.key().matches(JOIN_BOUNDARY).count(), 1);
    assert!(PathSegment::new(ab.key()).is_ok(), "key is not a valid store segment");

    let (low, high) = ab.participants();
    assert!(low < high);
    assert_eq!(ab.partner_of(&a).expect("participant"), &b);
    assert_eq!(ab.partner_of(&b).expect("participant"), &a);

    if let Ok(other) = UserId::new(input.other) {
        assert_eq!(ab.includes(&other), other == a || other == b);
        assert_eq!(ab.partner_of(&other).is_ok(), ab.includes(&other));
    }
});
