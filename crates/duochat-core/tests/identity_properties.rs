//! Property tests for conversation identity and log ordering.

use duochat_core::{
    ConversationId, Store, UserId, derive_id, path::layout, records::preview,
    store::{format_key, parse_key},
};
use duochat_harness::TestCluster;
use proptest::prelude::*;

/// User ids without reserved characters or the join boundary.
fn uid_strategy() -> impl Strategy<Value = UserId> {
    "[a-zA-Z0-9_-]{1,24}".prop_map(|raw| UserId::new(raw).unwrap())
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(200))]

    /// Property: the id does not depend on argument order.
    #[test]
    fn prop_derive_is_symmetric(a in uid_strategy(), b in uid_strategy()) {
        prop_assume!(a != b);

        let ab = derive_id(&a, &b).unwrap();
        let ba = derive_id(&b, &a).unwrap();

        // ORACLE: same key, same participants
        prop_assert_eq!(ab.key(), ba.key());
        prop_assert_eq!(ab.participants(), ba.participants());
    }

    /// Property: distinct pairs never share an id.
    #[test]
    fn prop_derive_is_injective(
        a in uid_strategy(),
        b in uid_strategy(),
        c in uid_strategy(),
        d in uid_strategy(),
    ) {
        prop_assume!(a != b && c != d);

        let same_pair = (a == c && b == d) || (a == d && b == c);
        let first = derive_id(&a, &b).unwrap();
        let second = derive_id(&c, &d).unwrap();

        // ORACLE: ids are equal exactly when the unordered pairs are
        prop_assert_eq!(first == second, same_pair);
    }

    /// Property: the participants can be read back from the id, and only
    /// they are members.
    #[test]
    fn prop_participants_round_trip(a in uid_strategy(), b in uid_strategy(), other in uid_strategy()) {
        prop_assume!(a != b);

        let id: ConversationId = derive_id(&a, &b).unwrap();
        let (low, high) = id.participants();

        prop_assert!(low < high);
        prop_assert_eq!(id.partner_of(&a).unwrap(), &b);
        prop_assert_eq!(id.partner_of(&b).unwrap(), &a);
        prop_assert_eq!(id.includes(&other), other == a || other == b);
    }

    /// Property: key order is numeric order.
    #[test]
    fn prop_keys_sort_numerically(x in any::<u64>(), y in any::<u64>()) {
        let (kx, ky) = (format_key(x), format_key(y));

        prop_assert_eq!(kx.cmp(&ky), x.cmp(&y));
        prop_assert_eq!(parse_key(&kx), Some(x));
    }

    /// Property: a preview never exceeds its budget plus the ellipsis, and
    /// short texts are kept whole.
    #[test]
    fn prop_preview_is_bounded(text in "\\PC{0,120}", max in 1usize..80) {
        let cut = preview(&text, max);
        let len = cut.chars().count();

        if text.chars().count() <= max {
            prop_assert_eq!(cut, text);
        } else {
            prop_assert_eq!(len, max + 1);
            prop_assert!(cut.ends_with('…'));
        }
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(30))]

    /// Property: messages come back in send order whatever the interleaving
    /// of senders, with strictly increasing keys.
    #[test]
    fn prop_history_preserves_send_order(
        seed in any::<u64>(),
        senders in prop::collection::vec(any::<bool>(), 1..40),
    ) {
        let runtime = tokio::runtime::Builder::new_current_thread().enable_time().build().unwrap();
        let (expected, history, keys) = runtime.block_on(async {
            let cluster = TestCluster::new(seed, &["alice", "bob"]).unwrap();
            let mut expected = Vec::new();
            for (i, from_alice) in senders.iter().enumerate() {
                let (from, to) = if *from_alice { (0, 1) } else { (1, 0) };
                let text = format!("m{i}");
                cluster.client(from).send(cluster.uid(to), &text).await.unwrap();
                expected.push((cluster.uid(from).clone(), text));
            }

            let history = cluster.client(0).open_conversation(cluster.uid(1)).await.unwrap();
            let room = derive_id(cluster.uid(0), cluster.uid(1)).unwrap();
            let raw = cluster.store().read(&layout::messages(&room)).await.unwrap().unwrap();
            let keys: Vec<String> = raw.as_object().unwrap().keys().cloned().collect();
            (expected, history, keys)
        });

        let actual: Vec<_> = history.into_iter().map(|m| (m.sender_id, m.text)).collect();

        // ORACLE: log order is send order
        prop_assert_eq!(actual, expected);
        // ORACLE: keys are dense and increasing from zero
        let indices: Vec<_> = keys.iter().map(|k| parse_key(k).unwrap()).collect();
        prop_assert_eq!(indices, (0..senders.len() as u64).collect::<Vec<_>>());
    }
}

