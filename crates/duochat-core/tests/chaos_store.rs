//! Chaos property tests for the chat pipeline.
//!
//! Clients run over a `ChaoticStore` that fails operations at random before
//! they reach the store. Whatever fails, the shared state must stay valid:
//! - a send reported as successful is in the log exactly once
//! - a failed send leaves no message behind
//! - counters never exceed the messages they count
//! - the standard invariants hold throughout

use duochat_core::{
    ChaoticStore, ChatClient, ChatConfig, ChatError, MemoryStore, RetryPolicy, StaticIdentity,
    UserId,
};
use duochat_harness::{InvariantRegistry, SimEnv, SystemSnapshot};
use proptest::prelude::*;

type Chaotic = ChaoticStore<MemoryStore<SimEnv>>;

fn uid(raw: &str) -> UserId {
    UserId::new(raw).unwrap()
}

fn client<S: duochat_core::Store>(store: S, env: &SimEnv, user: &str) -> ChatClient<S, SimEnv, StaticIdentity> {
    let config = ChatConfig {
        retry: RetryPolicy { max_attempts: 3, initial_backoff_ms: 10, max_backoff_ms: 40 },
        ..ChatConfig::default()
    };
    ChatClient::new(store, env.clone(), StaticIdentity::signed_in(uid(user)), &config)
}

#[derive(Debug)]
struct Outcome {
    sent: usize,
    attempts: usize,
    injected: usize,
    during: Vec<SystemSnapshot>,
    after_send: SystemSnapshot,
    after_open: SystemSnapshot,
}

fn run(failure_rate: f64, seed: u64, messages: usize) -> Outcome {
    let runtime = tokio::runtime::Builder::new_current_thread().enable_time().build().unwrap();
    runtime.block_on(async {
        let env = SimEnv::with_seed(seed);
        let root = MemoryStore::new(env.clone());
        let chaotic: Chaotic = ChaoticStore::with_seed(root.connect().unwrap(), failure_rate, seed);
        let alice = client(chaotic.clone(), &env, "alice");

        let mut sent = 0;
        let mut during = Vec::new();
        for i in 0..messages {
            match alice.send(&uid("bob"), &format!("m{i}")).await {
                Ok(_) => sent += 1,
                Err(ChatError::StoreUnavailable(_)) => {},
                Err(other) => panic!("unexpected error: {other}"),
            }
            during.push(SystemSnapshot::from_dump(&root.dump().unwrap()));
        }
        let after_send = SystemSnapshot::from_dump(&root.dump().unwrap());

        // Bob opens over a reliable connection to settle the counters.
        let bob = client(root.connect().unwrap(), &env, "bob");
        bob.open_conversation(&uid("alice")).await.unwrap();
        let after_open = SystemSnapshot::from_dump(&root.dump().unwrap());

        Outcome {
            sent,
            attempts: chaotic.operation_count(),
            injected: chaotic.injected_failures(),
            during,
            after_send,
            after_open,
        }
    })
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(50))]

    #[test]
    fn prop_chaos_sends_are_all_or_nothing(
        failure_rate in 0.0..0.6,
        seed in any::<u64>(),
        messages in 1usize..30,
    ) {
        let outcome = run(failure_rate, seed, messages);
        let registry = InvariantRegistry::standard();

        // ORACLE: invariants hold after every step, including history checks
        let mut previous = SystemSnapshot::empty();
        for (i, snapshot) in outcome.during.iter().enumerate() {
            let mut snapshot = snapshot.clone();
            snapshot.record_history(&previous);
            registry.assert_all(&snapshot, &format!("after send {i}"));
            previous = snapshot;
        }

        // ORACLE: exactly the acknowledged sends are in the log
        prop_assert_eq!(outcome.after_send.message_count(), outcome.sent);

        // ORACLE: the counter never over-counts
        let unread = outcome
            .after_send
            .roster
            .get("bob")
            .and_then(|entries| entries.get("alice"))
            .map_or(0, |entry| entry.unread_count);
        prop_assert!(unread <= outcome.sent as i64, "unread {} > sent {}", unread, outcome.sent);

        // ORACLE: a reliable open settles everything
        registry.assert_all(&outcome.after_open, "after open");
        let unread = outcome
            .after_open
            .roster
            .get("bob")
            .and_then(|entries| entries.get("alice"))
            .map_or(0, |entry| entry.unread_count);
        prop_assert_eq!(unread, 0);
        prop_assert!(outcome.after_open.conversations.values().flat_map(|log| log.values()).all(|m| m.seen));

        prop_assert!(outcome.injected <= outcome.attempts);
    }
}

#[test]
fn zero_failure_rate_is_transparent() {
    let outcome = run(0.0, 11, 10);

    assert_eq!(outcome.sent, 10);
    assert_eq!(outcome.injected, 0);
    assert_eq!(outcome.after_send.roster["bob"]["alice"].unread_count, 10);
}

#[test]
fn total_failure_sends_nothing() {
    let outcome = run(1.0, 11, 5);

    assert_eq!(outcome.sent, 0);
    assert_eq!(outcome.after_send.message_count(), 0);
    assert_eq!(outcome.injected, outcome.attempts);
}
