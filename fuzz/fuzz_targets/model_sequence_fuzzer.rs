//! Fuzz target for the reference model
//!
//! Drives arbitrary operation sequences through `ModelWorld` and checks the
//! rules every implementation must obey.
//!
//! # Invariants
//!
//! - Messages are never removed or rewritten
//! - A seen message never becomes unseen
//! - A counter never exceeds the messages the partner sent
//! - Sends across a block are rejected and change nothing
//! - An online user has no last-seen time

#![no_main]

use arbitrary::Arbitrary;
use duochat_harness::{ModelWorld, ObservableState, Operation, OperationError, OperationResult};
use libfuzzer_sys::fuzz_target;

#[derive(Debug, Arbitrary)]
struct Scenario {
    users: u8,
    ops: Vec<Operation>,
}

fn check_progress(before: &ObservableState, after: &ObservableState) {
    for (pair, old_log) in &before.messages {
        let new_log = after
            .messages
            .iter()
            .find(|(p, _)| p == pair)
            .map(|(_, log)| log)
            .expect("conversation vanished");
        assert!(new_log.len() >= old_log.len(), "messages removed from {pair:?}");
        for (old, new) in old_log.iter().zip(new_log) {
            assert_eq!((old.sender, &old.text), (new.sender, &new.text), "message rewritten");
            assert!(!old.seen || new.seen, "seen flag reverted");
        }
    }
}

fn check_state(state: &ObservableState) {
    for (viewer, row) in state.unread.iter().enumerate() {
        for (partner, unread) in row.iter().enumerate() {
            let key = if viewer < partner { (viewer, partner) } else { (partner, viewer) };
            let sent = state
                .messages
                .iter()
                .find(|((low, high), _)| (*low as usize, *high as usize) == key)
                .map_or(0, |(_, log)| log.iter().filter(|m| m.sender as usize == partner).count());
            assert!(*unread as usize <= sent, "unread {unread} > sent {sent}");
        }
    }
    for presence in &state.presence {
        assert!(!(presence.online && presence.last_seen_at.is_some()), "online with last seen");
    }
}

fuzz_target!(|scenario: Scenario| {
    let users = usize::from(scenario.users % 4) + 2;
    let mut world = ModelWorld::new(users);
    let mut before = world.observable_state();

    for op in scenario.ops.iter().take(256) {
        let result = world.apply(op);
        let after = world.observable_state();

        if let OperationResult::Error(OperationError::Blocked) = result {
            assert_eq!(before, after, "rejected send changed the world");
        }
        if let (Operation::Send { from, to, .. }, OperationResult::Ok) = (op, &result) {
            let (from, to) = (world.user(*from), world.user(*to));
            assert!(!after.blocks.contains(&(from, to)) && !after.blocks.contains(&(to, from)));
        }

        check_progress(&before, &after);
        check_state(&after);
        before = after;
    }
});
