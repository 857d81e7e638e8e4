//! Model world.
//!
//! A plain in-memory reference of what the shared store must contain after
//! each operation. It is the oracle the real clients are checked against.

use std::collections::{BTreeMap, BTreeSet};

use super::operation::{Operation, OperationError, OperationResult, SmallText, UserIdx};
use crate::sim_env::SimEnv;

/// Default preview length, in characters.
pub const PREVIEW_MAX_CHARS: usize = 60;

/// One message as the model stores it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelMessage {
    /// Author index.
    pub sender: UserIdx,
    /// Trimmed text.
    pub text: String,
    /// Seen flag.
    pub seen: bool,
}

/// Presence as the model sees it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ModelPresence {
    /// Online right now.
    pub online: bool,
    /// When the user was last seen, `None` while online or if never seen.
    pub last_seen_at: Option<u64>,
}

/// Observable state for oracle comparison.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObservableState {
    /// Messages per conversation `(low, high)`, in log order. Only
    /// conversations with at least one message are listed.
    pub messages: Vec<((UserIdx, UserIdx), Vec<ModelMessage>)>,
    /// `unread[viewer][partner]`.
    pub unread: Vec<Vec<u64>>,
    /// Presence per user.
    pub presence: Vec<ModelPresence>,
    /// Block edges `(blocker, blocked)`, sorted.
    pub blocks: Vec<(UserIdx, UserIdx)>,
    /// `previews[viewer][partner]`, the roster preview of the newest message.
    pub previews: Vec<Vec<Option<String>>>,
}

/// Reference implementation of the shared store.
#[derive(Debug, Clone)]
pub struct ModelWorld {
    users: usize,
    now_ms: u64,
    presence: Vec<ModelPresence>,
    disconnect_armed: Vec<bool>,
    blocks: BTreeSet<(UserIdx, UserIdx)>,
    messages: BTreeMap<(UserIdx, UserIdx), Vec<ModelMessage>>,
    unread: BTreeMap<(UserIdx, UserIdx), u64>,
    previews: BTreeMap<(UserIdx, UserIdx), String>,
}

impl ModelWorld {
    /// World of `users` users, nobody online, clock at [`SimEnv::START_MS`].
    pub fn new(users: usize) -> Self {
        Self {
            users,
            now_ms: SimEnv::START_MS,
            presence: vec![ModelPresence { online: false, last_seen_at: None }; users],
            disconnect_armed: vec![false; users],
            blocks: BTreeSet::new(),
            messages: BTreeMap::new(),
            unread: BTreeMap::new(),
            previews: BTreeMap::new(),
        }
    }

    /// Number of users.
    pub fn num_users(&self) -> usize {
        self.users
    }

    /// Map a generated index onto a valid user.
    pub fn user(&self, idx: UserIdx) -> UserIdx {
        (idx as usize % self.users) as UserIdx
    }

    /// Apply an operation and return the result the real system must give.
    pub fn apply(&mut self, op: &Operation) -> OperationResult {
        match op {
            Operation::Send { from, to, text } => self.apply_send(*from, *to, text),
            Operation::Open { viewer, partner } => self.apply_open(*viewer, *partner),
            Operation::GoOnline { user } => {
                self.apply_go_online(*user);
                OperationResult::Ok
            },
            Operation::GoOffline { user } => {
                let user = self.user(*user) as usize;
                self.presence[user] = ModelPresence { online: false, last_seen_at: Some(self.now_ms) };
                self.disconnect_armed[user] = false;
                OperationResult::Ok
            },
            Operation::Disconnect { user } => {
                let user = self.user(*user) as usize;
                if std::mem::take(&mut self.disconnect_armed[user]) {
                    self.presence[user] =
                        ModelPresence { online: false, last_seen_at: Some(self.now_ms) };
                }
                OperationResult::Ok
            },
            Operation::Block { blocker, blocked } => {
                let (blocker, blocked) = (self.user(*blocker), self.user(*blocked));
                if blocker == blocked {
                    return OperationResult::Error(OperationError::SelfConversation);
                }
                self.blocks.insert((blocker, blocked));
                OperationResult::Ok
            },
            Operation::Unblock { blocker, blocked } => {
                let (blocker, blocked) = (self.user(*blocker), self.user(*blocked));
                if blocker == blocked {
                    return OperationResult::Error(OperationError::SelfConversation);
                }
                self.blocks.remove(&(blocker, blocked));
                OperationResult::Ok
            },
            Operation::AdvanceTime { millis } => {
                self.now_ms += u64::from(*millis);
                OperationResult::Ok
            },
        }
    }

    /// Extract observable state for comparison.
    pub fn observable_state(&self) -> ObservableState {
        ObservableState {
            messages: self.messages.iter().map(|(pair, log)| (*pair, log.clone())).collect(),
            unread: grid(self.users, |v, p| self.unread.get(&(v, p)).copied().unwrap_or(0)),
            presence: self.presence.clone(),
            blocks: self.blocks.iter().copied().collect(),
            previews: grid(self.users, |v, p| self.previews.get(&(v, p)).cloned()),
        }
    }

    fn apply_send(&mut self, from: UserIdx, to: UserIdx, text: &SmallText) -> OperationResult {
        let (from, to) = (self.user(from), self.user(to));
        if from == to {
            return OperationResult::Error(OperationError::SelfConversation);
        }

        let text = text.to_text().trim().to_string();
        if text.is_empty() {
            return OperationResult::Error(OperationError::EmptyMessage);
        }
        if self.blocks.contains(&(from, to)) || self.blocks.contains(&(to, from)) {
            return OperationResult::Error(OperationError::Blocked);
        }

        let seen = self.presence[to as usize].online;
        if !seen {
            *self.unread.entry((to, from)).or_default() += 1;
        }

        let preview = preview(&text, PREVIEW_MAX_CHARS);
        self.previews.insert((from, to), preview.clone());
        self.previews.insert((to, from), preview);

        self.messages.entry(pair(from, to)).or_default().push(ModelMessage {
            sender: from,
            text,
            seen,
        });
        OperationResult::Ok
    }

    fn apply_open(&mut self, viewer: UserIdx, partner: UserIdx) -> OperationResult {
        let (viewer, partner) = (self.user(viewer), self.user(partner));
        if viewer == partner {
            return OperationResult::Error(OperationError::SelfConversation);
        }

        if let Some(count) = self.unread.get_mut(&(viewer, partner)) {
            *count = 0;
        }
        self.mark_seen_from(viewer, partner);
        OperationResult::Ok
    }

    fn apply_go_online(&mut self, user: UserIdx) {
        let user = self.user(user);
        self.presence[user as usize] = ModelPresence { online: true, last_seen_at: None };
        self.disconnect_armed[user as usize] = true;

        let pending: Vec<UserIdx> = self
            .unread
            .iter()
            .filter(|((viewer, _), count)| *viewer == user && **count > 0)
            .map(|((_, partner), _)| *partner)
            .collect();
        for partner in pending {
            self.mark_seen_from(user, partner);
        }
    }

    fn mark_seen_from(&mut self, viewer: UserIdx, partner: UserIdx) {
        if let Some(log) = self.messages.get_mut(&pair(viewer, partner)) {
            for message in log.iter_mut().filter(|m| m.sender == partner) {
                message.seen = true;
            }
        }
    }
}

/// `n` by `n` table indexed `[viewer][partner]`.
pub fn grid<T>(n: usize, cell: impl Fn(UserIdx, UserIdx) -> T) -> Vec<Vec<T>> {
    (0..n as UserIdx).map(|v| (0..n as UserIdx).map(|p| cell(v, p)).collect()).collect()
}

/// Canonical `(low, high)` pair.
pub fn pair(a: UserIdx, b: UserIdx) -> (UserIdx, UserIdx) {
    if a < b { (a, b) } else { (b, a) }
}

fn preview(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let head: String = text.chars().take(max_chars).collect();
    format!("{head}…")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn short(seed: u8) -> SmallText {
        SmallText { seed, size_class: 2 }
    }

    #[test]
    fn offline_recipient_accumulates_unread_until_open() {
        let mut world = ModelWorld::new(3);

        world.apply(&Operation::Send { from: 0, to: 1, text: short(1) });
        world.apply(&Operation::Send { from: 0, to: 1, text: short(2) });
        assert_eq!(world.observable_state().unread[1][0], 2);

        world.apply(&Operation::Open { viewer: 1, partner: 0 });
        let state = world.observable_state();
        assert_eq!(state.unread[1][0], 0);
        assert!(state.messages[0].1.iter().all(|m| m.seen));
    }

    #[test]
    fn online_recipient_sees_immediately() {
        let mut world = ModelWorld::new(3);
        world.apply(&Operation::GoOnline { user: 1 });

        world.apply(&Operation::Send { from: 0, to: 1, text: short(1) });

        let state = world.observable_state();
        assert_eq!(state.unread[1][0], 0);
        assert!(state.messages[0].1[0].seen);
    }

    #[test]
    fn block_rejects_both_directions() {
        let mut world = ModelWorld::new(3);
        world.apply(&Operation::Block { blocker: 1, blocked: 0 });

        for (from, to) in [(0, 1), (1, 0)] {
            assert_eq!(
                world.apply(&Operation::Send { from, to, text: short(0) }),
                OperationResult::Error(OperationError::Blocked)
            );
        }
    }

    #[test]
    fn disconnect_only_fires_after_a_session() {
        let mut world = ModelWorld::new(2);
        world.apply(&Operation::Disconnect { user: 0 });
        assert_eq!(world.observable_state().presence[0].last_seen_at, None);

        world.apply(&Operation::GoOnline { user: 0 });
        world.apply(&Operation::AdvanceTime { millis: 10 });
        world.apply(&Operation::Disconnect { user: 0 });
        assert_eq!(
            world.observable_state().presence[0],
            ModelPresence { online: false, last_seen_at: Some(SimEnv::START_MS + 10) }
        );
    }

    #[test]
    fn indices_wrap() {
        let world = ModelWorld::new(3);
        assert_eq!(world.user(4), 1);
    }
}
