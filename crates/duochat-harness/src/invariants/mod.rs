//! Invariant checking for deterministic simulation testing.
//!
//! Invariants are properties of the shared store that must hold after every
//! operation, whatever the interleaving. They are checked against a
//! [`SystemSnapshot`] parsed from the store dump, so a check never observes a
//! half-applied write.
//!
//! # Usage
//!
//! ```ignore
//! let registry = InvariantRegistry::standard();
//! let mut snapshot = SystemSnapshot::from_dump(&store.dump()?);
//! snapshot.record_history(&previous);
//! registry.assert_all(&snapshot, "after send");
//! ```

mod checks;
mod snapshot;

pub use checks::{
    MessagesImmutable, ParticipantsOnly, PresenceConsistency, RosterPointsAtExistingMessage,
    SeenNeverReverts, UnreadNonNegative, WellFormedRecords,
};
pub use snapshot::{
    MessageSnapshot, PresenceSnapshot, RosterSnapshot, SystemSnapshot, history_key,
};

/// Invariant check result.
pub type InvariantResult = Result<(), Violation>;

/// Invariant violation with context.
#[derive(Debug, Clone)]
pub struct Violation {
    /// Name of the violated invariant.
    pub invariant: &'static str,
    /// Description of what went wrong.
    pub message: String,
}

impl std::fmt::Display for Violation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.invariant, self.message)
    }
}

impl std::error::Error for Violation {}

/// A property checked against a store snapshot.
pub trait Invariant: Send + Sync {
    /// Invariant name for error reporting.
    fn name(&self) -> &'static str;

    /// Check the invariant against the current state.
    fn check(&self, state: &SystemSnapshot) -> InvariantResult;
}

/// Registry of invariants to check.
pub struct InvariantRegistry {
    invariants: Vec<Box<dyn Invariant>>,
}

impl Default for InvariantRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl InvariantRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self { invariants: Vec::new() }
    }

    /// Registry with every standard check.
    pub fn standard() -> Self {
        let mut registry = Self::new();
        registry.add(WellFormedRecords);
        registry.add(PresenceConsistency);
        registry.add(UnreadNonNegative);
        registry.add(ParticipantsOnly);
        registry.add(RosterPointsAtExistingMessage);
        registry.add(MessagesImmutable);
        registry.add(SeenNeverReverts);
        registry
    }

    /// Add an invariant to the registry.
    pub fn add<I: Invariant + 'static>(&mut self, invariant: I) {
        self.invariants.push(Box::new(invariant));
    }

    /// Check all invariants against the given state.
    ///
    /// Returns `Ok(())` if all invariants hold, or all violations found.
    pub fn check_all(&self, state: &SystemSnapshot) -> Result<(), Vec<Violation>> {
        let violations: Vec<_> =
            self.invariants.iter().filter_map(|inv| inv.check(state).err()).collect();

        if violations.is_empty() { Ok(()) } else { Err(violations) }
    }

    /// Check all invariants, panicking with every violation and the
    /// snapshot.
    #[allow(clippy::panic)]
    pub fn assert_all(&self, state: &SystemSnapshot, context: &str) {
        if let Err(violations) = self.check_all(state) {
            let messages: Vec<_> = violations.iter().map(ToString::to_string).collect();
            panic!(
                "Invariant violation {context}:\n  {}\nstate: {}",
                messages.join("\n  "),
                state.to_json()
            );
        }
    }

    /// Number of registered invariants.
    pub fn len(&self) -> usize {
        self.invariants.len()
    }

    /// Check if registry is empty.
    pub fn is_empty(&self) -> bool {
        self.invariants.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn standard_registry_has_invariants() {
        let registry = InvariantRegistry::standard();
        assert!(!registry.is_empty());
        assert_eq!(registry.len(), 7);
    }

    #[test]
    fn empty_snapshot_passes_invariants() {
        let registry = InvariantRegistry::standard();
        assert!(registry.check_all(&SystemSnapshot::empty()).is_ok());
    }

    #[test]
    fn every_violation_is_reported() {
        let state = SystemSnapshot::from_dump(&serde_json::json!({
            "presence": { "alice": { "isActive": true, "lastSeenAt": 5 } },
            "roster": { "bob": { "alice": { "unreadCount": -2 } } },
        }));

        let violations = InvariantRegistry::standard().check_all(&state).unwrap_err();
        let names: Vec<_> = violations.iter().map(|v| v.invariant).collect();
        assert_eq!(names, ["presence_consistency", "unread_non_negative"]);
    }
}
