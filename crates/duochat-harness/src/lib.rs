//! Deterministic simulation harness for Duochat.
//!
//! [`SimEnv`] replaces wall-clock time and OS randomness with a virtual
//! clock and a seeded RNG, so a failing run replays exactly from its seed.
//! [`TestCluster`] puts several signed-in clients on one in-memory store.
//!
//! # Model-Based Testing
//!
//! The `model` module provides a reference implementation of the shared
//! state. Operations are applied to both the model and real clients, and
//! their observable states are compared.
//!
//! # Invariant Testing
//!
//! The `invariants` module checks properties of the store that must hold
//! after every operation. Use [`InvariantRegistry::standard()`] for the
//! full set.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod cluster;
pub mod invariants;
pub mod model;
pub mod sim_env;

pub use cluster::{SimClient, SimUser, TestCluster};
pub use invariants::{
    Invariant, InvariantRegistry, InvariantResult, MessagesImmutable, ParticipantsOnly,
    PresenceConsistency, RosterPointsAtExistingMessage, SeenNeverReverts, SystemSnapshot,
    UnreadNonNegative, Violation, WellFormedRecords,
};
pub use model::{
    ModelMessage, ModelPresence, ModelWorld, ObservableState, Operation, OperationError,
    OperationResult, SmallText, UserIdx,
};
pub use sim_env::SimEnv;
