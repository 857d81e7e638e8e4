//! Model-based testing.
//!
//! [`ModelWorld`] is a reference implementation of the shared store's
//! observable state. Tests apply the same [`Operation`] sequence to the model
//! and to real clients, then compare [`ObservableState`]s.

mod operation;
mod world;

pub use operation::{Operation, OperationError, OperationResult, SmallText, UserIdx};
pub use world::{
    ModelMessage, ModelPresence, ModelWorld, ObservableState, PREVIEW_MAX_CHARS, grid, pair,
};
