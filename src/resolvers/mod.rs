//! Resolvers: the state-reconciliation core.
//!
//! Each resolver is a set of repository-style functions operating on an
//! explicit connection or transaction handle. Callers are responsible for
//! evaluating the permission gate first and for committing the transaction
//! only on success, so a mid-resolver failure leaves no partial state.

pub mod descendants;
pub mod move_entity;
pub mod propagate;

pub use descendants::collect_descendants;
pub use move_entity::{move_entities, MoveDestination, MoveOutcome};
pub use propagate::{propagate, record_activity};
