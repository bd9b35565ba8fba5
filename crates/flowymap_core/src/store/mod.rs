//! Canonical graph ownership and mutation.
//!
//! # Responsibility
//! - Hold the only writable copy of the graph.
//! - Translate canvas change-lists and editor patches into validated commits.

pub mod changes;
pub mod graph_store;
