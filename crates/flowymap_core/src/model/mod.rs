//! Graph domain model.
//!
//! # Responsibility
//! - Define canonical node/edge structures used by every core component.
//! - Own the versioned document schema used by autosave and file export.
//!
//! # Invariants
//! - Node payloads are a tagged union keyed on node kind.
//! - Derived progress values are never part of the model.

pub mod document;
pub mod graph;
