//! Milestone progress derivation and tracking.
//!
//! # Responsibility
//! - Derive milestone completion from graph structure only.
//! - Keep derived values out of the persisted model.

pub mod board;
pub mod engine;
