//! Node lifecycle protocols.

pub mod removal;
