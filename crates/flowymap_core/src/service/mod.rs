//! Use-case services on top of the store and storage.
//!
//! # Responsibility
//! - Persist and restore the graph, exchange map files, keep preferences.
//! - Compose the engine pieces into a session a host can drive.

pub mod autosave;
pub mod map_session;
pub mod notice;
pub mod persistence_service;
pub mod preferences;
