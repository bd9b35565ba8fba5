//! Storage access layer.
//!
//! # Responsibility
//! - Define the durable key-value contract used by persistence services.
//! - Isolate SQLite query details from service orchestration.

pub mod kv_repo;
