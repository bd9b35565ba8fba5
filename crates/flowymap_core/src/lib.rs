//! Core engine for flowymap task maps.
//! Owns the graph invariants, milestone progress derivation, node
//! lifecycle and persistence; rendering layers only read snapshots.

pub mod bus;
pub mod clock;
pub mod db;
pub mod lifecycle;
pub mod logging;
pub mod model;
pub mod progress;
pub mod repo;
pub mod service;
pub mod store;

pub use bus::change_bus::{ChangeBus, SubscriberId, Subscription};
pub use clock::{Clock, ManualClock, SystemClock};
pub use db::{open_db, open_db_in_memory, Connection, DbError, DbResult};
pub use lifecycle::removal::{
    node_phase, BatchId, BatchState, NodePhase, RemovalBatch, RemovalController,
    DEFAULT_DELETE_GRACE,
};
pub use logging::{default_log_level, init_logging, logging_status};
pub use model::document::{decode_graph, encode_graph, encode_graph_pretty, GRAPH_SCHEMA_VERSION};
pub use model::graph::{
    Edge, EdgeId, GraphSnapshot, GraphValidationError, MilestoneData, Node, NodeData, NodeId,
    NodeKind, Position, TaskData, TodoItem, DEFAULT_START_NODE_ID,
};
pub use progress::board::{CelebrationSink, MilestoneCompleted, ProgressBoard};
pub use progress::engine::{compute_progress, reachable_tasks, MilestoneProgress};
pub use repo::kv_repo::{KvStore, MemoryKvStore, SqliteKvStore, StorageError, StorageResult};
pub use service::autosave::{Autosave, AutosaveOutcome, DEFAULT_AUTOSAVE_DEBOUNCE};
pub use service::map_session::{MapSession, SessionConfig, TickReport};
pub use service::notice::{Notice, NoticeLevel, NoticeLog, Notifier};
pub use service::persistence_service::{
    export_graph, import_graph, is_importable, ExportArtifact, ImportError, ImportSource,
    ImportSummary, PersistenceService, RestoreOutcome, GRAPH_STORAGE_KEY,
};
pub use service::preferences::{
    Keybinds, PreferenceStore, Theme, KEYBINDS_STORAGE_KEY, THEME_STORAGE_KEY,
};
pub use store::changes::{EdgeChange, GraphError, NodeChange, NodeDataPatch};
pub use store::graph_store::{GraphResult, GraphStore, RemovalSummary};

/// Health check used by the CLI smoke command.
pub fn ping() -> &'static str {
    "pong"
}

pub fn core_version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
