//! Persistence use-case service.
//!
//! # Responsibility
//! - Restore the graph from durable storage at startup.
//! - Own the debounced autosave for one storage key.
//! - Produce export artifacts and apply imported artifacts.
//!
//! # Invariants
//! - A missing, unreadable or corrupt stored graph falls back to the
//!   default graph and is never surfaced as an error.
//! - Export never mutates the store.
//! - A rejected import leaves the store exactly as it was.

use crate::bus::change_bus::ChangeBus;
use crate::clock::Clock;
use crate::model::document::{decode_graph, encode_graph_pretty};
use crate::model::graph::{GraphSnapshot, GraphValidationError};
use crate::repo::kv_repo::{KvStore, StorageError};
use crate::service::autosave::{write_snapshot, Autosave, AutosaveOutcome};
use crate::store::graph_store::GraphStore;
use log::{info, warn};
use once_cell::sync::Lazy;
use regex::Regex;
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::path::{Path, PathBuf};
use std::rc::Rc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Storage key of the graph payload.
pub const GRAPH_STORAGE_KEY: &str = "flowymap-graph";
/// Extension of exported map files (without the dot).
pub const EXPORT_EXTENSION: &str = "flowymap";
/// MIME type attached to exported map files.
pub const EXPORT_MIME_TYPE: &str = "application/json";
const EXPORT_FILE_PREFIX: &str = "flowymap-";

static JSON_MIME_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)^\s*(application|text)/([a-z0-9.+-]+\+)?json\s*(;.*)?$")
        .expect("valid json mime regex")
});

/// Node/edge counts of a graph that was loaded into the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImportSummary {
    pub nodes: usize,
    pub edges: usize,
}

impl ImportSummary {
    fn of(snapshot: &GraphSnapshot) -> Self {
        Self {
            nodes: snapshot.nodes.len(),
            edges: snapshot.edges.len(),
        }
    }
}

/// Result of startup restore.
#[derive(Debug)]
pub enum RestoreOutcome {
    Restored(ImportSummary),
    /// No stored graph; the default graph is in place.
    Missing,
    /// Stored graph failed validation; the default graph is in place.
    Corrupt(GraphValidationError),
    /// Storage could not be read; the default graph is in place.
    Unreadable(StorageError),
}

/// File produced by export.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExportArtifact {
    pub file_name: String,
    pub mime_type: &'static str,
    pub contents: String,
}

impl ExportArtifact {
    /// Writes the artifact into `dir` and returns the full path.
    pub fn write_to_dir(&self, dir: impl AsRef<Path>) -> std::io::Result<PathBuf> {
        let path = dir.as_ref().join(&self.file_name);
        std::fs::write(&path, self.contents.as_bytes())?;
        Ok(path)
    }
}

/// User-selected file offered for import.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImportSource {
    pub file_name: String,
    pub mime_type: Option<String>,
    pub contents: Vec<u8>,
}

impl ImportSource {
    pub fn new(
        file_name: impl Into<String>,
        mime_type: Option<String>,
        contents: impl Into<Vec<u8>>,
    ) -> Self {
        Self {
            file_name: file_name.into(),
            mime_type,
            contents: contents.into(),
        }
    }

    /// Reads a file from disk. A `.json` extension (any case) is reported as
    /// `application/json`; other files carry no MIME type.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, ImportError> {
        let path = path.as_ref();
        let contents = std::fs::read(path).map_err(ImportError::Io)?;
        let file_name = path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default();
        let mime_type = path
            .extension()
            .filter(|ext| ext.eq_ignore_ascii_case("json"))
            .map(|_| EXPORT_MIME_TYPE.to_string());
        Ok(Self::new(file_name, mime_type, contents))
    }
}

/// Import failure. The store is unchanged in every case.
#[derive(Debug)]
pub enum ImportError {
    Io(std::io::Error),
    /// Neither the extension nor the MIME type identifies a map file.
    UnsupportedFile(String),
    Encoding(std::str::Utf8Error),
    Validation(GraphValidationError),
}

impl Display for ImportError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Io(err) => write!(f, "failed to read import file: {err}"),
            Self::UnsupportedFile(name) => {
                write!(f, "`{name}` is not a .{EXPORT_EXTENSION} or JSON file")
            }
            Self::Encoding(err) => write!(f, "import file is not valid UTF-8: {err}"),
            Self::Validation(err) => write!(f, "invalid map file: {err}"),
        }
    }
}

impl Error for ImportError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Io(err) => Some(err),
            Self::UnsupportedFile(_) => None,
            Self::Encoding(err) => Some(err),
            Self::Validation(err) => Some(err),
        }
    }
}

impl From<GraphValidationError> for ImportError {
    fn from(value: GraphValidationError) -> Self {
        Self::Validation(value)
    }
}

/// Durable storage, autosave and file exchange for one map.
pub struct PersistenceService<K: KvStore> {
    kv: K,
    autosave: Autosave,
}

impl<K: KvStore> PersistenceService<K> {
    pub fn new(kv: K, graph_key: impl Into<String>, debounce: Duration, clock: Rc<dyn Clock>) -> Self {
        Self {
            kv,
            autosave: Autosave::new(graph_key, debounce, clock),
        }
    }

    pub fn kv(&self) -> &K {
        &self.kv
    }

    pub fn autosave(&self) -> &Autosave {
        &self.autosave
    }

    /// Loads the stored graph into `store`, falling back to the default graph.
    pub fn restore(&self, store: &mut GraphStore) -> RestoreOutcome {
        let key = self.autosave.key();
        let outcome = match self.kv.get(key) {
            Ok(None) => RestoreOutcome::Missing,
            Err(err) => RestoreOutcome::Unreadable(err),
            Ok(Some(text)) => match decode_graph(&text) {
                Ok(snapshot) => {
                    let summary = ImportSummary::of(&snapshot);
                    let GraphSnapshot { nodes, edges } = snapshot;
                    match store.replace_all(nodes, edges) {
                        Ok(()) => RestoreOutcome::Restored(summary),
                        Err(err) => RestoreOutcome::Corrupt(err),
                    }
                }
                Err(err) => RestoreOutcome::Corrupt(err),
            },
        };

        match &outcome {
            RestoreOutcome::Restored(summary) => info!(
                "event=graph_restore module=persistence status=ok nodes={} edges={}",
                summary.nodes, summary.edges
            ),
            RestoreOutcome::Missing => {
                info!("event=graph_restore module=persistence status=skip reason=missing")
            }
            RestoreOutcome::Corrupt(err) => warn!(
                "event=graph_restore module=persistence status=error error_code=corrupt_payload error={}",
                err
            ),
            RestoreOutcome::Unreadable(err) => warn!(
                "event=graph_restore module=persistence status=error error_code=storage_read_failed error={}",
                err
            ),
        }

        if !matches!(outcome, RestoreOutcome::Restored(_))
            && store.snapshot() != GraphSnapshot::default_graph()
        {
            store.reset();
        }
        outcome
    }

    /// Starts autosaving snapshots published on `bus`.
    pub fn attach_autosave(&mut self, bus: &ChangeBus) {
        self.autosave.attach(bus);
    }

    pub fn detach_autosave(&mut self) {
        self.autosave.detach();
    }

    /// Runs the autosave timer.
    pub fn tick(&mut self) -> AutosaveOutcome {
        self.autosave.poll(&self.kv)
    }

    /// Writes any pending autosave immediately.
    pub fn flush(&mut self) -> AutosaveOutcome {
        self.autosave.flush(&self.kv)
    }

    /// Writes `snapshot` now, bypassing the debounce window.
    pub fn save_now(&self, snapshot: &GraphSnapshot) -> Result<usize, StorageError> {
        write_snapshot(&self.kv, self.autosave.key(), snapshot)
    }

    /// Builds an export artifact for the current graph.
    pub fn export(&self, store: &GraphStore, at: SystemTime) -> Result<ExportArtifact, serde_json::Error> {
        export_graph(&store.snapshot(), at)
    }

    /// Validates `source` and replaces the graph with its contents.
    pub fn import(
        &self,
        store: &mut GraphStore,
        source: &ImportSource,
    ) -> Result<ImportSummary, ImportError> {
        import_graph(store, source)
    }
}

/// Serializes `snapshot` into a timestamp-named artifact.
pub fn export_graph(snapshot: &GraphSnapshot, at: SystemTime) -> Result<ExportArtifact, serde_json::Error> {
    let contents = encode_graph_pretty(snapshot)?;
    let artifact = ExportArtifact {
        file_name: export_file_name(at),
        mime_type: EXPORT_MIME_TYPE,
        contents,
    };
    info!(
        "event=graph_export module=persistence status=ok bytes={} nodes={} edges={}",
        artifact.contents.len(),
        snapshot.nodes.len(),
        snapshot.edges.len()
    );
    Ok(artifact)
}

/// Parses `source` and, on success, replaces the graph in `store`.
pub fn import_graph(store: &mut GraphStore, source: &ImportSource) -> Result<ImportSummary, ImportError> {
    let result = parse_import(source).and_then(|snapshot| {
        let summary = ImportSummary::of(&snapshot);
        let GraphSnapshot { nodes, edges } = snapshot;
        store.replace_all(nodes, edges)?;
        Ok(summary)
    });

    match &result {
        Ok(summary) => info!(
            "event=graph_import module=persistence status=ok nodes={} edges={}",
            summary.nodes, summary.edges
        ),
        Err(err) => warn!(
            "event=graph_import module=persistence status=error error={}",
            err
        ),
    }
    result
}

/// Returns whether a file is acceptable for import by name or MIME type.
pub fn is_importable(file_name: &str, mime_type: Option<&str>) -> bool {
    let by_extension = Path::new(file_name)
        .extension()
        .is_some_and(|ext| ext.eq_ignore_ascii_case(EXPORT_EXTENSION));
    by_extension || mime_type.is_some_and(|mime| JSON_MIME_RE.is_match(mime))
}

/// `flowymap-<unix epoch ms>.flowymap`
pub fn export_file_name(at: SystemTime) -> String {
    let millis = at
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_millis())
        .unwrap_or_default();
    format!("{EXPORT_FILE_PREFIX}{millis}.{EXPORT_EXTENSION}")
}

fn parse_import(source: &ImportSource) -> Result<GraphSnapshot, ImportError> {
    if !is_importable(&source.file_name, source.mime_type.as_deref()) {
        return Err(ImportError::UnsupportedFile(source.file_name.clone()));
    }
    let text = std::str::from_utf8(&source.contents).map_err(ImportError::Encoding)?;
    Ok(decode_graph(text.trim_start_matches('\u{feff}'))?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn file_source_infers_json_mime_from_extension() {
        let dir = tempfile::tempdir().unwrap();
        let upper = dir.path().join("PLAN.JSON");
        let plain = dir.path().join("plan.txt");
        std::fs::write(&upper, "{}").unwrap();
        std::fs::write(&plain, "{}").unwrap();

        let source = ImportSource::from_path(&upper).unwrap();
        assert_eq!(source.file_name, "PLAN.JSON");
        assert_eq!(source.mime_type.as_deref(), Some(EXPORT_MIME_TYPE));
        assert!(is_importable(&source.file_name, source.mime_type.as_deref()));

        let source = ImportSource::from_path(&plain).unwrap();
        assert_eq!(source.mime_type, None);
        assert!(!is_importable(&source.file_name, source.mime_type.as_deref()));
    }

    #[test]
    fn export_name_uses_epoch_millis() {
        let at = UNIX_EPOCH + Duration::from_millis(1_700_000_000_123);
        assert_eq!(export_file_name(at), "flowymap-1700000000123.flowymap");
    }

    #[test]
    fn importable_by_extension_or_json_mime() {
        assert!(is_importable("map.flowymap", None));
        assert!(is_importable("MAP.FLOWYMAP", None));
        assert!(is_importable("data.txt", Some("application/json")));
        assert!(is_importable("data", Some("application/json; charset=utf-8")));
        assert!(is_importable("data", Some("text/json")));
        assert!(is_importable("data", Some("application/vnd.flowymap+json")));
        assert!(!is_importable("data.txt", Some("text/plain")));
        assert!(!is_importable("data.json.bak", None));
    }
}
