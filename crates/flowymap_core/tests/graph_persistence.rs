use flowymap_core::db::migrations::latest_version;
use flowymap_core::{
    decode_graph, encode_graph, export_graph, import_graph, open_db, open_db_in_memory,
    AutosaveOutcome, ChangeBus, DbError, Edge, GraphStore, GraphValidationError, ImportError,
    ImportSource, KvStore, ManualClock, MemoryKvStore, MilestoneData, Node, NodeKind,
    PersistenceService, Position, RestoreOutcome, SqliteKvStore, StorageError, TaskData, TodoItem,
    DEFAULT_AUTOSAVE_DEBOUNCE, GRAPH_STORAGE_KEY,
};
use rusqlite::Connection;
use std::rc::Rc;
use std::time::{Duration, SystemTime};

fn sample_store(bus: &ChangeBus) -> GraphStore {
    let mut store = GraphStore::new(bus.clone());
    store
        .replace_all(
            vec![
                Node::start("n1"),
                Node::task(
                    "t1",
                    Position::new(120.5, -40.0),
                    TaskData {
                        title: "Write draft".to_string(),
                        description: "first pass".to_string(),
                        done: true,
                        todos: vec![
                            TodoItem {
                                text: "outline".to_string(),
                                done: true,
                            },
                            TodoItem::new("body"),
                        ],
                    },
                ),
                Node::milestone(
                    "m1",
                    Position::new(300.0, 10.0),
                    MilestoneData {
                        title: "Ship".to_string(),
                    },
                ),
            ],
            vec![Edge::new("e1", "n1", "t1"), Edge::new("e2", "t1", "m1")],
        )
        .unwrap();
    store
}

fn persistence(kv: Rc<MemoryKvStore>, clock: &ManualClock) -> PersistenceService<Rc<MemoryKvStore>> {
    PersistenceService::new(
        kv,
        GRAPH_STORAGE_KEY,
        DEFAULT_AUTOSAVE_DEBOUNCE,
        Rc::new(clock.clone()),
    )
}

#[test]
fn export_then_import_restores_the_same_graph() {
    let original = sample_store(&ChangeBus::new());
    let artifact = export_graph(&original.snapshot(), SystemTime::now()).unwrap();
    assert!(artifact.file_name.ends_with(".flowymap"));
    assert_eq!(artifact.mime_type, "application/json");

    let mut target = GraphStore::new(ChangeBus::new());
    let source = ImportSource::new(&artifact.file_name, None, artifact.contents.clone());
    let summary = import_graph(&mut target, &source).unwrap();

    assert_eq!((summary.nodes, summary.edges), (3, 2));
    assert_eq!(target.snapshot(), original.snapshot());
}

#[test]
fn export_artifact_writes_into_directory() {
    let dir = tempfile::tempdir().unwrap();
    let store = sample_store(&ChangeBus::new());
    let artifact = export_graph(&store.snapshot(), SystemTime::now()).unwrap();

    let path = artifact.write_to_dir(dir.path()).unwrap();
    let mut target = GraphStore::new(ChangeBus::new());
    import_graph(&mut target, &ImportSource::from_path(&path).unwrap()).unwrap();
    assert_eq!(target.snapshot(), store.snapshot());
}

#[test]
fn import_with_dangling_edge_leaves_store_unchanged() {
    let bus = ChangeBus::new();
    let mut store = sample_store(&bus);
    let before = store.snapshot();
    let revision = store.revision();

    let payload = r#"{
        "version": "1",
        "nodes": [{"id": "n1", "type": "start", "position": {"x": 0, "y": 0}, "data": {}}],
        "edges": [{"id": "e1", "source": "missing", "target": "n1"}]
    }"#;
    let err = import_graph(
        &mut store,
        &ImportSource::new("bad.flowymap", None, payload),
    )
    .unwrap_err();

    assert!(matches!(
        err,
        ImportError::Validation(GraphValidationError::DanglingEdge { ref node_id, .. })
            if node_id == "missing"
    ));
    assert_eq!(store.snapshot(), before);
    assert_eq!(store.revision(), revision);
}

#[test]
fn import_rejects_unrelated_files_and_versions() {
    let mut store = GraphStore::new(ChangeBus::new());

    let err = import_graph(
        &mut store,
        &ImportSource::new("notes.txt", Some("text/plain".to_string()), "{}"),
    )
    .unwrap_err();
    assert!(matches!(err, ImportError::UnsupportedFile(_)));

    let err = import_graph(
        &mut store,
        &ImportSource::new(
            "map.json",
            Some("application/json".to_string()),
            r#"{"version":"2","nodes":[],"edges":[]}"#,
        ),
    )
    .unwrap_err();
    assert!(matches!(
        err,
        ImportError::Validation(GraphValidationError::UnsupportedVersion(_))
    ));
    assert_eq!(store.revision(), 0);
}

#[test]
fn import_accepts_canvas_type_names_and_loose_todos() {
    let payload = r#"{
        "version": 1,
        "nodes": [
            {"id": "n1", "type": "startNode", "position": {"x": 0, "y": 0}, "data": {}},
            {"id": "t1", "type": "taskNode", "position": {"x": 1, "y": 2},
             "data": {"title": "A", "done": 1, "todos": ["one", {"text": "two", "done": true}]}},
            {"id": "m1", "type": "milestoneNode", "position": {"x": 3, "y": 4}, "data": {"title": "M"}}
        ],
        "edges": []
    }"#;
    let snapshot = decode_graph(payload).unwrap();
    let task = snapshot.node("t1").unwrap().as_task().unwrap();
    assert!(task.done);
    assert_eq!(
        task.todos,
        vec![
            TodoItem::new("one"),
            TodoItem {
                text: "two".to_string(),
                done: true
            }
        ]
    );
    assert_eq!(snapshot.node("m1").unwrap().kind(), NodeKind::Milestone);

    let encoded = encode_graph(&snapshot).unwrap();
    assert!(encoded.contains(r#""type":"task""#));
    assert!(!encoded.contains("taskNode"));
}

#[test]
fn rapid_edits_produce_one_write_with_last_state() {
    let kv = Rc::new(MemoryKvStore::new());
    let clock = ManualClock::new();
    let bus = ChangeBus::new();
    let mut service = persistence(Rc::clone(&kv), &clock);
    service.attach_autosave(&bus);
    let mut store = GraphStore::new(bus.clone());

    let task = store.add_node(NodeKind::Task, None).unwrap();
    for step in 0..5 {
        store.set_title(&task, format!("title {step}")).unwrap();
        clock.advance(Duration::from_millis(100));
        service.tick();
    }
    assert!(kv.get(GRAPH_STORAGE_KEY).unwrap().is_none());

    clock.advance(Duration::from_millis(500));
    service.tick();
    service.tick();
    assert_eq!(service.autosave().writes(), 1);

    let stored = decode_graph(&kv.get(GRAPH_STORAGE_KEY).unwrap().unwrap()).unwrap();
    assert_eq!(stored, store.snapshot());
    assert_eq!(stored.node(&task).unwrap().data.title(), Some("title 4"));
}

#[test]
fn failed_autosave_retries_without_further_edits() {
    let kv = Rc::new(MemoryKvStore::with_quota(600));
    kv.set("scratch", &"x".repeat(500)).unwrap();
    let clock = ManualClock::new();
    let bus = ChangeBus::new();
    let mut service = persistence(Rc::clone(&kv), &clock);
    service.attach_autosave(&bus);
    let mut store = GraphStore::new(bus.clone());

    let task = store.add_node(NodeKind::Task, None).unwrap();
    store.set_title(&task, "kept").unwrap();
    clock.advance(DEFAULT_AUTOSAVE_DEBOUNCE);
    assert!(matches!(
        service.tick(),
        AutosaveOutcome::Failed {
            error: StorageError::QuotaExceeded { .. },
            ..
        }
    ));
    assert!(service.autosave().next_deadline().is_some());

    clock.advance(DEFAULT_AUTOSAVE_DEBOUNCE);
    assert!(matches!(service.tick(), AutosaveOutcome::Failed { .. }));

    assert!(kv.remove("scratch").unwrap());
    clock.advance(DEFAULT_AUTOSAVE_DEBOUNCE);
    assert!(matches!(service.tick(), AutosaveOutcome::Written { .. }));
    assert!(service.autosave().next_deadline().is_none());

    let stored = decode_graph(&kv.get(GRAPH_STORAGE_KEY).unwrap().unwrap()).unwrap();
    assert_eq!(stored.node(&task).unwrap().data.title(), Some("kept"));
}

#[test]
fn restore_falls_back_to_default_graph() {
    let kv = Rc::new(MemoryKvStore::new());
    let clock = ManualClock::new();
    let service = persistence(Rc::clone(&kv), &clock);

    let mut store = GraphStore::new(ChangeBus::new());
    assert!(matches!(service.restore(&mut store), RestoreOutcome::Missing));
    assert_eq!(store.nodes().len(), 1);

    kv.set(GRAPH_STORAGE_KEY, "{\"version\":\"1\",\"nodes\":").unwrap();
    let mut store = sample_store(&ChangeBus::new());
    assert!(matches!(
        service.restore(&mut store),
        RestoreOutcome::Corrupt(GraphValidationError::Malformed(_))
    ));
    assert_eq!(store.nodes().len(), 1);
    assert_eq!(store.nodes()[0].id, "n1");
}

#[test]
fn restore_reads_what_save_now_wrote() {
    let kv = Rc::new(MemoryKvStore::new());
    let clock = ManualClock::new();
    let service = persistence(Rc::clone(&kv), &clock);
    let original = sample_store(&ChangeBus::new());
    service.save_now(&original.snapshot()).unwrap();

    let mut restored = GraphStore::new(ChangeBus::new());
    assert!(matches!(
        service.restore(&mut restored),
        RestoreOutcome::Restored(_)
    ));
    assert_eq!(restored.snapshot(), original.snapshot());
}

#[test]
fn sqlite_store_round_trips_entries() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("nested").join("flowymap.db");

    {
        let conn = open_db(&path).unwrap();
        let kv = SqliteKvStore::new(&conn);
        assert_eq!(kv.get(GRAPH_STORAGE_KEY).unwrap(), None);
        kv.set(GRAPH_STORAGE_KEY, "first").unwrap();
        kv.set(GRAPH_STORAGE_KEY, "second").unwrap();
    }

    let conn = open_db(&path).unwrap();
    let kv = SqliteKvStore::new(&conn);
    assert_eq!(kv.get(GRAPH_STORAGE_KEY).unwrap().as_deref(), Some("second"));
    assert!(kv.remove(GRAPH_STORAGE_KEY).unwrap());
    assert!(!kv.remove(GRAPH_STORAGE_KEY).unwrap());
    assert!(matches!(kv.set(" ", "v"), Err(StorageError::InvalidKey(_))));
}

#[test]
fn migrations_are_applied_once_and_newer_files_rejected() {
    let conn = open_db_in_memory().unwrap();
    assert_eq!(user_version(&conn), latest_version());

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("future.db");
    let conn = Connection::open(&path).unwrap();
    conn.execute_batch("PRAGMA user_version = 42;").unwrap();
    drop(conn);

    match open_db(&path).unwrap_err() {
        DbError::UnsupportedSchemaVersion {
            db_version,
            latest_supported,
        } => {
            assert_eq!(db_version, 42);
            assert_eq!(latest_supported, latest_version());
        }
        other => panic!("unexpected error: {other}"),
    }
}

fn user_version(conn: &Connection) -> u32 {
    conn.query_row("PRAGMA user_version;", [], |row| row.get(0))
        .unwrap()
}
