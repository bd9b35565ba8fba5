use flowymap_core::{
    node_phase, AutosaveOutcome, ImportSource, KvStore, ManualClock, MapSession, MemoryKvStore,
    NodeChange, NodeKind, NodePhase, NoticeLevel, NoticeLog, Position, RestoreOutcome,
    SessionConfig, DEFAULT_START_NODE_ID, GRAPH_STORAGE_KEY,
};
use std::cell::RefCell;
use std::rc::Rc;
use std::time::{Duration, SystemTime};

fn open(kv: &Rc<MemoryKvStore>, clock: &ManualClock) -> MapSession<Rc<MemoryKvStore>> {
    MapSession::open(
        Rc::clone(kv),
        Rc::new(clock.clone()),
        SessionConfig::default(),
    )
}

#[test]
fn edits_survive_reopening_the_session() {
    let kv = Rc::new(MemoryKvStore::new());
    let clock = ManualClock::new();

    let mut session = open(&kv, &clock);
    let task = session.store_mut().add_node(NodeKind::Task, None).unwrap();
    let milestone = session
        .store_mut()
        .add_node(NodeKind::Milestone, None)
        .unwrap();
    session.store_mut().connect(DEFAULT_START_NODE_ID, &task).unwrap();
    session.store_mut().connect(&task, &milestone).unwrap();
    session.store_mut().set_task_done(&task, true).unwrap();
    assert!(session.progress(&milestone).unwrap().is_complete());

    let deadline = session.next_deadline().unwrap();
    clock.advance(Duration::from_millis(500));
    assert!(clock_reached(&clock, deadline));
    assert!(matches!(session.tick().autosave, AutosaveOutcome::Written { .. }));
    session.close();

    let reopened = open(&kv, &clock);
    assert!(matches!(
        reopened.restore_outcome(),
        RestoreOutcome::Restored(summary) if summary.nodes == 3 && summary.edges == 2
    ));
    let progress = reopened.progress(&milestone).unwrap();
    assert_eq!((progress.completed, progress.total), (1, 1));
    assert!(reopened.next_deadline().is_none());
}

#[test]
fn corrupt_storage_opens_default_graph() {
    let kv = Rc::new(MemoryKvStore::new());
    kv.set(GRAPH_STORAGE_KEY, "not a map").unwrap();
    let session = open(&kv, &ManualClock::new());

    assert!(matches!(
        session.restore_outcome(),
        RestoreOutcome::Corrupt(_)
    ));
    assert_eq!(session.store().nodes().len(), 1);
    assert!(session.all_progress().is_empty());
}

#[test]
fn removal_goes_through_removing_phase() {
    let kv = Rc::new(MemoryKvStore::new());
    let clock = ManualClock::new();
    let mut session = open(&kv, &clock);
    let task = session.store_mut().add_node(NodeKind::Task, None).unwrap();

    session.request_removal(&[task.clone()]).unwrap();
    assert_eq!(
        flowymap_core::node_phase(session.store(), &task),
        NodePhase::Removing
    );

    clock.advance(Duration::from_millis(239));
    assert!(session.tick().removed.is_empty());
    clock.advance(Duration::from_millis(1));
    assert_eq!(session.tick().removed.len(), 1);
    assert_eq!(
        flowymap_core::node_phase(session.store(), &task),
        NodePhase::Removed
    );
}

#[test]
fn close_mid_removal_discards_timers() {
    let kv = Rc::new(MemoryKvStore::new());
    let clock = ManualClock::new();
    let mut session = open(&kv, &clock);
    let task = session.store_mut().add_node(NodeKind::Task, None).unwrap();
    session.request_removal(&[task]).unwrap();

    let cancelled = session.close();
    assert_eq!(cancelled.len(), 1);
    clock.advance(Duration::from_secs(5));
    assert!(kv.get(GRAPH_STORAGE_KEY).unwrap().is_none());
}

#[test]
fn export_and_import_report_notices() {
    let kv = Rc::new(MemoryKvStore::new());
    let clock = ManualClock::new();
    let notices = Rc::new(RefCell::new(NoticeLog::new()));

    let mut source_session = open(&kv, &clock);
    source_session
        .store_mut()
        .add_node(NodeKind::Milestone, None)
        .unwrap();
    let artifact = source_session.export(SystemTime::now()).unwrap();
    drop(source_session);

    let other_kv = Rc::new(MemoryKvStore::new());
    let mut session = open(&other_kv, &clock);
    session.set_notifier(Box::new(Rc::clone(&notices)));
    let summary = session
        .import(&ImportSource::new(
            artifact.file_name.clone(),
            Some("application/json".to_string()),
            artifact.contents,
        ))
        .unwrap();
    assert_eq!(summary.nodes, 2);
    assert_eq!(session.all_progress().len(), 1);

    session.reset();
    assert_eq!(session.store().nodes().len(), 1);

    let levels: Vec<NoticeLevel> = notices.borrow().notices().iter().map(|n| n.level).collect();
    assert_eq!(levels, [NoticeLevel::Success, NoticeLevel::Info]);
}

#[test]
fn import_cancels_pending_removals() {
    let kv = Rc::new(MemoryKvStore::new());
    let clock = ManualClock::new();
    let mut session = open(&kv, &clock);
    let task = session.store_mut().add_node(NodeKind::Task, None).unwrap();
    session.store_mut().connect(DEFAULT_START_NODE_ID, &task).unwrap();
    let artifact = session.export(SystemTime::now()).unwrap();

    session.request_removal(&[task.clone()]).unwrap();
    assert_eq!(node_phase(session.store(), &task), NodePhase::Removing);

    session
        .import(&ImportSource::new(
            artifact.file_name.clone(),
            None,
            artifact.contents,
        ))
        .unwrap();
    assert_eq!(node_phase(session.store(), &task), NodePhase::Active);

    clock.advance(Duration::from_millis(240));
    assert!(session.tick().removed.is_empty());
    assert_eq!(node_phase(session.store(), &task), NodePhase::Active);
    assert_eq!(session.store().edges().len(), 1);
}

#[test]
fn reset_cancels_pending_removals() {
    let kv = Rc::new(MemoryKvStore::new());
    let clock = ManualClock::new();
    let mut session = open(&kv, &clock);
    let task = session.store_mut().add_node(NodeKind::Task, None).unwrap();
    session.request_removal(&[task]).unwrap();

    session.reset();
    clock.advance(Duration::from_millis(240));
    assert!(session.tick().removed.is_empty());
    assert_eq!(session.store().nodes().len(), 1);
}

#[test]
fn remove_changes_wait_for_the_grace_period() {
    let kv = Rc::new(MemoryKvStore::new());
    let clock = ManualClock::new();
    let mut session = open(&kv, &clock);
    let task = session.store_mut().add_node(NodeKind::Task, None).unwrap();

    let batch = session
        .apply_node_changes(vec![
            NodeChange::Position {
                id: task.clone(),
                position: Position::new(5.0, 6.0),
            },
            NodeChange::Remove { id: task.clone() },
        ])
        .unwrap();
    assert!(batch.is_some());
    let node = session.store().node(&task).unwrap();
    assert_eq!(node.position, Position::new(5.0, 6.0));
    assert_eq!(node_phase(session.store(), &task), NodePhase::Removing);

    clock.advance(Duration::from_millis(239));
    assert!(session.tick().removed.is_empty());
    assert!(session.store().node(&task).is_some());

    clock.advance(Duration::from_millis(1));
    assert_eq!(session.tick().removed.len(), 1);
    assert_eq!(node_phase(session.store(), &task), NodePhase::Removed);
}

#[test]
fn changes_without_removals_start_no_batch() {
    let kv = Rc::new(MemoryKvStore::new());
    let mut session = open(&kv, &ManualClock::new());
    let task = session.store_mut().add_node(NodeKind::Task, None).unwrap();

    let batch = session
        .apply_node_changes(vec![NodeChange::Position {
            id: task.clone(),
            position: Position::new(1.0, 1.0),
        }])
        .unwrap();
    assert!(batch.is_none());
    assert_eq!(node_phase(session.store(), &task), NodePhase::Active);
}

fn clock_reached(clock: &ManualClock, deadline: std::time::Instant) -> bool {
    use flowymap_core::Clock;
    clock.now() >= deadline
}
