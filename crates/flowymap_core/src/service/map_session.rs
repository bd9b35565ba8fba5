//! Composition root for one open map.
//!
//! # Responsibility
//! - Wire the Change Bus, Graph Store, Progress Board, Removal Controller
//!   and Persistence Service in the order their contracts require.
//! - Drive both timers from one host-facing `tick`.
//!
//! # Invariants
//! - The progress board subscribes before restore, autosave after it, so
//!   restoring never schedules a write of what was just read.
//! - After `close` (or drop) no timer owned by the session can fire.
//! - Replacing the whole map (import, reset) cancels pending removal
//!   batches; their ids must not hit nodes of the new map.
//! - Node removals arriving as change-lists go through the two-phase delete.

use crate::bus::change_bus::{ChangeBus, Subscription};
use crate::clock::Clock;
use crate::lifecycle::removal::{BatchId, RemovalBatch, RemovalController, DEFAULT_DELETE_GRACE};
use crate::model::graph::NodeId;
use crate::progress::board::ProgressBoard;
use crate::progress::engine::MilestoneProgress;
use crate::repo::kv_repo::KvStore;
use crate::service::autosave::{AutosaveOutcome, DEFAULT_AUTOSAVE_DEBOUNCE};
use crate::service::notice::{Notice, Notifier};
use crate::service::persistence_service::{
    ExportArtifact, ImportError, ImportSource, ImportSummary, PersistenceService, RestoreOutcome,
    GRAPH_STORAGE_KEY,
};
use crate::service::preferences::PreferenceStore;
use crate::store::changes::NodeChange;
use crate::store::graph_store::{GraphResult, GraphStore};
use log::info;
use std::cell::RefCell;
use std::rc::Rc;
use std::time::{Duration, Instant, SystemTime};

/// Tunables of one session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionConfig {
    pub delete_grace: Duration,
    pub autosave_debounce: Duration,
    pub graph_key: String,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            delete_grace: DEFAULT_DELETE_GRACE,
            autosave_debounce: DEFAULT_AUTOSAVE_DEBOUNCE,
            graph_key: GRAPH_STORAGE_KEY.to_string(),
        }
    }
}

/// What one `tick` did.
#[derive(Debug)]
pub struct TickReport {
    pub removed: Vec<RemovalBatch>,
    pub autosave: AutosaveOutcome,
}

/// One open map and the services observing it.
pub struct MapSession<K: KvStore> {
    bus: ChangeBus,
    store: GraphStore,
    board: Rc<RefCell<ProgressBoard>>,
    board_subscription: Option<Subscription>,
    removal: RemovalController,
    persistence: PersistenceService<K>,
    notifier: Option<Box<dyn Notifier>>,
    clock: Rc<dyn Clock>,
    restore_outcome: RestoreOutcome,
    closed: bool,
}

impl<K: KvStore> MapSession<K> {
    /// Opens a session with an empty progress board.
    pub fn open(kv: K, clock: Rc<dyn Clock>, config: SessionConfig) -> Self {
        Self::open_with_board(kv, clock, config, ProgressBoard::new())
    }

    /// Opens a session around a caller-built board (e.g. one with a
    /// celebration sink).
    pub fn open_with_board(
        kv: K,
        clock: Rc<dyn Clock>,
        config: SessionConfig,
        board: ProgressBoard,
    ) -> Self {
        let bus = ChangeBus::new();
        let mut store = GraphStore::new(bus.clone());

        let board = Rc::new(RefCell::new(board));
        let board_subscription = ProgressBoard::attach(&board, &bus);

        let mut persistence = PersistenceService::new(
            kv,
            config.graph_key,
            config.autosave_debounce,
            Rc::clone(&clock),
        );
        let restore_outcome = persistence.restore(&mut store);
        persistence.attach_autosave(&bus);

        info!(
            "event=session_open module=session status=ok nodes={} edges={} milestones={}",
            store.nodes().len(),
            store.edges().len(),
            board.borrow().len()
        );

        Self {
            bus,
            store,
            board,
            board_subscription: Some(board_subscription),
            removal: RemovalController::new(config.delete_grace),
            persistence,
            notifier: None,
            clock,
            restore_outcome,
            closed: false,
        }
    }

    pub fn set_notifier(&mut self, notifier: Box<dyn Notifier>) {
        self.notifier = Some(notifier);
    }

    pub fn bus(&self) -> &ChangeBus {
        &self.bus
    }

    pub fn store(&self) -> &GraphStore {
        &self.store
    }

    pub fn store_mut(&mut self) -> &mut GraphStore {
        &mut self.store
    }

    pub fn restore_outcome(&self) -> &RestoreOutcome {
        &self.restore_outcome
    }

    pub fn persistence(&self) -> &PersistenceService<K> {
        &self.persistence
    }

    /// Theme/keybind entries stored next to the graph.
    pub fn preferences(&self) -> PreferenceStore<&K> {
        PreferenceStore::new(self.persistence.kv())
    }

    pub fn progress(&self, milestone_id: &str) -> Option<MilestoneProgress> {
        self.board.borrow().progress(milestone_id).cloned()
    }

    pub fn all_progress(&self) -> Vec<MilestoneProgress> {
        self.board.borrow().all().cloned().collect()
    }

    /// Starts two-phase deletion of `ids` at the current clock instant.
    pub fn request_removal(&mut self, ids: &[NodeId]) -> Option<BatchId> {
        let now = self.clock.now();
        self.removal.request_removal(&mut self.store, ids, now)
    }

    /// Applies an editor change-list. `Remove` entries start a removal batch
    /// instead of deleting immediately; the rest commit as one revision first.
    pub fn apply_node_changes(
        &mut self,
        changes: Vec<NodeChange>,
    ) -> GraphResult<Option<BatchId>> {
        let mut removals = Vec::new();
        let mut rest = Vec::with_capacity(changes.len());
        for change in changes {
            match change {
                NodeChange::Remove { id } => removals.push(id),
                other => rest.push(other),
            }
        }

        if !rest.is_empty() {
            self.store.apply_node_changes(rest)?;
        }
        if removals.is_empty() {
            return Ok(None);
        }
        Ok(self.request_removal(&removals))
    }

    /// Fires due removal batches, then a due autosave.
    ///
    /// Removal runs first so the write that follows already reflects it
    /// whenever both deadlines have passed.
    pub fn tick(&mut self) -> TickReport {
        let removed = self.removal.poll(&mut self.store, self.clock.now());
        let autosave = self.persistence.tick();
        TickReport { removed, autosave }
    }

    /// Earliest instant at which `tick` has work to do.
    pub fn next_deadline(&self) -> Option<Instant> {
        let removal = self.removal.next_deadline();
        let autosave = self.persistence.autosave().next_deadline();
        match (removal, autosave) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        }
    }

    /// Writes any pending autosave now.
    pub fn flush(&mut self) -> AutosaveOutcome {
        self.persistence.flush()
    }

    pub fn export(&mut self, at: SystemTime) -> Result<ExportArtifact, serde_json::Error> {
        let result = self.persistence.export(&self.store, at);
        match &result {
            Ok(artifact) => self.notify(Notice::success(format!("Exported {}", artifact.file_name))),
            Err(err) => self.notify(Notice::error(format!("Export failed: {err}"))),
        }
        result
    }

    pub fn import(&mut self, source: &ImportSource) -> Result<ImportSummary, ImportError> {
        let result = self.persistence.import(&mut self.store, source);
        match &result {
            Ok(summary) => {
                self.removal.cancel_all();
                self.notify(Notice::success(format!(
                    "Imported {} nodes and {} edges",
                    summary.nodes, summary.edges
                )));
            }
            Err(err) => self.notify(Notice::error(format!("Import failed: {err}"))),
        }
        result
    }

    /// Replaces the map with the default graph.
    pub fn reset(&mut self) {
        self.removal.cancel_all();
        self.store.reset();
        self.notify(Notice::info("Map cleared"));
    }

    /// Tears the session down. Pending removals and an unwritten autosave
    /// are discarded; call `flush` first to keep the latter.
    pub fn close(mut self) -> Vec<RemovalBatch> {
        self.teardown()
    }

    fn notify(&mut self, notice: Notice) {
        if let Some(notifier) = self.notifier.as_mut() {
            notifier.notify(notice);
        }
    }

    fn teardown(&mut self) -> Vec<RemovalBatch> {
        if self.closed {
            return Vec::new();
        }
        self.closed = true;

        let cancelled = self.removal.cancel_all();
        self.persistence.detach_autosave();
        if let Some(subscription) = self.board_subscription.take() {
            subscription.unsubscribe();
        }
        self.bus.shutdown();
        info!(
            "event=session_close module=session status=ok cancelled_batches={} revision={}",
            cancelled.len(),
            self.store.revision()
        );
        cancelled
    }
}

impl<K: KvStore> Drop for MapSession<K> {
    fn drop(&mut self) {
        self.teardown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::model::graph::{NodeKind, DEFAULT_START_NODE_ID};
    use crate::repo::kv_repo::MemoryKvStore;
    use crate::service::notice::NoticeLog;

    fn open_session() -> (MapSession<Rc<MemoryKvStore>>, ManualClock, Rc<MemoryKvStore>) {
        let kv = Rc::new(MemoryKvStore::new());
        let clock = ManualClock::new();
        let session = MapSession::open(
            Rc::clone(&kv),
            Rc::new(clock.clone()),
            SessionConfig::default(),
        );
        (session, clock, kv)
    }

    #[test]
    fn open_on_empty_storage_does_not_schedule_a_write() {
        let (session, _clock, kv) = open_session();
        assert!(matches!(session.restore_outcome(), RestoreOutcome::Missing));
        assert!(session.next_deadline().is_none());
        assert!(kv.is_empty());
    }

    #[test]
    fn tick_runs_removal_before_autosave() {
        let (mut session, clock, kv) = open_session();
        let task = session.store_mut().add_node(NodeKind::Task, None).unwrap();
        session
            .store_mut()
            .connect(DEFAULT_START_NODE_ID, &task)
            .unwrap();
        session.request_removal(&[task.clone()]).unwrap();

        clock.advance(Duration::from_millis(500));
        let report = session.tick();
        assert_eq!(report.removed.len(), 1);
        assert!(matches!(report.autosave, AutosaveOutcome::Waiting { .. }));

        clock.advance(Duration::from_millis(500));
        assert!(matches!(
            session.tick().autosave,
            AutosaveOutcome::Written { .. }
        ));
        let stored = kv.get(GRAPH_STORAGE_KEY).unwrap().unwrap();
        assert!(!stored.contains(&task));
    }

    #[test]
    fn close_cancels_timers_and_unsubscribes() {
        let (mut session, _clock, kv) = open_session();
        let task = session.store_mut().add_node(NodeKind::Task, None).unwrap();
        session.request_removal(&[task]).unwrap();
        let bus = session.bus().clone();

        let cancelled = session.close();
        assert_eq!(cancelled.len(), 1);
        assert_eq!(bus.subscriber_count(), 0);
        assert!(kv.is_empty());
    }

    #[test]
    fn import_failure_raises_error_notice() {
        let (mut session, _clock, _kv) = open_session();
        let log = Rc::new(RefCell::new(NoticeLog::new()));
        session.set_notifier(Box::new(Rc::clone(&log)));

        let source = ImportSource::new("map.flowymap", None, "{not json");
        assert!(session.import(&source).is_err());
        let last = log.borrow().last().cloned().unwrap();
        assert!(last.message.starts_with("Import failed"));
    }
}
