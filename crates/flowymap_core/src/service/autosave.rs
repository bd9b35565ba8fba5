//! Debounced autosave of committed snapshots.
//!
//! # Responsibility
//! - Listen on the Change Bus and remember the newest snapshot.
//! - Write it once the graph has been quiet for the debounce interval.
//!
//! # Invariants
//! - Each broadcast restarts the window; N broadcasts inside one window
//!   produce exactly one write containing the last snapshot.
//! - A failed write is logged and rescheduled one debounce interval later
//!   with the same snapshot; a newer broadcast replaces it as usual.
//! - `cancel`/`detach` clear the pending write without touching storage.

use crate::bus::change_bus::{ChangeBus, Subscription};
use crate::clock::Clock;
use crate::model::document::encode_graph;
use crate::model::graph::GraphSnapshot;
use crate::repo::kv_repo::{KvStore, StorageError};
use log::{debug, info, warn};
use std::cell::RefCell;
use std::rc::Rc;
use std::time::{Duration, Instant};

/// Quiet period required before a snapshot is written.
pub const DEFAULT_AUTOSAVE_DEBOUNCE: Duration = Duration::from_millis(500);

#[derive(Debug)]
struct PendingWrite {
    snapshot: Rc<GraphSnapshot>,
    deadline: Instant,
}

/// Outcome of one `poll`/`flush` call.
#[derive(Debug)]
pub enum AutosaveOutcome {
    /// Nothing scheduled.
    Idle,
    /// A write is scheduled but its window is still open.
    Waiting { deadline: Instant },
    Written { bytes: usize },
    /// Storage rejected the write; it is retried at `retry_at`.
    Failed {
        error: StorageError,
        retry_at: Instant,
    },
}

/// Debounce timer plus the storage key it writes to.
pub struct Autosave {
    key: String,
    debounce: Duration,
    clock: Rc<dyn Clock>,
    pending: Rc<RefCell<Option<PendingWrite>>>,
    subscription: Option<Subscription>,
    writes: u64,
}

impl Autosave {
    pub fn new(key: impl Into<String>, debounce: Duration, clock: Rc<dyn Clock>) -> Self {
        Self {
            key: key.into(),
            debounce,
            clock,
            pending: Rc::new(RefCell::new(None)),
            subscription: None,
            writes: 0,
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    /// Number of successful writes so far.
    pub fn writes(&self) -> u64 {
        self.writes
    }

    /// Starts listening on `bus`. Re-attaching replaces the old subscription.
    pub fn attach(&mut self, bus: &ChangeBus) {
        self.detach_subscription();
        let pending = Rc::clone(&self.pending);
        let clock = Rc::clone(&self.clock);
        let debounce = self.debounce;
        self.subscription = Some(bus.subscribe(move |snapshot| {
            let deadline = clock.now() + debounce;
            *pending.borrow_mut() = Some(PendingWrite {
                snapshot: Rc::clone(snapshot),
                deadline,
            });
        }));
    }

    /// Stops listening and discards any pending write.
    pub fn detach(&mut self) {
        self.detach_subscription();
        self.cancel();
    }

    pub fn is_attached(&self) -> bool {
        self.subscription.is_some()
    }

    pub fn next_deadline(&self) -> Option<Instant> {
        self.pending.borrow().as_ref().map(|write| write.deadline)
    }

    /// Discards the pending write. Returns whether one existed.
    pub fn cancel(&mut self) -> bool {
        let cancelled = self.pending.borrow_mut().take().is_some();
        if cancelled {
            debug!("event=autosave_cancel module=autosave status=ok");
        }
        cancelled
    }

    /// Writes the pending snapshot if its window has closed.
    pub fn poll(&mut self, kv: &impl KvStore) -> AutosaveOutcome {
        match self.next_deadline() {
            None => AutosaveOutcome::Idle,
            Some(deadline) if deadline > self.clock.now() => AutosaveOutcome::Waiting { deadline },
            Some(_) => self.flush(kv),
        }
    }

    /// Writes the pending snapshot immediately, ignoring the window.
    pub fn flush(&mut self, kv: &impl KvStore) -> AutosaveOutcome {
        let Some(write) = self.pending.borrow_mut().take() else {
            return AutosaveOutcome::Idle;
        };

        match write_snapshot(kv, &self.key, &write.snapshot) {
            Ok(bytes) => {
                self.writes += 1;
                info!(
                    "event=autosave module=autosave status=ok bytes={} nodes={} edges={}",
                    bytes,
                    write.snapshot.nodes.len(),
                    write.snapshot.edges.len()
                );
                AutosaveOutcome::Written { bytes }
            }
            Err(error) => {
                let retry_at = self.clock.now() + self.debounce;
                warn!(
                    "event=autosave module=autosave status=error error_code=storage_write_failed retry_in_ms={} error={}",
                    self.debounce.as_millis(),
                    error
                );
                *self.pending.borrow_mut() = Some(PendingWrite {
                    snapshot: write.snapshot,
                    deadline: retry_at,
                });
                AutosaveOutcome::Failed { error, retry_at }
            }
        }
    }

    fn detach_subscription(&mut self) {
        if let Some(subscription) = self.subscription.take() {
            subscription.unsubscribe();
        }
    }
}

/// Serializes `snapshot` and stores it under `key`. Returns the byte count.
pub fn write_snapshot(
    kv: &impl KvStore,
    key: &str,
    snapshot: &GraphSnapshot,
) -> Result<usize, StorageError> {
    let text = encode_graph(snapshot)?;
    kv.set(key, &text)?;
    Ok(text.len())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::repo::kv_repo::MemoryKvStore;

    fn setup() -> (ChangeBus, ManualClock, Autosave) {
        let bus = ChangeBus::new();
        let clock = ManualClock::new();
        let mut autosave = Autosave::new(
            "graph",
            DEFAULT_AUTOSAVE_DEBOUNCE,
            Rc::new(clock.clone()),
        );
        autosave.attach(&bus);
        (bus, clock, autosave)
    }

    #[test]
    fn each_broadcast_restarts_the_window() {
        let (bus, clock, mut autosave) = setup();
        let kv = MemoryKvStore::new();

        bus.emit(Rc::new(GraphSnapshot::default_graph()));
        clock.advance(Duration::from_millis(400));
        bus.emit(Rc::new(GraphSnapshot::default_graph()));
        clock.advance(Duration::from_millis(400));

        assert!(matches!(
            autosave.poll(&kv),
            AutosaveOutcome::Waiting { .. }
        ));
        assert!(kv.is_empty());

        clock.advance(Duration::from_millis(100));
        assert!(matches!(
            autosave.poll(&kv),
            AutosaveOutcome::Written { .. }
        ));
        assert_eq!(autosave.writes(), 1);
        assert!(matches!(autosave.poll(&kv), AutosaveOutcome::Idle));
    }

    #[test]
    fn failed_write_is_retried_without_new_broadcast() {
        let (bus, clock, mut autosave) = setup();
        let kv = MemoryKvStore::with_quota(4);

        bus.emit(Rc::new(GraphSnapshot::default_graph()));
        clock.advance(DEFAULT_AUTOSAVE_DEBOUNCE);
        let retry_at = match autosave.poll(&kv) {
            AutosaveOutcome::Failed {
                error: StorageError::QuotaExceeded { .. },
                retry_at,
            } => retry_at,
            other => panic!("unexpected outcome: {other:?}"),
        };
        assert_eq!(retry_at, clock.now() + DEFAULT_AUTOSAVE_DEBOUNCE);
        assert_eq!(autosave.next_deadline(), Some(retry_at));
        assert_eq!(autosave.writes(), 0);

        clock.advance(Duration::from_millis(100));
        assert!(matches!(
            autosave.poll(&kv),
            AutosaveOutcome::Waiting { .. }
        ));

        let roomy = MemoryKvStore::new();
        clock.advance(DEFAULT_AUTOSAVE_DEBOUNCE);
        assert!(matches!(
            autosave.poll(&roomy),
            AutosaveOutcome::Written { .. }
        ));
        assert!(roomy.get("graph").unwrap().is_some());
        assert!(autosave.next_deadline().is_none());
    }

    #[test]
    fn detach_discards_pending_and_stops_listening() {
        let (bus, _clock, mut autosave) = setup();
        bus.emit(Rc::new(GraphSnapshot::default_graph()));
        assert!(autosave.next_deadline().is_some());

        autosave.detach();
        assert!(autosave.next_deadline().is_none());
        assert!(!autosave.is_attached());
        assert_eq!(bus.subscriber_count(), 0);

        bus.emit(Rc::new(GraphSnapshot::default_graph()));
        assert!(autosave.next_deadline().is_none());
    }
}
