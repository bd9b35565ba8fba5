//! Two-phase node deletion.
//!
//! # Responsibility
//! - Tag requested nodes as `removing` so the renderer can play an exit
//!   transition while they stay in the graph.
//! - Hard-remove each batch (plus touching edges) once its grace period ends.
//!
//! # Invariants
//! - One deadline per batch, measured from the request instant.
//! - Batch state only moves `Removing -> Removed` or `Removing -> Cancelled`.
//! - Overlapping batches are each removed in full; a node claimed by an
//!   earlier batch is simply absent by the time a later batch fires.
//! - `cancel_all` never touches the store, so it is safe during teardown.

use crate::model::graph::NodeId;
use crate::store::graph_store::{GraphStore, RemovalSummary};
use log::info;
use std::time::{Duration, Instant};

/// Grace period between a removal request and the hard removal.
pub const DEFAULT_DELETE_GRACE: Duration = Duration::from_millis(240);

pub type BatchId = u64;

/// Lifecycle of one node as seen through the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodePhase {
    Active,
    Removing,
    Removed,
}

/// Returns the lifecycle phase of `node_id` in `store`.
pub fn node_phase(store: &GraphStore, node_id: &str) -> NodePhase {
    match store.node(node_id) {
        Some(node) if node.removing => NodePhase::Removing,
        Some(_) => NodePhase::Active,
        None => NodePhase::Removed,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchState {
    Removing,
    Removed(RemovalSummary),
    Cancelled,
}

/// One removal request and its timer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemovalBatch {
    pub id: BatchId,
    pub node_ids: Vec<NodeId>,
    pub requested_at: Instant,
    pub deadline: Instant,
    pub state: BatchState,
}

/// Schedules and fires removal batches.
#[derive(Debug)]
pub struct RemovalController {
    grace: Duration,
    next_id: BatchId,
    pending: Vec<RemovalBatch>,
}

impl Default for RemovalController {
    fn default() -> Self {
        Self::new(DEFAULT_DELETE_GRACE)
    }
}

impl RemovalController {
    pub fn new(grace: Duration) -> Self {
        Self {
            grace,
            next_id: 0,
            pending: Vec::new(),
        }
    }

    pub fn grace(&self) -> Duration {
        self.grace
    }

    /// Starts phase one for `ids`.
    ///
    /// Unknown and non-deletable ids are dropped. Returns `None` when no id
    /// was accepted, in which case nothing is scheduled.
    pub fn request_removal(
        &mut self,
        store: &mut GraphStore,
        ids: &[NodeId],
        now: Instant,
    ) -> Option<BatchId> {
        let node_ids = store.mark_removing(ids);
        if node_ids.is_empty() {
            return None;
        }

        self.next_id += 1;
        let batch = RemovalBatch {
            id: self.next_id,
            node_ids,
            requested_at: now,
            deadline: now + self.grace,
            state: BatchState::Removing,
        };
        info!(
            "event=removal_scheduled module=lifecycle status=ok batch_id={} nodes={} grace_ms={}",
            batch.id,
            batch.node_ids.len(),
            self.grace.as_millis()
        );
        let id = batch.id;
        self.pending.push(batch);
        Some(id)
    }

    /// Earliest pending deadline, if any.
    pub fn next_deadline(&self) -> Option<Instant> {
        self.pending.iter().map(|batch| batch.deadline).min()
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    /// Fires every batch whose deadline has passed, oldest request first.
    ///
    /// Each batch is one store commit. Returns the finished batches.
    pub fn poll(&mut self, store: &mut GraphStore, now: Instant) -> Vec<RemovalBatch> {
        let (mut due, waiting): (Vec<_>, Vec<_>) = self
            .pending
            .drain(..)
            .partition(|batch| batch.deadline <= now);
        self.pending = waiting;
        due.sort_by_key(|batch| (batch.deadline, batch.id));

        for batch in &mut due {
            let summary = store.remove_nodes(&batch.node_ids);
            batch.state = BatchState::Removed(summary);
            info!(
                "event=removal_committed module=lifecycle status=ok batch_id={} nodes_removed={} edges_removed={}",
                batch.id, summary.nodes, summary.edges
            );
        }
        due
    }

    /// Drops every pending timer without mutating any store.
    pub fn cancel_all(&mut self) -> Vec<RemovalBatch> {
        let mut cancelled: Vec<RemovalBatch> = self.pending.drain(..).collect();
        for batch in &mut cancelled {
            batch.state = BatchState::Cancelled;
        }
        if !cancelled.is_empty() {
            info!(
                "event=removal_cancelled module=lifecycle status=ok batches={}",
                cancelled.len()
            );
        }
        cancelled
    }
}
