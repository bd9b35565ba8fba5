//! Live milestone progress kept in sync with the Change Bus.
//!
//! # Responsibility
//! - Hold one tracker per milestone present in the latest snapshot.
//! - Recompute every tracker on every broadcast.
//! - Emit a one-shot completion event on the not-complete -> complete edge.
//!
//! # Invariants
//! - The completion bit is set only by a 100% evaluation and cleared by any
//!   other evaluation, so the event fires again after regress + recomplete.
//! - Re-evaluating an unchanged snapshot never re-fires the event.
//! - Celebration sink failures are swallowed.

use crate::bus::change_bus::{ChangeBus, Subscription};
use crate::model::graph::{GraphSnapshot, NodeId};
use crate::progress::engine::{compute_progress, MilestoneProgress};
use log::{debug, info};
use std::cell::RefCell;
use std::collections::BTreeMap;
use std::rc::Rc;

/// One-shot event raised when a milestone reaches 100%.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MilestoneCompleted {
    pub milestone_id: NodeId,
    pub total: usize,
}

/// Optional celebratory-effect collaborator.
pub trait CelebrationSink {
    fn celebrate(&mut self, event: &MilestoneCompleted) -> Result<(), String>;
}

/// Result of evaluating one tracker against one snapshot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Evaluation {
    pub progress: MilestoneProgress,
    /// True only on the evaluation that crossed into completion.
    pub completed_now: bool,
}

/// Per-milestone derived state with one bit of completion memory.
#[derive(Debug, Clone)]
pub struct MilestoneTracker {
    milestone_id: NodeId,
    was_complete: bool,
    last: Option<MilestoneProgress>,
}

impl MilestoneTracker {
    pub fn new(milestone_id: impl Into<NodeId>) -> Self {
        Self {
            milestone_id: milestone_id.into(),
            was_complete: false,
            last: None,
        }
    }

    pub fn milestone_id(&self) -> &str {
        &self.milestone_id
    }

    /// Progress from the most recent successful evaluation.
    pub fn last(&self) -> Option<&MilestoneProgress> {
        self.last.as_ref()
    }

    /// Recomputes progress. Returns `None` when the milestone is gone.
    pub fn evaluate(&mut self, snapshot: &GraphSnapshot) -> Option<Evaluation> {
        let progress = compute_progress(snapshot, &self.milestone_id)?;
        let complete = progress.is_complete();
        let completed_now = complete && !self.was_complete;
        self.was_complete = complete;
        self.last = Some(progress.clone());
        Some(Evaluation {
            progress,
            completed_now,
        })
    }
}

/// Collection of milestone trackers driven by snapshots.
#[derive(Default)]
pub struct ProgressBoard {
    trackers: BTreeMap<NodeId, MilestoneTracker>,
    sink: Option<Box<dyn CelebrationSink>>,
}

impl ProgressBoard {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_sink(sink: Box<dyn CelebrationSink>) -> Self {
        Self {
            trackers: BTreeMap::new(),
            sink: Some(sink),
        }
    }

    /// Subscribes `board` to `bus`; every broadcast triggers `observe`.
    pub fn attach(board: &Rc<RefCell<Self>>, bus: &ChangeBus) -> Subscription {
        let board = Rc::clone(board);
        bus.subscribe(move |snapshot| {
            board.borrow_mut().observe(snapshot);
        })
    }

    /// Re-evaluates every milestone in `snapshot`.
    ///
    /// Trackers for milestones no longer present are dropped; new milestones
    /// get a fresh tracker. Returns the completion events raised by this
    /// evaluation, already forwarded to the sink.
    pub fn observe(&mut self, snapshot: &GraphSnapshot) -> Vec<MilestoneCompleted> {
        let present: Vec<NodeId> = snapshot.milestones().map(|node| node.id.clone()).collect();
        self.trackers.retain(|id, _| present.contains(id));

        let mut events = Vec::new();
        for id in present {
            let tracker = self
                .trackers
                .entry(id.clone())
                .or_insert_with(|| MilestoneTracker::new(id));
            let Some(evaluation) = tracker.evaluate(snapshot) else {
                continue;
            };
            if evaluation.completed_now {
                events.push(MilestoneCompleted {
                    milestone_id: evaluation.progress.milestone_id.clone(),
                    total: evaluation.progress.total,
                });
            }
        }

        for event in &events {
            info!(
                "event=milestone_completed module=progress status=ok milestone_id={} total={}",
                event.milestone_id, event.total
            );
            if let Some(sink) = self.sink.as_mut() {
                if let Err(err) = sink.celebrate(event) {
                    debug!(
                        "event=milestone_celebrate module=progress status=skip milestone_id={} error={}",
                        event.milestone_id, err
                    );
                }
            }
        }
        events
    }

    pub fn progress(&self, milestone_id: &str) -> Option<&MilestoneProgress> {
        self.trackers.get(milestone_id)?.last()
    }

    /// Latest progress of every tracked milestone, ordered by id.
    pub fn all(&self) -> impl Iterator<Item = &MilestoneProgress> {
        self.trackers.values().filter_map(MilestoneTracker::last)
    }

    pub fn len(&self) -> usize {
        self.trackers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.trackers.is_empty()
    }
}
