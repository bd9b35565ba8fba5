//! Milestone progress derivation.
//!
//! # Responsibility
//! - Compute the reachable task set of a milestone from one snapshot.
//! - Count completed tasks in that set.
//!
//! # Invariants
//! - Edges are traversed in both directions; drag direction is irrelevant.
//! - Start and milestone nodes are boundaries: they are never expanded,
//!   but tasks adjacent to the origin milestone are still collected.
//! - Every node is visited at most once, so cycles terminate.
//! - Pure function of the snapshot: same input, same output.

use crate::model::graph::{GraphSnapshot, NodeId, NodeKind};
use std::collections::{BTreeSet, HashMap, HashSet};

/// Derived completion of one milestone.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct MilestoneProgress {
    pub milestone_id: NodeId,
    pub reachable_task_ids: BTreeSet<NodeId>,
    pub completed: usize,
    pub total: usize,
}

impl MilestoneProgress {
    /// Returns `completed / total`, or `0.0` when no task is reachable.
    pub fn ratio(&self) -> f64 {
        if self.total == 0 {
            return 0.0;
        }
        self.completed as f64 / self.total as f64
    }

    /// Whole-number percentage, rounded half up.
    pub fn percent(&self) -> u8 {
        if self.total == 0 {
            return 0;
        }
        let scaled = (self.completed * 200 + self.total) / (self.total * 2);
        scaled.min(100) as u8
    }

    /// A milestone with no reachable task is never complete.
    pub fn is_complete(&self) -> bool {
        self.total > 0 && self.completed == self.total
    }
}

/// Computes progress for `milestone_id`.
///
/// Returns `None` when the id is absent or does not name a milestone.
pub fn compute_progress(snapshot: &GraphSnapshot, milestone_id: &str) -> Option<MilestoneProgress> {
    let milestone = snapshot.node(milestone_id)?;
    if milestone.kind() != NodeKind::Milestone {
        return None;
    }

    let reachable_task_ids = reachable_tasks(snapshot, milestone_id);
    let completed = snapshot
        .nodes
        .iter()
        .filter(|node| reachable_task_ids.contains(&node.id) && node.is_done_task())
        .count();

    Some(MilestoneProgress {
        milestone_id: milestone.id.clone(),
        total: reachable_task_ids.len(),
        completed,
        reachable_task_ids,
    })
}

/// Collects task ids connected to `origin` through non-boundary nodes,
/// ignoring edge direction.
pub fn reachable_tasks(snapshot: &GraphSnapshot, origin: &str) -> BTreeSet<NodeId> {
    let kinds: HashMap<&str, NodeKind> = snapshot
        .nodes
        .iter()
        .map(|node| (node.id.as_str(), node.kind()))
        .collect();

    let mut sources_by_target: HashMap<&str, Vec<&str>> = HashMap::new();
    let mut targets_by_source: HashMap<&str, Vec<&str>> = HashMap::new();
    for edge in &snapshot.edges {
        sources_by_target
            .entry(edge.target.as_str())
            .or_default()
            .push(edge.source.as_str());
        targets_by_source
            .entry(edge.source.as_str())
            .or_default()
            .push(edge.target.as_str());
    }

    let mut reachable = BTreeSet::new();
    let mut visited: HashSet<&str> = HashSet::from([origin]);
    let mut stack = vec![origin];

    while let Some(current) = stack.pop() {
        let upstream = sources_by_target.get(current).into_iter().flatten();
        let downstream = targets_by_source.get(current).into_iter().flatten();

        for &neighbor in upstream.chain(downstream) {
            if !visited.insert(neighbor) {
                continue;
            }
            let kind = kinds.get(neighbor).copied();
            if kind == Some(NodeKind::Task) {
                reachable.insert(neighbor.to_string());
            }
            if !kind.is_some_and(NodeKind::is_traversal_boundary) {
                stack.push(neighbor);
            }
        }
    }

    reachable
}
