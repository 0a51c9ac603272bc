//! Faceted counts for filter menus.
//!
//! Each dimension is counted over the rows that pass every *other*
//! criterion, so selecting a status never zeroes the other status counts.

use taskgrid_proto::task::{TaskLabel, TaskPriority, TaskStatus};

use crate::sync::TaskSet;

use super::{Dimension, PreparedFilter, TaskFilter};

/// Row counts per facet value. Every variant is listed, zeros included,
/// in declaration order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FacetCounts {
    pub statuses: Vec<(TaskStatus, usize)>,
    pub labels: Vec<(TaskLabel, usize)>,
    pub priorities: Vec<(TaskPriority, usize)>,
}

impl FacetCounts {
    #[must_use]
    pub fn status(&self, status: TaskStatus) -> usize {
        lookup(&self.statuses, status)
    }

    #[must_use]
    pub fn label(&self, label: TaskLabel) -> usize {
        lookup(&self.labels, label)
    }

    #[must_use]
    pub fn priority(&self, priority: TaskPriority) -> usize {
        lookup(&self.priorities, priority)
    }
}

fn lookup<T: PartialEq>(counts: &[(T, usize)], key: T) -> usize {
    counts
        .iter()
        .find(|(value, _)| *value == key)
        .map_or(0, |(_, n)| *n)
}

fn zeroed<T: Copy>(all: &[T]) -> Vec<(T, usize)> {
    all.iter().map(|&v| (v, 0)).collect()
}

fn bump<T: PartialEq>(counts: &mut [(T, usize)], key: T) {
    if let Some((_, n)) = counts.iter_mut().find(|(value, _)| *value == key) {
        *n += 1;
    }
}

/// Counts facet values over `set` under `filter`.
#[must_use]
pub fn compute_facets(set: &TaskSet, filter: &TaskFilter) -> FacetCounts {
    let prepared = PreparedFilter::new(filter);
    let mut counts = FacetCounts {
        statuses: zeroed(TaskStatus::ALL),
        labels: zeroed(TaskLabel::ALL),
        priorities: zeroed(TaskPriority::ALL),
    };
    for task in set {
        if prepared.matches_ignoring(task, Some(Dimension::Status)) {
            bump(&mut counts.statuses, task.status);
        }
        if prepared.matches_ignoring(task, Some(Dimension::Label)) {
            bump(&mut counts.labels, task.label);
        }
        if prepared.matches_ignoring(task, Some(Dimension::Priority)) {
            bump(&mut counts.priorities, task.priority);
        }
    }
    counts
}
