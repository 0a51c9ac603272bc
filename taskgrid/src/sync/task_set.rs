//! Immutable working-set snapshot with an id index.

use std::collections::HashMap;
use std::collections::hash_map::Entry;

use taskgrid_proto::task::{Task, TaskId};

/// An ordered, immutable collection of tasks plus an id -> position index.
///
/// Built once per accepted sync and shared as `Arc<TaskSet>`. Readers
/// only ever see a complete set; replacing the set means publishing a new
/// `Arc`, so pointer identity doubles as the "working set changed" signal.
#[derive(Debug, Default, PartialEq)]
pub struct TaskSet {
    tasks: Vec<Task>,
    index: HashMap<TaskId, usize>,
}

impl TaskSet {
    /// Builds a set, keeping the position of the first occurrence of each
    /// id and the content of the last.
    #[must_use]
    pub fn new(tasks: Vec<Task>) -> Self {
        let mut ordered: Vec<Task> = Vec::with_capacity(tasks.len());
        let mut index = HashMap::with_capacity(tasks.len());
        for task in tasks {
            match index.entry(task.id.clone()) {
                Entry::Occupied(slot) => {
                    tracing::debug!(task_id = %task.id, "duplicate task id in collection, keeping latest");
                    ordered[*slot.get()] = task;
                }
                Entry::Vacant(slot) => {
                    slot.insert(ordered.len());
                    ordered.push(task);
                }
            }
        }
        Self {
            tasks: ordered,
            index,
        }
    }

    /// Returns an empty set.
    #[must_use]
    pub fn empty() -> Self {
        Self::default()
    }

    /// Looks up a task by id in O(1).
    #[must_use]
    pub fn get(&self, id: &TaskId) -> Option<&Task> {
        self.index.get(id).map(|&pos| &self.tasks[pos])
    }

    /// Returns the tasks in collection order.
    #[must_use]
    pub fn tasks(&self) -> &[Task] {
        &self.tasks
    }

    /// Iterates the tasks in collection order.
    pub fn iter(&self) -> std::slice::Iter<'_, Task> {
        self.tasks.iter()
    }

    /// Number of tasks.
    #[must_use]
    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    /// Returns `true` if the set holds no tasks.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }
}

impl<'a> IntoIterator for &'a TaskSet {
    type Item = &'a Task;
    type IntoIter = std::slice::Iter<'a, Task>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}
