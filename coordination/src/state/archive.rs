//! In-memory archive of finished tasks
//!
//! Tasks land here once they reach a terminal status. The archive is bounded;
//! the oldest entries are evicted first.

use std::collections::VecDeque;

use super::types::{Task, TaskStatus};

/// Bounded archive of completed and failed tasks
#[derive(Debug)]
pub struct TaskArchive {
    tasks: VecDeque<Task>,
    capacity: usize,
}

impl TaskArchive {
    pub fn new(capacity: usize) -> Self {
        Self {
            tasks: VecDeque::with_capacity(capacity.min(1024)),
            capacity: capacity.max(1),
        }
    }

    /// Store a finished task, evicting the oldest entry when full
    pub fn put_task(&mut self, task: Task) {
        debug_assert!(task.status.is_terminal());
        if self.tasks.len() == self.capacity {
            self.tasks.pop_front();
        }
        self.tasks.push_back(task);
    }

    pub fn get_task(&self, task_id: &str) -> Option<&Task> {
        self.tasks.iter().find(|t| t.id == task_id)
    }

    /// Most recent tasks first
    pub fn recent(&self, limit: usize) -> Vec<Task> {
        self.tasks.iter().rev().take(limit).cloned().collect()
    }

    pub fn count_by_status(&self, status: TaskStatus) -> usize {
        self.tasks.iter().filter(|t| t.status == status).count()
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::types::Requirements;

    fn finished_task(id: &str, status: TaskStatus) -> Task {
        let mut task = Task::new("archived", Requirements::new(), 0.1)
            .unwrap()
            .with_id(id);
        task.transition(TaskStatus::Running).unwrap();
        task.transition(status).unwrap();
        task
    }

    #[test]
    fn test_archive_evicts_oldest() {
        let mut archive = TaskArchive::new(2);
        archive.put_task(finished_task("a", TaskStatus::Completed));
        archive.put_task(finished_task("b", TaskStatus::Failed));
        archive.put_task(finished_task("c", TaskStatus::Completed));

        assert_eq!(archive.len(), 2);
        assert!(archive.get_task("a").is_none());
        assert_eq!(archive.recent(1)[0].id, "c");
    }

    #[test]
    fn test_count_by_status() {
        let mut archive = TaskArchive::new(10);
        archive.put_task(finished_task("a", TaskStatus::Completed));
        archive.put_task(finished_task("b", TaskStatus::Failed));
        archive.put_task(finished_task("c", TaskStatus::Completed));

        assert_eq!(archive.count_by_status(TaskStatus::Completed), 2);
        assert_eq!(archive.count_by_status(TaskStatus::Failed), 1);
    }
}
