//! In-memory task registry
//!
//! Each entry sits behind its own lock so a slow writer on one task never
//! blocks readers of another. The outer map lock is held only long enough to
//! look an entry up or insert/remove one.

use chrono::Utc;
use std::collections::HashMap;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info};

use super::models::{Task, TaskKind, TaskResult, TaskSnapshot, TaskStatus};
use crate::discovery::Candidate;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RegistryError {
    #[error("task not found: {0}")]
    TaskNotFound(String),

    #[error("task {task_id} has no media file at index {index}")]
    CandidateNotFound { task_id: String, index: usize },

    #[error("task {0} already finished")]
    AlreadyTerminal(String),

    #[error("{0} is not an in-progress status")]
    InvalidStatus(String),
}

pub type Result<T> = std::result::Result<T, RegistryError>;

type Entry = Arc<RwLock<Task>>;

// A panicking writer leaves the task itself consistent (every field is
// replaced whole), so poisoned locks are entered anyway.
fn read<T>(lock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn write<T>(lock: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[derive(Debug, Default)]
pub struct TaskRegistry {
    tasks: RwLock<HashMap<String, Entry>>,
}

impl TaskRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocates a `Pending` task at 0% and returns its id.
    pub fn create(&self, kind: TaskKind, source: impl Into<String>) -> String {
        let task = Task::new(kind, source);
        let id = task.id.clone();
        write(&self.tasks).insert(id.clone(), Arc::new(RwLock::new(task)));
        debug!(task_id = %id, ?kind, "Task created");
        id
    }

    fn entry(&self, id: &str) -> Result<Entry> {
        read(&self.tasks)
            .get(id)
            .cloned()
            .ok_or_else(|| RegistryError::TaskNotFound(id.to_string()))
    }

    /// Records an intermediate checkpoint.
    ///
    /// Progress never goes backwards and stays below 100 until the task
    /// finishes. Updates to a finished task are rejected.
    pub fn update(
        &self,
        id: &str,
        status: TaskStatus,
        progress: u8,
        message: impl Into<String>,
    ) -> Result<()> {
        if status.is_terminal() {
            return Err(RegistryError::InvalidStatus(format!("{status:?}")));
        }

        let entry = self.entry(id)?;
        let mut task = write(&entry);
        if task.status.is_terminal() {
            return Err(RegistryError::AlreadyTerminal(id.to_string()));
        }

        task.status = status;
        task.progress = task.progress.max(progress.min(99));
        task.message = message.into();
        task.updated_at = Utc::now();
        Ok(())
    }

    /// Moves a task to `Completed` with its result in one write.
    pub fn complete(&self, id: &str, message: impl Into<String>, result: TaskResult) -> Result<()> {
        self.finish(id, TaskStatus::Completed, message.into(), Some(result))
    }

    pub fn fail(&self, id: &str, message: impl Into<String>) -> Result<()> {
        self.finish(id, TaskStatus::Failed, message.into(), None)
    }

    fn finish(
        &self,
        id: &str,
        status: TaskStatus,
        message: String,
        result: Option<TaskResult>,
    ) -> Result<()> {
        let entry = self.entry(id)?;
        let mut task = write(&entry);
        if task.status.is_terminal() {
            return Err(RegistryError::AlreadyTerminal(id.to_string()));
        }

        task.status = status;
        task.progress = 100;
        task.message = message;
        task.result = result;
        task.updated_at = Utc::now();
        info!(task_id = %id, status = ?status, message = %task.message, "Task finished");
        Ok(())
    }

    pub fn snapshot(&self, id: &str) -> Result<TaskSnapshot> {
        let entry = self.entry(id)?;
        let task = read(&entry);
        Ok(task.snapshot())
    }

    pub fn status(&self, id: &str) -> Result<TaskStatus> {
        let entry = self.entry(id)?;
        let status = read(&entry).status;
        Ok(status)
    }

    /// Candidate `index` of a discovery task, with its auth context.
    pub fn candidate(&self, id: &str, index: usize) -> Result<Candidate> {
        let entry = self.entry(id)?;
        let task = read(&entry);
        task.candidates()
            .get(index)
            .cloned()
            .ok_or_else(|| RegistryError::CandidateNotFound {
                task_id: id.to_string(),
                index,
            })
    }

    pub fn len(&self) -> usize {
        read(&self.tasks).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of tasks not yet in a terminal state
    pub fn active(&self) -> usize {
        read(&self.tasks)
            .values()
            .filter(|entry| !read(entry).status.is_terminal())
            .count()
    }

    /// Removes finished tasks last updated more than `ttl` ago.
    pub fn reap_terminal(&self, ttl: Duration) -> usize {
        let ttl = chrono::Duration::from_std(ttl).unwrap_or(chrono::Duration::MAX);
        let cutoff = Utc::now().checked_sub_signed(ttl);

        let mut tasks = write(&self.tasks);
        let before = tasks.len();
        tasks.retain(|_, entry| {
            let task = read(entry);
            match cutoff {
                Some(cutoff) => !(task.status.is_terminal() && task.updated_at <= cutoff),
                None => true,
            }
        });

        let reaped = before - tasks.len();
        if reaped > 0 {
            info!(reaped, remaining = tasks.len(), "Reaped finished tasks");
        }
        reaped
    }
}
