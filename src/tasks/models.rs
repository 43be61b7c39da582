//! Task models for the progress API.
//!
//! A [`Task`] is what a client polls. It wraps one unit of work (a discovery,
//! a download or a conversion) and outlives the work itself until it is
//! reaped. Clients only ever see a [`TaskSnapshot`].
//!
//! ```json
//! {
//!   "task_id": "0192f3c4-...",
//!   "kind": "discovery",
//!   "status": "completed",
//!   "progress": 100,
//!   "message": "Extraction completed - 2 file(s) found",
//!   "media_files": [
//!     { "index": 0, "url": "https://cdn.test/v/abc.m3u8", "extension": ".m3u8", "size_bytes": 12000 }
//!   ]
//! }
//! ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;
use uuid::Uuid;

use crate::discovery::{AuthContext, Candidate};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    Loading,
    Extracting,
    Downloading,
    Converting,
    Completed,
    Failed,
}

impl TaskStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, TaskStatus::Completed | TaskStatus::Failed)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskKind {
    Discovery,
    Download,
    Convert,
}

/// Kind-specific payload written together with the terminal status
#[derive(Debug, Clone)]
pub enum TaskResult {
    Discovery {
        candidates: Vec<Candidate>,
        auth: Option<Arc<AuthContext>>,
    },
    File {
        path: PathBuf,
        size_bytes: u64,
    },
}

#[derive(Debug, Clone)]
pub struct Task {
    pub id: String,
    pub kind: TaskKind,
    /// Page URL, media URL or input path the task was submitted with
    pub source: String,
    pub status: TaskStatus,
    pub progress: u8,
    pub message: String,
    pub result: Option<TaskResult>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Task {
    pub fn new(kind: TaskKind, source: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::now_v7().to_string(),
            kind,
            source: source.into(),
            status: TaskStatus::Pending,
            progress: 0,
            message: "Queued".to_string(),
            result: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn candidates(&self) -> &[Candidate] {
        match &self.result {
            Some(TaskResult::Discovery { candidates, .. }) => candidates,
            _ => &[],
        }
    }

    pub fn snapshot(&self) -> TaskSnapshot {
        let media_files = match &self.result {
            Some(TaskResult::Discovery { candidates, .. }) => Some(
                candidates
                    .iter()
                    .enumerate()
                    .map(|(index, c)| CandidateSummary {
                        index,
                        url: c.url.clone(),
                        extension: c.extension.clone(),
                        size_bytes: c.size_bytes,
                    })
                    .collect(),
            ),
            _ => None,
        };
        let output = match &self.result {
            Some(TaskResult::File { path, size_bytes }) => Some(OutputFile {
                path: path.display().to_string(),
                size_bytes: *size_bytes,
            }),
            _ => None,
        };

        TaskSnapshot {
            task_id: self.id.clone(),
            kind: self.kind,
            status: self.status,
            progress: self.progress,
            message: self.message.clone(),
            created_at: self.created_at,
            updated_at: self.updated_at,
            media_files,
            output,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CandidateSummary {
    pub index: usize,
    pub url: String,
    pub extension: String,
    pub size_bytes: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutputFile {
    pub path: String,
    pub size_bytes: u64,
}

/// Immutable copy of a task handed to readers
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskSnapshot {
    pub task_id: String,
    pub kind: TaskKind,
    pub status: TaskStatus,
    pub progress: u8,
    pub message: String,
    #[serde(with = "chrono::serde::ts_seconds")]
    pub created_at: DateTime<Utc>,
    #[serde(with = "chrono::serde::ts_seconds")]
    pub updated_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub media_files: Option<Vec<CandidateSummary>>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub output: Option<OutputFile>,
}
