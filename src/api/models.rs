//! API models for the mediahound HTTP surface.
//!
//! - `POST /api/extract` accepts an [`ExtractRequest`] and answers with an
//!   [`ExtractResponse`] carrying the task id to poll
//! - `GET /api/progress/{task_id}` returns a
//!   [`TaskSnapshot`](crate::tasks::TaskSnapshot)
//! - `POST /api/download` and `POST /api/convert` start follow-up tasks and
//!   answer with a [`TaskAccepted`]
//!
//! ```json
//! { "url": "https://site.example/watch/42", "direct_url": false }
//! ```

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;

use crate::observability::MetricsSnapshot;
use crate::tasks::TaskStatus;
use crate::transcode::{CompressQuality, ConvertProfile};

#[derive(Debug, Deserialize, Clone)]
pub struct ExtractRequest {
    pub url: String,
    /// Treat `url` as a media file even without a recognized extension
    #[serde(default)]
    pub direct_url: bool,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ExtractResponse {
    pub task_id: String,
    pub status: TaskStatus,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub media_url: Option<String>,
}

/// Download either a discovered candidate or a bare URL
#[derive(Debug, Deserialize, Clone)]
#[serde(untagged)]
pub enum DownloadRequest {
    Candidate {
        task_id: String,
        #[serde(default)]
        index: usize,
    },
    Url {
        url: String,
    },
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ConvertKind {
    Audio,
    Compress,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ConvertRequest {
    pub input_path: PathBuf,
    pub profile: ConvertKind,
    #[serde(default)]
    pub quality: CompressQuality,
}

impl ConvertRequest {
    pub fn profile(&self) -> ConvertProfile {
        match self.profile {
            ConvertKind::Audio => ConvertProfile::Audio,
            ConvertKind::Compress => ConvertProfile::Compress(self.quality),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct TaskAccepted {
    pub task_id: String,
    pub status: TaskStatus,
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub code: &'static str,
    pub message: String,
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub components: HashMap<String, String>,
    pub version: String,
    pub discoverer: String,
    pub active_tasks: usize,
    pub metrics: MetricsSnapshot,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_download_request_shapes() {
        let req: DownloadRequest = serde_json::from_str(r#"{"task_id":"abc","index":2}"#).unwrap();
        assert!(matches!(req, DownloadRequest::Candidate { index: 2, .. }));

        let req: DownloadRequest = serde_json::from_str(r#"{"task_id":"abc"}"#).unwrap();
        assert!(matches!(req, DownloadRequest::Candidate { index: 0, .. }));

        let req: DownloadRequest = serde_json::from_str(r#"{"url":"https://cdn.test/a.mp4"}"#).unwrap();
        assert!(matches!(req, DownloadRequest::Url { .. }));

        assert!(serde_json::from_str::<DownloadRequest>(r#"{"index":1}"#).is_err());
    }

    #[test]
    fn test_convert_request_profile() {
        let req: ConvertRequest =
            serde_json::from_str(r#"{"input_path":"/tmp/a.mp4","profile":"compress","quality":"low"}"#).unwrap();
        assert_eq!(req.profile(), ConvertProfile::Compress(CompressQuality::Low));

        let req: ConvertRequest = serde_json::from_str(r#"{"input_path":"/tmp/a.mp4","profile":"compress"}"#).unwrap();
        assert_eq!(req.profile(), ConvertProfile::Compress(CompressQuality::Medium));

        let req: ConvertRequest = serde_json::from_str(r#"{"input_path":"/tmp/a.mp4","profile":"audio"}"#).unwrap();
        assert_eq!(req.profile(), ConvertProfile::Audio);
    }

    #[test]
    fn test_extract_request_defaults() {
        let req: ExtractRequest = serde_json::from_str(r#"{"url":"https://site.test/"}"#).unwrap();
        assert!(!req.direct_url);
    }
}
