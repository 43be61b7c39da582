//! Boundary to the external browser capability
//!
//! Discovery never talks to a concrete browser. It drives a [`BrowserPage`]
//! and reads [`NetworkEvent`]s from the channel handed out with it, so the
//! same session logic runs against Chromium or a recorded trace.

use async_trait::async_trait;
use std::collections::BTreeMap;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc;

use super::candidate::BrowserCookie;

#[derive(Debug, Error)]
pub enum BrowserError {
    #[error("browser unavailable: {0}")]
    Unavailable(String),

    #[error("failed to launch browser: {0}")]
    Launch(String),

    #[error("navigation timed out after {0:?}")]
    NavigationTimeout(Duration),

    #[error("page unreachable: {0}")]
    Unreachable(String),

    #[error("script evaluation failed: {0}")]
    Script(String),

    #[error("no element #{index} for selector {selector}")]
    ElementNotFound { selector: String, index: usize },

    #[error("click failed: {0}")]
    Click(String),

    #[error("browser protocol error: {0}")]
    Protocol(String),
}

pub type Result<T> = std::result::Result<T, BrowserError>;

/// Response seen on the wire while the page was loading
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObservedResponse {
    pub url: String,
    pub status: u16,
    /// Lowercased `Content-Type`, empty when absent
    pub content_type: String,
    pub content_length: Option<u64>,
}

impl ObservedResponse {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            status: 200,
            content_type: String::new(),
            content_length: None,
        }
    }

    pub fn content_type(mut self, content_type: impl Into<String>) -> Self {
        self.content_type = content_type.into().to_ascii_lowercase();
        self
    }

    pub fn content_length(mut self, length: u64) -> Self {
        self.content_length = Some(length);
        self
    }

    pub fn status(mut self, status: u16) -> Self {
        self.status = status;
        self
    }

    /// Builds a response from raw header pairs (any case).
    pub fn from_headers(url: impl Into<String>, status: u16, headers: &BTreeMap<String, String>) -> Self {
        let lookup = |name: &str| {
            headers
                .iter()
                .find(|(k, _)| k.eq_ignore_ascii_case(name))
                .map(|(_, v)| v.trim())
        };

        let content_length = lookup("content-length").and_then(|raw| match raw.parse::<u64>() {
            Ok(n) => Some(n),
            Err(err) => {
                tracing::debug!(value = raw, error = %err, "Ignoring unparsable content-length");
                None
            }
        });

        Self {
            url: url.into(),
            status,
            content_type: lookup("content-type").unwrap_or_default().to_ascii_lowercase(),
            content_length,
        }
    }
}

/// Traffic event emitted by a page
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NetworkEvent {
    Request { url: String },
    Response(ObservedResponse),
}

/// One open browser tab
#[async_trait]
pub trait BrowserPage: Send + Sync {
    /// Navigate and wait until the document is loaded or `timeout` passes.
    async fn navigate(&self, url: &str, timeout: Duration) -> Result<()>;

    /// Evaluate a script in the page, returning its JSON value.
    async fn evaluate(&self, script: &str) -> Result<serde_json::Value>;

    /// Number of elements currently matching `selector`.
    async fn count_matches(&self, selector: &str) -> Result<usize>;

    /// Click the `index`-th element matching `selector`.
    async fn click(&self, selector: &str, index: usize) -> Result<()>;

    /// Mouse click at viewport coordinates.
    async fn click_at(&self, x: f64, y: f64) -> Result<()>;

    /// Current cookie jar of the page.
    async fn cookies(&self) -> Result<Vec<BrowserCookie>>;

    async fn close(&self) -> Result<()>;
}

/// An open page plus the stream of its network traffic
pub struct BrowserSession {
    pub page: Box<dyn BrowserPage>,
    pub events: mpsc::UnboundedReceiver<NetworkEvent>,
}

/// Something that can open browser pages
#[async_trait]
pub trait BrowserDriver: Send + Sync {
    fn name(&self) -> &'static str;

    /// Cheap startup check that a browser can actually be driven.
    async fn probe(&self) -> Result<()>;

    /// Open a fresh page with network observation attached.
    async fn open(&self) -> Result<BrowserSession>;
}
