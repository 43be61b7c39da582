//! Authenticated retrieval of discovered media
//!
//! Re-requests a candidate URL with the cookies and headers captured by the
//! session that found it, and hands the body back as a stream of fixed-size
//! chunks. Nothing is buffered beyond one chunk.

use bytes::{Bytes, BytesMut};
use futures::stream::{self, BoxStream};
use futures::{Stream, StreamExt};
use reqwest::Client;
use reqwest::header::{CONTENT_LENGTH, CONTENT_TYPE, COOKIE, HeaderMap, HeaderName, HeaderValue};
use std::path::Path;
use std::time::Duration;
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};
use url::Url;

use crate::config::RetrievalConfig;
use crate::discovery::AuthContext;
use crate::tasks::{CancelSignal, RegistryError, TaskRegistry};

/// Extensions kept as-is in download file names
const KEEP_EXTENSIONS: &[&str] = &[".mp4", ".webm", ".mov", ".m3u8"];
const FALLBACK_FILE_NAME: &str = "video.mp4";

#[derive(Debug, Error)]
pub enum RetrievalError {
    #[error(transparent)]
    NotFound(#[from] RegistryError),

    #[error("origin responded with HTTP {status}")]
    Upstream { status: u16 },

    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Cancelled")]
    Cancelled,
}

pub type Result<T> = std::result::Result<T, RetrievalError>;

pub type ByteStream = BoxStream<'static, Result<Bytes>>;

/// An open response from the origin, not yet consumed
pub struct RemoteMedia {
    pub file_name: String,
    pub content_length: Option<u64>,
    pub content_type: Option<String>,
    pub body: ByteStream,
}

impl std::fmt::Debug for RemoteMedia {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RemoteMedia")
            .field("file_name", &self.file_name)
            .field("content_length", &self.content_length)
            .field("content_type", &self.content_type)
            .finish_non_exhaustive()
    }
}

pub struct Retriever {
    client: Client,
    chunk_size: usize,
}

impl Retriever {
    pub fn new(config: &RetrievalConfig) -> Result<Self> {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(config.connect_timeout_secs))
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .redirect(reqwest::redirect::Policy::limited(10))
            .build()?;

        Ok(Self {
            client,
            chunk_size: config.chunk_size.as_usize().max(1),
        })
    }

    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    /// Streams candidate `index` of task `task_id`.
    pub async fn fetch(&self, registry: &TaskRegistry, task_id: &str, index: usize) -> Result<RemoteMedia> {
        let candidate = registry.candidate(task_id, index)?;
        self.open(&candidate.url, candidate.auth.as_deref()).await
    }

    /// Requests `url` replaying `auth`. Non-2xx responses fail before any
    /// byte is streamed.
    pub async fn open(&self, url: &str, auth: Option<&AuthContext>) -> Result<RemoteMedia> {
        debug!(url, "Requesting media from origin");
        let response = self
            .client
            .get(url)
            .headers(auth.map(replay_headers).unwrap_or_default())
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            warn!(url, status = status.as_u16(), "Origin refused media request");
            return Err(RetrievalError::Upstream {
                status: status.as_u16(),
            });
        }

        let headers = response.headers();
        let content_length = headers
            .get(CONTENT_LENGTH)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse().ok());
        let content_type = headers
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_owned);

        let body = response.bytes_stream().map(|chunk| chunk.map_err(RetrievalError::from));
        Ok(RemoteMedia {
            file_name: file_name_for(url),
            content_length,
            content_type,
            body: rechunk(body, self.chunk_size),
        })
    }

    /// Streams `url` into `path`, reporting `(written, total)` after every
    /// chunk. A cancelled or failed download leaves no partial file.
    pub async fn download_to_file(
        &self,
        url: &str,
        auth: Option<&AuthContext>,
        path: &Path,
        cancel: &CancelSignal,
        mut on_progress: impl FnMut(u64, Option<u64>) + Send,
    ) -> Result<u64> {
        let media = self.open(url, auth).await?;
        let total = media.content_length;

        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let result = write_stream(media.body, path, cancel, |written| on_progress(written, total)).await;
        match result {
            Ok(written) => {
                info!(url, path = %path.display(), size = written, "Download saved");
                Ok(written)
            }
            Err(err) => {
                if let Err(cleanup) = tokio::fs::remove_file(path).await {
                    debug!(path = %path.display(), error = %cleanup, "No partial file to remove");
                }
                Err(err)
            }
        }
    }
}

async fn write_stream(
    mut body: ByteStream,
    path: &Path,
    cancel: &CancelSignal,
    mut on_chunk: impl FnMut(u64) + Send,
) -> Result<u64> {
    let mut file = tokio::fs::File::create(path).await?;
    let mut written = 0u64;

    loop {
        let chunk = tokio::select! {
            chunk = body.next() => chunk,
            _ = cancel.cancelled() => return Err(RetrievalError::Cancelled),
        };
        let Some(chunk) = chunk else { break };
        let chunk = chunk?;

        file.write_all(&chunk).await?;
        written += chunk.len() as u64;
        on_chunk(written);
    }

    file.flush().await?;
    Ok(written)
}

/// Headers to send when re-fetching with `auth`.
pub fn replay_headers(auth: &AuthContext) -> HeaderMap {
    let mut headers = HeaderMap::new();
    for (name, value) in &auth.headers {
        match (HeaderName::try_from(name.as_str()), HeaderValue::try_from(value.as_str())) {
            (Ok(name), Ok(value)) => {
                headers.insert(name, value);
            }
            _ => debug!(header = %name, "Skipping header that is not valid HTTP"),
        }
    }

    if let Some(cookie) = auth.cookie_header() {
        match HeaderValue::try_from(cookie) {
            Ok(value) => {
                headers.insert(COOKIE, value);
            }
            Err(err) => debug!(error = %err, "Skipping unencodable cookie header"),
        }
    }
    headers
}

/// Download file name for `url`: the last path segment, defaulting to
/// `video.mp4`, with `.mp4` appended unless it already has a video extension.
pub fn file_name_for(url: &str) -> String {
    let segment = match Url::parse(url) {
        Ok(parsed) => parsed
            .path_segments()
            .and_then(|mut segments| segments.next_back())
            .unwrap_or_default()
            .to_string(),
        Err(_) => url
            .split(['?', '#'])
            .next()
            .and_then(|path| path.rsplit('/').next())
            .unwrap_or_default()
            .to_string(),
    };

    let name: String = segment
        .chars()
        .filter(|c| !c.is_control() && !matches!(c, '"' | '\\'))
        .collect();
    if name.is_empty() {
        return FALLBACK_FILE_NAME.to_string();
    }

    let lower = name.to_ascii_lowercase();
    if KEEP_EXTENSIONS.iter().any(|ext| lower.ends_with(ext)) {
        name
    } else {
        format!("{name}.mp4")
    }
}

/// Regroups `inner` into chunks of exactly `chunk_size` bytes; only the last
/// chunk may be shorter. Stops after the first error.
pub fn rechunk<S, E>(inner: S, chunk_size: usize) -> BoxStream<'static, std::result::Result<Bytes, E>>
where
    S: Stream<Item = std::result::Result<Bytes, E>> + Send + 'static,
    E: Send + 'static,
{
    let chunk_size = chunk_size.max(1);
    let state = (inner.boxed(), BytesMut::with_capacity(chunk_size), false);

    stream::unfold(state, move |(mut inner, mut buf, mut done)| async move {
        loop {
            if buf.len() >= chunk_size {
                let chunk = buf.split_to(chunk_size).freeze();
                return Some((Ok(chunk), (inner, buf, done)));
            }
            if done {
                if buf.is_empty() {
                    return None;
                }
                let chunk = buf.split().freeze();
                return Some((Ok(chunk), (inner, buf, done)));
            }
            match inner.next().await {
                Some(Ok(bytes)) => buf.extend_from_slice(&bytes),
                Some(Err(err)) => {
                    buf.clear();
                    return Some((Err(err), (inner, buf, true)));
                }
                None => done = true,
            }
        }
    })
    .boxed()
}
