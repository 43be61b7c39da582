//! External transcoder (ffmpeg)
//!
//! Every invocation is an explicit argument list ending with the output path.
//! A run succeeds only when the process exits with status zero *and* the
//! output file exists; anything else carries the tail of stderr.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use thiserror::Error;
use tokio::process::Command;
use tracing::{debug, info, warn};

use crate::config::TranscodeConfig;
use crate::tasks::CancelSignal;

/// Longest stderr excerpt kept in an error
const STDERR_EXCERPT_CHARS: usize = 200;

#[derive(Debug, Error)]
pub enum TranscodeError {
    #[error("transcoding is disabled")]
    Disabled,

    #[error("failed to start {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("transcoder failed: {stderr}")]
    Failed { code: Option<i32>, stderr: String },

    #[error("transcoder produced no output at {0}")]
    MissingOutput(PathBuf),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Cancelled")]
    Cancelled,
}

pub type Result<T> = std::result::Result<T, TranscodeError>;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CompressQuality {
    High,
    #[default]
    Medium,
    Low,
}

impl CompressQuality {
    pub fn dimensions(self) -> (u32, u32) {
        match self {
            CompressQuality::High => (1280, 720),
            CompressQuality::Medium => (854, 480),
            CompressQuality::Low => (640, 360),
        }
    }

    pub fn video_bitrate(self) -> &'static str {
        match self {
            CompressQuality::High => "2000k",
            CompressQuality::Medium => "1000k",
            CompressQuality::Low => "500k",
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            CompressQuality::High => "high",
            CompressQuality::Medium => "medium",
            CompressQuality::Low => "low",
        }
    }
}

/// Conversion applied to a local file
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConvertProfile {
    /// Extract the audio track as MP3
    Audio,
    Compress(CompressQuality),
}

impl ConvertProfile {
    /// Output path next to `input` in `dir`
    pub fn output_path(self, input: &Path, dir: &Path) -> PathBuf {
        let stem = input
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "output".to_string());
        match self {
            ConvertProfile::Audio => dir.join(format!("{stem}_audio.mp3")),
            ConvertProfile::Compress(q) => dir.join(format!("{stem}_compressed_{}.mp4", q.as_str())),
        }
    }

    pub fn args(self, input: &Path, output: &Path) -> Vec<OsString> {
        match self {
            ConvertProfile::Audio => audio_args(input, output),
            ConvertProfile::Compress(quality) => compress_args(input, output, quality),
        }
    }
}

/// Remux an HLS playlist into MP4 without re-encoding.
pub fn hls_args(url: &str, headers: &BTreeMap<String, String>, output: &Path) -> Vec<OsString> {
    let mut args: Vec<OsString> = Vec::new();
    if !headers.is_empty() {
        let joined: String = headers
            .iter()
            .map(|(name, value)| format!("{name}: {value}\r\n"))
            .collect();
        args.extend(["-headers".into(), joined.into()]);
    }
    args.extend(
        ["-i", url, "-c", "copy", "-bsf:a", "aac_adtstoasc", "-y"]
            .into_iter()
            .map(OsString::from),
    );
    args.push(output.as_os_str().to_owned());
    args
}

pub fn audio_args(input: &Path, output: &Path) -> Vec<OsString> {
    let mut args: Vec<OsString> = vec!["-i".into(), input.as_os_str().to_owned()];
    args.extend(
        ["-vn", "-acodec", "libmp3lame", "-q:a", "0", "-y"]
            .into_iter()
            .map(OsString::from),
    );
    args.push(output.as_os_str().to_owned());
    args
}

pub fn compress_args(input: &Path, output: &Path, quality: CompressQuality) -> Vec<OsString> {
    let (w, h) = quality.dimensions();
    let filter = format!(
        "scale={w}:{h}:force_original_aspect_ratio=decrease,pad={w}:{h}:(ow-iw)/2:(oh-ih)/2"
    );

    let mut args: Vec<OsString> = vec!["-i".into(), input.as_os_str().to_owned()];
    args.extend(
        [
            "-vf",
            filter.as_str(),
            "-c:v",
            "libx264",
            "-b:v",
            quality.video_bitrate(),
            "-c:a",
            "aac",
            "-b:a",
            "128k",
            "-preset",
            "medium",
            "-y",
        ]
        .into_iter()
        .map(OsString::from),
    );
    args.push(output.as_os_str().to_owned());
    args
}

fn excerpt(stderr: &[u8]) -> String {
    let text = String::from_utf8_lossy(stderr);
    let text = text.trim();
    let skip = text.chars().count().saturating_sub(STDERR_EXCERPT_CHARS);
    // the last lines name the actual failure
    text.chars().skip(skip).collect()
}

#[derive(Debug, Clone)]
pub struct Transcoder {
    program: PathBuf,
    enabled: bool,
}

impl Transcoder {
    pub fn new(config: &TranscodeConfig) -> Self {
        Self {
            program: config.program.clone(),
            enabled: config.enabled,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Whether the program can be started at all
    pub async fn is_available(&self) -> bool {
        if !self.enabled {
            return false;
        }
        let status = Command::new(&self.program)
            .arg("-version")
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .status()
            .await;
        match status {
            Ok(status) => status.success(),
            Err(err) => {
                debug!(program = %self.program.display(), error = %err, "Transcoder not available");
                false
            }
        }
    }

    /// Runs the transcoder and returns the size of `output`.
    ///
    /// Cancelling drops the child, which kills it.
    pub async fn run(&self, args: Vec<OsString>, output: &Path, cancel: &CancelSignal) -> Result<u64> {
        if !self.enabled {
            return Err(TranscodeError::Disabled);
        }
        if let Some(parent) = output.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        debug!(program = %self.program.display(), ?args, "Starting transcoder");
        let child = Command::new(&self.program)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| TranscodeError::Spawn {
                program: self.program.display().to_string(),
                source,
            })?;

        let result = tokio::select! {
            result = child.wait_with_output() => result?,
            _ = cancel.cancelled() => {
                warn!(output = %output.display(), "Transcode cancelled");
                return Err(TranscodeError::Cancelled);
            }
        };

        if !result.status.success() {
            return Err(TranscodeError::Failed {
                code: result.status.code(),
                stderr: excerpt(&result.stderr),
            });
        }

        match tokio::fs::metadata(output).await {
            Ok(meta) => {
                info!(output = %output.display(), size = meta.len(), "Transcode finished");
                Ok(meta.len())
            }
            Err(_) => Err(TranscodeError::MissingOutput(output.to_path_buf())),
        }
    }
}
