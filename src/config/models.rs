use crate::humanize::ByteSize;
use serde::{Deserialize, Serialize};
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::PathBuf;
use std::time::Duration;

/// Top-level configuration
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub browser: BrowserConfig,
    #[serde(default)]
    pub stimulation: StimulationConfig,
    #[serde(default)]
    pub discovery: DiscoveryConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub transcode: TranscodeConfig,
    #[serde(default)]
    pub registry: RegistryConfig,
    #[serde(default)]
    pub telemetry: TelemetryConfig,
}

/// HTTP surface configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    #[serde(default = "default_bind_addr")]
    pub bind_addr: SocketAddr,
    /// Where download tasks write their output
    #[serde(default = "default_download_dir")]
    pub download_dir: PathBuf,
    #[serde(default = "default_max_payload_bytes")]
    pub max_payload_bytes: ByteSize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: default_bind_addr(),
            download_dir: default_download_dir(),
            max_payload_bytes: default_max_payload_bytes(),
        }
    }
}

fn default_bind_addr() -> SocketAddr {
    SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), 8000)
}

fn default_download_dir() -> PathBuf {
    PathBuf::from("./downloads")
}

fn default_max_payload_bytes() -> ByteSize {
    ByteSize::mib(1)
}

/// Headless browser settings
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct BrowserConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_true")]
    pub headless: bool,
    /// Explicit Chromium binary; probed from well-known paths when unset
    pub executable: Option<PathBuf>,
    /// Attach to an already running browser instead of launching one
    pub remote_url: Option<String>,
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
    #[serde(default = "default_viewport_width")]
    pub viewport_width: u32,
    #[serde(default = "default_viewport_height")]
    pub viewport_height: u32,
    #[serde(default = "default_navigation_timeout_secs")]
    pub navigation_timeout_secs: u64,
}

impl BrowserConfig {
    pub fn navigation_timeout(&self) -> Duration {
        Duration::from_secs(self.navigation_timeout_secs)
    }
}

impl Default for BrowserConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            headless: true,
            executable: None,
            remote_url: None,
            user_agent: default_user_agent(),
            viewport_width: default_viewport_width(),
            viewport_height: default_viewport_height(),
            navigation_timeout_secs: default_navigation_timeout_secs(),
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_user_agent() -> String {
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) \
     Chrome/120.0 Safari/537.36"
        .to_string()
}

fn default_viewport_width() -> u32 {
    1920
}

fn default_viewport_height() -> u32 {
    1080
}

fn default_navigation_timeout_secs() -> u64 {
    30
}

/// Page stimulation heuristics applied after navigation
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StimulationConfig {
    /// Pause before the first step so lazy content can load
    #[serde(default = "default_settle_ms")]
    pub settle_ms: u64,
    /// Pause after each step that may trigger new requests
    #[serde(default = "default_step_pause_ms")]
    pub step_pause_ms: u64,
    #[serde(default = "default_true")]
    pub scroll: bool,
    #[serde(default = "default_true")]
    pub play_videos: bool,
    #[serde(default = "default_true")]
    pub click_videos: bool,
    #[serde(default = "default_play_selectors")]
    pub play_selectors: Vec<String>,
    #[serde(default = "default_max_clicks_per_selector")]
    pub max_clicks_per_selector: usize,
    /// Generic click position, `[x, y]`; `None` disables it
    #[serde(default = "default_click_point")]
    pub click_point: Option<[f64; 2]>,
    #[serde(default = "default_click_timeout_ms")]
    pub click_timeout_ms: u64,
}

impl Default for StimulationConfig {
    fn default() -> Self {
        Self {
            settle_ms: default_settle_ms(),
            step_pause_ms: default_step_pause_ms(),
            scroll: true,
            play_videos: true,
            click_videos: true,
            play_selectors: default_play_selectors(),
            max_clicks_per_selector: default_max_clicks_per_selector(),
            click_point: default_click_point(),
            click_timeout_ms: default_click_timeout_ms(),
        }
    }
}

fn default_settle_ms() -> u64 {
    3000
}

fn default_step_pause_ms() -> u64 {
    2000
}

fn default_play_selectors() -> Vec<String> {
    [
        r#"button[aria-label*="play" i]"#,
        r#"button[aria-label*="Play" i]"#,
        r#"[aria-label*="play" i]"#,
        "button.play",
        "button.play-button",
        ".play-button",
        ".play-btn",
        r#"[class*="play-button"]"#,
        r#"[class*="playButton"]"#,
        r#"[class*="PlayButton"]"#,
        r#"button[title*="play" i]"#,
        ".video-play-button",
        r#"[data-testid*="play"]"#,
        r#"button svg[class*="play"]"#,
        r#"div[role="button"][aria-label*="play" i]"#,
    ]
    .into_iter()
    .map(String::from)
    .collect()
}

fn default_max_clicks_per_selector() -> usize {
    3
}

fn default_click_point() -> Option<[f64; 2]> {
    Some([500.0, 300.0])
}

fn default_click_timeout_ms() -> u64 {
    2000
}

/// Which discoverer variant the process runs with
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DiscoveryMode {
    /// Use the browser when the probe succeeds, else fall back to scraping
    #[default]
    Auto,
    Browser,
    Scrape,
}

/// Discovery behaviour
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DiscoveryConfig {
    #[serde(default)]
    pub mode: DiscoveryMode,
    #[serde(default = "default_extension")]
    pub default_extension: String,
    /// Hosts that are refused up front
    #[serde(default = "default_drm_domains")]
    pub drm_domains: Vec<String>,
    #[serde(default = "default_scrape_timeout_secs")]
    pub scrape_timeout_secs: u64,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            mode: DiscoveryMode::default(),
            default_extension: default_extension(),
            drm_domains: default_drm_domains(),
            scrape_timeout_secs: default_scrape_timeout_secs(),
        }
    }
}

fn default_extension() -> String {
    ".mp4".to_string()
}

fn default_drm_domains() -> Vec<String> {
    [
        "netflix.com",
        "disneyplus.com",
        "hulu.com",
        "hbomax.com",
        "amazon.com/prime",
        "apple.com/tv",
    ]
    .into_iter()
    .map(String::from)
    .collect()
}

fn default_scrape_timeout_secs() -> u64 {
    30
}

/// Authenticated retrieval settings
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RetrievalConfig {
    #[serde(default = "default_chunk_size")]
    pub chunk_size: ByteSize,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            chunk_size: default_chunk_size(),
            request_timeout_secs: default_request_timeout_secs(),
            connect_timeout_secs: default_connect_timeout_secs(),
        }
    }
}

fn default_chunk_size() -> ByteSize {
    ByteSize::kib(8)
}

fn default_request_timeout_secs() -> u64 {
    300
}

fn default_connect_timeout_secs() -> u64 {
    10
}

/// External transcoder (ffmpeg) settings
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TranscodeConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_program")]
    pub program: PathBuf,
    #[serde(default = "default_download_dir")]
    pub output_dir: PathBuf,
}

impl Default for TranscodeConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            program: default_program(),
            output_dir: default_download_dir(),
        }
    }
}

fn default_program() -> PathBuf {
    PathBuf::from("ffmpeg")
}

/// Task registry retention
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RegistryConfig {
    #[serde(default = "default_terminal_ttl_secs")]
    pub terminal_ttl_secs: u64,
    #[serde(default = "default_reap_interval_secs")]
    pub reap_interval_secs: u64,
}

impl RegistryConfig {
    pub fn terminal_ttl(&self) -> Duration {
        Duration::from_secs(self.terminal_ttl_secs)
    }

    pub fn reap_interval(&self) -> Duration {
        Duration::from_secs(self.reap_interval_secs)
    }
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            terminal_ttl_secs: default_terminal_ttl_secs(),
            reap_interval_secs: default_reap_interval_secs(),
        }
    }
}

fn default_terminal_ttl_secs() -> u64 {
    3600
}

fn default_reap_interval_secs() -> u64 {
    60
}

/// Telemetry configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TelemetryConfig {
    /// Used when `RUST_LOG` is not set
    #[serde(default = "default_log_filter")]
    pub log_filter: String,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            log_filter: default_log_filter(),
        }
    }
}

fn default_log_filter() -> String {
    "info".to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();

        assert_eq!(config.server.bind_addr.to_string(), "0.0.0.0:8000");
        assert_eq!(config.retrieval.chunk_size.as_u64(), 8 * 1024);
        assert_eq!(config.browser.navigation_timeout(), Duration::from_secs(30));
        assert_eq!(config.stimulation.play_selectors.len(), 15);
        assert_eq!(config.stimulation.click_point, Some([500.0, 300.0]));
        assert_eq!(config.discovery.default_extension, ".mp4");
        assert_eq!(config.discovery.mode, DiscoveryMode::Auto);
    }

    #[test]
    fn test_partial_section_keeps_defaults() {
        let config: Config = toml::from_str(
            r#"
[stimulation]
settle_ms = 0
click_point = [10.0, 20.0]
"#,
        )
        .unwrap();

        assert_eq!(config.stimulation.settle_ms, 0);
        assert_eq!(config.stimulation.click_point, Some([10.0, 20.0]));
        assert_eq!(config.stimulation.max_clicks_per_selector, 3);
        assert!(config.browser.enabled);
    }
}
