//! Media discovery on web pages
//!
//! [`MediaDiscoverer`] is the single capability the task runner depends on.
//! Two variants exist:
//! - [`BrowserDiscoverer`] drives a real browser page through a
//!   [`DiscoverySession`] and watches its network traffic
//! - [`ScrapeDiscoverer`] fetches the HTML once and reads media URLs from it
//!
//! [`select_discoverer`] picks one at startup based on configuration and a
//! probe of the browser driver.

mod browser;
mod candidate;
#[cfg(feature = "browser")]
mod chromium;
pub mod replay;
mod scrape;
mod session;
mod stimulus;
mod store;

pub use browser::{
    BrowserDriver, BrowserError, BrowserPage, BrowserSession, NetworkEvent, ObservedResponse,
};
pub use candidate::{AuthContext, BrowserCookie, Candidate};
#[cfg(feature = "browser")]
pub use chromium::ChromiumDriver;
pub use scrape::{ScrapeDiscoverer, extract_media_urls};
pub use session::{DiscoverySession, SessionSettings, SessionStatus};
pub use stimulus::{StimulationPlan, Stimulus};
pub use store::CandidateStore;

use async_trait::async_trait;
use std::sync::Arc;
use thiserror::Error;
use tracing::{info, warn};

use crate::config::{Config, DiscoveryMode};
use crate::tasks::CancelSignal;

#[derive(Debug, Error)]
pub enum DiscoveryError {
    #[error(transparent)]
    Browser(#[from] BrowserError),

    #[error("page could not be reached: {0}")]
    Unreachable(String),

    #[error("page fetch failed: {0}")]
    Fetch(String),

    #[error("Cancelled")]
    Cancelled,
}

/// Ranked result of one discovery
#[derive(Debug, Clone, Default)]
pub struct DiscoveryOutcome {
    pub candidates: Vec<Candidate>,
    pub auth: Option<Arc<AuthContext>>,
    /// Responses seen on the wire, media or not
    pub observed_responses: usize,
}

/// Receives every status transition of a discovery
pub type StatusCallback = Arc<dyn Fn(SessionStatus) + Send + Sync>;

/// "Discover media on a page"
#[async_trait]
pub trait MediaDiscoverer: Send + Sync {
    fn name(&self) -> &'static str;

    async fn discover(
        &self,
        page_url: &str,
        cancel: &CancelSignal,
        on_status: StatusCallback,
    ) -> Result<DiscoveryOutcome, DiscoveryError>;
}

/// Full-automation variant backed by a [`BrowserDriver`]
pub struct BrowserDiscoverer {
    driver: Arc<dyn BrowserDriver>,
    settings: Arc<SessionSettings>,
}

impl BrowserDiscoverer {
    pub fn new(driver: Arc<dyn BrowserDriver>, settings: SessionSettings) -> Self {
        Self {
            driver,
            settings: Arc::new(settings),
        }
    }
}

#[async_trait]
impl MediaDiscoverer for BrowserDiscoverer {
    fn name(&self) -> &'static str {
        self.driver.name()
    }

    async fn discover(
        &self,
        page_url: &str,
        cancel: &CancelSignal,
        on_status: StatusCallback,
    ) -> Result<DiscoveryOutcome, DiscoveryError> {
        DiscoverySession::new(Arc::clone(&self.settings))
            .on_status(move |status| on_status(status))
            .extract(self.driver.as_ref(), page_url, cancel)
            .await
    }
}

/// Browser driver compiled into this binary, if any
pub fn default_driver(config: &Config) -> Option<Arc<dyn BrowserDriver>> {
    #[cfg(feature = "browser")]
    {
        Some(Arc::new(ChromiumDriver::new(config.browser.clone())))
    }
    #[cfg(not(feature = "browser"))]
    {
        let _ = config;
        None
    }
}

/// Picks the discoverer variant for this process.
///
/// `scrape` mode never touches the browser. `browser` mode requires the probe
/// to pass. `auto` uses the browser when the probe passes and falls back to
/// scraping otherwise.
pub async fn select_discoverer(
    config: &Config,
    driver: Option<Arc<dyn BrowserDriver>>,
) -> Result<Arc<dyn MediaDiscoverer>, DiscoveryError> {
    let mode = config.discovery.mode;
    let driver = match (mode, driver) {
        (DiscoveryMode::Scrape, _) => None,
        (_, _) if !config.browser.enabled => None,
        (_, driver) => driver,
    };

    if let Some(driver) = driver {
        match driver.probe().await {
            Ok(()) => {
                info!(driver = driver.name(), "Using browser discovery");
                return Ok(Arc::new(BrowserDiscoverer::new(driver, SessionSettings::from_config(config))));
            }
            Err(err) if mode == DiscoveryMode::Browser => return Err(err.into()),
            Err(err) => warn!(driver = driver.name(), error = %err, "Browser probe failed, falling back to scraping"),
        }
    } else if mode == DiscoveryMode::Browser {
        return Err(BrowserError::Unavailable("no browser driver available".into()).into());
    }

    info!("Using HTTP scrape discovery");
    Ok(Arc::new(ScrapeDiscoverer::new(config)?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use replay::ReplayDriver;

    #[tokio::test]
    async fn test_auto_prefers_working_browser() {
        let config = Config::default();
        let driver: Arc<dyn BrowserDriver> = Arc::new(ReplayDriver::new());

        let discoverer = select_discoverer(&config, Some(driver)).await.unwrap();
        assert_eq!(discoverer.name(), "replay");
    }

    #[tokio::test]
    async fn test_auto_falls_back_to_scrape() {
        let config = Config::default();
        let driver: Arc<dyn BrowserDriver> = Arc::new(ReplayDriver::failing("missing"));

        let discoverer = select_discoverer(&config, Some(driver)).await.unwrap();
        assert_eq!(discoverer.name(), "scrape");

        let discoverer = select_discoverer(&config, None).await.unwrap();
        assert_eq!(discoverer.name(), "scrape");
    }

    #[tokio::test]
    async fn test_browser_mode_requires_probe() {
        let mut config = Config::default();
        config.discovery.mode = DiscoveryMode::Browser;
        let driver: Arc<dyn BrowserDriver> = Arc::new(ReplayDriver::failing("missing"));

        assert!(select_discoverer(&config, Some(driver)).await.is_err());
        assert!(select_discoverer(&config, None).await.is_err());
    }

    #[tokio::test]
    async fn test_disabled_browser_means_scrape() {
        let mut config = Config::default();
        config.browser.enabled = false;
        let driver: Arc<dyn BrowserDriver> = Arc::new(ReplayDriver::new());

        let discoverer = select_discoverer(&config, Some(driver)).await.unwrap();
        assert_eq!(discoverer.name(), "scrape");
    }
}
