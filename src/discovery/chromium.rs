//! Chromium driver over the DevTools protocol

use async_trait::async_trait;
use chromiumoxide::cdp::browser_protocol::network::{
    EventRequestWillBeSent, EventResponseReceived, SetUserAgentOverrideParams,
};
use chromiumoxide::error::CdpError;
use chromiumoxide::layout::Point;
use chromiumoxide::{Browser, Page};
use futures::StreamExt;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;
use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, info};

use super::browser::{
    BrowserDriver, BrowserError, BrowserPage, BrowserSession, NetworkEvent, ObservedResponse, Result,
};
use super::candidate::BrowserCookie;
use crate::config::BrowserConfig;

/// Common Chrome executable paths to check.
const CHROME_PATHS: &[&str] = &[
    "/usr/bin/google-chrome",
    "/usr/bin/google-chrome-stable",
    "/usr/bin/chromium",
    "/usr/bin/chromium-browser",
    "/snap/bin/chromium",
    "/Applications/Google Chrome.app/Contents/MacOS/Google Chrome",
    "/Applications/Chromium.app/Contents/MacOS/Chromium",
    "/opt/google/chrome/google-chrome",
];

/// Net error codes that mean the page was never reached
const UNREACHABLE_ERRORS: &[&str] = &[
    "ERR_NAME_NOT_RESOLVED",
    "ERR_CONNECTION_REFUSED",
    "ERR_ADDRESS_UNREACHABLE",
    "ERR_INTERNET_DISCONNECTED",
    "ERR_CONNECTION_TIMED_OUT",
];

/// Launches one Chromium process per page; pages never share cookies.
pub struct ChromiumDriver {
    config: BrowserConfig,
}

impl ChromiumDriver {
    pub fn new(config: BrowserConfig) -> Self {
        Self { config }
    }

    fn executable(&self) -> Option<PathBuf> {
        if let Some(path) = &self.config.executable {
            return Some(path.clone());
        }
        CHROME_PATHS
            .iter()
            .map(PathBuf::from)
            .find(|p| p.exists())
    }

    async fn start(&self) -> Result<(Browser, JoinHandle<()>)> {
        let (browser, mut handler) = match &self.config.remote_url {
            Some(url) => {
                info!(url, "Connecting to remote browser");
                Browser::connect(url.clone())
                    .await
                    .map_err(|e| BrowserError::Launch(e.to_string()))?
            }
            None => {
                let executable = self.executable().ok_or_else(|| {
                    BrowserError::Unavailable("Chrome/Chromium executable not found".into())
                })?;
                debug!(path = %executable.display(), headless = self.config.headless, "Launching browser");

                let mut builder = chromiumoxide::BrowserConfig::builder()
                    .chrome_executable(executable)
                    .no_sandbox()
                    .window_size(self.config.viewport_width, self.config.viewport_height)
                    .request_timeout(self.config.navigation_timeout())
                    .arg("--disable-setuid-sandbox")
                    .arg("--disable-dev-shm-usage")
                    .arg("--autoplay-policy=no-user-gesture-required");
                if !self.config.headless {
                    builder = builder.with_head();
                }
                let launch_config = builder.build().map_err(BrowserError::Launch)?;

                Browser::launch(launch_config)
                    .await
                    .map_err(|e| BrowserError::Launch(e.to_string()))?
            }
        };

        let handler_task = tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if event.is_err() {
                    break;
                }
            }
        });

        Ok((browser, handler_task))
    }
}

#[async_trait]
impl BrowserDriver for ChromiumDriver {
    fn name(&self) -> &'static str {
        "chromium"
    }

    async fn probe(&self) -> Result<()> {
        if self.config.remote_url.is_some() {
            let (mut browser, handler_task) = self.start().await?;
            let _ = browser.close().await;
            handler_task.abort();
            return Ok(());
        }
        match self.executable() {
            Some(path) => {
                info!(path = %path.display(), "Found Chrome");
                Ok(())
            }
            None => Err(BrowserError::Unavailable("Chrome/Chromium executable not found".into())),
        }
    }

    async fn open(&self) -> Result<BrowserSession> {
        let (browser, handler_task) = self.start().await?;

        let page = browser
            .new_page("about:blank")
            .await
            .map_err(|e| BrowserError::Protocol(e.to_string()))?;
        page.set_user_agent(SetUserAgentOverrideParams::new(self.config.user_agent.clone()))
            .await
            .map_err(|e| BrowserError::Protocol(e.to_string()))?;

        let (tx, rx) = mpsc::unbounded_channel();
        let mut forwarders = vec![handler_task];

        let mut requests = page
            .event_listener::<EventRequestWillBeSent>()
            .await
            .map_err(|e| BrowserError::Protocol(e.to_string()))?;
        let request_tx = tx.clone();
        forwarders.push(tokio::spawn(async move {
            while let Some(event) = requests.next().await {
                let url = event.request.url.clone();
                if request_tx.send(NetworkEvent::Request { url }).is_err() {
                    break;
                }
            }
        }));

        let mut responses = page
            .event_listener::<EventResponseReceived>()
            .await
            .map_err(|e| BrowserError::Protocol(e.to_string()))?;
        forwarders.push(tokio::spawn(async move {
            while let Some(event) = responses.next().await {
                if tx.send(NetworkEvent::Response(to_observed(&event))).is_err() {
                    break;
                }
            }
        }));

        Ok(BrowserSession {
            page: Box::new(ChromiumPage {
                page,
                browser: Mutex::new(Some(browser)),
                forwarders,
            }),
            events: rx,
        })
    }
}

fn to_observed(event: &EventResponseReceived) -> ObservedResponse {
    let response = &event.response;
    let mut headers = BTreeMap::new();
    if let Some(map) = response.headers.inner().as_object() {
        for (name, value) in map {
            if let Some(value) = value.as_str() {
                headers.insert(name.clone(), value.to_string());
            }
        }
    }
    if !headers.keys().any(|k| k.eq_ignore_ascii_case("content-type")) {
        headers.insert("content-type".into(), response.mime_type.clone());
    }

    let status = u16::try_from(response.status).unwrap_or(0);
    ObservedResponse::from_headers(response.url.clone(), status, &headers)
}

fn map_navigation_error(err: CdpError, timeout: Duration) -> BrowserError {
    match err {
        CdpError::Timeout => BrowserError::NavigationTimeout(timeout),
        CdpError::ChromeMessage(msg) if UNREACHABLE_ERRORS.iter().any(|code| msg.contains(code)) => {
            BrowserError::Unreachable(msg)
        }
        other => BrowserError::Protocol(other.to_string()),
    }
}

struct ChromiumPage {
    page: Page,
    browser: Mutex<Option<Browser>>,
    forwarders: Vec<JoinHandle<()>>,
}

#[async_trait]
impl BrowserPage for ChromiumPage {
    async fn navigate(&self, url: &str, timeout: Duration) -> Result<()> {
        match tokio::time::timeout(timeout, self.page.goto(url)).await {
            Ok(Ok(_)) => Ok(()),
            Ok(Err(err)) => Err(map_navigation_error(err, timeout)),
            Err(_) => Err(BrowserError::NavigationTimeout(timeout)),
        }
    }

    async fn evaluate(&self, script: &str) -> Result<serde_json::Value> {
        let result = self
            .page
            .evaluate(script)
            .await
            .map_err(|e| BrowserError::Script(e.to_string()))?;
        Ok(result.value().cloned().unwrap_or(serde_json::Value::Null))
    }

    async fn count_matches(&self, selector: &str) -> Result<usize> {
        match self.page.find_elements(selector).await {
            Ok(elements) => Ok(elements.len()),
            // chromiumoxide reports "no node found" as an error
            Err(CdpError::NotFound) => Ok(0),
            Err(err) => Err(BrowserError::Protocol(err.to_string())),
        }
    }

    async fn click(&self, selector: &str, index: usize) -> Result<()> {
        let elements = self
            .page
            .find_elements(selector)
            .await
            .map_err(|e| BrowserError::Protocol(e.to_string()))?;
        let element = elements.get(index).ok_or_else(|| BrowserError::ElementNotFound {
            selector: selector.to_string(),
            index,
        })?;
        element
            .click()
            .await
            .map_err(|e| BrowserError::Click(e.to_string()))?;
        Ok(())
    }

    async fn click_at(&self, x: f64, y: f64) -> Result<()> {
        self.page
            .click(Point { x, y })
            .await
            .map_err(|e| BrowserError::Click(e.to_string()))?;
        Ok(())
    }

    /// Whole browser jar, so cookies a media CDN set on its own domain are kept.
    async fn cookies(&self) -> Result<Vec<BrowserCookie>> {
        let guard = self.browser.lock().await;
        let Some(browser) = guard.as_ref() else {
            return Err(BrowserError::Protocol("browser already closed".into()));
        };
        let cookies = browser
            .get_cookies()
            .await
            .map_err(|e| BrowserError::Protocol(e.to_string()))?;
        drop(guard);
        Ok(cookies
            .into_iter()
            .map(|c| BrowserCookie {
                name: c.name,
                value: c.value,
                domain: c.domain,
                path: c.path,
            })
            .collect())
    }

    async fn close(&self) -> Result<()> {
        let browser = self.browser.lock().await.take();
        let Some(mut browser) = browser else {
            return Ok(());
        };

        if let Err(err) = self.page.clone().close().await {
            debug!(error = %err, "Page close failed");
        }
        let result = browser
            .close()
            .await
            .map(|_| ())
            .map_err(|e| BrowserError::Protocol(e.to_string()));
        let _ = browser.wait().await;
        for task in &self.forwarders {
            task.abort();
        }
        result
    }
}

impl Drop for ChromiumPage {
    fn drop(&mut self) {
        for task in &self.forwarders {
            task.abort();
        }
    }
}
