//! Browser driver that replays recorded page traffic
//!
//! Each page URL maps to a [`PageScript`]: the responses emitted when the page
//! is loaded, the responses emitted when particular elements are clicked or
//! when videos are told to play, and the cookie jar. The test suites drive
//! discovery through it without a real browser.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;

use super::browser::{
    BrowserDriver, BrowserError, BrowserPage, BrowserSession, NetworkEvent, ObservedResponse, Result,
};
use super::candidate::BrowserCookie;

/// How navigation to a scripted page ends
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum NavigationOutcome {
    #[default]
    Loaded,
    TimedOut,
    Unreachable,
}

/// Recorded behaviour of one page
#[derive(Debug, Clone, Default)]
pub struct PageScript {
    navigation: NavigationOutcome,
    on_load: Vec<ObservedResponse>,
    on_play: Vec<ObservedResponse>,
    on_click: Vec<(String, Vec<ObservedResponse>)>,
    broken_selectors: Vec<String>,
    cookies: Vec<BrowserCookie>,
}

impl PageScript {
    pub fn new() -> Self {
        Self::default()
    }

    /// Response emitted during navigation
    pub fn respond(mut self, response: ObservedResponse) -> Self {
        self.on_load.push(response);
        self
    }

    /// Response emitted once a script asks the page's videos to play
    pub fn on_play(mut self, response: ObservedResponse) -> Self {
        self.on_play.push(response);
        self
    }

    /// Makes `selector` match one element whose click emits `response`
    pub fn on_click(mut self, selector: impl Into<String>, response: ObservedResponse) -> Self {
        let selector = selector.into();
        match self.on_click.iter_mut().find(|(s, _)| *s == selector) {
            Some((_, responses)) => responses.push(response),
            None => self.on_click.push((selector, vec![response])),
        }
        self
    }

    /// Makes `selector` match one element that refuses clicks
    pub fn broken(mut self, selector: impl Into<String>) -> Self {
        self.broken_selectors.push(selector.into());
        self
    }

    pub fn cookie(mut self, cookie: BrowserCookie) -> Self {
        self.cookies.push(cookie);
        self
    }

    pub fn navigation(mut self, outcome: NavigationOutcome) -> Self {
        self.navigation = outcome;
        self
    }
}

/// Driver backed by [`PageScript`]s keyed by page URL
#[derive(Debug, Clone, Default)]
pub struct ReplayDriver {
    pages: Arc<Mutex<HashMap<String, PageScript>>>,
    launch_error: Option<String>,
}

impl ReplayDriver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_page(self, url: impl Into<String>, script: PageScript) -> Self {
        self.insert(url, script);
        self
    }

    /// Every `open` fails as if the browser binary could not start
    pub fn failing(reason: impl Into<String>) -> Self {
        Self {
            pages: Arc::default(),
            launch_error: Some(reason.into()),
        }
    }

    pub fn insert(&self, url: impl Into<String>, script: PageScript) {
        let mut pages = self.pages.lock().unwrap_or_else(|e| e.into_inner());
        pages.insert(url.into(), script);
    }

    fn script_for(&self, url: &str) -> PageScript {
        let pages = self.pages.lock().unwrap_or_else(|e| e.into_inner());
        pages.get(url).cloned().unwrap_or_default()
    }
}

#[async_trait]
impl BrowserDriver for ReplayDriver {
    fn name(&self) -> &'static str {
        "replay"
    }

    async fn probe(&self) -> Result<()> {
        match &self.launch_error {
            Some(reason) => Err(BrowserError::Unavailable(reason.clone())),
            None => Ok(()),
        }
    }

    async fn open(&self) -> Result<BrowserSession> {
        if let Some(reason) = &self.launch_error {
            return Err(BrowserError::Launch(reason.clone()));
        }

        let (tx, rx) = mpsc::unbounded_channel();
        let page = ReplayPage {
            driver: self.clone(),
            tx,
            script: Mutex::new(None),
        };
        Ok(BrowserSession {
            page: Box::new(page),
            events: rx,
        })
    }
}

struct ReplayPage {
    driver: ReplayDriver,
    tx: mpsc::UnboundedSender<NetworkEvent>,
    script: Mutex<Option<PageScript>>,
}

impl ReplayPage {
    fn emit(&self, responses: &[ObservedResponse]) {
        for response in responses {
            // receiver gone means the session finished; nothing left to observe
            let _ = self.tx.send(NetworkEvent::Request {
                url: response.url.clone(),
            });
            let _ = self.tx.send(NetworkEvent::Response(response.clone()));
        }
    }

    fn current(&self) -> PageScript {
        let script = self.script.lock().unwrap_or_else(|e| e.into_inner());
        script.clone().unwrap_or_default()
    }
}

#[async_trait]
impl BrowserPage for ReplayPage {
    async fn navigate(&self, url: &str, timeout: Duration) -> Result<()> {
        let script = self.driver.script_for(url);
        {
            let mut current = self.script.lock().unwrap_or_else(|e| e.into_inner());
            *current = Some(script.clone());
        }

        match script.navigation {
            NavigationOutcome::Unreachable => {
                Err(BrowserError::Unreachable(format!("net::ERR_NAME_NOT_RESOLVED at {url}")))
            }
            NavigationOutcome::TimedOut => {
                self.emit(&script.on_load);
                Err(BrowserError::NavigationTimeout(timeout))
            }
            NavigationOutcome::Loaded => {
                self.emit(&script.on_load);
                Ok(())
            }
        }
    }

    async fn evaluate(&self, script: &str) -> Result<serde_json::Value> {
        let page = self.current();
        if script.contains(".play()") {
            self.emit(&page.on_play);
            return Ok(serde_json::json!(page.on_play.len()));
        }
        Ok(serde_json::Value::Null)
    }

    async fn count_matches(&self, selector: &str) -> Result<usize> {
        let page = self.current();
        let clickable = page.on_click.iter().filter(|(s, _)| s == selector).count();
        let broken = page.broken_selectors.iter().filter(|s| *s == selector).count();
        Ok(clickable + broken)
    }

    async fn click(&self, selector: &str, index: usize) -> Result<()> {
        let page = self.current();
        if page.broken_selectors.iter().any(|s| s == selector) {
            return Err(BrowserError::Click(format!("{selector} is not clickable")));
        }
        match page.on_click.iter().find(|(s, _)| s == selector) {
            Some((_, responses)) if index == 0 => {
                self.emit(responses);
                Ok(())
            }
            _ => Err(BrowserError::ElementNotFound {
                selector: selector.to_string(),
                index,
            }),
        }
    }

    async fn click_at(&self, _x: f64, _y: f64) -> Result<()> {
        Ok(())
    }

    async fn cookies(&self) -> Result<Vec<BrowserCookie>> {
        Ok(self.current().cookies)
    }

    async fn close(&self) -> Result<()> {
        Ok(())
    }
}
