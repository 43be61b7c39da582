//! One discovery attempt against one page
//!
//! Status moves strictly forward:
//! `Pending -> Loading -> Extracting -> Completed | Failed`.

use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use super::browser::{BrowserDriver, BrowserError, BrowserPage, NetworkEvent, ObservedResponse};
use super::candidate::{AuthContext, Candidate};
use super::stimulus::StimulationPlan;
use super::store::CandidateStore;
use super::{DiscoveryError, DiscoveryOutcome};
use crate::classifier::{self, Verdict};
use crate::config::Config;
use crate::tasks::CancelSignal;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Pending,
    Loading,
    Extracting,
    Completed,
    Failed,
}

impl SessionStatus {
    fn order(self) -> u8 {
        match self {
            SessionStatus::Pending => 0,
            SessionStatus::Loading => 1,
            SessionStatus::Extracting => 2,
            SessionStatus::Completed | SessionStatus::Failed => 3,
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, SessionStatus::Completed | SessionStatus::Failed)
    }
}

/// Settings shared by every session of a process
#[derive(Debug, Clone)]
pub struct SessionSettings {
    pub navigation_timeout: Duration,
    pub user_agent: String,
    pub default_extension: String,
    pub plan: StimulationPlan,
}

impl SessionSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            navigation_timeout: config.browser.navigation_timeout(),
            user_agent: config.browser.user_agent.clone(),
            default_extension: config.discovery.default_extension.clone(),
            plan: StimulationPlan::from_config(&config.stimulation),
        }
    }
}

type StatusObserver = Box<dyn Fn(SessionStatus) + Send + Sync>;

/// Drives one browser page, classifies its traffic and collects candidates.
pub struct DiscoverySession {
    settings: Arc<SessionSettings>,
    status: SessionStatus,
    store: CandidateStore,
    observed: usize,
    observer: Option<StatusObserver>,
}

impl DiscoverySession {
    pub fn new(settings: Arc<SessionSettings>) -> Self {
        Self {
            settings,
            status: SessionStatus::Pending,
            store: CandidateStore::new(),
            observed: 0,
            observer: None,
        }
    }

    /// Called on every status transition
    pub fn on_status(mut self, observer: impl Fn(SessionStatus) + Send + Sync + 'static) -> Self {
        self.observer = Some(Box::new(observer));
        self
    }

    pub fn status(&self) -> SessionStatus {
        self.status
    }

    /// Moves forward only; a request to move backwards or out of a terminal
    /// state is ignored.
    fn advance(&mut self, next: SessionStatus) {
        if self.status.is_terminal() || next.order() <= self.status.order() {
            debug!(from = ?self.status, to = ?next, "Ignoring backwards status transition");
            return;
        }
        self.status = next;
        if let Some(observer) = &self.observer {
            observer(next);
        }
    }

    fn fail(&mut self, err: DiscoveryError) -> Result<DiscoveryOutcome, DiscoveryError> {
        self.advance(SessionStatus::Failed);
        Err(err)
    }

    /// Feeds one network event through the classifier.
    pub fn observe(&mut self, event: NetworkEvent) {
        match event {
            NetworkEvent::Request { url } => {
                tracing::trace!(url, "Request observed");
            }
            NetworkEvent::Response(response) => {
                self.observed += 1;
                self.consider(response);
            }
        }
    }

    fn consider(&mut self, response: ObservedResponse) {
        if self.store.contains(&response.url) {
            return;
        }

        match classifier::classify(&response.url, &response.content_type, &self.settings.default_extension) {
            Verdict::Media { extension } => {
                info!(
                    url = %response.url,
                    content_type = %response.content_type,
                    size = ?response.content_length,
                    "Captured media"
                );
                let candidate = Candidate::new(response.url, response.content_type, extension)
                    .with_size(response.content_length);
                self.store.add(candidate);
            }
            Verdict::Excluded => debug!(url = %response.url, "Excluding ad/tracker response"),
            Verdict::Image | Verdict::NotMedia => {}
        }
    }

    fn drain(&mut self, events: &mut tokio::sync::mpsc::UnboundedReceiver<NetworkEvent>) {
        while let Ok(event) = events.try_recv() {
            self.observe(event);
        }
    }

    /// Run the session against `page_url`.
    ///
    /// Navigation problems other than an unreachable page with no traffic at
    /// all are logged and the session carries on. An empty result is a
    /// successful outcome.
    pub async fn extract(
        mut self,
        driver: &dyn BrowserDriver,
        page_url: &str,
        cancel: &CancelSignal,
    ) -> Result<DiscoveryOutcome, DiscoveryError> {
        self.advance(SessionStatus::Loading);

        let session = match driver.open().await {
            Ok(session) => session,
            Err(err) => {
                warn!(driver = driver.name(), error = %err, "Browser could not be opened");
                return self.fail(err.into());
            }
        };
        let page = session.page;
        let mut events = session.events;

        info!(url = page_url, "Loading page");
        let navigation = page.navigate(page_url, self.settings.navigation_timeout).await;
        self.drain(&mut events);

        match navigation {
            Ok(()) => debug!(url = page_url, "Page loaded"),
            Err(BrowserError::Unreachable(reason)) if self.observed == 0 => {
                warn!(url = page_url, reason, "Page unreachable");
                close_quietly(page.as_ref()).await;
                return self.fail(DiscoveryError::Unreachable(reason));
            }
            Err(err) => warn!(url = page_url, error = %err, "Page load incomplete, continuing anyway"),
        }

        if cancel.is_cancelled() {
            close_quietly(page.as_ref()).await;
            return self.fail(DiscoveryError::Cancelled);
        }

        self.advance(SessionStatus::Extracting);

        let settings = Arc::clone(&self.settings);
        for step in settings.plan.steps() {
            if cancel.is_cancelled() {
                close_quietly(page.as_ref()).await;
                return self.fail(DiscoveryError::Cancelled);
            }

            match step.apply(page.as_ref(), settings.plan.click_timeout(), cancel).await {
                Ok(count) => debug!(step = step.name(), count, "Stimulation step done"),
                Err(err) => debug!(step = step.name(), error = %err, "Stimulation step failed"),
            }

            if cancel.sleep(settings.plan.pause_after(step)).await {
                close_quietly(page.as_ref()).await;
                return self.fail(DiscoveryError::Cancelled);
            }
            self.drain(&mut events);
        }

        let cookies = match page.cookies().await {
            Ok(cookies) => cookies,
            Err(err) => {
                warn!(error = %err, "Could not read cookies, continuing without them");
                Vec::new()
            }
        };
        close_quietly(page.as_ref()).await;
        self.drain(&mut events);

        let auth = Arc::new(AuthContext::synthesize(page_url, &settings.user_agent, cookies));
        self.store.attach_auth(Arc::clone(&auth));

        if self.store.is_empty() {
            warn!(url = page_url, observed = self.observed, "No media files found");
        } else {
            info!(url = page_url, found = self.store.len(), "Media discovery finished");
        }

        self.advance(SessionStatus::Completed);
        let observed = self.observed;
        let store = std::mem::take(&mut self.store);
        Ok(DiscoveryOutcome {
            candidates: store.rank(),
            auth: Some(auth),
            observed_responses: observed,
        })
    }
}

async fn close_quietly(page: &dyn BrowserPage) {
    if let Err(err) = page.close().await {
        debug!(error = %err, "Closing page failed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::discovery::candidate::BrowserCookie;
    use crate::discovery::replay::{NavigationOutcome, PageScript, ReplayDriver};
    use crate::discovery::stimulus::Stimulus;
    use crate::tasks::cancel_pair;
    use std::sync::Mutex;

    const PAGE: &str = "https://site.test/watch/1";

    fn settings(plan: StimulationPlan) -> Arc<SessionSettings> {
        Arc::new(SessionSettings {
            navigation_timeout: Duration::from_secs(1),
            user_agent: "TestAgent/1.0".into(),
            default_extension: ".mp4".into(),
            plan,
        })
    }

    fn clicking_plan() -> StimulationPlan {
        StimulationPlan::new(
            vec![
                Stimulus::PlayVideos,
                Stimulus::ClickSelectors {
                    selectors: vec![".broken".into(), ".play-button".into()],
                    max_per_selector: 3,
                },
                Stimulus::ClickAt { x: 500.0, y: 300.0 },
            ],
            Duration::ZERO,
            Duration::from_millis(200),
        )
    }

    #[tokio::test]
    async fn test_hls_playlist_and_ad_yield_one_candidate() {
        let driver = ReplayDriver::new().with_page(
            PAGE,
            PageScript::new()
                .respond(
                    ObservedResponse::new("https://cdn.example.com/v/abc.m3u8")
                        .content_type("application/vnd.apple.mpegurl")
                        .content_length(12000),
                )
                .respond(
                    ObservedResponse::new("https://doubleclick.net/ad.mp4")
                        .content_type("video/mp4")
                        .content_length(90000),
                )
                .respond(ObservedResponse::new("https://site.test/poster.jpg").content_type("image/jpeg")),
        );

        let outcome = DiscoverySession::new(settings(StimulationPlan::passive()))
            .extract(&driver, PAGE, &CancelSignal::never())
            .await
            .unwrap();

        assert_eq!(outcome.candidates.len(), 1);
        let candidate = &outcome.candidates[0];
        assert_eq!(candidate.url, "https://cdn.example.com/v/abc.m3u8");
        assert_eq!(candidate.extension, ".m3u8");
        assert_eq!(candidate.size_bytes, Some(12000));
        assert_eq!(outcome.observed_responses, 3);
    }

    #[tokio::test]
    async fn test_cdn_domain_cookie_is_replayed() {
        let cdn_cookie = BrowserCookie {
            name: "cdn_token".into(),
            value: "t0k".into(),
            domain: ".cdn.example.com".into(),
            path: "/".into(),
        };
        let driver = ReplayDriver::new().with_page(
            PAGE,
            PageScript::new()
                .respond(
                    ObservedResponse::new("https://cdn.example.com/v/full.mp4")
                        .content_type("video/mp4")
                        .content_length(5000),
                )
                .cookie(BrowserCookie::new("sid", "page"))
                .cookie(cdn_cookie),
        );

        let outcome = DiscoverySession::new(settings(StimulationPlan::passive()))
            .extract(&driver, PAGE, &CancelSignal::never())
            .await
            .unwrap();

        let auth = outcome.candidates[0].auth.as_deref().unwrap();
        let headers = crate::retrieval::replay_headers(auth);
        assert_eq!(headers.get("cookie").unwrap(), "sid=page; cdn_token=t0k");
        assert_eq!(headers.get("referer").unwrap(), PAGE);
    }

    #[tokio::test]
    async fn test_empty_page_completes_without_candidates() {
        let driver = ReplayDriver::new();
        let statuses = Arc::new(Mutex::new(Vec::new()));
        let seen = Arc::clone(&statuses);

        let outcome = DiscoverySession::new(settings(clicking_plan()))
            .on_status(move |s| seen.lock().unwrap().push(s))
            .extract(&driver, PAGE, &CancelSignal::never())
            .await
            .unwrap();

        assert!(outcome.candidates.is_empty());
        assert_eq!(
            *statuses.lock().unwrap(),
            vec![SessionStatus::Loading, SessionStatus::Extracting, SessionStatus::Completed]
        );
    }

    #[tokio::test]
    async fn test_stimulation_failures_are_swallowed() {
        let driver = ReplayDriver::new().with_page(
            PAGE,
            PageScript::new()
                .broken(".broken")
                .on_play(ObservedResponse::new("https://cdn.test/preview.webm").content_length(100))
                .on_click(
                    ".play-button",
                    ObservedResponse::new("https://cdn.test/main.mp4")
                        .content_type("video/mp4")
                        .content_length(5_000_000),
                )
                .cookie(BrowserCookie::new("sid", "42")),
        );

        let outcome = DiscoverySession::new(settings(clicking_plan()))
            .extract(&driver, PAGE, &CancelSignal::never())
            .await
            .unwrap();

        let urls: Vec<_> = outcome.candidates.iter().map(|c| c.url.as_str()).collect();
        assert_eq!(urls, vec!["https://cdn.test/main.mp4", "https://cdn.test/preview.webm"]);

        let auth = outcome.candidates[0].auth.as_ref().unwrap();
        assert_eq!(auth.headers["Referer"], PAGE);
        assert_eq!(auth.headers["Origin"], "https://site.test");
        assert_eq!(auth.headers["User-Agent"], "TestAgent/1.0");
        assert_eq!(auth.cookie_header().as_deref(), Some("sid=42"));
        assert!(Arc::ptr_eq(auth, outcome.candidates[1].auth.as_ref().unwrap()));
    }

    #[tokio::test]
    async fn test_navigation_timeout_is_not_fatal() {
        let driver = ReplayDriver::new().with_page(
            PAGE,
            PageScript::new()
                .navigation(NavigationOutcome::TimedOut)
                .respond(ObservedResponse::new("https://cdn.test/slow.mp4")),
        );

        let outcome = DiscoverySession::new(settings(StimulationPlan::passive()))
            .extract(&driver, PAGE, &CancelSignal::never())
            .await
            .unwrap();
        assert_eq!(outcome.candidates.len(), 1);
    }

    #[tokio::test]
    async fn test_unreachable_page_fails() {
        let driver = ReplayDriver::new().with_page(
            PAGE,
            PageScript::new().navigation(NavigationOutcome::Unreachable),
        );

        let result = DiscoverySession::new(settings(StimulationPlan::passive()))
            .extract(&driver, PAGE, &CancelSignal::never())
            .await;
        assert!(matches!(result, Err(DiscoveryError::Unreachable(_))));
    }

    #[tokio::test]
    async fn test_browser_launch_failure_fails() {
        let driver = ReplayDriver::failing("chromium missing");
        let result = DiscoverySession::new(settings(StimulationPlan::passive()))
            .extract(&driver, PAGE, &CancelSignal::never())
            .await;
        assert!(matches!(result, Err(DiscoveryError::Browser(BrowserError::Launch(_)))));
    }

    #[tokio::test]
    async fn test_cancel_stops_session() {
        let driver = ReplayDriver::new();
        let (handle, signal) = cancel_pair();
        handle.cancel();

        let result = DiscoverySession::new(settings(clicking_plan()))
            .extract(&driver, PAGE, &signal)
            .await;
        assert!(matches!(result, Err(DiscoveryError::Cancelled)));
    }

    #[tokio::test]
    async fn test_cancel_interrupts_settle_wait() {
        let driver = ReplayDriver::new();
        let plan = StimulationPlan::new(
            vec![Stimulus::Wait(Duration::from_secs(30)), Stimulus::PlayVideos],
            Duration::ZERO,
            Duration::from_millis(200),
        );
        let (handle, signal) = cancel_pair();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            handle.cancel();
        });

        let started = std::time::Instant::now();
        let result = tokio::time::timeout(
            Duration::from_secs(5),
            DiscoverySession::new(settings(plan)).extract(&driver, PAGE, &signal),
        )
        .await
        .expect("settle wait ignored cancellation");

        assert!(matches!(result, Err(DiscoveryError::Cancelled)));
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[test]
    fn test_status_never_regresses() {
        let mut session = DiscoverySession::new(settings(StimulationPlan::passive()));
        session.advance(SessionStatus::Extracting);
        session.advance(SessionStatus::Loading);
        assert_eq!(session.status(), SessionStatus::Extracting);
        session.advance(SessionStatus::Failed);
        session.advance(SessionStatus::Completed);
        assert_eq!(session.status(), SessionStatus::Failed);
    }

    #[test]
    fn test_duplicate_responses_are_ignored() {
        let mut session = DiscoverySession::new(settings(StimulationPlan::passive()));
        let response = ObservedResponse::new("https://cdn.test/a.mp4").content_length(10);
        session.observe(NetworkEvent::Response(response.clone()));
        session.observe(NetworkEvent::Response(response.content_length(99)));
        assert_eq!(session.store.len(), 1);
        assert_eq!(session.store.iter().next().unwrap().size_bytes, Some(10));
    }
}
