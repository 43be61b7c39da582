//! HTTP-only discovery for hosts without a usable browser
//!
//! Fetches the page once and pulls media URLs out of `<video>`/`<source>`
//! tags and out of any absolute URL in the markup or inline scripts. It
//! cannot see requests made by JavaScript at runtime.

use async_trait::async_trait;
use regex::Regex;
use reqwest::header::{SET_COOKIE, USER_AGENT};
use scraper::{Html, Selector};
use std::sync::{Arc, LazyLock};
use std::time::Duration;
use tracing::{debug, info, warn};
use url::Url;

use super::candidate::{AuthContext, BrowserCookie, Candidate};
use super::session::SessionStatus;
use super::store::CandidateStore;
use super::{DiscoveryError, DiscoveryOutcome, MediaDiscoverer, StatusCallback};
use crate::classifier;
use crate::config::Config;
use crate::tasks::CancelSignal;

static MEDIA_URL: LazyLock<Option<Regex>> = LazyLock::new(|| {
    Regex::new(r#"(?i)https?://[^\s<>"']+\.(?:mp4|webm|m3u8|ts|mov)"#).ok()
});

static TRAILING_JUNK: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r#"["',;}\]]+$"#).ok());

pub struct ScrapeDiscoverer {
    client: reqwest::Client,
    user_agent: String,
    default_extension: String,
}

impl ScrapeDiscoverer {
    pub fn new(config: &Config) -> Result<Self, DiscoveryError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.discovery.scrape_timeout_secs))
            .redirect(reqwest::redirect::Policy::limited(10))
            .build()
            .map_err(|e| DiscoveryError::Fetch(e.to_string()))?;

        Ok(Self {
            client,
            user_agent: config.browser.user_agent.clone(),
            default_extension: config.discovery.default_extension.clone(),
        })
    }
}

#[async_trait]
impl MediaDiscoverer for ScrapeDiscoverer {
    fn name(&self) -> &'static str {
        "scrape"
    }

    async fn discover(
        &self,
        page_url: &str,
        cancel: &CancelSignal,
        on_status: StatusCallback,
    ) -> Result<DiscoveryOutcome, DiscoveryError> {
        on_status(SessionStatus::Loading);
        info!(url = page_url, "Fetching page");

        let request = self.client.get(page_url).header(USER_AGENT, &self.user_agent);
        let response = tokio::select! {
            result = request.send() => result.map_err(|e| {
                on_status(SessionStatus::Failed);
                if e.is_connect() || e.is_timeout() {
                    DiscoveryError::Unreachable(e.to_string())
                } else {
                    DiscoveryError::Fetch(e.to_string())
                }
            })?,
            _ = cancel.cancelled() => {
                on_status(SessionStatus::Failed);
                return Err(DiscoveryError::Cancelled);
            }
        };

        let status = response.status();
        if !status.is_success() {
            on_status(SessionStatus::Failed);
            return Err(DiscoveryError::Fetch(format!("page returned HTTP {}", status.as_u16())));
        }

        let cookies = parse_set_cookies(response.headers().get_all(SET_COOKIE).iter());
        let base = response.url().clone();
        let html = response.text().await.map_err(|e| {
            on_status(SessionStatus::Failed);
            DiscoveryError::Fetch(e.to_string())
        })?;

        on_status(SessionStatus::Extracting);
        let mut store = CandidateStore::new();
        for url in extract_media_urls(&html, &base) {
            let extension = classifier::resolve_extension(&url, "", &self.default_extension);
            if store.add(Candidate::new(url.clone(), "", extension)) {
                debug!(url, "Captured media from markup");
            }
        }

        if store.is_empty() {
            warn!(url = page_url, "No media URLs in page markup");
        }

        let auth = Arc::new(AuthContext::synthesize(page_url, &self.user_agent, cookies));
        store.attach_auth(Arc::clone(&auth));
        on_status(SessionStatus::Completed);

        Ok(DiscoveryOutcome {
            candidates: store.rank(),
            auth: Some(auth),
            observed_responses: 1,
        })
    }
}

/// Media URLs referenced by `html`, in document order, excluding ads and trackers.
pub fn extract_media_urls(html: &str, base: &Url) -> Vec<String> {
    let mut found = Vec::new();
    let mut push = |url: String| {
        if !classifier::should_exclude(&url) && !found.contains(&url) {
            found.push(url);
        }
    };

    let document = Html::parse_document(html);
    if let Ok(selector) = Selector::parse("video, source") {
        for element in document.select(&selector) {
            let el = element.value();
            let Some(src) = el.attr("src").or_else(|| el.attr("data-src")) else {
                continue;
            };
            match base.join(src) {
                Ok(full) if classifier::is_media_by_url(full.as_str()) => push(full.to_string()),
                Ok(_) => {}
                Err(err) => debug!(src, error = %err, "Skipping unresolvable media src"),
            }
        }
    }

    if let (Some(media), Some(junk)) = (MEDIA_URL.as_ref(), TRAILING_JUNK.as_ref()) {
        for m in media.find_iter(html) {
            push(junk.replace(m.as_str(), "").into_owned());
        }
    }

    found
}

fn parse_set_cookies<'a>(values: impl Iterator<Item = &'a reqwest::header::HeaderValue>) -> Vec<BrowserCookie> {
    values
        .filter_map(|value| value.to_str().ok())
        .filter_map(|raw| {
            let pair = raw.split(';').next()?.trim();
            let (name, value) = pair.split_once('=')?;
            let name = name.trim();
            (!name.is_empty()).then(|| BrowserCookie::new(name, value.trim()))
        })
        .collect()
}
