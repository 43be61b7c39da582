//! Best-effort page stimulation
//!
//! Many players only request their media after a scroll, an autoplay call or a
//! click. A [`StimulationPlan`] is an ordered list of such heuristics; each one
//! returns a `Result` and the session discards failures after logging them.

use std::time::Duration;
use tracing::debug;

use super::browser::{BrowserError, BrowserPage, Result};
use crate::config::StimulationConfig;
use crate::tasks::CancelSignal;

const SCROLL_SCRIPT: &str = "window.scrollTo(0, document.body.scrollHeight)";

const PLAY_ALL_SCRIPT: &str = r#"
(() => {
    let started = 0;
    document.querySelectorAll('video').forEach((video) => {
        try {
            video.muted = true;
            video.play();
            started += 1;
        } catch (e) {}
    });
    return started;
})()
"#;

/// One heuristic step
#[derive(Debug, Clone, PartialEq)]
pub enum Stimulus {
    /// Let lazy content load
    Wait(Duration),
    Scroll,
    /// Mute and `play()` every `<video>` element
    PlayVideos,
    /// Click each `<video>` element
    ClickVideos,
    /// Try common play-button selectors; for each, click the first of up to
    /// `max_per_selector` matches that accepts a click.
    ClickSelectors {
        selectors: Vec<String>,
        max_per_selector: usize,
    },
    /// Click a fixed viewport position
    ClickAt { x: f64, y: f64 },
}

impl Stimulus {
    pub fn name(&self) -> &'static str {
        match self {
            Stimulus::Wait(_) => "wait",
            Stimulus::Scroll => "scroll",
            Stimulus::PlayVideos => "play_videos",
            Stimulus::ClickVideos => "click_videos",
            Stimulus::ClickSelectors { .. } => "click_selectors",
            Stimulus::ClickAt { .. } => "click_at",
        }
    }

    /// Whether the step can trigger new requests and should be followed by a pause.
    fn triggers_traffic(&self) -> bool {
        !matches!(self, Stimulus::Wait(_))
    }

    /// Run the step. Returns how many interactions actually happened.
    ///
    /// A wait ends early once `cancel` fires; the caller checks the signal
    /// right after.
    pub async fn apply(
        &self,
        page: &dyn BrowserPage,
        click_timeout: Duration,
        cancel: &CancelSignal,
    ) -> Result<usize> {
        match self {
            Stimulus::Wait(duration) => {
                cancel.sleep(*duration).await;
                Ok(0)
            }
            Stimulus::Scroll => {
                page.evaluate(SCROLL_SCRIPT).await?;
                Ok(1)
            }
            Stimulus::PlayVideos => {
                let started = page.evaluate(PLAY_ALL_SCRIPT).await?;
                Ok(started.as_u64().unwrap_or(0) as usize)
            }
            Stimulus::ClickVideos => {
                let total = page.count_matches("video").await?;
                let mut clicked = 0;
                for index in 0..total {
                    match timed_click(page, "video", index, click_timeout).await {
                        Ok(()) => clicked += 1,
                        Err(err) => debug!(index, error = %err, "Video click failed"),
                    }
                }
                Ok(clicked)
            }
            Stimulus::ClickSelectors { selectors, max_per_selector } => {
                let mut clicked = 0;
                for selector in selectors {
                    let matches = match page.count_matches(selector).await {
                        Ok(n) => n.min(*max_per_selector),
                        Err(err) => {
                            debug!(selector, error = %err, "Selector query failed");
                            continue;
                        }
                    };
                    for index in 0..matches {
                        match timed_click(page, selector, index, click_timeout).await {
                            Ok(()) => {
                                debug!(selector, index, "Clicked play button");
                                clicked += 1;
                                break;
                            }
                            Err(err) => debug!(selector, index, error = %err, "Play button click failed"),
                        }
                    }
                }
                Ok(clicked)
            }
            Stimulus::ClickAt { x, y } => {
                tokio::time::timeout(click_timeout, page.click_at(*x, *y))
                    .await
                    .map_err(|_| BrowserError::Click(format!("click at ({x}, {y}) timed out")))??;
                Ok(1)
            }
        }
    }
}

async fn timed_click(page: &dyn BrowserPage, selector: &str, index: usize, timeout: Duration) -> Result<()> {
    tokio::time::timeout(timeout, page.click(selector, index))
        .await
        .map_err(|_| BrowserError::Click(format!("{selector}[{index}] timed out after {timeout:?}")))?
}

/// Ordered stimulation steps with the pause applied after traffic-inducing ones
#[derive(Debug, Clone, PartialEq)]
pub struct StimulationPlan {
    steps: Vec<Stimulus>,
    step_pause: Duration,
    click_timeout: Duration,
}

impl StimulationPlan {
    pub fn new(steps: Vec<Stimulus>, step_pause: Duration, click_timeout: Duration) -> Self {
        Self {
            steps,
            step_pause,
            click_timeout,
        }
    }

    /// A plan with no steps: navigate and observe only.
    pub fn passive() -> Self {
        Self::new(Vec::new(), Duration::ZERO, Duration::from_secs(2))
    }

    pub fn from_config(config: &StimulationConfig) -> Self {
        let mut steps = Vec::new();

        if config.settle_ms > 0 {
            steps.push(Stimulus::Wait(Duration::from_millis(config.settle_ms)));
        }
        if config.scroll {
            steps.push(Stimulus::Scroll);
        }
        if config.play_videos {
            steps.push(Stimulus::PlayVideos);
        }
        if config.click_videos {
            steps.push(Stimulus::ClickVideos);
        }
        if !config.play_selectors.is_empty() {
            steps.push(Stimulus::ClickSelectors {
                selectors: config.play_selectors.clone(),
                max_per_selector: config.max_clicks_per_selector,
            });
        }
        if let Some([x, y]) = config.click_point {
            steps.push(Stimulus::ClickAt { x, y });
        }

        Self::new(
            steps,
            Duration::from_millis(config.step_pause_ms),
            Duration::from_millis(config.click_timeout_ms),
        )
    }

    pub fn steps(&self) -> &[Stimulus] {
        &self.steps
    }

    pub fn click_timeout(&self) -> Duration {
        self.click_timeout
    }

    /// Pause to apply after `step`
    pub fn pause_after(&self, step: &Stimulus) -> Duration {
        if step.triggers_traffic() {
            self.step_pause
        } else {
            Duration::ZERO
        }
    }
}
