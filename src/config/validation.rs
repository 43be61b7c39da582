use super::models::Config;
use crate::classifier::MEDIA_EXTENSIONS;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("retrieval.chunk_size must be positive")]
    ZeroChunkSize,

    #[error("{field} must be positive")]
    ZeroDuration { field: &'static str },

    #[error("discovery.default_extension '{0}' is not a recognized media extension")]
    UnknownDefaultExtension(String),

    #[error("stimulation.max_clicks_per_selector must be positive when play_selectors are set")]
    ZeroClicksPerSelector,

    #[error("browser viewport must be non-empty: {width}x{height}")]
    InvalidViewport { width: u32, height: u32 },
}

/// Validate the entire configuration
pub fn validate(config: &Config) -> Result<(), ValidationError> {
    validate_retrieval(config)?;
    validate_durations(config)?;
    validate_discovery(config)?;
    validate_browser(config)?;
    Ok(())
}

fn validate_retrieval(config: &Config) -> Result<(), ValidationError> {
    if config.retrieval.chunk_size.as_u64() == 0 {
        return Err(ValidationError::ZeroChunkSize);
    }
    Ok(())
}

fn validate_durations(config: &Config) -> Result<(), ValidationError> {
    let checks = [
        ("browser.navigation_timeout_secs", config.browser.navigation_timeout_secs),
        ("discovery.scrape_timeout_secs", config.discovery.scrape_timeout_secs),
        ("retrieval.request_timeout_secs", config.retrieval.request_timeout_secs),
        ("registry.terminal_ttl_secs", config.registry.terminal_ttl_secs),
        ("registry.reap_interval_secs", config.registry.reap_interval_secs),
    ];

    for (field, value) in checks {
        if value == 0 {
            return Err(ValidationError::ZeroDuration { field });
        }
    }
    Ok(())
}

fn validate_discovery(config: &Config) -> Result<(), ValidationError> {
    let ext = config.discovery.default_extension.trim_start_matches('.');
    if !MEDIA_EXTENSIONS.contains(&ext) {
        return Err(ValidationError::UnknownDefaultExtension(
            config.discovery.default_extension.clone(),
        ));
    }
    Ok(())
}

fn validate_browser(config: &Config) -> Result<(), ValidationError> {
    let browser = &config.browser;
    if browser.viewport_width == 0 || browser.viewport_height == 0 {
        return Err(ValidationError::InvalidViewport {
            width: browser.viewport_width,
            height: browser.viewport_height,
        });
    }

    let stimulation = &config.stimulation;
    if !stimulation.play_selectors.is_empty() && stimulation.max_clicks_per_selector == 0 {
        return Err(ValidationError::ZeroClicksPerSelector);
    }
    Ok(())
}
