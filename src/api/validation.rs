use thiserror::Error;

use super::models::{ConvertRequest, DownloadRequest, ExtractRequest};

/// Longest accepted URL
const MAX_URL_LEN: usize = 8192;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RequestValidationError {
    #[error("url must not be empty")]
    EmptyUrl,
    #[error("url exceeds 8192 characters")]
    UrlTooLong,
    #[error("url must use http or https")]
    UnsupportedScheme,
    #[error("task_id must not be empty")]
    EmptyTaskId,
    #[error("input_path must not be empty")]
    EmptyInputPath,
}

fn validate_url(url: &str) -> Result<(), RequestValidationError> {
    let url = url.trim();
    if url.is_empty() {
        return Err(RequestValidationError::EmptyUrl);
    }
    if url.len() > MAX_URL_LEN {
        return Err(RequestValidationError::UrlTooLong);
    }
    let lower = url.to_ascii_lowercase();
    if !lower.starts_with("http://") && !lower.starts_with("https://") {
        return Err(RequestValidationError::UnsupportedScheme);
    }
    Ok(())
}

pub fn validate_extract(request: &ExtractRequest) -> Result<(), RequestValidationError> {
    validate_url(&request.url)
}

pub fn validate_download(request: &DownloadRequest) -> Result<(), RequestValidationError> {
    match request {
        DownloadRequest::Candidate { task_id, .. } if task_id.trim().is_empty() => {
            Err(RequestValidationError::EmptyTaskId)
        }
        DownloadRequest::Candidate { .. } => Ok(()),
        DownloadRequest::Url { url } => validate_url(url),
    }
}

pub fn validate_convert(request: &ConvertRequest) -> Result<(), RequestValidationError> {
    if request.input_path.as_os_str().is_empty() {
        return Err(RequestValidationError::EmptyInputPath);
    }
    Ok(())
}
