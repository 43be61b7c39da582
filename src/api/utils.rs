//! Stateless request/response helpers shared by the handlers

use axum::http::HeaderValue;

use crate::api::error::ApiError;

/// Accepts `application/json` with optional parameters such as charset;
/// rejects look-alikes like `application/jsonp` or `text/json`.
pub fn parse_content_type(content_type: &str) -> Result<mime::Mime, ApiError> {
    let media_type: mime::Mime = content_type
        .parse()
        .map_err(|_| ApiError::InvalidPayload(format!("invalid Content-Type: {content_type}")))?;

    if media_type.type_() != mime::APPLICATION || media_type.subtype() != mime::JSON {
        return Err(ApiError::InvalidPayload(format!(
            "Content-Type must be application/json, got: {}/{}",
            media_type.type_(),
            media_type.subtype()
        )));
    }

    Ok(media_type)
}

pub fn validate_body_size(data: &[u8], max_size: usize) -> Result<(), ApiError> {
    if data.len() > max_size {
        return Err(ApiError::PayloadTooLarge(data.len()));
    }
    Ok(())
}

/// `Content-Disposition` value offering `file_name` as a download.
pub fn attachment_disposition(file_name: &str) -> HeaderValue {
    let safe: String = file_name
        .chars()
        .map(|c| if c.is_ascii_graphic() || c == ' ' { c } else { '_' })
        .filter(|c| *c != '"' && *c != '\\')
        .collect();
    let safe = if safe.trim().is_empty() { "video.mp4".to_string() } else { safe };

    HeaderValue::from_str(&format!("attachment; filename=\"{safe}\""))
        .unwrap_or_else(|_| HeaderValue::from_static("attachment; filename=\"video.mp4\""))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_content_type_valid() {
        assert!(parse_content_type("application/json").is_ok());
        assert!(parse_content_type("application/json; charset=utf-8").is_ok());
    }

    #[test]
    fn test_parse_content_type_invalid() {
        assert!(parse_content_type("application/jsonp").is_err());
        assert!(parse_content_type("text/json").is_err());
        assert!(parse_content_type("multipart/form-data").is_err());
        assert!(parse_content_type("").is_err());
    }

    #[test]
    fn test_validate_body_size() {
        assert!(validate_body_size(&[0u8; 16], 16).is_ok());
        match validate_body_size(&[0u8; 17], 16) {
            Err(ApiError::PayloadTooLarge(size)) => assert_eq!(size, 17),
            other => panic!("expected PayloadTooLarge, got {other:?}"),
        }
    }

    #[test]
    fn test_attachment_disposition() {
        assert_eq!(attachment_disposition("clip.mp4"), "attachment; filename=\"clip.mp4\"");
        assert_eq!(attachment_disposition("a\"b.mp4"), "attachment; filename=\"ab.mp4\"");
        assert_eq!(attachment_disposition("vidéo.mp4"), "attachment; filename=\"vid_o.mp4\"");
        assert_eq!(attachment_disposition(""), "attachment; filename=\"video.mp4\"");
    }
}
