//! Media classification of observed network responses
//!
//! Every function here is pure and total: no I/O, no panics, no errors. The
//! discovery session feeds each observed response through [`classify`] and
//! keeps only [`Verdict::Media`] results.

use regex::RegexSet;
use std::sync::LazyLock;
use url::Url;

/// Recognized media extensions, without the leading dot
pub const MEDIA_EXTENSIONS: &[&str] = &["mp4", "webm", "m3u8", "ts", "mov", "avi", "mkv", "flv"];

/// Content-type substrings that mark a response as media.
///
/// `application/octet-stream` is kept on purpose: CDNs routinely serve video
/// segments with it.
pub const MEDIA_MIME_TYPES: &[&str] = &[
    "video/mp4",
    "video/webm",
    "video/ogg",
    "video/quicktime",
    "application/vnd.apple.mpegurl",
    "application/x-mpegurl",
    "video/mp2t",
    "application/octet-stream",
];

const IMAGE_URL_MARKERS: &[&str] = &[".jpg", ".jpeg", ".png", ".gif", ".webp", ".svg", ".ico"];
const IMAGE_TYPE_MARKERS: &[&str] = &["image/", "jpeg", "jpg", "png", "gif", "webp", "svg"];

// `ad[sv]?\.` must follow a non-alphanumeric character: "preroll_ad." and
// "ads." match, "download." and "upload." do not.
static EXCLUDE_PATTERNS: LazyLock<RegexSet> = LazyLock::new(|| {
    RegexSet::new([
        r"(?i)doubleclick\.net",
        r"(?i)googlesyndication",
        r"(?i)analytics",
        r"(?i)tracking",
        r"(?i)pixel",
        r"(?i)beacon",
        r"(?i)(?:^|[^a-z0-9])ad[sv]?\.",
        r"(?i)advertisement",
    ])
    .unwrap_or_else(|_| RegexSet::empty())
});

/// Outcome of classifying one response
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    /// Rejected before any media check
    Image,
    NotMedia,
    /// Media-shaped, but matched an ad/tracker pattern
    Excluded,
    Media { extension: String },
}

impl Verdict {
    pub fn is_media(&self) -> bool {
        matches!(self, Verdict::Media { .. })
    }
}

/// Lowercased path and query of `url`; the whole string when it does not parse.
fn path_and_query(url: &str) -> String {
    match Url::parse(url) {
        Ok(parsed) => {
            let mut out = parsed.path().to_ascii_lowercase();
            if let Some(query) = parsed.query() {
                out.push('?');
                out.push_str(&query.to_ascii_lowercase());
            }
            out
        }
        Err(_) => url.to_ascii_lowercase(),
    }
}

/// Byte offset of the rightmost recognized `.ext` inside `haystack`.
fn rightmost_extension(haystack: &str) -> Option<(usize, &'static str)> {
    MEDIA_EXTENSIONS
        .iter()
        .filter_map(|ext| haystack.rfind(&format!(".{ext}")).map(|pos| (pos, *ext)))
        .max_by_key(|(pos, _)| *pos)
}

/// True if the URL's path (or query) mentions a recognized media extension.
pub fn is_media_by_url(url: &str) -> bool {
    let haystack = path_and_query(url);
    MEDIA_EXTENSIONS
        .iter()
        .any(|ext| haystack.contains(&format!(".{ext}")))
}

/// True if the content type contains one of the media MIME substrings.
pub fn is_media_by_type(content_type: &str) -> bool {
    let content_type = content_type.to_ascii_lowercase();
    MEDIA_MIME_TYPES.iter().any(|mime| content_type.contains(mime))
}

/// True if the URL belongs to an ad network, analytics or tracking endpoint.
pub fn should_exclude(url: &str) -> bool {
    EXCLUDE_PATTERNS.is_match(url)
}

/// True if the response is unambiguously an image.
pub fn is_image_like(url: &str, content_type: &str) -> bool {
    let content_type = content_type.to_ascii_lowercase();
    if IMAGE_TYPE_MARKERS.iter().any(|m| content_type.contains(m)) {
        return true;
    }
    let url = url.to_ascii_lowercase();
    IMAGE_URL_MARKERS.iter().any(|m| url.contains(m))
}

/// Extension for a media response, with the leading dot.
///
/// URL path first, then content-type keywords, then `default`.
pub fn resolve_extension(url: &str, content_type: &str, default: &str) -> String {
    let path = match Url::parse(url) {
        Ok(parsed) => parsed.path().to_ascii_lowercase(),
        Err(_) => url.to_ascii_lowercase(),
    };
    if let Some((_, ext)) = rightmost_extension(&path) {
        return format!(".{ext}");
    }

    let content_type = content_type.to_ascii_lowercase();
    if content_type.contains("mp4") {
        ".mp4".to_string()
    } else if content_type.contains("webm") {
        ".webm".to_string()
    } else if content_type.contains("m3u8") || content_type.contains("mpegurl") {
        ".m3u8".to_string()
    } else {
        default.to_string()
    }
}

/// Full decision for one observed response.
pub fn classify(url: &str, content_type: &str, default_extension: &str) -> Verdict {
    if is_image_like(url, content_type) {
        return Verdict::Image;
    }
    if !is_media_by_url(url) && !is_media_by_type(content_type) {
        return Verdict::NotMedia;
    }
    if should_exclude(url) {
        return Verdict::Excluded;
    }
    Verdict::Media {
        extension: resolve_extension(url, content_type, default_extension),
    }
}

/// Whether a submitted page URL points straight at a media file.
pub fn is_direct_media_url(url: &str) -> bool {
    is_media_by_url(url)
}

/// Whether the URL belongs to one of the configured DRM-protected services.
pub fn is_drm_protected(url: &str, drm_domains: &[String]) -> bool {
    let url = url.to_ascii_lowercase();
    drm_domains
        .iter()
        .any(|domain| url.contains(&domain.to_ascii_lowercase()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_media_by_url() {
        assert!(is_media_by_url("https://cdn.example.com/v/abc.m3u8"));
        assert!(is_media_by_url("https://cdn.example.com/v/clip.MP4?token=1"));
        assert!(is_media_by_url("https://cdn.example.com/seg/001.ts"));
        assert!(is_media_by_url("https://cdn.example.com/play?file=movie.mkv"));
        assert!(!is_media_by_url("https://example.com/watch/12345"));
        // host names do not count
        assert!(!is_media_by_url("https://mp4.example.com/index.html"));
    }

    #[test]
    fn test_media_by_type() {
        assert!(is_media_by_type("video/mp4"));
        assert!(is_media_by_type("application/vnd.apple.mpegurl; charset=utf-8"));
        assert!(is_media_by_type("Application/Octet-Stream"));
        assert!(!is_media_by_type("text/html"));
        assert!(!is_media_by_type(""));
    }

    #[test]
    fn test_exclusion_patterns() {
        assert!(should_exclude("https://doubleclick.net/ad.mp4"));
        assert!(should_exclude("https://stats.example.com/Analytics/collect"));
        assert!(should_exclude("https://example.com/beacon.gif"));
        assert!(should_exclude("https://ads.example.com/creative.mp4"));
        assert!(should_exclude("https://example.com/advertisement/spot.webm"));
        assert!(!should_exclude("https://cdn.example.com/v/abc.m3u8"));
        assert!(!should_exclude("https://download.example.com/movie.mp4"));
        assert!(!should_exclude("https://upload.example.com/v/clip.webm"));
    }

    #[test]
    fn test_exclude_ad_suffixed_paths() {
        assert!(should_exclude("https://cdn.example.com/preroll_ad.mp4"));
        assert!(should_exclude("https://cdn.example.com/midroll-ad.mp4"));
        assert!(should_exclude("https://cdn.example.com/v/adv.webm"));
        assert!(!should_exclude("https://cdn.example.com/v/bad.mp4"));
        assert!(!should_exclude("https://cdn.example.com/v/episode_road.mp4"));
    }

    #[test]
    fn test_exclusion_beats_media_extension() {
        let verdict = classify("https://doubleclick.net/ad.mp4", "video/mp4", ".mp4");
        assert_eq!(verdict, Verdict::Excluded);
    }

    #[test]
    fn test_images_rejected_first() {
        assert_eq!(
            classify("https://img.example.com/thumb.jpg", "video/mp4", ".mp4"),
            Verdict::Image
        );
        assert_eq!(
            classify("https://cdn.example.com/v/poster.mp4", "image/jpeg", ".mp4"),
            Verdict::Image
        );
        assert_eq!(
            classify("https://cdn.example.com/favicon.ico", "application/octet-stream", ".mp4"),
            Verdict::Image
        );
    }

    #[test]
    fn test_not_media() {
        assert_eq!(
            classify("https://example.com/app.js", "application/javascript", ".mp4"),
            Verdict::NotMedia
        );
    }

    #[test]
    fn test_resolve_extension_from_path() {
        assert_eq!(resolve_extension("https://cdn.example.com/v/abc.m3u8", "", ".mp4"), ".m3u8");
        assert_eq!(resolve_extension("https://cdn.example.com/a.webm?x=1", "", ".mp4"), ".webm");
        assert_eq!(resolve_extension("https://cdn.example.com/a.mp4/seg.ts", "", ".mp4"), ".ts");
    }

    #[test]
    fn test_resolve_extension_from_type_and_default() {
        let url = "https://cdn.example.com/stream/42";
        assert_eq!(resolve_extension(url, "video/webm", ".mp4"), ".webm");
        assert_eq!(resolve_extension(url, "application/x-mpegURL", ".mp4"), ".m3u8");
        assert_eq!(resolve_extension(url, "video/mp4", ".webm"), ".mp4");
        assert_eq!(resolve_extension(url, "application/octet-stream", ".mkv"), ".mkv");
    }

    #[test]
    fn test_classify_hls_playlist() {
        let verdict = classify(
            "https://cdn.example.com/v/abc.m3u8",
            "application/vnd.apple.mpegurl",
            ".mp4",
        );
        assert_eq!(verdict, Verdict::Media { extension: ".m3u8".into() });
        assert!(verdict.is_media());
    }

    #[test]
    fn test_drm_domains() {
        let domains = vec!["netflix.com".to_string(), "apple.com/tv".to_string()];
        assert!(is_drm_protected("https://www.Netflix.com/watch/1", &domains));
        assert!(is_drm_protected("https://apple.com/tv/show", &domains));
        assert!(!is_drm_protected("https://apple.com/music", &domains));
    }
}
