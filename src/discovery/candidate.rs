use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use url::Url;

/// Cookie captured from the browser's jar at the end of a session
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BrowserCookie {
    pub name: String,
    pub value: String,
    #[serde(default)]
    pub domain: String,
    #[serde(default)]
    pub path: String,
}

impl BrowserCookie {
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
            domain: String::new(),
            path: "/".to_string(),
        }
    }
}

/// Cookies and headers needed to re-fetch a candidate as the session that found it
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthContext {
    pub cookies: Vec<BrowserCookie>,
    pub headers: BTreeMap<String, String>,
}

impl AuthContext {
    /// Builds the header set a browser would send when following a media link
    /// from `page_url`: User-Agent, Referer and Origin.
    pub fn synthesize(page_url: &str, user_agent: &str, cookies: Vec<BrowserCookie>) -> Self {
        let mut headers = BTreeMap::new();
        headers.insert("User-Agent".to_string(), user_agent.to_string());
        headers.insert("Referer".to_string(), page_url.to_string());

        if let Ok(parsed) = Url::parse(page_url) {
            let origin = parsed.origin();
            if origin.is_tuple() {
                headers.insert("Origin".to_string(), origin.ascii_serialization());
            }
        }

        Self { cookies, headers }
    }

    /// `Cookie` header value; later cookies with the same name replace earlier ones.
    pub fn cookie_header(&self) -> Option<String> {
        if self.cookies.is_empty() {
            return None;
        }

        let mut jar: Vec<(&str, &str)> = Vec::with_capacity(self.cookies.len());
        for cookie in &self.cookies {
            match jar.iter_mut().find(|(name, _)| *name == cookie.name) {
                Some(slot) => slot.1 = cookie.value.as_str(),
                None => jar.push((cookie.name.as_str(), cookie.value.as_str())),
            }
        }

        Some(
            jar.iter()
                .map(|(name, value)| format!("{name}={value}"))
                .collect::<Vec<_>>()
                .join("; "),
        )
    }
}

/// One discovered media resource
#[derive(Debug, Clone, PartialEq)]
pub struct Candidate {
    pub url: String,
    /// Reported content type, possibly empty
    pub media_type: String,
    /// Recognized extension with the leading dot
    pub extension: String,
    /// From Content-Length; `None` when unknown
    pub size_bytes: Option<u64>,
    /// Shared by every candidate of the session, attached once it ends
    pub auth: Option<Arc<AuthContext>>,
}

impl Candidate {
    pub fn new(url: impl Into<String>, media_type: impl Into<String>, extension: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            media_type: media_type.into(),
            extension: extension.into(),
            size_bytes: None,
            auth: None,
        }
    }

    pub fn with_size(mut self, size_bytes: Option<u64>) -> Self {
        // zero means unknown
        self.size_bytes = size_bytes.filter(|n| *n > 0);
        self
    }

    /// Size used for ranking, unknown counts as zero
    pub fn rank_size(&self) -> u64 {
        self.size_bytes.unwrap_or(0)
    }

    pub fn is_hls(&self) -> bool {
        self.extension == ".m3u8"
    }
}
