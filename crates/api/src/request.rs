//! Transport-neutral request view and per-request context.

use chrono::{DateTime, Utc};
use http::Method;

use sentinel_auth::Subject;
use sentinel_core::SessionId;
use sentinel_infra::{CsrfToken, Session};

/// The parts of an incoming request the pipeline looks at.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GuardRequest {
    pub method: Method,
    /// Request path without the query string.
    pub path: String,
    /// Raw session id as presented by the client (cookie value).
    pub session_id: Option<String>,
    /// CSRF token from the header or form field.
    pub csrf_token: Option<String>,
    /// Whether the client is a browser (`Accept` includes `text/html`).
    pub accepts_html: bool,
}

impl GuardRequest {
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            session_id: None,
            csrf_token: None,
            accepts_html: false,
        }
    }

    pub fn with_session(mut self, id: impl Into<String>) -> Self {
        self.session_id = Some(id.into());
        self
    }

    pub fn with_csrf_token(mut self, token: impl Into<String>) -> Self {
        self.csrf_token = Some(token.into());
        self
    }

    pub fn from_browser(mut self) -> Self {
        self.accepts_html = true;
        self
    }
}

/// State accumulated while a request moves through the pipeline.
#[derive(Debug, Clone)]
pub struct RequestContext {
    pub request: GuardRequest,
    pub now: DateTime<Utc>,
    /// Filled by the session stage.
    pub session: Option<Session>,
    /// `true` when the session stage had to issue a new session.
    pub session_created: bool,
    pub subject: Subject,
    /// The session's CSRF token, exposed to handlers.
    pub csrf_token: Option<CsrfToken>,
    /// Names of the stages that ran, in order.
    pub trace: Vec<&'static str>,
}

impl RequestContext {
    pub fn new(request: GuardRequest, now: DateTime<Utc>) -> Self {
        Self {
            request,
            now,
            session: None,
            session_created: false,
            subject: Subject::default(),
            csrf_token: None,
            trace: Vec::new(),
        }
    }

    pub fn session_id(&self) -> Option<&SessionId> {
        self.session.as_ref().map(|s| &s.id)
    }
}

/// The single spelling of `raw` that policy checks and routing agree on.
///
/// Percent-escapes of unreserved characters are decoded (other escapes are
/// upper-cased), repeated `/` collapse, and `.`/`..` segments resolve
/// without climbing above the root. A trailing `/` is kept as written.
pub fn canonical_path(raw: &str) -> String {
    let decoded = decode_unreserved(raw);
    let trailing_slash = matches!(decoded.rsplit('/').next(), Some("" | "." | ".."));

    let mut segments: Vec<&str> = Vec::new();
    for segment in decoded.split('/') {
        match segment {
            "" | "." => {}
            ".." => {
                segments.pop();
            }
            s => segments.push(s),
        }
    }

    let mut path = String::with_capacity(decoded.len() + 1);
    for segment in &segments {
        path.push('/');
        path.push_str(segment);
    }
    if path.is_empty() || trailing_slash {
        path.push('/');
    }
    path
}

fn decode_unreserved(raw: &str) -> String {
    let bytes = raw.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' {
            if let (Some(hi), Some(lo)) = (hex_digit(bytes.get(i + 1)), hex_digit(bytes.get(i + 2))) {
                let byte = (hi << 4) | lo;
                if byte.is_ascii_alphanumeric() || matches!(byte, b'-' | b'.' | b'_' | b'~') {
                    out.push(byte);
                } else {
                    out.extend_from_slice(format!("%{byte:02X}").as_bytes());
                }
                i += 3;
                continue;
            }
        }
        out.push(bytes[i]);
        i += 1;
    }
    // Only ASCII sequences were rewritten, so the input's UTF-8 survives.
    String::from_utf8_lossy(&out).into_owned()
}

fn hex_digit(byte: Option<&u8>) -> Option<u8> {
    char::from(*byte?).to_digit(16).map(|d| d as u8)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn canonical_paths_are_unchanged() {
        for path in ["/", "/whoami", "/admin", "/admin/", "/admin/assets/del_all/", "/admin/users/edit/7"] {
            assert_eq!(canonical_path(path), path);
        }
    }

    #[test]
    fn repeated_slashes_collapse() {
        assert_eq!(canonical_path("/admin/assets//del_all/"), "/admin/assets/del_all/");
        assert_eq!(canonical_path("//admin///"), "/admin/");
        assert_eq!(canonical_path(""), "/");
    }

    #[test]
    fn dot_segments_resolve_within_root() {
        assert_eq!(canonical_path("/admin/assets/./del_all/"), "/admin/assets/del_all/");
        assert_eq!(canonical_path("/admin/reports/../assets/del_all/"), "/admin/assets/del_all/");
        assert_eq!(canonical_path("/../../admin/"), "/admin/");
        assert_eq!(canonical_path("/admin/assets/."), "/admin/assets/");
        assert_eq!(canonical_path("/admin/assets/.."), "/admin/");
    }

    #[test]
    fn unreserved_escapes_decode() {
        assert_eq!(canonical_path("/admin/assets/del%5Fall/"), "/admin/assets/del_all/");
        assert_eq!(canonical_path("/admin/assets/%2e%2E/users/"), "/admin/users/");
        assert_eq!(canonical_path("/a%2fb/%3f"), "/a%2Fb/%3F");
        assert_eq!(canonical_path("/bad%zz"), "/bad%zz");
    }
}
