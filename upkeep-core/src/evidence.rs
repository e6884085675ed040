use chrono::{DateTime, Utc};
use serde::Deserialize;

/// One observed signal used to infer whether an action actually
/// happened. Evidence lives only for the duration of a run; it is never
/// persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EvidenceRecord {
    pub kind: EvidenceKind,
    pub captured_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EvidenceKind {
    /// A structured response captured from the target's own
    /// action-confirmation network call. Ground truth when present.
    Api(ApiEvidence),
    /// A DOM text snippet (popup body, toast, page text).
    Dom(String),
    /// A browser-level error page classification.
    PageError(PageErrorKind),
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ApiEvidence {
    pub status: u16,
    pub ok: bool,
    #[serde(default)]
    pub message: String,
}

impl EvidenceRecord {
    pub fn api(status: u16, ok: bool, message: impl Into<String>) -> Self {
        Self {
            kind: EvidenceKind::Api(ApiEvidence {
                status,
                ok,
                message: message.into(),
            }),
            captured_at: Utc::now(),
        }
    }

    pub fn dom(text: impl Into<String>) -> Self {
        Self {
            kind: EvidenceKind::Dom(text.into()),
            captured_at: Utc::now(),
        }
    }

    pub fn page_error(kind: PageErrorKind) -> Self {
        Self {
            kind: EvidenceKind::PageError(kind),
            captured_at: Utc::now(),
        }
    }

    /// Short human-readable form for the run report.
    pub fn snippet(&self) -> String {
        match &self.kind {
            EvidenceKind::Api(api) => {
                if api.message.is_empty() {
                    format!("api status {}", api.status)
                } else {
                    format!("api status {}: {}", api.status, truncate(&api.message, 120))
                }
            }
            EvidenceKind::Dom(text) => truncate(text.trim(), 120),
            EvidenceKind::PageError(kind) => format!("browser error: {kind:?}"),
        }
    }
}

fn truncate(text: &str, limit: usize) -> String {
    if text.chars().count() <= limit {
        text.to_string()
    } else {
        let cut: String = text.chars().take(limit).collect();
        format!("{cut}…")
    }
}

/// Browser-level navigation failures, distinguished because they imply
/// different remediation: rotate credential, rotate egress, or retry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageErrorKind {
    TooManyRedirects,
    Connection,
    Timeout,
    Ssl,
    Dns,
    NotWorking,
    Other,
}

impl PageErrorKind {
    /// Operator hint surfaced in the fatal-path notification.
    pub fn remediation(&self) -> &'static str {
        match self {
            PageErrorKind::TooManyRedirects => {
                "redirect loop: the session credential has expired, rotate it"
            }
            PageErrorKind::Connection => "connection failed: check proxy or credential",
            PageErrorKind::Timeout => "navigation timed out: safe to retry on the next run",
            PageErrorKind::Ssl => "tls failure: check proxy egress",
            PageErrorKind::Dns => "dns failure: check network egress",
            PageErrorKind::NotWorking => "page not working: the credential may have expired",
            PageErrorKind::Other => "unrecognized browser error page",
        }
    }
}

/// Maps a browser error page's text to the sub-taxonomy. `None` means
/// the page is ordinary site content, not a browser error page.
pub fn classify_page_error(is_error_page: bool, body: &str) -> Option<PageErrorKind> {
    if !is_error_page {
        return None;
    }
    let text = body.to_lowercase();
    let kind = if text.contains("err_too_many_redirects") || text.contains("redirected you too many times")
    {
        PageErrorKind::TooManyRedirects
    } else if text.contains("err_connection") {
        PageErrorKind::Connection
    } else if text.contains("err_timed_out") || text.contains("timed out") {
        PageErrorKind::Timeout
    } else if text.contains("err_ssl") || text.contains("err_cert") {
        PageErrorKind::Ssl
    } else if text.contains("err_name_not_resolved") {
        PageErrorKind::Dns
    } else if text.contains("can't be reached") || text.contains("isn't working") {
        PageErrorKind::NotWorking
    } else {
        PageErrorKind::Other
    };
    Some(kind)
}

/// Scans page text for rate-limit / geofence / VPN-restriction markers.
/// Returns the matched marker for the report.
pub fn find_blocked_marker(body: &str, markers: &[String]) -> Option<String> {
    let text = body.to_lowercase();
    markers
        .iter()
        .find(|marker| text.contains(&marker.to_lowercase()))
        .cloned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ordinary_content_is_not_an_error_page() {
        assert_eq!(classify_page_error(false, "err_connection_reset"), None);
    }

    #[test]
    fn error_page_sub_taxonomy() {
        assert_eq!(
            classify_page_error(true, "ERR_TOO_MANY_REDIRECTS"),
            Some(PageErrorKind::TooManyRedirects)
        );
        assert_eq!(
            classify_page_error(true, "This site can't be reached"),
            Some(PageErrorKind::NotWorking)
        );
        assert_eq!(
            classify_page_error(true, "something else entirely"),
            Some(PageErrorKind::Other)
        );
    }

    #[test]
    fn blocked_marker_is_case_insensitive() {
        let markers = vec!["rate limit".to_string(), "disable your vpn".to_string()];
        assert_eq!(
            find_blocked_marker("Please DISABLE YOUR VPN to continue", &markers),
            Some("disable your vpn".to_string())
        );
        assert_eq!(find_blocked_marker("welcome back", &markers), None);
    }

    #[test]
    fn snippet_truncates_long_dom_text() {
        let record = EvidenceRecord::dom("x".repeat(400));
        assert!(record.snippet().chars().count() <= 121);
    }
}
