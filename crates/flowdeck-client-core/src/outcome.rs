//! Classification of backend HTTP outcomes.
//!
//! The fetch adapter never throws on classified failures: it fires the
//! host's event sink and still hands the response to the widget so its
//! own error UI can render. Classification itself is pure so the adapter
//! and tests share one source of truth.

use std::time::Duration;

/// Classified outcome of one backend call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchClassification {
    /// 401/403-class response. The host's sole authoritative signal to
    /// prompt re-authentication.
    AuthRejected { status: u16 },
    /// 429-class response, with the `retry-after` hint when present.
    RateLimited { retry_after: Option<Duration> },
    /// Everything else, success included, passes through unclassified.
    Passthrough,
}

impl FetchClassification {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::AuthRejected { .. } => "auth_rejected",
            Self::RateLimited { .. } => "rate_limited",
            Self::Passthrough => "passthrough",
        }
    }
}

/// Classify a status code plus the raw `retry-after` header value.
#[must_use]
pub fn classify_status(status: u16, retry_after: Option<&str>) -> FetchClassification {
    match status {
        401 | 403 => FetchClassification::AuthRejected { status },
        429 => FetchClassification::RateLimited {
            retry_after: retry_after.and_then(parse_retry_after),
        },
        _ => FetchClassification::Passthrough,
    }
}

/// Parse a `retry-after` value carrying delta-seconds.
///
/// HTTP-date values yield `None`; the rate-limit signal still fires, just
/// without a hint.
#[must_use]
pub fn parse_retry_after(raw: &str) -> Option<Duration> {
    raw.trim().parse::<u64>().ok().map(Duration::from_secs)
}
