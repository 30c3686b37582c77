//! Throttling hints carried by 429 and 5xx responses.
//!
//! The retryer prefers the server's own hint over computed backoff when
//! [`RetryPolicy::respect_retry_after`](crate::retry::RetryPolicy) is set.

use http::HeaderMap;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Headers carrying a Unix timestamp at which the limit window resets.
const RESET_HEADERS: [&str; 2] = ["x-ratelimit-reset", "ratelimit-reset"];

/// Throttling information parsed from response headers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RateLimitInfo {
    /// Wait requested by `Retry-After` (delay-seconds or HTTP-date).
    pub retry_after: Option<Duration>,
    /// When the limit window resets.
    pub reset_at: Option<SystemTime>,
    /// Requests left in the current window (`X-RateLimit-Remaining`).
    pub remaining: Option<u64>,
}

impl RateLimitInfo {
    /// Extracts throttling information from response headers.
    ///
    /// ```
    /// use cloudcall::rate_limit::RateLimitInfo;
    /// use http::HeaderMap;
    ///
    /// let mut headers = HeaderMap::new();
    /// headers.insert("retry-after", "12".parse().unwrap());
    ///
    /// let info = RateLimitInfo::from_headers(&headers);
    /// assert!(info.is_rate_limited());
    /// ```
    pub fn from_headers(headers: &HeaderMap) -> Self {
        Self {
            retry_after: header_str(headers, "retry-after").and_then(parse_retry_after),
            reset_at: RESET_HEADERS
                .iter()
                .find_map(|name| {
                    let secs = header_str(headers, name)?.parse::<u64>().ok()?;
                    UNIX_EPOCH.checked_add(Duration::from_secs(secs))
                }),
            remaining: header_str(headers, "x-ratelimit-remaining")
                .and_then(|v| v.parse().ok()),
        }
    }

    /// Returns `true` when the headers describe an active limit.
    pub fn is_rate_limited(&self) -> bool {
        self.retry_after.is_some() || self.remaining == Some(0)
    }

    /// How long the server asked us to wait, capped at `max_wait`.
    ///
    /// `Retry-After` wins over the reset timestamp. A reset time in the past
    /// yields `None`.
    pub fn delay(&self, max_wait: Duration) -> Option<Duration> {
        let wait = match (self.retry_after, self.reset_at) {
            (Some(wait), _) => wait,
            (None, Some(reset_at)) => reset_at.duration_since(SystemTime::now()).ok()?,
            (None, None) => return None,
        };
        Some(wait.min(max_wait))
    }
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name)?.to_str().ok()
}

fn parse_retry_after(value: &str) -> Option<Duration> {
    if let Ok(secs) = value.trim().parse::<u64>() {
        return Some(Duration::from_secs(secs));
    }
    let at = httpdate::parse_http_date(value).ok()?;
    // A date in the past means "retry now".
    Some(at.duration_since(SystemTime::now()).unwrap_or(Duration::ZERO))
}
