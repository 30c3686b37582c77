//! Error types for API calls.
//!
//! Every failure a call can produce is a variant of [`Error`]. Variants are
//! grouped into coarse classifications by [`Error::kind`], which is what the
//! retry logic and most callers care about. Failures reported by the remote
//! service carry the decoded [`ApiError`] envelope.
//!
//! `Error` is `Clone` so that a memoized outcome of an idempotent call can be
//! handed to every caller waiting on it.

use crate::rate_limit::RateLimitInfo;
use http::{HeaderMap, StatusCode};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// A failure reported by the remote service.
///
/// Decoded from the JSON error envelope `{"code": int, "message": string,
/// "details": string?}`. When a non-2xx response does not carry that shape,
/// a generic error is synthesized from the status code and raw body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiError {
    /// Service-specific error code.
    pub code: i64,
    /// Human readable message.
    pub message: String,
    /// Optional extra details.
    pub details: Option<String>,
    /// HTTP status of the response that carried the error.
    pub status: StatusCode,
}

/// Wire shape of the error envelope.
#[derive(Debug, Serialize, Deserialize)]
struct ErrorEnvelope {
    code: i64,
    message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    details: Option<String>,
}

impl ApiError {
    /// Parses the error envelope from a response body.
    ///
    /// Returns `None` when the body is not an envelope.
    pub fn from_envelope(status: StatusCode, body: &[u8]) -> Option<Self> {
        let envelope: ErrorEnvelope = serde_json::from_slice(body).ok()?;
        Some(Self {
            code: envelope.code,
            message: envelope.message,
            details: envelope.details.filter(|d| !d.is_empty()),
            status,
        })
    }

    /// Builds the fallback error used when a body is not an envelope.
    pub fn generic(status: StatusCode, raw_body: &str) -> Self {
        Self {
            code: i64::from(status.as_u16()),
            message: format!("status {}: {}", status.as_u16(), raw_body),
            details: None,
            status,
        }
    }

    /// Serializes this error back into the envelope format.
    pub fn to_envelope_json(&self) -> String {
        let envelope = ErrorEnvelope {
            code: self.code,
            message: self.message.clone(),
            details: self.details.clone(),
        };
        // A struct of an integer and strings always serializes.
        serde_json::to_string(&envelope).unwrap_or_default()
    }
}

impl fmt::Display for ApiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (code {})", self.message, self.code)?;
        if let Some(details) = &self.details {
            write!(f, ": {}", details)?;
        }
        Ok(())
    }
}

/// One provider's reason for not supplying credentials.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderFailure {
    /// The provider's name.
    pub provider: String,
    /// Why it failed.
    pub reason: String,
}

/// Coarse classification of an [`Error`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Connection failure or transport timeout.
    Transport,
    /// The service or token endpoint rejected our credentials.
    Authentication,
    /// The service rejected the request (4xx other than 401).
    Validation,
    /// The service failed (5xx) or throttled us (429).
    Server,
    /// A request could not be encoded or a response could not be decoded.
    Serialization,
    /// The caller cancelled the call or its deadline passed.
    Cancellation,
    /// No credential provider could supply credentials.
    Credentials,
    /// The engine was configured incorrectly.
    Configuration,
}

/// The main error type for API calls.
///
/// # Examples
///
/// ```
/// use cloudcall::{ApiError, Error, ErrorKind};
/// use http::StatusCode;
///
/// let err = Error::from_status(
///     ApiError::generic(StatusCode::BAD_GATEWAY, "upstream"),
///     &http::HeaderMap::new(),
///     false,
/// );
/// assert_eq!(err.kind(), ErrorKind::Server);
/// assert!(err.is_retryable());
/// ```
#[derive(thiserror::Error, Debug, Clone)]
pub enum Error {
    /// The request never produced a response.
    #[error("Transport error: {message}")]
    Transport {
        /// Description of the underlying failure.
        message: String,
        /// Whether the transport gave up because of its own timeout.
        timeout: bool,
    },

    /// The service answered 401.
    ///
    /// `after_refresh` is `true` when the rejected token had already been
    /// refreshed once during this call; such errors are final.
    #[error("Authentication failed: {api}")]
    Authentication {
        /// The error reported by the service.
        api: ApiError,
        /// Whether the token was already refreshed during this call.
        after_refresh: bool,
    },

    /// The service rejected the request with a 4xx other than 401.
    #[error("Request rejected: {api}")]
    Validation {
        /// The error reported by the service.
        api: ApiError,
    },

    /// The service failed with a 5xx or throttled us with 429.
    #[error("Server error: {api}")]
    Server {
        /// The error reported by the service.
        api: ApiError,
        /// Rate limit information parsed from the response headers.
        rate_limit: Option<RateLimitInfo>,
    },

    /// The request parameters could not be turned into a request.
    #[error("Failed to serialize request: {0}")]
    Serialization(String),

    /// A successful response body could not be decoded.
    #[error("Failed to decode response (status {status}): {message}")]
    Deserialization {
        /// The HTTP status of the response.
        status: StatusCode,
        /// The decoder's error message.
        message: String,
        /// The raw response body.
        raw_response: String,
    },

    /// The caller cancelled the call.
    #[error("Call cancelled")]
    Cancelled,

    /// The call's deadline passed.
    #[error("Call deadline exceeded")]
    DeadlineExceeded,

    /// A single credential provider could not supply credentials.
    #[error("Credential provider {provider} failed: {reason}")]
    CredentialsUnavailable {
        /// The provider's name.
        provider: String,
        /// Why it failed.
        reason: String,
    },

    /// Every provider of a credential chain failed.
    #[error("No credentials resolved; tried: {}", format_failures(.attempts))]
    NoCredentials {
        /// One entry per provider, in chain order.
        attempts: Vec<ProviderFailure>,
    },

    /// The token endpoint refused to issue a token.
    #[error("Token exchange failed: {message}")]
    TokenExchange {
        /// HTTP status from the token endpoint, if one was received.
        status: Option<StatusCode>,
        /// Description of the failure.
        message: String,
    },

    /// Invalid configuration was provided.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// An invalid URL was provided.
    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),
}

fn format_failures(attempts: &[ProviderFailure]) -> String {
    if attempts.is_empty() {
        return "no providers configured".to_string();
    }
    attempts
        .iter()
        .map(|f| format!("{} ({})", f.provider, f.reason))
        .collect::<Vec<_>>()
        .join(", ")
}

impl From<reqwest::Error> for Error {
    fn from(e: reqwest::Error) -> Self {
        Error::Transport {
            message: e.to_string(),
            timeout: e.is_timeout(),
        }
    }
}

impl Error {
    /// Classifies a non-2xx response.
    ///
    /// 401 becomes [`Error::Authentication`], 429 and 5xx become
    /// [`Error::Server`], everything else becomes [`Error::Validation`].
    pub fn from_status(api: ApiError, headers: &HeaderMap, after_refresh: bool) -> Self {
        let status = api.status;
        if status == StatusCode::UNAUTHORIZED {
            Error::Authentication { api, after_refresh }
        } else if status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS {
            let info = RateLimitInfo::from_headers(headers);
            Error::Server {
                api,
                rate_limit: info.is_rate_limited().then_some(info),
            }
        } else {
            Error::Validation { api }
        }
    }

    /// Returns the classification of this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Transport { .. } => ErrorKind::Transport,
            Error::Authentication { .. } | Error::TokenExchange { .. } => {
                ErrorKind::Authentication
            }
            Error::Validation { .. } => ErrorKind::Validation,
            Error::Server { .. } => ErrorKind::Server,
            Error::Serialization(_) | Error::Deserialization { .. } => ErrorKind::Serialization,
            Error::Cancelled | Error::DeadlineExceeded => ErrorKind::Cancellation,
            Error::CredentialsUnavailable { .. } | Error::NoCredentials { .. } => {
                ErrorKind::Credentials
            }
            Error::Configuration(_) | Error::InvalidUrl(_) => ErrorKind::Configuration,
        }
    }

    /// Returns `true` if another attempt may succeed.
    ///
    /// Transport errors, 5xx and 429 are retryable. A 401 is retryable only
    /// until the token has been refreshed once during the call.
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::Transport { .. } | Error::Server { .. } => true,
            Error::Authentication { after_refresh, .. } => !after_refresh,
            _ => false,
        }
    }

    /// Returns the HTTP status code if this error has one.
    pub fn status(&self) -> Option<StatusCode> {
        match self {
            Error::Authentication { api, .. }
            | Error::Validation { api }
            | Error::Server { api, .. } => Some(api.status),
            Error::Deserialization { status, .. } => Some(*status),
            Error::TokenExchange { status, .. } => *status,
            _ => None,
        }
    }

    /// Returns the remote service's error, if this error came from one.
    pub fn api_error(&self) -> Option<&ApiError> {
        match self {
            Error::Authentication { api, .. }
            | Error::Validation { api }
            | Error::Server { api, .. } => Some(api),
            _ => None,
        }
    }

    pub(crate) fn api_error_mut(&mut self) -> Option<&mut ApiError> {
        match self {
            Error::Authentication { api, .. }
            | Error::Validation { api }
            | Error::Server { api, .. } => Some(api),
            _ => None,
        }
    }

    /// Returns the raw body of an undecodable success response.
    pub fn raw_response(&self) -> Option<&str> {
        match self {
            Error::Deserialization { raw_response, .. } => Some(raw_response),
            _ => None,
        }
    }

    /// Returns rate limit information if available.
    pub fn rate_limit_info(&self) -> Option<&RateLimitInfo> {
        match self {
            Error::Server { rate_limit, .. } => rate_limit.as_ref(),
            _ => None,
        }
    }

    /// Returns the delay requested by the server, capped at `max_wait`.
    pub fn rate_limit_delay(&self, max_wait: Duration) -> Option<Duration> {
        self.rate_limit_info()?.delay(max_wait)
    }
}

/// A specialized `Result` type for API calls.
pub type Result<T> = std::result::Result<T, Error>;
