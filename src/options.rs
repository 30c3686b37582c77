//! Per-call options.

use http::{HeaderMap, HeaderName, HeaderValue};
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Options for an individual call.
///
/// Headers set here are applied last and override every default. The
/// cancellation token and timeout bound the whole logical call, including
/// token acquisition and retry sleeps.
#[derive(Debug, Clone, Default)]
pub struct CallOptions {
    /// Extra headers, applied after all defaults.
    pub headers: HeaderMap,

    /// Extra query parameters, appended after tagged fields.
    pub query_params: Vec<(String, String)>,

    /// Deadline for the whole call, measured from its start.
    pub timeout: Option<Duration>,

    /// Cancels the call when triggered.
    pub cancel: Option<CancellationToken>,

    /// Overrides the key derived from the operation and parameters.
    pub idempotency_key: Option<String>,
}

impl CallOptions {
    /// Creates empty options.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a header.
    ///
    /// # Errors
    ///
    /// Returns an error if the header name or value is invalid.
    pub fn with_header(
        mut self,
        name: impl AsRef<str>,
        value: impl AsRef<str>,
    ) -> Result<Self, crate::Error> {
        let name = HeaderName::try_from(name.as_ref())
            .map_err(|e| crate::Error::Configuration(format!("Invalid header name: {}", e)))?;
        let value = HeaderValue::try_from(value.as_ref())
            .map_err(|e| crate::Error::Configuration(format!("Invalid header value: {}", e)))?;
        self.headers.insert(name, value);
        Ok(self)
    }

    /// Adds a query parameter.
    pub fn with_query_param(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.query_params.push((key.into(), value.into()));
        self
    }

    /// Sets the call deadline.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// The deadline for a call started at `started`.
    ///
    /// A timeout too large to represent means no deadline.
    pub fn deadline_from(&self, started: Instant) -> Option<Instant> {
        self.timeout.and_then(|t| started.checked_add(t))
    }

    /// Ties the call to a cancellation token.
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = Some(cancel);
        self
    }

    /// Uses `key` for result caching instead of the derived one.
    pub fn with_idempotency_key(mut self, key: impl Into<String>) -> Self {
        self.idempotency_key = Some(key.into());
        self
    }
}
