//! Bearer token lifecycle.
//!
//! [`TokenManager`] exchanges client credentials for short-lived access
//! tokens at a token endpoint and caches the result. Refreshes are
//! single-flight: however many callers find the cache stale at once, one of
//! them performs the exchange and the rest receive its outcome.

use crate::credentials::CredentialChain;
use crate::error::ApiError;
use crate::transport::{HttpRequest, ReqwestTransport, Transport};
use crate::{Error, Result};
use http::header::{ACCEPT, CONTENT_TYPE};
use http::{HeaderValue, Method, StatusCode};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, RwLock};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use url::Url;

/// Default remaining lifetime below which a cached token is refreshed.
pub const DEFAULT_EXPIRY_MARGIN: Duration = Duration::from_secs(30);

/// Longest lifetime accepted from a token endpoint.
pub const MAX_TOKEN_LIFETIME: Duration = Duration::from_secs(365 * 24 * 60 * 60);

/// A bearer credential with a known expiry.
#[derive(Clone, PartialEq, Eq)]
pub struct Token {
    access_token: String,
    token_type: String,
    lifetime: Duration,
    expires_at: Instant,
}

impl fmt::Debug for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Token")
            .field("token_type", &self.token_type)
            .field("expires_in", &self.remaining())
            .finish_non_exhaustive()
    }
}

impl Token {
    /// Creates a token that expires `expires_in` from now.
    ///
    /// Lifetimes beyond [`MAX_TOKEN_LIFETIME`] are clamped to it.
    pub fn new(
        access_token: impl Into<String>,
        token_type: impl Into<String>,
        expires_in: Duration,
    ) -> Self {
        let lifetime = expires_in.min(MAX_TOKEN_LIFETIME);
        let now = Instant::now();
        Self {
            access_token: access_token.into(),
            token_type: token_type.into(),
            lifetime,
            expires_at: now.checked_add(lifetime).unwrap_or(now),
        }
    }

    /// The raw access token.
    pub fn access_token(&self) -> &str {
        &self.access_token
    }

    /// The token type, usually `Bearer`.
    pub fn token_type(&self) -> &str {
        &self.token_type
    }

    /// When the token expires.
    pub fn expires_at(&self) -> Instant {
        self.expires_at
    }

    /// Lifetime left; zero once expired.
    pub fn remaining(&self) -> Duration {
        self.expires_at.saturating_duration_since(Instant::now())
    }

    /// Returns `true` if the token has passed its expiry.
    pub fn is_expired(&self) -> bool {
        self.remaining().is_zero()
    }

    /// Returns `true` if more than `margin` of lifetime is left.
    pub fn is_valid_for(&self, margin: Duration) -> bool {
        self.remaining() > margin
    }

    /// The lifetime the token was issued with.
    pub fn lifetime(&self) -> Duration {
        self.lifetime
    }

    /// The refresh margin for this token: `margin`, but never more than half
    /// of its lifetime.
    pub fn refresh_margin(&self, margin: Duration) -> Duration {
        margin.min(self.lifetime / 2)
    }

    /// The `Authorization` header value.
    pub fn authorization(&self) -> String {
        format!("{} {}", self.token_type, self.access_token)
    }
}

#[derive(Serialize)]
struct TokenRequest<'a> {
    client_id: &'a str,
    client_secret: &'a str,
    grant_type: &'a str,
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
    expires_in: u64,
    #[serde(default)]
    token_type: Option<String>,
}

#[derive(Default)]
struct TokenState {
    token: Option<Token>,
    /// Incremented by every completed refresh, successful or not.
    generation: u64,
    last_failure: Option<Error>,
}

/// Exchanges credentials for tokens and caches them.
///
/// # Examples
///
/// ```no_run
/// use cloudcall::credentials::{CredentialChain, StaticProvider};
/// use cloudcall::TokenManager;
/// use std::sync::Arc;
/// use tokio_util::sync::CancellationToken;
///
/// # async fn example() -> Result<(), cloudcall::Error> {
/// let chain = CredentialChain::new(vec![Arc::new(StaticProvider::new("id", "secret"))]);
/// let tokens = TokenManager::builder()
///     .endpoint("https://auth.example.com/oauth/token")?
///     .credentials(Arc::new(chain))
///     .build()?;
///
/// let token = tokens.token(&CancellationToken::new()).await?;
/// println!("token valid for {:?}", token.remaining());
/// # Ok(())
/// # }
/// ```
pub struct TokenManager {
    chain: Arc<CredentialChain>,
    transport: Arc<dyn Transport>,
    endpoint: Url,
    margin: Duration,
    state: RwLock<TokenState>,
    refresh: Mutex<()>,
}

impl fmt::Debug for TokenManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenManager")
            .field("endpoint", &self.endpoint.as_str())
            .field("margin", &self.margin)
            .finish_non_exhaustive()
    }
}

impl TokenManager {
    /// Creates a builder.
    pub fn builder() -> TokenManagerBuilder {
        TokenManagerBuilder::default()
    }

    /// The credential chain tokens are exchanged from.
    pub fn credentials(&self) -> &Arc<CredentialChain> {
        &self.chain
    }

    /// Returns a token with more than the safety margin of lifetime left.
    ///
    /// Serves the cache without I/O when possible. Otherwise waits for the
    /// refresh lock and re-checks: if another caller refreshed meanwhile,
    /// its token (or its error) is returned instead of exchanging again.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Cancelled`] if `cancel` fires while waiting, or the
    /// error of the credential resolution or exchange.
    pub async fn token(&self, cancel: &CancellationToken) -> Result<Token> {
        let seen = {
            let state = self.state.read().await;
            if let Some(token) = self.usable(&state) {
                return Ok(token);
            }
            state.generation
        };

        let _refresh = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(Error::Cancelled),
            guard = self.refresh.lock() => guard,
        };

        {
            let state = self.state.read().await;
            if let Some(token) = self.usable(&state) {
                return Ok(token);
            }
            if state.generation != seen {
                if let Some(err) = &state.last_failure {
                    return Err(err.clone());
                }
                // A refresh finished while we waited; share it while it lasts.
                if let Some(token) = state.token.as_ref().filter(|t| !t.is_expired()) {
                    return Ok(token.clone());
                }
            }
        }

        let outcome = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(Error::Cancelled),
            outcome = self.exchange() => outcome,
        };

        let mut state = self.state.write().await;
        state.generation += 1;
        match outcome {
            Ok(token) => {
                state.token = Some(token.clone());
                state.last_failure = None;
                Ok(token)
            }
            Err(e) => {
                tracing::warn!(error = %e, "Token refresh failed");
                state.last_failure = Some(e.clone());
                Err(e)
            }
        }
    }

    fn usable(&self, state: &TokenState) -> Option<Token> {
        state
            .token
            .as_ref()
            .filter(|t| t.is_valid_for(t.refresh_margin(self.margin)))
            .cloned()
    }

    /// Drops the cached token.
    pub async fn invalidate(&self) {
        self.state.write().await.token = None;
    }

    /// Drops the cached token only if it is still `rejected`.
    ///
    /// Several calls rejected with the same token each invalidate it, but
    /// once one of them has refreshed, the fresh token is kept.
    pub async fn invalidate_token(&self, rejected: &Token) {
        let mut state = self.state.write().await;
        if state
            .token
            .as_ref()
            .is_some_and(|t| t.access_token == rejected.access_token)
        {
            tracing::debug!("Invalidated rejected access token");
            state.token = None;
        }
    }

    async fn exchange(&self) -> Result<Token> {
        let creds = self.chain.resolve().await?;

        let body = serde_json::to_vec(&TokenRequest {
            client_id: &creds.client_id,
            client_secret: &creds.client_secret,
            grant_type: "client_credentials",
        })
        .map_err(|e| Error::Serialization(e.to_string()))?;

        let mut request = HttpRequest::new(Method::POST, self.endpoint.clone());
        request
            .headers
            .insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        request
            .headers
            .insert(ACCEPT, HeaderValue::from_static("application/json"));
        request.body = Some(body);

        tracing::debug!(
            endpoint = %self.endpoint,
            provider = %creds.provider,
            "Exchanging credentials for access token"
        );
        let response = self.transport.send(request).await?;
        let status = response.status;

        if !status.is_success() {
            let api = ApiError::from_envelope(status, &response.body)
                .unwrap_or_else(|| ApiError::generic(status, response.text().trim()));
            if matches!(
                status,
                StatusCode::BAD_REQUEST | StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN
            ) {
                // The credentials themselves were refused.
                self.chain.invalidate().await;
                return Err(Error::TokenExchange {
                    status: Some(status),
                    message: api.message,
                });
            }
            return Err(Error::from_status(api, &response.headers, false));
        }

        let parsed: TokenResponse =
            serde_json::from_slice(&response.body).map_err(|e| Error::TokenExchange {
                status: Some(status),
                message: format!("invalid token response: {}", e),
            })?;
        if parsed.access_token.is_empty() || parsed.expires_in == 0 {
            return Err(Error::TokenExchange {
                status: Some(status),
                message: "token endpoint returned an empty or expired token".to_string(),
            });
        }

        tracing::info!(
            provider = %creds.provider,
            expires_in_secs = parsed.expires_in,
            "Obtained access token"
        );
        Ok(Token::new(
            parsed.access_token,
            parsed.token_type.unwrap_or_else(|| "Bearer".to_string()),
            Duration::from_secs(parsed.expires_in),
        ))
    }
}

/// Builder for [`TokenManager`].
#[derive(Default)]
pub struct TokenManagerBuilder {
    endpoint: Option<Url>,
    chain: Option<Arc<CredentialChain>>,
    transport: Option<Arc<dyn Transport>>,
    margin: Option<Duration>,
}

impl TokenManagerBuilder {
    /// Sets the token endpoint.
    ///
    /// # Errors
    ///
    /// Returns an error if the URL is invalid.
    pub fn endpoint(mut self, url: impl AsRef<str>) -> Result<Self> {
        self.endpoint = Some(Url::parse(url.as_ref())?);
        Ok(self)
    }

    /// Sets the credential chain. Defaults to [`CredentialChain::default_chain`].
    pub fn credentials(mut self, chain: Arc<CredentialChain>) -> Self {
        self.chain = Some(chain);
        self
    }

    /// Sets the transport used for the exchange. Defaults to [`ReqwestTransport`].
    pub fn transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transport = Some(transport);
        self
    }

    /// Sets the remaining lifetime below which tokens are refreshed.
    pub fn expiry_margin(mut self, margin: Duration) -> Self {
        self.margin = Some(margin);
        self
    }

    /// Builds the manager.
    ///
    /// # Errors
    ///
    /// Returns an error if no endpoint was set or the default transport
    /// cannot be built.
    pub fn build(self) -> Result<TokenManager> {
        let endpoint = self
            .endpoint
            .ok_or_else(|| Error::Configuration("Token endpoint is required".to_string()))?;
        let transport = match self.transport {
            Some(transport) => transport,
            None => Arc::new(ReqwestTransport::new(None)?),
        };

        Ok(TokenManager {
            chain: self
                .chain
                .unwrap_or_else(|| Arc::new(CredentialChain::default_chain())),
            transport,
            endpoint,
            margin: self.margin.unwrap_or(DEFAULT_EXPIRY_MARGIN),
            state: RwLock::new(TokenState::default()),
            refresh: Mutex::new(()),
        })
    }
}
