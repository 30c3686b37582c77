//! The request pipeline.
//!
//! The [`Pipeline`] type is the main entry point for executing operations.
//! Use [`PipelineBuilder`] to configure and create pipelines.

use crate::cache::{ResultCache, ResultCacheConfig};
use crate::codec::Codec;
use crate::context::CallContext;
use crate::core_handlers;
use crate::credentials::CredentialChain;
use crate::handler::Handlers;
use crate::operation::Operation;
use crate::options::CallOptions;
use crate::retry::{RetryPolicy, RetryPredicate, Retryer};
use crate::token::TokenManager;
use crate::transport::{ReqwestTransport, Transport};
use crate::{Error, ErrorKind, Response, Result};
use http::{HeaderMap, HeaderName, HeaderValue, StatusCode};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::OnceCell;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use url::Url;

/// Executes operations against one API.
///
/// A pipeline is cheap to clone and meant to be shared: clones use the same
/// handlers, token manager and result cache.
///
/// # Examples
///
/// ```no_run
/// use cloudcall::{Operation, Pipeline, RetryPolicy};
/// use http::Method;
/// use serde::{Deserialize, Serialize};
/// use std::time::Duration;
///
/// #[derive(Serialize)]
/// struct CreateKey {
///     project: String,
///     name: String,
///     public_key: String,
/// }
///
/// #[derive(Deserialize)]
/// struct SshKey {
///     id: String,
///     name: String,
/// }
///
/// # async fn example() -> Result<(), cloudcall::Error> {
/// let pipeline = Pipeline::builder()
///     .base_url("https://api.example.com/v1")?
///     .token_endpoint("https://auth.example.com/oauth/token")?
///     .retry_policy(RetryPolicy {
///         max_attempts: 5,
///         ..RetryPolicy::default()
///     })
///     .timeout(Duration::from_secs(30))
///     .build()?;
///
/// let create = Operation::new("CreateSshKey", Method::POST, "/projects/{project}/ssh-keys");
/// let key: cloudcall::Response<SshKey> = pipeline
///     .execute(
///         &create,
///         &CreateKey {
///             project: "p-1".to_string(),
///             name: "laptop".to_string(),
///             public_key: "ssh-ed25519 AAAA...".to_string(),
///         },
///     )
///     .await?;
/// println!("Created key {}", key.id);
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct Pipeline {
    inner: Arc<PipelineInner>,
}

type Slot = Arc<OnceCell<Result<Reply>>>;

struct PipelineInner {
    handlers: Handlers,
    retryer: Retryer,
    tokens: Option<Arc<TokenManager>>,
    results: Option<ResultCache<String, Slot>>,
}

impl fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pipeline")
            .field("handlers", &self.inner.handlers)
            .field("retryer", &self.inner.retryer)
            .field("tokens", &self.inner.tokens)
            .field("results", &self.inner.results)
            .finish()
    }
}

/// The untyped outcome of a successful call, as stored for replay.
#[derive(Debug, Clone)]
struct Reply {
    status: StatusCode,
    headers: HeaderMap,
    raw_body: String,
    data: Option<Value>,
    attempts: u32,
    latency: Duration,
}

impl Reply {
    fn decode<T: DeserializeOwned>(&self, value: Value) -> Result<T> {
        serde_json::from_value(value).map_err(|e| {
            tracing::error!(
                error = %e,
                raw_response = %self.raw_body,
                "Failed to deserialize response"
            );
            Error::Deserialization {
                status: self.status,
                message: e.to_string(),
                raw_response: self.raw_body.clone(),
            }
        })
    }

    fn into_response<T>(self, data: T) -> Response<T> {
        Response::new(
            data,
            self.raw_body,
            self.status,
            self.headers,
            self.latency,
            self.attempts,
        )
    }
}

impl Pipeline {
    /// Creates a new `PipelineBuilder`.
    pub fn builder() -> PipelineBuilder {
        PipelineBuilder::new()
    }

    /// The stage lists this pipeline runs.
    pub fn handlers(&self) -> &Handlers {
        &self.inner.handlers
    }

    /// The token manager used to sign requests, if any.
    pub fn token_manager(&self) -> Option<&Arc<TokenManager>> {
        self.inner.tokens.as_ref()
    }

    /// Executes `op` with `params` and decodes the payload into `T`.
    ///
    /// An empty success body decodes as JSON `null`, so `()`, `Option<_>`
    /// and `serde_json::Value` targets accept it.
    ///
    /// # Errors
    ///
    /// Returns the classified error of the last attempt.
    pub async fn execute<P, T>(&self, op: &Operation, params: &P) -> Result<Response<T>>
    where
        P: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        self.execute_with(op, params, CallOptions::default()).await
    }

    /// Like [`execute`](Pipeline::execute), with per-call options.
    pub async fn execute_with<P, T>(
        &self,
        op: &Operation,
        params: &P,
        options: CallOptions,
    ) -> Result<Response<T>>
    where
        P: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        let reply = self.call(op, params, options).await?;
        let data = reply.decode(reply.data.clone().unwrap_or(Value::Null))?;
        Ok(reply.into_response(data))
    }

    /// Executes `op` and decodes the payload into an existing `target`.
    ///
    /// `target` is left untouched when the success body is empty.
    pub async fn execute_into<P, T>(
        &self,
        op: &Operation,
        params: &P,
        options: CallOptions,
        target: &mut T,
    ) -> Result<Response<()>>
    where
        P: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        let reply = self.call(op, params, options).await?;
        if let Some(value) = reply.data.clone() {
            *target = reply.decode(value)?;
        }
        Ok(reply.into_response(()))
    }

    /// Stops the result cache sweep and drops cached results.
    pub async fn close(&self) {
        if let Some(results) = &self.inner.results {
            results.close().await;
        }
    }

    async fn call<P>(&self, op: &Operation, params: &P, options: CallOptions) -> Result<Reply>
    where
        P: Serialize + ?Sized,
    {
        let params =
            serde_json::to_value(params).map_err(|e| Error::Serialization(e.to_string()))?;
        let op = Arc::new(op.clone());

        let results = match &self.inner.results {
            Some(results) if op.is_idempotent() => results,
            _ => return self.inner.run(CallContext::new(op, params, options)).await,
        };

        let key = options
            .idempotency_key
            .clone()
            .unwrap_or_else(|| op.idempotency_key(&params));
        let slot = results
            .get_or_insert_with(key.clone(), || Arc::new(OnceCell::new()))
            .await;
        if let Some(outcome) = slot.get() {
            tracing::debug!(operation = op.name(), "Replaying cached result");
            return outcome.clone();
        }

        let cancel = options.cancel.clone().unwrap_or_else(CancellationToken::new);
        let deadline = options.deadline_from(Instant::now());
        let inner = &self.inner;
        let init = slot.get_or_try_init(move || async move {
            match inner.run(CallContext::new(op, params, options)).await {
                Err(e) if e.kind() == ErrorKind::Cancellation => {
                    // Never replay a cancellation to other callers.
                    results.invalidate(&key).await;
                    Err(e)
                }
                outcome => Ok(outcome),
            }
        });

        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(Error::Cancelled),
            _ = deadline_passed(deadline) => Err(Error::DeadlineExceeded),
            outcome = init => match outcome {
                Ok(stored) => stored.clone(),
                Err(e) => Err(e),
            },
        }
    }
}

async fn deadline_passed(deadline: Option<Instant>) {
    match deadline {
        Some(at) => tokio::time::sleep_until(at).await,
        None => std::future::pending().await,
    }
}

impl PipelineInner {
    /// Runs one logical call through the stages.
    async fn run(&self, mut cx: CallContext) -> Result<Reply> {
        let h = &self.handlers;

        loop {
            cx.begin_attempt();
            h.build.run(&mut cx).await;
            h.sign.run(&mut cx).await;
            h.send.run(&mut cx).await;
            h.classify.run(&mut cx).await;

            let (delay, unauthorized) = {
                let Some(error) = cx.error() else { break };
                tracing::warn!(
                    error = %error,
                    attempt = cx.attempt,
                    operation = cx.operation.name(),
                    "Request failed"
                );
                let Some(delay) = self.retryer.should_retry(error, cx.attempt) else {
                    break;
                };
                if error.rate_limit_info().is_some() {
                    tracing::info!(
                        rate_limit_delay_ms = delay.as_millis(),
                        attempt = cx.attempt,
                        "Rate limited - waiting before retry"
                    );
                } else {
                    tracing::info!(
                        delay_ms = delay.as_millis(),
                        attempt = cx.attempt,
                        "Retrying request after delay"
                    );
                }
                (delay, matches!(error, Error::Authentication { .. }))
            };

            if unauthorized {
                if let (Some(tokens), Some(used)) = (&self.tokens, &cx.token) {
                    tokens.invalidate_token(used).await;
                }
                cx.token_refreshed = true;
            }

            if let Err(e) = cx.sleep(delay).await {
                cx.take_error();
                cx.fail(e);
                break;
            }
        }

        if !cx.has_error() {
            h.unmarshal.run(&mut cx).await;
        } else if cx.response.is_some() && cx.error().and_then(Error::api_error).is_some() {
            h.unmarshal_error.run(&mut cx).await;
        }
        h.complete.run(&mut cx).await;

        if let Some(error) = cx.take_error() {
            return Err(error);
        }
        let response = cx.response.take().ok_or_else(|| {
            Error::Configuration("Call finished without a response".to_string())
        })?;
        let raw_body = response.text();
        Ok(Reply {
            status: response.status,
            headers: response.headers,
            raw_body,
            data: cx.data.take(),
            attempts: cx.attempt,
            latency: cx.elapsed(),
        })
    }
}

type Extension = Box<dyn FnOnce(&mut Handlers) + Send>;

/// Builder for configuring and creating a [`Pipeline`].
///
/// # Examples
///
/// ```no_run
/// use cloudcall::handler::{NamedHandler, SEND_REQUEST};
/// use cloudcall::{CallContext, PipelineBuilder};
///
/// # async fn example() -> Result<(), cloudcall::Error> {
/// let pipeline = PipelineBuilder::new()
///     .base_url("https://api.example.com/v1")?
///     .default_header("User-Agent", "my-app/1.0")?
///     .handlers(|h| {
///         h.send.insert_before(
///             SEND_REQUEST,
///             NamedHandler::new("app.Trace", |cx: &mut CallContext| {
///                 tracing::debug!(attempt = cx.attempt, "about to send");
///             }),
///         );
///     })
///     .build()?;
/// # Ok(())
/// # }
/// ```
pub struct PipelineBuilder {
    base_url: Option<Url>,
    default_headers: HeaderMap,
    timeout: Option<Duration>,
    retry_policy: RetryPolicy,
    retry_predicate: Option<Arc<dyn RetryPredicate>>,
    transport: Option<Arc<dyn Transport>>,
    token_manager: Option<Arc<TokenManager>>,
    credentials: Option<Arc<CredentialChain>>,
    token_endpoint: Option<Url>,
    result_cache: Option<ResultCacheConfig>,
    extensions: Vec<Extension>,
}

impl PipelineBuilder {
    /// Creates a new `PipelineBuilder` with default settings.
    pub fn new() -> Self {
        Self {
            base_url: None,
            default_headers: HeaderMap::new(),
            timeout: None,
            retry_policy: RetryPolicy::default(),
            retry_predicate: None,
            transport: None,
            token_manager: None,
            credentials: None,
            token_endpoint: None,
            result_cache: None,
            extensions: Vec::new(),
        }
    }

    /// Sets the base URL operation paths are appended to.
    ///
    /// # Errors
    ///
    /// Returns an error if the URL is invalid.
    pub fn base_url(mut self, url: impl AsRef<str>) -> Result<Self> {
        self.base_url = Some(Url::parse(url.as_ref())?);
        Ok(self)
    }

    /// Adds a header sent with every request.
    ///
    /// # Errors
    ///
    /// Returns an error if the header name or value is invalid.
    pub fn default_header(mut self, name: impl AsRef<str>, value: impl AsRef<str>) -> Result<Self> {
        let name = HeaderName::try_from(name.as_ref())
            .map_err(|e| Error::Configuration(format!("Invalid header name: {}", e)))?;
        let value = HeaderValue::try_from(value.as_ref())
            .map_err(|e| Error::Configuration(format!("Invalid header value: {}", e)))?;
        self.default_headers.insert(name, value);
        Ok(self)
    }

    /// Sets the per-request timeout of the default transport.
    ///
    /// Ignored when a custom transport is supplied. Use
    /// [`CallOptions::with_timeout`] for a deadline covering the whole call.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Sets the retry policy. Defaults to [`RetryPolicy::default`].
    pub fn retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry_policy = policy;
        self
    }

    /// Sets a custom retry predicate.
    ///
    /// By default, calls are retried based on `Error::is_retryable()`.
    pub fn retry_predicate(mut self, predicate: Arc<dyn RetryPredicate>) -> Self {
        self.retry_predicate = Some(predicate);
        self
    }

    /// Sets the transport. Defaults to a [`ReqwestTransport`].
    pub fn transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transport = Some(transport);
        self
    }

    /// Signs requests with tokens from an existing manager.
    pub fn token_manager(mut self, tokens: Arc<TokenManager>) -> Self {
        self.token_manager = Some(tokens);
        self
    }

    /// Sets the credential chain for the token manager the builder creates.
    ///
    /// Requires [`token_endpoint`](PipelineBuilder::token_endpoint).
    pub fn credentials(mut self, chain: Arc<CredentialChain>) -> Self {
        self.credentials = Some(chain);
        self
    }

    /// Signs requests with tokens from `url`, using the configured
    /// credentials or [`CredentialChain::default_chain`].
    ///
    /// # Errors
    ///
    /// Returns an error if the URL is invalid.
    pub fn token_endpoint(mut self, url: impl AsRef<str>) -> Result<Self> {
        self.token_endpoint = Some(Url::parse(url.as_ref())?);
        Ok(self)
    }

    /// Deduplicates idempotent operations through a result cache.
    pub fn result_cache(mut self, config: ResultCacheConfig) -> Self {
        self.result_cache = Some(config);
        self
    }

    /// Edits the stage lists after the default handlers are installed.
    ///
    /// May be called several times; edits apply in order.
    pub fn handlers<F>(mut self, edit: F) -> Self
    where
        F: FnOnce(&mut Handlers) + Send + 'static,
    {
        self.extensions.push(Box::new(edit));
        self
    }

    /// Builds the configured `Pipeline`.
    ///
    /// With a result cache configured this must run inside a Tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns an error if no base URL was provided, credentials were given
    /// without a token endpoint, the retry policy allows no attempt, or the
    /// default transport cannot be built.
    pub fn build(self) -> Result<Pipeline> {
        let base_url = self
            .base_url
            .ok_or_else(|| Error::Configuration("Base URL is required".to_string()))?;
        if self.retry_policy.max_attempts == 0 {
            return Err(Error::Configuration(
                "Retry policy must allow at least one attempt".to_string(),
            ));
        }

        let transport: Arc<dyn Transport> = match self.transport {
            Some(transport) => transport,
            None => Arc::new(ReqwestTransport::new(self.timeout)?),
        };

        let tokens = match (self.token_manager, self.token_endpoint) {
            (Some(tokens), _) => Some(tokens),
            (None, Some(endpoint)) => {
                let mut builder = TokenManager::builder()
                    .endpoint(endpoint.as_str())?
                    .transport(transport.clone());
                if let Some(chain) = self.credentials {
                    builder = builder.credentials(chain);
                }
                Some(Arc::new(builder.build()?))
            }
            (None, None) if self.credentials.is_some() => {
                return Err(Error::Configuration(
                    "Credentials require a token endpoint".to_string(),
                ));
            }
            (None, None) => None,
        };

        let codec = Arc::new(Codec::new(base_url, self.default_headers)?);
        let mut handlers = Handlers::default();
        core_handlers::install(&mut handlers, codec, transport, tokens.clone());
        for edit in self.extensions {
            edit(&mut handlers);
        }

        let retryer = match self.retry_predicate {
            Some(predicate) => Retryer::with_predicate(self.retry_policy, predicate),
            None => Retryer::new(self.retry_policy),
        };

        Ok(Pipeline {
            inner: Arc::new(PipelineInner {
                handlers,
                retryer,
                tokens,
                results: self.result_cache.map(ResultCache::new),
            }),
        })
    }
}

impl Default for PipelineBuilder {
    fn default() -> Self {
        Self::new()
    }
}
