//! The handlers every pipeline is built with.

use crate::codec::Codec;
use crate::context::CallContext;
use crate::error::ApiError;
use crate::handler::{
    Handler, Handlers, NamedHandler, BEARER_TOKEN, BUILD_REQUEST, CLASSIFY_RESPONSE,
    LOG_COMPLETION, SEND_REQUEST, UNMARSHAL_BODY, UNMARSHAL_ERROR,
};
use crate::token::TokenManager;
use crate::transport::Transport;
use crate::Error;
use async_trait::async_trait;
use http::header::AUTHORIZATION;
use http::HeaderValue;
use std::sync::Arc;
use tokio::time::Instant;

/// Fills the default stage lists.
pub(crate) fn install(
    handlers: &mut Handlers,
    codec: Arc<Codec>,
    transport: Arc<dyn Transport>,
    tokens: Option<Arc<TokenManager>>,
) {
    handlers.build.push_back(NamedHandler::new(
        BUILD_REQUEST,
        BuildRequest {
            codec: codec.clone(),
        },
    ));
    if let Some(tokens) = tokens {
        handlers
            .sign
            .push_back(NamedHandler::new(BEARER_TOKEN, BearerToken { tokens }));
    }
    handlers
        .send
        .push_back(NamedHandler::new(SEND_REQUEST, SendRequest { transport }));
    handlers
        .classify
        .push_back(NamedHandler::new(CLASSIFY_RESPONSE, ClassifyResponse));
    handlers.unmarshal.push_back(NamedHandler::new(
        UNMARSHAL_BODY,
        UnmarshalBody {
            codec: codec.clone(),
        },
    ));
    handlers
        .unmarshal_error
        .push_back(NamedHandler::new(UNMARSHAL_ERROR, UnmarshalError { codec }));
    handlers
        .complete
        .push_back(NamedHandler::new(LOG_COMPLETION, LogCompletion));
}

/// Builds the attempt's request with the codec.
pub struct BuildRequest {
    codec: Arc<Codec>,
}

impl BuildRequest {
    /// Builds with `codec`.
    pub fn new(codec: Arc<Codec>) -> Self {
        Self { codec }
    }
}

#[async_trait]
impl Handler for BuildRequest {
    async fn handle(&self, cx: &mut CallContext) {
        if let Err(e) = cx.check_live() {
            cx.fail(e);
            return;
        }
        match self.codec.build(&cx.operation, &cx.params, &cx.options) {
            Ok(request) => {
                tracing::debug!(
                    method = %request.method,
                    url = %request.url,
                    attempt = cx.attempt,
                    "Executing HTTP request"
                );
                cx.request = Some(request);
            }
            Err(e) => cx.fail(e),
        }
    }
}

/// Signs the request with a bearer token.
pub struct BearerToken {
    tokens: Arc<TokenManager>,
}

impl BearerToken {
    /// Signs with tokens from `tokens`.
    pub fn new(tokens: Arc<TokenManager>) -> Self {
        Self { tokens }
    }
}

#[async_trait]
impl Handler for BearerToken {
    async fn handle(&self, cx: &mut CallContext) {
        let result = cx.guard(self.tokens.token(cx.cancellation())).await;
        let token = match result {
            Ok(token) => token,
            Err(e) => {
                cx.fail(e);
                return;
            }
        };
        let mut value = match HeaderValue::try_from(token.authorization()) {
            Ok(value) => value,
            Err(e) => {
                cx.fail(Error::TokenExchange {
                    status: None,
                    message: format!("access token is not a valid header value: {}", e),
                });
                return;
            }
        };
        value.set_sensitive(true);

        match cx.request.as_mut() {
            Some(request) => {
                request.headers.insert(AUTHORIZATION, value);
                cx.token = Some(token);
            }
            None => cx.fail(Error::Configuration("No request to sign".to_string())),
        }
    }
}

/// Sends the request through the transport.
pub struct SendRequest {
    transport: Arc<dyn Transport>,
}

impl SendRequest {
    /// Sends through `transport`.
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self { transport }
    }
}

#[async_trait]
impl Handler for SendRequest {
    async fn handle(&self, cx: &mut CallContext) {
        let Some(request) = cx.request.clone() else {
            cx.fail(Error::Configuration("No request to send".to_string()));
            return;
        };

        let sent_at = Instant::now();
        let result = cx.guard(self.transport.send(request)).await;
        match result {
            Ok(response) => {
                tracing::info!(
                    status = response.status.as_u16(),
                    latency_ms = sent_at.elapsed().as_millis(),
                    attempt = cx.attempt,
                    operation = cx.operation.name(),
                    "Received HTTP response"
                );
                cx.response = Some(response);
            }
            Err(e) => cx.fail(e),
        }
    }
}

/// Turns a non-2xx response into a classified error.
///
/// The error carries a generic [`ApiError`]; the error decoder refines it
/// once the retry loop is over.
pub struct ClassifyResponse;

#[async_trait]
impl Handler for ClassifyResponse {
    async fn handle(&self, cx: &mut CallContext) {
        let Some(response) = cx.response.as_ref() else {
            return;
        };
        let status = response.status;
        if status.is_success() {
            return;
        }

        let raw_response = response.text();
        if status.is_client_error() {
            tracing::error!(
                status = status.as_u16(),
                response = %raw_response,
                "Client error (4xx)"
            );
        } else if status.is_server_error() {
            tracing::warn!(
                status = status.as_u16(),
                response = %raw_response,
                "Server error (5xx)"
            );
        }

        let error = Error::from_status(
            ApiError::generic(status, raw_response.trim()),
            &response.headers,
            cx.token_refreshed,
        );
        cx.fail(error);
    }
}

/// Decodes a successful body into the context's payload.
pub struct UnmarshalBody {
    codec: Arc<Codec>,
}

impl UnmarshalBody {
    /// Decodes with `codec`.
    pub fn new(codec: Arc<Codec>) -> Self {
        Self { codec }
    }
}

#[async_trait]
impl Handler for UnmarshalBody {
    async fn handle(&self, cx: &mut CallContext) {
        let Some(response) = cx.response.as_ref() else {
            cx.fail(Error::Configuration("No response to decode".to_string()));
            return;
        };
        let decoded = self.codec.decode_body(&cx.operation, response);
        match decoded {
            Ok(data) => cx.data = data,
            Err(e) => cx.fail(e),
        }
    }
}

/// Replaces the generic error of a failed response with the decoded envelope.
pub struct UnmarshalError {
    codec: Arc<Codec>,
}

impl UnmarshalError {
    /// Decodes with `codec`.
    pub fn new(codec: Arc<Codec>) -> Self {
        Self { codec }
    }
}

#[async_trait]
impl Handler for UnmarshalError {
    async fn handle(&self, cx: &mut CallContext) {
        let Some(response) = cx.response.as_ref() else {
            return;
        };
        let decoded = self.codec.decode_error(response);
        if let Some(api) = cx.error_mut().and_then(Error::api_error_mut) {
            *api = decoded;
        }
    }
}

/// Logs the outcome of the call.
pub struct LogCompletion;

#[async_trait]
impl Handler for LogCompletion {
    async fn handle(&self, cx: &mut CallContext) {
        let latency_ms = cx.elapsed().as_millis();
        match cx.error() {
            None => tracing::info!(
                operation = cx.operation.name(),
                attempts = cx.attempt,
                latency_ms = latency_ms,
                "Call completed"
            ),
            Some(e) => tracing::warn!(
                operation = cx.operation.name(),
                attempts = cx.attempt,
                latency_ms = latency_ms,
                kind = ?e.kind(),
                error = %e,
                "Call failed"
            ),
        }
    }
}
