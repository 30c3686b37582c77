//! Per-call mutable state.

use crate::operation::Operation;
use crate::options::CallOptions;
use crate::token::Token;
use crate::transport::{HttpRequest, HttpResponse};
use crate::{Error, Result};
use serde_json::Value;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// The state of one in-flight logical call.
///
/// Created by the pipeline for each call and handed by `&mut` to every
/// handler in stage order. Handlers report failure by calling
/// [`fail`](CallContext::fail); the first error recorded in an attempt wins.
#[derive(Debug)]
pub struct CallContext {
    /// The operation being executed.
    pub operation: Arc<Operation>,
    /// The call parameters as JSON.
    pub params: Value,
    /// Per-call options.
    pub options: CallOptions,
    /// The request built for the current attempt.
    pub request: Option<HttpRequest>,
    /// The response received in the current attempt.
    pub response: Option<HttpResponse>,
    /// The decoded success payload.
    pub data: Option<Value>,
    /// The token used to sign the current attempt.
    pub token: Option<Token>,
    /// The current attempt, starting at 1.
    pub attempt: u32,
    /// Whether the token was already refreshed after a 401 in this call.
    pub token_refreshed: bool,
    error: Option<Error>,
    cancel: CancellationToken,
    deadline: Option<Instant>,
    started: Instant,
}

impl CallContext {
    /// Creates the context for a call.
    pub fn new(operation: Arc<Operation>, params: Value, options: CallOptions) -> Self {
        let started = Instant::now();
        let cancel = options.cancel.clone().unwrap_or_else(CancellationToken::new);
        let deadline = options.deadline_from(started);
        Self {
            operation,
            params,
            options,
            request: None,
            response: None,
            data: None,
            token: None,
            attempt: 0,
            token_refreshed: false,
            error: None,
            cancel,
            deadline,
            started,
        }
    }

    /// The error recorded so far, if any.
    pub fn error(&self) -> Option<&Error> {
        self.error.as_ref()
    }

    /// Mutable access to the recorded error, for handlers that refine it.
    pub fn error_mut(&mut self) -> Option<&mut Error> {
        self.error.as_mut()
    }

    /// Records `error` unless an error is already recorded.
    pub fn fail(&mut self, error: Error) {
        if self.error.is_none() {
            self.error = Some(error);
        }
    }

    /// Returns `true` if an error has been recorded.
    pub fn has_error(&self) -> bool {
        self.error.is_some()
    }

    pub(crate) fn take_error(&mut self) -> Option<Error> {
        self.error.take()
    }

    /// Resets per-attempt state and advances the attempt counter.
    pub(crate) fn begin_attempt(&mut self) {
        self.attempt += 1;
        self.request = None;
        self.response = None;
        self.data = None;
        self.error = None;
    }

    /// The call's cancellation token.
    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Time since the call started.
    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    /// Checks the cancellation signal and the deadline.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Cancelled`] or [`Error::DeadlineExceeded`].
    pub fn check_live(&self) -> Result<()> {
        if self.cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }
        if self.deadline.is_some_and(|d| Instant::now() >= d) {
            return Err(Error::DeadlineExceeded);
        }
        Ok(())
    }

    /// Runs `fut` unless the call is cancelled or its deadline passes first.
    ///
    /// On cancellation `fut` is dropped, releasing whatever it held (for a
    /// send, the connection).
    pub async fn guard<F, T>(&self, fut: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        self.check_live()?;
        let deadline = async {
            match self.deadline {
                Some(at) => tokio::time::sleep_until(at).await,
                None => std::future::pending().await,
            }
        };
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(Error::Cancelled),
            _ = deadline => Err(Error::DeadlineExceeded),
            out = fut => out,
        }
    }

    /// Sleeps for `delay`, waking early on cancellation or deadline.
    pub async fn sleep(&self, delay: Duration) -> Result<()> {
        self.guard(async {
            tokio::time::sleep(delay).await;
            Ok(())
        })
        .await
    }
}
