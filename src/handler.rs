//! Named, orderable pipeline stages.
//!
//! Each stage of a call is a [`HandlerList`]: an ordered list of
//! [`NamedHandler`]s. Extensions are inserted, replaced or removed by name,
//! so callers can add logging or swap the body decoder without touching the
//! fixed stage order.

use crate::context::CallContext;
use async_trait::async_trait;
use std::borrow::Cow;
use std::fmt;
use std::sync::Arc;

/// Name of the default build handler.
pub const BUILD_REQUEST: &str = "core.BuildRequest";
/// Name of the default signing handler.
pub const BEARER_TOKEN: &str = "core.BearerToken";
/// Name of the default send handler.
pub const SEND_REQUEST: &str = "core.SendRequest";
/// Name of the default classification handler.
pub const CLASSIFY_RESPONSE: &str = "core.ClassifyResponse";
/// Name of the default body decoder.
pub const UNMARSHAL_BODY: &str = "core.UnmarshalBody";
/// Name of the default error decoder.
pub const UNMARSHAL_ERROR: &str = "core.UnmarshalError";
/// Name of the default completion logger.
pub const LOG_COMPLETION: &str = "core.LogCompletion";

/// One step of a pipeline stage.
///
/// Closures taking `&mut CallContext` are handlers too.
///
/// # Examples
///
/// ```
/// use cloudcall::handler::{HandlerList, NamedHandler};
/// use cloudcall::CallContext;
///
/// let mut list = HandlerList::new();
/// list.push_back(NamedHandler::new("audit", |cx: &mut CallContext| {
///     tracing::info!(operation = cx.operation.name(), "auditing call");
/// }));
/// assert_eq!(list.names(), vec!["audit"]);
/// ```
#[async_trait]
pub trait Handler: Send + Sync {
    /// Runs this step against the call.
    async fn handle(&self, cx: &mut CallContext);
}

#[async_trait]
impl<F> Handler for F
where
    F: Fn(&mut CallContext) + Send + Sync,
{
    async fn handle(&self, cx: &mut CallContext) {
        self(cx)
    }
}

/// A handler with the name it is addressed by.
#[derive(Clone)]
pub struct NamedHandler {
    name: Cow<'static, str>,
    handler: Arc<dyn Handler>,
}

impl fmt::Debug for NamedHandler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("NamedHandler").field(&self.name).finish()
    }
}

impl NamedHandler {
    /// Names `handler`.
    pub fn new(name: impl Into<Cow<'static, str>>, handler: impl Handler + 'static) -> Self {
        Self {
            name: name.into(),
            handler: Arc::new(handler),
        }
    }

    /// Names an already shared handler.
    pub fn from_arc(name: impl Into<Cow<'static, str>>, handler: Arc<dyn Handler>) -> Self {
        Self {
            name: name.into(),
            handler,
        }
    }

    /// The handler's name.
    pub fn name(&self) -> &str {
        &self.name
    }
}

/// An ordered list of handlers forming one stage.
#[derive(Clone, Default, Debug)]
pub struct HandlerList {
    handlers: Vec<NamedHandler>,
    run_all: bool,
}

impl HandlerList {
    /// An empty list that stops at the first error.
    pub fn new() -> Self {
        Self::default()
    }

    /// An empty list whose handlers all run even after an error.
    pub fn run_all() -> Self {
        Self {
            handlers: Vec::new(),
            run_all: true,
        }
    }

    /// Appends a handler.
    pub fn push_back(&mut self, handler: NamedHandler) {
        self.handlers.push(handler);
    }

    /// Prepends a handler.
    pub fn push_front(&mut self, handler: NamedHandler) {
        self.handlers.insert(0, handler);
    }

    fn position(&self, name: &str) -> Option<usize> {
        self.handlers.iter().position(|h| h.name() == name)
    }

    /// Inserts `handler` before the one named `name`.
    ///
    /// Returns `false`, leaving the list unchanged, if `name` is absent.
    pub fn insert_before(&mut self, name: &str, handler: NamedHandler) -> bool {
        match self.position(name) {
            Some(i) => {
                self.handlers.insert(i, handler);
                true
            }
            None => false,
        }
    }

    /// Inserts `handler` after the one named `name`.
    ///
    /// Returns `false`, leaving the list unchanged, if `name` is absent.
    pub fn insert_after(&mut self, name: &str, handler: NamedHandler) -> bool {
        match self.position(name) {
            Some(i) => {
                self.handlers.insert(i + 1, handler);
                true
            }
            None => false,
        }
    }

    /// Replaces the handler named `name` in place.
    pub fn replace(&mut self, name: &str, handler: NamedHandler) -> bool {
        match self.position(name) {
            Some(i) => {
                self.handlers[i] = handler;
                true
            }
            None => false,
        }
    }

    /// Removes every handler named `name`, returning whether any was found.
    pub fn remove(&mut self, name: &str) -> bool {
        let before = self.handlers.len();
        self.handlers.retain(|h| h.name() != name);
        self.handlers.len() != before
    }

    /// Handler names in execution order.
    pub fn names(&self) -> Vec<&str> {
        self.handlers.iter().map(NamedHandler::name).collect()
    }

    /// Number of handlers.
    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    /// Returns `true` if the list has no handlers.
    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }

    /// Runs the handlers in order.
    ///
    /// Unless built with [`run_all`](HandlerList::run_all), stops before
    /// the next handler once the context carries an error.
    pub async fn run(&self, cx: &mut CallContext) {
        for h in &self.handlers {
            if !self.run_all && cx.has_error() {
                return;
            }
            h.handler.handle(cx).await;
        }
    }
}

/// The stage lists of a pipeline, in execution order.
#[derive(Clone, Debug)]
pub struct Handlers {
    /// Builds the HTTP request.
    pub build: HandlerList,
    /// Adds authentication.
    pub sign: HandlerList,
    /// Sends the request.
    pub send: HandlerList,
    /// Turns non-2xx responses into errors.
    pub classify: HandlerList,
    /// Decodes a successful body.
    pub unmarshal: HandlerList,
    /// Decodes the error envelope of a failed response. Runs every handler,
    /// since the context already carries the error.
    pub unmarshal_error: HandlerList,
    /// Runs at the end of every call, success or not.
    pub complete: HandlerList,
}

impl Default for Handlers {
    fn default() -> Self {
        Self {
            build: HandlerList::new(),
            sign: HandlerList::new(),
            send: HandlerList::new(),
            classify: HandlerList::new(),
            unmarshal: HandlerList::new(),
            unmarshal_error: HandlerList::run_all(),
            complete: HandlerList::run_all(),
        }
    }
}
