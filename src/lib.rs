//! # cloudcall - request execution for REST/JSON cloud APIs
//!
//! cloudcall turns a static [`Operation`] plus serializable parameters into an
//! authenticated, retried HTTP exchange, and the response back into typed data
//! or a classified [`Error`]. Every call runs through a [`Pipeline`] of named
//! handler stages that applications can extend.
//!
//! ## Quick Start
//!
//! ```no_run
//! use cloudcall::{CallOptions, Operation, Pipeline, ResultCacheConfig};
//! use http::Method;
//! use serde::Deserialize;
//! use serde_json::json;
//! use std::time::Duration;
//!
//! #[derive(Deserialize)]
//! struct Instance {
//!     id: String,
//!     status: String,
//! }
//!
//! #[tokio::main]
//! async fn main() -> Result<(), cloudcall::Error> {
//!     // Credentials come from CLOUD_CLIENT_ID / CLOUD_CLIENT_SECRET or the
//!     // profile file, and are exchanged for bearer tokens.
//!     let pipeline = Pipeline::builder()
//!         .base_url("https://api.example.com/v1")?
//!         .token_endpoint("https://auth.example.com/oauth/token")?
//!         .result_cache(ResultCacheConfig::default())
//!         .build()?;
//!
//!     let list = Operation::new("ListInstances", Method::GET, "/projects/{project}/instances")
//!         .query("status")
//!         .idempotent();
//!
//!     let instances = pipeline
//!         .execute_with::<_, Vec<Instance>>(
//!             &list,
//!             &json!({"project": "p-1", "status": "running"}),
//!             CallOptions::new().with_timeout(Duration::from_secs(10)),
//!         )
//!         .await?;
//!
//!     for instance in instances.iter() {
//!         println!("{}: {}", instance.id, instance.status);
//!     }
//!     println!("Request took {:?}", instances.latency);
//!
//!     pipeline.close().await;
//!     Ok(())
//! }
//! ```
//!
//! ## Features
//!
//! - **Handler pipeline** - Build, Sign, Send, Classify, Unmarshal / UnmarshalError and Complete stages with named, insertable handlers
//! - **Credential chain** - Environment, profile file, static and remote providers tried in order
//! - **Token caching** - Client-credentials tokens refreshed before expiry, one exchange however many callers
//! - **Retries** - Exponential backoff with jitter, `Retry-After` support and a single retry on 401
//! - **Idempotent replay** - Concurrent identical idempotent calls share one network exchange
//! - **Cancellation** - Per-call cancellation tokens and deadlines covering every wait
//! - **Automatic logging** - Structured logging with `tracing`
//!
//! ## Error Handling
//!
//! Errors keep the service's error envelope and the raw body:
//!
//! ```no_run
//! use cloudcall::{Error, ErrorKind, Operation, Pipeline};
//! use http::Method;
//!
//! # async fn example(pipeline: Pipeline) -> Result<(), Error> {
//! let get = Operation::new("GetInstance", Method::GET, "/instances/{id}");
//! match pipeline.execute::<_, serde_json::Value>(&get, &serde_json::json!({"id": "i-1"})).await {
//!     Ok(response) => println!("Success: {:?}", response.data),
//!     Err(e) if e.kind() == ErrorKind::Validation => {
//!         if let Some(api) = e.api_error() {
//!             eprintln!("Rejected with code {}: {}", api.code, api.message);
//!         }
//!     }
//!     Err(Error::Deserialization { raw_response, message, status }) => {
//!         eprintln!("Failed to decode (status {}): {}", status, message);
//!         eprintln!("  Raw response: {}", raw_response);
//!     }
//!     Err(e) => eprintln!("Other error: {}", e),
//! }
//! # Ok(())
//! # }
//! ```

pub mod cache;
mod codec;
mod context;
mod core_handlers;
pub mod credentials;
mod error;
pub mod handler;
mod operation;
mod options;
mod pipeline;
pub mod rate_limit;
mod response;
pub mod retry;
mod token;
pub mod transport;

pub use cache::{ResultCache, ResultCacheConfig};
pub use codec::Codec;
pub use context::CallContext;
pub use core_handlers::{
    BearerToken, BuildRequest, ClassifyResponse, LogCompletion, SendRequest, UnmarshalBody,
    UnmarshalError,
};
pub use credentials::{CredentialChain, CredentialProvider, Credentials};
pub use error::{ApiError, Error, ErrorKind, ProviderFailure, Result};
pub use handler::{Handler, HandlerList, Handlers, NamedHandler};
pub use operation::{Operation, ResponseMode};
pub use options::CallOptions;
pub use pipeline::{Pipeline, PipelineBuilder};
pub use response::Response;
pub use retry::{RetryPolicy, RetryPredicate, Retryer};
pub use token::{
    Token, TokenManager, TokenManagerBuilder, DEFAULT_EXPIRY_MARGIN, MAX_TOKEN_LIFETIME,
};
pub use transport::{HttpRequest, HttpResponse, ReqwestTransport, Transport};
