//! Typed call results with the HTTP details they came from.

use http::{HeaderMap, StatusCode};
use std::time::Duration;

/// The successful outcome of a call.
///
/// Wraps the decoded payload together with what the last attempt received,
/// so callers can log latency or inspect the raw body without a second
/// request. Dereferences to the payload.
///
/// # Examples
///
/// ```no_run
/// use cloudcall::{Operation, Pipeline};
/// use http::Method;
/// use serde::Deserialize;
///
/// #[derive(Deserialize)]
/// struct Instance {
///     id: String,
///     status: String,
/// }
///
/// # async fn example() -> Result<(), cloudcall::Error> {
/// let pipeline = Pipeline::builder()
///     .base_url("https://api.example.com/v1")?
///     .build()?;
/// let get = Operation::new("GetInstance", Method::GET, "/instances/{id}");
///
/// let instance = pipeline
///     .execute::<_, Instance>(&get, &serde_json::json!({"id": "i-1"}))
///     .await?;
///
/// println!("{} is {}", instance.id, instance.status);
/// println!("took {:?} over {} attempt(s)", instance.latency, instance.attempts);
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct Response<T> {
    /// The decoded payload.
    pub data: T,

    /// The raw body of the final response.
    pub raw_body: String,

    /// The HTTP status of the final response.
    pub status: StatusCode,

    /// The headers of the final response.
    pub headers: HeaderMap,

    /// Time from the start of the call to its end, across all attempts.
    pub latency: Duration,

    /// Attempts made, `1` when the first one succeeded.
    pub attempts: u32,
}

impl<T> Response<T> {
    /// Creates a response.
    pub fn new(
        data: T,
        raw_body: String,
        status: StatusCode,
        headers: HeaderMap,
        latency: Duration,
        attempts: u32,
    ) -> Self {
        Self {
            data,
            raw_body,
            status,
            headers,
            latency,
            attempts,
        }
    }

    /// Transforms the payload, keeping the metadata.
    ///
    /// ```
    /// # use cloudcall::Response;
    /// # use http::{HeaderMap, StatusCode};
    /// # use std::time::Duration;
    /// let response = Response::new(
    ///     vec!["a", "b"],
    ///     r#"["a","b"]"#.to_string(),
    ///     StatusCode::OK,
    ///     HeaderMap::new(),
    ///     Duration::from_millis(20),
    ///     1,
    /// );
    ///
    /// assert_eq!(response.map(|items| items.len()).data, 2);
    /// ```
    pub fn map<U, F>(self, f: F) -> Response<U>
    where
        F: FnOnce(T) -> U,
    {
        Response {
            data: f(self.data),
            raw_body: self.raw_body,
            status: self.status,
            headers: self.headers,
            latency: self.latency,
            attempts: self.attempts,
        }
    }

    /// Returns `true` if more than one attempt was needed.
    pub fn was_retried(&self) -> bool {
        self.attempts > 1
    }

    /// Returns a header of the final response as a string.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name)?.to_str().ok()
    }
}

impl<T> AsRef<T> for Response<T> {
    fn as_ref(&self) -> &T {
        &self.data
    }
}

impl<T> std::ops::Deref for Response<T> {
    type Target = T;

    fn deref(&self) -> &Self::Target {
        &self.data
    }
}
