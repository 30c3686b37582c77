//! Static descriptions of API endpoints.

use http::{HeaderName, Method};
use serde_json::Value;
use sha2::{Digest, Sha256};

/// How a successful response body is interpreted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ResponseMode {
    /// The body is JSON and is decoded into the target type.
    #[default]
    Json,
    /// The body is an unwrapped string, handed to the target as a JSON string.
    PlainText,
}

/// A static description of one API endpoint.
///
/// Operations are built once and reused for every call. Placeholders in the
/// path template (`{name}`) are filled from the parameter field of the same
/// name; fields tagged with [`query`](Operation::query) or
/// [`header`](Operation::header) go to the query string or headers instead of
/// the body.
///
/// # Examples
///
/// ```
/// use cloudcall::Operation;
/// use http::Method;
///
/// let list_keys = Operation::new("ListSshKeys", Method::GET, "/projects/{project}/ssh-keys")
///     .query("page")
///     .query("per_page")
///     .idempotent();
///
/// assert_eq!(list_keys.placeholders(), vec!["project"]);
/// ```
#[derive(Debug, Clone)]
pub struct Operation {
    name: String,
    method: Method,
    path_template: String,
    query_fields: Vec<String>,
    header_fields: Vec<(String, HeaderName)>,
    response_mode: ResponseMode,
    idempotent: bool,
}

impl Operation {
    /// Creates an operation with the given name, method and path template.
    pub fn new(name: impl Into<String>, method: Method, path_template: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            method,
            path_template: path_template.into(),
            query_fields: Vec::new(),
            header_fields: Vec::new(),
            response_mode: ResponseMode::Json,
            idempotent: false,
        }
    }

    /// Sends the parameter field `field` as a query parameter.
    pub fn query(mut self, field: impl Into<String>) -> Self {
        self.query_fields.push(field.into());
        self
    }

    /// Sends the parameter field `field` as the header `header`.
    pub fn header(mut self, field: impl Into<String>, header: HeaderName) -> Self {
        self.header_fields.push((field.into(), header));
        self
    }

    /// Treats the success body as an unwrapped string.
    pub fn plain_text(mut self) -> Self {
        self.response_mode = ResponseMode::PlainText;
        self
    }

    /// Marks the operation as idempotent, enabling result caching.
    pub fn idempotent(mut self) -> Self {
        self.idempotent = true;
        self
    }

    /// The operation name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The HTTP method.
    pub fn method(&self) -> &Method {
        &self.method
    }

    /// The path template.
    pub fn path_template(&self) -> &str {
        &self.path_template
    }

    /// Fields sent as query parameters.
    pub fn query_fields(&self) -> &[String] {
        &self.query_fields
    }

    /// Fields sent as headers, with their header names.
    pub fn header_fields(&self) -> &[(String, HeaderName)] {
        &self.header_fields
    }

    /// How the success body is interpreted.
    pub fn response_mode(&self) -> ResponseMode {
        self.response_mode
    }

    /// Whether results may be cached and replayed.
    pub fn is_idempotent(&self) -> bool {
        self.idempotent
    }

    /// Whether requests for this operation carry a body.
    pub fn has_body(&self) -> bool {
        self.method == Method::POST || self.method == Method::PUT || self.method == Method::PATCH
    }

    /// Placeholder names in the path template, in order.
    pub fn placeholders(&self) -> Vec<&str> {
        let mut names = Vec::new();
        let mut rest = self.path_template.as_str();
        while let Some(open) = rest.find('{') {
            let Some(close) = rest[open..].find('}') else {
                break;
            };
            names.push(&rest[open + 1..open + close]);
            rest = &rest[open + close + 1..];
        }
        names
    }

    /// Deterministic key for `params` under this operation.
    ///
    /// SHA-256 over the operation name and the JSON encoding of the
    /// parameters. `serde_json` maps keep their keys sorted, so equal
    /// parameter values always encode identically.
    pub fn idempotency_key(&self, params: &Value) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.name.as_bytes());
        hasher.update([0u8]);
        hasher.update(params.to_string().as_bytes());
        format!("{:x}", hasher.finalize())
    }
}
