//! Translation between operations and HTTP exchanges.
//!
//! [`Codec::build`] turns an [`Operation`] and its parameters into an
//! [`HttpRequest`]; [`Codec::decode_body`] and [`Codec::decode_error`] turn
//! an [`HttpResponse`] back into data or a structured [`ApiError`].

use crate::error::ApiError;
use crate::operation::{Operation, ResponseMode};
use crate::options::CallOptions;
use crate::transport::{HttpRequest, HttpResponse};
use crate::{Error, Result};
use http::header::{ACCEPT, CONTENT_TYPE};
use http::{HeaderMap, HeaderValue};
use serde_json::{Map, Value};
use url::Url;

const APPLICATION_JSON: &str = "application/json";

/// Builds requests and decodes responses for one API base URL.
#[derive(Debug, Clone)]
pub struct Codec {
    base_url: Url,
    default_headers: HeaderMap,
}

impl Codec {
    /// Creates a codec for `base_url`, sending `default_headers` on every request.
    ///
    /// # Errors
    ///
    /// Returns an error if `base_url` cannot carry a path (e.g. `mailto:`).
    pub fn new(base_url: Url, default_headers: HeaderMap) -> Result<Self> {
        if base_url.cannot_be_a_base() {
            return Err(Error::Configuration(format!(
                "Base URL cannot carry a path: {}",
                base_url
            )));
        }
        Ok(Self {
            base_url,
            default_headers,
        })
    }

    /// The base URL all paths are appended to.
    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// Builds the HTTP request for `op` with `params`.
    ///
    /// Path placeholders and tagged fields are taken out of the parameter
    /// object; whatever remains is the JSON body for POST, PUT and PATCH.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Serialization`] when a placeholder has no matching
    /// field or a field cannot be used in a path, query or header.
    pub fn build(
        &self,
        op: &Operation,
        params: &Value,
        options: &CallOptions,
    ) -> Result<HttpRequest> {
        let mut fields = match params {
            Value::Object(map) => map.clone(),
            _ => Map::new(),
        };

        let mut url = self.base_url.clone();
        {
            let mut segments = url.path_segments_mut().map_err(|_| {
                Error::Configuration(format!("Base URL cannot carry a path: {}", self.base_url))
            })?;
            segments.pop_if_empty();
            for segment in op.path_template().split('/').filter(|s| !s.is_empty()) {
                segments.push(&expand_segment(segment, &mut fields)?);
            }
        }

        {
            let mut query = url.query_pairs_mut();
            for field in op.query_fields() {
                match fields.remove(field) {
                    Some(Value::Array(items)) => {
                        for item in items.iter().filter(|v| !v.is_null()) {
                            query.append_pair(field, &scalar_to_string(field, item)?);
                        }
                    }
                    Some(Value::Null) | None => {}
                    Some(value) => {
                        query.append_pair(field, &scalar_to_string(field, &value)?);
                    }
                }
            }
            for (key, value) in &options.query_params {
                query.append_pair(key, value);
            }
        }
        if url.query() == Some("") {
            url.set_query(None);
        }

        let mut request = HttpRequest::new(op.method().clone(), url);
        request
            .headers
            .insert(CONTENT_TYPE, HeaderValue::from_static(APPLICATION_JSON));
        request
            .headers
            .insert(ACCEPT, HeaderValue::from_static(APPLICATION_JSON));
        for (name, value) in &self.default_headers {
            request.headers.insert(name.clone(), value.clone());
        }
        for (field, header) in op.header_fields() {
            match fields.remove(field) {
                Some(Value::Null) | None => {}
                Some(value) => {
                    let text = scalar_to_string(field, &value)?;
                    let value = HeaderValue::try_from(text).map_err(|e| {
                        Error::Serialization(format!(
                            "Field `{}` is not a valid header: {}",
                            field, e
                        ))
                    })?;
                    request.headers.insert(header.clone(), value);
                }
            }
        }
        for (name, value) in &options.headers {
            request.headers.insert(name.clone(), value.clone());
        }

        if op.has_body() {
            let body = match params {
                Value::Object(_) => Some(Value::Object(fields)),
                Value::Null => None,
                other => Some(other.clone()),
            };
            if let Some(body) = body {
                let bytes =
                    serde_json::to_vec(&body).map_err(|e| Error::Serialization(e.to_string()))?;
                request.body = Some(bytes);
            }
        }

        Ok(request)
    }

    /// Decodes a 2xx response body.
    ///
    /// An empty body is success without data. Plain-text operations receive
    /// the body as a JSON string.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Deserialization`] when a JSON body does not parse.
    pub fn decode_body(&self, op: &Operation, response: &HttpResponse) -> Result<Option<Value>> {
        if response.body.iter().all(u8::is_ascii_whitespace) {
            return Ok(None);
        }
        match op.response_mode() {
            ResponseMode::PlainText => Ok(Some(Value::String(response.text()))),
            ResponseMode::Json => serde_json::from_slice(&response.body)
                .map(Some)
                .map_err(|e| {
                    tracing::error!(
                        error = %e,
                        operation = op.name(),
                        "Failed to decode response body"
                    );
                    Error::Deserialization {
                        status: response.status,
                        message: e.to_string(),
                        raw_response: response.text(),
                    }
                }),
        }
    }

    /// Decodes a non-2xx response into an [`ApiError`].
    ///
    /// Falls back to a generic "status N: body" error when the body is not
    /// the JSON error envelope.
    pub fn decode_error(&self, response: &HttpResponse) -> ApiError {
        ApiError::from_envelope(response.status, &response.body)
            .unwrap_or_else(|| ApiError::generic(response.status, response.text().trim()))
    }
}

/// Replaces every `{field}` in one path segment.
fn expand_segment(segment: &str, fields: &mut Map<String, Value>) -> Result<String> {
    let mut out = String::with_capacity(segment.len());
    let mut rest = segment;
    while let Some(open) = rest.find('{') {
        let close = rest[open..]
            .find('}')
            .map(|i| open + i)
            .ok_or_else(|| Error::Serialization(format!("Unclosed placeholder in `{}`", segment)))?;
        out.push_str(&rest[..open]);
        let name = &rest[open + 1..close];
        let value = fields
            .remove(name)
            .filter(|v| !v.is_null())
            .ok_or_else(|| Error::Serialization(format!("Missing path parameter `{}`", name)))?;
        out.push_str(&scalar_to_string(name, &value)?);
        rest = &rest[close + 1..];
    }
    out.push_str(rest);
    Ok(out)
}

fn scalar_to_string(field: &str, value: &Value) -> Result<String> {
    match value {
        Value::String(s) => Ok(s.clone()),
        Value::Number(n) => Ok(n.to_string()),
        Value::Bool(b) => Ok(b.to_string()),
        _ => Err(Error::Serialization(format!(
            "Field `{}` must be a string, number or boolean",
            field
        ))),
    }
}
