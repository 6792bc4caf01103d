//! Request and response values used by the pipeline.
//!
//! A [`PendingRequest`] is captured before any credential is attached. Turning
//! it into a sendable [`HttpRequest`] is a pure step, so replaying after a
//! renewal is the same call with a different token.

use bytes::Bytes;
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE, HeaderMap, HeaderName, HeaderValue};
use reqwest::{Method, StatusCode};
use serde::Serialize;
use serde::de::DeserializeOwned;
use url::Url;

use crate::error::{LinkError, Result};

/// Error code the server puts in the body when the access token has expired.
pub const ERROR_ACCESS_TOKEN: &str = "ERROR_ACCESS_TOKEN";

/// An outbound call, before credential attachment.
#[derive(Debug, Clone)]
pub struct PendingRequest {
    method: Method,
    path: String,
    query: Vec<(String, String)>,
    headers: HeaderMap,
    body: Option<Bytes>,
}

impl PendingRequest {
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            query: Vec::new(),
            headers: HeaderMap::new(),
            body: None,
        }
    }

    pub fn get(path: impl Into<String>) -> Self {
        Self::new(Method::GET, path)
    }

    pub fn post(path: impl Into<String>) -> Self {
        Self::new(Method::POST, path)
    }

    pub fn put(path: impl Into<String>) -> Self {
        Self::new(Method::PUT, path)
    }

    pub fn delete(path: impl Into<String>) -> Self {
        Self::new(Method::DELETE, path)
    }

    /// Append a query parameter.
    pub fn query(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.push((name.into(), value.into()));
        self
    }

    /// Set a header. `Authorization` is owned by the pipeline and gets overwritten.
    pub fn header(mut self, name: &str, value: &str) -> Result<Self> {
        let name = HeaderName::from_bytes(name.as_bytes())
            .map_err(|e| LinkError::invalid_request(format!("header name '{name}': {e}")))?;
        let value = HeaderValue::from_str(value)
            .map_err(|e| LinkError::invalid_request(format!("header value for '{name}': {e}")))?;
        self.headers.insert(name, value);
        Ok(self)
    }

    /// Use `body` serialized as JSON.
    pub fn json<T: Serialize + ?Sized>(mut self, body: &T) -> Result<Self> {
        self.body = Some(Bytes::from(serde_json::to_vec(body)?));
        self.headers
            .insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        Ok(self)
    }

    /// Use a raw body.
    pub fn body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = Some(body.into());
        self
    }

    pub fn method(&self) -> &Method {
        &self.method
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    pub fn body_bytes(&self) -> Option<&Bytes> {
        self.body.as_ref()
    }

    /// Absolute URL for this request against `base_url`.
    ///
    /// A path that is already an absolute URL is used as is.
    pub fn url(&self, base_url: &str) -> Result<Url> {
        let raw = if self.path.starts_with("http://") || self.path.starts_with("https://") {
            self.path.clone()
        } else if self.path.starts_with('/') {
            format!("{}{}", base_url.trim_end_matches('/'), self.path)
        } else {
            format!("{}/{}", base_url.trim_end_matches('/'), self.path)
        };

        let mut url =
            Url::parse(&raw).map_err(|e| LinkError::invalid_request(format!("url '{raw}': {e}")))?;
        if !self.query.is_empty() {
            url.query_pairs_mut().extend_pairs(self.query.iter());
        }
        Ok(url)
    }

    /// Build the sendable request carrying `access_token` as bearer.
    pub fn authorize(&self, base_url: &str, access_token: &str) -> Result<HttpRequest> {
        let mut headers = self.headers.clone();
        let bearer = HeaderValue::from_str(&format!("Bearer {access_token}"))
            .map_err(|e| LinkError::invalid_request(format!("authorization header: {e}")))?;
        headers.insert(AUTHORIZATION, bearer);

        Ok(HttpRequest {
            method: self.method.clone(),
            url: self.url(base_url)?,
            headers,
            body: self.body.clone(),
        })
    }

    /// Build the sendable request without credentials.
    pub fn anonymous(&self, base_url: &str) -> Result<HttpRequest> {
        Ok(HttpRequest {
            method: self.method.clone(),
            url: self.url(base_url)?,
            headers: self.headers.clone(),
            body: self.body.clone(),
        })
    }
}

/// A fully built request, ready for a transport.
#[derive(Debug, Clone)]
pub struct HttpRequest {
    pub method: Method,
    pub url: Url,
    pub headers: HeaderMap,
    pub body: Option<Bytes>,
}

impl HttpRequest {
    /// Access token carried in the `Authorization` header, if any.
    pub fn bearer_token(&self) -> Option<&str> {
        self.headers
            .get(AUTHORIZATION)?
            .to_str()
            .ok()?
            .strip_prefix("Bearer ")
    }
}

/// A buffered response.
#[derive(Debug, Clone)]
pub struct HttpResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Bytes,
}

impl HttpResponse {
    pub fn new(status: StatusCode, body: impl Into<Bytes>) -> Self {
        Self {
            status,
            headers: HeaderMap::new(),
            body: body.into(),
        }
    }

    /// Build a response with a JSON body.
    pub fn json_body(status: StatusCode, body: &serde_json::Value) -> Self {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        Self {
            status,
            headers,
            body: Bytes::from(body.to_string()),
        }
    }

    #[inline]
    pub fn is_success(&self) -> bool {
        self.status.is_success()
    }

    pub fn json<T: DeserializeOwned>(&self) -> Result<T> {
        Ok(serde_json::from_slice(&self.body)?)
    }

    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }

    /// The `error` field of a JSON object body, if present.
    pub fn error_code(&self) -> Option<String> {
        #[derive(serde::Deserialize)]
        struct ErrorProbe {
            error: Option<serde_json::Value>,
        }

        let probe: ErrorProbe = serde_json::from_slice(&self.body).ok()?;
        match probe.error? {
            serde_json::Value::String(code) => Some(code),
            _ => None,
        }
    }

    /// Whether the server reported an expired access token. The HTTP status is
    /// not consulted.
    pub fn is_token_expired(&self) -> bool {
        self.error_code().as_deref() == Some(ERROR_ACCESS_TOKEN)
    }
}
