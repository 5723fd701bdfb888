//! Replies and their conversion into transport responses.
//!
//! # Responsibilities
//! - Represent a view/interceptor result before and after normalisation
//! - Render `HttpError`s into JSON error bodies
//! - Fill in default content types
//!
//! # Design Decisions
//! - A reply built from a plain value has no status until a boundary layer
//!   normalises it to 200
//! - Stack chains only appear in error bodies for non-external deployments

use axum::body::{Body, Bytes};
use axum::http::header::{self, IntoHeaderName};
use axum::http::{HeaderMap, HeaderValue, StatusCode};
use axum::response::Response;
use serde::Serialize;
use serde_json::{Map, Value};

use super::HttpError;

/// Body of a [`Reply`].
#[derive(Debug, Default)]
pub enum ReplyBody {
    #[default]
    Empty,
    Text(String),
    Bytes(Bytes),
    Json(Value),
    Stream(Body),
}

/// The result of a request or view phase.
#[derive(Debug, Default)]
pub struct Reply {
    status: Option<StatusCode>,
    headers: HeaderMap,
    body: ReplyBody,
}

impl Reply {
    /// Wrap a body without declaring a status.
    pub fn new(body: ReplyBody) -> Self {
        Self {
            status: None,
            headers: HeaderMap::new(),
            body,
        }
    }

    /// Explicit empty-body success.
    pub fn empty() -> Self {
        Self::new(ReplyBody::Empty)
    }

    pub fn text(text: impl Into<String>) -> Self {
        Self::new(ReplyBody::Text(text.into()))
    }

    pub fn bytes(bytes: impl Into<Bytes>) -> Self {
        Self::new(ReplyBody::Bytes(bytes.into()))
    }

    pub fn json<T: Serialize>(value: &T) -> Result<Self, HttpError> {
        Ok(Self::new(ReplyBody::Json(serde_json::to_value(value)?)))
    }

    pub fn stream(body: Body) -> Self {
        Self::new(ReplyBody::Stream(body))
    }

    pub fn with_status(mut self, status: StatusCode) -> Self {
        self.status = Some(status);
        self
    }

    pub fn with_header<K: IntoHeaderName>(mut self, name: K, value: HeaderValue) -> Self {
        self.headers.insert(name, value);
        self
    }

    pub fn status(&self) -> Option<StatusCode> {
        self.status
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    pub fn headers_mut(&mut self) -> &mut HeaderMap {
        &mut self.headers
    }

    pub fn body(&self) -> &ReplyBody {
        &self.body
    }

    pub fn into_body(self) -> ReplyBody {
        self.body
    }

    pub(crate) fn normalized(mut self) -> Self {
        self.status.get_or_insert(StatusCode::OK);
        self
    }

    /// Render an error as a reply carrying its status and headers.
    pub fn from_error(err: &HttpError, external: bool) -> Self {
        let mut body = Map::new();
        body.insert("message".into(), Value::String(err.message().to_owned()));
        if !external {
            body.insert(
                "stack".into(),
                Value::Array(err.chain().into_iter().map(Value::String).collect()),
            );
        }
        for (key, value) in err.context() {
            body.insert(key.clone(), value.clone());
        }

        Self {
            status: Some(err.status()),
            headers: err.headers().clone(),
            body: ReplyBody::Json(Value::Object(body)),
        }
    }

    /// Convert into a transport response, filling in defaults.
    pub(crate) fn into_response(self) -> Result<Response<Body>, HttpError> {
        let Reply {
            status,
            mut headers,
            body,
        } = self;

        let (body, content_type) = match body {
            ReplyBody::Empty => (Body::empty(), None),
            ReplyBody::Text(text) => (Body::from(text), Some("text/plain; charset=utf-8")),
            ReplyBody::Bytes(bytes) => (Body::from(bytes), Some("application/octet-stream")),
            ReplyBody::Json(value) => (
                Body::from(serde_json::to_vec(&value)?),
                Some("application/json"),
            ),
            ReplyBody::Stream(body) => (body, None),
        };
        if let Some(content_type) = content_type {
            headers
                .entry(header::CONTENT_TYPE)
                .or_insert(HeaderValue::from_static(content_type));
        }

        let mut response = Response::new(body);
        *response.status_mut() = status.unwrap_or(StatusCode::OK);
        *response.headers_mut() = headers;
        Ok(response)
    }
}

impl From<&'static str> for Reply {
    fn from(text: &'static str) -> Self {
        Reply::text(text)
    }
}

impl From<String> for Reply {
    fn from(text: String) -> Self {
        Reply::text(text)
    }
}

impl From<Value> for Reply {
    fn from(value: Value) -> Self {
        Reply::new(ReplyBody::Json(value))
    }
}

impl From<Bytes> for Reply {
    fn from(bytes: Bytes) -> Self {
        Reply::bytes(bytes)
    }
}
