//! Errors that become HTTP responses.
//!
//! # Design Decisions
//! - Every error carries an optional declared status; the boundary layers
//!   default it to 500.
//! - `ErrorKind::Defect` marks contract violations (panicking layers, reused
//!   continuations). They still become 500 responses but are logged as
//!   implementation bugs.

use std::sync::Arc;

use axum::http::header::IntoHeaderName;
use axum::http::{HeaderMap, HeaderValue, Method, StatusCode};
use serde_json::{Map, Value};

use crate::pipeline::PipelineError;

/// Classification of an [`HttpError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// The router found nothing for the method and path.
    NoMatch,
    /// The router itself failed.
    NotImplemented,
    /// No body layer recognised the request body.
    UnsupportedMediaType,
    /// The body accessor was used after the raw stream was taken.
    RawAlreadyAccessed,
    /// Raised by a view or interceptor.
    Domain,
    /// Programming-contract violation.
    Defect,
}

/// An error carrying everything needed to render a response.
#[derive(Clone)]
pub struct HttpError {
    kind: ErrorKind,
    status: Option<StatusCode>,
    headers: HeaderMap,
    message: String,
    context: Map<String, Value>,
    source: Option<Arc<dyn std::error::Error + Send + Sync>>,
}

impl HttpError {
    fn build(kind: ErrorKind, status: Option<StatusCode>, message: impl Into<String>) -> Self {
        Self {
            kind,
            status,
            headers: HeaderMap::new(),
            message: message.into(),
            context: Map::new(),
            source: None,
        }
    }

    /// Domain error with a declared status.
    pub fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self::build(ErrorKind::Domain, Some(status), message)
    }

    /// Domain error without a declared status (rendered as 500).
    pub fn msg(message: impl Into<String>) -> Self {
        Self::build(ErrorKind::Domain, None, message)
    }

    /// Wrap any error as an undeclared-status domain error.
    pub fn from_error<E>(err: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        let mut out = Self::msg(err.to_string());
        out.source = Some(Arc::new(err));
        out
    }

    pub fn no_match() -> Self {
        Self::build(ErrorKind::NoMatch, Some(StatusCode::NOT_FOUND), "Not Found")
    }

    pub fn not_implemented(method: &Method, path: &str) -> Self {
        Self::build(
            ErrorKind::NotImplemented,
            Some(StatusCode::NOT_IMPLEMENTED),
            format!("\"{method} {path}\" is not implemented."),
        )
    }

    pub fn unsupported_media_type() -> Self {
        Self::build(
            ErrorKind::UnsupportedMediaType,
            Some(StatusCode::UNSUPPORTED_MEDIA_TYPE),
            "Unsupported Media Type",
        )
    }

    pub fn raw_already_accessed() -> Self {
        Self::build(
            ErrorKind::RawAlreadyAccessed,
            None,
            "Cannot read the body if \"raw\" has been accessed.",
        )
    }

    pub fn defect(message: impl Into<String>) -> Self {
        Self::build(
            ErrorKind::Defect,
            Some(StatusCode::INTERNAL_SERVER_ERROR),
            message,
        )
    }

    pub fn with_status(mut self, status: StatusCode) -> Self {
        self.status = Some(status);
        self
    }

    pub fn with_header<K: IntoHeaderName>(mut self, name: K, value: HeaderValue) -> Self {
        self.headers.insert(name, value);
        self
    }

    /// Extra fields merged into the rendered error body.
    pub fn with_context(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.context.insert(key.into(), value.into());
        self
    }

    pub fn with_source<E>(mut self, source: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        self.source = Some(Arc::new(source));
        self
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    /// Declared status, defaulting to 500.
    pub fn status(&self) -> StatusCode {
        self.status.unwrap_or(StatusCode::INTERNAL_SERVER_ERROR)
    }

    pub fn declared_status(&self) -> Option<StatusCode> {
        self.status
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn context(&self) -> &Map<String, Value> {
        &self.context
    }

    pub fn is_defect(&self) -> bool {
        self.kind == ErrorKind::Defect
    }

    /// Message followed by every source in the chain.
    pub fn chain(&self) -> Vec<String> {
        let mut chain = vec![self.message.clone()];
        let mut source = self
            .source
            .as_deref()
            .map(|err| err as &(dyn std::error::Error + 'static));
        while let Some(err) = source {
            let line = err.to_string();
            if chain.last() != Some(&line) {
                chain.push(line);
            }
            source = err.source();
        }
        chain
    }

    pub(crate) fn normalized(mut self) -> Self {
        self.status.get_or_insert(StatusCode::INTERNAL_SERVER_ERROR);
        self
    }
}

impl std::fmt::Debug for HttpError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpError")
            .field("kind", &self.kind)
            .field("status", &self.status)
            .field("message", &self.message)
            .field("source", &self.source.as_ref().map(|err| err.to_string()))
            .finish()
    }
}

impl std::fmt::Display for HttpError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.message)
    }
}

impl std::error::Error for HttpError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.source
            .as_deref()
            .map(|err| err as &(dyn std::error::Error + 'static))
    }
}

impl From<PipelineError> for HttpError {
    fn from(err: PipelineError) -> Self {
        HttpError::defect(err.to_string()).with_source(err)
    }
}

impl From<serde_json::Error> for HttpError {
    fn from(err: serde_json::Error) -> Self {
        HttpError::from_error(err)
    }
}

impl From<std::io::Error> for HttpError {
    fn from(err: std::io::Error) -> Self {
        HttpError::from_error(err)
    }
}

impl From<axum::Error> for HttpError {
    fn from(err: axum::Error) -> Self {
        HttpError::from_error(err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn undeclared_status_defaults_to_500() {
        let err = HttpError::msg("boom");
        assert_eq!(err.declared_status(), None);
        assert_eq!(err.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(
            err.normalized().declared_status(),
            Some(StatusCode::INTERNAL_SERVER_ERROR)
        );
    }

    #[test]
    fn routing_errors_map_to_404_and_501() {
        assert_eq!(HttpError::no_match().status(), StatusCode::NOT_FOUND);
        let err = HttpError::not_implemented(&Method::GET, "/x");
        assert_eq!(err.status(), StatusCode::NOT_IMPLEMENTED);
        assert_eq!(err.message(), "\"GET /x\" is not implemented.");
        assert_eq!(err.kind(), ErrorKind::NotImplemented);
    }

    #[test]
    fn reused_continuation_is_a_defect() {
        let err = HttpError::from(PipelineError::NextAlreadyCalled);
        assert!(err.is_defect());
        assert_eq!(err.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn chain_lists_sources() {
        let io = std::io::Error::new(std::io::ErrorKind::Other, "disk on fire");
        let err = HttpError::new(StatusCode::BAD_GATEWAY, "upstream failed").with_source(io);
        assert_eq!(err.chain(), vec!["upstream failed", "disk on fire"]);
    }
}
