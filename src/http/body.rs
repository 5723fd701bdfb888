//! Request body streams, materialised bodies and response completion.

use std::pin::Pin;
use std::sync::{Mutex, PoisonError};
use std::task::{Context, Poll};

use axum::body::{Body, Bytes, HttpBody};
use axum::http::StatusCode;
use futures_util::StreamExt;
use http_body::{Frame, SizeHint};
use serde_json::Value;

use super::HttpError;

/// Default cap when a body layer buffers the whole stream.
pub const DEFAULT_BODY_LIMIT: usize = 1024 * 1024;

/// The raw inbound body handed through the body pipeline.
#[derive(Debug)]
pub struct BodyStream {
    body: Body,
}

impl BodyStream {
    pub fn new(body: Body) -> Self {
        Self { body }
    }

    pub fn from_bytes(bytes: Bytes) -> Self {
        Self {
            body: Body::from(bytes),
        }
    }

    /// Buffer the stream. Past `limit` bytes this fails with 413; a stream
    /// that breaks off (client gone, bad framing) fails with 400.
    pub async fn collect(self, limit: usize) -> Result<Bytes, HttpError> {
        let too_large = || HttpError::new(StatusCode::PAYLOAD_TOO_LARGE, "Request body too large");
        if self.body.size_hint().lower() > limit as u64 {
            return Err(too_large());
        }

        let mut buffer = Vec::new();
        let mut chunks = self.body.into_data_stream();
        while let Some(chunk) = chunks.next().await {
            let chunk = chunk.map_err(|err| {
                HttpError::new(StatusCode::BAD_REQUEST, "Request body could not be read")
                    .with_source(err)
            })?;
            if buffer.len() + chunk.len() > limit {
                return Err(too_large());
            }
            buffer.extend_from_slice(&chunk);
        }
        Ok(Bytes::from(buffer))
    }

    pub fn into_body(self) -> Body {
        self.body
    }
}

/// A request body after the body pipeline has run.
#[derive(Debug, Clone, PartialEq)]
pub enum BodyValue {
    Json(Value),
    Text(String),
    Bytes(Bytes),
}

impl BodyValue {
    pub fn as_json(&self) -> Option<&Value> {
        match self {
            BodyValue::Json(value) => Some(value),
            _ => None,
        }
    }

    pub fn as_bytes(&self) -> &[u8] {
        match self {
            BodyValue::Json(_) => &[],
            BodyValue::Text(text) => text.as_bytes(),
            BodyValue::Bytes(bytes) => bytes,
        }
    }
}

/// How a response ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Settled {
    /// Every body byte was handed to the transport.
    Finished,
    /// The transport dropped the body before the end.
    Closed,
}

/// Notified as an outbound body is written.
pub(crate) trait ResponseObserver: Send {
    fn on_error(&self, err: &axum::Error);
    fn on_settle(self: Box<Self>, settled: Settled);
}

/// Wraps an outbound body and reports whichever of finish/close comes first.
/// Size hints pass through, so fixed-size replies keep their
/// `Content-Length`.
pub(crate) struct Completion {
    inner: Body,
    observer: Mutex<Option<Box<dyn ResponseObserver>>>,
}

impl Completion {
    pub(crate) fn wrap(body: Body, observer: Box<dyn ResponseObserver>) -> Body {
        Body::new(Completion {
            inner: body,
            observer: Mutex::new(Some(observer)),
        })
    }

    fn settle(&self, settled: Settled) {
        let observer = self
            .observer
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(observer) = observer {
            observer.on_settle(settled);
        }
    }
}

impl HttpBody for Completion {
    type Data = Bytes;
    type Error = axum::Error;

    fn poll_frame(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Option<Result<Frame<Bytes>, axum::Error>>> {
        let polled = Pin::new(&mut self.inner).poll_frame(cx);
        match &polled {
            Poll::Ready(None) => self.settle(Settled::Finished),
            Poll::Ready(Some(Ok(_))) if self.inner.is_end_stream() => {
                self.settle(Settled::Finished)
            }
            Poll::Ready(Some(Err(err))) => {
                let observer = self.observer.lock().unwrap_or_else(PoisonError::into_inner);
                if let Some(observer) = observer.as_ref() {
                    observer.on_error(err);
                }
            }
            _ => {}
        }
        polled
    }

    // The transport stops polling once this is true.
    fn is_end_stream(&self) -> bool {
        let ended = self.inner.is_end_stream();
        if ended {
            self.settle(Settled::Finished);
        }
        ended
    }

    fn size_hint(&self) -> SizeHint {
        self.inner.size_hint()
    }
}

impl Drop for Completion {
    fn drop(&mut self) {
        self.settle(Settled::Closed);
    }
}
