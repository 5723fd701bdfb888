//! Raw request bytes alongside (or instead of) the parsed body.
//!
//! The layer buffers the inbound stream, stores the bytes on the request and
//! hands a replayable stream to the next body layer. As the final layer it
//! resolves the body to the bytes itself.

use std::sync::Arc;

use axum::body::Bytes;

use crate::http::body::DEFAULT_BODY_LIMIT;
use crate::http::{body_layer, BodyStream, BodyValue, HttpError, Interceptor, Phases, Request};

#[derive(Debug, Clone)]
struct RawBytes(Bytes);

pub struct RawBody {
    final_layer: bool,
    limit: usize,
}

impl RawBody {
    pub fn new(final_layer: bool) -> Self {
        Self {
            final_layer,
            limit: DEFAULT_BODY_LIMIT,
        }
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = limit;
        self
    }

    /// The request's raw bytes. Runs the body pipeline if nothing has yet;
    /// a failure further down the pipeline does not hide bytes already read.
    pub async fn bytes(req: &Arc<Request>) -> Result<Bytes, HttpError> {
        if let Some(RawBytes(bytes)) = req.get::<RawBytes>() {
            return Ok(bytes);
        }
        let parsed = req.body().await;
        match (req.get::<RawBytes>(), parsed) {
            (Some(RawBytes(bytes)), _) => Ok(bytes),
            (None, Err(err)) => Err(err),
            (None, Ok(_)) => Err(HttpError::msg(
                "raw body is unavailable: no raw body layer ran for this request",
            )),
        }
    }
}

impl Interceptor for RawBody {
    fn name(&self) -> &str {
        "body-raw"
    }

    fn phases(self: Arc<Self>) -> Phases {
        Phases::new().on_body(body_layer(move |(req, stream), next| {
            let final_layer = self.final_layer;
            let limit = self.limit;
            async move {
                let bytes = stream.collect(limit).await?;
                req.insert(RawBytes(bytes.clone()));
                if final_layer {
                    return Ok(BodyValue::Bytes(bytes));
                }
                next.run((req, BodyStream::from_bytes(bytes))).await
            }
        }))
    }
}
