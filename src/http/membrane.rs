//! Boundary layers inserted around every interceptor's request and view
//! layer.
//!
//! Each membrane awaits the rest of the chain and hands back a uniformly
//! shaped result: replies carry a status (200 unless declared), errors carry
//! a status (500 unless declared), and a panic anywhere inside becomes a
//! defect error instead of unwinding through the orchestrator.

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures_util::FutureExt;

use super::interceptor::{request_layer, view_layer, RequestLayer, ViewLayer};
use super::{HttpError, Reply};

fn settle(outcome: Result<Result<Reply, HttpError>, Box<dyn Any + Send>>) -> Result<Reply, HttpError> {
    match outcome {
        Ok(Ok(reply)) => Ok(reply.normalized()),
        Ok(Err(err)) => Err(err.normalized()),
        Err(panic) => {
            let detail = panic
                .downcast_ref::<&str>()
                .map(|msg| (*msg).to_owned())
                .or_else(|| panic.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "non-string panic payload".to_owned());
            tracing::error!(panic = %detail, "Layer panicked; this is an implementation defect");
            Err(HttpError::defect(format!("layer panicked: {detail}")))
        }
    }
}

pub(crate) fn request_membrane() -> RequestLayer {
    Arc::new(request_layer(|req, next| {
        AssertUnwindSafe(async move { next.run(req).await })
            .catch_unwind()
            .map(settle)
    }))
}

pub(crate) fn view_membrane() -> ViewLayer {
    Arc::new(view_layer(|args, next| {
        AssertUnwindSafe(async move { next.run(args).await })
            .catch_unwind()
            .map(settle)
    }))
}
