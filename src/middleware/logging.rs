//! Request logging.
//!
//! Logs one line per request once the rest of the chain has produced a reply
//! or an error. Failures with a 5xx status are logged at error level; the
//! error itself is passed on untouched.

use std::sync::Arc;

use axum::http::StatusCode;

use crate::http::{request_layer, server_layer, HttpError, Interceptor, Phases, Reply, Request};

pub struct Logging {
    development: bool,
}

impl Logging {
    pub fn new(development: bool) -> Self {
        Self { development }
    }
}

impl Interceptor for Logging {
    fn name(&self) -> &str {
        "logging"
    }

    fn phases(self: Arc<Self>) -> Phases {
        let development = self.development;
        Phases::new()
            .on_server(server_layer(|server, next| async move {
                let name = server.name().to_owned();
                tracing::info!(server = %name, "Server pipeline up");
                let out = next.run(server).await;
                tracing::info!(server = %name, ok = out.is_ok(), "Server pipeline down");
                out
            }))
            .on_request(request_layer(move |req, next| async move {
                let out = next.run(Arc::clone(&req)).await;
                log_outcome(&req, &out, development);
                out
            }))
    }
}

fn log_outcome(req: &Request, out: &Result<Reply, HttpError>, development: bool) {
    let ip = req
        .remote_addr()
        .map(|addr| addr.ip().to_string())
        .unwrap_or_default();
    let url = req
        .url()
        .map(|url| url.to_string())
        .unwrap_or_else(|| req.uri().to_string());
    let latency_ms = req.latency().as_millis() as u64;

    match out {
        Ok(reply) => {
            let status = reply.status().unwrap_or(StatusCode::OK).as_u16();
            tracing::info!(
                request_id = %req.id(),
                ip = %ip,
                url = %url,
                method = %req.method(),
                status,
                latency_ms,
                "Request"
            );
        }
        Err(err) if err.status().is_server_error() => {
            tracing::error!(
                request_id = %req.id(),
                ip = %ip,
                url = %url,
                method = %req.method(),
                status = err.status().as_u16(),
                latency_ms,
                error = %err,
                chain = ?err.chain(),
                "Request failed"
            );
        }
        Err(err) => {
            // Client errors are routine outside development.
            if development {
                tracing::info!(
                    request_id = %req.id(),
                    ip = %ip,
                    url = %url,
                    method = %req.method(),
                    status = err.status().as_u16(),
                    latency_ms,
                    error = %err,
                    "Request rejected"
                );
            } else {
                tracing::debug!(
                    request_id = %req.id(),
                    method = %req.method(),
                    status = err.status().as_u16(),
                    error = %err,
                    "Request rejected"
                );
            }
        }
    }
}
