//! Warns about requests that take suspiciously long to produce a reply.

use std::sync::Arc;
use std::time::Duration;

use crate::http::{request_layer, Interceptor, Phases};

pub const DEFAULT_STALL_TIMEOUT: Duration = Duration::from_millis(1000);

/// Request layer that logs a warning, once, when the rest of the chain has
/// not answered within `timeout`. The request itself is never cut short.
pub struct StallCheck {
    timeout: Duration,
}

impl StallCheck {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }
}

impl Default for StallCheck {
    fn default() -> Self {
        Self::new(DEFAULT_STALL_TIMEOUT)
    }
}

impl Interceptor for StallCheck {
    fn name(&self) -> &str {
        "stall-check"
    }

    fn phases(self: Arc<Self>) -> Phases {
        Phases::new().on_request(request_layer(move |req, next| {
            let timeout = self.timeout;
            async move {
                let work = next.run(Arc::clone(&req));
                tokio::pin!(work);
                tokio::select! {
                    out = &mut work => return out,
                    _ = tokio::time::sleep(timeout) => {}
                }
                tracing::warn!(
                    request_id = %req.id(),
                    method = %req.method(),
                    path = %req.path(),
                    state = ?req.state(),
                    view = %req.view_name().unwrap_or_default(),
                    stall_timeout_ms = timeout.as_millis() as u64,
                    "Possible stall"
                );
                work.await
            }
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::{Reply, Server, ServerOptions};
    use crate::routing::{view_fn, Routes};
    use axum::body::Body;
    use axum::http::{Method, StatusCode};
    use std::io::Write;
    use std::sync::Mutex;
    use tracing::Level;
    use tracing_subscriber::fmt::MakeWriter;

    #[derive(Clone, Default)]
    struct LogBuffer(Arc<Mutex<Vec<u8>>>);

    impl LogBuffer {
        fn contents(&self) -> String {
            String::from_utf8(self.0.lock().unwrap().clone()).unwrap()
        }
    }

    impl<'a> MakeWriter<'a> for LogBuffer {
        type Writer = LogBuffer;

        fn make_writer(&'a self) -> Self::Writer {
            self.clone()
        }
    }

    impl Write for LogBuffer {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    fn server() -> Server {
        let routes = Routes::new()
            .route(
                Method::GET,
                "/slow",
                "slow",
                view_fn(|_req, _ctx| async {
                    tokio::time::sleep(Duration::from_secs(5)).await;
                    Ok(Some(Reply::text("late")))
                }),
            )
            .route(
                Method::GET,
                "/fast",
                "fast",
                view_fn(|_req, _ctx| async { Ok(Some(Reply::text("quick"))) }),
            );
        Server::new(
            "test",
            Arc::new(routes),
            vec![Arc::new(StallCheck::new(Duration::from_millis(10))) as Arc<dyn Interceptor>],
            ServerOptions::default(),
        )
    }

    fn get(path: &str) -> axum::http::Request<Body> {
        axum::http::Request::builder()
            .uri(path)
            .body(Body::empty())
            .unwrap()
    }

    #[tokio::test(start_paused = true)]
    async fn slow_request_warns_once_and_still_completes() {
        let logs = LogBuffer::default();
        let subscriber = tracing_subscriber::fmt()
            .with_writer(logs.clone())
            .with_max_level(Level::WARN)
            .with_ansi(false)
            .finish();
        let _default = tracing::subscriber::set_default(subscriber);

        let server = server();
        let response = server.handle(get("/fast")).await;
        assert_eq!(response.status(), StatusCode::OK);
        assert!(!logs.contents().contains("Possible stall"));

        let response = server.handle(get("/slow")).await;
        assert_eq!(response.status(), StatusCode::OK);

        let output = logs.contents();
        assert_eq!(output.matches("Possible stall").count(), 1);
        assert!(output.contains("path=/slow"));
        assert!(output.contains("stall_timeout_ms=10"));
    }
}
