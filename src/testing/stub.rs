//! Per-testcase stand-ins for request-scoped collaborators.

use std::future::Future;
use std::sync::Arc;

use arc_swap::ArcSwap;
use futures_util::future::BoxFuture;

use crate::http::interceptor::{request_layer, testcase_layer};
use crate::http::{Interceptor, Phases, Request};

type Cleanup = Arc<dyn Fn() -> BoxFuture<'static, ()> + Send + Sync>;

/// Hands every request an `Arc<T>`. A test case may swap the value with
/// [`StubInterceptor::replace`]; the original comes back, and the cleanup
/// runs, once the test case ends, pass or fail.
pub struct StubInterceptor<T> {
    name: String,
    original: Arc<T>,
    current: ArcSwap<T>,
    cleanup: Option<Cleanup>,
}

impl<T: Send + Sync + 'static> StubInterceptor<T> {
    pub fn new(name: impl Into<String>, value: T) -> Self {
        let original = Arc::new(value);
        Self {
            name: name.into(),
            current: ArcSwap::new(Arc::clone(&original)),
            original,
            cleanup: None,
        }
    }

    pub fn with_cleanup<F, Fut>(mut self, cleanup: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.cleanup = Some(Arc::new(move || Box::pin(cleanup())));
        self
    }

    /// Serve `value` to requests until the current test case ends.
    pub fn replace(&self, value: T) {
        self.current.store(Arc::new(value));
    }

    pub fn current(&self) -> Arc<T> {
        self.current.load_full()
    }

    /// The value the stub handed to `req`.
    pub fn lookup(req: &Request) -> Option<Arc<T>> {
        req.get::<Arc<T>>()
    }

    async fn restore(&self) {
        self.current.store(Arc::clone(&self.original));
        if let Some(cleanup) = &self.cleanup {
            cleanup().await;
        }
        tracing::trace!(stub = %self.name, "Stub restored");
    }
}

impl<T: Send + Sync + 'static> Interceptor for StubInterceptor<T> {
    fn name(&self) -> &str {
        &self.name
    }

    fn phases(self: Arc<Self>) -> Phases {
        let testcase = Arc::clone(&self);
        Phases::new()
            .on_request(request_layer(move |req, next| {
                req.insert(self.current());
                next.run(req)
            }))
            .on_testcase(testcase_layer(move |case, next| {
                let stub = Arc::clone(&testcase);
                async move {
                    let out = next.run(case).await;
                    stub.restore().await;
                    out
                }
            }))
    }
}
