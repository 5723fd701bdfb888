//! A swappable function every request passes through before the rest of
//! the request pipeline.

use std::future::Future;
use std::sync::Arc;

use arc_swap::ArcSwap;
use futures_util::future::{self, BoxFuture};

use crate::http::interceptor::{request_layer, testcase_layer};
use crate::http::{HttpError, Interceptor, Phases, Request};

type HookFuture = BoxFuture<'static, Result<(), HttpError>>;
type HookFn = Box<dyn Fn(Arc<Request>) -> HookFuture + Send + Sync>;

fn noop() -> Arc<HookFn> {
    let hook: HookFn =
        Box::new(|_req: Arc<Request>| -> HookFuture { Box::pin(future::ready(Ok(()))) });
    Arc::new(hook)
}

/// Runs the installed hook on each request, then continues. An error from
/// the hook becomes the response. Every test case starts with a no-op hook.
pub struct RequestHook {
    hook: ArcSwap<HookFn>,
}

impl RequestHook {
    pub fn new() -> Self {
        Self {
            hook: ArcSwap::new(noop()),
        }
    }

    pub fn set<F, Fut>(&self, hook: F)
    where
        F: Fn(Arc<Request>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), HttpError>> + Send + 'static,
    {
        let hook: HookFn =
            Box::new(move |req: Arc<Request>| -> HookFuture { Box::pin(hook(req)) });
        self.hook.store(Arc::new(hook));
    }

    pub fn reset(&self) {
        self.hook.store(noop());
    }
}

impl Default for RequestHook {
    fn default() -> Self {
        Self::new()
    }
}

impl Interceptor for RequestHook {
    fn name(&self) -> &str {
        "request-hook"
    }

    fn phases(self: Arc<Self>) -> Phases {
        let testcase = Arc::clone(&self);
        Phases::new()
            .on_request(request_layer(move |req, next| {
                let hook = self.hook.load_full();
                async move {
                    (**hook)(Arc::clone(&req)).await?;
                    next.run(req).await
                }
            }))
            .on_testcase(testcase_layer(move |case, next| {
                testcase.reset();
                next.run(case)
            }))
    }
}
