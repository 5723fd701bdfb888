//! Interceptors and the phase families they can join.
//!
//! An interceptor declares, per family, at most one layer. The orchestrator
//! collects them in registration order when it builds its pipelines.

use std::future::Future;
use std::sync::Arc;

use super::body::{BodyStream, BodyValue};
use super::{HttpError, Reply, Request, Server};
use crate::pipeline::{phase_fn, Next, Phase, PhaseFn, Pipeline};
use crate::routing::{Context, RouteMatch};
use crate::testing::{Suite, Testcase};
use crate::Error;

pub type ViewArgs = (Arc<Request>, Arc<RouteMatch>, Arc<Context>);
pub type BodyArgs = (Arc<Request>, BodyStream);

pub type ServerLayer = Arc<dyn Phase<Server, (), Error>>;
pub type RequestLayer = Arc<dyn Phase<Arc<Request>, Reply, HttpError>>;
pub type ViewLayer = Arc<dyn Phase<ViewArgs, Reply, HttpError>>;
pub type BodyLayer = Arc<dyn Phase<BodyArgs, BodyValue, HttpError>>;
pub type SuiteLayer = Arc<dyn Phase<Suite, (), Error>>;
pub type TestcaseLayer = Arc<dyn Phase<Testcase, (), Error>>;

pub type ServerPipeline = Pipeline<Server, (), Error>;
pub type RequestPipeline = Pipeline<Arc<Request>, Reply, HttpError>;
pub type ViewPipeline = Pipeline<ViewArgs, Reply, HttpError>;
pub type BodyPipeline = Pipeline<BodyArgs, BodyValue, HttpError>;

pub type ServerNext = Next<Server, (), Error>;
pub type RequestNext = Next<Arc<Request>, Reply, HttpError>;
pub type ViewNext = Next<ViewArgs, Reply, HttpError>;
pub type BodyNext = Next<BodyArgs, BodyValue, HttpError>;
pub type SuiteNext = Next<Suite, (), Error>;
pub type TestcaseNext = Next<Testcase, (), Error>;

/// [`phase_fn`] with the argument types of the server family filled in.
pub fn server_layer<F, Fut>(f: F) -> PhaseFn<F>
where
    F: Fn(Server, ServerNext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), Error>> + Send + 'static,
{
    phase_fn(f)
}

pub fn request_layer<F, Fut>(f: F) -> PhaseFn<F>
where
    F: Fn(Arc<Request>, RequestNext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Reply, HttpError>> + Send + 'static,
{
    phase_fn(f)
}

pub fn view_layer<F, Fut>(f: F) -> PhaseFn<F>
where
    F: Fn(ViewArgs, ViewNext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Reply, HttpError>> + Send + 'static,
{
    phase_fn(f)
}

pub fn body_layer<F, Fut>(f: F) -> PhaseFn<F>
where
    F: Fn(BodyArgs, BodyNext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<BodyValue, HttpError>> + Send + 'static,
{
    phase_fn(f)
}

pub fn suite_layer<F, Fut>(f: F) -> PhaseFn<F>
where
    F: Fn(Suite, SuiteNext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), Error>> + Send + 'static,
{
    phase_fn(f)
}

pub fn testcase_layer<F, Fut>(f: F) -> PhaseFn<F>
where
    F: Fn(Testcase, TestcaseNext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), Error>> + Send + 'static,
{
    phase_fn(f)
}

/// The layers one interceptor contributes.
#[derive(Clone, Default)]
pub struct Phases {
    pub server: Option<ServerLayer>,
    pub request: Option<RequestLayer>,
    pub view: Option<ViewLayer>,
    pub body: Option<BodyLayer>,
    pub suite: Option<SuiteLayer>,
    pub testcase: Option<TestcaseLayer>,
}

impl Phases {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on_server(mut self, layer: impl Phase<Server, (), Error>) -> Self {
        self.server = Some(Arc::new(layer));
        self
    }

    pub fn on_request(mut self, layer: impl Phase<Arc<Request>, Reply, HttpError>) -> Self {
        self.request = Some(Arc::new(layer));
        self
    }

    pub fn on_view(mut self, layer: impl Phase<ViewArgs, Reply, HttpError>) -> Self {
        self.view = Some(Arc::new(layer));
        self
    }

    pub fn on_body(mut self, layer: impl Phase<BodyArgs, BodyValue, HttpError>) -> Self {
        self.body = Some(Arc::new(layer));
        self
    }

    pub fn on_suite(mut self, layer: impl Phase<Suite, (), Error>) -> Self {
        self.suite = Some(Arc::new(layer));
        self
    }

    pub fn on_testcase(mut self, layer: impl Phase<Testcase, (), Error>) -> Self {
        self.testcase = Some(Arc::new(layer));
        self
    }
}

impl std::fmt::Debug for Phases {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Phases")
            .field("server", &self.server.is_some())
            .field("request", &self.request.is_some())
            .field("view", &self.view.is_some())
            .field("body", &self.body.is_some())
            .field("suite", &self.suite.is_some())
            .field("testcase", &self.testcase.is_some())
            .finish()
    }
}

/// A participant in the server's pipelines.
pub trait Interceptor: Send + Sync + 'static {
    fn name(&self) -> &str;

    /// Layers to install. Called every time the pipelines are rebuilt.
    fn phases(self: Arc<Self>) -> Phases;
}

/// An interceptor assembled from ready-made layers.
pub struct FnInterceptor {
    name: String,
    phases: Phases,
}

pub fn interceptor(name: impl Into<String>, phases: Phases) -> Arc<dyn Interceptor> {
    Arc::new(FnInterceptor {
        name: name.into(),
        phases,
    })
}

impl Interceptor for FnInterceptor {
    fn name(&self) -> &str {
        &self.name
    }

    fn phases(self: Arc<Self>) -> Phases {
        self.phases.clone()
    }
}
