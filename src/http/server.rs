//! The request lifecycle orchestrator.
//!
//! # Responsibilities
//! - Build the server, request, view and body pipelines from the installed
//!   interceptors, with boundary layers around every request/view layer
//! - Run the server pipeline for the server's lifetime; reinstalling
//!   interceptors awaits the previous teardown before starting again
//! - Bind every inbound request to a fresh session and façade, route it,
//!   dispatch the view and emit the response
//! - Settle each request when its response finishes or the transport drops
//!   it, then tear the session down unconditionally
//!
//! # Design Decisions
//! - Pipelines and the router sit behind `ArcSwap`; in-flight requests keep
//!   the generation they started with
//! - Error bodies carry a `stack` and responses a `request-id` header only
//!   when the server is not external
//! - Transport failures while streaming a response go to a broadcast channel,
//!   never into a response

use std::future::Future;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwap;
use axum::body::Body;
use axum::extract::State;
use axum::http::{HeaderName, HeaderValue, StatusCode};
use axum::response::Response;
use tokio::net::TcpListener;
use tokio::sync::{broadcast, watch, Mutex};
use tokio::task::JoinHandle;
use tower_http::{timeout::TimeoutLayer, trace::TraceLayer};

use super::body::{Completion, ResponseObserver, Settled};
use super::interceptor::{
    BodyPipeline, Interceptor, RequestPipeline, ServerPipeline, ViewArgs, ViewPipeline,
};
use super::membrane::{request_membrane, view_membrane};
use super::request::{RequestSetup, RequestState};
use super::{HttpError, Reply, Request};
use crate::observability::metrics;
use crate::pipeline::Pipeline;
use crate::routing::RouteTable;
use crate::session::{self, Session, SessionGuard};
use crate::Error;

/// Request-id header added to responses of non-external servers.
pub const REQUEST_ID: &str = "request-id";

/// Settings the orchestrator consumes.
#[derive(Debug, Clone)]
pub struct ServerOptions {
    /// Hide error stacks and the request-id header.
    pub is_external: bool,
    pub development: bool,
    pub metrics_enabled: bool,
    /// Headers consulted, in order, for an incoming request id.
    pub request_id_headers: Vec<HeaderName>,
    pub request_timeout: Duration,
}

impl Default for ServerOptions {
    fn default() -> Self {
        Self {
            is_external: false,
            development: false,
            metrics_enabled: false,
            request_id_headers: vec![HeaderName::from_static(REQUEST_ID)],
            request_timeout: Duration::from_secs(30),
        }
    }
}

/// A response body failed after the response had started.
#[derive(Debug, Clone)]
pub struct TransportError {
    pub request_id: String,
    pub message: String,
}

struct RouterSlot(Arc<dyn RouteTable>);

struct Pipelines {
    generation: u64,
    server: ServerPipeline,
    request: RequestPipeline,
    body: BodyPipeline,
}

struct Running {
    generation: u64,
    task: JoinHandle<Result<(), Error>>,
}

struct Inner {
    name: String,
    options: ServerOptions,
    id_headers: Arc<[HeaderName]>,
    router: ArcSwap<RouterSlot>,
    interceptors: ArcSwap<Vec<Arc<dyn Interceptor>>>,
    pipelines: ArcSwap<Pipelines>,
    generation: AtomicU64,
    running: Mutex<Option<Running>>,
    uninstalled: watch::Sender<u64>,
    ready: watch::Sender<u64>,
    transport_closed: watch::Sender<bool>,
    transport_errors: broadcast::Sender<TransportError>,
}

/// Handle to the orchestrator. Clones share state.
#[derive(Clone)]
pub struct Server {
    inner: Arc<Inner>,
}

impl Server {
    pub fn new(
        name: impl Into<String>,
        router: Arc<dyn RouteTable>,
        interceptors: Vec<Arc<dyn Interceptor>>,
        options: ServerOptions,
    ) -> Self {
        let pipelines = build_pipelines(1, &interceptors);
        let (transport_errors, _) = broadcast::channel(64);
        Self {
            inner: Arc::new(Inner {
                name: name.into(),
                id_headers: options.request_id_headers.clone().into(),
                options,
                router: ArcSwap::from_pointee(RouterSlot(router)),
                interceptors: ArcSwap::from_pointee(interceptors),
                pipelines: ArcSwap::from_pointee(pipelines),
                generation: AtomicU64::new(1),
                running: Mutex::new(None),
                uninstalled: watch::channel(0).0,
                ready: watch::channel(0).0,
                transport_closed: watch::channel(false).0,
                transport_errors,
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    pub fn options(&self) -> &ServerOptions {
        &self.inner.options
    }

    pub fn router(&self) -> Arc<dyn RouteTable> {
        Arc::clone(&self.inner.router.load().0)
    }

    /// Replace the router for requests accepted from now on.
    pub fn set_router(&self, router: Arc<dyn RouteTable>) {
        self.inner.router.store(Arc::new(RouterSlot(router)));
    }

    pub fn interceptors(&self) -> Arc<Vec<Arc<dyn Interceptor>>> {
        self.inner.interceptors.load_full()
    }

    pub fn transport_errors(&self) -> broadcast::Receiver<TransportError> {
        self.inner.transport_errors.subscribe()
    }

    /// Start the server pipeline if the current generation is not running.
    pub async fn start(&self) {
        let mut running = self.inner.running.lock().await;
        self.install(&mut running).await;
    }

    /// Resolves once the current server pipeline has reached its terminal.
    pub async fn ready(&self) {
        let target = self.inner.pipelines.load().generation;
        let mut ready = self.inner.ready.subscribe();
        let _ = ready.wait_for(|generation| *generation >= target).await;
    }

    /// Rebuild every pipeline from `interceptors` and restart the server
    /// pipeline once the previous one has torn down.
    pub async fn set_interceptors(&self, interceptors: Vec<Arc<dyn Interceptor>>) {
        let mut running = self.inner.running.lock().await;
        let generation = self.inner.generation.fetch_add(1, Ordering::AcqRel) + 1;
        self.inner
            .pipelines
            .store(Arc::new(build_pipelines(generation, &interceptors)));
        self.inner.interceptors.store(Arc::new(interceptors));
        self.install(&mut running).await;
    }

    async fn install(&self, running: &mut Option<Running>) {
        let pipelines = self.inner.pipelines.load_full();
        if let Some(previous) = running.take() {
            if previous.generation == pipelines.generation && !previous.task.is_finished() {
                *running = Some(previous);
                return;
            }
            self.inner.uninstalled.send_replace(previous.generation);
            match previous.task.await {
                Ok(Ok(())) => {}
                Ok(Err(err)) => tracing::warn!(
                    server = %self.name(),
                    generation = previous.generation,
                    error = %err,
                    "Server pipeline failed during teardown"
                ),
                Err(err) => tracing::error!(
                    server = %self.name(),
                    generation = previous.generation,
                    error = %err,
                    "Server pipeline task aborted"
                ),
            }
        }

        let server = self.clone();
        let generation = pipelines.generation;
        tracing::debug!(server = %self.name(), generation, "Starting server pipeline");
        *running = Some(Running {
            generation,
            task: tokio::spawn(async move { pipelines.server.call(server).await }),
        });
    }

    /// Server pipeline terminal: ready now, resolve when uninstalled or the
    /// transport closes.
    async fn hold(self, generation: u64) -> Result<(), Error> {
        self.inner.ready.send_replace(generation);
        tracing::debug!(server = %self.name(), generation, "Server pipeline ready");

        let mut uninstalled = self.inner.uninstalled.subscribe();
        let mut closed = self.inner.transport_closed.subscribe();
        tokio::select! {
            _ = uninstalled.wait_for(|done| *done >= generation) => {}
            _ = closed.wait_for(|closed| *closed) => {}
        }
        Ok(())
    }

    /// Mark the transport closed and wait for the server pipeline to tear
    /// down.
    pub async fn close(&self) -> Result<(), Error> {
        self.inner.transport_closed.send_replace(true);
        let mut running = self.inner.running.lock().await;
        match running.take() {
            Some(previous) => previous.task.await?,
            None => Ok(()),
        }
    }

    /// The axum application: every request falls through to the
    /// orchestrator.
    #[allow(deprecated)]
    pub fn app(&self) -> axum::Router {
        axum::Router::new()
            .fallback(dispatch_handler)
            .with_state(self.clone())
            .layer(TimeoutLayer::new(self.inner.options.request_timeout))
            .layer(TraceLayer::new_for_http())
    }

    /// Serve `listener` until `shutdown` resolves, then close the transport
    /// and await the server pipeline's teardown. Connections are accepted
    /// once the server pipeline is ready.
    pub async fn serve<F>(&self, listener: TcpListener, shutdown: F) -> Result<(), Error>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let addr = listener.local_addr()?;
        tracing::info!(server = %self.name(), address = %addr, "HTTP server starting");

        self.start().await;
        self.ready().await;
        let app = self.app().into_make_service_with_connect_info::<SocketAddr>();
        let served = axum::serve(listener, app)
            .with_graceful_shutdown(shutdown)
            .await;

        self.close().await?;
        tracing::info!(server = %self.name(), "HTTP server stopped");
        served.map_err(Error::from)
    }

    /// Run one request through the request pipeline and build its response.
    pub async fn handle(&self, raw: axum::http::Request<Body>) -> Response<Body> {
        session::tracked(self.clone().dispatch(raw)).await
    }

    async fn dispatch(self, raw: axum::http::Request<Body>) -> Response<Body> {
        let guard = SessionGuard::new(Session::start());
        let pipelines = self.inner.pipelines.load_full();
        let req = Arc::new(Request::new(
            raw,
            RequestSetup {
                router: self.router(),
                body: pipelines.body.clone(),
                id_headers: Arc::clone(&self.inner.id_headers),
                session: guard.session().clone(),
            },
        ));
        guard.session().insert(Arc::clone(&req));

        tracing::debug!(
            request_id = %req.id(),
            method = %req.method(),
            path = %req.path(),
            session = %guard.session().id(),
            generation = pipelines.generation,
            "Request accepted"
        );

        let reply = match pipelines.request.call(Arc::clone(&req)).await {
            Ok(reply) => reply,
            Err(err) => self.error_reply(&req, err),
        };

        req.set_state(RequestState::Responding);
        let mut response = self.emit(&req, reply);
        let status = response.status();
        let body = std::mem::take(response.body_mut());
        *response.body_mut() = Completion::wrap(
            body,
            Box::new(Settlement {
                server: self,
                req,
                status,
                _guard: guard,
            }),
        );
        response
    }

    fn error_reply(&self, req: &Request, err: HttpError) -> Reply {
        req.set_state(RequestState::Error);
        if err.is_defect() {
            tracing::error!(
                request_id = %req.id(),
                error = %err,
                chain = ?err.chain(),
                "Implementation defect while handling request"
            );
        } else {
            tracing::debug!(
                request_id = %req.id(),
                status = err.status().as_u16(),
                error = %err,
                "Request failed"
            );
        }
        Reply::from_error(&err, self.inner.options.is_external)
    }

    fn emit(&self, req: &Request, reply: Reply) -> Response<Body> {
        let mut response = match reply.into_response() {
            Ok(response) => response,
            Err(err) => {
                let fallback = self.error_reply(req, err.normalized());
                fallback.into_response().unwrap_or_else(|_| {
                    let mut response = Response::new(Body::empty());
                    *response.status_mut() = StatusCode::INTERNAL_SERVER_ERROR;
                    response
                })
            }
        };

        if !self.inner.options.is_external {
            if let Ok(id) = HeaderValue::from_str(req.id()) {
                response
                    .headers_mut()
                    .insert(HeaderName::from_static(REQUEST_ID), id);
            }
        }
        response
    }

    fn report_transport_error(&self, req: &Request, err: &axum::Error) {
        tracing::warn!(request_id = %req.id(), error = %err, "Response stream failed");
        if self.inner.options.metrics_enabled {
            metrics::record_transport_error();
        }
        let _ = self.inner.transport_errors.send(TransportError {
            request_id: req.id().to_owned(),
            message: err.to_string(),
        });
    }
}

impl std::fmt::Debug for Server {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Server")
            .field("name", &self.inner.name)
            .field("generation", &self.inner.pipelines.load().generation)
            .finish_non_exhaustive()
    }
}

async fn dispatch_handler(
    State(server): State<Server>,
    request: axum::extract::Request,
) -> Response<Body> {
    server.handle(request).await
}

/// Completes a request once its response body is done with.
struct Settlement {
    server: Server,
    req: Arc<Request>,
    status: StatusCode,
    _guard: SessionGuard,
}

impl ResponseObserver for Settlement {
    fn on_error(&self, err: &axum::Error) {
        self.server.report_transport_error(&self.req, err);
    }

    fn on_settle(self: Box<Self>, settled: Settled) {
        self.req.set_state(RequestState::Done);
        let view = self.req.view_name().unwrap_or_default();
        if self.server.inner.options.metrics_enabled {
            metrics::record_request(
                self.req.method().as_str(),
                self.status.as_u16(),
                &view,
                self.req.start(),
            );
        }
        tracing::debug!(
            request_id = %self.req.id(),
            status = self.status.as_u16(),
            view = %view,
            settled = ?settled,
            latency_ms = self.req.latency().as_millis() as u64,
            "Request settled"
        );
    }
}

fn build_pipelines(generation: u64, interceptors: &[Arc<dyn Interceptor>]) -> Pipelines {
    let mut server_layers = Vec::new();
    let mut request_layers = vec![request_membrane()];
    let mut view_layers = vec![view_membrane()];
    let mut body_layers = Vec::new();

    for interceptor in interceptors {
        let phases = Arc::clone(interceptor).phases();
        if let Some(layer) = phases.server {
            server_layers.push(layer);
        }
        if let Some(layer) = phases.request {
            request_layers.push(layer);
            request_layers.push(request_membrane());
        }
        if let Some(layer) = phases.view {
            view_layers.push(layer);
            view_layers.push(view_membrane());
        }
        if let Some(layer) = phases.body {
            body_layers.push(layer);
        }
    }

    tracing::debug!(
        generation,
        interceptors = interceptors.len(),
        server = server_layers.len(),
        request = request_layers.len(),
        view = view_layers.len(),
        body = body_layers.len(),
        "Pipelines built"
    );

    let view: ViewPipeline = Pipeline::compose(view_layers, |(req, matched, context): ViewArgs| async move {
        let reply = matched.view().call(req, context).await?;
        Ok(reply.unwrap_or_else(Reply::empty))
    });

    let request = Pipeline::compose(request_layers, move |req: Arc<Request>| route(req, view.clone()));

    let body = Pipeline::compose(body_layers, |_args| async {
        Err(HttpError::unsupported_media_type())
    });

    let server = Pipeline::compose(server_layers, move |server: Server| server.hold(generation));

    Pipelines {
        generation,
        server,
        request,
        body,
    }
}

/// Request pipeline terminal.
async fn route(req: Arc<Request>, view: ViewPipeline) -> Result<Reply, HttpError> {
    req.set_state(RequestState::Routing);
    let path = req.path().to_owned();
    let matched = match req.router().match_route(req.method(), &path) {
        Ok(Some(matched)) => matched,
        Ok(None) => return Err(HttpError::no_match()),
        Err(err) => {
            tracing::debug!(request_id = %req.id(), path = %path, error = %err, "Router failed");
            return Err(HttpError::not_implemented(req.method(), &path).with_source(err));
        }
    };

    let context = matched.context();
    req.set_view_name(matched.view_name());
    req.set_state(RequestState::ViewDispatch);
    view.call((req, Arc::new(matched), Arc::new(context))).await
}
