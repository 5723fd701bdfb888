//! In-process test harness.
//!
//! # Data Flow
//! ```text
//! Suite::new(server)
//!     → server pipeline started
//!     → suite pipeline (interceptors' suite layers) spawned
//!         → terminal: suite ready, held until Suite::finish
//!
//! Suite::isolate(name, body)
//!     → await server ready + suite ready
//!     → fresh tracked operation + Session
//!     → testcase pipeline (interceptors' testcase layers) → body()
//!
//! Suite::request(TestRequest) → Server::handle → TestResponse
//! ```
//!
//! Both harness pipelines use the compiled strategy.
//!
//! [`StubInterceptor`] and [`RequestHook`] are interceptors built for this
//! harness: they rewire requests per test case through the testcase phase.

use std::future::Future;
use std::sync::Arc;

use axum::body::{Body, Bytes};
use axum::http::{header, HeaderMap, HeaderName, HeaderValue, Method, StatusCode};
use futures_util::future::BoxFuture;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;

use crate::http::interceptor::{SuiteLayer, TestcaseLayer};
use crate::http::Server;
use crate::pipeline::Pipeline;
use crate::session::{self, Session, SessionGuard};
use crate::Error;

mod hook;
mod stub;

pub use hook::RequestHook;
pub use stub::StubInterceptor;

type TestBody = Box<dyn FnOnce() -> BoxFuture<'static, Result<(), Error>> + Send>;

/// One test case travelling through the testcase pipeline.
pub struct Testcase {
    name: String,
    body: TestBody,
}

impl Testcase {
    pub fn new<F, Fut>(name: impl Into<String>, body: F) -> Self
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<(), Error>> + Send + 'static,
    {
        Self {
            name: name.into(),
            body: Box::new(move || Box::pin(body())),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Run the test body. Only the terminal does this.
    async fn run(self) -> Result<(), Error> {
        (self.body)().await
    }
}

impl std::fmt::Debug for Testcase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Testcase").field("name", &self.name).finish()
    }
}

struct SuiteInner {
    server: Server,
    testcase: Pipeline<Testcase, (), Error>,
    ready: watch::Sender<bool>,
    finished: watch::Sender<bool>,
    task: Mutex<Option<JoinHandle<Result<(), Error>>>>,
}

/// A started server plus the suite and testcase pipelines of its
/// interceptors. Clones share state.
#[derive(Clone)]
pub struct Suite {
    inner: Arc<SuiteInner>,
}

impl Suite {
    pub async fn new(server: Server) -> Self {
        let mut suite_layers: Vec<SuiteLayer> = Vec::new();
        let mut testcase_layers: Vec<TestcaseLayer> = Vec::new();
        for interceptor in server.interceptors().iter() {
            let phases = Arc::clone(interceptor).phases();
            suite_layers.extend(phases.suite);
            testcase_layers.extend(phases.testcase);
        }

        let suite = Self {
            inner: Arc::new(SuiteInner {
                server: server.clone(),
                testcase: Pipeline::compile(testcase_layers, Testcase::run),
                ready: watch::channel(false).0,
                finished: watch::channel(false).0,
                task: Mutex::new(None),
            }),
        };

        server.start().await;
        let pipeline = Pipeline::compile(suite_layers, |suite: Suite| suite.hold());
        let task = tokio::spawn(pipeline.call(suite.clone()));
        *suite.inner.task.lock().await = Some(task);
        suite
    }

    pub fn server(&self) -> &Server {
        &self.inner.server
    }

    /// Suite pipeline terminal.
    async fn hold(self) -> Result<(), Error> {
        self.inner.ready.send_replace(true);
        let mut finished = self.inner.finished.subscribe();
        let _ = finished.wait_for(|done| *done).await;
        Ok(())
    }

    /// Resolves once both the server and the suite pipeline are ready.
    pub async fn ready(&self) {
        self.inner.server.ready().await;
        let mut ready = self.inner.ready.subscribe();
        let _ = ready.wait_for(|ready| *ready).await;
    }

    /// Run `body` as an isolated test case: its own operation and session,
    /// wrapped by every testcase layer.
    pub async fn isolate<F, Fut>(&self, name: &str, body: F) -> Result<(), Error>
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<(), Error>> + Send + 'static,
    {
        self.ready().await;
        let testcase = Testcase::new(name, body);
        let pipeline = self.inner.testcase.clone();
        session::tracked(async move {
            let guard = SessionGuard::new(Session::start());
            tracing::debug!(
                testcase = %testcase.name(),
                session = %guard.session().id(),
                "Testcase starting"
            );
            pipeline.call(testcase).await
        })
        .await
    }

    /// Inject a request without a socket.
    pub async fn request(&self, request: TestRequest) -> Result<TestResponse, Error> {
        let raw = request.into_raw()?;
        let response = self.inner.server.handle(raw).await;
        let (parts, body) = response.into_parts();
        let body = axum::body::to_bytes(body, usize::MAX)
            .await
            .map_err(|err| Error::msg(format!("response body failed: {err}")))?;
        Ok(TestResponse {
            status: parts.status,
            headers: parts.headers,
            body,
        })
    }

    /// Release the suite pipeline, await its teardown, then close the
    /// server.
    pub async fn finish(&self) -> Result<(), Error> {
        self.inner.finished.send_replace(true);
        if let Some(task) = self.inner.task.lock().await.take() {
            task.await??;
        }
        self.inner.server.close().await
    }
}

impl std::fmt::Debug for Suite {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Suite")
            .field("server", &self.inner.server)
            .field("ready", &*self.inner.ready.borrow())
            .finish_non_exhaustive()
    }
}

/// A request for [`Suite::request`].
#[derive(Debug, Clone)]
pub struct TestRequest {
    method: Method,
    uri: String,
    headers: Vec<(HeaderName, HeaderValue)>,
    body: Bytes,
}

impl TestRequest {
    pub fn new(method: Method, uri: impl Into<String>) -> Self {
        Self {
            method,
            uri: uri.into(),
            headers: Vec::new(),
            body: Bytes::new(),
        }
    }

    pub fn get(uri: impl Into<String>) -> Self {
        Self::new(Method::GET, uri)
    }

    pub fn post(uri: impl Into<String>) -> Self {
        Self::new(Method::POST, uri)
    }

    pub fn header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.push((name, value));
        self
    }

    pub fn body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = body.into();
        self
    }

    /// Serialise `value` as the body and set a JSON content type.
    pub fn json<T: Serialize>(self, value: &T) -> Result<Self, Error> {
        let body = serde_json::to_vec(value).map_err(|err| Error::msg(err.to_string()))?;
        Ok(self
            .header(header::CONTENT_TYPE, HeaderValue::from_static("application/json"))
            .body(body))
    }

    fn into_raw(self) -> Result<axum::http::Request<Body>, Error> {
        let mut builder = axum::http::Request::builder()
            .method(self.method)
            .uri(self.uri);
        for (name, value) in self.headers {
            builder = builder.header(name, value);
        }
        builder
            .body(Body::from(self.body))
            .map_err(|err| Error::msg(err.to_string()))
    }
}

/// What [`Suite::request`] got back.
#[derive(Debug, Clone)]
pub struct TestResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Bytes,
}

impl TestResponse {
    pub fn is_json(&self) -> bool {
        self.headers
            .get(header::CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .is_some_and(|value| value.starts_with("application/json"))
    }

    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }

    pub fn json<T: DeserializeOwned>(&self) -> Result<T, Error> {
        serde_json::from_slice(&self.body).map_err(|err| Error::msg(err.to_string()))
    }
}
