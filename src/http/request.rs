//! The per-request façade.
//!
//! # Responsibilities
//! - Wrap the transport request and expose derived data, each computed at
//!   most once (id, URL, query, accepted media types, cookies)
//! - Hand the raw body to the body pipeline on first `body()` and memoise
//!   the outcome, success or failure
//! - Keep `body()` and `take_raw()` mutually exclusive
//! - Track the request's lifecycle state
//!
//! # Design Decisions
//! - The id comes from the first configured request-id header, else a
//!   fresh UUID v4
//! - The façade is reachable from ambient context through its session
//!   payload (`Request::current()`)

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::{Arc, Mutex, OnceLock, PoisonError};
use std::time::{Duration, Instant};

use axum::body::Body;
use axum::extract::ConnectInfo;
use axum::http::request::Parts;
use axum::http::{header, Extensions, HeaderMap, HeaderName, Method, Uri, Version};
use percent_encoding::percent_decode_str;
use tokio::sync::OnceCell;
use url::Url;

use super::body::{BodyStream, BodyValue};
use super::interceptor::BodyPipeline;
use super::HttpError;
use crate::routing::RouteTable;
use crate::session::Session;

/// Where a request is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum RequestState {
    Accepted = 0,
    Routing = 1,
    ViewDispatch = 2,
    Responding = 3,
    Done = 4,
    Error = 5,
}

impl From<u8> for RequestState {
    fn from(value: u8) -> Self {
        match value {
            0 => RequestState::Accepted,
            1 => RequestState::Routing,
            2 => RequestState::ViewDispatch,
            3 => RequestState::Responding,
            4 => RequestState::Done,
            _ => RequestState::Error,
        }
    }
}

/// One media range from an `Accept` header.
#[derive(Debug, Clone, PartialEq)]
pub struct MediaRange {
    pub essence: String,
    pub q: f32,
}

impl MediaRange {
    /// How closely this range names `offered`: exact type, `type/*`, `*/*`.
    fn specificity(&self, offered: &str) -> Option<u8> {
        let offered = offered.split(';').next().unwrap_or_default().trim();
        match self.essence.as_str() {
            "*/*" => Some(0),
            range => match range.strip_suffix("/*") {
                Some(kind) => offered
                    .split_once('/')
                    .is_some_and(|(offered_kind, _)| offered_kind.eq_ignore_ascii_case(kind))
                    .then_some(1),
                None => range.eq_ignore_ascii_case(offered).then_some(2),
            },
        }
    }
}

fn parse_accept(headers: &HeaderMap) -> Vec<MediaRange> {
    let mut ranges: Vec<MediaRange> = headers
        .get_all(header::ACCEPT)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(','))
        .filter_map(|item| {
            let mut params = item.split(';');
            let essence = params.next()?.trim().to_ascii_lowercase();
            if essence.is_empty() {
                return None;
            }
            let q = params
                .filter_map(|param| param.trim().strip_prefix("q="))
                .find_map(|q| q.parse::<f32>().ok())
                .unwrap_or(1.0);
            Some(MediaRange { essence, q })
        })
        .collect();
    ranges.sort_by(|a, b| b.q.total_cmp(&a.q));
    ranges
}

/// The q-value the most specific matching range assigns to `offered`.
fn quality(ranges: &[MediaRange], offered: &str) -> Option<f32> {
    let mut best: Option<(u8, f32)> = None;
    for range in ranges {
        let Some(specificity) = range.specificity(offered) else {
            continue;
        };
        if best.map_or(true, |(current, _)| specificity > current) {
            best = Some((specificity, range.q));
        }
    }
    best.map(|(_, q)| q)
}

fn parse_cookies(headers: &HeaderMap) -> Option<HashMap<String, String>> {
    let mut cookies = HashMap::new();
    let mut seen = false;
    for value in headers.get_all(header::COOKIE) {
        let Ok(value) = value.to_str() else { continue };
        seen = true;
        for pair in value.split(';') {
            if let Some((name, val)) = pair.split_once('=') {
                let val = val.trim();
                let val = val
                    .strip_prefix('"')
                    .and_then(|val| val.strip_suffix('"'))
                    .unwrap_or(val);
                cookies.insert(name.trim().to_owned(), decode_cookie(val));
            }
        }
    }
    seen.then_some(cookies)
}

/// Percent-decode a cookie value, keeping it as sent when it is not valid
/// UTF-8 after decoding.
fn decode_cookie(value: &str) -> String {
    if !value.contains('%') {
        return value.to_owned();
    }
    percent_decode_str(value)
        .decode_utf8()
        .map(|decoded| decoded.into_owned())
        .unwrap_or_else(|_| value.to_owned())
}

/// What the orchestrator hands every new façade.
pub(crate) struct RequestSetup {
    pub router: Arc<dyn RouteTable>,
    pub body: BodyPipeline,
    pub id_headers: Arc<[HeaderName]>,
    pub session: Session,
}

/// An inbound request as seen by interceptors and views.
pub struct Request {
    parts: Parts,
    raw: Mutex<Option<Body>>,
    raw_accessed: AtomicBool,
    body: OnceCell<Result<BodyValue, HttpError>>,
    body_pipeline: BodyPipeline,
    id_headers: Arc<[HeaderName]>,
    id: OnceLock<String>,
    url: OnceLock<Option<Url>>,
    query: OnceLock<Vec<(String, String)>>,
    accepts: OnceLock<Vec<MediaRange>>,
    cookies: OnceLock<Option<HashMap<String, String>>>,
    view_name: Mutex<Option<String>>,
    router: Mutex<Arc<dyn RouteTable>>,
    extensions: Mutex<Extensions>,
    state: AtomicU8,
    start: Instant,
    session: Session,
}

impl Request {
    pub(crate) fn new(raw: axum::http::Request<Body>, setup: RequestSetup) -> Self {
        let (parts, body) = raw.into_parts();
        Self {
            parts,
            raw: Mutex::new(Some(body)),
            raw_accessed: AtomicBool::new(false),
            body: OnceCell::new(),
            body_pipeline: setup.body,
            id_headers: setup.id_headers,
            id: OnceLock::new(),
            url: OnceLock::new(),
            query: OnceLock::new(),
            accepts: OnceLock::new(),
            cookies: OnceLock::new(),
            view_name: Mutex::new(None),
            router: Mutex::new(setup.router),
            extensions: Mutex::new(Extensions::new()),
            state: AtomicU8::new(RequestState::Accepted as u8),
            start: Instant::now(),
            session: setup.session,
        }
    }

    /// The request being served by the current session, if any.
    pub fn current() -> Option<Arc<Request>> {
        Session::current()?.get::<Arc<Request>>()
    }

    pub fn method(&self) -> &Method {
        &self.parts.method
    }

    pub fn uri(&self) -> &Uri {
        &self.parts.uri
    }

    pub fn path(&self) -> &str {
        self.parts.uri.path()
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.parts.headers
    }

    pub fn version(&self) -> Version {
        self.parts.version
    }

    pub fn remote_addr(&self) -> Option<SocketAddr> {
        self.parts
            .extensions
            .get::<ConnectInfo<SocketAddr>>()
            .map(|ConnectInfo(addr)| *addr)
    }

    pub fn id(&self) -> &str {
        self.id.get_or_init(|| {
            self.id_headers
                .iter()
                .find_map(|name| self.parts.headers.get(name)?.to_str().ok())
                .filter(|id| !id.is_empty())
                .map(str::to_owned)
                .unwrap_or_else(|| uuid::Uuid::new_v4().to_string())
        })
    }

    /// Absolute URL, using the `Host` header for relative request targets.
    pub fn url(&self) -> Option<&Url> {
        self.url
            .get_or_init(|| {
                let uri = &self.parts.uri;
                if uri.scheme().is_some() {
                    return Url::parse(&uri.to_string()).ok();
                }
                let host = self
                    .parts
                    .headers
                    .get(header::HOST)
                    .and_then(|host| host.to_str().ok())
                    .unwrap_or("localhost");
                let target = uri.path_and_query().map_or("/", |pq| pq.as_str());
                Url::parse(&format!("http://{host}{target}")).ok()
            })
            .as_ref()
    }

    /// Decoded query pairs, in order.
    pub fn query(&self) -> &[(String, String)] {
        self.query.get_or_init(|| {
            self.parts
                .uri
                .query()
                .map(|query| url::form_urlencoded::parse(query.as_bytes()).into_owned().collect())
                .unwrap_or_default()
        })
    }

    pub fn query_param(&self, name: &str) -> Option<&str> {
        self.query()
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.as_str())
    }

    /// `Accept` ranges, best first. Ranges with `q=0` are refusals.
    pub fn accept_ranges(&self) -> &[MediaRange] {
        self.accepts.get_or_init(|| parse_accept(&self.parts.headers))
    }

    /// The offered type the client prefers, or `None` if it accepts none of
    /// them. Each offer takes the q-value of its most specific range, so
    /// `text/*, text/html;q=0` refuses `text/html`. Ties go to the earlier
    /// offer. A request without `Accept` takes the first offer.
    pub fn accepts<'a>(&self, offered: &[&'a str]) -> Option<&'a str> {
        let ranges = self.accept_ranges();
        if ranges.is_empty() {
            return offered.first().copied();
        }
        let mut best: Option<(&'a str, f32)> = None;
        for &offer in offered {
            let Some(q) = quality(ranges, offer).filter(|q| *q > 0.0) else {
                continue;
            };
            if best.map_or(true, |(_, current)| q > current) {
                best = Some((offer, q));
            }
        }
        best.map(|(offer, _)| offer)
    }

    pub fn accepts_any(&self, offered: &[&str]) -> bool {
        self.accepts(offered).is_some()
    }

    /// Parsed `Cookie` headers; `None` when the request carries none.
    pub fn cookies(&self) -> Option<&HashMap<String, String>> {
        self.cookies
            .get_or_init(|| parse_cookies(&self.parts.headers))
            .as_ref()
    }

    pub fn cookie(&self, name: &str) -> Option<&str> {
        self.cookies()?.get(name).map(String::as_str)
    }

    pub fn start(&self) -> Instant {
        self.start
    }

    pub fn latency(&self) -> Duration {
        self.start.elapsed()
    }

    pub fn view_name(&self) -> Option<String> {
        self.view_name
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn set_view_name(&self, name: impl Into<String>) {
        *self.view_name.lock().unwrap_or_else(PoisonError::into_inner) = Some(name.into());
    }

    pub fn router(&self) -> Arc<dyn RouteTable> {
        Arc::clone(&self.router.lock().unwrap_or_else(PoisonError::into_inner))
    }

    /// Route this request with a different table.
    pub fn set_router(&self, router: Arc<dyn RouteTable>) {
        *self.router.lock().unwrap_or_else(PoisonError::into_inner) = router;
    }

    /// Per-request storage for interceptors.
    pub fn insert<T: Clone + Send + Sync + 'static>(&self, value: T) -> Option<T> {
        self.extensions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(value)
    }

    pub fn get<T: Clone + Send + Sync + 'static>(&self) -> Option<T> {
        self.extensions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get::<T>()
            .cloned()
    }

    /// Transport-level extensions (connect info and the like).
    pub fn extensions(&self) -> &Extensions {
        &self.parts.extensions
    }

    pub fn state(&self) -> RequestState {
        RequestState::from(self.state.load(Ordering::Acquire))
    }

    pub(crate) fn set_state(&self, state: RequestState) {
        let previous = RequestState::from(self.state.swap(state as u8, Ordering::AcqRel));
        if previous != state {
            tracing::trace!(
                request_id = %self.id(),
                from = ?previous,
                to = ?state,
                "Request state changed"
            );
        }
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    /// Materialise the body through the body pipeline.
    ///
    /// The pipeline runs once; every later call returns the same value or
    /// error. Fails with `RawAlreadyAccessed` once `take_raw` has been used.
    pub async fn body(self: &Arc<Self>) -> Result<BodyValue, HttpError> {
        if self.raw_accessed.load(Ordering::Acquire) {
            return Err(HttpError::raw_already_accessed());
        }
        self.body
            .get_or_init(|| async {
                let raw = self
                    .raw
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .take()
                    .unwrap_or_else(Body::empty);
                self.body_pipeline
                    .call((Arc::clone(self), BodyStream::new(raw)))
                    .await
            })
            .await
            .clone()
    }

    /// Take the raw body stream. `body()` fails from now on.
    pub fn take_raw(&self) -> Option<Body> {
        self.raw_accessed.store(true, Ordering::Release);
        self.raw.lock().unwrap_or_else(PoisonError::into_inner).take()
    }
}

#[cfg(test)]
impl Request {
    /// A detached request with no body layers and an empty route table.
    pub(crate) fn for_test(raw: axum::http::Request<Body>) -> Arc<Self> {
        let body: BodyPipeline = crate::pipeline::Pipeline::compose(Vec::new(), |_args| async {
            Err(HttpError::unsupported_media_type())
        });
        Arc::new(Self::new(
            raw,
            RequestSetup {
                router: Arc::new(crate::routing::Routes::new()),
                body,
                id_headers: Arc::from(Vec::<HeaderName>::new()),
                session: Session::start(),
            },
        ))
    }
}

impl std::fmt::Debug for Request {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Request")
            .field("method", &self.parts.method)
            .field("uri", &self.parts.uri)
            .field("state", &self.state())
            .field("session", &self.session.id())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::Pipeline;
    use crate::routing::Routes;
    use axum::body::Bytes;
    use std::sync::atomic::AtomicUsize;

    fn build(raw: axum::http::Request<Body>, body: BodyPipeline) -> Arc<Request> {
        Arc::new(Request::new(
            raw,
            RequestSetup {
                router: Arc::new(Routes::new()),
                body,
                id_headers: Arc::from(vec![HeaderName::from_static("request-id")]),
                session: Session::start(),
            },
        ))
    }

    fn echo_body(calls: Arc<AtomicUsize>) -> BodyPipeline {
        Pipeline::compose(Vec::new(), move |(_req, stream): (Arc<Request>, BodyStream)| {
            calls.fetch_add(1, Ordering::SeqCst);
            async move { Ok(BodyValue::Bytes(stream.collect(1024).await?)) }
        })
    }

    fn get(uri: &str) -> axum::http::Request<Body> {
        axum::http::Request::builder().uri(uri).body(Body::empty()).unwrap()
    }

    #[tokio::test]
    async fn body_is_materialised_once() {
        let calls = Arc::new(AtomicUsize::new(0));
        let raw = axum::http::Request::builder()
            .method(Method::POST)
            .uri("/")
            .body(Body::from("payload"))
            .unwrap();
        let req = build(raw, echo_body(Arc::clone(&calls)));

        let first = req.body().await.unwrap();
        let second = req.body().await.unwrap();
        assert_eq!(first, BodyValue::Bytes(Bytes::from_static(b"payload")));
        assert_eq!(first, second);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn raw_access_disables_body() {
        let calls = Arc::new(AtomicUsize::new(0));
        let req = build(get("/"), echo_body(Arc::clone(&calls)));

        assert!(req.take_raw().is_some());
        let err = req.body().await.unwrap_err();
        assert_eq!(err.kind(), crate::http::ErrorKind::RawAlreadyAccessed);
        assert_eq!(err.message(), "Cannot read the body if \"raw\" has been accessed.");
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn id_prefers_header_then_generates() {
        let calls = Arc::new(AtomicUsize::new(0));
        let raw = axum::http::Request::builder()
            .uri("/")
            .header("request-id", "abc-123")
            .body(Body::empty())
            .unwrap();
        let req = build(raw, echo_body(Arc::clone(&calls)));
        assert_eq!(req.id(), "abc-123");

        let req = build(get("/"), echo_body(calls));
        let id = req.id().to_owned();
        assert_eq!(req.id(), id);
        assert!(uuid::Uuid::parse_str(&id).is_ok());
    }

    #[tokio::test]
    async fn url_query_and_cookies() {
        let raw = axum::http::Request::builder()
            .uri("/search?q=rust+lang&page=2")
            .header(header::HOST, "example.com")
            .header(header::COOKIE, "a=1; b=\"two\"")
            .body(Body::empty())
            .unwrap();
        let req = build(raw, echo_body(Arc::new(AtomicUsize::new(0))));

        assert_eq!(req.url().unwrap().as_str(), "http://example.com/search?q=rust+lang&page=2");
        assert_eq!(req.query_param("q"), Some("rust lang"));
        assert_eq!(req.query_param("page"), Some("2"));
        assert_eq!(req.cookie("a"), Some("1"));
        assert_eq!(req.cookie("b"), Some("two"));
        assert_eq!(req.cookie("c"), None);

        let bare = build(get("/"), echo_body(Arc::new(AtomicUsize::new(0))));
        assert!(bare.cookies().is_none());
    }

    #[tokio::test]
    async fn cookie_values_are_percent_decoded() {
        let raw = axum::http::Request::builder()
            .uri("/")
            .header(header::COOKIE, "greeting=hello%20world; plus=a+b; broken=%E0%A4%A")
            .body(Body::empty())
            .unwrap();
        let req = build(raw, echo_body(Arc::new(AtomicUsize::new(0))));

        assert_eq!(req.cookie("greeting"), Some("hello world"));
        assert_eq!(req.cookie("plus"), Some("a+b"));
        assert_eq!(req.cookie("broken"), Some("%E0%A4%A"));
    }

    #[tokio::test]
    async fn accept_negotiation_honours_q_values() {
        let raw = axum::http::Request::builder()
            .uri("/")
            .header(header::ACCEPT, "text/html;q=0.5, application/json, image/*;q=0")
            .body(Body::empty())
            .unwrap();
        let req = build(raw, echo_body(Arc::new(AtomicUsize::new(0))));

        assert_eq!(req.accepts(&["text/html", "application/json"]), Some("application/json"));
        assert_eq!(req.accepts(&["text/html"]), Some("text/html"));
        assert_eq!(req.accepts(&["image/png"]), None);
        assert!(!req.accepts_any(&["text/plain"]));
    }

    #[tokio::test]
    async fn specific_refusal_beats_wildcard() {
        let raw = axum::http::Request::builder()
            .uri("/")
            .header(header::ACCEPT, "text/*, text/html;q=0, */*;q=0.1")
            .body(Body::empty())
            .unwrap();
        let req = build(raw, echo_body(Arc::new(AtomicUsize::new(0))));

        assert_eq!(req.accepts(&["text/html"]), None);
        assert_eq!(req.accepts(&["text/html", "text/plain"]), Some("text/plain"));
        assert_eq!(req.accepts(&["image/png", "text/plain"]), Some("text/plain"));
        assert_eq!(req.accepts(&["image/png"]), Some("image/png"));
    }

    #[tokio::test]
    async fn state_transitions_are_recorded() {
        let req = build(get("/"), echo_body(Arc::new(AtomicUsize::new(0))));
        assert_eq!(req.state(), RequestState::Accepted);
        req.set_state(RequestState::Routing);
        assert_eq!(req.state(), RequestState::Routing);
        req.session().end();
    }
}
