//! Router boundary.
//!
//! # Data Flow
//! ```text
//! request terminal (method, path)
//!     → RouteTable::match_route
//!         → Err(RouteError)   ⇒ 501
//!         → Ok(None)          ⇒ 404
//!         → Ok(Some(match))   ⇒ fragments outermost → innermost
//!     → RouteMatch::context()   (merged, innermost wins)
//!     → RouteMatch::view_name() (fragment names joined with ".")
//!     → view pipeline → View::call
//! ```
//!
//! # Design Decisions
//! - The orchestrator only depends on `RouteTable`; `Routes` is a small
//!   exact-segment table for the binary, the CLI and tests
//! - A router failure is distinct from "nothing matched"

pub mod table;

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use axum::http::Method;
use futures_util::future::BoxFuture;
use serde_json::Value;

use crate::http::{HttpError, Reply, Request};

pub use table::Routes;

/// The router itself failed (as opposed to matching nothing).
#[derive(Debug, Clone, thiserror::Error)]
pub enum RouteError {
    #[error("cannot route path {0:?}")]
    InvalidPath(String),
    #[error("router failed: {0}")]
    Internal(String),
}

/// A route handler.
pub trait View: Send + Sync + 'static {
    /// `Ok(None)` is rendered as an empty 200.
    fn call(
        &self,
        req: Arc<Request>,
        context: Arc<Context>,
    ) -> BoxFuture<'static, Result<Option<Reply>, HttpError>>;
}

/// Adapts an async closure into a [`View`].
pub struct ViewFn<F> {
    f: F,
}

pub fn view_fn<F, Fut>(f: F) -> Arc<ViewFn<F>>
where
    F: Fn(Arc<Request>, Arc<Context>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Option<Reply>, HttpError>> + Send + 'static,
{
    Arc::new(ViewFn { f })
}

impl<F, Fut> View for ViewFn<F>
where
    F: Fn(Arc<Request>, Arc<Context>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Option<Reply>, HttpError>> + Send + 'static,
{
    fn call(
        &self,
        req: Arc<Request>,
        context: Arc<Context>,
    ) -> BoxFuture<'static, Result<Option<Reply>, HttpError>> {
        Box::pin((self.f)(req, context))
    }
}

/// One ancestor in a match, carrying its own context entries.
#[derive(Debug, Clone, Default)]
pub struct MatchFragment {
    pub name: String,
    pub context: Vec<(String, Value)>,
}

impl MatchFragment {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            context: Vec::new(),
        }
    }

    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.context.push((key.into(), value.into()));
        self
    }
}

/// A successful route lookup.
#[derive(Clone)]
pub struct RouteMatch {
    fragments: Vec<MatchFragment>,
    view: Arc<dyn View>,
}

impl RouteMatch {
    pub fn new(view: Arc<dyn View>, fragments: Vec<MatchFragment>) -> Self {
        Self { fragments, view }
    }

    /// Outermost first.
    pub fn fragments(&self) -> &[MatchFragment] {
        &self.fragments
    }

    pub fn view(&self) -> &Arc<dyn View> {
        &self.view
    }

    /// Merge every fragment's entries; inner fragments override outer ones.
    pub fn context(&self) -> Context {
        let mut values = HashMap::new();
        for fragment in &self.fragments {
            for (key, value) in &fragment.context {
                values.insert(key.clone(), value.clone());
            }
        }
        Context { values }
    }

    pub fn view_name(&self) -> String {
        self.fragments
            .iter()
            .map(|fragment| fragment.name.as_str())
            .filter(|name| !name.is_empty())
            .collect::<Vec<_>>()
            .join(".")
    }
}

impl std::fmt::Debug for RouteMatch {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RouteMatch")
            .field("fragments", &self.fragments)
            .finish_non_exhaustive()
    }
}

/// Merged route context handed to the view phase.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Context {
    values: HashMap<String, Value>,
}

impl Context {
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.values.get(key)
    }

    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.get(key).and_then(Value::as_str)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.values.iter()
    }
}

/// A row of the route listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouteEntry {
    pub method: String,
    pub route: String,
    pub name: String,
}

/// The router collaborator.
pub trait RouteTable: Send + Sync + 'static {
    fn match_route(&self, method: &Method, path: &str) -> Result<Option<RouteMatch>, RouteError>;

    /// Every registered route, in registration order.
    fn routes(&self) -> Vec<RouteEntry>;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn noop() -> Arc<dyn View> {
        view_fn(|_req, _ctx| async { Ok(None) })
    }

    #[test]
    fn inner_fragment_wins_on_collision() {
        let matched = RouteMatch::new(
            noop(),
            vec![
                MatchFragment::new("api").with("version", 1).with("scope", "outer"),
                MatchFragment::new("users").with("scope", "inner"),
            ],
        );
        let context = matched.context();
        assert_eq!(context.get_str("scope"), Some("inner"));
        assert_eq!(context.get("version"), Some(&Value::from(1)));
        assert_eq!(matched.view_name(), "api.users");
    }

    #[test]
    fn unnamed_fragments_are_skipped_in_view_name() {
        let matched = RouteMatch::new(
            noop(),
            vec![MatchFragment::new(""), MatchFragment::new("index")],
        );
        assert_eq!(matched.view_name(), "index");
        assert!(matched.context().is_empty());
    }
}
