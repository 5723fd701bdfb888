//! Segment-matching route table.
//!
//! # Responsibilities
//! - Register views under a method and path (`:name` segments capture)
//! - Mount nested tables under a prefix, each mount adding a fragment
//! - Concatenate tables, earlier registrations winning
//!
//! # Design Decisions
//! - Segments compare exactly; no regex
//! - Trailing slashes are ignored
//! - Paths that are not origin-form (`*`, authority-form) are router errors

use std::sync::Arc;

use axum::http::{HeaderValue, Method, StatusCode};
use serde_json::Value;

use super::{view_fn, Context, MatchFragment, RouteEntry, RouteError, RouteMatch, RouteTable, View};
use crate::config::RouteConfig;
use crate::http::{HttpError, Reply};

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Literal(String),
    Param(String),
}

fn parse_segments(path: &str) -> Vec<Segment> {
    split(path)
        .map(|part| match part.strip_prefix(':') {
            Some(name) => Segment::Param(name.to_owned()),
            None => Segment::Literal(part.to_owned()),
        })
        .collect()
}

fn split(path: &str) -> impl Iterator<Item = &str> {
    path.split('/').filter(|part| !part.is_empty())
}

#[derive(Clone)]
struct Entry {
    method: Method,
    route: String,
    segments: Vec<Segment>,
    name: String,
    view: Arc<dyn View>,
}

impl Entry {
    fn capture(&self, parts: &[&str]) -> Option<Vec<(String, Value)>> {
        if parts.len() != self.segments.len() {
            return None;
        }
        let mut params = Vec::new();
        for (segment, part) in self.segments.iter().zip(parts) {
            match segment {
                Segment::Literal(literal) if literal == part => {}
                Segment::Literal(_) => return None,
                Segment::Param(name) => params.push((name.clone(), Value::from(*part))),
            }
        }
        Some(params)
    }
}

#[derive(Clone)]
struct Mount {
    prefix: String,
    segments: Vec<String>,
    fragment: MatchFragment,
    routes: Routes,
}

/// An ordered table of views.
#[derive(Clone, Default)]
pub struct Routes {
    entries: Vec<Entry>,
    mounts: Vec<Mount>,
}

impl Routes {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `view` for `method` and `path`.
    pub fn route(
        mut self,
        method: Method,
        path: impl Into<String>,
        name: impl Into<String>,
        view: Arc<dyn View>,
    ) -> Self {
        let route = path.into();
        self.entries.push(Entry {
            method,
            segments: parse_segments(&route),
            route,
            name: name.into(),
            view,
        });
        self
    }

    /// Nest `routes` under `prefix`. The mount contributes `fragment` (its
    /// name and context) to every match beneath it.
    pub fn mount(mut self, prefix: impl Into<String>, fragment: MatchFragment, routes: Routes) -> Self {
        let prefix = prefix.into();
        self.mounts.push(Mount {
            segments: split(&prefix).map(str::to_owned).collect(),
            prefix,
            fragment,
            routes,
        });
        self
    }

    /// Append `other`; routes already registered here take precedence.
    pub fn concat(mut self, other: Routes) -> Self {
        self.entries.extend(other.entries);
        self.mounts.extend(other.mounts);
        self
    }

    pub fn len(&self) -> usize {
        self.entries.len() + self.mounts.iter().map(|mount| mount.routes.len()).sum::<usize>()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Build a table of static views from configuration.
    pub fn from_config(routes: &[RouteConfig]) -> Result<Self, RouteError> {
        let mut table = Routes::new();
        for config in routes {
            let method = Method::from_bytes(config.method.to_ascii_uppercase().as_bytes())
                .map_err(|err| RouteError::Internal(format!("{}: {err}", config.method)))?;
            let status = StatusCode::from_u16(config.status)
                .map_err(|err| RouteError::Internal(format!("{}: {err}", config.status)))?;
            let content_type = config
                .content_type
                .as_deref()
                .map(HeaderValue::from_str)
                .transpose()
                .map_err(|err| RouteError::Internal(err.to_string()))?;
            table = table.route(
                method,
                config.path.clone(),
                config.name.clone(),
                static_view(status, config.body.clone(), content_type),
            );
        }
        Ok(table)
    }

    fn lookup(&self, method: &Method, parts: &[&str]) -> Option<RouteMatch> {
        for entry in &self.entries {
            if entry.method != *method {
                continue;
            }
            if let Some(context) = entry.capture(parts) {
                let fragment = MatchFragment {
                    name: entry.name.clone(),
                    context,
                };
                return Some(RouteMatch::new(Arc::clone(&entry.view), vec![fragment]));
            }
        }

        for mount in &self.mounts {
            let n = mount.segments.len();
            if parts.len() < n || parts[..n] != mount.segments[..] {
                continue;
            }
            if let Some(inner) = mount.routes.lookup(method, &parts[n..]) {
                let mut fragments = Vec::with_capacity(inner.fragments().len() + 1);
                fragments.push(mount.fragment.clone());
                fragments.extend_from_slice(inner.fragments());
                return Some(RouteMatch::new(Arc::clone(inner.view()), fragments));
            }
        }
        None
    }
}

fn static_view(status: StatusCode, body: Option<String>, content_type: Option<HeaderValue>) -> Arc<dyn View> {
    view_fn(move |_req, _ctx: Arc<Context>| {
        let body = body.clone();
        let content_type = content_type.clone();
        async move {
            let Some(body) = body else {
                return Ok::<_, HttpError>(Some(Reply::empty().with_status(status)));
            };
            let mut reply = Reply::text(body).with_status(status);
            if let Some(content_type) = content_type {
                reply = reply.with_header(axum::http::header::CONTENT_TYPE, content_type);
            }
            Ok(Some(reply))
        }
    })
}

impl RouteTable for Routes {
    fn match_route(&self, method: &Method, path: &str) -> Result<Option<RouteMatch>, RouteError> {
        if !path.starts_with('/') {
            return Err(RouteError::InvalidPath(path.to_owned()));
        }
        let parts: Vec<&str> = split(path).collect();
        Ok(self.lookup(method, &parts))
    }

    fn routes(&self) -> Vec<RouteEntry> {
        let mut out: Vec<RouteEntry> = self
            .entries
            .iter()
            .map(|entry| RouteEntry {
                method: entry.method.to_string(),
                route: entry.route.clone(),
                name: entry.name.clone(),
            })
            .collect();

        for mount in &self.mounts {
            let prefix = mount.prefix.trim_end_matches('/');
            for inner in mount.routes.routes() {
                let route = match inner.route.as_str() {
                    "/" => format!("{prefix}/"),
                    rest => format!("{prefix}{rest}"),
                };
                let name = match (mount.fragment.name.as_str(), inner.name.as_str()) {
                    ("", name) => name.to_owned(),
                    (outer, "") => outer.to_owned(),
                    (outer, name) => format!("{outer}.{name}"),
                };
                out.push(RouteEntry {
                    method: inner.method,
                    route,
                    name,
                });
            }
        }
        out
    }
}

impl std::fmt::Debug for Routes {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Routes").field("len", &self.len()).finish()
    }
}
