//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Check addresses, header names, timeouts and middleware names
//! - Detect malformed and duplicate routes
//!
//! # Design Decisions
//! - Returns all validation errors, not just the first
//! - Pure function: `&Settings → Result<(), Vec<ValidationError>>`

use std::collections::HashSet;
use std::net::SocketAddr;

use axum::http::{HeaderName, Method, StatusCode};

use crate::config::schema::Settings;
use crate::middleware;

/// One semantic problem in a settings file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    pub field: String,
    pub message: String,
}

impl ValidationError {
    fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

pub fn validate_config(settings: &Settings) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if settings.name.trim().is_empty() {
        errors.push(ValidationError::new("name", "must not be empty"));
    }

    if settings.listener.bind_address.parse::<SocketAddr>().is_err() {
        errors.push(ValidationError::new(
            "listener.bind_address",
            format!("{:?} is not a socket address", settings.listener.bind_address),
        ));
    }

    if settings.timeouts.request_secs == 0 {
        errors.push(ValidationError::new("timeouts.request_secs", "must be greater than 0"));
    }

    if settings.observability.metrics_enabled
        && settings.observability.metrics_address.parse::<SocketAddr>().is_err()
    {
        errors.push(ValidationError::new(
            "observability.metrics_address",
            format!("{:?} is not a socket address", settings.observability.metrics_address),
        ));
    }

    for (i, header) in settings.request_id_headers.iter().enumerate() {
        if HeaderName::from_bytes(header.as_bytes()).is_err() {
            errors.push(ValidationError::new(
                format!("request_id_headers[{i}]"),
                format!("{header:?} is not a header name"),
            ));
        }
    }

    for (i, name) in settings.middleware.iter().enumerate() {
        if !middleware::KNOWN.contains(&name.as_str()) {
            errors.push(ValidationError::new(
                format!("middleware[{i}]"),
                format!("unknown middleware {name:?}"),
            ));
        }
    }

    let mut seen = HashSet::new();
    for (i, route) in settings.routes.iter().enumerate() {
        let field = |name: &str| format!("routes[{i}].{name}");
        if Method::from_bytes(route.method.to_ascii_uppercase().as_bytes()).is_err() {
            errors.push(ValidationError::new(field("method"), "not an HTTP method"));
        }
        if !route.path.starts_with('/') {
            errors.push(ValidationError::new(field("path"), "must start with '/'"));
        }
        if StatusCode::from_u16(route.status).is_err() {
            errors.push(ValidationError::new(field("status"), "not a valid status code"));
        }
        if !seen.insert((route.method.to_ascii_uppercase(), route.path.clone())) {
            errors.push(ValidationError::new(
                field("path"),
                format!("duplicate route {} {}", route.method, route.path),
            ));
        }
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::schema::RouteConfig;

    fn route(method: &str, path: &str) -> RouteConfig {
        RouteConfig {
            method: method.into(),
            path: path.into(),
            name: "r".into(),
            status: 200,
            body: None,
            content_type: None,
        }
    }

    #[test]
    fn defaults_are_valid() {
        assert!(validate_config(&Settings::default()).is_ok());
    }

    #[test]
    fn collects_every_error() {
        let mut settings = Settings::default();
        settings.listener.bind_address = "nowhere".into();
        settings.timeouts.request_secs = 0;
        settings.middleware.push("teleport".into());
        settings.routes = vec![route("GET", "/a"), route("get", "/a"), route("GET", "b")];

        let errors = validate_config(&settings).unwrap_err();
        let fields: Vec<&str> = errors.iter().map(|err| err.field.as_str()).collect();
        assert_eq!(
            fields,
            vec![
                "listener.bind_address",
                "timeouts.request_secs",
                "middleware[3]",
                "routes[1].path",
                "routes[2].path",
            ]
        );
    }
}
