//! Startup and reload.
//!
//! # Responsibilities
//! - Translate validated settings into server options
//! - Build the route table and middleware list
//! - Apply reloaded settings to a running server

use std::sync::Arc;
use std::time::Duration;

use axum::http::HeaderName;

use crate::config::Settings;
use crate::http::{Server, ServerOptions};
use crate::middleware;
use crate::routing::Routes;
use crate::Error;

pub fn server_options(settings: &Settings) -> ServerOptions {
    ServerOptions {
        is_external: settings.is_external,
        development: settings.is_development(),
        metrics_enabled: settings.observability.metrics_enabled,
        // Validation rejects bad names; anything left is skipped.
        request_id_headers: settings
            .request_id_headers
            .iter()
            .filter_map(|name| HeaderName::from_bytes(name.as_bytes()).ok())
            .collect(),
        request_timeout: Duration::from_secs(settings.timeouts.request_secs),
    }
}

/// Build a server (not yet started) from validated settings.
pub fn build_server(settings: &Settings) -> Result<Server, Error> {
    let routes = Routes::from_config(&settings.routes)?;
    let interceptors = middleware::from_settings(settings)?;
    tracing::info!(
        name = %settings.name,
        environment = %settings.environment,
        routes = routes.len(),
        middleware = ?settings.middleware,
        "Building server"
    );
    Ok(Server::new(
        settings.name.clone(),
        Arc::new(routes),
        interceptors,
        server_options(settings),
    ))
}

/// Swap in the routes and middleware of reloaded settings. Options fixed at
/// startup (name, timeouts, request-id headers) are not reloaded.
pub async fn reload(server: &Server, settings: &Settings) -> Result<(), Error> {
    let routes = Routes::from_config(&settings.routes)?;
    let interceptors = middleware::from_settings(settings)?;
    server.set_router(Arc::new(routes));
    server.set_interceptors(interceptors).await;
    tracing::info!(server = %server.name(), "Settings reloaded");
    Ok(())
}
