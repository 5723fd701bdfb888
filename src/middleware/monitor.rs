//! Liveness and build-status endpoints.
//!
//! `/_monitor/ping` answers with `PING_RESPONSE` (default `pong`).
//! `/_monitor/status` answers with the server name, pid, uptime and the
//! build hash and message, taken from `BUILD_HASH` / `BUILD_MESSAGE` or
//! asked of `git` when those are unset.

use std::sync::{Arc, LazyLock};
use std::time::Instant;

use arc_swap::ArcSwap;
use serde::Serialize;
use tokio::process::Command;

use crate::http::{request_layer, server_layer, Interceptor, Phases, Reply};

pub const PING_PATH: &str = "/_monitor/ping";
pub const STATUS_PATH: &str = "/_monitor/status";

static PROCESS_START: LazyLock<Instant> = LazyLock::new(Instant::now);

#[derive(Debug, Clone, Serialize)]
pub struct Status {
    pub name: String,
    pub pid: u32,
    pub uptime: f64,
    pub git: String,
    pub message: String,
}

pub struct Monitor {
    name: ArcSwap<String>,
}

impl Monitor {
    pub fn new() -> Self {
        LazyLock::force(&PROCESS_START);
        Self {
            name: ArcSwap::from_pointee(String::new()),
        }
    }

    pub async fn status(&self) -> Status {
        let (git, message) = tokio::join!(build_hash(), build_message());
        Status {
            name: self.name.load().as_ref().clone(),
            pid: std::process::id(),
            uptime: PROCESS_START.elapsed().as_secs_f64(),
            git,
            message,
        }
    }
}

impl Default for Monitor {
    fn default() -> Self {
        Self::new()
    }
}

impl Interceptor for Monitor {
    fn name(&self) -> &str {
        "monitor"
    }

    fn phases(self: Arc<Self>) -> Phases {
        let named = Arc::clone(&self);
        Phases::new()
            .on_server(server_layer(move |server, next| {
                named.name.store(Arc::new(server.name().to_owned()));
                next.run(server)
            }))
            .on_request(request_layer(move |req, next| {
                let monitor = Arc::clone(&self);
                async move {
                    match req.path() {
                        PING_PATH => Ok(Reply::text(ping_response())),
                        STATUS_PATH => Reply::json(&monitor.status().await),
                        _ => next.run(req).await,
                    }
                }
            }))
    }
}

fn ping_response() -> String {
    std::env::var("PING_RESPONSE").unwrap_or_else(|_| "pong".to_string())
}

async fn build_hash() -> String {
    match std::env::var("BUILD_HASH") {
        Ok(hash) => hash,
        Err(_) => git(&["rev-parse", "HEAD"]).await,
    }
}

async fn build_message() -> String {
    if let Ok(message) = std::env::var("BUILD_MESSAGE") {
        return message;
    }
    if std::env::var_os("BUILD_HASH").is_some() {
        return String::new();
    }
    git(&["log", "--oneline", "--abbrev-commit", "-n", "1"]).await
}

/// Trimmed stdout of `git args`, or an empty string if git fails.
async fn git(args: &[&str]) -> String {
    match Command::new("git").args(args).output().await {
        Ok(output) if output.status.success() => {
            String::from_utf8_lossy(&output.stdout).trim().to_string()
        }
        Ok(output) => {
            tracing::error!(
                command = %format!("git {}", args.join(" ")),
                stderr = %String::from_utf8_lossy(&output.stderr).trim(),
                "git exited unsuccessfully"
            );
            String::new()
        }
        Err(err) => {
            tracing::error!(command = %format!("git {}", args.join(" ")), error = %err, "Could not exec git");
            String::new()
        }
    }
}
