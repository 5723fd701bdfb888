//! Configuration schema definitions.
//!
//! Every field has a default so an empty file is a valid configuration.

use serde::{Deserialize, Serialize};

/// Root settings for a strata application.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct Settings {
    /// Application name, reported by the monitor and in logs.
    pub name: String,

    /// External deployments omit stacks and the request-id header.
    pub is_external: bool,

    /// Environment label; anything starting with "dev" is development.
    pub environment: String,

    /// Reload middleware and routes when the settings file changes.
    pub hot: bool,

    /// Headers checked, in order, for an incoming request id.
    pub request_id_headers: Vec<String>,

    /// Middleware names, outermost first.
    pub middleware: Vec<String>,

    pub listener: ListenerConfig,

    pub timeouts: TimeoutConfig,

    pub observability: ObservabilityConfig,

    pub routes: Vec<RouteConfig>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            name: "strata".to_string(),
            is_external: false,
            environment: "development".to_string(),
            hot: false,
            request_id_headers: vec!["request-id".to_string()],
            middleware: vec![
                "logging".to_string(),
                "monitor".to_string(),
                "body-json".to_string(),
            ],
            listener: ListenerConfig::default(),
            timeouts: TimeoutConfig::default(),
            observability: ObservabilityConfig::default(),
            routes: Vec::new(),
        }
    }
}

impl Settings {
    pub fn is_development(&self) -> bool {
        self.environment.starts_with("dev")
    }

    /// Apply `STRATA_ENV`, `STRATA_METRICS` and `STALL_TIMEOUT_MS`.
    pub fn apply_env(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    pub(crate) fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(environment) = lookup("STRATA_ENV").filter(|env| !env.is_empty()) {
            self.environment = environment;
        }

        if let Some(metrics) = lookup("STRATA_METRICS") {
            match metrics.as_str() {
                "" | "0" | "false" => self.observability.metrics_enabled = false,
                "1" | "true" => self.observability.metrics_enabled = true,
                address => {
                    self.observability.metrics_enabled = true;
                    self.observability.metrics_address = address.to_string();
                }
            }
        }

        if let Some(stall) = lookup("STALL_TIMEOUT_MS") {
            match stall.parse() {
                Ok(ms) => self.timeouts.stall_ms = Some(ms),
                Err(_) => tracing::warn!(value = %stall, "Ignoring unparseable STALL_TIMEOUT_MS"),
            }
        }
    }
}

/// Listener configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ListenerConfig {
    /// Bind address (e.g., "0.0.0.0:8080").
    pub bind_address: String,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            bind_address: "127.0.0.1:8080".to_string(),
        }
    }
}

/// Timeout configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TimeoutConfig {
    /// Whole-request timeout enforced by the transport layer.
    pub request_secs: u64,

    /// Warn about requests still unsettled after this long.
    pub stall_ms: Option<u64>,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            request_secs: 30,
            stall_ms: None,
        }
    }
}

/// Observability settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    pub metrics_enabled: bool,

    /// Prometheus scrape address.
    pub metrics_address: String,

    /// Emit JSON logs even in development.
    pub json_logs: bool,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            metrics_enabled: false,
            metrics_address: "127.0.0.1:9090".to_string(),
            json_logs: false,
        }
    }
}

/// A statically configured route.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RouteConfig {
    pub method: String,

    pub path: String,

    pub name: String,

    #[serde(default = "default_status")]
    pub status: u16,

    /// Response body; omitted means an empty body.
    #[serde(default)]
    pub body: Option<String>,

    #[serde(default)]
    pub content_type: Option<String>,
}

fn default_status() -> u16 {
    200
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_file_uses_defaults() {
        let settings: Settings = toml::from_str("").unwrap();
        assert_eq!(settings.name, "strata");
        assert!(settings.is_development());
        assert_eq!(settings.request_id_headers, vec!["request-id"]);
        assert_eq!(settings.timeouts.request_secs, 30);
    }

    #[test]
    fn routes_parse_with_default_status() {
        let settings: Settings = toml::from_str(
            r#"
            name = "app"
            environment = "production"

            [[routes]]
            method = "GET"
            path = "/foo"
            name = "bar"
            "#,
        )
        .unwrap();
        assert!(!settings.is_development());
        assert_eq!(settings.routes[0].status, 200);
        assert_eq!(settings.routes[0].name, "bar");
    }

    #[test]
    fn env_overrides() {
        let mut settings = Settings::default();
        settings.apply_overrides(|key| match key {
            "STRATA_ENV" => Some("staging".into()),
            "STRATA_METRICS" => Some("0.0.0.0:9100".into()),
            "STALL_TIMEOUT_MS" => Some("250".into()),
            _ => None,
        });
        assert_eq!(settings.environment, "staging");
        assert!(settings.observability.metrics_enabled);
        assert_eq!(settings.observability.metrics_address, "0.0.0.0:9100");
        assert_eq!(settings.timeouts.stall_ms, Some(250));
    }
}
