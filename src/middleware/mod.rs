//! Concrete interceptors.
//!
//! # Data Flow
//! ```text
//! Settings.middleware ["logging", "monitor", ...]
//!     → instantiate(name, settings)
//!     → Arc<dyn Interceptor>
//!     → Server::new / Server::set_interceptors
//! ```

pub mod body_json;
pub mod body_raw;
pub mod logging;
pub mod monitor;
pub mod stall;

use std::sync::Arc;
use std::time::Duration;

use crate::config::{ConfigError, Settings, ValidationError};
use crate::http::Interceptor;

pub use body_json::JsonBody;
pub use body_raw::RawBody;
pub use logging::Logging;
pub use monitor::Monitor;
pub use stall::StallCheck;

/// Names accepted in `Settings.middleware`.
pub const KNOWN: &[&str] = &["logging", "monitor", "body-json", "body-raw", "stall-check"];

/// Build the interceptor registered under `name`.
pub fn instantiate(name: &str, settings: &Settings) -> Result<Arc<dyn Interceptor>, ConfigError> {
    let interceptor: Arc<dyn Interceptor> = match name {
        "logging" => Arc::new(Logging::new(settings.is_development())),
        "monitor" => Arc::new(Monitor::new()),
        "body-json" => Arc::new(JsonBody::new()),
        "body-raw" => Arc::new(RawBody::new(false)),
        "stall-check" => {
            let timeout = settings
                .timeouts
                .stall_ms
                .map(Duration::from_millis)
                .unwrap_or(stall::DEFAULT_STALL_TIMEOUT);
            Arc::new(StallCheck::new(timeout))
        }
        other => {
            return Err(ConfigError::Validation(vec![ValidationError {
                field: "middleware".to_string(),
                message: format!("unknown middleware {other:?}"),
            }]))
        }
    };
    Ok(interceptor)
}

/// Build every configured interceptor, in order. Development servers (or an
/// explicit `STALL_TIMEOUT_MS`) get an outermost stall check even when not
/// listed.
pub fn from_settings(settings: &Settings) -> Result<Vec<Arc<dyn Interceptor>>, ConfigError> {
    let mut interceptors = settings
        .middleware
        .iter()
        .map(|name| instantiate(name, settings))
        .collect::<Result<Vec<_>, _>>()?;

    let listed = settings.middleware.iter().any(|name| name == "stall-check");
    if !listed && (settings.is_development() || settings.timeouts.stall_ms.is_some()) {
        interceptors.insert(0, instantiate("stall-check", settings)?);
    }
    Ok(interceptors)
}
