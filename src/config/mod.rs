//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! settings file (TOML)
//!     → loader.rs (parse & deserialize)
//!     → Settings::apply_env (STRATA_ENV, STRATA_METRICS, STALL_TIMEOUT_MS)
//!     → validation.rs (semantic checks)
//!     → Settings (validated)
//!     → lifecycle::startup builds middleware, routes and ServerOptions
//!
//! When `hot = true`:
//!     watcher.rs detects change
//!     → loader.rs loads and validates
//!     → binary swaps router and reinstalls interceptors
//! ```
//!
//! # Design Decisions
//! - All fields have defaults to allow minimal configs
//! - Validation separates syntactic (serde) from semantic checks
//! - A failed reload keeps the running settings

pub mod loader;
pub mod schema;
pub mod validation;
pub mod watcher;

pub use loader::{load_config, load_or_default, parse_config, ConfigError};
pub use schema::{ListenerConfig, ObservabilityConfig, RouteConfig, Settings, TimeoutConfig};
pub use validation::ValidationError;
pub use watcher::SettingsWatcher;
