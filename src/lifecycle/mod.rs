//! Lifecycle management subsystem.
//!
//! # Data Flow
//! ```text
//! Startup (startup.rs):
//!     Settings → ServerOptions, Routes, middleware → Server
//!
//! Reload (startup.rs):
//!     reloaded Settings → Server::set_router → Server::set_interceptors
//!         (old server pipeline torn down before the new one starts)
//!
//! Shutdown (shutdown.rs / signals.rs):
//!     SIGTERM/SIGINT → Shutdown::trigger → Server::serve stops accepting
//!         → server pipeline teardown → exit
//! ```
//!
//! # Design Decisions
//! - Fail fast: any startup error is fatal
//! - A reload that fails to build keeps the running server untouched

pub mod shutdown;
pub mod signals;
pub mod startup;

pub use shutdown::Shutdown;
pub use signals::wait_for_signal;
pub use startup::{build_server, reload, server_options};
