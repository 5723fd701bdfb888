//! Request-processing core of a small HTTP application framework.

pub mod commands;
pub mod config;
pub mod error;
pub mod http;
pub mod lifecycle;
pub mod middleware;
pub mod observability;
pub mod pipeline;
pub mod routing;
pub mod session;
pub mod testing;

pub use config::Settings;
pub use error::Error;
pub use http::{HttpError, Interceptor, Phases, Reply, Request, Server, ServerOptions};
pub use lifecycle::Shutdown;
pub use routing::{RouteTable, Routes};
pub use session::Session;
