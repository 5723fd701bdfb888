//! HTTP request processing.
//!
//! # Data Flow
//! ```text
//! transport request (axum fallback or Suite::request)
//!     → server.rs (tracked op, Session::start, Request façade)
//!     → request pipeline: membrane → [layer → membrane]* → route
//!     → view pipeline:    membrane → [layer → membrane]* → View::call
//!     → response.rs (Reply or HttpError → Response, request-id header)
//!     → body.rs Completion (Finished | Closed ⇒ settle, end session)
//!
//! request.body()
//!     → body pipeline: [layer]* → 415 terminal
//!     → memoised on the façade
//! ```
//!
//! # Design Decisions
//! - Boundary layers ("membranes") sit first and after every interceptor's
//!   request/view layer so each layer sees a normalised result
//! - The façade owns its raw body until either `body()` or `take_raw()`
//!   consumes it

pub mod body;
pub mod error;
pub mod interceptor;
mod membrane;
pub mod request;
pub mod response;
pub mod server;

pub use body::{BodyStream, BodyValue, Settled};
pub use error::{ErrorKind, HttpError};
pub use interceptor::{
    body_layer, interceptor, request_layer, server_layer, suite_layer, testcase_layer, view_layer,
    BodyArgs, FnInterceptor, Interceptor, Phases, ViewArgs,
};
pub use request::{MediaRange, Request, RequestState};
pub use response::{Reply, ReplyBody};
pub use server::{Server, ServerOptions, TransportError, REQUEST_ID};
