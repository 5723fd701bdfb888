//! Layered pipeline engine.
//!
//! # Data Flow
//! ```text
//! Pipeline::call(args)
//!     → layer 0 (args, next₀)
//!         → next₀.run(args') → layer 1 (args', next₁)
//!             → ... → terminal(argsₙ)
//!         ← result flows back out in reverse order
//! ```
//!
//! # Design Decisions
//! - `Next` is consumed by `run`, so calling it twice does not compile.
//!   Layers that must hand the continuation to more than one place convert it
//!   with `Next::shared()`; a second run then fails with
//!   `PipelineError::NextAlreadyCalled` and downstream layers are not re-run.
//! - A layer short-circuits by returning without running `next`.
//! - Two strategies with identical behaviour: `compose` walks a cursor at call
//!   time, `compile` builds the nested closure chain once up front.

mod compose;
mod next;

use std::future::Future;

pub use futures_util::future::BoxFuture;

pub use compose::{Pipeline, Strategy};
pub use next::{Next, SharedNext};

/// Programming errors raised by the engine itself.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PipelineError {
    #[error("next() already called")]
    NextAlreadyCalled,
}

/// One layer of a pipeline.
pub trait Phase<A, T, E>: Send + Sync + 'static {
    fn call(&self, args: A, next: Next<A, T, E>) -> BoxFuture<'static, Result<T, E>>;
}

/// Adapts an async closure into a [`Phase`].
#[derive(Clone)]
pub struct PhaseFn<F> {
    f: F,
}

/// Wrap `f` as a pipeline layer.
pub fn phase_fn<A, T, E, F, Fut>(f: F) -> PhaseFn<F>
where
    F: Fn(A, Next<A, T, E>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<T, E>> + Send + 'static,
{
    PhaseFn { f }
}

impl<A, T, E, F, Fut> Phase<A, T, E> for PhaseFn<F>
where
    F: Fn(A, Next<A, T, E>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<T, E>> + Send + 'static,
    A: Send + 'static,
    T: Send + 'static,
    E: Send + 'static,
{
    fn call(&self, args: A, next: Next<A, T, E>) -> BoxFuture<'static, Result<T, E>> {
        Box::pin((self.f)(args, next))
    }
}

impl<F> std::fmt::Debug for PhaseFn<F> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PhaseFn").finish_non_exhaustive()
    }
}
