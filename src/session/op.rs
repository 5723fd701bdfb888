//! Operation identifiers and their task-local propagation.

use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};

use tokio::task::JoinHandle;

use super::registry::registry;

/// Global atomic counter for operation IDs.
static OP_ID_COUNTER: AtomicU64 = AtomicU64::new(1);

tokio::task_local! {
    static CURRENT_OP: OpId;
}

/// Identifier of one tracked asynchronous operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct OpId(u64);

impl OpId {
    fn next() -> Self {
        Self(OP_ID_COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    /// Get the raw ID value.
    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl std::fmt::Display for OpId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "op-{}", self.0)
    }
}

/// The operation whose future is currently being polled, if it is tracked.
pub fn current_op() -> Option<OpId> {
    CURRENT_OP.try_with(|op| *op).ok()
}

/// Lifetime of one tracked operation. Creation runs the init hook, drop runs
/// the destroy hook.
struct OpGuard {
    id: OpId,
}

impl OpGuard {
    fn child_of(trigger: Option<OpId>) -> Self {
        let id = OpId::next();
        if let Some(trigger) = trigger {
            registry().inherit(trigger, id);
        }
        Self { id }
    }
}

impl Drop for OpGuard {
    fn drop(&mut self) {
        registry().forget(self.id);
    }
}

/// Run `fut` as a fresh operation caused by the current one.
///
/// The init hook fires here, at the spawn point, so the child is attributed
/// to the caller's session even if it is first polled much later.
pub fn tracked<F>(fut: F) -> impl Future<Output = F::Output>
where
    F: Future,
{
    let guard = OpGuard::child_of(current_op());
    let id = guard.id;
    async move {
        let _guard = guard;
        CURRENT_OP.scope(id, fut).await
    }
}

/// `tokio::spawn` that keeps the new task attributed to the current session.
pub fn spawn<F>(fut: F) -> JoinHandle<F::Output>
where
    F: Future + Send + 'static,
    F::Output: Send + 'static,
{
    tokio::spawn(tracked(fut))
}
