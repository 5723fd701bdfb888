//! Implicit session tracking.
//!
//! # Data Flow
//! ```text
//! unit of work begins (connection accepted, test case invoked)
//!     → op.rs (fresh tracked operation, task-local OpId)
//!     → Session::start() (link at registry head, claim current op)
//!
//! async boundary (session::spawn / session::tracked)
//!     → init hook: child op claimed by the parent's session
//!     → child future runs with its own OpId in scope
//!     → destroy hook on drop: op forgotten by its owner
//!
//! deep inside a call chain
//!     → Session::current() (scan registry, newest first)
//!     → payload lookup (e.g. the current Request)
//! ```
//!
//! # Design Decisions
//! - Propagation is explicit: every async boundary that should stay attributed
//!   to the current request must go through `tracked` or `spawn`. A bare
//!   `tokio::spawn` escapes tracking, which is how work detaches on purpose.
//! - The registry is a process-wide doubly-linked list of sessions; critical
//!   sections are limited to link/unlink/scan.
//! - `Session::current()` returning `None` is a normal outcome.

mod op;
mod registry;

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Instant;

use axum::http::Extensions;

pub use op::{current_op, spawn, tracked, OpId};

use registry::registry;

static SESSION_ID_COUNTER: AtomicU64 = AtomicU64::new(1);

/// Unique identifier for a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SessionId(u64);

impl SessionId {
    fn next() -> Self {
        Self(SESSION_ID_COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    /// Get the raw ID value.
    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "session-{}", self.0)
    }
}

pub(crate) struct SessionInner {
    id: SessionId,
    ops: Mutex<HashSet<OpId>>,
    payload: Mutex<Extensions>,
    started: Instant,
    active: AtomicBool,
}

impl SessionInner {
    pub(crate) fn owns(&self, op: OpId) -> bool {
        self.ops
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(&op)
    }

    pub(crate) fn add(&self, op: OpId) {
        self.ops
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(op);
    }

    pub(crate) fn remove(&self, op: OpId) -> bool {
        self.ops
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&op)
    }
}

/// Handle to one logical unit of ambient context.
///
/// Cloning is cheap; all clones refer to the same session.
#[derive(Clone)]
pub struct Session {
    inner: Arc<SessionInner>,
}

impl Session {
    /// Start a session, link it at the head of the registry and claim the
    /// currently executing operation (if any) into it.
    pub fn start() -> Self {
        let session = Self {
            inner: Arc::new(SessionInner {
                id: SessionId::next(),
                ops: Mutex::new(HashSet::new()),
                payload: Mutex::new(Extensions::new()),
                started: Instant::now(),
                active: AtomicBool::new(true),
            }),
        };
        registry().link(Arc::clone(&session.inner));
        session.claim();

        tracing::trace!(session = %session.id(), op = ?current_op(), "Session started");
        session
    }

    /// The session owning the currently executing operation.
    pub fn current() -> Option<Self> {
        let op = current_op()?;
        registry().owner_of(op).map(|inner| Self { inner })
    }

    /// Unlink the session from the registry. The claimed set is left as-is;
    /// it is simply no longer consulted.
    pub fn end(&self) {
        if self.inner.active.swap(false, Ordering::AcqRel) {
            registry().unlink(self.inner.id);
            tracing::trace!(
                session = %self.id(),
                elapsed_ms = self.inner.started.elapsed().as_millis() as u64,
                "Session ended"
            );
        }
    }

    /// Claim the currently executing operation, moving it out of any other
    /// session.
    pub fn claim(&self) {
        if let Some(op) = current_op() {
            registry().claim(op, &self.inner);
        }
    }

    /// Release the currently executing operation. Work spawned from it
    /// afterwards is no longer attributed to this session.
    pub fn release(&self) {
        if let Some(op) = current_op() {
            self.inner.remove(op);
        }
    }

    pub fn id(&self) -> SessionId {
        self.inner.id
    }

    pub fn is_active(&self) -> bool {
        self.inner.active.load(Ordering::Acquire)
    }

    /// Whether `op` is currently claimed by this session.
    pub fn owns(&self, op: OpId) -> bool {
        self.inner.owns(op)
    }

    /// Snapshot of the claimed operation ids.
    pub fn ops(&self) -> Vec<OpId> {
        let ops = self.inner.ops.lock().unwrap_or_else(PoisonError::into_inner);
        let mut ops: Vec<OpId> = ops.iter().copied().collect();
        ops.sort();
        ops
    }

    /// Attach a payload value, replacing any previous value of the same type.
    pub fn insert<T: Clone + Send + Sync + 'static>(&self, value: T) -> Option<T> {
        self.inner
            .payload
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(value)
    }

    pub fn get<T: Clone + Send + Sync + 'static>(&self) -> Option<T> {
        self.inner
            .payload
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get::<T>()
            .cloned()
    }

    pub fn remove<T: Clone + Send + Sync + 'static>(&self) -> Option<T> {
        self.inner
            .payload
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove::<T>()
    }

    /// Drop every attached payload value.
    pub fn clear_payload(&self) {
        self.inner
            .payload
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }
}

impl PartialEq for Session {
    fn eq(&self, other: &Self) -> bool {
        self.inner.id == other.inner.id
    }
}

impl Eq for Session {}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.inner.id)
            .field("active", &self.is_active())
            .finish()
    }
}

/// Ends a session and drops its payload when dropped.
///
/// Held for the lifetime of one unit of work so teardown happens on every
/// exit path, including cancellation.
#[derive(Debug)]
pub struct SessionGuard {
    session: Session,
}

impl SessionGuard {
    pub fn new(session: Session) -> Self {
        Self { session }
    }

    pub fn session(&self) -> &Session {
        &self.session
    }
}

impl Drop for SessionGuard {
    fn drop(&mut self) {
        self.session.end();
        self.session.clear_payload();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn no_session_outside_tracked_scope() {
        assert!(current_op().is_none());
        assert!(Session::current().is_none());
    }

    #[tokio::test]
    async fn start_claims_current_op() {
        tracked(async {
            let session = Session::start();
            let op = current_op().expect("tracked scope has an op");
            assert!(session.owns(op));
            assert_eq!(Session::current(), Some(session.clone()));
            session.end();
            assert!(Session::current().is_none());
        })
        .await;
    }

    #[tokio::test]
    async fn spawned_work_inherits_session() {
        tracked(async {
            let session = Session::start();
            let seen = spawn(async {
                tokio::time::sleep(Duration::from_millis(5)).await;
                spawn(async { Session::current() }).await.unwrap()
            })
            .await
            .unwrap();
            assert_eq!(seen, Some(session.clone()));
            session.end();
        })
        .await;
    }

    #[tokio::test]
    async fn destroyed_ops_are_forgotten() {
        tracked(async {
            let session = Session::start();
            let before = session.ops().len();
            let child = spawn(async { current_op().unwrap() }).await.unwrap();
            assert!(!session.owns(child));
            assert_eq!(session.ops().len(), before);
            session.end();
        })
        .await;
    }

    #[tokio::test]
    async fn released_op_stops_propagation() {
        tracked(async {
            let session = Session::start();
            session.release();
            assert!(Session::current().is_none());
            let seen = spawn(async { Session::current() }).await.unwrap();
            assert!(seen.is_none());
            session.end();
        })
        .await;
    }

    #[tokio::test]
    async fn untracked_spawn_escapes() {
        tracked(async {
            let session = Session::start();
            let seen = tokio::spawn(async { Session::current() }).await.unwrap();
            assert!(seen.is_none());
            session.end();
        })
        .await;
    }

    #[tokio::test]
    async fn interleaved_sessions_stay_separate() {
        let (a, b) = tokio::join!(
            tracked(async {
                let session = Session::start();
                tokio::time::sleep(Duration::from_millis(10)).await;
                let seen = spawn(async { Session::current() }).await.unwrap();
                session.end();
                (session, seen)
            }),
            tracked(async {
                let session = Session::start();
                tokio::time::sleep(Duration::from_millis(5)).await;
                let seen = spawn(async { Session::current() }).await.unwrap();
                session.end();
                (session, seen)
            }),
        );
        assert_eq!(a.1, Some(a.0.clone()));
        assert_eq!(b.1, Some(b.0.clone()));
        assert_ne!(a.0, b.0);
    }

    #[tokio::test]
    async fn guard_ends_session_and_clears_payload() {
        let session = tracked(async {
            let session = Session::start();
            session.insert(String::from("payload"));
            let guard = SessionGuard::new(session.clone());
            assert_eq!(guard.session().get::<String>().as_deref(), Some("payload"));
            drop(guard);
            session
        })
        .await;
        assert!(!session.is_active());
        assert!(session.get::<String>().is_none());
    }
}
