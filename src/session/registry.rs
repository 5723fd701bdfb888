//! Process-wide session registry.
//!
//! A doubly-linked list threaded through a map keyed by `SessionId`, newest
//! session at the head. Unlinking is O(1); ownership lookups scan from the
//! head.
//!
//! Lock order is always registry first, then a session's id set.

use std::collections::HashMap;
use std::sync::{Arc, LazyLock, Mutex, MutexGuard, PoisonError};

use super::{OpId, SessionId, SessionInner};

static REGISTRY: LazyLock<Registry> = LazyLock::new(Registry::new);

pub(crate) fn registry() -> &'static Registry {
    &REGISTRY
}

struct Node {
    prev: Option<SessionId>,
    next: Option<SessionId>,
    session: Arc<SessionInner>,
}

#[derive(Default)]
struct Links {
    head: Option<SessionId>,
    nodes: HashMap<SessionId, Node>,
}

impl Links {
    fn iter(&self) -> impl Iterator<Item = &Arc<SessionInner>> {
        let mut cursor = self.head;
        std::iter::from_fn(move || {
            let node = self.nodes.get(&cursor?)?;
            cursor = node.next;
            Some(&node.session)
        })
    }
}

pub(crate) struct Registry {
    links: Mutex<Links>,
}

impl Registry {
    fn new() -> Self {
        Self {
            links: Mutex::new(Links::default()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Links> {
        self.links.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Insert at the head.
    pub(crate) fn link(&self, session: Arc<SessionInner>) {
        let mut links = self.lock();
        let id = session.id;
        let next = links.head;
        if let Some(next) = next.and_then(|next| links.nodes.get_mut(&next)) {
            next.prev = Some(id);
        }
        links.nodes.insert(
            id,
            Node {
                prev: None,
                next,
                session,
            },
        );
        links.head = Some(id);
    }

    pub(crate) fn unlink(&self, id: SessionId) -> bool {
        let mut links = self.lock();
        let Some(node) = links.nodes.remove(&id) else {
            return false;
        };
        match node.prev {
            Some(prev) => {
                if let Some(prev) = links.nodes.get_mut(&prev) {
                    prev.next = node.next;
                }
            }
            None => links.head = node.next,
        }
        if let Some(next) = node.next.and_then(|next| links.nodes.get_mut(&next)) {
            next.prev = node.prev;
        }
        true
    }

    pub(crate) fn owner_of(&self, op: OpId) -> Option<Arc<SessionInner>> {
        let links = self.lock();
        let owner = links.iter().find(|session| session.owns(op)).cloned();
        owner
    }

    /// Move `op` into `session`, taking it from any previous owner so that
    /// every operation has at most one owner.
    pub(crate) fn claim(&self, op: OpId, session: &Arc<SessionInner>) {
        let links = self.lock();
        for other in links.iter().filter(|other| other.id != session.id) {
            other.remove(op);
        }
        session.add(op);
    }

    /// Init hook: attribute `child` to whichever session owns `trigger`.
    pub(crate) fn inherit(&self, trigger: OpId, child: OpId) {
        let links = self.lock();
        let owner = links.iter().find(|session| session.owns(trigger)).cloned();
        drop(links);
        if let Some(owner) = owner {
            owner.add(child);
        }
    }

    /// Destroy hook: drop `op` from whichever session owns it.
    pub(crate) fn forget(&self, op: OpId) {
        let links = self.lock();
        for session in links.iter() {
            if session.remove(op) {
                return;
            }
        }
    }

    #[cfg(test)]
    pub(crate) fn contains(&self, id: SessionId) -> bool {
        self.lock().nodes.contains_key(&id)
    }

    #[cfg(test)]
    fn order(&self) -> Vec<SessionId> {
        self.lock().iter().map(|session| session.id).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::Session;

    #[test]
    fn newest_session_is_linked_first() {
        let a = Session::start();
        let b = Session::start();
        let c = Session::start();

        let order = registry().order();
        let pos = |id| order.iter().position(|x| *x == id).unwrap();
        assert!(pos(c.id()) < pos(b.id()));
        assert!(pos(b.id()) < pos(a.id()));

        b.end();
        assert!(!registry().contains(b.id()));
        let order = registry().order();
        assert!(order.contains(&a.id()));
        assert!(order.contains(&c.id()));

        c.end();
        a.end();
        assert!(!registry().contains(a.id()));
        assert!(!registry().contains(c.id()));
    }

    #[tokio::test]
    async fn nested_start_takes_the_op_over() {
        crate::session::tracked(async {
            let outer = Session::start();
            let inner = Session::start();
            let op = crate::session::current_op().unwrap();
            assert!(inner.owns(op));
            assert!(!outer.owns(op));
            inner.end();
            outer.end();
        })
        .await;
    }

    #[test]
    fn ending_twice_is_harmless() {
        let session = Session::start();
        session.end();
        session.end();
        assert!(!registry().contains(session.id()));
    }
}
