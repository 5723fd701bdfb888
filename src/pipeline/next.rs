//! Single-use continuations.

use std::sync::{Arc, Mutex, PoisonError};

use futures_util::future::{self, BoxFuture};

use super::{Phase, PipelineError};

pub(crate) type Entry<A, T, E> =
    Arc<dyn Fn(A) -> BoxFuture<'static, Result<T, E>> + Send + Sync>;

pub(crate) type Layers<A, T, E> = Arc<[Arc<dyn Phase<A, T, E>>]>;

enum Step<A, T, E> {
    /// Runtime strategy: position in the layer list.
    Cursor {
        layers: Layers<A, T, E>,
        index: usize,
        terminal: Entry<A, T, E>,
    },
    /// Compiled strategy: the rest of the chain, already built.
    Compiled(Entry<A, T, E>),
}

/// The remainder of a pipeline, handed to each layer.
pub struct Next<A, T, E> {
    step: Step<A, T, E>,
}

impl<A, T, E> Next<A, T, E>
where
    A: 'static,
    T: 'static,
    E: 'static,
{
    pub(crate) fn cursor(layers: Layers<A, T, E>, index: usize, terminal: Entry<A, T, E>) -> Self {
        Self {
            step: Step::Cursor {
                layers,
                index,
                terminal,
            },
        }
    }

    pub(crate) fn compiled(entry: Entry<A, T, E>) -> Self {
        Self {
            step: Step::Compiled(entry),
        }
    }

    /// Invoke the next layer, or the terminal if this was the last layer.
    pub fn run(self, args: A) -> BoxFuture<'static, Result<T, E>> {
        match self.step {
            Step::Cursor {
                layers,
                index,
                terminal,
            } => match layers.get(index).cloned() {
                Some(layer) => layer.call(args, Next::cursor(layers, index + 1, terminal)),
                None => terminal(args),
            },
            Step::Compiled(entry) => entry(args),
        }
    }

    /// Convert into a cloneable continuation that enforces single use at
    /// run time.
    pub fn shared(self) -> SharedNext<A, T, E> {
        SharedNext {
            slot: Arc::new(Mutex::new(Some(self))),
        }
    }
}

impl<A, T, E> std::fmt::Debug for Next<A, T, E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.step {
            Step::Cursor { layers, index, .. } => f
                .debug_struct("Next")
                .field("index", index)
                .field("layers", &layers.len())
                .finish(),
            Step::Compiled(_) => f.debug_struct("Next").field("compiled", &true).finish(),
        }
    }
}

/// A continuation that can be cloned but still only runs once.
pub struct SharedNext<A, T, E> {
    slot: Arc<Mutex<Option<Next<A, T, E>>>>,
}

impl<A, T, E> Clone for SharedNext<A, T, E> {
    fn clone(&self) -> Self {
        Self {
            slot: Arc::clone(&self.slot),
        }
    }
}

impl<A, T, E> SharedNext<A, T, E>
where
    A: 'static,
    T: Send + 'static,
    E: From<PipelineError> + Send + 'static,
{
    /// Run the continuation. Every call after the first fails with
    /// [`PipelineError::NextAlreadyCalled`].
    pub fn run(&self, args: A) -> BoxFuture<'static, Result<T, E>> {
        let next = self
            .slot
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        match next {
            Some(next) => next.run(args),
            None => {
                tracing::error!("next() called more than once in one layer");
                Box::pin(future::ready(Err(PipelineError::NextAlreadyCalled.into())))
            }
        }
    }

    pub fn is_spent(&self) -> bool {
        self.slot
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_none()
    }
}
