//! Pipeline composition strategies.

use std::future::Future;
use std::sync::Arc;

use futures_util::future::BoxFuture;

use super::next::{Entry, Layers, Next};
use super::Phase;

/// How a pipeline threads calls through its layers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strategy {
    /// Walk a cursor over the layer list on every call.
    Runtime,
    /// Nested closure chain built once at composition time.
    Compiled,
}

/// An ordered list of layers of one phase family plus a terminal.
pub struct Pipeline<A, T, E> {
    entry: Entry<A, T, E>,
    depth: usize,
    strategy: Strategy,
}

impl<A, T, E> Clone for Pipeline<A, T, E> {
    fn clone(&self) -> Self {
        Self {
            entry: Arc::clone(&self.entry),
            depth: self.depth,
            strategy: self.strategy,
        }
    }
}

fn boxed_terminal<A, T, E, F, Fut>(terminal: F) -> Entry<A, T, E>
where
    F: Fn(A) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<T, E>> + Send + 'static,
{
    Arc::new(move |args| -> BoxFuture<'static, Result<T, E>> { Box::pin(terminal(args)) })
}

impl<A, T, E> Pipeline<A, T, E>
where
    A: Send + 'static,
    T: Send + 'static,
    E: Send + 'static,
{
    /// Runtime composition: each call starts a fresh cursor at layer 0.
    pub fn compose<F, Fut>(layers: Vec<Arc<dyn Phase<A, T, E>>>, terminal: F) -> Self
    where
        F: Fn(A) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<T, E>> + Send + 'static,
    {
        let depth = layers.len();
        let terminal = boxed_terminal(terminal);
        let entry: Entry<A, T, E> = if layers.is_empty() {
            terminal
        } else {
            let layers: Layers<A, T, E> = layers.into();
            Arc::new(move |args| {
                Next::cursor(Arc::clone(&layers), 0, Arc::clone(&terminal)).run(args)
            })
        };

        Self {
            entry,
            depth,
            strategy: Strategy::Runtime,
        }
    }

    /// Precompiled composition: every layer's continuation is resolved now,
    /// so a call only walks prebuilt closures.
    pub fn compile<F, Fut>(layers: Vec<Arc<dyn Phase<A, T, E>>>, terminal: F) -> Self
    where
        F: Fn(A) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<T, E>> + Send + 'static,
    {
        let depth = layers.len();
        let mut entry = boxed_terminal(terminal);
        for layer in layers.into_iter().rev() {
            let inner = entry;
            entry = Arc::new(move |args| layer.call(args, Next::compiled(Arc::clone(&inner))));
        }

        Self {
            entry,
            depth,
            strategy: Strategy::Compiled,
        }
    }

    /// Invoke the outermost layer.
    pub fn call(&self, args: A) -> BoxFuture<'static, Result<T, E>> {
        (self.entry)(args)
    }

    /// Number of layers, not counting the terminal.
    pub fn len(&self) -> usize {
        self.depth
    }

    pub fn is_empty(&self) -> bool {
        self.depth == 0
    }

    pub fn strategy(&self) -> Strategy {
        self.strategy
    }
}

impl<A, T, E> std::fmt::Debug for Pipeline<A, T, E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pipeline")
            .field("depth", &self.depth)
            .field("strategy", &self.strategy)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::{phase_fn, PipelineError};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    #[derive(Debug, PartialEq)]
    enum TestError {
        Pipeline(PipelineError),
        Stopped(&'static str),
    }

    impl From<PipelineError> for TestError {
        fn from(err: PipelineError) -> Self {
            TestError::Pipeline(err)
        }
    }

    type Log = Arc<Mutex<Vec<String>>>;
    type Layer = Arc<dyn Phase<u32, u32, TestError>>;

    fn logging_layer(name: &'static str, log: Log) -> Layer {
        Arc::new(phase_fn(move |n: u32, next: Next<u32, u32, TestError>| {
            let log = Arc::clone(&log);
            async move {
                log.lock().unwrap().push(format!("{name} in {n}"));
                let out = next.run(n + 1).await?;
                log.lock().unwrap().push(format!("{name} out {out}"));
                Ok(out * 10)
            }
        }))
    }

    fn build(strategy: Strategy, layers: Vec<Layer>) -> Pipeline<u32, u32, TestError> {
        let terminal = |n: u32| async move { Ok(n) };
        match strategy {
            Strategy::Runtime => Pipeline::compose(layers, terminal),
            Strategy::Compiled => Pipeline::compile(layers, terminal),
        }
    }

    const STRATEGIES: [Strategy; 2] = [Strategy::Runtime, Strategy::Compiled];

    #[tokio::test]
    async fn layers_nest_in_registration_order() {
        for strategy in STRATEGIES {
            let log: Log = Default::default();
            let pipeline = build(
                strategy,
                vec![
                    logging_layer("a", Arc::clone(&log)),
                    logging_layer("b", Arc::clone(&log)),
                ],
            );
            assert_eq!(pipeline.len(), 2);
            assert_eq!(pipeline.strategy(), strategy);

            let out = pipeline.call(1).await.unwrap();
            assert_eq!(out, 300);
            assert_eq!(
                *log.lock().unwrap(),
                vec!["a in 1", "b in 2", "b out 3", "a out 30"]
            );
        }
    }

    #[tokio::test]
    async fn zero_layers_call_terminal() {
        for strategy in STRATEGIES {
            let pipeline = build(strategy, Vec::new());
            assert!(pipeline.is_empty());
            assert_eq!(pipeline.call(7).await.unwrap(), 7);
        }
    }

    #[tokio::test]
    async fn short_circuit_skips_terminal() {
        for strategy in STRATEGIES {
            let reached = Arc::new(AtomicUsize::new(0));
            let counter = Arc::clone(&reached);
            let stop: Layer = Arc::new(phase_fn(|_n: u32, _next: Next<u32, u32, TestError>| async {
                Err::<u32, _>(TestError::Stopped("denied"))
            }));
            let pipeline: Pipeline<u32, u32, TestError> = match strategy {
                Strategy::Runtime => Pipeline::compose(vec![stop], move |n| {
                    counter.fetch_add(1, Ordering::SeqCst);
                    async move { Ok(n) }
                }),
                Strategy::Compiled => Pipeline::compile(vec![stop], move |n| {
                    counter.fetch_add(1, Ordering::SeqCst);
                    async move { Ok(n) }
                }),
            };

            assert_eq!(pipeline.call(1).await, Err(TestError::Stopped("denied")));
            assert_eq!(reached.load(Ordering::SeqCst), 0);
        }
    }

    #[tokio::test]
    async fn shared_next_rejects_second_call() {
        for strategy in STRATEGIES {
            let downstream = Arc::new(AtomicUsize::new(0));
            let counter = Arc::clone(&downstream);
            let twice: Layer = Arc::new(phase_fn(|n: u32, next: Next<u32, u32, TestError>| async move {
                let next = next.shared();
                let first = next.run(n).await?;
                assert!(next.is_spent());
                match next.clone().run(n).await {
                    Err(TestError::Pipeline(PipelineError::NextAlreadyCalled)) => Ok(first),
                    other => panic!("expected NextAlreadyCalled, got {other:?}"),
                }
            }));
            let count: Layer = Arc::new(phase_fn(move |n: u32, next: Next<u32, u32, TestError>| {
                counter.fetch_add(1, Ordering::SeqCst);
                next.run(n)
            }));

            let pipeline = build(strategy, vec![twice, count]);
            assert_eq!(pipeline.call(4).await.unwrap(), 4);
            assert_eq!(downstream.load(Ordering::SeqCst), 1);
        }
    }

    #[tokio::test]
    async fn pipeline_is_reusable_across_calls() {
        for strategy in STRATEGIES {
            let log: Log = Default::default();
            let pipeline = build(strategy, vec![logging_layer("a", Arc::clone(&log))]);
            let (x, y) = tokio::join!(pipeline.call(1), pipeline.clone().call(5));
            assert_eq!(x.unwrap(), 20);
            assert_eq!(y.unwrap(), 60);
            assert_eq!(log.lock().unwrap().len(), 4);
        }
    }
}
