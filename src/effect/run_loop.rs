//! The per-fiber run loop.
//!
//! Sequencing combinators do not await one another. `flat_map`, `map`,
//! `zip_with` and `suspend` build [`Node`]s, and [`run`] drives them while
//! keeping pending continuations on an explicit stack. A recursive effect
//! or a long chain therefore runs at constant native stack depth; only
//! leaf futures are polled.
//!
//! Values cross continuation boundaries type-erased as [`Value`] and are
//! downcast by the continuation that knows their type.

use super::{BoxFuture, guarded};
use crate::fiber::FiberContext;
use crate::types::{Defect, Exit};
use std::any::{Any, type_name};
use std::sync::Arc;

/// A success value between two steps of the loop.
pub(crate) type Value = Box<dyn Any + Send>;

pub(crate) type LeafFn<E> = dyn Fn(FiberContext) -> BoxFuture<Exit<Value, E>> + Send + Sync;

type ThunkFn<E> = dyn Fn() -> Node<E> + Send + Sync;

/// Continuation of a [`Bind`]. Called once per run of the bind.
pub(crate) type ThenFn<E> = dyn Fn(Value) -> Next<E> + Send + Sync;

/// A continuation pushed for a single run.
pub(crate) type OnceFn<E> = Box<dyn FnOnce(Value) -> Next<E> + Send>;

/// An effect as the run loop sees it.
pub(crate) enum Node<E> {
    /// A future to poll.
    Leaf(Arc<LeafFn<E>>),
    /// Builds the node to run, lazily.
    Suspend(Arc<ThunkFn<E>>),
    /// Runs a body, then feeds its value to a continuation.
    Bind(Arc<Bind<E>>),
}

impl<E> Clone for Node<E> {
    fn clone(&self) -> Self {
        match self {
            Self::Leaf(leaf) => Self::Leaf(Arc::clone(leaf)),
            Self::Suspend(thunk) => Self::Suspend(Arc::clone(thunk)),
            Self::Bind(bind) => Self::Bind(Arc::clone(bind)),
        }
    }
}

impl<E> Node<E> {
    pub(crate) fn leaf<F>(f: F) -> Self
    where
        F: Fn(FiberContext) -> BoxFuture<Exit<Value, E>> + Send + Sync + 'static,
    {
        Self::Leaf(Arc::new(f))
    }

    pub(crate) fn suspend<F>(f: F) -> Self
    where
        F: Fn() -> Self + Send + Sync + 'static,
    {
        Self::Suspend(Arc::new(f))
    }

    pub(crate) fn bind<F>(body: Self, then: F) -> Self
    where
        F: Fn(Value) -> Next<E> + Send + Sync + 'static,
    {
        Self::Bind(Arc::new(Bind {
            body: Some(body),
            then: Box::new(then),
        }))
    }
}

/// A body and what to do with its value.
pub(crate) struct Bind<E> {
    /// Only `None` while the bind is being torn down.
    body: Option<Node<E>>,
    then: Box<ThenFn<E>>,
}

impl<E> Drop for Bind<E> {
    // Left-nested chains are as deep as they are long; unlink them one
    // bind at a time instead of recursing through `body`.
    fn drop(&mut self) {
        let mut next = self.body.take();
        while let Some(Node::Bind(bind)) = next {
            next = match Arc::try_unwrap(bind) {
                Ok(mut inner) => inner.body.take(),
                Err(_) => None,
            };
        }
    }
}

/// What the loop does after a continuation returns.
pub(crate) enum Next<E> {
    /// Runs a node.
    Run(Node<E>),
    /// Runs a node, then hands its value to a one-shot continuation.
    Then(Node<E>, OnceFn<E>),
    /// Completes the current step with an exit.
    Exit(Exit<Value, E>),
}

impl<E> Next<E> {
    pub(crate) fn succeed<A: Send + 'static>(value: A) -> Self {
        Self::Exit(Exit::Success(Box::new(value)))
    }

    pub(crate) fn die(defect: Defect) -> Self {
        Self::Exit(Exit::die(defect))
    }
}

enum Frame<E> {
    Bind(Arc<Bind<E>>),
    Once(OnceFn<E>),
}

/// Recovers a typed value from the loop.
pub(crate) fn downcast<A: Any>(value: Value) -> Result<A, Defect> {
    value
        .downcast::<A>()
        .map(|boxed| *boxed)
        .map_err(|_| Defect::new(format!("run loop value is not a {}", type_name::<A>())))
}

/// Runs `f`, which builds the next step, turning a panic into a defect.
fn step<E>(f: impl FnOnce() -> Next<E>) -> Next<E> {
    guarded(f).unwrap_or_else(Next::die)
}

/// Drives `root` to completion on the fiber described by `ctx`.
///
/// A failure skips every pending continuation: binds only see successes.
pub(crate) async fn run<E: Send + 'static>(root: Node<E>, ctx: FiberContext) -> Exit<Value, E> {
    let mut frames: Vec<Frame<E>> = Vec::new();
    let mut next = Next::Run(root);
    loop {
        let exit = match next {
            Next::Exit(exit) => exit,
            Next::Then(node, then) => {
                frames.push(Frame::Once(then));
                next = Next::Run(node);
                continue;
            }
            Next::Run(Node::Suspend(thunk)) => {
                next = step(|| Next::Run(thunk()));
                continue;
            }
            Next::Run(Node::Bind(bind)) => {
                next = match &bind.body {
                    Some(body) => Next::Run(body.clone()),
                    None => Next::die(Defect::new("bind ran after it was torn down")),
                };
                frames.push(Frame::Bind(bind));
                continue;
            }
            Next::Run(Node::Leaf(leaf)) => leaf(ctx.clone()).await,
        };
        let value = match exit {
            Exit::Success(value) => value,
            Exit::Failure(cause) => return Exit::Failure(cause),
        };
        next = match frames.pop() {
            Some(Frame::Bind(bind)) => step(|| (bind.then)(value)),
            Some(Frame::Once(then)) => step(|| then(value)),
            None => return Exit::Success(value),
        };
    }
}
