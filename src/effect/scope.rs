//! Scopes: finalizers tied to the lifetime of a scoped effect.
//!
//! [`Effect::scoped`] opens a scope, runs its body with the scope in the
//! fiber context, and closes the scope when the body ends. Closing runs the
//! registered finalizers uninterruptibly, in reverse order of registration,
//! each receiving the body's exit.

use super::{Effect, guarded, merge_finalizer};
use crate::fiber::{FiberContext, FiberHandle};
use crate::tracing_compat::trace;
use crate::types::{Cause, Defect, Exit};
use parking_lot::Mutex;
use std::convert::Infallible;
use std::fmt;
use std::sync::Arc;

/// The exit a finalizer observes. Value and error types are erased so one
/// scope can hold finalizers from any effect.
pub type ScopeExit = Exit<(), ()>;

type Finalizer = Box<dyn FnOnce(&ScopeExit) -> Effect<(), Infallible> + Send>;

struct ScopeState {
    finalizers: Vec<Finalizer>,
    closed: bool,
}

/// A collection of finalizers closed when a scoped effect ends.
#[derive(Clone)]
pub struct Scope {
    state: Arc<Mutex<ScopeState>>,
}

impl fmt::Debug for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.lock();
        f.debug_struct("Scope")
            .field("finalizers", &state.finalizers.len())
            .field("closed", &state.closed)
            .finish()
    }
}

impl Scope {
    pub(crate) fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(ScopeState {
                finalizers: Vec::new(),
                closed: false,
            })),
        }
    }

    /// Registers a finalizer. Fails with the finalizer handed back if the
    /// scope has already closed.
    pub(crate) fn add(&self, finalizer: Finalizer) -> Result<(), Finalizer> {
        let mut state = self.state.lock();
        if state.closed {
            return Err(finalizer);
        }
        state.finalizers.push(finalizer);
        Ok(())
    }

    /// Number of finalizers waiting for the scope to close.
    #[must_use]
    pub fn pending(&self) -> usize {
        self.state.lock().finalizers.len()
    }

    /// Returns true once the scope has closed.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.state.lock().closed
    }

    /// Runs every finalizer, last registered first, and returns the
    /// sequential composition of their failures.
    pub(crate) async fn close(&self, ctx: &FiberContext, exit: &ScopeExit) -> Exit<(), Infallible> {
        let finalizers = {
            let mut state = self.state.lock();
            state.closed = true;
            std::mem::take(&mut state.finalizers)
        };
        trace!(fiber = %ctx.id(), count = finalizers.len(), "closing scope");

        let _mask = ctx.core().mask();
        let mut cause = Cause::empty();
        for finalizer in finalizers.into_iter().rev() {
            let next = guarded(|| finalizer(exit));
            let result = match next {
                Ok(effect) => effect.run_in(ctx.clone()).await,
                Err(defect) => Exit::die(defect),
            };
            if let Exit::Failure(failed) = result {
                cause = Cause::sequential(cause, failed);
            }
        }
        if cause.is_empty() {
            Exit::Success(())
        } else {
            Exit::Failure(cause)
        }
    }
}

/// Registers a finalizer in the running fiber's scope, or explains why it
/// could not be.
fn register(ctx: &FiberContext, finalizer: Finalizer) -> Result<(), Defect> {
    let Some(scope) = ctx.scope() else {
        return Err(Defect::new("no scope: wrap the effect in Effect::scoped"));
    };
    scope
        .add(finalizer)
        .map_err(|_| Defect::new("scope already closed"))
}

impl<A, E> Effect<A, E>
where
    A: Send + 'static,
    E: Send + 'static,
{
    /// Runs `body` in a fresh scope and closes the scope when it ends.
    ///
    /// Finalizer failures are recorded after the body's cause, or replace
    /// the body's success.
    #[must_use]
    pub fn scoped(body: Self) -> Self {
        Self::from_fn(move |ctx: FiberContext| {
            let body = body.clone();
            async move {
                let scope = Scope::new();
                let exit = body.run_in(ctx.with_scope(Some(scope.clone()))).await;
                let fin = scope.close(&ctx, &exit.erase()).await;
                ctx.leave_mask(merge_finalizer(exit, fin))
            }
        })
    }

    /// Acquires a resource uninterruptibly and registers `release` in the
    /// enclosing scope. Dies if there is no enclosing scope.
    #[must_use]
    pub fn acquire_release<R>(acquire: Self, release: R) -> Self
    where
        A: Clone,
        R: Fn(A, &ScopeExit) -> Effect<(), Infallible> + Send + Sync + 'static,
    {
        let release = Arc::new(release);
        Self::from_fn(move |ctx: FiberContext| {
            let acquire = acquire.clone();
            let release = Arc::clone(&release);
            async move {
                if ctx.scope().is_none() {
                    return Exit::die("acquire_release outside of a scope");
                }
                let exit = {
                    let _mask = ctx.core().mask();
                    match acquire.run_in(ctx.clone()).await {
                        Exit::Success(resource) => {
                            let held = resource.clone();
                            let finalizer: Finalizer = Box::new(move |exit| release(held, exit));
                            match register(&ctx, finalizer) {
                                Ok(()) => Exit::Success(resource),
                                Err(defect) => Exit::die(defect),
                            }
                        }
                        failed @ Exit::Failure(_) => failed,
                    }
                };
                ctx.leave_mask(exit)
            }
        })
    }

    /// Forks `self` as a child tied to the enclosing scope: when the scope
    /// closes, the child is interrupted and awaited.
    #[must_use]
    pub fn fork_scoped<E2: Send + 'static>(self) -> Effect<FiberHandle<A, E>, E2> {
        Effect::from_fn(move |ctx: FiberContext| {
            let effect = self.clone();
            async move {
                if ctx.scope().is_none() {
                    return Exit::die("fork_scoped outside of a scope");
                }
                let _mask = ctx.core().mask();
                let handle = effect.fork_in(&ctx);
                let child = handle.clone();
                let finalizer: Finalizer = Box::new(move |_| child.interrupt_and_wait());
                match register(&ctx, finalizer) {
                    Ok(()) => Exit::Success(handle),
                    Err(defect) => {
                        handle.request_interrupt(ctx.id());
                        Exit::die(defect)
                    }
                }
            }
        })
    }
}

impl<E: Send + 'static> Effect<(), E> {
    /// Registers `finalizer` in the enclosing scope.
    #[must_use]
    pub fn add_finalizer<F>(finalizer: F) -> Self
    where
        F: Fn(&ScopeExit) -> Effect<(), Infallible> + Send + Sync + 'static,
    {
        let finalizer = Arc::new(finalizer);
        Self::from_fn(move |ctx: FiberContext| {
            let finalizer = Arc::clone(&finalizer);
            let boxed: Finalizer = Box::new(move |exit| finalizer(exit));
            let exit = match register(&ctx, boxed) {
                Ok(()) => Exit::Success(()),
                Err(defect) => Exit::die(defect),
            };
            std::future::ready(exit)
        })
    }
}
