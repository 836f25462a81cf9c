//! The execution context an effect body runs with.

use super::core::{FiberCore, SuspendReason};
use super::suspend::Suspend;
use crate::effect::context::Context;
use crate::effect::scope::Scope;
use crate::runtime::RuntimeHandle;
use crate::runtime::yield_now::{YieldNow, yield_now};
use crate::time::Sleep;
use crate::types::{Exit, FiberId, Time};
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

/// Everything an effect needs from the fiber running it: identity and
/// interruption state, the runtime, the service context and the enclosing
/// scope.
#[derive(Clone)]
pub(crate) struct FiberContext {
    core: Arc<FiberCore>,
    runtime: RuntimeHandle,
    services: Context,
    scope: Option<Scope>,
}

impl fmt::Debug for FiberContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FiberContext")
            .field("fiber", &self.core.id())
            .field("services", &self.services.len())
            .field("scoped", &self.scope.is_some())
            .finish_non_exhaustive()
    }
}

impl FiberContext {
    pub(crate) const fn new(core: Arc<FiberCore>, runtime: RuntimeHandle, services: Context) -> Self {
        Self {
            core,
            runtime,
            services,
            scope: None,
        }
    }

    pub(crate) fn id(&self) -> FiberId {
        self.core.id()
    }

    pub(crate) const fn core(&self) -> &Arc<FiberCore> {
        &self.core
    }

    pub(crate) const fn runtime(&self) -> &RuntimeHandle {
        &self.runtime
    }

    pub(crate) const fn services(&self) -> &Context {
        &self.services
    }

    pub(crate) const fn scope(&self) -> Option<&Scope> {
        self.scope.as_ref()
    }

    pub(crate) fn with_services(&self, services: Context) -> Self {
        Self {
            services,
            ..self.clone()
        }
    }

    pub(crate) fn with_scope(&self, scope: Option<Scope>) -> Self {
        Self {
            scope,
            ..self.clone()
        }
    }

    pub(crate) fn now(&self) -> Time {
        self.runtime.now()
    }

    /// Wraps `fut` in a suspension point of this fiber.
    pub(crate) fn suspend<F: Future>(&self, reason: SuspendReason, fut: F) -> Suspend<F> {
        Suspend::new(Arc::clone(&self.core), reason, fut)
    }

    pub(crate) fn sleep(&self, duration: Duration) -> Suspend<Sleep> {
        let deadline = self.now().saturating_add(duration);
        self.suspend(
            SuspendReason::Sleep,
            Sleep::until(Arc::clone(self.runtime.timer()), deadline),
        )
    }

    pub(crate) fn yield_now(&self) -> Suspend<YieldNow> {
        self.suspend(SuspendReason::Yield, yield_now())
    }

    /// Observes a pending interruption outside of a suspension point.
    pub(crate) fn checkpoint(&self) -> Option<FiberId> {
        self.core.observe_interrupt()
    }

    /// Leaving an uninterruptible region is itself a checkpoint: a success
    /// produced while an interruption was pending turns into that
    /// interruption once the region is left.
    pub(crate) fn leave_mask<A, E>(&self, exit: Exit<A, E>) -> Exit<A, E> {
        if !exit.is_success() || self.core.is_masked() {
            return exit;
        }
        match self.checkpoint() {
            Some(by) => Exit::interrupt(by),
            None => exit,
        }
    }
}
