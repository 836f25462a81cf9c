//! Fibers: lightweight threads of effect execution.
//!
//! A fiber owns one running effect. It has a process-unique [`FiberId`], a
//! lifecycle [`FiberStatus`], a monotonic interruption flag and a completion
//! slot holding its [`Exit`] once done.
//!
//! Interruption is cooperative. [`FiberHandle::request_interrupt`] only sets
//! the flag and wakes the fiber; the fiber observes the flag at its next
//! suspension point (or before its body starts) and unwinds from there.

mod context;
mod core;
mod handle;
mod shared;
mod suspend;

pub(crate) use self::context::FiberContext;
pub(crate) use self::core::FiberCore;
pub use self::core::{FiberStatus, SuspendReason};
pub use self::handle::FiberHandle;
pub(crate) use self::shared::{ErasedFiber, WaitDone};

use crate::effect::Effect;
use crate::effect::context::Context;
use crate::runtime::RuntimeHandle;
use crate::tracing_compat::{debug, trace};
use crate::types::{Exit, FiberId};
use self::shared::FiberShared;
use std::sync::Arc;

/// Publishes an interruption exit if the fiber's future is dropped before
/// it completes, so awaiters are never left hanging.
struct CompletionGuard<A, E> {
    shared: Option<Arc<FiberShared<A, E>>>,
}

impl<A, E> CompletionGuard<A, E> {
    fn complete(&mut self, exit: Exit<A, E>) {
        if let Some(shared) = self.shared.take() {
            trace!(
                fiber = %shared.core().id(),
                success = exit.is_success(),
                "fiber completed"
            );
            shared.complete(exit);
        }
    }
}

impl<A, E> Drop for CompletionGuard<A, E> {
    fn drop(&mut self) {
        if let Some(shared) = self.shared.take() {
            debug!(fiber = %shared.core().id(), "fiber dropped before completion");
            shared.complete(Exit::interrupt(FiberId::NONE));
        }
    }
}

/// Creates a fiber for `effect` and hands it to the scheduler.
pub(crate) fn spawn<A, E>(
    runtime: &RuntimeHandle,
    effect: Effect<A, E>,
    parent: Option<FiberId>,
    services: Context,
) -> FiberHandle<A, E>
where
    A: Send + 'static,
    E: Send + 'static,
{
    let id = FiberId::next();
    let core = Arc::new(FiberCore::new(id, parent));
    let shared = Arc::new(FiberShared::new(Arc::clone(&core)));
    let ctx = FiberContext::new(core, runtime.clone(), services);
    let mut guard = CompletionGuard {
        shared: Some(Arc::clone(&shared)),
    };

    debug!(fiber = %id, parent = ?parent, "fiber forked");
    runtime.schedule_fiber(
        id,
        Box::pin(async move {
            let exit = match ctx.checkpoint() {
                Some(by) => {
                    debug!(fiber = %ctx.id(), by = %by, "fiber interrupted before start");
                    Exit::interrupt(by)
                }
                None => effect.run_protected(ctx).await,
            };
            guard.complete(exit);
        }),
    );
    FiberHandle::new(shared)
}
