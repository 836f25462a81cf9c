//! Forking and the parallel combinators built on it.
//!
//! Every parallel combinator forks its operands as children of the running
//! fiber and waits for them as a group. When the group stops early (a child
//! failed, a race was won, or the parent was interrupted) the remaining
//! children are interrupted and awaited before the combinator returns, so no
//! child outlives the combinator.

use super::Effect;
use crate::fiber::{ErasedFiber, FiberContext, FiberHandle, SuspendReason, WaitDone};
use crate::tracing_compat::{debug, trace};
use crate::types::{Cause, Exit, FiberId};
use std::future::{Future, poll_fn};
use std::pin::Pin;
use std::sync::Arc;
use std::task::Poll;
use std::time::Duration;

/// How a group wait ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum GroupOutcome {
    /// Every child completed without meeting the stop condition.
    AllDone,
    /// The child at this index met the stop condition.
    Stopped(usize),
    /// The waiting fiber itself was interrupted.
    Interrupted(FiberId),
}

/// Waits on `children` until `stop` accepts a completed child's outcome
/// (`true` for success) or every child is done. Whatever the outcome, all
/// children are done when this returns.
async fn wait_group(
    ctx: &FiberContext,
    children: &[Arc<dyn ErasedFiber>],
    stop: impl Fn(bool) -> bool,
) -> GroupOutcome {
    let Some(first) = children.first() else {
        return GroupOutcome::AllDone;
    };
    let reason = SuspendReason::AwaitFiber(first.core().id());
    let mut waits: Vec<Option<WaitDone>> = children
        .iter()
        .map(|child| Some(WaitDone::new(Arc::clone(child), ctx.id())))
        .collect();

    let watch = poll_fn(|cx| {
        let mut pending = false;
        for (index, slot) in waits.iter_mut().enumerate() {
            let Some(wait) = slot else { continue };
            if Pin::new(&mut *wait).poll(cx).is_pending() {
                pending = true;
                continue;
            }
            let succeeded = wait.fiber().is_success() == Some(true);
            *slot = None;
            if stop(succeeded) {
                return Poll::Ready(Some(index));
            }
        }
        if pending { Poll::Pending } else { Poll::Ready(None) }
    });
    let outcome = match ctx.suspend(reason, watch).await {
        Ok(None) => return GroupOutcome::AllDone,
        Ok(Some(index)) => GroupOutcome::Stopped(index),
        Err(by) => GroupOutcome::Interrupted(by),
    };

    for child in children {
        child.core().request_interrupt(ctx.id());
    }
    let _mask = ctx.core().mask();
    let drain = poll_fn(|cx| {
        let mut pending = false;
        for slot in &mut waits {
            if let Some(wait) = slot {
                if Pin::new(&mut *wait).poll(cx).is_pending() {
                    pending = true;
                } else {
                    *slot = None;
                }
            }
        }
        if pending { Poll::Pending } else { Poll::Ready(()) }
    });
    // Masked: the suspension runs to completion.
    let _ = ctx.suspend(reason, drain).await;
    trace!(fiber = %ctx.id(), outcome = ?outcome, "child group settled");
    outcome
}

/// Combines the failures of a parallel group.
///
/// Children interrupted by the group itself are dropped from the result;
/// they only stopped because a sibling failed. An interruption of the
/// waiting fiber is added as its own leaf.
fn group_cause<E>(
    parent: FiberId,
    interrupted: Option<FiberId>,
    causes: impl IntoIterator<Item = Cause<E>>,
) -> Cause<E> {
    let mut combined = causes
        .into_iter()
        .filter(|cause| !(cause.is_interrupted_only() && cause.interruptors() == [parent]))
        .fold(Cause::empty(), Cause::parallel);
    if let Some(by) = interrupted {
        combined = Cause::parallel(combined, Cause::interrupt(by));
    }
    combined
}

const fn interrupted_by(outcome: GroupOutcome) -> Option<FiberId> {
    match outcome {
        GroupOutcome::Interrupted(by) => Some(by),
        _ => None,
    }
}

impl<A, E> Effect<A, E>
where
    A: Send + 'static,
    E: Send + 'static,
{
    /// Starts `self` on a new child fiber of the running one.
    pub(crate) fn fork_in(&self, ctx: &FiberContext) -> FiberHandle<A, E> {
        crate::fiber::spawn(
            ctx.runtime(),
            self.clone(),
            Some(ctx.id()),
            ctx.services().clone(),
        )
    }

    /// Starts `self` on a child fiber and returns its handle immediately.
    ///
    /// The child inherits the service context. It is not tied to the
    /// parent: the parent finishing does not interrupt it.
    #[must_use]
    pub fn fork<E2: Send + 'static>(self) -> Effect<FiberHandle<A, E>, E2> {
        Effect::from_fn(move |ctx: FiberContext| {
            let effect = self.clone();
            async move { Exit::Success(effect.fork_in(&ctx)) }
        })
    }

    /// Runs `self` and `that` concurrently and pairs their values.
    ///
    /// If either fails, the other is interrupted. The failure causes are
    /// combined in parallel, left first.
    #[must_use]
    pub fn zip_par<B: Send + 'static>(self, that: Effect<B, E>) -> Effect<(A, B), E> {
        Effect::from_fn(move |ctx: FiberContext| {
            let left = self.clone();
            let right = that.clone();
            async move {
                let left = left.fork_in(&ctx);
                let right = right.fork_in(&ctx);
                let outcome = wait_group(&ctx, &[left.erased(), right.erased()], |ok| !ok).await;
                let interrupted = interrupted_by(outcome);
                match (left.take_exit(), right.take_exit(), interrupted) {
                    (Exit::Success(a), Exit::Success(b), None) => Exit::Success((a, b)),
                    (l, r, interrupted) => {
                        let causes = [l.into_result().err(), r.into_result().err()].into_iter().flatten();
                        Exit::Failure(group_cause(ctx.id(), interrupted, causes))
                    }
                }
            }
        })
    }

    /// Runs every effect concurrently and collects the values in order.
    ///
    /// The first failure interrupts the rest.
    #[must_use]
    pub fn all_par<I>(effects: I) -> Effect<Vec<A>, E>
    where
        I: IntoIterator<Item = Self>,
    {
        let effects: Arc<[Self]> = effects.into_iter().collect();
        Effect::from_fn(move |ctx: FiberContext| {
            let effects = Arc::clone(&effects);
            async move {
                let handles: Vec<_> = effects.iter().map(|e| e.fork_in(&ctx)).collect();
                let erased: Vec<_> = handles.iter().map(FiberHandle::erased).collect();
                let outcome = wait_group(&ctx, &erased, |ok| !ok).await;
                let exits: Vec<_> = handles.iter().map(FiberHandle::take_exit).collect();
                let interrupted = interrupted_by(outcome);
                if interrupted.is_none() && exits.iter().all(Exit::is_success) {
                    return Exit::Success(exits.into_iter().filter_map(|e| e.into_result().ok()).collect());
                }
                let causes = exits.into_iter().filter_map(|e| e.into_result().err());
                Exit::Failure(group_cause(ctx.id(), interrupted, causes))
            }
        })
    }

    /// Runs `self` and `that` concurrently. The first to succeed wins and
    /// the loser is interrupted; if both fail, both causes are kept.
    #[must_use]
    pub fn race(self, that: Self) -> Self {
        Self::race_all([self, that])
    }

    /// Races every effect. The first success wins and the rest are
    /// interrupted. If all fail, their causes are combined in parallel.
    #[must_use]
    pub fn race_all<I>(effects: I) -> Self
    where
        I: IntoIterator<Item = Self>,
    {
        Self::race_with(effects, |ok| ok)
    }

    /// Races every effect and adopts the exit of whichever completes
    /// first, success or not.
    pub(crate) fn race_first<I>(effects: I) -> Self
    where
        I: IntoIterator<Item = Self>,
    {
        Self::race_with(effects, |_| true)
    }

    fn race_with<I>(effects: I, wins: fn(bool) -> bool) -> Self
    where
        I: IntoIterator<Item = Self>,
    {
        let effects: Arc<[Self]> = effects.into_iter().collect();
        Self::from_fn(move |ctx: FiberContext| {
            let effects = Arc::clone(&effects);
            async move {
                let handles: Vec<_> = effects.iter().map(|e| e.fork_in(&ctx)).collect();
                let erased: Vec<_> = handles.iter().map(FiberHandle::erased).collect();
                match wait_group(&ctx, &erased, wins).await {
                    GroupOutcome::Stopped(winner) => {
                        debug!(fiber = %ctx.id(), winner = %handles[winner].id(), "race won");
                        handles[winner].take_exit()
                    }
                    GroupOutcome::AllDone => {
                        let causes = handles.iter().filter_map(|h| h.take_exit().into_result().err());
                        Exit::Failure(group_cause(ctx.id(), None, causes))
                    }
                    GroupOutcome::Interrupted(by) => Exit::interrupt(by),
                }
            }
        })
    }

    /// Gives `self` at most `duration` to complete. Yields `None` and
    /// interrupts `self` if time runs out first.
    #[must_use]
    pub fn timeout(self, duration: Duration) -> Effect<Option<A>, E> {
        let timer = Effect::<(), E>::sleep(duration).map(|()| None);
        Effect::race_first([self.map(Some), timer])
    }
}
