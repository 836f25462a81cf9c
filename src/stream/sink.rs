//! Running streams to completion.

use super::{Pull, Stream};
use crate::effect::{Effect, guarded};
use crate::fiber::FiberContext;
use crate::tracing_compat::trace;
use crate::types::{Defect, Exit};
use std::sync::Arc;

/// Pulls `stream` until it ends, feeding every chunk to `step`.
///
/// A pending interruption is observed between chunks, so a purely
/// synchronous stream still stops when its fiber is interrupted.
async fn drive<T, E, B>(
    stream: &Stream<T, E>,
    ctx: &FiberContext,
    mut acc: B,
    mut step: impl FnMut(B, Vec<T>) -> Result<B, Defect>,
) -> Exit<B, E>
where
    T: Send + 'static,
    E: Send + 'static,
{
    let pull = match guarded(|| stream.open()) {
        Ok(pull) => pull,
        Err(defect) => return Exit::die(defect),
    };
    let mut chunks: u64 = 0;
    loop {
        match pull.run_in(ctx.clone()).await {
            Exit::Success(Pull::Emit(chunk)) => {
                chunks += 1;
                acc = match step(acc, chunk) {
                    Ok(acc) => acc,
                    Err(defect) => return Exit::die(defect),
                };
            }
            Exit::Success(Pull::End) => {
                trace!(fiber = %ctx.id(), chunks, "stream ended");
                return Exit::Success(acc);
            }
            Exit::Failure(cause) => return Exit::Failure(cause),
        }
        if let Some(by) = ctx.checkpoint() {
            return Exit::interrupt(by);
        }
    }
}

impl<T, E> Stream<T, E>
where
    T: Send + 'static,
    E: Send + 'static,
{
    /// Collects every value.
    #[must_use]
    pub fn run_collect(self) -> Effect<Vec<T>, E> {
        Effect::from_fn(move |ctx: FiberContext| {
            let stream = self.clone();
            async move {
                drive(&stream, &ctx, Vec::new(), |mut all, chunk| {
                    all.extend(chunk);
                    Ok(all)
                })
                .await
            }
        })
    }

    /// Folds every value into an accumulator starting from `init`.
    #[must_use]
    pub fn run_fold<B, F>(self, init: B, f: F) -> Effect<B, E>
    where
        B: Clone + Send + Sync + 'static,
        F: Fn(B, T) -> B + Send + Sync + 'static,
    {
        let f = Arc::new(f);
        Effect::from_fn(move |ctx: FiberContext| {
            let stream = self.clone();
            let f = Arc::clone(&f);
            let init = init.clone();
            async move {
                drive(&stream, &ctx, init, |acc, chunk| {
                    guarded(|| chunk.into_iter().fold(acc, |acc, value| f(acc, value)))
                })
                .await
            }
        })
    }

    /// Runs `f` on every value, in order. The first failure stops the
    /// stream.
    #[must_use]
    pub fn run_for_each<F>(self, f: F) -> Effect<(), E>
    where
        F: Fn(T) -> Effect<(), E> + Send + Sync + 'static,
    {
        self.map_effect(f).run_drain()
    }

    /// Pulls the stream to its end, discarding the values.
    #[must_use]
    pub fn run_drain(self) -> Effect<(), E> {
        Effect::from_fn(move |ctx: FiberContext| {
            let stream = self.clone();
            async move { drive(&stream, &ctx, (), |(), _| Ok(())).await }
        })
    }
}
