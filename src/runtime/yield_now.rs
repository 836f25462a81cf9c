//! Cooperative yield.

use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

/// Resolves on its second poll after re-queueing the fiber once, so every
/// other runnable fiber gets a turn first.
#[derive(Debug)]
#[must_use = "futures do nothing unless polled"]
pub(crate) struct YieldNow {
    yielded: bool,
}

impl Future for YieldNow {
    type Output = ();

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        if self.yielded {
            return Poll::Ready(());
        }
        self.yielded = true;
        cx.waker().wake_by_ref();
        Poll::Pending
    }
}

pub(crate) const fn yield_now() -> YieldNow {
    YieldNow { yielded: false }
}
