//! Sleep future backed by the timer driver.

use super::driver::TimerDriver;
use crate::runtime::timer::TimerKey;
use crate::types::Time;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

/// Completes once the driver's clock reaches the deadline.
///
/// Dropping a pending `Sleep` cancels its timer registration.
#[derive(Debug)]
pub struct Sleep {
    driver: Arc<TimerDriver>,
    deadline: Time,
    key: Option<TimerKey>,
}

impl Sleep {
    /// Creates a sleep that completes at `deadline`.
    #[must_use]
    pub fn until(driver: Arc<TimerDriver>, deadline: Time) -> Self {
        Self {
            driver,
            deadline,
            key: None,
        }
    }

    /// Returns the deadline.
    #[must_use]
    pub const fn deadline(&self) -> Time {
        self.deadline
    }
}

impl Future for Sleep {
    type Output = ();

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<()> {
        if self.driver.now() >= self.deadline {
            if let Some(key) = self.key.take() {
                self.driver.cancel(key);
            }
            return Poll::Ready(());
        }
        let key = match self.key {
            Some(key) => self.driver.update(key, self.deadline, cx.waker()),
            None => self.driver.register(self.deadline, cx.waker().clone()),
        };
        self.key = Some(key);
        Poll::Pending
    }
}

impl Drop for Sleep {
    fn drop(&mut self) {
        if let Some(key) = self.key.take() {
            self.driver.cancel(key);
        }
    }
}
