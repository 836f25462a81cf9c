//! Clocks, timers and sleeping.
//!
//! - [`driver`]: `TimeSource`, `WallClock`, `VirtualClock` and `TimerDriver`
//! - [`sleep`]: the `Sleep` future used by `Effect::sleep` and schedule delays

pub mod driver;
pub mod sleep;

pub use driver::{TimeSource, TimerDriver, VirtualClock, WallClock};
pub use sleep::Sleep;
