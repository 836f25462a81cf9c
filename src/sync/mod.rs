//! Synchronization primitives for fibers.

mod latch;

pub use latch::Latch;
