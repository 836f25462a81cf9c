//! Internal utilities.
//!
//! - [`det_rng`]: Deterministic xorshift PRNG used for schedule jitter
//! - [`entropy`]: OS-backed seeding for the PRNG

pub mod det_rng;
pub mod entropy;

pub use det_rng::DetRng;
pub use entropy::os_seed;
