//! OS-backed seeding.

use crate::tracing_compat::warn;

/// Returns a seed from the operating system's entropy source.
///
/// Falls back to a seed derived from the current time when the OS source is
/// unavailable, so callers never have to handle an error for what is only a
/// jitter seed.
#[must_use]
pub fn os_seed() -> u64 {
    let mut buf = [0u8; 8];
    match getrandom::fill(&mut buf) {
        Ok(()) => u64::from_le_bytes(buf),
        Err(err) => {
            warn!(error = %err, "OS entropy unavailable, seeding from the clock");
            let nanos = std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .map_or(0, |d| d.as_nanos() as u64);
            nanos | 1
        }
    }
}
