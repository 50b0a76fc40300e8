//! # Monotonic Second Clock
//!
//! `expire_at` is tracked as whole seconds elapsed since the process's first
//! call into this crate, not wall-clock time. This keeps the `find` predicate
//! in [`crate::engine`] (`expire_at == now + ttl`) an exact integer
//! comparison instead of something that has to fuzz around `SystemTime`
//! drift or leap seconds.

use std::sync::OnceLock;
use std::time::Instant;

static EPOCH: OnceLock<Instant> = OnceLock::new();

/// Seconds elapsed since this process's first call to any clock function.
pub fn now_secs() -> u64 {
    let epoch = EPOCH.get_or_init(Instant::now);
    epoch.elapsed().as_secs()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn now_secs_is_monotonic() {
        let a = now_secs();
        std::thread::sleep(std::time::Duration::from_millis(10));
        let b = now_secs();
        assert!(b >= a);
    }
}
