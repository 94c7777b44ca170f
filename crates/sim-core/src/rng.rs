//! Process-wide PRNG (§9 design note): initialized once at startup from the configured seed, or
//! from the current nanosecond clock if unset. No reseed, no teardown.

use std::sync::Mutex;
use std::time::{SystemTime, UNIX_EPOCH};

use once_cell::sync::OnceCell;
use rand::rngs::StdRng;
use rand::SeedableRng;

static GLOBAL: OnceCell<Mutex<StdRng>> = OnceCell::new();

pub fn init(seed: Option<u64>) {
    let seed = seed.unwrap_or_else(|| {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_nanos() as u64)
            .unwrap_or(0)
    });
    // First caller wins; a later init() (there should only ever be one) is a no-op.
    let _ = GLOBAL.set(Mutex::new(StdRng::seed_from_u64(seed)));
}

pub fn with_rng<R>(f: impl FnOnce(&mut StdRng) -> R) -> R {
    let mutex = GLOBAL.get_or_init(|| Mutex::new(StdRng::seed_from_u64(0)));
    let mut guard = mutex.lock().expect("rng mutex poisoned");
    f(&mut guard)
}
