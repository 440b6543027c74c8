//! A process-wide, externally seedable source of randomness.
//!
//! Tests seed this explicitly to get deterministic permutations; production
//! use seeds from the OS entropy source the first time a [`Session`] is
//! created.
//!
//! [`Session`]: crate::session::Session

use std::sync::{Mutex, OnceLock};

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

static RNG: OnceLock<Mutex<StdRng>> = OnceLock::new();

fn global() -> &'static Mutex<StdRng> {
    RNG.get_or_init(|| Mutex::new(StdRng::from_entropy()))
}

/// Re-seeds the process-wide RNG. Intended for tests that need
/// reproducible permutations; not meant to be called more than once in
/// normal operation.
pub fn seed(value: u64) {
    let mut guard = global().lock().expect("rng mutex poisoned");
    *guard = StdRng::seed_from_u64(value);
}

/// Fisher-Yates shuffle of `order` in place: at position `i` draw a
/// uniform index in `[i, n)` and swap. Written out directly rather than
/// going through `SliceRandom::shuffle` so the draw-one-index-per-position
/// algorithm stays literally auditable against the original `shuffle()`.
pub fn shuffle(order: &mut [usize]) {
    let mut rng = global().lock().expect("rng mutex poisoned");
    let n = order.len();
    for i in 0..n.saturating_sub(1) {
        let j = rng.gen_range(i..n);
        order.swap(i, j);
    }
}
