#![allow(dead_code)]

cfg_if::cfg_if! {
    if #[cfg(loom)] {
        pub(crate) use loom::sync::atomic::{AtomicUsize, Ordering};
        pub(crate) use loom::sync::Arc;
        pub(crate) use loom::thread;
    } else if #[cfg(feature = "shuttle")] {
        pub(crate) use shuttle::sync::atomic::{AtomicUsize, Ordering};
        pub(crate) use shuttle::sync::Arc;
        pub(crate) use shuttle::thread;
    } else {
        pub(crate) use std::sync::atomic::{AtomicUsize, Ordering};
        pub(crate) use std::sync::Arc;
        pub(crate) use std::thread;
    }
}

/// Runs `episodes` barrier episodes across `parties` scoped threads.
///
/// `claim` is called once per id on the driving thread and returns that
/// party's per-episode wait closure (typically a claimed handle's `wait`
/// wrapped in a `move` closure).
#[cfg(all(feature = "std", not(loom), not(feature = "shuttle")))]
pub(crate) fn hammer<F, W>(parties: usize, episodes: usize, claim: F)
where
    F: Fn(usize) -> W,
    W: FnMut() + Send,
{
    std::thread::scope(|scope| {
        for id in 0..parties {
            let mut wait = claim(id);
            scope.spawn(move || {
                for _ in 0..episodes {
                    wait();
                }
            });
        }
    });
}

/// Episode count scaled down for party counts that oversubscribe small CI
/// machines.
#[cfg(all(feature = "std", not(loom), not(feature = "shuttle")))]
pub(crate) fn episodes_for(parties: usize) -> usize {
    if parties >= 8 {
        200
    } else {
        1_000
    }
}
