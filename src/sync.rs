cfg_if::cfg_if! {
    if #[cfg(loom)] {
        pub(crate) use loom::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, AtomicUsize, Ordering};

        pub(crate) fn spin_loop() {
            loom::thread::yield_now();
        }
    } else if #[cfg(feature = "shuttle")] {
        pub(crate) use shuttle::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, AtomicUsize, Ordering};

        pub(crate) fn spin_loop() {
            shuttle::thread::yield_now();
        }
    } else {
        pub(crate) use core::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, AtomicUsize, Ordering};

        #[inline(always)]
        pub(crate) fn spin_loop() {
            core::hint::spin_loop();
        }
    }
}

/// Spin until `flag` reads `sense`, with a relaxation hint between probes.
///
/// The acquire load pairs with the release store of whichever party signs the
/// flag, so everything that party did beforehand is visible once the spin ends.
#[inline]
pub(crate) fn spin_until(flag: &AtomicBool, sense: bool) {
    while flag.load(Ordering::Acquire) != sense {
        spin_loop();
    }
}
