//! Reduction operators and the scalar storage they combine.
//!
//! A combining barrier moves one scalar per party per episode through shared
//! memory. Contributions and intermediates live in plain atomic cells accessed
//! with relaxed ordering; the barrier's flag traffic supplies all the
//! happens-before edges, so a partner always reads the value written for the
//! current round. [`Scalar`] packs a value into such a cell and back;
//! [`ReduceOp`] is the pure binary combine applied at each meeting point.

use core::fmt::Debug;

use crate::sync::{AtomicU32, AtomicU64, Ordering};

/// A numeric type that can be carried through a combining barrier.
///
/// Implemented for `i32`, `i64`, `f32` and `f64`. Values round-trip through an
/// atomic cell of matching width ([`Scalar::Slot`]), which lets every party
/// read its partners' contributions without locking and without
/// compare-and-swap: each slot has a single writer per round.
pub trait Scalar: Copy + PartialEq + Debug + Send + Sync + 'static {
    /// Atomic cell able to hold one value of this type.
    type Slot: Debug + Send + Sync;

    /// Creates a zeroed slot.
    fn new_slot() -> Self::Slot;

    /// Publishes `value` into `slot`.
    ///
    /// Relaxed on purpose; ordering comes from the flag signed afterwards.
    fn store(slot: &Self::Slot, value: Self);

    /// Reads the value currently in `slot`.
    fn load(slot: &Self::Slot) -> Self;
}

macro_rules! impl_scalar {
    ($ty:ty, $slot:ty, |$value:ident| $pack:expr, |$bits:ident| $unpack:expr) => {
        impl Scalar for $ty {
            type Slot = $slot;

            #[inline]
            fn new_slot() -> Self::Slot {
                <$slot>::new(0)
            }

            #[inline]
            fn store(slot: &Self::Slot, $value: Self) {
                slot.store($pack, Ordering::Relaxed);
            }

            #[inline]
            fn load(slot: &Self::Slot) -> Self {
                let $bits = slot.load(Ordering::Relaxed);
                $unpack
            }
        }
    };
}

impl_scalar!(i32, AtomicU32, |value| value as u32, |bits| bits as i32);
impl_scalar!(i64, AtomicU64, |value| value as u64, |bits| bits as i64);
impl_scalar!(f32, AtomicU32, |value| value.to_bits(), |bits| f32::from_bits(
    bits
));
impl_scalar!(f64, AtomicU64, |value| value.to_bits(), |bits| f64::from_bits(
    bits
));

/// An associative binary combine applied at every pairwise meeting point of a
/// combining barrier.
///
/// Implementations must be referentially transparent: no allocation, no side
/// effects, no interior state. The combine runs inside spin-gated windows and
/// anything slow or effectful in here stalls every party behind it.
///
/// Floating-point addition is not associative, so for `f32`/`f64` the exact
/// bit pattern of a [`Sum`] depends on the fold order of the algorithm in use;
/// each barrier documents its order.
pub trait ReduceOp<T: Scalar> {
    /// Combines two contributions into one.
    fn combine(a: T, b: T) -> T;
}

/// Minimum of the two operands; the left operand wins ties.
#[derive(Debug, Clone, Copy)]
pub struct Min;

/// Maximum of the two operands; the left operand wins ties.
#[derive(Debug, Clone, Copy)]
pub struct Max;

/// Sum of the two operands. Wrapping for the integer widths, IEEE-754 for the
/// float widths; no saturation.
#[derive(Debug, Clone, Copy)]
pub struct Sum;

macro_rules! impl_min_max {
    ($($ty:ty),*) => {$(
        impl ReduceOp<$ty> for Min {
            #[inline]
            fn combine(a: $ty, b: $ty) -> $ty {
                if a <= b { a } else { b }
            }
        }

        impl ReduceOp<$ty> for Max {
            #[inline]
            fn combine(a: $ty, b: $ty) -> $ty {
                if a >= b { a } else { b }
            }
        }
    )*};
}

macro_rules! impl_wrapping_sum {
    ($($ty:ty),*) => {$(
        impl ReduceOp<$ty> for Sum {
            #[inline]
            fn combine(a: $ty, b: $ty) -> $ty {
                a.wrapping_add(b)
            }
        }
    )*};
}

macro_rules! impl_ieee_sum {
    ($($ty:ty),*) => {$(
        impl ReduceOp<$ty> for Sum {
            #[inline]
            fn combine(a: $ty, b: $ty) -> $ty {
                a + b
            }
        }
    )*};
}

impl_min_max!(i32, i64, f32, f64);
impl_wrapping_sum!(i32, i64);
impl_ieee_sum!(f32, f64);

#[cfg(all(test, not(loom), not(feature = "shuttle")))]
mod tests {
    use super::*;

    #[test]
    fn values_round_trip_through_slots() {
        let slot = i32::new_slot();
        i32::store(&slot, -7);
        assert_eq!(i32::load(&slot), -7);

        let slot = i64::new_slot();
        i64::store(&slot, i64::MIN);
        assert_eq!(i64::load(&slot), i64::MIN);

        let slot = f32::new_slot();
        f32::store(&slot, -0.5);
        assert_eq!(f32::load(&slot), -0.5);

        let slot = f64::new_slot();
        f64::store(&slot, core::f64::consts::PI);
        assert_eq!(f64::load(&slot), core::f64::consts::PI);
    }

    #[test]
    fn min_and_max_break_ties_to_the_left() {
        // 0.0 == -0.0 under IEEE comparison; the left operand must survive.
        assert_eq!(<Min as ReduceOp<f32>>::combine(0.0, -0.0).to_bits(), 0.0f32.to_bits());
        assert_eq!(<Max as ReduceOp<f32>>::combine(-0.0, 0.0).to_bits(), (-0.0f32).to_bits());
        assert_eq!(<Min as ReduceOp<i32>>::combine(3, 9), 3);
        assert_eq!(<Max as ReduceOp<i64>>::combine(3, 9), 9);
    }

    #[test]
    fn integer_sum_wraps() {
        assert_eq!(<Sum as ReduceOp<i32>>::combine(i32::MAX, 1), i32::MIN);
        assert_eq!(<Sum as ReduceOp<i64>>::combine(i64::MAX, 1), i64::MIN);
    }

    #[test]
    fn float_sum_follows_ieee() {
        assert_eq!(<Sum as ReduceOp<f32>>::combine(1.5, 2.25), 3.75);
        assert_eq!(<Sum as ReduceOp<f64>>::combine(0.1, 0.2), 0.1 + 0.2);
    }
}
