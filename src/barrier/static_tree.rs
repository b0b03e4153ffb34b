//! Static tree barrier.
//!
//! From Mellor-Crummey and Scott, "Algorithms for Scalable Synchronization on
//! Shared-Memory Multiprocessors" (1991). Arrivals climb a fixed tree: each
//! leaf signs its own flag, each interior node collects both children before
//! signing its own, and the root releases everyone through a single out flag
//! once its subtrees and the wrap-around child have arrived.
//!
//! The tree is asymmetric. Children follow the usual `2i + 1` / `2i + 2`
//! rule with parties at and above `(N - 1) / 2` being leaves, and the root
//! collects three parties, `1`, `2` and `N - 1`, compacting the top of the
//! tree. For power-of-two `N` those are exactly the parties the `2i + ...`
//! rule leaves without a parent.

use core::fmt;
use core::marker::PhantomData;
use core::ops::Deref;

use alloc::boxed::Box;

use crate::barrier::{check_power_of_two, BarrierAction, PairReducer, PartySlots};
use crate::err::{Algorithm, PartyClaimError, SetupError};
use crate::reduce::{ReduceOp, Scalar};
use crate::sync::{spin_until, AtomicBool, Ordering};

/// A reusable spin barrier whose arrivals climb a fixed tree rooted at party
/// 0.
///
/// Requires a power-of-two party count.
pub struct StaticTreeBarrier {
    parties: usize,
    /// First leaf id; parties below it have two children.
    thresh: usize,
    flags: Box<[AtomicBool]>,
    flag_out: AtomicBool,
    action: Option<BarrierAction>,
    reducer: Option<PairReducer>,
    slots: PartySlots,
}

impl StaticTreeBarrier {
    /// Creates a barrier for `parties` threads.
    ///
    /// # Errors
    ///
    /// Returns [`SetupError::TooFewParties`] if `parties < 2` and
    /// [`SetupError::PartiesNotPowerOfTwo`] if `parties` is not a power of
    /// two.
    #[cfg_attr(feature = "tracing", tracing::instrument(level = "debug"))]
    pub fn new(parties: usize) -> Result<Self, SetupError> {
        check_power_of_two(Algorithm::StaticTree, parties)?;
        Ok(Self {
            parties,
            thresh: (parties - 1) / 2,
            flags: (0..parties).map(|_| AtomicBool::new(false)).collect(),
            flag_out: AtomicBool::new(false),
            action: None,
            reducer: None,
            slots: PartySlots::new(parties),
        })
    }

    /// Attaches a command run by the root once per episode, before any party
    /// is released.
    #[must_use]
    pub fn with_action(mut self, action: impl Fn() + Send + Sync + 'static) -> Self {
        self.action = Some(Box::new(action));
        self
    }

    /// Attaches a generic pairwise reducer.
    ///
    /// Each collecting party invokes it as `reduce(id, child)` per collected
    /// child, the root last and in the order `1`, `2`, `parties - 1`, so the
    /// root's application state ends up holding the fold over all parties in
    /// ascending id order.
    #[must_use]
    pub fn with_reducer(mut self, reducer: impl Fn(usize, usize) + Send + Sync + 'static) -> Self {
        self.reducer = Some(Box::new(reducer));
        self
    }

    /// The number of parties that must arrive to trip the barrier.
    pub fn parties(&self) -> usize {
        self.parties
    }

    /// Claims party `id`, borrowing this barrier.
    ///
    /// # Errors
    ///
    /// Fails if `id` is out of range or already claimed by a live handle.
    pub fn party(
        &self,
        id: usize,
    ) -> Result<StaticTreeParty<&StaticTreeBarrier>, PartyClaimError> {
        StaticTreeParty::claim(self, id)
    }
}

impl fmt::Debug for StaticTreeBarrier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StaticTreeBarrier")
            .field("parties", &self.parties)
            .field("thresh", &self.thresh)
            .field("has_action", &self.action.is_some())
            .field("has_reducer", &self.reducer.is_some())
            .finish_non_exhaustive()
    }
}

/// A claimed party of a [`StaticTreeBarrier`].
pub struct StaticTreeParty<B: Deref<Target = StaticTreeBarrier>> {
    barrier: B,
    id: usize,
    sense: bool,
}

impl<B: Deref<Target = StaticTreeBarrier>> StaticTreeParty<B> {
    /// Claims party `id` on `barrier`.
    ///
    /// # Errors
    ///
    /// Fails if `id` is out of range or already claimed by a live handle.
    pub fn claim(barrier: B, id: usize) -> Result<Self, PartyClaimError> {
        barrier.slots.claim(id)?;
        Ok(Self {
            barrier,
            id,
            sense: false,
        })
    }

    /// This party's id.
    pub fn id(&self) -> usize {
        self.id
    }

    /// Blocks (spinning) until all parties of the episode have arrived.
    #[cfg_attr(
        feature = "tracing",
        tracing::instrument(level = "trace", skip_all, fields(id = self.id))
    )]
    pub fn wait(&mut self) {
        self.sense = !self.sense;
        let b = &*self.barrier;
        if self.id == 0 {
            spin_until(&b.flags[1], self.sense);
            if let Some(reducer) = &b.reducer {
                reducer(0, 1);
            }
            if b.parties > 2 {
                spin_until(&b.flags[2], self.sense);
                if let Some(reducer) = &b.reducer {
                    reducer(0, 2);
                }
                if b.parties > 3 {
                    spin_until(&b.flags[b.parties - 1], self.sense);
                    if let Some(reducer) = &b.reducer {
                        reducer(0, b.parties - 1);
                    }
                }
            }
            if let Some(action) = &b.action {
                action();
            }
            b.flag_out.store(self.sense, Ordering::Release);
        } else if self.id < b.thresh {
            let left = 2 * self.id + 1;
            let right = 2 * self.id + 2;
            spin_until(&b.flags[left], self.sense);
            if let Some(reducer) = &b.reducer {
                reducer(self.id, left);
            }
            spin_until(&b.flags[right], self.sense);
            if let Some(reducer) = &b.reducer {
                reducer(self.id, right);
            }
            b.flags[self.id].store(self.sense, Ordering::Release);
            spin_until(&b.flag_out, self.sense);
        } else {
            b.flags[self.id].store(self.sense, Ordering::Release);
            spin_until(&b.flag_out, self.sense);
        }
    }
}

impl<B: Deref<Target = StaticTreeBarrier>> fmt::Debug for StaticTreeParty<B> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StaticTreeParty")
            .field("id", &self.id)
            .field("sense", &self.sense)
            .finish_non_exhaustive()
    }
}

impl<B: Deref<Target = StaticTreeBarrier>> Drop for StaticTreeParty<B> {
    fn drop(&mut self) {
        self.barrier.slots.release(self.id);
    }
}

/// A [`StaticTreeBarrier`] that additionally folds one scalar per party into
/// a shared result each episode.
///
/// Every party publishes its running value before signing its flag; each
/// interior node folds its children's values into its own, and the root folds
/// the values of parties `1`, `2` and `parties - 1` in that order. The net
/// result equals the left-fold over contributions in ascending id order.
pub struct StaticTreeReduce<T: Scalar, O: ReduceOp<T>> {
    inner: StaticTreeBarrier,
    values: Box<[T::Slot]>,
    result: T::Slot,
    _op: PhantomData<O>,
}

impl<T: Scalar, O: ReduceOp<T>> StaticTreeReduce<T, O> {
    /// Creates a combining barrier for `parties` threads.
    ///
    /// # Errors
    ///
    /// Returns [`SetupError::TooFewParties`] if `parties < 2` and
    /// [`SetupError::PartiesNotPowerOfTwo`] if `parties` is not a power of
    /// two.
    pub fn new(parties: usize) -> Result<Self, SetupError> {
        let inner = StaticTreeBarrier::new(parties)?;
        Ok(Self {
            inner,
            values: (0..parties).map(|_| T::new_slot()).collect(),
            result: T::new_slot(),
            _op: PhantomData,
        })
    }

    /// Attaches a command run by the root once per episode, after the final
    /// fold and before any party is released.
    #[must_use]
    pub fn with_action(mut self, action: impl Fn() + Send + Sync + 'static) -> Self {
        self.inner.action = Some(Box::new(action));
        self
    }

    /// The number of parties that must arrive to trip the barrier.
    pub fn parties(&self) -> usize {
        self.inner.parties
    }

    /// Claims party `id`, borrowing this barrier.
    ///
    /// # Errors
    ///
    /// Fails if `id` is out of range or already claimed by a live handle.
    #[allow(clippy::type_complexity)]
    pub fn party(
        &self,
        id: usize,
    ) -> Result<StaticTreeReduceParty<T, O, &StaticTreeReduce<T, O>>, PartyClaimError> {
        StaticTreeReduceParty::claim(self, id)
    }
}

impl<T: Scalar, O: ReduceOp<T>> fmt::Debug for StaticTreeReduce<T, O> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StaticTreeReduce")
            .field("parties", &self.inner.parties)
            .field("has_action", &self.inner.action.is_some())
            .finish_non_exhaustive()
    }
}

/// A claimed party of a [`StaticTreeReduce`] barrier.
pub struct StaticTreeReduceParty<
    T: Scalar,
    O: ReduceOp<T>,
    B: Deref<Target = StaticTreeReduce<T, O>>,
> {
    barrier: B,
    id: usize,
    sense: bool,
}

impl<T: Scalar, O: ReduceOp<T>, B: Deref<Target = StaticTreeReduce<T, O>>>
    StaticTreeReduceParty<T, O, B>
{
    /// Claims party `id` on `barrier`.
    ///
    /// # Errors
    ///
    /// Fails if `id` is out of range or already claimed by a live handle.
    pub fn claim(barrier: B, id: usize) -> Result<Self, PartyClaimError> {
        barrier.inner.slots.claim(id)?;
        Ok(Self {
            barrier,
            id,
            sense: false,
        })
    }

    /// This party's id.
    pub fn id(&self) -> usize {
        self.id
    }

    /// Contributes `value`, blocks until all parties have arrived, and
    /// returns the episode's folded result.
    #[cfg_attr(
        feature = "tracing",
        tracing::instrument(level = "trace", skip_all, fields(id = self.id))
    )]
    pub fn wait(&mut self, value: T) -> T {
        self.sense = !self.sense;
        let barrier = &*self.barrier;
        let b = &barrier.inner;
        if self.id == 0 {
            let mut acc = value;
            spin_until(&b.flags[1], self.sense);
            acc = O::combine(acc, T::load(&barrier.values[1]));
            if b.parties > 2 {
                spin_until(&b.flags[2], self.sense);
                acc = O::combine(acc, T::load(&barrier.values[2]));
                if b.parties > 3 {
                    spin_until(&b.flags[b.parties - 1], self.sense);
                    acc = O::combine(acc, T::load(&barrier.values[b.parties - 1]));
                }
            }
            T::store(&barrier.result, acc);
            if let Some(action) = &b.action {
                action();
            }
            b.flag_out.store(self.sense, Ordering::Release);
            acc
        } else if self.id < b.thresh {
            let left = 2 * self.id + 1;
            let right = 2 * self.id + 2;
            let mut acc = value;
            spin_until(&b.flags[left], self.sense);
            acc = O::combine(acc, T::load(&barrier.values[left]));
            spin_until(&b.flags[right], self.sense);
            acc = O::combine(acc, T::load(&barrier.values[right]));
            T::store(&barrier.values[self.id], acc);
            b.flags[self.id].store(self.sense, Ordering::Release);
            spin_until(&b.flag_out, self.sense);
            T::load(&barrier.result)
        } else {
            T::store(&barrier.values[self.id], value);
            b.flags[self.id].store(self.sense, Ordering::Release);
            spin_until(&b.flag_out, self.sense);
            T::load(&barrier.result)
        }
    }
}

impl<T: Scalar, O: ReduceOp<T>, B: Deref<Target = StaticTreeReduce<T, O>>> fmt::Debug
    for StaticTreeReduceParty<T, O, B>
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StaticTreeReduceParty")
            .field("id", &self.id)
            .field("sense", &self.sense)
            .finish_non_exhaustive()
    }
}

impl<T: Scalar, O: ReduceOp<T>, B: Deref<Target = StaticTreeReduce<T, O>>> Drop
    for StaticTreeReduceParty<T, O, B>
{
    fn drop(&mut self) {
        self.barrier.inner.slots.release(self.id);
    }
}

#[cfg(all(test, not(loom), not(feature = "shuttle")))]
mod tests {
    use super::*;
    use alloc::vec;

    #[test]
    fn rejects_non_power_of_two_party_counts() {
        for parties in [3, 5, 6, 12] {
            assert_eq!(
                StaticTreeBarrier::new(parties).unwrap_err(),
                SetupError::PartiesNotPowerOfTwo {
                    algorithm: Algorithm::StaticTree,
                    parties
                }
            );
        }
    }

    /// Every non-root party must be collected by exactly one other party:
    /// ids 1, 2 and N-1 by the root, the rest through the 2i+1/2i+2 rule.
    #[test]
    fn every_party_is_collected_exactly_once() {
        for parties in [2usize, 4, 8, 16, 32] {
            let b = StaticTreeBarrier::new(parties).unwrap();
            let mut collected = vec![0usize; parties];

            collected[1] += 1;
            if parties > 2 {
                collected[2] += 1;
            }
            if parties > 3 {
                collected[parties - 1] += 1;
            }
            for interior in 1..b.thresh {
                collected[2 * interior + 1] += 1;
                collected[2 * interior + 2] += 1;
            }

            for id in 1..parties {
                assert_eq!(collected[id], 1, "party {id} of {parties}");
            }
        }
    }

    #[test]
    fn leaves_start_at_thresh() {
        let b = StaticTreeBarrier::new(16).unwrap();
        assert_eq!(b.thresh, 7);
        // the last interior node's children are still in range
        assert!(2 * (b.thresh - 1) + 2 < 16);
    }
}
