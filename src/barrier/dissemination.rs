//! Dissemination barrier.
//!
//! From Hensgen, Finkel and Manber, "Two Algorithms for Barrier
//! Synchronization" (1988). Every party runs `log2 N` rounds; in round `r` it
//! signs the flag of the party `2^r` ahead of it and spins on the flag signed
//! by the party `2^r` behind it. After the last round each party has
//! transitively heard from everyone, so there is no separate release phase.
//! That also makes this the natural all-to-all shape for combining, since
//! every party finishes holding the full reduction.
//!
//! Flags come in two parity banks so a fast party can start the next episode
//! while a straggler is still draining the previous one; the sense value
//! written into a bank flips only every second episode, when that bank comes
//! back around.

use core::fmt;
use core::marker::PhantomData;
use core::ops::Deref;

use alloc::boxed::Box;

use crate::barrier::{check_power_of_two, BarrierAction, PairReducer, PartySlots};
use crate::err::{Algorithm, PartyClaimError, SetupError};
use crate::reduce::{ReduceOp, Scalar};
use crate::sync::{spin_until, AtomicBool, Ordering};
use crate::util::{log2_of_power_of_two, power_of_two};

/// One party's incoming flags: two parity banks of one flag per round.
#[derive(Debug)]
pub(crate) struct FlagBanks {
    banks: [Box<[AtomicBool]>; 2],
}

impl FlagBanks {
    pub(crate) fn new(rounds: usize) -> Self {
        // Armed opposite to the initial sense.
        let bank = || (0..rounds).map(|_| AtomicBool::new(true)).collect();
        Self {
            banks: [bank(), bank()],
        }
    }

    pub(crate) fn flag(&self, parity: usize, round: usize) -> &AtomicBool {
        &self.banks[parity][round]
    }
}

/// One party's reduction intermediates: two parity banks of `rounds + 1`
/// value slots, slot 0 holding the episode's own contribution.
pub(crate) struct ValueBanks<T: Scalar> {
    banks: [Box<[T::Slot]>; 2],
}

impl<T: Scalar> ValueBanks<T> {
    pub(crate) fn new(rounds: usize) -> Self {
        let bank = || (0..rounds + 1).map(|_| T::new_slot()).collect();
        Self {
            banks: [bank(), bank()],
        }
    }

    pub(crate) fn slot(&self, parity: usize, round: usize) -> &T::Slot {
        &self.banks[parity][round]
    }
}

impl<T: Scalar> fmt::Debug for ValueBanks<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ValueBanks").finish_non_exhaustive()
    }
}

/// A reusable spin barrier running `log2 N` rounds of pairwise flag exchange.
///
/// Requires a power-of-two party count.
pub struct DisseminationBarrier {
    parties: usize,
    rounds: usize,
    flags: Box<[FlagBanks]>,
    flag_out: AtomicBool,
    action: Option<BarrierAction>,
    reducer: Option<PairReducer>,
    slots: PartySlots,
}

impl DisseminationBarrier {
    /// Creates a barrier for `parties` threads.
    ///
    /// # Errors
    ///
    /// Returns [`SetupError::TooFewParties`] if `parties < 2` and
    /// [`SetupError::PartiesNotPowerOfTwo`] if `parties` is not a power of
    /// two.
    #[cfg_attr(feature = "tracing", tracing::instrument(level = "debug"))]
    pub fn new(parties: usize) -> Result<Self, SetupError> {
        check_power_of_two(Algorithm::Dissemination, parties)?;
        let rounds = log2_of_power_of_two(parties);
        Ok(Self {
            parties,
            rounds,
            flags: (0..parties).map(|_| FlagBanks::new(rounds)).collect(),
            flag_out: AtomicBool::new(false),
            action: None,
            reducer: None,
            slots: PartySlots::new(parties),
        })
    }

    /// Attaches a command run by party 0 once per episode, before any party
    /// is released from the action fan-out.
    #[must_use]
    pub fn with_action(mut self, action: impl Fn() + Send + Sync + 'static) -> Self {
        self.action = Some(Box::new(action));
        self
    }

    /// Attaches a generic pairwise reducer, invoked by each party as
    /// `reduce(id, in_partner)` once per round after its incoming flag
    /// arrives.
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
    ) -> Result<DisseminationParty<&DisseminationBarrier>, PartyClaimError> {
        DisseminationParty::claim(self, id)
    }

    /// The party whose round-`round` flag `id` signs.
    pub(crate) fn out_partner(&self, id: usize, round: usize) -> usize {
        (id + power_of_two(round)) % self.parties
    }

    /// The party that signs `id`'s round-`round` flag.
    pub(crate) fn in_partner(&self, id: usize, round: usize) -> usize {
        (id + self.parties - power_of_two(round)) % self.parties
    }
}

impl fmt::Debug for DisseminationBarrier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DisseminationBarrier")
            .field("parties", &self.parties)
            .field("rounds", &self.rounds)
            .field("has_action", &self.action.is_some())
            .field("has_reducer", &self.reducer.is_some())
            .finish_non_exhaustive()
    }
}

/// A claimed party of a [`DisseminationBarrier`].
pub struct DisseminationParty<B: Deref<Target = DisseminationBarrier>> {
    barrier: B,
    id: usize,
    parity: usize,
    sense: bool,
    out_sense: bool,
}

impl<B: Deref<Target = DisseminationBarrier>> DisseminationParty<B> {
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
            parity: 0,
            sense: false,
            out_sense: false,
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
        let b = &*self.barrier;
        for round in 0..b.rounds {
            let out = b.out_partner(self.id, round);
            b.flags[out].flag(self.parity, round).store(self.sense, Ordering::Release);
            spin_until(b.flags[self.id].flag(self.parity, round), self.sense);
            if let Some(reducer) = &b.reducer {
                reducer(self.id, b.in_partner(self.id, round));
            }
        }
        if self.parity == 1 {
            self.sense = !self.sense;
        }
        self.parity = 1 - self.parity;
        if let Some(action) = &b.action {
            self.out_sense = !self.out_sense;
            if self.id == 0 {
                action();
                b.flag_out.store(self.out_sense, Ordering::Release);
            } else {
                spin_until(&b.flag_out, self.out_sense);
            }
        }
    }
}

impl<B: Deref<Target = DisseminationBarrier>> fmt::Debug for DisseminationParty<B> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DisseminationParty")
            .field("id", &self.id)
            .field("parity", &self.parity)
            .field("sense", &self.sense)
            .finish_non_exhaustive()
    }
}

impl<B: Deref<Target = DisseminationBarrier>> Drop for DisseminationParty<B> {
    fn drop(&mut self) {
        self.barrier.slots.release(self.id);
    }
}

/// A [`DisseminationBarrier`] that additionally folds one scalar per party
/// each episode, every party receiving the result.
///
/// In round `r` each party folds the running value of the party `2^r` behind
/// it into its own: `values[r + 1] = op(values[r], in_partner.values[r])`.
/// The fold order therefore follows the partner schedule, not ascending ids;
/// for non-associative float operators the exact bit pattern differs from the
/// id-order fold (and between parties), though commutative-associative
/// operators always yield the mathematical reduction.
pub struct DisseminationReduce<T: Scalar, O: ReduceOp<T>> {
    inner: DisseminationBarrier,
    values: Box<[ValueBanks<T>]>,
    _op: PhantomData<O>,
}

impl<T: Scalar, O: ReduceOp<T>> DisseminationReduce<T, O> {
    /// Creates a combining barrier for `parties` threads.
    ///
    /// # Errors
    ///
    /// Returns [`SetupError::TooFewParties`] if `parties < 2` and
    /// [`SetupError::PartiesNotPowerOfTwo`] if `parties` is not a power of
    /// two.
    pub fn new(parties: usize) -> Result<Self, SetupError> {
        let inner = DisseminationBarrier::new(parties)?;
        let rounds = inner.rounds;
        Ok(Self {
            inner,
            values: (0..parties).map(|_| ValueBanks::new(rounds)).collect(),
            _op: PhantomData,
        })
    }

    /// Attaches a command run by party 0 once per episode, after every
    /// party's fold is complete.
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
    ) -> Result<DisseminationReduceParty<T, O, &DisseminationReduce<T, O>>, PartyClaimError> {
        DisseminationReduceParty::claim(self, id)
    }
}

impl<T: Scalar, O: ReduceOp<T>> fmt::Debug for DisseminationReduce<T, O> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DisseminationReduce")
            .field("parties", &self.inner.parties)
            .field("rounds", &self.inner.rounds)
            .field("has_action", &self.inner.action.is_some())
            .finish_non_exhaustive()
    }
}

/// A claimed party of a [`DisseminationReduce`] barrier.
pub struct DisseminationReduceParty<
    T: Scalar,
    O: ReduceOp<T>,
    B: Deref<Target = DisseminationReduce<T, O>>,
> {
    barrier: B,
    id: usize,
    parity: usize,
    sense: bool,
    out_sense: bool,
}

impl<T: Scalar, O: ReduceOp<T>, B: Deref<Target = DisseminationReduce<T, O>>>
    DisseminationReduceParty<T, O, B>
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
            parity: 0,
            sense: false,
            out_sense: false,
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
        let barrier = &*self.barrier;
        let b = &barrier.inner;
        T::store(barrier.values[self.id].slot(self.parity, 0), value);
        for round in 0..b.rounds {
            let out = b.out_partner(self.id, round);
            b.flags[out].flag(self.parity, round).store(self.sense, Ordering::Release);
            spin_until(b.flags[self.id].flag(self.parity, round), self.sense);
            let theirs = T::load(
                barrier.values[b.in_partner(self.id, round)].slot(self.parity, round),
            );
            let mine = T::load(barrier.values[self.id].slot(self.parity, round));
            T::store(
                barrier.values[self.id].slot(self.parity, round + 1),
                O::combine(mine, theirs),
            );
        }
        let result = T::load(barrier.values[self.id].slot(self.parity, b.rounds));
        if self.parity == 1 {
            self.sense = !self.sense;
        }
        self.parity = 1 - self.parity;
        if let Some(action) = &b.action {
            self.out_sense = !self.out_sense;
            if self.id == 0 {
                action();
                b.flag_out.store(self.out_sense, Ordering::Release);
            } else {
                spin_until(&b.flag_out, self.out_sense);
            }
        }
        result
    }
}

impl<T: Scalar, O: ReduceOp<T>, B: Deref<Target = DisseminationReduce<T, O>>> fmt::Debug
    for DisseminationReduceParty<T, O, B>
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DisseminationReduceParty")
            .field("id", &self.id)
            .field("parity", &self.parity)
            .field("sense", &self.sense)
            .finish_non_exhaustive()
    }
}

impl<T: Scalar, O: ReduceOp<T>, B: Deref<Target = DisseminationReduce<T, O>>> Drop
    for DisseminationReduceParty<T, O, B>
{
    fn drop(&mut self) {
        self.barrier.inner.slots.release(self.id);
    }
}

#[cfg(all(test, not(loom), not(feature = "shuttle")))]
mod tests {
    use super::*;
    use crate::err::SetupError;

    #[test]
    fn rejects_non_power_of_two_party_counts() {
        for parties in [3, 5, 6, 7, 12] {
            assert_eq!(
                DisseminationBarrier::new(parties).unwrap_err(),
                SetupError::PartiesNotPowerOfTwo {
                    algorithm: Algorithm::Dissemination,
                    parties
                }
            );
        }
        assert!(matches!(
            DisseminationBarrier::new(1).unwrap_err(),
            SetupError::TooFewParties { .. }
        ));
    }

    #[test]
    fn partner_schedule_wraps_around_the_ring() {
        let b = DisseminationBarrier::new(8).unwrap();
        assert_eq!(b.rounds, 3);
        assert_eq!(b.out_partner(0, 0), 1);
        assert_eq!(b.out_partner(0, 1), 2);
        assert_eq!(b.out_partner(0, 2), 4);
        assert_eq!(b.out_partner(6, 1), 0);
        assert_eq!(b.out_partner(7, 2), 3);

        assert_eq!(b.in_partner(0, 0), 7);
        assert_eq!(b.in_partner(0, 2), 4);
        assert_eq!(b.in_partner(3, 1), 1);

        // each round's in/out relations invert each other
        for id in 0..8 {
            for round in 0..3 {
                assert_eq!(b.in_partner(b.out_partner(id, round), round), id);
            }
        }
    }
}
