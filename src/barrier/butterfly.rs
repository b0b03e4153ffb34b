//! Butterfly barrier.
//!
//! From Brooks, "The Butterfly Barrier" (1986). Episode structure is the same
//! as the dissemination barrier's (`log2 N` rounds, two parity banks of
//! flags, sense flipping every second episode), but the round-`r` partner is
//! `id XOR 2^r`, so signalling is symmetric: the party whose flag you sign is
//! the party signing yours.

use core::fmt;
use core::marker::PhantomData;
use core::ops::Deref;

use alloc::boxed::Box;

use crate::barrier::dissemination::{FlagBanks, ValueBanks};
use crate::barrier::{check_power_of_two, BarrierAction, PairReducer, PartySlots};
use crate::err::{Algorithm, PartyClaimError, SetupError};
use crate::reduce::{ReduceOp, Scalar};
use crate::sync::{spin_until, AtomicBool, Ordering};
use crate::util::{log2_of_power_of_two, power_of_two};

/// A reusable spin barrier running `log2 N` rounds of symmetric flag exchange
/// between XOR partners.
///
/// Requires a power-of-two party count.
pub struct ButterflyBarrier {
    parties: usize,
    rounds: usize,
    flags: Box<[FlagBanks]>,
    flag_out: AtomicBool,
    action: Option<BarrierAction>,
    reducer: Option<PairReducer>,
    slots: PartySlots,
}

impl ButterflyBarrier {
    /// Creates a barrier for `parties` threads.
    ///
    /// # Errors
    ///
    /// Returns [`SetupError::TooFewParties`] if `parties < 2` and
    /// [`SetupError::PartiesNotPowerOfTwo`] if `parties` is not a power of
    /// two.
    #[cfg_attr(feature = "tracing", tracing::instrument(level = "debug"))]
    pub fn new(parties: usize) -> Result<Self, SetupError> {
        check_power_of_two(Algorithm::Butterfly, parties)?;
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
    /// `reduce(id, partner)` once per round after its incoming flag arrives.
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
    pub fn party(&self, id: usize) -> Result<ButterflyParty<&ButterflyBarrier>, PartyClaimError> {
        ButterflyParty::claim(self, id)
    }

    /// `id`'s partner in `round`; both sign and spin on each other.
    pub(crate) fn partner(&self, id: usize, round: usize) -> usize {
        (id ^ power_of_two(round)) % self.parties
    }
}

impl fmt::Debug for ButterflyBarrier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ButterflyBarrier")
            .field("parties", &self.parties)
            .field("rounds", &self.rounds)
            .field("has_action", &self.action.is_some())
            .field("has_reducer", &self.reducer.is_some())
            .finish_non_exhaustive()
    }
}

/// A claimed party of a [`ButterflyBarrier`].
pub struct ButterflyParty<B: Deref<Target = ButterflyBarrier>> {
    barrier: B,
    id: usize,
    parity: usize,
    sense: bool,
    out_sense: bool,
}

impl<B: Deref<Target = ButterflyBarrier>> ButterflyParty<B> {
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
            let partner = b.partner(self.id, round);
            b.flags[partner].flag(self.parity, round).store(self.sense, Ordering::Release);
            spin_until(b.flags[self.id].flag(self.parity, round), self.sense);
            if let Some(reducer) = &b.reducer {
                reducer(self.id, partner);
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

impl<B: Deref<Target = ButterflyBarrier>> fmt::Debug for ButterflyParty<B> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ButterflyParty")
            .field("id", &self.id)
            .field("parity", &self.parity)
            .field("sense", &self.sense)
            .finish_non_exhaustive()
    }
}

impl<B: Deref<Target = ButterflyBarrier>> Drop for ButterflyParty<B> {
    fn drop(&mut self) {
        self.barrier.slots.release(self.id);
    }
}

/// A [`ButterflyBarrier`] that additionally folds one scalar per party each
/// episode, every party receiving the result.
///
/// In round `r` each party folds its XOR partner's running value into its
/// own: `values[r + 1] = op(values[r], partner.values[r])`. After the last
/// round every party holds the reduction over all contributions; the fold
/// order follows the butterfly wiring, so non-associative float operators
/// yield a partner-schedule-dependent bit pattern rather than the id-order
/// fold.
pub struct ButterflyReduce<T: Scalar, O: ReduceOp<T>> {
    inner: ButterflyBarrier,
    values: Box<[ValueBanks<T>]>,
    _op: PhantomData<O>,
}

impl<T: Scalar, O: ReduceOp<T>> ButterflyReduce<T, O> {
    /// Creates a combining barrier for `parties` threads.
    ///
    /// # Errors
    ///
    /// Returns [`SetupError::TooFewParties`] if `parties < 2` and
    /// [`SetupError::PartiesNotPowerOfTwo`] if `parties` is not a power of
    /// two.
    pub fn new(parties: usize) -> Result<Self, SetupError> {
        let inner = ButterflyBarrier::new(parties)?;
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
    ) -> Result<ButterflyReduceParty<T, O, &ButterflyReduce<T, O>>, PartyClaimError> {
        ButterflyReduceParty::claim(self, id)
    }
}

impl<T: Scalar, O: ReduceOp<T>> fmt::Debug for ButterflyReduce<T, O> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ButterflyReduce")
            .field("parties", &self.inner.parties)
            .field("rounds", &self.inner.rounds)
            .field("has_action", &self.inner.action.is_some())
            .finish_non_exhaustive()
    }
}

/// A claimed party of a [`ButterflyReduce`] barrier.
pub struct ButterflyReduceParty<T: Scalar, O: ReduceOp<T>, B: Deref<Target = ButterflyReduce<T, O>>>
{
    barrier: B,
    id: usize,
    parity: usize,
    sense: bool,
    out_sense: bool,
}

impl<T: Scalar, O: ReduceOp<T>, B: Deref<Target = ButterflyReduce<T, O>>>
    ButterflyReduceParty<T, O, B>
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
            let partner = b.partner(self.id, round);
            b.flags[partner].flag(self.parity, round).store(self.sense, Ordering::Release);
            spin_until(b.flags[self.id].flag(self.parity, round), self.sense);
            let theirs = T::load(barrier.values[partner].slot(self.parity, round));
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

impl<T: Scalar, O: ReduceOp<T>, B: Deref<Target = ButterflyReduce<T, O>>> fmt::Debug
    for ButterflyReduceParty<T, O, B>
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ButterflyReduceParty")
            .field("id", &self.id)
            .field("parity", &self.parity)
            .field("sense", &self.sense)
            .finish_non_exhaustive()
    }
}

impl<T: Scalar, O: ReduceOp<T>, B: Deref<Target = ButterflyReduce<T, O>>> Drop
    for ButterflyReduceParty<T, O, B>
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
        for parties in [3, 6, 10] {
            assert_eq!(
                ButterflyBarrier::new(parties).unwrap_err(),
                SetupError::PartiesNotPowerOfTwo {
                    algorithm: Algorithm::Butterfly,
                    parties
                }
            );
        }
    }

    #[test]
    fn partners_are_symmetric() {
        let b = ButterflyBarrier::new(8).unwrap();
        assert_eq!(b.rounds, 3);
        assert_eq!(b.partner(0, 0), 1);
        assert_eq!(b.partner(0, 1), 2);
        assert_eq!(b.partner(0, 2), 4);
        assert_eq!(b.partner(5, 1), 7);

        for id in 0..8 {
            for round in 0..3 {
                assert_eq!(b.partner(b.partner(id, round), round), id);
            }
        }
    }
}
