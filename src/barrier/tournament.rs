//! Tournament barrier.
//!
//! From Hensgen, Finkel and Manber, "Two Algorithms for Barrier
//! Synchronization" (1988). Parties meet in a single-elimination bracket
//! whose winners and losers are fixed in advance: a loser signs its winner's
//! flag and drops out to wait for the overall release, a winner spins for
//! that signature and advances, and the champion (party 0 at the last round)
//! publishes the release flag. Party counts that are not powers of two are
//! padded with byes: a party whose scheduled opponent does not exist simply
//! advances, which is what the `Wildcard` role encodes.

use core::fmt;
use core::marker::PhantomData;
use core::ops::Deref;

use alloc::boxed::Box;

use crate::barrier::{check_at_least_two, BarrierAction, PairReducer, PartySlots};
use crate::err::{Algorithm, PartyClaimError, SetupError};
use crate::reduce::{ReduceOp, Scalar};
use crate::sync::{spin_until, AtomicBool, Ordering};
use crate::util::{log2_of_power_of_two, next_higher_power_of_two, power_of_two};

/// A party's pre-computed role in one round of the bracket.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Role {
    /// Spins for the partner's signature, then advances.
    Winner {
        /// The opponent whose arrival this party collects.
        partner: usize,
    },
    /// Signs the partner's flag, then waits out the tournament.
    Loser {
        /// The opponent whose round flag this party signs.
        partner: usize,
    },
    /// Scheduled opponent is beyond the real party count; advance unopposed.
    Wildcard,
    /// Champion: collects the final signature and releases everyone.
    Root {
        /// The opponent whose arrival the champion collects last.
        partner: usize,
    },
}

fn plan_role(parties: usize, virtual_size: usize, rounds: usize, id: usize, round: usize) -> Role {
    let partner = (id ^ power_of_two(round)) % virtual_size;
    let is_winner = id % power_of_two(round + 1) == 0;
    if partner >= parties {
        Role::Wildcard
    } else if is_winner {
        if id == 0 && round == rounds - 1 {
            Role::Root { partner }
        } else {
            Role::Winner { partner }
        }
    } else {
        Role::Loser { partner }
    }
}

/// A reusable spin barrier arranging its parties in a single-elimination
/// bracket.
///
/// Accepts any party count `>= 2`; non-power-of-two counts are padded with
/// wildcard byes inside a virtual bracket of the next power-of-two size.
pub struct TournamentBarrier {
    parties: usize,
    rounds: usize,
    plan: Box<[Role]>,
    flags: Box<[AtomicBool]>,
    flag_out: AtomicBool,
    action: Option<BarrierAction>,
    reducer: Option<PairReducer>,
    slots: PartySlots,
}

impl TournamentBarrier {
    /// Creates a barrier for `parties` threads.
    ///
    /// # Errors
    ///
    /// Returns [`SetupError::TooFewParties`] if `parties < 2`.
    #[cfg_attr(feature = "tracing", tracing::instrument(level = "debug"))]
    pub fn new(parties: usize) -> Result<Self, SetupError> {
        check_at_least_two(Algorithm::Tournament, parties)?;
        let virtual_size = next_higher_power_of_two(parties);
        let rounds = log2_of_power_of_two(virtual_size);
        let plan = (0..parties * rounds)
            .map(|i| plan_role(parties, virtual_size, rounds, i / rounds, i % rounds))
            .collect();
        Ok(Self {
            parties,
            rounds,
            plan,
            flags: (0..parties * rounds).map(|_| AtomicBool::new(false)).collect(),
            flag_out: AtomicBool::new(false),
            action: None,
            reducer: None,
            slots: PartySlots::new(parties),
        })
    }

    /// Attaches a command run by the champion once per episode, before any
    /// party is released.
    #[must_use]
    pub fn with_action(mut self, action: impl Fn() + Send + Sync + 'static) -> Self {
        self.action = Some(Box::new(action));
        self
    }

    /// Attaches a generic pairwise reducer.
    ///
    /// A winner (and finally the champion) invokes it as
    /// `reduce(id, partner)` after collecting each opponent, so the
    /// champion's application state ends up holding the full combination.
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
    ) -> Result<TournamentParty<&TournamentBarrier>, PartyClaimError> {
        TournamentParty::claim(self, id)
    }

    pub(crate) fn role(&self, id: usize, round: usize) -> Role {
        self.plan[id * self.rounds + round]
    }

    pub(crate) fn flag(&self, id: usize, round: usize) -> &AtomicBool {
        &self.flags[id * self.rounds + round]
    }
}

impl fmt::Debug for TournamentBarrier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TournamentBarrier")
            .field("parties", &self.parties)
            .field("rounds", &self.rounds)
            .field("has_action", &self.action.is_some())
            .field("has_reducer", &self.reducer.is_some())
            .finish_non_exhaustive()
    }
}

/// A claimed party of a [`TournamentBarrier`].
pub struct TournamentParty<B: Deref<Target = TournamentBarrier>> {
    barrier: B,
    id: usize,
    sense: bool,
}

impl<B: Deref<Target = TournamentBarrier>> TournamentParty<B> {
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
        let mut round = 0;
        loop {
            match b.role(self.id, round) {
                Role::Winner { partner } => {
                    spin_until(b.flag(self.id, round), self.sense);
                    if let Some(reducer) = &b.reducer {
                        reducer(self.id, partner);
                    }
                    round += 1;
                }
                Role::Wildcard => round += 1,
                Role::Loser { partner } => {
                    b.flag(partner, round).store(self.sense, Ordering::Release);
                    spin_until(&b.flag_out, self.sense);
                    break;
                }
                Role::Root { partner } => {
                    spin_until(b.flag(self.id, round), self.sense);
                    if let Some(reducer) = &b.reducer {
                        reducer(self.id, partner);
                    }
                    if let Some(action) = &b.action {
                        action();
                    }
                    b.flag_out.store(self.sense, Ordering::Release);
                    break;
                }
            }
        }
    }
}

impl<B: Deref<Target = TournamentBarrier>> fmt::Debug for TournamentParty<B> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TournamentParty")
            .field("id", &self.id)
            .field("sense", &self.sense)
            .finish_non_exhaustive()
    }
}

impl<B: Deref<Target = TournamentBarrier>> Drop for TournamentParty<B> {
    fn drop(&mut self) {
        self.barrier.slots.release(self.id);
    }
}

/// A [`TournamentBarrier`] that additionally folds one scalar per party into
/// a shared result each episode.
///
/// Each winner folds its opponent's running value into its own as the bracket
/// collapses, and the champion publishes the final fold. The combining order
/// follows the bracket, pairing ids that differ in bit `r` at round `r`; for
/// commutative-associative operators this equals the ascending-id fold.
pub struct TournamentReduce<T: Scalar, O: ReduceOp<T>> {
    inner: TournamentBarrier,
    values: Box<[T::Slot]>,
    result: T::Slot,
    _op: PhantomData<O>,
}

impl<T: Scalar, O: ReduceOp<T>> TournamentReduce<T, O> {
    /// Creates a combining barrier for `parties` threads.
    ///
    /// # Errors
    ///
    /// Returns [`SetupError::TooFewParties`] if `parties < 2`.
    pub fn new(parties: usize) -> Result<Self, SetupError> {
        let inner = TournamentBarrier::new(parties)?;
        Ok(Self {
            inner,
            values: (0..parties).map(|_| T::new_slot()).collect(),
            result: T::new_slot(),
            _op: PhantomData,
        })
    }

    /// Attaches a command run by the champion once per episode, after the
    /// final fold and before any party is released.
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
    ) -> Result<TournamentReduceParty<T, O, &TournamentReduce<T, O>>, PartyClaimError> {
        TournamentReduceParty::claim(self, id)
    }
}

impl<T: Scalar, O: ReduceOp<T>> fmt::Debug for TournamentReduce<T, O> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TournamentReduce")
            .field("parties", &self.inner.parties)
            .field("rounds", &self.inner.rounds)
            .field("has_action", &self.inner.action.is_some())
            .finish_non_exhaustive()
    }
}

/// A claimed party of a [`TournamentReduce`] barrier.
pub struct TournamentReduceParty<
    T: Scalar,
    O: ReduceOp<T>,
    B: Deref<Target = TournamentReduce<T, O>>,
> {
    barrier: B,
    id: usize,
    sense: bool,
}

impl<T: Scalar, O: ReduceOp<T>, B: Deref<Target = TournamentReduce<T, O>>>
    TournamentReduceParty<T, O, B>
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
        let barrier = &*self.barrier;
        let b = &barrier.inner;
        let mut running = value;
        T::store(&barrier.values[self.id], running);
        self.sense = !self.sense;
        let mut round = 0;
        loop {
            match b.role(self.id, round) {
                Role::Winner { partner } => {
                    spin_until(b.flag(self.id, round), self.sense);
                    running = O::combine(running, T::load(&barrier.values[partner]));
                    // keep the shared slot current in case this party loses a
                    // later round
                    T::store(&barrier.values[self.id], running);
                    round += 1;
                }
                Role::Wildcard => round += 1,
                Role::Loser { partner } => {
                    b.flag(partner, round).store(self.sense, Ordering::Release);
                    spin_until(&b.flag_out, self.sense);
                    break T::load(&barrier.result);
                }
                Role::Root { partner } => {
                    spin_until(b.flag(self.id, round), self.sense);
                    let folded = O::combine(running, T::load(&barrier.values[partner]));
                    T::store(&barrier.result, folded);
                    if let Some(action) = &b.action {
                        action();
                    }
                    b.flag_out.store(self.sense, Ordering::Release);
                    break folded;
                }
            }
        }
    }
}

impl<T: Scalar, O: ReduceOp<T>, B: Deref<Target = TournamentReduce<T, O>>> fmt::Debug
    for TournamentReduceParty<T, O, B>
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TournamentReduceParty")
            .field("id", &self.id)
            .field("sense", &self.sense)
            .finish_non_exhaustive()
    }
}

impl<T: Scalar, O: ReduceOp<T>, B: Deref<Target = TournamentReduce<T, O>>> Drop
    for TournamentReduceParty<T, O, B>
{
    fn drop(&mut self) {
        self.barrier.inner.slots.release(self.id);
    }
}
