//! Shared-counter barrier with sense reversal.
//!
//! The classic centralized barrier from Mellor-Crummey and Scott's
//! "Algorithms for Scalable Synchronization on Shared-Memory Multiprocessors"
//! (1991): every arriving party increments one counter, the last arrival
//! resets it and flips a global sense flag the others are spinning on. All
//! traffic lands on two cache lines, which is hard to beat for small party
//! counts and easy to beat for large ones.

use core::fmt;
use core::marker::PhantomData;
use core::ops::Deref;

use alloc::boxed::Box;

use crate::barrier::{check_at_least_two, BarrierAction, PairReducer, PartySlots};
use crate::err::{Algorithm, PartyClaimError, SetupError};
use crate::reduce::{ReduceOp, Scalar};
use crate::sync::{spin_until, AtomicBool, AtomicUsize, Ordering};

/// A reusable spin barrier for `parties` threads, built around one shared
/// counter.
///
/// Unlike the log-round algorithms in this crate it accepts any party count
/// `>= 2`.
///
/// # Examples
///
/// ```
/// use phalanx::CentralBarrier;
/// use std::thread;
///
/// let barrier = CentralBarrier::new(4).unwrap();
/// thread::scope(|scope| {
///     for id in 0..4 {
///         let mut party = barrier.party(id).unwrap();
///         scope.spawn(move || {
///             for _ in 0..100 {
///                 party.wait();
///             }
///         });
///     }
/// });
/// ```
pub struct CentralBarrier {
    parties: usize,
    counter: AtomicUsize,
    go: AtomicBool,
    action: Option<BarrierAction>,
    reducer: Option<PairReducer>,
    slots: PartySlots,
}

impl CentralBarrier {
    /// Creates a barrier for `parties` threads.
    ///
    /// # Errors
    ///
    /// Returns [`SetupError::TooFewParties`] if `parties < 2`.
    #[cfg_attr(feature = "tracing", tracing::instrument(level = "debug"))]
    pub fn new(parties: usize) -> Result<Self, SetupError> {
        check_at_least_two(Algorithm::Central, parties)?;
        Ok(Self {
            parties,
            counter: AtomicUsize::new(0),
            go: AtomicBool::new(false),
            action: None,
            reducer: None,
            slots: PartySlots::new(parties),
        })
    }

    /// Attaches a command run by the releasing party once per episode, before
    /// any party is released.
    #[must_use]
    pub fn with_action(mut self, action: impl Fn() + Send + Sync + 'static) -> Self {
        self.action = Some(Box::new(action));
        self
    }

    /// Attaches a generic pairwise reducer.
    ///
    /// The releasing party invokes it as `reduce(0, src)` for
    /// `src = 1..parties` in id order, so party 0's application state ends up
    /// holding the full combination when the episode trips.
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
    pub fn party(&self, id: usize) -> Result<CentralParty<&CentralBarrier>, PartyClaimError> {
        CentralParty::claim(self, id)
    }
}

impl fmt::Debug for CentralBarrier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CentralBarrier")
            .field("parties", &self.parties)
            .field("has_action", &self.action.is_some())
            .field("has_reducer", &self.reducer.is_some())
            .finish_non_exhaustive()
    }
}

/// A claimed party of a [`CentralBarrier`].
///
/// Obtained from [`CentralBarrier::party`] for scoped threads, or
/// [`CentralParty::claim`] with an `Arc` for spawned ones. Dropping the handle
/// releases the id.
pub struct CentralParty<B: Deref<Target = CentralBarrier>> {
    barrier: B,
    id: usize,
}

impl<B: Deref<Target = CentralBarrier>> CentralParty<B> {
    /// Claims party `id` on `barrier`.
    ///
    /// # Errors
    ///
    /// Fails if `id` is out of range or already claimed by a live handle.
    pub fn claim(barrier: B, id: usize) -> Result<Self, PartyClaimError> {
        barrier.slots.claim(id)?;
        Ok(Self { barrier, id })
    }

    /// This party's id.
    pub fn id(&self) -> usize {
        self.id
    }

    /// Blocks (spinning) until all parties of the episode have arrived.
    ///
    /// The last arrival runs the configured reducer and action, then releases
    /// everyone by flipping the shared sense flag.
    #[cfg_attr(
        feature = "tracing",
        tracing::instrument(level = "trace", skip_all, fields(id = self.id))
    )]
    pub fn wait(&mut self) {
        let b = &*self.barrier;
        let local_go = b.go.load(Ordering::Acquire);
        if b.counter.fetch_add(1, Ordering::SeqCst) + 1 == b.parties {
            b.counter.store(0, Ordering::SeqCst);
            if let Some(reducer) = &b.reducer {
                for src in 1..b.parties {
                    reducer(0, src);
                }
            }
            if let Some(action) = &b.action {
                action();
            }
            b.go.store(!local_go, Ordering::Release);
        } else {
            spin_until(&b.go, !local_go);
        }
    }
}

impl<B: Deref<Target = CentralBarrier>> fmt::Debug for CentralParty<B> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CentralParty")
            .field("id", &self.id)
            .finish_non_exhaustive()
    }
}

impl<B: Deref<Target = CentralBarrier>> Drop for CentralParty<B> {
    fn drop(&mut self) {
        self.barrier.slots.release(self.id);
    }
}

/// A [`CentralBarrier`] that additionally folds one scalar per party into a
/// shared result each episode.
///
/// Contributions are folded by the releasing party in ascending id order, so
/// the result is the left-fold `op(..op(op(v0, v1), v2).., v(n-1))`.
pub struct CentralReduce<T: Scalar, O: ReduceOp<T>> {
    parties: usize,
    counter: AtomicUsize,
    go: AtomicBool,
    values: Box<[T::Slot]>,
    result: T::Slot,
    action: Option<BarrierAction>,
    slots: PartySlots,
    _op: PhantomData<O>,
}

impl<T: Scalar, O: ReduceOp<T>> CentralReduce<T, O> {
    /// Creates a combining barrier for `parties` threads.
    ///
    /// # Errors
    ///
    /// Returns [`SetupError::TooFewParties`] if `parties < 2`.
    pub fn new(parties: usize) -> Result<Self, SetupError> {
        check_at_least_two(Algorithm::Central, parties)?;
        Ok(Self {
            parties,
            counter: AtomicUsize::new(0),
            go: AtomicBool::new(false),
            values: (0..parties).map(|_| T::new_slot()).collect(),
            result: T::new_slot(),
            action: None,
            slots: PartySlots::new(parties),
            _op: PhantomData,
        })
    }

    /// Attaches a command run by the releasing party once per episode, after
    /// the fold and before any party is released.
    #[must_use]
    pub fn with_action(mut self, action: impl Fn() + Send + Sync + 'static) -> Self {
        self.action = Some(Box::new(action));
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
    #[allow(clippy::type_complexity)]
    pub fn party(
        &self,
        id: usize,
    ) -> Result<CentralReduceParty<T, O, &CentralReduce<T, O>>, PartyClaimError> {
        CentralReduceParty::claim(self, id)
    }
}

impl<T: Scalar, O: ReduceOp<T>> fmt::Debug for CentralReduce<T, O> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CentralReduce")
            .field("parties", &self.parties)
            .field("has_action", &self.action.is_some())
            .finish_non_exhaustive()
    }
}

/// A claimed party of a [`CentralReduce`] barrier.
pub struct CentralReduceParty<T: Scalar, O: ReduceOp<T>, B: Deref<Target = CentralReduce<T, O>>> {
    barrier: B,
    id: usize,
}

impl<T: Scalar, O: ReduceOp<T>, B: Deref<Target = CentralReduce<T, O>>>
    CentralReduceParty<T, O, B>
{
    /// Claims party `id` on `barrier`.
    ///
    /// # Errors
    ///
    /// Fails if `id` is out of range or already claimed by a live handle.
    pub fn claim(barrier: B, id: usize) -> Result<Self, PartyClaimError> {
        barrier.slots.claim(id)?;
        Ok(Self { barrier, id })
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
        let b = &*self.barrier;
        T::store(&b.values[self.id], value);
        let local_go = b.go.load(Ordering::Acquire);
        if b.counter.fetch_add(1, Ordering::SeqCst) + 1 == b.parties {
            b.counter.store(0, Ordering::SeqCst);
            let mut acc = T::load(&b.values[0]);
            for id in 1..b.parties {
                acc = O::combine(acc, T::load(&b.values[id]));
            }
            T::store(&b.result, acc);
            if let Some(action) = &b.action {
                action();
            }
            b.go.store(!local_go, Ordering::Release);
            acc
        } else {
            spin_until(&b.go, !local_go);
            T::load(&b.result)
        }
    }
}

impl<T: Scalar, O: ReduceOp<T>, B: Deref<Target = CentralReduce<T, O>>> fmt::Debug
    for CentralReduceParty<T, O, B>
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CentralReduceParty")
            .field("id", &self.id)
            .finish_non_exhaustive()
    }
}

impl<T: Scalar, O: ReduceOp<T>, B: Deref<Target = CentralReduce<T, O>>> Drop
    for CentralReduceParty<T, O, B>
{
    fn drop(&mut self) {
        self.barrier.slots.release(self.id);
    }
}
