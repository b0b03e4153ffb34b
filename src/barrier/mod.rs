//! The five barrier algorithms and their combining variants.
//!
//! Every barrier here splits its state the same way: the shared struct owns
//! everything other parties touch (flags, value slots, the claim ledger),
//! while each party's episode-local bookkeeping (sense and parity bits) lives
//! in the handle returned by `party`/`claim`. The handle's `&mut self` wait
//! method plus the one-live-handle-per-id claim discipline is what makes the
//! single-writer flag protocol safe to express with plain atomic stores.

use alloc::boxed::Box;

use crate::err::{Algorithm, PartyClaimError, SetupError};
use crate::sync::{AtomicBool, Ordering};
use crate::util;

pub(crate) mod butterfly;
pub(crate) mod central;
pub(crate) mod dissemination;
pub(crate) mod static_tree;
pub(crate) mod tournament;

/// Command run by exactly one party per tripped episode, before any party is
/// released.
pub type BarrierAction = Box<dyn Fn() + Send + Sync>;

/// Application-defined pairwise combine, invoked as `reduce(dst, src)` at each
/// meeting point an algorithm defines.
///
/// The callback must fold party `src`'s application state into party `dst`'s,
/// mutating only `dst`'s side. Algorithms rely on that direction: by the time
/// an episode ends, the designated final party's state holds the full
/// combination.
pub type PairReducer = Box<dyn Fn(usize, usize) + Send + Sync>;

/// Ledger of which party ids currently have a live handle.
///
/// One flag per id; a handle claims its slot with a CAS at construction and
/// its `Drop` releases it, so a dropped handle's id can be claimed again (by a
/// replacement thread, for instance) while a live one cannot be duplicated.
#[derive(Debug)]
pub(crate) struct PartySlots {
    slots: Box<[AtomicBool]>,
}

impl PartySlots {
    pub(crate) fn new(parties: usize) -> Self {
        Self {
            slots: (0..parties).map(|_| AtomicBool::new(false)).collect(),
        }
    }

    pub(crate) fn claim(&self, id: usize) -> Result<(), PartyClaimError> {
        if id >= self.slots.len() {
            return Err(PartyClaimError::IdOutOfRange {
                id,
                parties: self.slots.len(),
            });
        }
        self.slots[id]
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .map(|_| ())
            .map_err(|_| PartyClaimError::AlreadyClaimed { id })
    }

    pub(crate) fn release(&self, id: usize) {
        self.slots[id].store(false, Ordering::Release);
    }
}

pub(crate) fn check_at_least_two(
    algorithm: Algorithm,
    parties: usize,
) -> Result<(), SetupError> {
    if parties < 2 {
        return Err(SetupError::TooFewParties { algorithm, parties });
    }
    Ok(())
}

pub(crate) fn check_power_of_two(
    algorithm: Algorithm,
    parties: usize,
) -> Result<(), SetupError> {
    check_at_least_two(algorithm, parties)?;
    if !util::is_power_of_two(parties) {
        return Err(SetupError::PartiesNotPowerOfTwo { algorithm, parties });
    }
    Ok(())
}
