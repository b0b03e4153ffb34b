use core::fmt::{self, Formatter};

use displaydoc::Display;

/// Identifies a barrier algorithm in error messages.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum Algorithm {
    /// Shared-counter barrier with sense reversal.
    Central,
    /// Pairwise flag exchange over `log2 N` rounds.
    Dissemination,
    /// XOR-partner flag exchange over `log2 N` rounds.
    Butterfly,
    /// Single-elimination bracket of winners and losers.
    Tournament,
    /// Asymmetric arrival tree rooted at party 0.
    StaticTree,
}

impl fmt::Display for Algorithm {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{self:?}")
    }
}

/// Rejected barrier configuration, reported at construction time.
#[derive(Debug, Display, Eq, PartialEq)]
pub enum SetupError {
    /// {algorithm} barrier requires at least 2 parties, got {parties}
    TooFewParties {
        /// The algorithm that rejected the configuration.
        algorithm: Algorithm,
        /// The requested party count.
        parties: usize,
    },

    /** {algorithm} barrier requires the number of parties to be a power of
       two, got {parties}
    */
    PartiesNotPowerOfTwo {
        /// The algorithm that rejected the configuration.
        algorithm: Algorithm,
        /// The requested party count.
        parties: usize,
    },
}

/// Rejected attempt to claim a party id on a barrier.
#[derive(Debug, Display, Eq, PartialEq)]
pub enum PartyClaimError {
    /// party id {id} is out of range for a barrier of {parties} parties
    IdOutOfRange {
        /// The requested party id.
        id: usize,
        /// The barrier's party count.
        parties: usize,
    },

    /// party id {id} is already claimed by a live handle on this barrier
    AlreadyClaimed {
        /// The requested party id.
        id: usize,
    },
}
