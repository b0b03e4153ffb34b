//! # phalanx
//!
//! Reusable spin-based barrier synchronization for a fixed set of peer
//! threads that rendezvous over and over. Every party blocks until all have
//! arrived, an optional action runs exactly once, an optional reduction folds
//! one scalar per party into a shared result, and everyone is released for
//! the next episode. All waiting busy-spins on shared atomic words, with no
//! parking and no syscall anywhere on the hot path, which buys minimum
//! wake-up latency at the price of burning a core per waiting party.
//!
//! That trade only makes sense when each party has a core to burn: keep the
//! party count at or below the machine's physical cores and pin one thread
//! per party. Oversubscribed, a spin barrier is strictly worse than
//! [`std::sync::Barrier`].
//!
//! # Usage
//!
//! Construct a shared barrier, hand each thread its claimed party handle, and
//! call `wait` once per episode:
//!
//! ```
//! use phalanx::{DisseminationReduce, Sum};
//! use std::thread;
//!
//! // Eight workers rendezvous 100 times, each episode summing one
//! // contribution per worker.
//! let barrier: DisseminationReduce<i64, Sum> = DisseminationReduce::new(8).unwrap();
//! thread::scope(|scope| {
//!     for id in 0..8 {
//!         let mut party = barrier.party(id).unwrap();
//!         scope.spawn(move || {
//!             for _ in 0..100 {
//!                 assert_eq!(party.wait(id as i64), 28);
//!             }
//!         });
//!     }
//! });
//! ```
//!
//! [`CentralBarrier::party`] borrows the barrier, which suits
//! [`std::thread::scope`]. For detached threads wrap the barrier in an `Arc`
//! and claim through it: `CentralParty::claim(barrier.clone(), id)`. Each id
//! is held by at most one live handle; dropping the handle releases it.
//!
//! # Algorithms
//!
//! Five algorithms share the same surface and differ in how arrival
//! information travels:
//!
//! - [`CentralBarrier`] / [`CentralReduce`]: one shared counter, sense
//!   reversal; any party count.
//! - [`DisseminationBarrier`] / [`DisseminationReduce`]: `log2 N` rounds of
//!   pairwise flag exchange around a ring; power-of-two `N`.
//! - [`ButterflyBarrier`] / [`ButterflyReduce`]: `log2 N` rounds of
//!   symmetric XOR-partner exchange; power-of-two `N`.
//! - [`TournamentBarrier`] / [`TournamentReduce`]: single-elimination
//!   bracket; any party count, byes pad the draw.
//! - [`StaticTreeBarrier`] / [`StaticTreeReduce`]: arrivals climb a fixed
//!   tree rooted at party 0; power-of-two `N`.
//!
//! The combining variants are generic over the carried scalar (`i32`, `i64`,
//! `f32`, `f64` via [`Scalar`]) and the operator ([`Min`], [`Max`], [`Sum`]
//! via [`ReduceOp`]). The plain variants instead accept an arbitrary pairwise
//! reducer callback for combining application state held outside the barrier.
//!
//! Whichever algorithm is used, a write performed by any party before its
//! `wait` is visible to every party after its own `wait` for the same episode
//! returns, the usual cyclic-barrier happens-before contract.
//!
//! # Limitations
//!
//! There is no broken-barrier detection, no timeout and no cancellation: a
//! party that never arrives leaves its peers spinning forever, and a panic in
//! a barrier action strands every other party. Party counts are fixed at
//! construction.
//!
//! # Features
//!
//! - `std` (default): nothing beyond convenience; the crate itself is
//!   `no_std` + `alloc`.
//! - `tracing`: `tracing` spans on construction and wait entry points.
//! - `shuttle`: swaps atomics for `shuttle`'s for randomized concurrency
//!   testing; `--cfg loom` likewise swaps in `loom`'s.
#![cfg_attr(not(feature = "std"), no_std)]
#![warn(missing_debug_implementations, missing_docs)]

extern crate alloc;

mod barrier;
mod err;
mod reduce;
mod sync;
mod util;

pub use barrier::butterfly::{
    ButterflyBarrier, ButterflyParty, ButterflyReduce, ButterflyReduceParty,
};
pub use barrier::central::{CentralBarrier, CentralParty, CentralReduce, CentralReduceParty};
pub use barrier::dissemination::{
    DisseminationBarrier, DisseminationParty, DisseminationReduce, DisseminationReduceParty,
};
pub use barrier::static_tree::{
    StaticTreeBarrier, StaticTreeParty, StaticTreeReduce, StaticTreeReduceParty,
};
pub use barrier::tournament::{
    TournamentBarrier, TournamentParty, TournamentReduce, TournamentReduceParty,
};
pub use barrier::{BarrierAction, PairReducer};
pub use err::{Algorithm, PartyClaimError, SetupError};
pub use reduce::{Max, Min, ReduceOp, Scalar, Sum};
