#![cfg(all(feature = "std", not(loom), not(feature = "shuttle")))]

mod common;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;

use common::{episodes_for, hammer};
use phalanx::{
    ButterflyBarrier, CentralBarrier, CentralParty, DisseminationBarrier, StaticTreeBarrier,
    TournamentBarrier, TournamentParty,
};
use test_log::test;
use tracing::debug;

#[test]
fn central_hammers_through_episodes() {
    for parties in [2, 3, 4, 5, 8] {
        let barrier = CentralBarrier::new(parties).unwrap();
        hammer(parties, episodes_for(parties), |id| {
            let mut party = barrier.party(id).unwrap();
            move || party.wait()
        });
        debug!(parties, "central barrier drained");
    }
}

#[test]
fn central_survives_ten_thousand_episodes() {
    let barrier = CentralBarrier::new(2).unwrap();
    hammer(2, 10_000, |id| {
        let mut party = barrier.party(id).unwrap();
        move || party.wait()
    });
}

#[test]
fn dissemination_hammers_through_episodes() {
    for parties in [2, 4, 8] {
        let barrier = DisseminationBarrier::new(parties).unwrap();
        hammer(parties, episodes_for(parties), |id| {
            let mut party = barrier.party(id).unwrap();
            move || party.wait()
        });
    }
}

#[test]
fn butterfly_hammers_through_episodes() {
    for parties in [2, 4, 8] {
        let barrier = ButterflyBarrier::new(parties).unwrap();
        hammer(parties, episodes_for(parties), |id| {
            let mut party = barrier.party(id).unwrap();
            move || party.wait()
        });
    }
}

#[test]
fn tournament_hammers_through_episodes() {
    for parties in [2, 3, 4, 5, 8] {
        let barrier = TournamentBarrier::new(parties).unwrap();
        hammer(parties, episodes_for(parties), |id| {
            let mut party = barrier.party(id).unwrap();
            move || party.wait()
        });
    }
}

#[test]
fn static_tree_hammers_through_episodes() {
    for parties in [2, 4, 8] {
        let barrier = StaticTreeBarrier::new(parties).unwrap();
        hammer(parties, episodes_for(parties), |id| {
            let mut party = barrier.party(id).unwrap();
            move || party.wait()
        });
    }
}

/// A three-way (non-power-of-two) central barrier gets every party through
/// 500 episodes.
#[test]
fn central_three_parties_count_their_episodes() {
    const PARTIES: usize = 3;
    const EPISODES: usize = 500;

    let barrier = CentralBarrier::new(PARTIES).unwrap();
    let counts: Vec<AtomicUsize> = (0..PARTIES).map(|_| AtomicUsize::new(0)).collect();

    thread::scope(|scope| {
        for (id, count) in counts.iter().enumerate() {
            let mut party = barrier.party(id).unwrap();
            scope.spawn(move || {
                for _ in 0..EPISODES {
                    party.wait();
                    count.fetch_add(1, Ordering::Relaxed);
                }
            });
        }
    });

    for count in &counts {
        assert_eq!(count.load(Ordering::Relaxed), EPISODES);
    }
}

/// The dissemination fan-out runs the action exactly once per episode.
#[test]
fn dissemination_action_runs_once_per_episode() {
    const PARTIES: usize = 8;
    const EPISODES: usize = 1_000;

    let tripped = Arc::new(AtomicUsize::new(0));
    let counter = tripped.clone();
    let barrier = DisseminationBarrier::new(PARTIES).unwrap().with_action(move || {
        counter.fetch_add(1, Ordering::Relaxed);
    });

    hammer(PARTIES, EPISODES, |id| {
        let mut party = barrier.party(id).unwrap();
        move || party.wait()
    });

    assert_eq!(tripped.load(Ordering::Relaxed), EPISODES);
}

#[test]
fn central_action_runs_once_per_episode() {
    const PARTIES: usize = 5;
    const EPISODES: usize = 1_000;

    let tripped = Arc::new(AtomicUsize::new(0));
    let counter = tripped.clone();
    let barrier = CentralBarrier::new(PARTIES).unwrap().with_action(move || {
        counter.fetch_add(1, Ordering::Relaxed);
    });

    hammer(PARTIES, EPISODES, |id| {
        let mut party = barrier.party(id).unwrap();
        move || party.wait()
    });

    assert_eq!(tripped.load(Ordering::Relaxed), EPISODES);
}

#[test]
fn butterfly_action_runs_once_per_episode() {
    const PARTIES: usize = 4;
    const EPISODES: usize = 1_000;

    let tripped = Arc::new(AtomicUsize::new(0));
    let counter = tripped.clone();
    let barrier = ButterflyBarrier::new(PARTIES).unwrap().with_action(move || {
        counter.fetch_add(1, Ordering::Relaxed);
    });

    hammer(PARTIES, EPISODES, |id| {
        let mut party = barrier.party(id).unwrap();
        move || party.wait()
    });

    assert_eq!(tripped.load(Ordering::Relaxed), EPISODES);
}

#[test]
fn tournament_action_runs_once_per_episode() {
    const PARTIES: usize = 5;
    const EPISODES: usize = 1_000;

    let tripped = Arc::new(AtomicUsize::new(0));
    let counter = tripped.clone();
    let barrier = TournamentBarrier::new(PARTIES).unwrap().with_action(move || {
        counter.fetch_add(1, Ordering::Relaxed);
    });

    hammer(PARTIES, EPISODES, |id| {
        let mut party = barrier.party(id).unwrap();
        move || party.wait()
    });

    assert_eq!(tripped.load(Ordering::Relaxed), EPISODES);
}

#[test]
fn static_tree_action_runs_once_per_episode() {
    const PARTIES: usize = 8;
    const EPISODES: usize = 500;

    let tripped = Arc::new(AtomicUsize::new(0));
    let counter = tripped.clone();
    let barrier = StaticTreeBarrier::new(PARTIES).unwrap().with_action(move || {
        counter.fetch_add(1, Ordering::Relaxed);
    });

    hammer(PARTIES, EPISODES, |id| {
        let mut party = barrier.party(id).unwrap();
        move || party.wait()
    });

    assert_eq!(tripped.load(Ordering::Relaxed), EPISODES);
}

/// Writes made by a party before `wait` must be visible to the action of the
/// same episode and to every party afterwards.
#[test]
fn pre_wait_writes_are_visible_inside_the_action() {
    const PARTIES: usize = 4;
    const EPISODES: usize = 500;

    let slots: Arc<Vec<AtomicUsize>> =
        Arc::new((0..PARTIES).map(|_| AtomicUsize::new(usize::MAX)).collect());
    let seen = slots.clone();
    let episode = Arc::new(AtomicUsize::new(0));
    let current = episode.clone();

    let barrier = DisseminationBarrier::new(PARTIES).unwrap().with_action(move || {
        let now = current.fetch_add(1, Ordering::Relaxed);
        for slot in seen.iter() {
            assert_eq!(slot.load(Ordering::Relaxed), now);
        }
    });

    thread::scope(|scope| {
        for id in 0..PARTIES {
            let mut party = barrier.party(id).unwrap();
            let slots = slots.clone();
            scope.spawn(move || {
                for episode in 0..EPISODES {
                    slots[id].store(episode, Ordering::Relaxed);
                    party.wait();
                }
            });
        }
    });

    assert_eq!(episode.load(Ordering::Relaxed), EPISODES);
}

/// The central releaser drives the generic reducer over `(0, 1..N)` in
/// ascending id order.
#[test]
fn central_generic_reducer_folds_in_id_order() {
    const PARTIES: usize = 4;

    let log = Arc::new(Mutex::new(Vec::new()));
    let sink = log.clone();
    let barrier = CentralBarrier::new(PARTIES)
        .unwrap()
        .with_reducer(move |dst, src| sink.lock().unwrap().push((dst, src)));

    hammer(PARTIES, 1, |id| {
        let mut party = barrier.party(id).unwrap();
        move || party.wait()
    });

    assert_eq!(*log.lock().unwrap(), vec![(0, 1), (0, 2), (0, 3)]);
}

/// With no interior nodes at N = 4 all reduce calls come from the root, in
/// the documented child order.
#[test]
fn static_tree_generic_reducer_visits_root_children_in_order() {
    const PARTIES: usize = 4;

    let log = Arc::new(Mutex::new(Vec::new()));
    let sink = log.clone();
    let barrier = StaticTreeBarrier::new(PARTIES)
        .unwrap()
        .with_reducer(move |dst, src| sink.lock().unwrap().push((dst, src)));

    hammer(PARTIES, 1, |id| {
        let mut party = barrier.party(id).unwrap();
        move || party.wait()
    });

    assert_eq!(*log.lock().unwrap(), vec![(0, 1), (0, 2), (0, 3)]);
}

/// At N = 5 the bracket pads with byes: party 4 meets nobody until the
/// final, and the champion collects `(0,1)`, `(0,2)`, `(0,4)`.
#[test]
fn tournament_generic_reducer_follows_the_bracket() {
    const PARTIES: usize = 5;

    let log = Arc::new(Mutex::new(Vec::new()));
    let sink = log.clone();
    let barrier = TournamentBarrier::new(PARTIES)
        .unwrap()
        .with_reducer(move |dst, src| sink.lock().unwrap().push((dst, src)));

    hammer(PARTIES, 1, |id| {
        let mut party = barrier.party(id).unwrap();
        move || party.wait()
    });

    let log = log.lock().unwrap();
    let champion: Vec<_> = log.iter().copied().filter(|&(dst, _)| dst == 0).collect();
    assert_eq!(champion, vec![(0, 1), (0, 2), (0, 4)]);
    assert!(log.contains(&(2, 3)));
    assert_eq!(log.len(), 4);
}

/// Claiming through an `Arc` works for detached (non-scoped) threads.
#[test]
fn arc_claimed_parties_run_detached() {
    const PARTIES: usize = 3;
    const EPISODES: usize = 500;

    let barrier = Arc::new(TournamentBarrier::new(PARTIES).unwrap());
    let handles: Vec<_> = (0..PARTIES)
        .map(|id| {
            let barrier = barrier.clone();
            thread::spawn(move || {
                let mut party = TournamentParty::claim(barrier, id).unwrap();
                for _ in 0..EPISODES {
                    party.wait();
                }
            })
        })
        .collect();

    for handle in handles {
        handle.join().expect("a party panicked");
    }
}

#[test]
fn arc_claims_reject_duplicate_ids() {
    let barrier = Arc::new(CentralBarrier::new(2).unwrap());
    let first = CentralParty::claim(barrier.clone(), 0).unwrap();
    assert!(CentralParty::claim(barrier.clone(), 0).is_err());
    drop(first);
    assert!(CentralParty::claim(barrier, 0).is_ok());
}
