#![cfg(feature = "shuttle")]

mod common;

use common::{Arc, AtomicUsize, Ordering};
use shuttle::thread;

use phalanx::{
    DisseminationReduce, DisseminationReduceParty, Sum, TournamentBarrier, TournamentParty,
};
use test_log::test;

#[test]
fn dissemination_sum_under_random_schedules() {
    shuttle::check_random(
        || {
            let barrier = Arc::new(DisseminationReduce::<i32, Sum>::new(4).unwrap());

            let handles: Vec<_> = (0..4)
                .map(|id| {
                    let barrier = barrier.clone();
                    thread::spawn(move || {
                        let mut party = DisseminationReduceParty::claim(barrier, id).unwrap();
                        // two episodes to cross a parity flip
                        assert_eq!(party.wait(id as i32), 6);
                        assert_eq!(party.wait(id as i32 + 1), 10);
                    })
                })
                .collect();

            for handle in handles {
                handle.join().expect("a party panicked");
            }
        },
        200,
    );
}

#[test]
fn tournament_action_trips_once_under_random_schedules() {
    shuttle::check_random(
        || {
            let tripped = Arc::new(AtomicUsize::new(0));
            let counter = tripped.clone();
            let barrier = Arc::new(TournamentBarrier::new(3).unwrap().with_action(move || {
                counter.fetch_add(1, Ordering::Relaxed);
            }));

            let handles: Vec<_> = (0..3)
                .map(|id| {
                    let barrier = barrier.clone();
                    thread::spawn(move || {
                        let mut party = TournamentParty::claim(barrier, id).unwrap();
                        party.wait();
                        party.wait();
                    })
                })
                .collect();

            for handle in handles {
                handle.join().expect("a party panicked");
            }
            assert_eq!(tripped.load(Ordering::Relaxed), 2);
        },
        200,
    );
}
