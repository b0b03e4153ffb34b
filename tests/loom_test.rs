#![cfg(loom)]

mod common;

use common::{Arc, AtomicUsize, Ordering};
use loom::thread;

use phalanx::{CentralBarrier, CentralParty, StaticTreeReduce, StaticTreeReduceParty, Sum};

#[test]
fn central_two_parties_two_episodes() {
    loom::model(|| {
        let barrier = Arc::new(CentralBarrier::new(2).unwrap());

        let handle = {
            let barrier = barrier.clone();
            thread::spawn(move || {
                let mut party = CentralParty::claim(barrier, 1).unwrap();
                party.wait();
                party.wait();
            })
        };

        let mut party = CentralParty::claim(barrier, 0).unwrap();
        party.wait();
        party.wait();

        handle.join().unwrap();
    });
}

#[test]
fn pre_wait_writes_are_visible_after_release() {
    loom::model(|| {
        let barrier = Arc::new(CentralBarrier::new(2).unwrap());
        let slot = Arc::new(AtomicUsize::new(0));

        let handle = {
            let barrier = barrier.clone();
            let slot = slot.clone();
            thread::spawn(move || {
                let mut party = CentralParty::claim(barrier, 1).unwrap();
                slot.store(7, Ordering::Relaxed);
                party.wait();
            })
        };

        let mut party = CentralParty::claim(barrier, 0).unwrap();
        party.wait();
        assert_eq!(slot.load(Ordering::Relaxed), 7);

        handle.join().unwrap();
    });
}

#[test]
fn static_tree_reduction_folds_both_contributions() {
    loom::model(|| {
        let barrier = Arc::new(StaticTreeReduce::<i32, Sum>::new(2).unwrap());

        let handle = {
            let barrier = barrier.clone();
            thread::spawn(move || {
                let mut party = StaticTreeReduceParty::claim(barrier, 1).unwrap();
                assert_eq!(party.wait(2), 3);
            })
        };

        let mut party = StaticTreeReduceParty::claim(barrier, 0).unwrap();
        assert_eq!(party.wait(1), 3);

        handle.join().unwrap();
    });
}
