//! Claim exclusivity under contention.
//!
//! The atomic rename is the protocol's only mutual-exclusion primitive:
//! when N workers race for the same open task, exactly one rename must
//! succeed and the losers must observe `NotFound`.

use std::fs;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Barrier};
use std::thread;

use foreman::core::{Task, TaskId};
use foreman::mailbox::{ClaimResult, Envelope, Outcome, WorkerId};

use crate::fixtures::{ScriptedExecutor, TestBed};

fn publish(bed: &TestBed, id: &str) {
    bed.layout.ensure(10).unwrap();
    let envelope = Envelope::new(Task::new(id, &format!("{} title", id)), vec![], vec![]);
    envelope
        .write_to(&bed.layout.entry_path(&bed.layout.open_dir(), &TaskId::new(id)))
        .unwrap();
}

#[test]
fn test_exactly_one_raw_rename_wins() {
    let bed = TestBed::new();
    publish(&bed, "T1");

    let workers = 8;
    let barrier = Arc::new(Barrier::new(workers));
    let wins = Arc::new(AtomicUsize::new(0));
    let losses = Arc::new(AtomicUsize::new(0));

    let handles: Vec<_> = (1..=workers)
        .map(|i| {
            let barrier = Arc::clone(&barrier);
            let wins = Arc::clone(&wins);
            let losses = Arc::clone(&losses);
            let layout = bed.layout.clone();
            thread::spawn(move || {
                let worker = WorkerId::new(i as u8, 10).unwrap();
                let source = layout.entry_path(&layout.open_dir(), &TaskId::new("T1"));
                let dest = layout.entry_path(&layout.worker_dir(worker), &TaskId::new("T1"));
                barrier.wait();
                match fs::rename(&source, &dest) {
                    Ok(()) => {
                        wins.fetch_add(1, Ordering::SeqCst);
                    }
                    Err(err) => {
                        // Losing the race must surface as NotFound, nothing else.
                        assert_eq!(err.kind(), std::io::ErrorKind::NotFound);
                        losses.fetch_add(1, Ordering::SeqCst);
                    }
                }
            })
        })
        .collect();

    for handle in handles {
        handle.join().unwrap();
    }

    assert_eq!(wins.load(Ordering::SeqCst), 1);
    assert_eq!(losses.load(Ordering::SeqCst), workers - 1);

    // The envelope lives in exactly one private directory.
    let mut found = 0;
    for worker in bed.layout.worker_ids(10) {
        found += bed
            .layout
            .list_entries(&bed.layout.worker_dir(worker))
            .unwrap()
            .len();
    }
    assert_eq!(found, 1);
    assert!(bed.layout.list_entries(&bed.layout.open_dir()).unwrap().is_empty());
}

#[test]
fn test_competing_workers_split_the_queue() {
    let bed = TestBed::new();
    for i in 0..20 {
        publish(&bed, &format!("T{:02}", i));
    }

    let claims = Arc::new(AtomicUsize::new(0));
    let handles: Vec<_> = (1..=4)
        .map(|i| {
            let layout = bed.layout.clone();
            let claims = Arc::clone(&claims);
            thread::spawn(move || {
                let w = foreman::mailbox::Worker::new(
                    WorkerId::new(i, 10).unwrap(),
                    layout,
                    Box::new(ScriptedExecutor::completing()),
                );
                loop {
                    match w.try_claim().unwrap() {
                        ClaimResult::Claimed(path) => {
                            w.process_claim(&path).unwrap();
                            claims.fetch_add(1, Ordering::SeqCst);
                        }
                        ClaimResult::AllRacesLost => continue,
                        ClaimResult::NothingOpen => break,
                    }
                }
            })
        })
        .collect();

    for handle in handles {
        handle.join().unwrap();
    }

    // Every task claimed exactly once and resolved exactly once.
    assert_eq!(claims.load(Ordering::SeqCst), 20);
    assert_eq!(
        bed.layout.list_entries(&bed.layout.finished_dir()).unwrap().len(),
        20
    );
    assert!(bed.layout.list_entries(&bed.layout.open_dir()).unwrap().is_empty());
    for worker in bed.layout.worker_ids(10) {
        assert!(bed
            .layout
            .list_entries(&bed.layout.worker_dir(worker))
            .unwrap()
            .is_empty());
    }
}

#[test]
fn test_loser_moves_on_to_other_tasks() {
    let bed = TestBed::new();
    publish(&bed, "T1");
    publish(&bed, "T2");

    let w1 = bed.worker(1, ScriptedExecutor::completing());
    let w2 = bed.worker(2, ScriptedExecutor::completing());

    // Both workers claim; they must end up with different tasks.
    let ClaimResult::Claimed(p1) = w1.try_claim().unwrap() else {
        panic!("w1 claim failed");
    };
    let ClaimResult::Claimed(p2) = w2.try_claim().unwrap() else {
        panic!("w2 claim failed");
    };
    assert_ne!(
        p1.file_name().unwrap(),
        p2.file_name().unwrap(),
        "workers claimed the same task"
    );

    let (id1, outcome1) = w1.process_claim(&p1).unwrap();
    let (id2, _) = w2.process_claim(&p2).unwrap();
    assert_ne!(id1, id2);
    assert!(matches!(outcome1, Outcome::Completed(_)));
}
