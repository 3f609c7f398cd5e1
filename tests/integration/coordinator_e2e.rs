//! Full coordinator/worker runs against a real mailbox tree.

use std::time::Duration;
use tokio_util::sync::CancellationToken;

use foreman::coordination::{resolve_help, write_override_completion, Phase};
use foreman::core::TaskId;
use foreman::mailbox::{Envelope, Outcome};

use crate::fixtures::{manifest, ScriptedExecutor, TestBed};

/// Manifest: A (no deps), B (no deps), C (deps: A, B). A single worker
/// drains the whole graph and the coordinator terminates on its own.
#[tokio::test(flavor = "multi_thread")]
async fn test_diamond_run_to_completion() {
    let bed = TestBed::new();
    let m = manifest(&["A", "B", "C"], &[("A", "C"), ("B", "C")]);
    let mut coordinator = bed.coordinator(&m);

    let worker = bed.worker(1, ScriptedExecutor::completing());
    let worker_cancel = CancellationToken::new();
    let worker_handle = {
        let cancel = worker_cancel.clone();
        tokio::spawn(async move { worker.run(cancel).await })
    };

    let snapshot = coordinator.run(CancellationToken::new()).await.unwrap();
    worker_cancel.cancel();
    worker_handle.await.unwrap().unwrap();

    assert_eq!(coordinator.phase(), Phase::Terminated);
    assert_eq!(snapshot.completed, 3);
    assert_eq!(snapshot.failed, 0);
    assert!((snapshot.completion_pct - 100.0).abs() < f64::EPSILON);

    // All three envelopes ended in finished-tasks, none anywhere else.
    assert_eq!(
        bed.layout.list_entries(&bed.layout.finished_dir()).unwrap().len(),
        3
    );
    assert!(bed.layout.list_entries(&bed.layout.open_dir()).unwrap().is_empty());
    assert!(bed.layout.list_entries(&bed.layout.failed_dir()).unwrap().is_empty());

    // C saw both dependencies complete before publication.
    let c_path = bed
        .layout
        .entry_path(&bed.layout.finished_dir(), &TaskId::new("C"));
    let envelope = Envelope::read_from(&c_path).unwrap();
    assert_eq!(envelope.dependencies_completed.len(), 2);
}

/// Multiple workers drain a wider graph in parallel.
#[tokio::test(flavor = "multi_thread")]
async fn test_parallel_workers_drain_graph() {
    let bed = TestBed::new();
    let ids: Vec<String> = (0..12).map(|i| format!("T{:02}", i)).collect();
    let id_refs: Vec<&str> = ids.iter().map(|s| s.as_str()).collect();
    let m = manifest(&id_refs, &[]);
    let mut coordinator = bed.coordinator(&m);

    let cancel = CancellationToken::new();
    let mut worker_handles = Vec::new();
    for i in 1..=3 {
        let worker = bed.worker(i, ScriptedExecutor::completing());
        let worker_cancel = cancel.clone();
        worker_handles.push(tokio::spawn(async move { worker.run(worker_cancel).await }));
    }

    let snapshot = coordinator.run(CancellationToken::new()).await.unwrap();
    cancel.cancel();
    for handle in worker_handles {
        handle.await.unwrap().unwrap();
    }

    assert_eq!(snapshot.completed, 12);
    assert_eq!(
        bed.layout.list_entries(&bed.layout.finished_dir()).unwrap().len(),
        12
    );
}

/// A failing prerequisite permanently blocks its dependents; independent
/// chains still finish. The coordinator cannot drain on its own, so the
/// operator interrupts and then records an override.
#[tokio::test(flavor = "multi_thread")]
async fn test_failed_prerequisite_blocks_dependents() {
    let bed = TestBed::new();
    let m = manifest(&["A", "B", "C"], &[("A", "B")]);
    let mut coordinator = bed.coordinator(&m);

    let executor = ScriptedExecutor::completing()
        .with_outcome("A", Outcome::Failed("tests exploded".to_string()));
    let worker = bed.worker(1, executor);
    let worker_cancel = CancellationToken::new();
    let worker_handle = {
        let cancel = worker_cancel.clone();
        tokio::spawn(async move { worker.run(cancel).await })
    };

    // Give the run time to settle: A failed, C completed, B blocked.
    let run_cancel = CancellationToken::new();
    let stopper = {
        let cancel = run_cancel.clone();
        let layout = bed.layout.clone();
        tokio::spawn(async move {
            for _ in 0..500 {
                let failed = layout.list_entries(&layout.failed_dir()).unwrap().len();
                let finished = layout.list_entries(&layout.finished_dir()).unwrap().len();
                if failed == 1 && finished == 1 {
                    break;
                }
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
            // A couple more polls so the coordinator observes both.
            tokio::time::sleep(Duration::from_millis(50)).await;
            cancel.cancel();
        })
    };

    let snapshot = coordinator.run(run_cancel).await.unwrap();
    stopper.await.unwrap();
    worker_cancel.cancel();
    worker_handle.await.unwrap().unwrap();

    assert_eq!(snapshot.failed, 1);
    assert_eq!(snapshot.completed, 1);
    // B was never published.
    assert!(!bed
        .layout
        .entry_path(&bed.layout.finished_dir(), &TaskId::new("B"))
        .exists());
    let a_record = coordinator.record(&TaskId::new("A")).unwrap();
    assert_eq!(a_record.failure.as_deref(), Some("tests exploded"));

    // Operator override: skip A, restart the coordinator, and B drains.
    write_override_completion(&bed.layout, &TaskId::new("A"), "skipped after review").unwrap();

    let mut second = bed.coordinator(&m);
    let worker = bed.worker(2, ScriptedExecutor::completing());
    let worker_cancel = CancellationToken::new();
    let worker_handle = {
        let cancel = worker_cancel.clone();
        tokio::spawn(async move { worker.run(cancel).await })
    };

    let snapshot = second.run(CancellationToken::new()).await.unwrap();
    worker_cancel.cancel();
    worker_handle.await.unwrap().unwrap();

    assert_eq!(snapshot.completed, 3);
    assert_eq!(snapshot.failed, 0);
}

/// Help round-trip: worker asks for help, operator attaches guidance, a
/// worker with the guidance completes the task.
#[tokio::test(flavor = "multi_thread")]
async fn test_help_resolve_round_trip() {
    let bed = TestBed::new();
    let m = manifest(&["A"], &[]);
    let mut coordinator = bed.coordinator(&m);

    // First worker asks for help.
    let helper = bed.worker(
        1,
        ScriptedExecutor::completing()
            .with_outcome("A", Outcome::Help("which endpoint?".to_string())),
    );
    let helper_cancel = CancellationToken::new();
    let helper_handle = {
        let cancel = helper_cancel.clone();
        tokio::spawn(async move { helper.run(cancel).await })
    };

    // Coordinator loop runs in the background until we interrupt it.
    let run_cancel = CancellationToken::new();
    let coordinator_handle = {
        let cancel = run_cancel.clone();
        tokio::spawn(async move {
            let result = coordinator.run(cancel).await;
            (coordinator, result)
        })
    };

    // Wait for the help request to land, then stop the first worker.
    for _ in 0..500 {
        if !bed.layout.list_entries(&bed.layout.help_dir()).unwrap().is_empty() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    helper_cancel.cancel();
    helper_handle.await.unwrap().unwrap();

    // Operator republishes with guidance.
    let envelope = resolve_help(&bed.layout, &TaskId::new("A"), "use the v2 endpoint").unwrap();
    assert_eq!(envelope.retry_count, 1);

    // A second worker picks it up; the guidance is visible in the envelope.
    struct GuidanceChecker;
    impl foreman::mailbox::Executor for GuidanceChecker {
        fn execute(&self, envelope: &Envelope) -> Outcome {
            match envelope.guidance.as_deref() {
                Some(guidance) => Outcome::Completed(format!("followed: {}", guidance)),
                None => Outcome::Failed("guidance missing".to_string()),
            }
        }
    }
    let finisher = foreman::mailbox::Worker::new(
        foreman::mailbox::WorkerId::new(2, 10).unwrap(),
        bed.layout.clone(),
        Box::new(GuidanceChecker),
    )
    .with_poll_interval(Duration::from_millis(10));
    let finisher_cancel = CancellationToken::new();
    let finisher_handle = {
        let cancel = finisher_cancel.clone();
        tokio::spawn(async move { finisher.run(cancel).await })
    };

    // The coordinator drains once A completes.
    let (coordinator, result) = coordinator_handle.await.unwrap();
    let snapshot = result.unwrap();
    run_cancel.cancel();
    finisher_cancel.cancel();
    finisher_handle.await.unwrap().unwrap();

    assert_eq!(coordinator.phase(), Phase::Terminated);
    assert_eq!(snapshot.completed, 1);

    let finished = bed
        .layout
        .entry_path(&bed.layout.finished_dir(), &TaskId::new("A"));
    let envelope = Envelope::read_from(&finished).unwrap();
    assert_eq!(
        envelope.completion.unwrap().summary,
        "followed: use the v2 endpoint"
    );
    assert_eq!(envelope.guidance.as_deref(), Some("use the v2 endpoint"));
}

/// Interrupting the coordinator leaves in-flight claims exactly as-is.
#[tokio::test(flavor = "multi_thread")]
async fn test_interrupt_preserves_claims() {
    let bed = TestBed::new();
    let m = manifest(&["A", "B"], &[]);
    let mut coordinator = bed.coordinator(&m);

    // Worker claims A but never resolves it.
    struct Stall;
    impl foreman::mailbox::Executor for Stall {
        fn execute(&self, _envelope: &Envelope) -> Outcome {
            std::thread::sleep(Duration::from_secs(30));
            Outcome::Completed("too late".to_string())
        }
    }

    let cancel = CancellationToken::new();
    let run_cancel = cancel.clone();
    let layout = bed.layout.clone();
    let stopper = tokio::spawn(async move {
        // Wait until A or B is claimed, then interrupt.
        'outer: for _ in 0..500 {
            for worker in layout.worker_ids(10) {
                if !layout.list_entries(&layout.worker_dir(worker)).unwrap().is_empty() {
                    break 'outer;
                }
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        run_cancel.cancel();
    });

    let claimer = foreman::mailbox::Worker::new(
        foreman::mailbox::WorkerId::new(1, 10).unwrap(),
        bed.layout.clone(),
        Box::new(Stall),
    );
    // Claim synchronously so the stalled executor never runs; retry until
    // the coordinator has published something.
    let claim_handle = std::thread::spawn(move || loop {
        match claimer.try_claim() {
            Ok(foreman::mailbox::ClaimResult::Claimed(path)) => {
                return foreman::mailbox::ClaimResult::Claimed(path)
            }
            Ok(_) => std::thread::sleep(Duration::from_millis(10)),
            Err(err) => panic!("claim error: {}", err),
        }
    });

    coordinator.run(cancel).await.unwrap();
    stopper.await.unwrap();
    let claim = claim_handle.join().unwrap();

    assert_eq!(coordinator.phase(), Phase::Terminated);
    // The claim is still sitting in the worker directory, untouched.
    let foreman::mailbox::ClaimResult::Claimed(path) = claim else {
        panic!("worker never claimed");
    };
    assert!(path.exists());
}
