#![cfg(unix)]

mod common;

use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use common::{TestHome, fast_policy, granted_relocator, relocator};
use safe_relocate::{
    BatchCoordinator, BatchState, BookmarkResolver, GrantKind, MemoryBookmarkStore, MoveOutcome,
    PathBookmarkResolver, ProposedMove, RelocationFailure, Relocator, ResolvedBookmark,
    ValidationFailure,
};
use tokio_util::sync::CancellationToken;

#[tokio::test]
async fn results_follow_submission_order() {
    let home = TestHome::new(&["Downloads"]);
    let first = home.write("Downloads/one.txt", "1");
    let missing = home.join("Downloads/missing.txt");
    let third = home.write("Downloads/three.txt", "3");
    let coordinator = BatchCoordinator::new(granted_relocator(&home, &["Downloads"]));

    let report = coordinator
        .move_all(vec![
            ProposedMove::new(&first, "Sorted"),
            ProposedMove::new(&missing, "Sorted"),
            ProposedMove::new(&third, "Sorted"),
        ])
        .await;

    let sources: Vec<_> = report.results.iter().map(|r| r.source_path.clone()).collect();
    assert_eq!(sources, vec![first, missing, third]);
    assert_eq!(report.results[0].outcome, MoveOutcome::Succeeded);
    assert_eq!(
        report.results[1].outcome,
        MoveOutcome::FailedValidation(ValidationFailure::NotFound.to_string())
    );
    assert_eq!(report.results[2].outcome, MoveOutcome::Succeeded);
    assert_eq!(report.succeeded(), 2);
    assert_eq!(report.failed(), 1);
    assert_eq!(report.state, BatchState::Completed);
    assert!(!report.cancelled);
    assert!(report.truncation.is_none());
}

#[tokio::test]
async fn oversized_batch_is_truncated_to_the_cap() {
    let home = TestHome::new(&["Downloads"]);
    let coordinator = BatchCoordinator::new(relocator(fast_policy(&home.path)));
    let proposals: Vec<_> = (0..2500)
        .map(|i| ProposedMove::new(home.join(format!("Downloads/{i}.txt")), "Sorted"))
        .collect();

    let batch = coordinator.begin(proposals);
    assert_eq!(batch.state(), BatchState::Idle);
    assert_eq!(batch.len(), 1000);
    let notice = batch.truncation().expect("truncation notice");
    assert_eq!(notice.submitted, 2500);
    assert_eq!(notice.accepted, 1000);
    assert_eq!(notice.dropped, 1500);

    let report = batch.run(&CancellationToken::new()).await;
    assert_eq!(report.results.len(), 1000);
    assert_eq!(report.truncation, Some(notice));
    assert_eq!(
        report.results[999].source_path,
        home.join("Downloads/999.txt")
    );
}

#[tokio::test]
async fn moves_are_spaced_by_the_operation_delay() {
    let home = TestHome::new(&["Downloads"]);
    let mut policy = fast_policy(&home.path);
    policy.batch.operation_delay_ms = 40;
    let coordinator = BatchCoordinator::new(common::relocator(policy));
    let proposals: Vec<_> = (0..3)
        .map(|i| ProposedMove::new(home.join(format!("Downloads/{i}.txt")), "Sorted"))
        .collect();

    let started = Instant::now();
    let report = coordinator.move_all(proposals).await;

    assert_eq!(report.results.len(), 3);
    // Two pauses: none after the last move.
    assert!(started.elapsed() >= Duration::from_millis(80));
}

#[tokio::test]
async fn cancelled_before_start_processes_nothing() {
    let home = TestHome::new(&["Downloads"]);
    let source = home.write("Downloads/a.txt", "x");
    let coordinator = BatchCoordinator::new(granted_relocator(&home, &["Downloads"]));
    let cancel = CancellationToken::new();
    cancel.cancel();

    let report = coordinator
        .begin(vec![ProposedMove::new(&source, "Sorted")])
        .run(&cancel)
        .await;

    assert!(report.cancelled);
    assert!(report.results.is_empty());
    assert_eq!(report.not_processed, 1);
    assert!(source.exists());
}

#[tokio::test]
async fn cancellation_interrupts_the_pause_between_moves() {
    let home = TestHome::new(&["Downloads"]);
    let sources: Vec<_> = (0..3)
        .map(|i| home.write(format!("Downloads/{i}.txt"), "x"))
        .collect();
    let mut policy = fast_policy(&home.path);
    policy.batch.operation_delay_ms = 30_000;
    let relocator = common::relocator(policy);
    relocator
        .broker()
        .grant_folder(
            "Downloads",
            &home.join("Downloads"),
            safe_relocate::GrantKind::WellKnown,
        )
        .expect("grant");
    let coordinator = BatchCoordinator::new(relocator);

    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(100)).await;
        trigger.cancel();
    });

    let started = Instant::now();
    let report = coordinator
        .begin(
            sources
                .iter()
                .map(|source| ProposedMove::new(source, "Sorted"))
                .collect(),
        )
        .run(&cancel)
        .await;

    assert!(started.elapsed() < Duration::from_secs(10));
    assert!(report.cancelled);
    assert_eq!(report.results.len(), 1);
    assert!(report.results[0].is_success());
    assert_eq!(report.not_processed, 2);
    assert!(sources[1].exists());
    assert!(sources[2].exists());
}

#[tokio::test]
async fn empty_batch_completes_immediately() {
    let home = TestHome::new(&[]);
    let coordinator = BatchCoordinator::new(relocator(fast_policy(&home.path)));

    let report = coordinator.move_all(Vec::new()).await;
    assert!(report.results.is_empty());
    assert_eq!(report.state, BatchState::Completed);
    assert_eq!(report.not_processed, 0);
}

/// Path resolver whose scoped access takes `delay` to start, counting pipelines in flight.
#[derive(Default)]
struct SlowResolver {
    delay: Duration,
    in_flight: AtomicUsize,
    peak: AtomicUsize,
}

impl BookmarkResolver for SlowResolver {
    fn create(&self, folder: &Path) -> safe_relocate::Result<Vec<u8>> {
        PathBookmarkResolver.create(folder)
    }

    fn resolve(&self, opaque_data: &[u8]) -> safe_relocate::Result<ResolvedBookmark> {
        PathBookmarkResolver.resolve(opaque_data)
    }

    fn start_access(&self, _folder: &Path) -> bool {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        std::thread::sleep(self.delay);
        true
    }

    fn stop_access(&self, _folder: &Path) {
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
    }
}

#[tokio::test]
async fn overrunning_moves_stay_sequential_and_report_what_happened() {
    let home = TestHome::new(&["Downloads", "Desktop"]);
    let moved = home.write("Downloads/a.txt", "a");
    let blocked = home.write("Desktop/b.txt", "b");
    let existing = home.write("Sorted/b.txt", "keep");

    let mut policy = fast_policy(&home.path);
    policy.io.timeout_ms = 50;
    let resolver = Arc::new(SlowResolver {
        delay: Duration::from_millis(300),
        ..SlowResolver::default()
    });
    let relocator = Relocator::new(
        policy,
        Arc::new(MemoryBookmarkStore::new()),
        Arc::clone(&resolver) as Arc<dyn BookmarkResolver>,
    )
    .expect("relocator");
    for key in ["Downloads", "Desktop"] {
        relocator
            .broker()
            .grant_folder(key, &home.join(key), GrantKind::WellKnown)
            .expect("grant");
    }
    let coordinator = BatchCoordinator::new(Arc::new(relocator));

    let report = coordinator
        .move_all(vec![
            ProposedMove::new(&moved, "Sorted"),
            ProposedMove::new(&blocked, "Sorted"),
        ])
        .await;

    assert_eq!(resolver.peak.load(Ordering::SeqCst), 1);
    assert_eq!(resolver.in_flight.load(Ordering::SeqCst), 0);

    // The first move finished late; the file is at its destination, so it is a success.
    assert!(!moved.exists());
    assert_eq!(
        std::fs::read_to_string(home.join("Sorted/a.txt")).expect("read"),
        "a"
    );
    assert_eq!(report.results[0].outcome, MoveOutcome::Succeeded);

    // The second overran and then failed; nothing moved, and the overrun is what is reported.
    assert!(blocked.exists());
    assert_eq!(std::fs::read_to_string(&existing).expect("read"), "keep");
    assert_eq!(
        report.results[1].outcome,
        MoveOutcome::FailedIo(RelocationFailure::OperationFailed("timeout".to_string()))
    );
}
