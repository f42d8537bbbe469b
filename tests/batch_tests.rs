//! Batch coordinator tests: bounded concurrency, failure collection, and
//! the timeout escalation path. Timing-sensitive tests run on the paused
//! tokio clock.

use std::time::Duration;

use hive_ci::batch::{
    BatchConfig, BatchCoordinator, BatchFailure, ResourceCategory,
};
use hive_ci::error::HiveError;

fn config(concurrency: usize) -> BatchConfig {
    BatchConfig {
        batch_size: 20,
        max_concurrency: concurrency,
        overall_timeout: Duration::from_secs(3600),
        grace_period: Duration::from_secs(5),
        estimated_seconds_per_unit: 1,
        units_per_entry: 1,
    }
}

#[tokio::test(start_paused = true)]
async fn hundred_units_with_pool_of_ten_take_ten_time_units() {
    let coordinator = BatchCoordinator::new(config(10));
    let started = tokio::time::Instant::now();

    let report = coordinator
        .run((0..100u32).collect(), |_item| async {
            tokio::time::sleep(Duration::from_secs(1)).await;
            Ok(())
        })
        .await
        .unwrap();

    let elapsed = started.elapsed();
    assert_eq!(report.total, 100);
    assert_eq!(report.completed, 100);
    assert!(report.failures.is_empty());
    assert!(
        elapsed >= Duration::from_secs(10) && elapsed < Duration::from_secs(12),
        "expected about 10 time units, took {elapsed:?}"
    );
}

#[tokio::test(start_paused = true)]
async fn failing_units_are_collected_without_aborting_the_batch() {
    let coordinator = BatchCoordinator::new(config(10));

    let report = coordinator
        .run((0..100u32).collect(), |item| async move {
            tokio::time::sleep(Duration::from_secs(1)).await;
            if item % 20 == 0 {
                // 0, 20, 40, 60, 80
                Err(BatchFailure {
                    category: ResourceCategory::Student,
                    item: format!("repo-{item}"),
                    message: "clone failed".into(),
                })
            } else {
                Ok(())
            }
        })
        .await
        .unwrap();

    assert_eq!(report.completed, 100);
    assert_eq!(report.failures.len(), 5);
    let by_category = report.failures_by_category();
    assert_eq!(by_category[&ResourceCategory::Student].len(), 5);
}

#[tokio::test(start_paused = true)]
async fn failures_partition_by_category() {
    let coordinator = BatchCoordinator::new(config(4));

    let items = vec![
        ("template-ex1", ResourceCategory::Template),
        ("solution-ex1", ResourceCategory::Solution),
        ("student-1", ResourceCategory::Student),
        ("student-2", ResourceCategory::Student),
    ];
    let report = coordinator
        .run(items, |(name, category)| async move {
            Err(BatchFailure {
                category,
                item: name.to_string(),
                message: "migration failed".into(),
            })
        })
        .await
        .unwrap();

    let by_category = report.failures_by_category();
    assert_eq!(by_category[&ResourceCategory::Template].len(), 1);
    assert_eq!(by_category[&ResourceCategory::Solution].len(), 1);
    assert_eq!(by_category[&ResourceCategory::Student].len(), 2);
}

#[tokio::test(start_paused = true)]
async fn concurrency_never_exceeds_the_cap() {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    let coordinator = BatchCoordinator::new(config(3));
    let in_flight = Arc::new(AtomicUsize::new(0));
    let peak = Arc::new(AtomicUsize::new(0));

    let report = coordinator
        .run((0..30u32).collect(), {
            let in_flight = in_flight.clone();
            let peak = peak.clone();
            move |_item| {
                let in_flight = in_flight.clone();
                let peak = peak.clone();
                async move {
                    let now = in_flight.fetch_add(1, Ordering::SeqCst) + 1;
                    peak.fetch_max(now, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(100)).await;
                    in_flight.fetch_sub(1, Ordering::SeqCst);
                    Ok(())
                }
            }
        })
        .await
        .unwrap();

    assert_eq!(report.completed, 30);
    assert!(peak.load(Ordering::SeqCst) <= 3);
}

#[tokio::test(start_paused = true)]
async fn deadline_escalates_through_forced_cancellation() {
    let coordinator = BatchCoordinator::new(BatchConfig {
        batch_size: 10,
        max_concurrency: 2,
        overall_timeout: Duration::from_secs(2),
        grace_period: Duration::from_secs(1),
        estimated_seconds_per_unit: 1,
        units_per_entry: 1,
    });

    let result = coordinator
        .run((0..10u32).collect(), |_item| async {
            // far past the deadline
            tokio::time::sleep(Duration::from_secs(10_000)).await;
            Ok(())
        })
        .await;

    assert!(matches!(result, Err(HiveError::BatchTimeout(_))));
}

#[tokio::test]
async fn empty_batch_terminates_immediately() {
    let coordinator = BatchCoordinator::new(config(4));
    let report = coordinator
        .run(Vec::<u32>::new(), |_item: u32| async { Ok(()) })
        .await
        .unwrap();
    assert_eq!(report.total, 0);
    assert_eq!(report.completed, 0);
    assert!(report.failures.is_empty());
}
