//! Build log aggregator tests: append order, snapshot semantics, and the
//! mandatory remove after result consumption.

use uuid::Uuid;

use hive_ci::logs::BuildLogAggregator;
use hive_ci::substrate::{LocalCluster, LocalSubstrate};

fn aggregator() -> BuildLogAggregator<LocalSubstrate> {
    let cluster = LocalCluster::new();
    let node = cluster.member("core-1");
    node.connect();
    BuildLogAggregator::new(&node, "build-logs")
}

#[tokio::test]
async fn append_preserves_call_order() {
    let logs = aggregator();
    let build_id = Uuid::new_v4();

    for i in 0..50 {
        logs.append(build_id, format!("line {i}")).await.unwrap();
    }

    let entries = logs.get(build_id).await.unwrap().unwrap();
    assert_eq!(entries.len(), 50);
    for (i, entry) in entries.iter().enumerate() {
        assert_eq!(entry.message, format!("line {i}"));
    }
}

#[tokio::test]
async fn unknown_build_id_is_absent_not_empty() {
    let logs = aggregator();
    assert!(logs.get(Uuid::new_v4()).await.unwrap().is_none());
}

#[tokio::test]
async fn remove_releases_the_entry() {
    let logs = aggregator();
    let build_id = Uuid::new_v4();

    logs.append(build_id, "only line").await.unwrap();
    assert!(logs.get(build_id).await.unwrap().is_some());

    let removed = logs.remove(build_id).await.unwrap().unwrap();
    assert_eq!(removed.len(), 1);
    assert!(logs.get(build_id).await.unwrap().is_none());
}

#[tokio::test]
async fn map_shrinks_to_empty_after_full_consumption() {
    let logs = aggregator();
    let builds: Vec<Uuid> = (0..5).map(|_| Uuid::new_v4()).collect();

    for &build_id in &builds {
        logs.append(build_id, "a").await.unwrap();
        logs.append(build_id, "b").await.unwrap();
    }
    assert_eq!(logs.len().await.unwrap(), 5);

    for &build_id in &builds {
        logs.remove(build_id).await.unwrap();
    }
    assert!(logs.is_empty().await.unwrap());
}

#[tokio::test]
async fn concurrent_appends_lose_no_lines() {
    let logs = aggregator();
    let build_id = Uuid::new_v4();

    let mut writers = Vec::new();
    for w in 0..8 {
        let logs = logs.clone();
        writers.push(tokio::spawn(async move {
            for i in 0..25 {
                logs.append(build_id, format!("w{w} l{i}")).await.unwrap();
            }
        }));
    }
    for writer in writers {
        writer.await.unwrap();
    }

    let entries = logs.get(build_id).await.unwrap().unwrap();
    assert_eq!(entries.len(), 8 * 25);
}
