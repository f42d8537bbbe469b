//! Agent registry tests: claim lifecycle and disconnection-triggered
//! requeue of orphaned jobs.


use std::time::Duration;

use hive_ci::scheduler::{BuildAgentRegistry, BuildJob, BuildJobQueue};
use hive_ci::substrate::{LocalCluster, LocalSubstrate};
use test_harness::{assert_eventually, payload};

struct Fixture {
    cluster: LocalCluster,
    core: LocalSubstrate,
    queue: BuildJobQueue<LocalSubstrate>,
    registry: BuildAgentRegistry<LocalSubstrate>,
}

fn fixture() -> Fixture {
    let cluster = LocalCluster::new();
    let core = cluster.member("core-1");
    core.connect();
    let queue = BuildJobQueue::new(&core, "build-jobs");
    let registry = BuildAgentRegistry::new(&core, "build-agents", "processing-jobs", queue.clone());
    Fixture {
        cluster,
        core,
        queue,
        registry,
    }
}

#[tokio::test]
async fn claim_records_ownership_and_complete_clears_it() {
    let f = fixture();
    f.registry.register("agent-1", "10.0.0.2:5701").await.unwrap();

    let job = BuildJob::from_payload(payload(3));
    let job_id = job.id;
    f.registry.claim("agent-1", "10.0.0.2:5701", &job).await.unwrap();

    let handle = f.registry.agent("agent-1").await.unwrap().unwrap();
    assert_eq!(handle.current_job_id, Some(job_id));
    assert!(f.registry.processing_job(job_id).await.unwrap().is_some());

    f.registry.complete("agent-1", job_id).await.unwrap();
    let handle = f.registry.agent("agent-1").await.unwrap().unwrap();
    assert_eq!(handle.current_job_id, None);
    assert!(f.registry.processing_job(job_id).await.unwrap().is_none());
}

#[tokio::test]
async fn disconnect_requeues_orphaned_job_at_original_priority() {
    let f = fixture();
    f.registry
        .watch_disconnects(&f.core)
        .expect("core nodes support disconnection listeners");

    let agent = f.cluster.client("agent-1");
    agent.connect();
    f.registry.register("agent-1", "10.0.0.2:5701").await.unwrap();

    let job = BuildJob::from_payload(payload(7));
    let job_id = job.id;
    f.registry.claim("agent-1", "10.0.0.2:5701", &job).await.unwrap();
    assert!(f.queue.is_empty().await.unwrap());

    // crash: the client drops off the cluster before reporting a result
    agent.disconnect();

    let registry = f.registry.clone();
    assert_eventually(
        Duration::from_secs(2),
        move || {
            let registry = registry.clone();
            async move { registry.agent("agent-1").await.unwrap().is_none() }
        },
        "agent handle removed after disconnect",
    )
    .await;

    let requeued = f.queue.dequeue().await.unwrap();
    assert_eq!(requeued.id, job_id);
    assert_eq!(requeued.priority, 7);
    assert!(f.registry.processing_job(job_id).await.unwrap().is_none());
}

#[tokio::test]
async fn disconnect_of_idle_agent_requeues_nothing() {
    let f = fixture();
    f.registry.register("agent-1", "10.0.0.2:5701").await.unwrap();

    f.registry.handle_disconnect("agent-1").await.unwrap();

    assert!(f.registry.agent("agent-1").await.unwrap().is_none());
    assert!(f.queue.is_empty().await.unwrap());
}

#[tokio::test]
async fn disconnect_after_completion_does_not_requeue() {
    let f = fixture();
    f.registry.register("agent-1", "10.0.0.2:5701").await.unwrap();

    let job = BuildJob::from_payload(payload(2));
    let job_id = job.id;
    f.registry.claim("agent-1", "10.0.0.2:5701", &job).await.unwrap();
    f.registry.complete("agent-1", job_id).await.unwrap();

    f.registry.handle_disconnect("agent-1").await.unwrap();
    assert!(f.queue.is_empty().await.unwrap());
}

#[tokio::test]
async fn disconnect_for_unknown_agent_is_harmless() {
    let f = fixture();
    f.registry.handle_disconnect("ghost").await.unwrap();
    assert!(f.queue.is_empty().await.unwrap());
}

#[tokio::test]
async fn claim_is_compute_and_replace_not_blind_overwrite() {
    let f = fixture();
    f.registry.register("agent-1", "10.0.0.2:5701").await.unwrap();
    let before = f.registry.agent("agent-1").await.unwrap().unwrap();

    let job = BuildJob::from_payload(payload(1));
    f.registry.claim("agent-1", "10.0.0.2:5701", &job).await.unwrap();

    let after = f.registry.agent("agent-1").await.unwrap().unwrap();
    assert_eq!(after.address, before.address);
    assert!(after.last_seen >= before.last_seen);
}
