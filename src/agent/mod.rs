//! Build agent: pulls jobs from the cluster queue, runs them in containers,
//! and reports results back to the core.
//!
//! The agent's only intentional blocking point is the queue dequeue. A
//! successful dequeue is the ownership transfer; the agent registers the
//! claim immediately afterwards. There is no mid-job cancellation: the
//! lifecycle ends either in normal completion or, if this agent drops off
//! the cluster, in a disconnection-triggered requeue on the core side.

pub mod executor;

pub use executor::{BuildExecutor, DockerExecutor, ExecutionOutput};

use chrono::Utc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::config::NodeConfig;
use crate::error::Result;
use crate::logs::BuildLogAggregator;
use crate::results::parser::parse_test_report;
use crate::results::{BuildResult, BuildResultMessage, TestReport};
use crate::scheduler::{BuildAgentRegistry, BuildJob, BuildJobQueue};
use crate::substrate::{DistributedTopic, Substrate};

const LOG_CHANNEL_CAPACITY: usize = 256;

pub struct BuildAgent<S: Substrate, E: BuildExecutor> {
    name: String,
    address: String,
    queue: BuildJobQueue<S>,
    registry: BuildAgentRegistry<S>,
    logs: BuildLogAggregator<S>,
    results_topic: S::Topic<BuildResultMessage>,
    executor: E,
}

impl<S: Substrate, E: BuildExecutor> BuildAgent<S, E> {
    pub fn new(substrate: &S, config: &NodeConfig, executor: E) -> Self {
        let queue = BuildJobQueue::new(substrate, &config.job_queue_name);
        Self {
            name: config.node_name.clone(),
            address: config.node_address.clone(),
            registry: BuildAgentRegistry::new(
                substrate,
                &config.agent_map_name,
                &config.processing_map_name,
                queue.clone(),
            ),
            queue,
            logs: BuildLogAggregator::new(substrate, &config.log_map_name),
            results_topic: substrate.topic(&config.results_topic_name),
            executor,
        }
    }

    /// Main agent loop: register, then dequeue-claim-execute-publish until
    /// the shutdown token fires between jobs.
    pub async fn run(&self, shutdown: CancellationToken) -> Result<()> {
        self.registry.register(&self.name, &self.address).await?;
        tracing::info!(agent = %self.name, "Build agent started");

        loop {
            let job = tokio::select! {
                _ = shutdown.cancelled() => {
                    tracing::info!(agent = %self.name, "Build agent shutting down");
                    return Ok(());
                }
                job = self.queue.dequeue() => job?,
            };

            // Dequeue and claim are one logical transaction; a crash in
            // between leaves the job to the disconnection listener.
            self.registry.claim(&self.name, &self.address, &job).await?;

            if let Err(e) = self.process(job).await {
                tracing::error!(agent = %self.name, error = %e, "Build job processing failed");
            }
        }
    }

    async fn process(&self, job: BuildJob) -> Result<()> {
        let (log_tx, log_rx) = mpsc::channel::<String>(LOG_CHANNEL_CAPACITY);
        let forwarder = tokio::spawn(Self::forward_logs(self.logs.clone(), job.id, log_rx));

        let output = self.executor.execute(&job, log_tx).await;
        // The executor's sender is gone, so the forwarder drains and exits.
        let _ = forwarder.await;

        let result = match output {
            Ok(output) => {
                let mut report = TestReport::default();
                for raw in &output.test_reports {
                    report.merge(parse_test_report(raw));
                }
                let successful = output.successful && report.failed.is_empty();
                BuildResult::new(
                    &job.branch,
                    &job.assignment_repository.commit_hash,
                    &job.test_repository.commit_hash,
                    successful,
                    Utc::now(),
                    vec![report],
                    Vec::new(),
                )
            }
            Err(e) => {
                // Execution itself failed; still publish so the core can
                // clear ownership and release the logs.
                tracing::error!(job_id = %job.id, error = %e, "Build execution failed");
                self.logs
                    .append(job.id, format!("Build execution failed: {e}"))
                    .await?;
                BuildResult::new(
                    &job.branch,
                    &job.assignment_repository.commit_hash,
                    &job.test_repository.commit_hash,
                    false,
                    Utc::now(),
                    vec![TestReport::default()],
                    Vec::new(),
                )
            }
        };

        self.results_topic
            .publish(BuildResultMessage {
                agent_name: self.name.clone(),
                job_id: job.id,
                result,
            })
            .await?;
        tracing::info!(agent = %self.name, job_id = %job.id, "Build result published");
        Ok(())
    }

    async fn forward_logs(
        logs: BuildLogAggregator<impl Substrate>,
        build_id: Uuid,
        mut log_rx: mpsc::Receiver<String>,
    ) {
        while let Some(line) = log_rx.recv().await {
            if let Err(e) = logs.append(build_id, line).await {
                tracing::warn!(build_id = %build_id, error = %e, "Failed to append build log line");
            }
        }
    }
}
