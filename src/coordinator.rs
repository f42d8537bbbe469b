//! Core node: owns submission intake, consumes build results, and reclaims
//! jobs from crashed agents.
//!
//! Everything is constructor-injected with an explicit lifecycle: a
//! [`CoreNode`] is created at process start against a substrate handle and
//! torn down at shutdown. There are no process-wide singletons.

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::config::NodeConfig;
use crate::error::Result;
use crate::logs::BuildLogAggregator;
use crate::results::BuildResultMessage;
use crate::scheduler::{BuildAgentRegistry, BuildJob, BuildJobPayload, BuildJobQueue};
use crate::substrate::{DistributedTopic, ListenerId, Substrate, TopicSubscription};

pub struct CoreNode<S: Substrate> {
    substrate: S,
    queue: BuildJobQueue<S>,
    registry: BuildAgentRegistry<S>,
    logs: BuildLogAggregator<S>,
    results_topic: S::Topic<BuildResultMessage>,
}

impl<S: Substrate> CoreNode<S> {
    pub fn new(substrate: S, config: &NodeConfig) -> Self {
        let queue = BuildJobQueue::new(&substrate, &config.job_queue_name);
        Self {
            registry: BuildAgentRegistry::new(
                &substrate,
                &config.agent_map_name,
                &config.processing_map_name,
                queue.clone(),
            ),
            logs: BuildLogAggregator::new(&substrate, &config.log_map_name),
            results_topic: substrate.topic(&config.results_topic_name),
            queue,
            substrate,
        }
    }

    /// Wire the registry to the substrate's client-disconnection events.
    /// Returns `None` where unsupported (this node is not a data member).
    pub fn watch_agent_disconnects(&self) -> Option<ListenerId> {
        self.registry.watch_disconnects(&self.substrate)
    }

    /// Submission intake: construct the immutable job and enqueue it.
    pub async fn submit(&self, payload: BuildJobPayload) -> Result<Uuid> {
        let job = BuildJob::from_payload(payload);
        let id = job.id;
        self.queue.enqueue(job).await?;
        Ok(id)
    }

    /// Consume build results until shutdown: clear ownership, attach and
    /// release the logs, and hand the result downstream (grading storage is
    /// an external collaborator).
    pub async fn run_results(
        &self,
        shutdown: CancellationToken,
        downstream: mpsc::Sender<BuildResultMessage>,
    ) -> Result<()> {
        let mut subscription = self.results_topic.subscribe()?;
        loop {
            let mut message = tokio::select! {
                _ = shutdown.cancelled() => {
                    tracing::info!("Core result loop shutting down");
                    return Ok(());
                }
                message = subscription.recv() => match message {
                    Some(message) => message,
                    None => {
                        tracing::info!("Results topic closed, core result loop exiting");
                        return Ok(());
                    }
                },
            };

            self.registry
                .complete(&message.agent_name, message.job_id)
                .await?;
            if let Some(entries) = self.logs.remove(message.job_id).await? {
                message.result.attach_logs(entries);
            }
            tracing::info!(
                agent = %message.agent_name,
                job_id = %message.job_id,
                successful = message.result.successful,
                "Build result consumed"
            );
            if downstream.send(message).await.is_err() {
                tracing::warn!("Result downstream closed, core result loop exiting");
                return Ok(());
            }
        }
    }

    pub fn queue(&self) -> &BuildJobQueue<S> {
        &self.queue
    }

    pub fn registry(&self) -> &BuildAgentRegistry<S> {
        &self.registry
    }

    pub fn logs(&self) -> &BuildLogAggregator<S> {
        &self.logs
    }
}
