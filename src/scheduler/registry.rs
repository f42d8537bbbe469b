use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::error::Result;
use crate::scheduler::job::BuildJob;
use crate::scheduler::queue::BuildJobQueue;
use crate::substrate::{DistributedMap, ListenerId, Substrate};

/// Capacity of the channel between the substrate's disconnection callback
/// and the async requeue task.
const DISCONNECT_CHANNEL_CAPACITY: usize = 64;

/// One build agent as seen by the core nodes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BuildAgentHandle {
    pub name: String,
    pub address: String,
    pub current_job_id: Option<Uuid>,
    pub last_seen: DateTime<Utc>,
}

impl BuildAgentHandle {
    fn idle(name: String, address: String) -> Self {
        Self {
            name,
            address,
            current_job_id: None,
            last_seen: Utc::now(),
        }
    }
}

/// Tracks which agent currently owns which job.
///
/// Backed by two substrate maps: agent name to [`BuildAgentHandle`], and job
/// id to the full [`BuildJob`] while it is being processed (so an orphaned
/// job can be requeued with its original priority). Liveness is inferred
/// entirely from the substrate's client-disconnection tracking; there is no
/// separate heartbeat timeout. At most one handle holds a given job id at
/// any time.
#[derive(Clone)]
pub struct BuildAgentRegistry<S: Substrate> {
    agents: S::Map<String, BuildAgentHandle>,
    processing: S::Map<Uuid, BuildJob>,
    queue: BuildJobQueue<S>,
}

impl<S: Substrate> BuildAgentRegistry<S> {
    pub fn new(substrate: &S, agents_map: &str, processing_map: &str, queue: BuildJobQueue<S>) -> Self {
        Self {
            agents: substrate.map(agents_map),
            processing: substrate.map(processing_map),
            queue,
        }
    }

    /// Record a newly connected agent with no current job.
    pub async fn register(&self, name: &str, address: &str) -> Result<()> {
        self.agents
            .put(
                name.to_string(),
                BuildAgentHandle::idle(name.to_string(), address.to_string()),
            )
            .await?;
        tracing::info!(agent = name, address, "Build agent registered");
        Ok(())
    }

    /// Record `agent` as the current owner of `job`, immediately after the
    /// agent dequeued it. Compute-and-replace, never a blind overwrite, so a
    /// concurrent last-seen update cannot be lost.
    pub async fn claim(&self, agent: &str, address: &str, job: &BuildJob) -> Result<()> {
        self.processing.put(job.id, job.clone()).await?;
        let job_id = job.id;
        let (name, addr) = (agent.to_string(), address.to_string());
        self.agents
            .compute(agent.to_string(), move |current| {
                let mut handle = current.unwrap_or_else(|| BuildAgentHandle::idle(name, addr));
                handle.current_job_id = Some(job_id);
                handle.last_seen = Utc::now();
                Some(handle)
            })
            .await?;
        tracing::info!(agent, job_id = %job.id, "Build job claimed");
        Ok(())
    }

    /// Clear ownership after the agent's result has been consumed.
    pub async fn complete(&self, agent: &str, job_id: Uuid) -> Result<()> {
        self.processing.remove(&job_id).await?;
        self.agents
            .compute(agent.to_string(), move |current| {
                current.map(|mut handle| {
                    if handle.current_job_id == Some(job_id) {
                        handle.current_job_id = None;
                    }
                    handle.last_seen = Utc::now();
                    handle
                })
            })
            .await?;
        tracing::debug!(agent, job_id = %job_id, "Build job ownership cleared");
        Ok(())
    }

    /// Remove a gracefully departing or crashed agent. If it owned a job,
    /// push that job back onto the queue at its original priority. This is
    /// the only self-healing mechanism for agent crashes.
    pub async fn handle_disconnect(&self, agent: &str) -> Result<()> {
        let Some(handle) = self.agents.remove(&agent.to_string()).await? else {
            tracing::debug!(agent, "Disconnect for unknown agent, nothing to reclaim");
            return Ok(());
        };
        if let Some(job_id) = handle.current_job_id {
            if let Some(job) = self.processing.remove(&job_id).await? {
                tracing::warn!(
                    agent,
                    job_id = %job_id,
                    priority = job.priority,
                    "Agent disconnected mid-job, requeueing orphaned job"
                );
                self.queue.enqueue(job).await?;
            } else {
                // The result was already consumed; the disconnect raced
                // with normal completion.
                tracing::debug!(agent, job_id = %job_id, "Orphaned job already completed");
            }
        } else {
            tracing::info!(agent, "Idle agent disconnected");
        }
        Ok(())
    }

    pub async fn agent(&self, name: &str) -> Result<Option<BuildAgentHandle>> {
        self.agents.get(&name.to_string()).await
    }

    pub async fn agent_names(&self) -> Result<Vec<String>> {
        self.agents.keys().await
    }

    pub async fn processing_job(&self, job_id: Uuid) -> Result<Option<BuildJob>> {
        self.processing.get(&job_id).await
    }

    /// Subscribe to the substrate's client-disconnection events and drain
    /// them through a bounded channel into [`handle_disconnect`]. Returns
    /// `None` on nodes where disconnection tracking is unsupported (agents).
    ///
    /// [`handle_disconnect`]: BuildAgentRegistry::handle_disconnect
    pub fn watch_disconnects(&self, substrate: &S) -> Option<ListenerId> {
        let (tx, mut rx) = mpsc::channel::<String>(DISCONNECT_CHANNEL_CAPACITY);
        let id = substrate.add_client_disconnection_listener(Box::new(move |agent| {
            if let Err(e) = tx.try_send(agent.to_string()) {
                tracing::error!(agent, error = %e, "Dropping disconnection event, channel full");
            }
        }))?;

        let registry = self.clone();
        tokio::spawn(async move {
            while let Some(agent) = rx.recv().await {
                if let Err(e) = registry.handle_disconnect(&agent).await {
                    tracing::error!(agent, error = %e, "Failed to reclaim jobs for disconnected agent");
                }
            }
        });
        Some(id)
    }
}
