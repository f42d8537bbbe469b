use crate::error::Result;
use crate::scheduler::job::BuildJob;
use crate::substrate::{DistributedQueue, Substrate};

/// The cluster-wide backlog of pending build jobs, priority-ordered
/// (priority descending, enqueue timestamp ascending).
///
/// `dequeue` is the sole ownership-transfer point: a successful dequeue is
/// the only action that removes a job from the queue, and the caller must
/// immediately register itself as the owner in the agent registry. A crash
/// between the two leaves the job in limbo until the disconnection listener
/// reclaims it; that is the documented recovery path.
#[derive(Clone)]
pub struct BuildJobQueue<S: Substrate> {
    inner: S::PriorityQueue<BuildJob>,
}

impl<S: Substrate> BuildJobQueue<S> {
    pub fn new(substrate: &S, name: &str) -> Self {
        Self {
            inner: substrate.priority_queue(name),
        }
    }

    /// Pure insert; never removes or reorders existing entries.
    pub async fn enqueue(&self, job: BuildJob) -> Result<()> {
        tracing::info!(
            job_id = %job.id,
            exercise_id = job.exercise_id,
            priority = job.priority,
            "Build job enqueued"
        );
        self.inner.offer(job).await
    }

    /// Block until a job is available and remove it. This is the only
    /// intentional blocking point for agents.
    pub async fn dequeue(&self) -> Result<BuildJob> {
        let job = self.inner.take().await?;
        tracing::debug!(job_id = %job.id, "Build job dequeued");
        Ok(job)
    }

    /// Non-blocking variant, used when draining or observing.
    pub async fn try_dequeue(&self) -> Result<Option<BuildJob>> {
        self.inner.poll().await
    }

    pub async fn len(&self) -> Result<usize> {
        self.inner.len().await
    }

    pub async fn is_empty(&self) -> Result<bool> {
        self.inner.is_empty().await
    }
}
