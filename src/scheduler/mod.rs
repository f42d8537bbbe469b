//! Build job scheduling: the job model, the cluster-wide priority queue,
//! and the agent registry that tracks which agent owns which job.

pub mod job;
pub mod queue;
pub mod registry;

pub use job::{BuildJob, BuildJobPayload, RepositoryInfo};
pub use queue::BuildJobQueue;
pub use registry::{BuildAgentHandle, BuildAgentRegistry};
