use std::cmp::Ordering;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Repository coordinates for one side of a build (assignment, tests,
/// solution, or an auxiliary repository).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepositoryInfo {
    pub url: String,
    pub commit_hash: String,
}

/// Submission intake payload, as handed to the core node by the surrounding
/// platform. Everything needed to construct one [`BuildJob`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BuildJobPayload {
    pub exercise_id: u64,
    pub participation_id: u64,
    pub priority: u32,
    pub branch: String,
    pub assignment_repository: RepositoryInfo,
    pub test_repository: RepositoryInfo,
    pub solution_repository: Option<RepositoryInfo>,
    pub auxiliary_repositories: Vec<RepositoryInfo>,
    pub container_image: String,
    pub build_script: String,
    pub triggered_by_push: bool,
    pub programming_language: String,
}

/// One containerized build/test job for a student submission. Immutable once
/// enqueued; removed from the queue exactly once, atomically with assignment
/// to an agent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BuildJob {
    pub id: Uuid,
    pub exercise_id: u64,
    pub participation_id: u64,
    pub priority: u32,
    pub branch: String,
    pub enqueued_at: DateTime<Utc>,
    pub assignment_repository: RepositoryInfo,
    pub test_repository: RepositoryInfo,
    pub solution_repository: Option<RepositoryInfo>,
    pub auxiliary_repositories: Vec<RepositoryInfo>,
    pub container_image: String,
    pub build_script: String,
    pub triggered_by_push: bool,
    pub programming_language: String,
}

impl BuildJob {
    pub fn from_payload(payload: BuildJobPayload) -> Self {
        Self {
            id: Uuid::new_v4(),
            exercise_id: payload.exercise_id,
            participation_id: payload.participation_id,
            priority: payload.priority,
            branch: payload.branch,
            enqueued_at: Utc::now(),
            assignment_repository: payload.assignment_repository,
            test_repository: payload.test_repository,
            solution_repository: payload.solution_repository,
            auxiliary_repositories: payload.auxiliary_repositories,
            container_image: payload.container_image,
            build_script: payload.build_script,
            triggered_by_push: payload.triggered_by_push,
            programming_language: payload.programming_language,
        }
    }
}

impl PartialEq for BuildJob {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for BuildJob {}

/// Dequeue order: priority descending, enqueue timestamp ascending. A
/// higher-priority job is never starved behind lower-priority backlog, and
/// ties preserve arrival order. The priority queue pops the greatest
/// element, so "greater" means "dequeued sooner".
impl Ord for BuildJob {
    fn cmp(&self, other: &Self) -> Ordering {
        self.priority
            .cmp(&other.priority)
            .then_with(|| other.enqueued_at.cmp(&self.enqueued_at))
            .then_with(|| other.id.cmp(&self.id))
    }
}

impl PartialOrd for BuildJob {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn payload(priority: u32) -> BuildJobPayload {
        BuildJobPayload {
            exercise_id: 7,
            participation_id: 42,
            priority,
            branch: "main".into(),
            assignment_repository: RepositoryInfo {
                url: "https://git.example.org/ex7/student42.git".into(),
                commit_hash: "abc123".into(),
            },
            test_repository: RepositoryInfo {
                url: "https://git.example.org/ex7/tests.git".into(),
                commit_hash: "def456".into(),
            },
            solution_repository: None,
            auxiliary_repositories: Vec::new(),
            container_image: "eclipse-temurin:21".into(),
            build_script: "./gradlew test".into(),
            triggered_by_push: true,
            programming_language: "java".into(),
        }
    }

    #[test]
    fn higher_priority_orders_first() {
        let low = BuildJob::from_payload(payload(1));
        let high = BuildJob::from_payload(payload(5));
        assert!(high > low);
    }

    #[test]
    fn equal_priority_preserves_arrival_order() {
        let mut first = BuildJob::from_payload(payload(3));
        let mut second = BuildJob::from_payload(payload(3));
        first.enqueued_at = Utc::now();
        second.enqueued_at = first.enqueued_at + Duration::seconds(1);
        // earlier arrival is "greater", so the heap pops it first
        assert!(first > second);
    }

    #[test]
    fn payload_fields_carry_over() {
        let job = BuildJob::from_payload(payload(2));
        assert_eq!(job.exercise_id, 7);
        assert_eq!(job.participation_id, 42);
        assert_eq!(job.priority, 2);
        assert_eq!(job.assignment_repository.commit_hash, "abc123");
        assert!(job.triggered_by_push);
    }
}
