//! Build outcome DTOs: normalized test outcomes produced by the report
//! parser and the assembled [`BuildResult`] an agent sends back to the core.

pub mod parser;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::logs::LogEntry;

/// One test case after normalization. A failed case carries exactly one
/// message; a passed case carries none.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestOutcome {
    pub name: String,
    pub messages: Vec<String>,
}

impl TestOutcome {
    pub fn passed(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            messages: Vec::new(),
        }
    }

    pub fn failed(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            messages: vec![message.into()],
        }
    }
}

/// Normalized pass/fail lists for one logical build job. Local CI produces
/// exactly one of these per build.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestReport {
    pub failed: Vec<TestOutcome>,
    pub successful: Vec<TestOutcome>,
}

impl TestReport {
    pub fn is_empty(&self) -> bool {
        self.failed.is_empty() && self.successful.is_empty()
    }

    pub fn merge(&mut self, other: TestReport) {
        self.failed.extend(other.failed);
        self.successful.extend(other.successful);
    }
}

/// The outcome of one finished build job, assembled by the agent and
/// consumed exactly once by a core node. Static-analysis reports are opaque
/// to this subsystem. Logs are attached separately so "build still
/// streaming" stays distinguishable from "build produced no output".
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BuildResult {
    pub branch: String,
    pub assignment_commit_hash: String,
    pub tests_commit_hash: String,
    pub successful: bool,
    pub completed_at: DateTime<Utc>,
    pub jobs: Vec<TestReport>,
    pub static_analysis_reports: Vec<serde_json::Value>,
    logs: Option<Vec<LogEntry>>,
}

impl BuildResult {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        branch: impl Into<String>,
        assignment_commit_hash: impl Into<String>,
        tests_commit_hash: impl Into<String>,
        successful: bool,
        completed_at: DateTime<Utc>,
        jobs: Vec<TestReport>,
        static_analysis_reports: Vec<serde_json::Value>,
    ) -> Self {
        Self {
            branch: branch.into(),
            assignment_commit_hash: assignment_commit_hash.into(),
            tests_commit_hash: tests_commit_hash.into(),
            successful,
            completed_at,
            jobs,
            static_analysis_reports,
            logs: None,
        }
    }

    pub fn attach_logs(&mut self, logs: Vec<LogEntry>) {
        self.logs = Some(logs);
    }

    /// True only once logs have been explicitly attached.
    pub fn has_logs(&self) -> bool {
        self.logs.is_some()
    }

    pub fn logs(&self) -> Option<&[LogEntry]> {
        self.logs.as_deref()
    }

    /// The execution backend does not expose build artifacts.
    pub fn has_artifacts(&self) -> bool {
        false
    }
}

/// Wire message published on the results topic when an agent finishes a job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BuildResultMessage {
    pub agent_name: String,
    pub job_id: Uuid,
    pub result: BuildResult,
}
