use std::future::Future;
use std::path::Path;
use std::process::Stdio;

use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Command;
use tokio::sync::mpsc;

use crate::config::SandboxConfig;
use crate::error::Result;
use crate::scheduler::BuildJob;

/// Raw outcome of one containerized build run, before report parsing.
#[derive(Debug)]
pub struct ExecutionOutput {
    pub successful: bool,
    pub exit_code: Option<i32>,
    /// Raw JUnit XML documents collected from the results directory.
    pub test_reports: Vec<String>,
}

/// The container runtime seam. The runtime itself is an external
/// collaborator; this trait is what the agent loop programs against.
pub trait BuildExecutor: Send + Sync + 'static {
    /// Run the job's build script, streaming output lines into `log_tx` as
    /// they are produced.
    fn execute(
        &self,
        job: &BuildJob,
        log_tx: mpsc::Sender<String>,
    ) -> impl Future<Output = Result<ExecutionOutput>> + Send;
}

/// Executes build jobs in sandboxed Docker containers: network isolation,
/// dropped capabilities, no privilege escalation, memory and CPU limits.
/// The build script writes its JUnit reports into a host-mounted results
/// directory which is read back after the run.
#[derive(Debug, Clone)]
pub struct DockerExecutor {
    config: SandboxConfig,
}

impl DockerExecutor {
    pub fn new(config: SandboxConfig) -> Self {
        Self { config }
    }

    fn run_args(&self, job: &BuildJob, results_dir: &Path) -> Vec<String> {
        let mut args = vec!["run".to_string(), "--rm".to_string()];

        if self.config.network_disabled {
            args.push("--network=none".to_string());
        }
        if let Some(ref limit) = self.config.memory_limit {
            args.push(format!("--memory={}", limit));
        }
        if let Some(ref limit) = self.config.cpu_limit {
            args.push(format!("--cpus={}", limit));
        }
        args.push("--cap-drop=ALL".to_string());
        args.push("--security-opt=no-new-privileges".to_string());

        args.push(format!("--volume={}:/results", results_dir.display()));
        args.push(format!("--env=ASSIGNMENT_REPO={}", job.assignment_repository.url));
        args.push(format!(
            "--env=ASSIGNMENT_COMMIT={}",
            job.assignment_repository.commit_hash
        ));
        args.push(format!("--env=TEST_REPO={}", job.test_repository.url));
        args.push(format!("--env=TEST_COMMIT={}", job.test_repository.commit_hash));

        args.push(job.container_image.clone());
        args.push("sh".to_string());
        args.push("-c".to_string());
        args.push(job.build_script.clone());
        args
    }

    async fn forward_lines<R>(reader: R, log_tx: mpsc::Sender<String>)
    where
        R: AsyncRead + Unpin,
    {
        let mut lines = BufReader::new(reader).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            if log_tx.send(line).await.is_err() {
                break;
            }
        }
    }

    async fn collect_reports(results_dir: &Path) -> Result<Vec<String>> {
        let mut reports = Vec::new();
        let mut entries = tokio::fs::read_dir(results_dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) == Some("xml") {
                reports.push(tokio::fs::read_to_string(&path).await?);
            }
        }
        // Deterministic report order regardless of directory iteration.
        reports.sort();
        Ok(reports)
    }
}

impl BuildExecutor for DockerExecutor {
    async fn execute(&self, job: &BuildJob, log_tx: mpsc::Sender<String>) -> Result<ExecutionOutput> {
        let results_dir = tempfile::tempdir()?;

        tracing::info!(
            job_id = %job.id,
            image = %job.container_image,
            script = %job.build_script,
            "Executing build job"
        );

        let mut child = Command::new("docker")
            .args(self.run_args(job, results_dir.path()))
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()?;

        let stdout = child.stdout.take();
        let stderr = child.stderr.take();
        let stdout_task = stdout.map(|out| tokio::spawn(Self::forward_lines(out, log_tx.clone())));
        let stderr_task = stderr.map(|err| tokio::spawn(Self::forward_lines(err, log_tx.clone())));

        let status = child.wait().await?;
        if let Some(task) = stdout_task {
            let _ = task.await;
        }
        if let Some(task) = stderr_task {
            let _ = task.await;
        }

        let test_reports = Self::collect_reports(results_dir.path()).await?;
        tracing::info!(
            job_id = %job.id,
            exit_code = ?status.code(),
            reports = test_reports.len(),
            "Build job finished"
        );

        Ok(ExecutionOutput {
            successful: status.success(),
            exit_code: status.code(),
            test_reports,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scheduler::{BuildJobPayload, RepositoryInfo};

    fn job() -> BuildJob {
        BuildJob::from_payload(BuildJobPayload {
            exercise_id: 1,
            participation_id: 2,
            priority: 1,
            branch: "main".into(),
            assignment_repository: RepositoryInfo {
                url: "https://git.example.org/a.git".into(),
                commit_hash: "aaa".into(),
            },
            test_repository: RepositoryInfo {
                url: "https://git.example.org/t.git".into(),
                commit_hash: "ttt".into(),
            },
            solution_repository: None,
            auxiliary_repositories: Vec::new(),
            container_image: "eclipse-temurin:21".into(),
            build_script: "./gradlew test".into(),
            triggered_by_push: true,
            programming_language: "java".into(),
        })
    }

    #[test]
    fn run_args_apply_sandbox_limits() {
        let executor = DockerExecutor::new(SandboxConfig::default());
        let args = executor.run_args(&job(), Path::new("/tmp/results"));
        assert!(args.contains(&"--network=none".to_string()));
        assert!(args.contains(&"--cap-drop=ALL".to_string()));
        assert!(args.contains(&"--memory=2g".to_string()));
        assert!(args.contains(&"--volume=/tmp/results:/results".to_string()));
        assert_eq!(args.last().map(String::as_str), Some("./gradlew test"));
    }

    #[test]
    fn run_args_use_job_image() {
        let executor = DockerExecutor::new(SandboxConfig::default());
        let args = executor.run_args(&job(), Path::new("/tmp/results"));
        assert!(args.contains(&"eclipse-temurin:21".to_string()));
    }
}
