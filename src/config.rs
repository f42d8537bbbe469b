use crate::batch::BatchConfig;

/// Configuration for Docker-based build execution.
///
/// All builds run in sandboxed containers; the image comes from the job
/// itself, the limits from the node.
#[derive(Debug, Clone)]
pub struct SandboxConfig {
    /// Disable network access in the container
    pub network_disabled: bool,
    /// Memory limit (e.g., "2g")
    pub memory_limit: Option<String>,
    /// CPU limit (e.g., "2" for two CPUs)
    pub cpu_limit: Option<String>,
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            network_disabled: true,
            memory_limit: Some("2g".to_string()),
            cpu_limit: Some("2".to_string()),
        }
    }
}

/// Names of the cluster-shared collections. Stable and unique per cluster;
/// the defaults are fine unless several deployments share one cluster.
#[derive(Debug, Clone)]
pub struct NodeConfig {
    /// Short name of this node (agent name on agents).
    pub node_name: String,
    /// Address this node reports to the cluster.
    pub node_address: String,
    pub job_queue_name: String,
    pub agent_map_name: String,
    pub processing_map_name: String,
    pub log_map_name: String,
    pub results_topic_name: String,
    pub sandbox: SandboxConfig,
    pub batch: BatchConfig,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            node_name: "core-1".to_string(),
            node_address: "127.0.0.1:5701".to_string(),
            job_queue_name: "build-jobs".to_string(),
            agent_map_name: "build-agents".to_string(),
            processing_map_name: "processing-jobs".to_string(),
            log_map_name: "build-logs".to_string(),
            results_topic_name: "build-results".to_string(),
            sandbox: SandboxConfig::default(),
            batch: BatchConfig::default(),
        }
    }
}

impl NodeConfig {
    pub fn named(name: impl Into<String>, address: impl Into<String>) -> Self {
        Self {
            node_name: name.into(),
            node_address: address.into(),
            ..Default::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sandbox_config_default() {
        let cfg = SandboxConfig::default();
        assert!(cfg.network_disabled);
        assert_eq!(cfg.memory_limit.as_deref(), Some("2g"));
        assert_eq!(cfg.cpu_limit.as_deref(), Some("2"));
    }

    #[test]
    fn node_config_default_collection_names() {
        let cfg = NodeConfig::default();
        assert_eq!(cfg.job_queue_name, "build-jobs");
        assert_eq!(cfg.agent_map_name, "build-agents");
        assert_eq!(cfg.processing_map_name, "processing-jobs");
        assert_eq!(cfg.log_map_name, "build-logs");
        assert_eq!(cfg.results_topic_name, "build-results");
    }

    #[test]
    fn node_config_named() {
        let cfg = NodeConfig::named("agent-3", "10.0.0.3:5701");
        assert_eq!(cfg.node_name, "agent-3");
        assert_eq!(cfg.node_address, "10.0.0.3:5701");
        assert_eq!(cfg.job_queue_name, "build-jobs");
    }
}
