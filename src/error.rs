use thiserror::Error;

#[derive(Error, Debug)]
pub enum HiveError {
    #[error("Not connected to the cluster")]
    NotConnected,

    #[error("Job not found: {0}")]
    JobNotFound(String),

    #[error("Build agent not found: {0}")]
    AgentNotFound(String),

    #[error("Operation not supported on this node type: {0}")]
    UnsupportedOnThisNode(&'static str),

    #[error("Batch did not terminate within the forced-cancellation window of {0} seconds")]
    BatchTimeout(u64),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

pub type Result<T> = std::result::Result<T, HiveError>;
