pub mod agent;
pub mod batch;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod logs;
pub mod results;
pub mod scheduler;
pub mod shutdown;
pub mod substrate;

pub use error::{HiveError, Result};
