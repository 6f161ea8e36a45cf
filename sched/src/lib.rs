/// Dividing cluster nodes among concurrent directions
mod cluster;
pub use cluster::{divide_nodes, ClusterNode};

/// Units of scheduled work
mod operation;
pub use operation::{OpResult, OpStatus, Operation};

/// The operation -> external job boundary
mod launcher;
pub use launcher::{DryRunLauncher, JobOutcome, JobLauncher, PipelineLauncher};

/// Bounded-concurrency operation execution
mod scheduler;
pub use scheduler::Scheduler;

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("Failed to launch job for operation {0}: {1}")]
    Launch(String, #[source] std::io::Error),
    #[error("Job for operation {0} produced unreadable verification output: {1}")]
    BadVerification(String, String),
    #[error("Could not serialize parameters for operation {0}")]
    Params(String, #[source] serde_json::Error),
}
