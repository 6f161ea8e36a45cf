/// The orchestration control loop
mod control;
pub use control::{group_directions, ControlLoop, RunSummary};

/// Building operations and their parameter bundles
mod ops;
