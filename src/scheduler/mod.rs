//! Rotation scheduling: the tick engine and the daemon that drives it.

mod daemon;
mod rotation;

pub use daemon::{run_rotation_daemon, RotationDaemon};
pub use rotation::{RotationScheduler, SchedulerState};
