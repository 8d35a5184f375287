//! # MPC controller library.
//!
//! This library allows the executable, the integration tests and the benchmarks to access items
//! defined inside the controller crate.

// ------------------------------------------------------------------------------------------------
// MODULES
// ------------------------------------------------------------------------------------------------

/// Control loop driver - turns simulator frames into replies
pub mod driver;

/// Executable parameters
pub mod params;

/// Simulator server - receives frames from and sends replies to the simulator
pub mod sim_server;

/// Trajectory control module - keeps the vehicle on the reference path
pub mod traj_ctrl;

/// Simulator worker - serves one endpoint, rebinding it after socket failures
pub mod worker;
