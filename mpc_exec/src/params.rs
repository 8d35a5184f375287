//! # MPC Executable Parameters

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use comms_if::net::SocketOptions;
use serde::Deserialize;

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

#[derive(Deserialize, Debug, Clone)]
pub struct MpcExecParams {

    /// Endpoints to serve simulator connections on, one worker thread is started per endpoint
    pub sim_endpoints: Vec<String>,

    /// Options for the simulator sockets. The sockets are always bound.
    #[serde(default = "SocketOptions::server")]
    pub socket_options: SocketOptions,

    /// Delay imposed before every steering reply, modelling actuator latency.
    ///
    /// Units: milliseconds
    pub actuation_delay_ms: u64,

    /// Trajectory control parameter file, relative to the params directory
    pub traj_ctrl_params_file: String,

    /// If true each worker archives its trajectory control status reports in the session
    #[serde(default)]
    pub archive: bool,
}
