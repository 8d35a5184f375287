//! # MPC Controller Executable
//!
//! Serves one or more simulator connections, running a model predictive trajectory controller on
//! every telemetry snapshot received and replying with the steering and throttle demands.
//!
//! # Architecture
//!
//! - Load the executable and trajectory control parameters
//! - For each configured endpoint start a worker thread owning its own server, driver,
//!   trajectory controller and archive. Workers share nothing but the zmq context.
//! - Each worker loops:
//!     - Receive a frame
//!     - Run one control cycle if the frame holds telemetry
//!     - Wait for the actuation delay
//!     - Reply, rebinding the endpoint if the socket failed
//! - A worker which stops doesn't stop the others, the executable exits once all have stopped

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

// External
use color_eyre::{eyre::{eyre, WrapErr}, Result};
use log::{error, info};
use std::thread;
use std::time::Duration;
use structopt::StructOpt;

// Internal
use comms_if::net::zmq;
use mpc_lib::{
    driver::{ControlLoopDriver, SleepLatency},
    params::MpcExecParams,
    traj_ctrl::{InitData, TrajCtrl},
    worker::Worker,
};
use util::{
    logger::{logger_init, LevelFilter},
    module::State,
    session::Session,
};

// ------------------------------------------------------------------------------------------------
// CLI
// ------------------------------------------------------------------------------------------------

#[derive(Debug, StructOpt)]
#[structopt(name = "mpc_exec", about = "MPC trajectory controller for the vehicle simulator")]
struct Opt {
    /// Executable parameter file, relative to the params directory
    #[structopt(short, long, default_value = "mpc_exec.toml")]
    params: String,

    /// Minimum level of log messages, must be at least info
    #[structopt(short, long, default_value = "debug")]
    log_level: LevelFilter,
}

// ------------------------------------------------------------------------------------------------
// MAIN
// ------------------------------------------------------------------------------------------------

fn main() -> Result<()> {

    // ---- EARLY INITIALISATION ----

    color_eyre::install()?;

    let opt = Opt::from_args();

    // Initialise session
    let session = Session::new("mpc_exec", "sessions")
        .wrap_err("Failed to create the session")?;

    // Initialise logger
    logger_init(opt.log_level, &session)
        .wrap_err("Failed to initialise logging")?;

    info!("MPC Controller Executable\n");
    info!("Session directory: {:?}\n", session.session_root);

    info!("Initialising...");

    // ---- LOAD PARAMETERS ----

    let params: MpcExecParams = util::params::load(&opt.params)
        .wrap_err("Failed to load the executable parameters")?;

    if params.sim_endpoints.is_empty() {
        return Err(eyre!("No simulator endpoints are configured"))
    }

    let delay = Duration::from_millis(params.actuation_delay_ms);

    info!("Parameters loaded, actuation delay is {} ms", params.actuation_delay_ms);

    // ---- WORKER INITIALISATION ----

    let ctx = zmq::Context::new();
    let mut workers = Vec::with_capacity(params.sim_endpoints.len());

    for (i, endpoint) in params.sim_endpoints.iter().enumerate() {
        // Modules are initialised here so that configuration errors stop start up
        let mut traj_ctrl: TrajCtrl = TrajCtrl::default();
        traj_ctrl.init(
            InitData {
                params_file: params.traj_ctrl_params_file.clone(),
                archive_path: if params.archive {
                    Some(format!("traj_ctrl/status_report_{}.csv", i))
                }
                else {
                    None
                }
            },
            Some(&session)
        ).wrap_err("Failed to initialise TrajCtrl")?;

        let driver = ControlLoopDriver::new(traj_ctrl, SleepLatency, delay);

        let worker = Worker::new(&ctx, endpoint, &params.socket_options, driver)
            .wrap_err_with(|| format!("Failed to start the server on {}", endpoint))?;

        let handle = thread::Builder::new()
            .name(format!("sim_worker_{}", i))
            .spawn(move || worker.run())
            .wrap_err("Failed to start a worker thread")?;

        info!("Serving simulator on {}", endpoint);

        workers.push((endpoint.clone(), handle));
    }

    info!("Initialisation complete");

    // ---- WAIT FOR WORKERS ----

    let num_workers = workers.len();
    let mut num_failed = 0;

    for (endpoint, handle) in workers {
        match handle.join() {
            Ok(Ok(())) => info!("Worker on {} stopped", endpoint),
            Ok(Err(e)) => {
                error!("Worker on {} stopped: {}", endpoint, e);
                num_failed += 1;
            },
            Err(_) => {
                error!("Worker on {} panicked", endpoint);
                num_failed += 1;
            }
        }
    }

    if num_failed > 0 {
        return Err(eyre!("{} of {} workers failed", num_failed, num_workers))
    }

    Ok(())
}
