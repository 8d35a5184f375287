//! # Simulator worker
//!
//! A worker serves one simulator endpoint: it owns the server and the control loop driver for
//! that endpoint and answers every frame received. A REP socket which fails to receive or reply
//! is left unable to take another frame, so the worker closes it and binds a fresh one on the
//! same endpoint. Only a failure to rebind stops the worker.

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

// External
use log::{info, warn};
use std::thread;
use std::time::Duration;

// Internal
use crate::driver::{ControlLoopDriver, Latency};
use crate::sim_server::{SimServer, SimServerError};
use crate::traj_ctrl::mpc::{GaussNewtonSolver, Solver};
use comms_if::net::{zmq, SocketOptions};

// ------------------------------------------------------------------------------------------------
// CONSTANTS
// ------------------------------------------------------------------------------------------------

/// Number of cycles between worker statistics log messages
const CYCLES_PER_REPORT: u64 = 1000;

/// Number of attempts made to rebind the endpoint after a socket failure
const REBIND_ATTEMPTS: usize = 20;

/// Time between attempts to rebind the endpoint
const REBIND_INTERVAL: Duration = Duration::from_millis(50);

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

/// Serves one simulator endpoint.
pub struct Worker<L, S = GaussNewtonSolver> {
    ctx: zmq::Context,

    endpoint: String,

    socket_options: SocketOptions,

    /// The server, `None` between closing a failed socket and binding its replacement
    server: Option<SimServer>,

    driver: ControlLoopDriver<L, S>,

    /// Number of times the endpoint has been rebound
    num_rebinds: u64,

    /// Cycle count at the last statistics message
    last_report: u64,
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl<L, S> Worker<L, S>
where
    L: Latency,
    S: Solver + Default
{
    /// Bind a server on `endpoint` and create the worker.
    pub fn new(
        ctx: &zmq::Context,
        endpoint: &str,
        socket_options: &SocketOptions,
        driver: ControlLoopDriver<L, S>
    ) -> Result<Self, SimServerError> {
        let server = SimServer::new(ctx, endpoint, socket_options)?;

        Ok(Self {
            ctx: ctx.clone(),
            endpoint: endpoint.into(),
            socket_options: socket_options.clone(),
            server: Some(server),
            driver,
            num_rebinds: 0,
            last_report: 0
        })
    }

    /// The endpoint this worker serves
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Number of times the endpoint has been rebound after a socket failure
    pub fn num_rebinds(&self) -> u64 {
        self.num_rebinds
    }

    /// The control loop driver, for inspecting its statistics
    pub fn driver(&self) -> &ControlLoopDriver<L, S> {
        &self.driver
    }

    /// The current server, if one is bound.
    pub fn server_mut(&mut self) -> Option<&mut SimServer> {
        self.server.as_mut()
    }

    /// Serve frames until the endpoint can no longer be bound.
    pub fn run(mut self) -> Result<(), SimServerError> {
        loop {
            self.serve_once()?;
        }
    }

    /// Receive one frame and reply to it.
    ///
    /// Returns `Ok(true)` if a frame was answered and `Ok(false)` if nothing arrived or the socket
    /// failed and was rebound. An error is only returned if the endpoint couldn't be rebound.
    pub fn serve_once(&mut self) -> Result<bool, SimServerError> {
        let frame = match self.server()?.recv_frame() {
            Ok(Some(f)) => f,
            Ok(None) => return Ok(false),
            Err(e) => {
                warn!("Receive failed on {}, rebinding: {}", self.endpoint, e);
                self.rebind()?;
                return Ok(false)
            }
        };

        let reply = self.driver.handle_frame(&frame);

        if let Err(e) = self.server()?.send_frame(&reply) {
            warn!("Could not reply to the simulator on {}, rebinding: {}", self.endpoint, e);
            self.rebind()?;
        }

        if self.driver.num_cycles() >= self.last_report + CYCLES_PER_REPORT {
            self.last_report = self.driver.num_cycles();
            info!(
                "{}: {} cycles, {} fallbacks, {} rebinds, simulator {}",
                self.endpoint,
                self.driver.num_cycles(),
                self.driver.num_fallbacks(),
                self.num_rebinds,
                if self.server.as_ref().map_or(false, |s| s.connected()) {
                    "connected"
                }
                else {
                    "disconnected"
                }
            );
        }

        Ok(true)
    }

    /// Get the server, binding a new one if there isn't one.
    fn server(&mut self) -> Result<&mut SimServer, SimServerError> {
        if self.server.is_none() {
            self.rebind()?;
        }

        self.server.as_mut().ok_or(SimServerError::NotBound)
    }

    /// Close the current socket and bind a new one on the same endpoint.
    ///
    /// The old socket releases the endpoint asynchronously, so binding is retried.
    fn rebind(&mut self) -> Result<(), SimServerError> {
        self.server = None;
        self.num_rebinds += 1;

        let mut attempt = 1;
        loop {
            match SimServer::new(&self.ctx, &self.endpoint, &self.socket_options) {
                Ok(s) => {
                    self.server = Some(s);
                    info!("Rebound {} after {} attempt(s)", self.endpoint, attempt);
                    return Ok(())
                },
                Err(e) if attempt < REBIND_ATTEMPTS => {
                    warn!("Rebinding {} failed (attempt {}): {}", self.endpoint, attempt, e);
                    attempt += 1;
                    thread::sleep(REBIND_INTERVAL);
                },
                Err(e) => return Err(e)
            }
        }
    }
}
