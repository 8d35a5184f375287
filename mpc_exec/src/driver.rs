//! # Control loop driver
//!
//! Turns simulator frames into replies. Each telemetry event runs one trajectory control cycle,
//! the reply is held back by the actuation delay to model the latency of a real actuator, and
//! any failure in the cycle is answered with the fallback actuation.

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

// External
use log::{debug, error, trace, warn};
use std::thread;
use std::time::Duration;

// Internal
use crate::traj_ctrl::{mpc::{GaussNewtonSolver, Solver}, TrajCtrl};
use comms_if::sim::{parse_frame, SimEvent, SteerCmd, Telemetry, MANUAL_FRAME};
use util::{archive::Archived, module::State};

// ------------------------------------------------------------------------------------------------
// TRAITS
// ------------------------------------------------------------------------------------------------

/// A strategy for imposing the actuation delay before a steering reply is sent.
pub trait Latency {
    /// Wait for `delay` before returning.
    fn wait(&self, delay: Duration);
}

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

/// Blocks the calling thread for the delay.
#[derive(Debug, Default, Clone, Copy)]
pub struct SleepLatency;

/// Returns immediately.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoLatency;

/// Handles the frames from one simulator connection.
pub struct ControlLoopDriver<L, S = GaussNewtonSolver> {
    traj_ctrl: TrajCtrl<S>,

    latency: L,

    /// Delay imposed on every steering reply
    delay: Duration,

    /// Number of telemetry cycles run
    num_cycles: u64,

    /// Number of cycles which ended in the fallback actuation
    num_fallbacks: u64,
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl Latency for SleepLatency {
    fn wait(&self, delay: Duration) {
        if delay > Duration::from_secs(0) {
            thread::sleep(delay);
        }
    }
}

impl Latency for NoLatency {
    fn wait(&self, _delay: Duration) {}
}

impl<L, S> ControlLoopDriver<L, S>
where
    L: Latency,
    S: Solver + Default
{
    pub fn new(traj_ctrl: TrajCtrl<S>, latency: L, delay: Duration) -> Self {
        Self {
            traj_ctrl,
            latency,
            delay,
            num_cycles: 0,
            num_fallbacks: 0
        }
    }

    /// Number of telemetry cycles run so far
    pub fn num_cycles(&self) -> u64 {
        self.num_cycles
    }

    /// Number of cycles which ended in the fallback actuation
    pub fn num_fallbacks(&self) -> u64 {
        self.num_fallbacks
    }

    /// Trajectory control, for inspection of the latest status report
    pub fn traj_ctrl(&self) -> &TrajCtrl<S> {
        &self.traj_ctrl
    }

    /// Handle one frame from the simulator, returning the reply to send.
    ///
    /// Replies are:
    /// - empty for frames which aren't events, or are events other than telemetry,
    /// - the manual frame for events carrying no data,
    /// - a steer frame otherwise, holding the fallback actuation if the cycle failed.
    pub fn handle_frame(&mut self, frame: &str) -> String {
        match parse_frame(frame) {
            Ok(None) => {
                trace!("Ignoring non-event frame");
                String::new()
            },
            Ok(Some(SimEvent::NoData)) => {
                trace!("Event has no data, replying with manual");
                MANUAL_FRAME.into()
            },
            Ok(Some(SimEvent::Other(name))) => {
                debug!("Ignoring \"{}\" event", name);
                String::new()
            },
            Ok(Some(SimEvent::Telemetry(telemetry))) => {
                let cmd = self.run_cycle(&telemetry);
                self.reply(cmd)
            },
            Err(e) => {
                warn!("Malformed frame from the simulator, sending fallback: {}", e);
                self.num_cycles += 1;
                self.num_fallbacks += 1;
                self.traj_ctrl.clear_report();
                let cmd = self.traj_ctrl.fallback(None);
                self.reply(cmd)
            }
        }
    }

    /// Run trajectory control on one telemetry snapshot.
    fn run_cycle(&mut self, telemetry: &Telemetry) -> SteerCmd {
        self.num_cycles += 1;

        match self.traj_ctrl.proc(telemetry) {
            Ok((cmd, _)) => cmd,
            Err(e) => {
                warn!("TrajCtrl cycle {} failed, sending fallback: {}", self.num_cycles, e);
                self.num_fallbacks += 1;
                self.traj_ctrl.fallback(Some(telemetry))
            }
        }
    }

    /// Archive the cycle, wait for the actuation delay, and encode the command.
    fn reply(&mut self, cmd: SteerCmd) -> String {
        if let Err(e) = self.traj_ctrl.write() {
            warn!("Could not archive the TrajCtrl status report: {}", e);
        }

        self.latency.wait(self.delay);

        match cmd.to_frame() {
            Ok(f) => f,
            Err(e) => {
                error!("Could not encode the steering command, replying with manual: {}", e);
                MANUAL_FRAME.into()
            }
        }
    }
}
