//! Trajectory control module state

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

// External
use log::{debug, trace};
use serde::Serialize;

// Internal
use super::{
    error_state::{predict_latency, ErrorState},
    frame::to_body_frame,
    mpc::{GaussNewtonSolver, MpcError, Solver},
    poly_fit::{poly_eval, poly_fit},
    post_proc::{post_process, to_physical, Actuation},
    FallbackPolicy, Params, TrajCtrlError,
};
use comms_if::sim::{SteerCmd, Telemetry};
use util::{
    archive::{ArchiveError, Archived, Archiver},
    module::State,
    params,
    session::{self, Session},
};

// ---------------------------------------------------------------------------
// DATA STRUCTURES
// ---------------------------------------------------------------------------

/// Trajectory control module state
pub struct TrajCtrl<S = GaussNewtonSolver> {
    params: Params,

    solver: S,

    report: StatusReport,
    arch_report: Archiver,
}

/// Initialisation data for TrajCtrl
#[derive(Debug, Clone)]
pub struct InitData {
    /// Path to the parameter file, relative to the params directory
    pub params_file: String,

    /// Path of the status report archive relative to the session's archive root, or `None` to
    /// disable archiving
    pub archive_path: Option<String>,
}

/// The status report of one cycle, archived as one csv row.
#[derive(Debug, Default, Clone, Copy, Serialize)]
pub struct StatusReport {
    /// Session time at the start of the cycle
    pub time_s: f64,

    /// Number of waypoints in the telemetry
    pub num_waypoints: usize,

    /// Cross track error at the start of the cycle
    pub cte: f64,

    /// Heading error at the start of the cycle
    pub epsi: f64,

    /// Objective value of the MPC solution
    pub cost: f64,

    /// Number of MPC solver iterations
    pub iterations: usize,

    /// MPC solve time
    pub solve_time_s: f64,

    /// True if the MPC line search stalled before a convergence tolerance was met
    pub stalled: bool,

    /// Normalised steering demand sent
    pub steering: f64,

    /// Normalised throttle demand sent
    pub throttle: f64,

    /// True if the braking override modified the throttle
    pub brake_override: bool,

    /// True if the cycle failed and the fallback actuation was sent
    pub fallback: bool,
}

// ---------------------------------------------------------------------------
// IMPLEMENTATIONS
// ---------------------------------------------------------------------------

impl<S: Default> Default for TrajCtrl<S> {
    fn default() -> Self {
        Self {
            params: Params::default(),
            solver: S::default(),
            report: StatusReport::default(),
            arch_report: Archiver::default()
        }
    }
}

impl<S: Solver> TrajCtrl<S> {
    /// Create a new instance from parameters and a solver, without archiving.
    pub fn with_params(params: Params, solver: S) -> Result<Self, TrajCtrlError> {
        params.validate().map_err(TrajCtrlError::InvalidParams)?;

        Ok(Self {
            params,
            solver,
            report: StatusReport::default(),
            arch_report: Archiver::default()
        })
    }

    /// Get the parameters in use
    pub fn params(&self) -> &Params {
        &self.params
    }

    /// Get the status report of the latest cycle
    pub fn report(&self) -> &StatusReport {
        &self.report
    }

    /// Start a fresh status report for a cycle.
    pub fn clear_report(&mut self) {
        self.report = StatusReport {
            time_s: session::get_elapsed_seconds(),
            ..Default::default()
        };
    }

    /// Get the command to send when a cycle has failed.
    ///
    /// The command follows the fallback policy and carries no visualisation data. The status
    /// report is updated to record the fallback.
    pub fn fallback(&mut self, telemetry: Option<&Telemetry>) -> SteerCmd {
        let act = match (self.params.fallback, telemetry) {
            (FallbackPolicy::HoldPrevious, Some(t)) => Actuation {
                steering: finite_clamp(t.steering_angle),
                throttle: finite_clamp(t.throttle)
            },
            _ => Actuation::default()
        };

        self.report.fallback = true;
        self.report.steering = act.steering;
        self.report.throttle = act.throttle;
        self.report.brake_override = false;

        SteerCmd::from_actuation(act.steering, act.throttle)
    }

    /// Sample the reference curve at the configured longitudinal positions.
    fn reference_samples(&self, coeffs: &[f64]) -> (Vec<f64>, Vec<f64>) {
        (0..self.params.num_ref_samples)
            .map(|k| {
                let x = self.params.ref_sample_start_m
                    + k as f64 * self.params.ref_sample_spacing_m;
                (x, poly_eval(coeffs, x))
            })
            .unzip()
    }
}

impl<S: Solver + Default> State for TrajCtrl<S> {
    type InitData = InitData;
    type InitError = TrajCtrlError;

    type InputData = Telemetry;
    type OutputData = SteerCmd;
    type StatusReport = StatusReport;
    type ProcError = TrajCtrlError;

    /// Initialise the TrajCtrl module.
    fn init(&mut self, init_data: Self::InitData, session: Option<&Session>)
        -> Result<(), Self::InitError>
    {
        let params: Params = params::load(&init_data.params_file)
            .map_err(TrajCtrlError::ParamLoadError)?;
        params.validate().map_err(TrajCtrlError::InvalidParams)?;
        self.params = params;

        if let (Some(session), Some(path)) = (session, init_data.archive_path) {
            self.arch_report = Archiver::from_path(session, path)
                .map_err(TrajCtrlError::ArchiveError)?;
        }

        Ok(())
    }

    /// Run one control cycle on a telemetry snapshot.
    fn proc(&mut self, telemetry: &Self::InputData)
        -> Result<(Self::OutputData, Self::StatusReport), Self::ProcError>
    {
        self.clear_report();
        self.report.num_waypoints = telemetry.ptsx.len();

        check_telemetry(telemetry)?;

        // Waypoints into the body frame
        let (local_x, local_y) = to_body_frame(
            &telemetry.ptsx,
            &telemetry.ptsy,
            telemetry.x,
            telemetry.y,
            telemetry.psi
        ).map_err(TrajCtrlError::FrameError)?;

        // Reference curve
        let coeffs = poly_fit(&local_x, &local_y, self.params.poly_order)
            .map_err(TrajCtrlError::PolyFitError)?;

        // Initial state
        let err = ErrorState::from_curve(&coeffs)
            .map_err(TrajCtrlError::ErrorStateError)?;
        self.report.cte = err.cte;
        self.report.epsi = err.epsi;

        let prev_control = to_physical(
            telemetry.steering_angle, telemetry.throttle, &self.params
        );

        let mut initial = err.initial_state(telemetry.speed);
        if self.params.latency_compensation {
            initial = predict_latency(
                &initial,
                &prev_control,
                &coeffs,
                self.params.compensated_latency_s,
                &self.params.mpc
            );
        }

        // Optimise
        let warm_start = if self.params.mpc.warm_start {
            Some(prev_control)
        }
        else {
            None
        };

        let solution = self.solver
            .solve(&initial, &coeffs, &self.params.mpc, warm_start)
            .map_err(TrajCtrlError::MpcError)?;

        if !(solution.actuation.steer_rad.is_finite() && solution.actuation.accel.is_finite()) {
            return Err(TrajCtrlError::MpcError(MpcError::Diverged {
                iterations: solution.iterations,
                reason: format!("the actuation is not finite: {:?}", solution.actuation)
            }))
        }

        debug!(
            "MPC solved in {} iterations ({:.3} ms), cost = {:.3}",
            solution.iterations,
            solution.solve_time_s * 1000.0,
            solution.cost
        );

        // Output
        let (act, brake_override) = post_process(&solution.actuation, &self.params);
        let (mpc_x, mpc_y) = solution.predicted_xy();
        let (next_x, next_y) = self.reference_samples(&coeffs);

        self.report.cost = solution.cost;
        self.report.iterations = solution.iterations;
        self.report.solve_time_s = solution.solve_time_s;
        self.report.stalled = solution.stalled;
        self.report.steering = act.steering;
        self.report.throttle = act.throttle;
        self.report.brake_override = brake_override;

        trace!(
            "TrajCtrl: cte = {:.4}, epsi = {:.4}, steering = {:.4}, throttle = {:.4}{}",
            err.cte,
            err.epsi,
            act.steering,
            act.throttle,
            if brake_override { " (brake override)" } else { "" }
        );

        let cmd = SteerCmd {
            steering_angle: act.steering,
            throttle: act.throttle,
            mpc_x,
            mpc_y,
            next_x,
            next_y
        };

        Ok((cmd, self.report))
    }
}

impl<S> Archived for TrajCtrl<S> {
    fn write(&mut self) -> Result<(), ArchiveError> {
        self.arch_report.serialise(&self.report)
    }
}

// ---------------------------------------------------------------------------
// PRIVATE FUNCTIONS
// ---------------------------------------------------------------------------

/// Reject telemetry the pipeline can't act on.
fn check_telemetry(t: &Telemetry) -> Result<(), TrajCtrlError> {
    let scalars = [("x", t.x), ("y", t.y), ("psi", t.psi), ("speed", t.speed)];

    for (name, value) in scalars.iter() {
        if !value.is_finite() {
            return Err(TrajCtrlError::NonFiniteTelemetry(format!("{} = {}", name, value)))
        }
    }

    if t.ptsx.iter().chain(t.ptsy.iter()).any(|p| !p.is_finite()) {
        return Err(TrajCtrlError::NonFiniteTelemetry("waypoints".into()))
    }

    Ok(())
}

/// Clamp a normalised demand into [-1, 1], replacing non-finite values with zero.
fn finite_clamp(value: f64) -> f64 {
    if value.is_finite() {
        util::maths::clamp(value, -1.0, 1.0)
    }
    else {
        0.0
    }
}
