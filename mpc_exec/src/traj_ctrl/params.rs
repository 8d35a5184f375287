//! Trajectory control parameters

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

// External
use serde::Deserialize;

// ---------------------------------------------------------------------------
// DATA STRUCTURES
// ---------------------------------------------------------------------------

/// Parameters for trajectory control
#[derive(Deserialize, Debug, Clone, Default)]
pub struct Params {

    // ---- REFERENCE CURVE ----

    /// Order of the polynomial fitted through the waypoints. Must be at least 1, and a telemetry
    /// snapshot must contain at least `poly_order + 1` waypoints.
    pub poly_order: usize,

    /// Longitudinal position of the first reference curve sample.
    ///
    /// Units: meters,
    /// Frame: Vehicle body
    pub ref_sample_start_m: f64,

    /// Longitudinal spacing between reference curve samples.
    ///
    /// Units: meters
    pub ref_sample_spacing_m: f64,

    /// Number of reference curve samples sent for visualisation.
    pub num_ref_samples: usize,

    // ---- OPTIMISER ----

    /// Parameters of the model predictive controller
    pub mpc: MpcParams,

    // ---- POST PROCESSING ----

    /// If true the sign of the normalised steering demand is inverted before it is sent. The
    /// simulator turns right for positive steering while the body frame has +y on the left.
    pub invert_steering: bool,

    /// Normalised steering magnitude above which the braking override may engage.
    pub brake_steer_threshold: f64,

    /// Reference speed above which the braking override may engage.
    pub brake_ref_speed_cutoff: f64,

    /// Factor applied to the throttle when the braking override engages.
    pub brake_factor: f64,

    // ---- FAILURE HANDLING ----

    /// The actuation sent when a cycle fails.
    pub fallback: FallbackPolicy,

    // ---- LATENCY COMPENSATION ----

    /// If true the initial state is propagated forward by `compensated_latency_s` using the
    /// previous actuation before the optimisation.
    pub latency_compensation: bool,

    /// The latency to compensate for, should match the actuation delay.
    ///
    /// Units: seconds
    pub compensated_latency_s: f64,
}

/// Parameters for the model predictive controller
#[derive(Deserialize, Debug, Clone, Default)]
pub struct MpcParams {

    // ---- MODEL ----

    /// Number of states in the horizon, including the initial state. There are
    /// `horizon_steps - 1` actuations.
    pub horizon_steps: usize,

    /// Time between horizon steps.
    ///
    /// Units: seconds
    pub dt_s: f64,

    /// Distance between the front axle and the centre of gravity, the `Lf` of the kinematic
    /// bicycle model.
    ///
    /// Units: meters
    pub lf_m: f64,

    /// The speed the controller tries to hold.
    pub ref_speed: f64,

    // ---- ACTUATOR LIMITS ----

    /// Maximum steering angle, normalised steering of 1.0 corresponds to this angle.
    ///
    /// Units: radians
    pub max_steer_rad: f64,

    /// Maximum throttle (acceleration) magnitude, normalised throttle of 1.0 corresponds to
    /// this value.
    pub max_throttle: f64,

    // ---- OBJECTIVE ----

    /// Weights of each term in the objective
    pub weights: CostWeights,

    // ---- SOLVER ----

    /// Maximum number of solver iterations before the solve is declared diverged.
    pub max_iterations: usize,

    /// Maximum wall clock time for one solve before it is declared diverged.
    ///
    /// Units: milliseconds
    pub max_solve_time_ms: f64,

    /// Convergence threshold on the infinity norm of the projected gradient step.
    pub grad_tolerance: f64,

    /// Convergence threshold on the relative change in cost between iterations.
    pub cost_tolerance: f64,

    /// If true the solver starts from the previous actuation held over the horizon, otherwise
    /// from zero actuation.
    pub warm_start: bool,
}

/// Objective weights
#[derive(Deserialize, Debug, Clone, Default)]
pub struct CostWeights {
    /// Cross track error squared
    pub cte: f64,

    /// Heading error squared
    pub epsi: f64,

    /// Deviation from the reference speed squared
    pub speed: f64,

    /// Steering angle squared
    pub steer: f64,

    /// Throttle squared
    pub throttle: f64,

    /// Change in steering angle between steps squared
    pub steer_rate: f64,

    /// Change in throttle between steps squared
    pub throttle_rate: f64,
}

// ---------------------------------------------------------------------------
// ENUMERATIONS
// ---------------------------------------------------------------------------

/// What to send to the vehicle when a cycle fails.
#[derive(Deserialize, Debug, Clone, Copy, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum FallbackPolicy {
    /// Zero steering and throttle
    Neutral,

    /// Repeat the actuation from the telemetry, or neutral if there is none
    HoldPrevious,
}

// ---------------------------------------------------------------------------
// IMPLEMENTATIONS
// ---------------------------------------------------------------------------

impl Default for FallbackPolicy {
    fn default() -> Self {
        FallbackPolicy::Neutral
    }
}

impl Params {
    /// Check that the parameters describe a solvable problem.
    ///
    /// Returns a description of the first invalid parameter found.
    pub fn validate(&self) -> Result<(), String> {
        let mpc = &self.mpc;

        if self.poly_order < 1 {
            return Err(format!("poly_order must be at least 1, found {}", self.poly_order))
        }
        if mpc.horizon_steps < 1 {
            return Err(format!(
                "mpc.horizon_steps must be at least 1, found {}", mpc.horizon_steps
            ))
        }

        let positive = [
            ("mpc.dt_s", mpc.dt_s),
            ("mpc.lf_m", mpc.lf_m),
            ("mpc.max_steer_rad", mpc.max_steer_rad),
            ("mpc.max_throttle", mpc.max_throttle),
            ("mpc.max_solve_time_ms", mpc.max_solve_time_ms),
        ];
        for (name, value) in positive.iter() {
            if !(value.is_finite() && *value > 0.0) {
                return Err(format!("{} must be positive and finite, found {}", name, value))
            }
        }

        let w = &mpc.weights;
        let weights = [
            ("cte", w.cte),
            ("epsi", w.epsi),
            ("speed", w.speed),
            ("steer", w.steer),
            ("throttle", w.throttle),
            ("steer_rate", w.steer_rate),
            ("throttle_rate", w.throttle_rate),
        ];
        for (name, value) in weights.iter() {
            if !(value.is_finite() && *value >= 0.0) {
                return Err(format!(
                    "mpc.weights.{} must be non-negative and finite, found {}", name, value
                ))
            }
        }

        if self.latency_compensation && !(self.compensated_latency_s >= 0.0) {
            return Err(format!(
                "compensated_latency_s must be non-negative, found {}",
                self.compensated_latency_s
            ))
        }

        Ok(())
    }
}
