//! # Model Predictive Controller
//!
//! Finds the actuation sequence over a short horizon which keeps a kinematic bicycle model on the
//! reference curve, minimising a weighted sum of tracking errors, speed error and actuation
//! effort. Only the first actuation of the optimal sequence is applied, the problem is solved
//! again from scratch on the next cycle.
//!
//! The solver sits behind the [`Solver`] trait so the rest of trajectory control can be run
//! against stub solvers.

// ---------------------------------------------------------------------------
// MODULES
// ---------------------------------------------------------------------------

pub mod model;
mod solver;

// ---------------------------------------------------------------------------
// EXPORTS
// ---------------------------------------------------------------------------

pub use solver::GaussNewtonSolver;
pub use super::params::{CostWeights, MpcParams};

// ---------------------------------------------------------------------------
// DATA STRUCTURES
// ---------------------------------------------------------------------------

/// State of the kinematic bicycle model, expressed in the vehicle body frame at the start of the
/// cycle.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct VehicleState {
    /// Longitudinal position
    ///
    /// Units: meters
    pub x: f64,

    /// Lateral position, positive left
    ///
    /// Units: meters
    pub y: f64,

    /// Heading, positive anticlockwise
    ///
    /// Units: radians
    pub psi: f64,

    /// Speed
    pub v: f64,

    /// Cross track error
    pub cte: f64,

    /// Heading error
    ///
    /// Units: radians
    pub epsi: f64,
}

/// A physical actuation pair.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Control {
    /// Steering angle, positive turns left
    ///
    /// Units: radians
    pub steer_rad: f64,

    /// Acceleration demand
    pub accel: f64,
}

/// The result of a successful solve.
#[derive(Debug, Clone)]
pub struct MpcSolution {
    /// The first actuation of the optimal sequence, in physical units.
    pub actuation: Control,

    /// The predicted states over the horizon, `states[0]` is the initial state.
    pub states: Vec<VehicleState>,

    /// Objective value of the solution
    pub cost: f64,

    /// Number of solver iterations used
    pub iterations: usize,

    /// Wall clock time taken by the solve
    ///
    /// Units: seconds
    pub solve_time_s: f64,

    /// True if the solve ended because the line search could make no further progress, rather
    /// than by meeting a convergence tolerance.
    pub stalled: bool,
}

// ---------------------------------------------------------------------------
// ENUMERATIONS
// ---------------------------------------------------------------------------

/// Errors which can occur during a solve.
#[derive(Debug, thiserror::Error, Clone, PartialEq)]
pub enum MpcError {
    #[error("The horizon is invalid: {0}")]
    InvalidHorizon(String),

    #[error("The reference curve has no coefficients")]
    EmptyCurve,

    #[error("The initial state is not finite: {0:?}")]
    NonFiniteState(VehicleState),

    #[error("The solver diverged after {iterations} iterations: {reason}")]
    Diverged {
        iterations: usize,
        reason: String
    },
}

// ---------------------------------------------------------------------------
// TRAITS
// ---------------------------------------------------------------------------

/// An optimiser for the trajectory tracking problem.
pub trait Solver {
    /// Solve the problem starting from `initial` along the curve with ascending order
    /// coefficients `coeffs`.
    ///
    /// `warm_start` is the actuation to seed the initial guess with, if any. It may only change
    /// how quickly the solver converges.
    fn solve(
        &self,
        initial: &VehicleState,
        coeffs: &[f64],
        params: &MpcParams,
        warm_start: Option<Control>
    ) -> Result<MpcSolution, MpcError>;
}

// ---------------------------------------------------------------------------
// IMPLEMENTATIONS
// ---------------------------------------------------------------------------

impl VehicleState {
    /// Number of elements in the state vector
    pub const LEN: usize = 6;

    /// Get the state as `[x, y, psi, v, cte, epsi]`.
    pub fn to_array(&self) -> [f64; 6] {
        [self.x, self.y, self.psi, self.v, self.cte, self.epsi]
    }

    /// Build a state from `[x, y, psi, v, cte, epsi]`.
    pub fn from_array(a: [f64; 6]) -> Self {
        Self {
            x: a[0],
            y: a[1],
            psi: a[2],
            v: a[3],
            cte: a[4],
            epsi: a[5]
        }
    }

    /// Returns true if every element is finite.
    pub fn is_finite(&self) -> bool {
        self.to_array().iter().all(|e| e.is_finite())
    }
}

impl MpcSolution {
    /// The predicted `(x, y)` positions for every state after the initial one.
    pub fn predicted_xy(&self) -> (Vec<f64>, Vec<f64>) {
        self.states.iter().skip(1).map(|s| (s.x, s.y)).unzip()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_state_array() {
        let a = [1.0, 2.0, 3.0, 4.0, 5.0, 6.0];
        let s = VehicleState::from_array(a);

        assert_eq!(s.psi, 3.0);
        assert_eq!(s.epsi, 6.0);
        assert_eq!(s.to_array(), a);
        assert!(s.is_finite());
        assert!(!VehicleState { v: f64::NAN, ..s }.is_finite());
    }

    #[test]
    fn test_predicted_xy() {
        let sol = MpcSolution {
            actuation: Control::default(),
            states: vec![
                VehicleState::default(),
                VehicleState { x: 1.0, y: 0.1, ..Default::default() },
                VehicleState { x: 2.0, y: 0.3, ..Default::default() },
            ],
            cost: 0.0,
            iterations: 0,
            solve_time_s: 0.0,
            stalled: false
        };

        assert_eq!(sol.predicted_xy(), (vec![1.0, 2.0], vec![0.1, 0.3]));
    }
}
