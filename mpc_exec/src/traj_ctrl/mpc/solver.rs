//! # Projected Gauss-Newton solver
//!
//! Solves the box constrained least squares problem over the control vector. Each iteration:
//!
//! 1. Linearise the residuals about the current controls by propagating state sensitivities
//!    through the rollout.
//! 2. Split the controls into those held at a bound by the gradient and the free ones.
//! 3. Take a damped Gauss-Newton step in the free controls, solving
//!    `(H_FF + mu diag(H_FF)) d_F = -g_F` with `H = 2 J^T J` by Cholesky factorisation.
//! 4. Backtrack along the projection of the step onto the bounds until the Armijo condition
//!    holds.
//!
//! The states are eliminated by forward rollout, so every iterate is dynamically feasible and
//! the first state is always exactly the initial state.

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

// External
use log::{debug, trace};
use nalgebra::{DMatrix, DVector};
use std::time::Instant;

// Internal
use super::model::{self, Curve, Evaluation, NUM_CONTROLS};
use super::{Control, MpcError, MpcParams, MpcSolution, Solver, VehicleState};

// ---------------------------------------------------------------------------
// DATA STRUCTURES
// ---------------------------------------------------------------------------

/// Projected Gauss-Newton solver for the tracking problem.
#[derive(Debug, Clone)]
pub struct GaussNewtonSolver {
    /// Initial Levenberg damping, relative to the diagonal of the Hessian approximation.
    pub damping: f64,

    /// Number of times the damping is increased by 10x if the damped Hessian can't be factorised.
    pub max_damping_increases: usize,

    /// Sufficient decrease parameter of the Armijo condition.
    pub armijo: f64,

    /// Smallest step length tried by the line search before the solve is considered stalled.
    pub min_step: f64,

    /// Width of the band next to a bound in which a control is considered to be on it.
    pub bound_band: f64,
}

/// Outcome of one line search.
enum LineSearch {
    Accepted(DVector<f64>, Evaluation),
    Stalled,
}

// ---------------------------------------------------------------------------
// IMPLEMENTATIONS
// ---------------------------------------------------------------------------

impl Default for GaussNewtonSolver {
    fn default() -> Self {
        Self {
            damping: 1e-6,
            max_damping_increases: 12,
            armijo: 1e-4,
            min_step: 1e-10,
            bound_band: 1e-3
        }
    }
}

impl Solver for GaussNewtonSolver {
    fn solve(
        &self,
        initial: &VehicleState,
        coeffs: &[f64],
        params: &MpcParams,
        warm_start: Option<Control>
    ) -> Result<MpcSolution, MpcError> {
        let start = Instant::now();

        check_problem(initial, coeffs, params)?;

        let curve = Curve::new(coeffs);
        let num_steps = params.horizon_steps - 1;

        let (lower, upper) = model::bounds(num_steps, params);

        // Initial guess, the warm start actuation held over the horizon or zero
        let u0 = match warm_start {
            Some(c) if c.steer_rad.is_finite() && c.accel.is_finite() => {
                DVector::from_fn(NUM_CONTROLS * num_steps, |i, _| {
                    if i % NUM_CONTROLS == 0 { c.steer_rad } else { c.accel }
                })
            },
            _ => DVector::zeros(NUM_CONTROLS * num_steps)
        };
        let mut u = model::project(&u0, &lower, &upper);
        let mut eval = model::evaluate(initial, &u, &curve, params);

        if !eval.cost.is_finite() {
            return Err(diverged(0, "the initial cost is not finite"))
        }

        for iter in 0..=params.max_iterations {
            let jac = model::jacobian(&eval, &u, &curve, params);
            let grad = eval.gradient(&jac);

            if grad.iter().any(|g| !g.is_finite()) {
                return Err(diverged(iter, "the gradient is not finite"))
            }

            // Converged if a unit projected gradient step doesn't move the controls
            let pg = model::project(&(&u - &grad), &lower, &upper) - &u;
            let pg_norm = pg.iter().fold(0f64, |m, e| m.max(e.abs()));

            trace!("MPC iter {}: cost = {}, |pg| = {}", iter, eval.cost, pg_norm);

            if pg_norm <= params.grad_tolerance {
                return Ok(solution(u, eval, iter, start, false))
            }

            if iter == params.max_iterations {
                return Err(diverged(
                    iter,
                    &format!("iteration budget exhausted with |pg| = {}", pg_norm)
                ))
            }

            if elapsed_ms(start) > params.max_solve_time_ms {
                return Err(diverged(
                    iter,
                    &format!("time budget of {} ms exhausted", params.max_solve_time_ms)
                ))
            }

            let hess = jac.transpose() * &jac * 2.0;
            let dir = self.direction(&u, &grad, &hess, &lower, &upper, pg_norm);

            let (u_new, eval_new) = match self.line_search(
                initial, &u, &dir, &grad, &eval, &lower, &upper, &curve, params
            ) {
                LineSearch::Accepted(u_new, eval_new) => (u_new, eval_new),
                LineSearch::Stalled => {
                    debug!(
                        "MPC line search stalled after {} iterations with |pg| = {}, accepting",
                        iter, pg_norm
                    );
                    return Ok(solution(u, eval, iter, start, true))
                }
            };

            let cost_change = (eval.cost - eval_new.cost).abs();
            let converged = cost_change <= params.cost_tolerance * eval.cost.abs().max(1.0);

            u = u_new;
            eval = eval_new;

            if converged {
                return Ok(solution(u, eval, iter + 1, start, false))
            }
        }

        // The loop always returns on its final iteration
        Err(diverged(params.max_iterations, "iteration budget exhausted"))
    }
}

impl GaussNewtonSolver {
    /// Compute the search direction.
    ///
    /// Controls on a bound with the gradient pushing them outwards take a scaled gradient step,
    /// which the projection then cancels. The remaining controls take a damped Gauss-Newton step.
    fn direction(
        &self,
        u: &DVector<f64>,
        grad: &DVector<f64>,
        hess: &DMatrix<f64>,
        lower: &DVector<f64>,
        upper: &DVector<f64>,
        pg_norm: f64
    ) -> DVector<f64> {
        let n = u.len();
        let band = self.bound_band.min(pg_norm);

        let mut dir = DVector::zeros(n);
        let mut free = Vec::with_capacity(n);

        for i in 0..n {
            let at_lower = u[i] <= lower[i] + band && grad[i] > 0.0;
            let at_upper = u[i] >= upper[i] - band && grad[i] < 0.0;

            if at_lower || at_upper {
                dir[i] = -grad[i] / hess[(i, i)].max(f64::EPSILON);
            }
            else {
                free.push(i);
            }
        }

        if free.is_empty() {
            return dir
        }

        let rhs = DVector::from_fn(free.len(), |a, _| -grad[free[a]]);
        let mut damping = self.damping;

        for _ in 0..=self.max_damping_increases {
            let h_ff = DMatrix::from_fn(free.len(), free.len(), |a, b| {
                let h = hess[(free[a], free[b])];
                if a == b {
                    h * (1.0 + damping) + f64::EPSILON
                }
                else {
                    h
                }
            });

            if let Some(chol) = h_ff.cholesky() {
                let d_free = chol.solve(&rhs);
                for (a, &i) in free.iter().enumerate() {
                    dir[i] = d_free[a];
                }
                return dir
            }

            damping *= 10.0;
        }

        // Couldn't factorise even with heavy damping, use a scaled gradient step instead
        for &i in free.iter() {
            dir[i] = -grad[i] / hess[(i, i)].max(f64::EPSILON);
        }

        dir
    }

    /// Backtrack along the projected arc `P(u + step * dir)` until the Armijo condition holds.
    #[allow(clippy::too_many_arguments)]
    fn line_search(
        &self,
        initial: &VehicleState,
        u: &DVector<f64>,
        dir: &DVector<f64>,
        grad: &DVector<f64>,
        eval: &Evaluation,
        lower: &DVector<f64>,
        upper: &DVector<f64>,
        curve: &Curve,
        params: &MpcParams
    ) -> LineSearch {
        let mut step = 1.0;

        while step >= self.min_step {
            let u_new = model::project(&(u + dir * step), lower, upper);
            let eval_new = model::evaluate(initial, &u_new, curve, params);

            let decrease = grad.dot(&(&u_new - u));

            if eval_new.cost.is_finite()
                && eval_new.cost <= eval.cost + self.armijo * decrease
            {
                return LineSearch::Accepted(u_new, eval_new)
            }

            step *= 0.5;
        }

        LineSearch::Stalled
    }
}

// ---------------------------------------------------------------------------
// PRIVATE FUNCTIONS
// ---------------------------------------------------------------------------

fn check_problem(
    initial: &VehicleState,
    coeffs: &[f64],
    params: &MpcParams
) -> Result<(), MpcError> {
    if params.horizon_steps < 1 {
        return Err(MpcError::InvalidHorizon(format!(
            "at least 1 step is required, found {}", params.horizon_steps
        )))
    }
    if !(params.dt_s > 0.0 && params.dt_s.is_finite()) {
        return Err(MpcError::InvalidHorizon(format!(
            "the step must be positive, found {} s", params.dt_s
        )))
    }
    if coeffs.is_empty() {
        return Err(MpcError::EmptyCurve)
    }
    if !initial.is_finite() {
        return Err(MpcError::NonFiniteState(*initial))
    }

    Ok(())
}

fn solution(
    u: DVector<f64>,
    eval: Evaluation,
    iterations: usize,
    start: Instant,
    stalled: bool
) -> MpcSolution {
    // A single state horizon has no actuations, so hold still
    let actuation = if u.len() >= NUM_CONTROLS {
        model::control_at(&u, 0)
    }
    else {
        Control::default()
    };

    MpcSolution {
        actuation,
        states: eval.states,
        cost: eval.cost,
        iterations,
        solve_time_s: start.elapsed().as_secs_f64(),
        stalled
    }
}

fn diverged(iterations: usize, reason: &str) -> MpcError {
    MpcError::Diverged {
        iterations,
        reason: reason.into()
    }
}

fn elapsed_ms(start: Instant) -> f64 {
    start.elapsed().as_secs_f64() * 1000.0
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::traj_ctrl::mpc::CostWeights;
    use approx::assert_relative_eq;

    fn params() -> MpcParams {
        MpcParams {
            horizon_steps: 10,
            dt_s: 0.1,
            lf_m: 2.67,
            ref_speed: 60.0,
            max_steer_rad: 0.436332,
            max_throttle: 1.0,
            weights: CostWeights {
                cte: 2000.0,
                epsi: 2000.0,
                speed: 1.0,
                steer: 5.0,
                throttle: 5.0,
                steer_rate: 200.0,
                throttle_rate: 10.0
            },
            max_iterations: 200,
            max_solve_time_ms: 10_000.0,
            grad_tolerance: 1e-6,
            cost_tolerance: 1e-12,
            warm_start: true
        }
    }

    fn initial(speed: f64, coeffs: &[f64]) -> VehicleState {
        VehicleState {
            v: speed,
            cte: coeffs[0],
            epsi: -coeffs[1].atan(),
            ..Default::default()
        }
    }

    #[test]
    fn test_trivial() {
        let coeffs = [0.0, 0.0, 0.0, 0.0];
        let s0 = initial(60.0, &coeffs);

        let sol = GaussNewtonSolver::default().solve(&s0, &coeffs, &params(), None).unwrap();

        assert_relative_eq!(sol.actuation.steer_rad, 0.0, epsilon = 1e-6);
        assert_relative_eq!(sol.actuation.accel, 0.0, epsilon = 1e-6);
        assert_eq!(sol.states.len(), 10);
        assert_relative_eq!(sol.cost, 0.0, epsilon = 1e-9);
        assert!(!sol.stalled);
    }

    #[test]
    fn test_first_state_fixed() {
        let coeffs = [1.5, -0.05, 0.003, -2e-5];
        let s0 = initial(40.0, &coeffs);

        let sol = GaussNewtonSolver::default().solve(&s0, &coeffs, &params(), None).unwrap();

        assert_eq!(sol.states[0], s0);
        assert_eq!(sol.predicted_xy().0.len(), 9);
        assert!(sol.actuation.steer_rad.abs() <= 0.436332);
        assert!(sol.actuation.accel.abs() <= 1.0);
        assert!(sol.cost.is_finite());
    }

    #[test]
    fn test_left_offset_steers_left() {
        let coeffs = [1.0, 0.0, 0.0, 0.0];
        let p = MpcParams {
            ref_speed: 10.0,
            ..params()
        };

        let sol = GaussNewtonSolver::default()
            .solve(&initial(10.0, &coeffs), &coeffs, &p, None)
            .unwrap();

        assert!(sol.actuation.steer_rad > 0.0, "steering was {}", sol.actuation.steer_rad);

        // And the mirrored problem steers right
        let coeffs = [-1.0, 0.0, 0.0, 0.0];
        let sol = GaussNewtonSolver::default()
            .solve(&initial(10.0, &coeffs), &coeffs, &p, None)
            .unwrap();

        assert!(sol.actuation.steer_rad < 0.0, "steering was {}", sol.actuation.steer_rad);
    }

    #[test]
    fn test_zero_iteration_budget() {
        let coeffs = [1.0, 0.0, 0.0, 0.0];
        let p = MpcParams {
            max_iterations: 0,
            ..params()
        };

        match GaussNewtonSolver::default().solve(&initial(10.0, &coeffs), &coeffs, &p, None) {
            Err(MpcError::Diverged { iterations: 0, .. }) => (),
            r => panic!("Expected divergence, got {:?}", r),
        }
    }

    #[test]
    fn test_time_budget() {
        let coeffs = [1.0, 0.0, 0.0, 0.0];
        let p = MpcParams {
            max_solve_time_ms: 1e-9,
            ..params()
        };

        match GaussNewtonSolver::default().solve(&initial(10.0, &coeffs), &coeffs, &p, None) {
            Err(MpcError::Diverged { iterations: 0, reason }) => {
                assert!(reason.contains("time budget"), "reason was {}", reason)
            },
            r => panic!("Expected divergence, got {:?}", r),
        }
    }

    #[test]
    fn test_stalled_line_search() {
        // No step length is ever tried, so the first line search stalls
        let solver = GaussNewtonSolver {
            min_step: 2.0,
            ..Default::default()
        };
        let coeffs = [1.0, 0.0, 0.0, 0.0];
        let s0 = initial(10.0, &coeffs);

        let sol = solver.solve(&s0, &coeffs, &params(), None).unwrap();

        assert!(sol.stalled);
        assert_eq!(sol.iterations, 0);
        assert_eq!(sol.actuation, Control::default());
        assert_eq!(sol.states[0], s0);
    }

    #[test]
    fn test_warm_start_same_solution() {
        let coeffs = [0.2, 0.01, 0.001, 0.0];
        let s0 = initial(55.0, &coeffs);
        let solver = GaussNewtonSolver::default();

        let cold = solver.solve(&s0, &coeffs, &params(), None).unwrap();
        let warm = solver.solve(&s0, &coeffs, &params(), Some(cold.actuation)).unwrap();

        assert_relative_eq!(cold.cost, warm.cost, max_relative = 1e-3);
        assert_relative_eq!(
            cold.actuation.steer_rad, warm.actuation.steer_rad, epsilon = 1e-3
        );
    }

    #[test]
    fn test_single_state_horizon() {
        let coeffs = [0.5, 0.1];
        let s0 = initial(20.0, &coeffs);
        let p = MpcParams {
            horizon_steps: 1,
            ..params()
        };

        let sol = GaussNewtonSolver::default().solve(&s0, &coeffs, &p, None).unwrap();

        assert_eq!(sol.actuation, Control::default());
        assert_eq!(sol.states, vec![s0]);
        assert_eq!(sol.iterations, 0);
        assert!(sol.predicted_xy().0.is_empty());
    }

    #[test]
    fn test_invalid_problems() {
        let solver = GaussNewtonSolver::default();
        let s0 = initial(10.0, &[0.0, 0.0]);

        let p = MpcParams { horizon_steps: 0, ..params() };
        assert!(matches!(
            solver.solve(&s0, &[0.0, 0.0], &p, None),
            Err(MpcError::InvalidHorizon(_))
        ));

        let p = MpcParams { dt_s: 0.0, ..params() };
        assert!(matches!(
            solver.solve(&s0, &[0.0, 0.0], &p, None),
            Err(MpcError::InvalidHorizon(_))
        ));

        assert_eq!(solver.solve(&s0, &[], &params(), None).unwrap_err(), MpcError::EmptyCurve);

        let bad = VehicleState { v: f64::NAN, ..s0 };
        assert!(matches!(
            solver.solve(&bad, &[0.0, 0.0], &params(), None),
            Err(MpcError::NonFiniteState(_))
        ));
    }
}
