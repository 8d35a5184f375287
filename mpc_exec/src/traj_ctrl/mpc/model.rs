//! # Vehicle model and objective
//!
//! Kinematic bicycle model, its linearisation, and the objective written as a sum of weighted
//! squared residuals.
//!
//! The controls are stored as a single vector `u = [delta_0, a_0, delta_1, a_1, ...]` holding the
//! `N - 1` actuation pairs of an `N` state horizon. States are never free variables, they are
//! always obtained by rolling the model forward from the initial state.

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

// External
use nalgebra::{DMatrix, DVector};

// Internal
use super::{Control, MpcParams, VehicleState};
use util::maths::{poly_deriv, poly_val};

// ---------------------------------------------------------------------------
// CONSTANTS
// ---------------------------------------------------------------------------

/// Number of residuals per state (cte, epsi, speed)
const STATE_RESIDUALS: usize = 3;

/// Number of controls per actuation pair
pub const NUM_CONTROLS: usize = 2;

// ---------------------------------------------------------------------------
// DATA STRUCTURES
// ---------------------------------------------------------------------------

/// The reference curve together with its first and second derivatives.
#[derive(Debug, Clone)]
pub struct Curve {
    coeffs: Vec<f64>,
    d1: Vec<f64>,
    d2: Vec<f64>,
}

/// The objective evaluated at a control vector.
#[derive(Debug, Clone)]
pub struct Evaluation {
    /// The rolled out states, `states[0]` is the initial state
    pub states: Vec<VehicleState>,

    /// Weighted residuals, the objective is their squared norm
    pub residuals: DVector<f64>,

    /// Objective value
    pub cost: f64,
}

// ---------------------------------------------------------------------------
// IMPLEMENTATIONS
// ---------------------------------------------------------------------------

impl Curve {
    pub fn new(coeffs: &[f64]) -> Self {
        let d1 = poly_deriv(coeffs);
        let d2 = poly_deriv(&d1);

        Self {
            coeffs: coeffs.to_vec(),
            d1,
            d2
        }
    }

    /// Value of the curve at `x`
    pub fn f(&self, x: f64) -> f64 {
        poly_val(x, &self.coeffs)
    }

    /// Slope of the curve at `x`
    pub fn df(&self, x: f64) -> f64 {
        poly_val(x, &self.d1)
    }

    /// Second derivative of the curve at `x`
    pub fn d2f(&self, x: f64) -> f64 {
        poly_val(x, &self.d2)
    }
}

impl Evaluation {
    /// Gradient of the objective given the residual Jacobian, `2 J^T r`.
    pub fn gradient(&self, jacobian: &DMatrix<f64>) -> DVector<f64> {
        jacobian.transpose() * &self.residuals * 2.0
    }
}

// ---------------------------------------------------------------------------
// PUBLIC FUNCTIONS
// ---------------------------------------------------------------------------

/// Advance the model by one step of length `dt`.
///
/// ```text
/// x'    = x + v cos(psi) dt
/// y'    = y + v sin(psi) dt
/// psi'  = psi + (v / lf) delta dt
/// v'    = v + a dt
/// cte'  = (f(x) - y) + v sin(epsi) dt
/// epsi' = (psi - atan(f'(x))) + (v / lf) delta dt
/// ```
pub fn step(
    s: &VehicleState,
    u: &Control,
    curve: &Curve,
    dt: f64,
    lf: f64
) -> VehicleState {
    let (sin_psi, cos_psi) = s.psi.sin_cos();
    let yaw_inc = s.v / lf * u.steer_rad * dt;

    VehicleState {
        x: s.x + s.v * cos_psi * dt,
        y: s.y + s.v * sin_psi * dt,
        psi: s.psi + yaw_inc,
        v: s.v + u.accel * dt,
        cte: (curve.f(s.x) - s.y) + s.v * s.epsi.sin() * dt,
        epsi: (s.psi - curve.df(s.x).atan()) + yaw_inc
    }
}

/// Jacobians of [`step`] with respect to the state (6x6) and the control (6x2).
pub fn linearise(
    s: &VehicleState,
    u: &Control,
    curve: &Curve,
    dt: f64,
    lf: f64
) -> (DMatrix<f64>, DMatrix<f64>) {
    let (sin_psi, cos_psi) = s.psi.sin_cos();
    let (sin_epsi, cos_epsi) = s.epsi.sin_cos();
    let df = curve.df(s.x);
    let d2f = curve.d2f(s.x);

    let dyaw_dv = u.steer_rad * dt / lf;
    let dyaw_ddelta = s.v * dt / lf;

    #[rustfmt::skip]
    let a = DMatrix::from_row_slice(6, 6, &[
    //  x                       y     psi                   v                 cte  epsi
        1.0,                    0.0, -s.v * sin_psi * dt,   cos_psi * dt,     0.0, 0.0,
        0.0,                    1.0,  s.v * cos_psi * dt,   sin_psi * dt,     0.0, 0.0,
        0.0,                    0.0,  1.0,                  dyaw_dv,          0.0, 0.0,
        0.0,                    0.0,  0.0,                  1.0,              0.0, 0.0,
        df,                    -1.0,  0.0,                  sin_epsi * dt,    0.0, s.v * cos_epsi * dt,
        -d2f / (1.0 + df * df), 0.0,  1.0,                  dyaw_dv,          0.0, 0.0,
    ]);

    #[rustfmt::skip]
    let b = DMatrix::from_row_slice(6, 2, &[
    //  delta        a
        0.0,         0.0,
        0.0,         0.0,
        dyaw_ddelta, 0.0,
        0.0,         dt,
        0.0,         0.0,
        dyaw_ddelta, 0.0,
    ]);

    (a, b)
}

/// Get the actuation pair `t` out of a control vector.
pub fn control_at(u: &DVector<f64>, t: usize) -> Control {
    Control {
        steer_rad: u[NUM_CONTROLS * t],
        accel: u[NUM_CONTROLS * t + 1]
    }
}

/// Roll the model forward from `initial` applying the controls in `u`.
///
/// The first returned state is `initial` itself.
pub fn rollout(
    initial: &VehicleState,
    u: &DVector<f64>,
    curve: &Curve,
    params: &MpcParams
) -> Vec<VehicleState> {
    let num_steps = u.len() / NUM_CONTROLS;
    let mut states = Vec::with_capacity(num_steps + 1);
    states.push(*initial);

    for t in 0..num_steps {
        let next = step(&states[t], &control_at(u, t), curve, params.dt_s, params.lf_m);
        states.push(next);
    }

    states
}

/// Number of residuals in the objective for a horizon of `horizon_steps` states.
pub fn num_residuals(horizon_steps: usize) -> usize {
    STATE_RESIDUALS * horizon_steps
        + NUM_CONTROLS * horizon_steps.saturating_sub(1)
        + NUM_CONTROLS * horizon_steps.saturating_sub(2)
}

/// Evaluate the objective at the control vector `u`.
///
/// The residuals are laid out as the `(cte, epsi, v - v_ref)` of every state, then the
/// `(delta, a)` of every actuation, then the `(delta_{t+1} - delta_t, a_{t+1} - a_t)` of every
/// consecutive pair of actuations, each scaled by the square root of its weight.
pub fn evaluate(
    initial: &VehicleState,
    u: &DVector<f64>,
    curve: &Curve,
    params: &MpcParams
) -> Evaluation {
    let states = rollout(initial, u, curve, params);
    let w = Weights::from(params);
    let num_steps = u.len() / NUM_CONTROLS;

    let mut r = DVector::zeros(num_residuals(states.len()));
    let mut row = 0;

    for s in states.iter() {
        r[row] = w.cte * s.cte;
        r[row + 1] = w.epsi * s.epsi;
        r[row + 2] = w.speed * (s.v - params.ref_speed);
        row += STATE_RESIDUALS;
    }

    for t in 0..num_steps {
        r[row] = w.steer * u[NUM_CONTROLS * t];
        r[row + 1] = w.throttle * u[NUM_CONTROLS * t + 1];
        row += NUM_CONTROLS;
    }

    for t in 0..num_steps.saturating_sub(1) {
        let i = NUM_CONTROLS * t;
        r[row] = w.steer_rate * (u[i + 2] - u[i]);
        r[row + 1] = w.throttle_rate * (u[i + 3] - u[i + 1]);
        row += NUM_CONTROLS;
    }

    let cost = r.norm_squared();

    Evaluation {
        states,
        residuals: r,
        cost
    }
}

/// Jacobian of the residuals of [`evaluate`] with respect to the control vector.
///
/// The state sensitivities `S_t = ds_t/du` are propagated forward alongside the rollout,
/// `S_{t+1} = A_t S_t + B_t E_t`, where `E_t` selects the controls of step `t`.
pub fn jacobian(
    eval: &Evaluation,
    u: &DVector<f64>,
    curve: &Curve,
    params: &MpcParams
) -> DMatrix<f64> {
    let n = u.len();
    let num_steps = n / NUM_CONTROLS;
    let w = Weights::from(params);

    let mut jac = DMatrix::zeros(eval.residuals.len(), n);

    // The initial state is fixed so its sensitivity, and its rows in the Jacobian, are zero
    let mut sens = DMatrix::<f64>::zeros(VehicleState::LEN, n);

    for t in 0..num_steps {
        let (a, b) = linearise(
            &eval.states[t], &control_at(u, t), curve, params.dt_s, params.lf_m
        );

        sens = a * sens;
        for i in 0..VehicleState::LEN {
            sens[(i, NUM_CONTROLS * t)] += b[(i, 0)];
            sens[(i, NUM_CONTROLS * t + 1)] += b[(i, 1)];
        }

        let row = STATE_RESIDUALS * (t + 1);
        for j in 0..n {
            jac[(row, j)] = w.cte * sens[(StateIndex::Cte as usize, j)];
            jac[(row + 1, j)] = w.epsi * sens[(StateIndex::Epsi as usize, j)];
            jac[(row + 2, j)] = w.speed * sens[(StateIndex::V as usize, j)];
        }
    }

    let mut row = STATE_RESIDUALS * eval.states.len();

    for t in 0..num_steps {
        jac[(row, NUM_CONTROLS * t)] = w.steer;
        jac[(row + 1, NUM_CONTROLS * t + 1)] = w.throttle;
        row += NUM_CONTROLS;
    }

    for t in 0..num_steps.saturating_sub(1) {
        let i = NUM_CONTROLS * t;
        jac[(row, i)] = -w.steer_rate;
        jac[(row, i + 2)] = w.steer_rate;
        jac[(row + 1, i + 1)] = -w.throttle_rate;
        jac[(row + 1, i + 3)] = w.throttle_rate;
        row += NUM_CONTROLS;
    }

    jac
}

/// Lower and upper bounds on the control vector for a horizon of `num_steps` actuations.
pub fn bounds(num_steps: usize, params: &MpcParams) -> (DVector<f64>, DVector<f64>) {
    let upper = DVector::from_fn(NUM_CONTROLS * num_steps, |i, _| {
        if i % NUM_CONTROLS == 0 {
            params.max_steer_rad
        }
        else {
            params.max_throttle
        }
    });

    (-upper.clone(), upper)
}

/// Project a control vector onto the box `[lower, upper]`.
pub fn project(u: &DVector<f64>, lower: &DVector<f64>, upper: &DVector<f64>) -> DVector<f64> {
    DVector::from_fn(u.len(), |i, _| util::maths::clamp(u[i], lower[i], upper[i]))
}

// ---------------------------------------------------------------------------
// PRIVATE ITEMS
// ---------------------------------------------------------------------------

/// Square roots of the objective weights, which scale the residuals.
struct Weights {
    cte: f64,
    epsi: f64,
    speed: f64,
    steer: f64,
    throttle: f64,
    steer_rate: f64,
    throttle_rate: f64,
}

impl From<&MpcParams> for Weights {
    fn from(params: &MpcParams) -> Self {
        let w = &params.weights;

        Self {
            cte: w.cte.sqrt(),
            epsi: w.epsi.sqrt(),
            speed: w.speed.sqrt(),
            steer: w.steer.sqrt(),
            throttle: w.throttle.sqrt(),
            steer_rate: w.steer_rate.sqrt(),
            throttle_rate: w.throttle_rate.sqrt()
        }
    }
}

/// Positions of the elements of the state vector.
enum StateIndex {
    V = 3,
    Cte = 4,
    Epsi = 5,
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
            ..Default::default()
        }
    }

    /// A control vector which exercises both bounds and the interior.
    fn controls() -> DVector<f64> {
        DVector::from_fn(18, |i, _| {
            let phase = i as f64 * 0.7;
            if i % 2 == 0 { 0.4 * phase.sin() } else { 0.9 * phase.cos() }
        })
    }

    #[test]
    fn test_step_straight() {
        let curve = Curve::new(&[0.0, 0.0]);
        let s = VehicleState { v: 20.0, ..Default::default() };

        let n = step(&s, &Control { steer_rad: 0.0, accel: -2.0 }, &curve, 0.1, 2.67);

        assert_relative_eq!(n.x, 2.0, epsilon = 1e-12);
        assert_eq!(n.y, 0.0);
        assert_eq!(n.psi, 0.0);
        assert_relative_eq!(n.v, 19.8, epsilon = 1e-12);
        assert_eq!(n.cte, 0.0);
        assert_eq!(n.epsi, 0.0);
    }

    #[test]
    fn test_step_steering() {
        let curve = Curve::new(&[0.0, 0.0]);
        let s = VehicleState { v: 10.0, ..Default::default() };

        let n = step(&s, &Control { steer_rad: 0.267, accel: 0.0 }, &curve, 0.1, 2.67);

        // Positive steering turns left
        assert_relative_eq!(n.psi, 0.1, epsilon = 1e-12);
        assert_relative_eq!(n.epsi, 0.1, epsilon = 1e-12);
    }

    #[test]
    fn test_rollout_keeps_initial() {
        let p = params();
        let curve = Curve::new(&[0.5, -0.1, 0.02, -0.001]);
        let initial = VehicleState {
            v: 15.0, cte: 0.5, epsi: 0.1f64.atan(), ..Default::default()
        };

        let states = rollout(&initial, &controls(), &curve, &p);

        assert_eq!(states.len(), 10);
        assert_eq!(states[0], initial);
    }

    #[test]
    fn test_num_residuals() {
        assert_eq!(num_residuals(1), 3);
        assert_eq!(num_residuals(2), 8);
        assert_eq!(num_residuals(10), 30 + 18 + 16);
    }

    #[test]
    fn test_cost_terms() {
        let p = params();
        let curve = Curve::new(&[0.0, 0.0]);
        let initial = VehicleState { v: 58.0, cte: 0.1, ..Default::default() };
        let u = DVector::zeros(2);

        let eval = evaluate(&initial, &u, &curve, &MpcParams { horizon_steps: 2, ..p });

        // Initial state: 2000 * 0.1^2 + 1 * 2^2, the next state sits on the curve with the same
        // speed so only the speed term remains
        assert_eq!(eval.states.len(), 2);
        assert_relative_eq!(eval.states[1].cte, 0.0);
        assert_relative_eq!(eval.cost, 20.0 + 4.0 + 4.0, epsilon = 1e-9);
    }

    #[test]
    fn test_gradient_matches_finite_difference() {
        let p = params();
        let curve = Curve::new(&[0.5, -0.1, 0.02, -0.001]);
        let initial = VehicleState {
            v: 15.0, cte: 0.5, epsi: 0.1f64.atan(), ..Default::default()
        };
        let u = controls();

        let eval = evaluate(&initial, &u, &curve, &p);
        let grad = eval.gradient(&jacobian(&eval, &u, &curve, &p));

        let h = 1e-6;
        for i in 0..u.len() {
            let mut up = u.clone();
            let mut um = u.clone();
            up[i] += h;
            um[i] -= h;

            let fd = (evaluate(&initial, &up, &curve, &p).cost
                - evaluate(&initial, &um, &curve, &p).cost) / (2.0 * h);

            assert_relative_eq!(grad[i], fd, epsilon = 1e-3, max_relative = 1e-5);
        }
    }

    #[test]
    fn test_projection() {
        let p = params();
        let (lower, upper) = bounds(2, &p);
        let u = DVector::from_vec(vec![1.0, -3.0, -0.1, 0.5]);

        let pu = project(&u, &lower, &upper);

        assert_eq!(pu, DVector::from_vec(vec![0.436332, -1.0, -0.1, 0.5]));
    }
}
