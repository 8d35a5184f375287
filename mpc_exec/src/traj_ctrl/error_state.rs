//! # Error state estimation
//!
//! Computes the cross track and heading errors of a vehicle sitting at the origin of its own body
//! frame, relative to the fitted reference curve.

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

// Internal
use super::mpc::{model, Control, VehicleState};
use super::params::MpcParams;

// ---------------------------------------------------------------------------
// DATA STRUCTURES
// ---------------------------------------------------------------------------

/// Tracking errors relative to the reference curve.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct ErrorState {
    /// Cross track error, the lateral offset of the curve from the vehicle. Positive when the
    /// curve is to the left of the vehicle.
    pub cte: f64,

    /// Heading error, the vehicle heading minus the tangent angle of the curve.
    ///
    /// Units: radians
    pub epsi: f64,
}

// ---------------------------------------------------------------------------
// ENUMERATIONS
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error, PartialEq)]
pub enum ErrorStateError {
    #[error("The reference curve needs at least 2 coefficients, found {0}")]
    TooFewCoefficients(usize),
}

// ---------------------------------------------------------------------------
// IMPLEMENTATIONS
// ---------------------------------------------------------------------------

impl ErrorState {
    /// Get the errors for a vehicle at the body frame origin with zero heading.
    ///
    /// `cte = f(0) - 0` and `epsi = 0 - atan(f'(0))`, which for ascending order coefficients are
    /// just `coeffs[0]` and `-atan(coeffs[1])`.
    pub fn from_curve(coeffs: &[f64]) -> Result<Self, ErrorStateError> {
        if coeffs.len() < 2 {
            return Err(ErrorStateError::TooFewCoefficients(coeffs.len()))
        }

        Ok(Self {
            cte: coeffs[0],
            epsi: -coeffs[1].atan()
        })
    }

    /// Build the initial vehicle state for the optimiser from these errors and the current speed.
    pub fn initial_state(&self, speed: f64) -> VehicleState {
        VehicleState {
            x: 0.0,
            y: 0.0,
            psi: 0.0,
            v: speed,
            cte: self.cte,
            epsi: self.epsi
        }
    }
}

// ---------------------------------------------------------------------------
// PUBLIC FUNCTIONS
// ---------------------------------------------------------------------------

/// Propagate a state forward by `latency_s` seconds while the previous control is still applied.
///
/// A non-positive latency returns the state unchanged.
pub fn predict_latency(
    state: &VehicleState,
    prev_control: &Control,
    coeffs: &[f64],
    latency_s: f64,
    params: &MpcParams
) -> VehicleState {
    if !(latency_s > 0.0) {
        return *state
    }

    let curve = model::Curve::new(coeffs);
    model::step(state, prev_control, &curve, latency_s, params.lf_m)
}

#[cfg(test)]
mod test {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_from_curve() {
        let coeffs = [1.25, -0.3, 0.01, 0.0005];
        let err = ErrorState::from_curve(&coeffs).unwrap();

        assert_eq!(err.cte, 1.25);
        assert_eq!(err.epsi, -(-0.3f64).atan());
    }

    #[test]
    fn test_straight_curve() {
        let err = ErrorState::from_curve(&[0.0, 0.0, 0.0]).unwrap();
        assert_eq!(err, ErrorState { cte: 0.0, epsi: 0.0 });

        let s = err.initial_state(12.0);
        assert_eq!(s.to_array(), [0.0, 0.0, 0.0, 12.0, 0.0, 0.0]);
    }

    #[test]
    fn test_too_few_coefficients() {
        assert_eq!(
            ErrorState::from_curve(&[1.0]),
            Err(ErrorStateError::TooFewCoefficients(1))
        );
    }

    #[test]
    fn test_predict_latency() {
        let params = MpcParams {
            lf_m: 2.67,
            ..Default::default()
        };
        let s = ErrorState::from_curve(&[0.0, 0.0]).unwrap().initial_state(10.0);
        let ctrl = Control { steer_rad: 0.0, accel: 1.0 };

        // No latency leaves the state alone
        assert_eq!(predict_latency(&s, &ctrl, &[0.0, 0.0], 0.0, &params), s);

        // Straight ahead along a straight road
        let p = predict_latency(&s, &ctrl, &[0.0, 0.0], 0.1, &params);
        assert_relative_eq!(p.x, 1.0, epsilon = 1e-12);
        assert_eq!(p.y, 0.0);
        assert_relative_eq!(p.v, 10.1, epsilon = 1e-12);
        assert_eq!(p.cte, 0.0);
        assert_eq!(p.epsi, 0.0);
    }
}
