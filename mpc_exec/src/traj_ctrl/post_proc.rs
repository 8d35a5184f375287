//! # Actuation post processing
//!
//! Converts the physical actuation from the optimiser into the normalised demands understood by
//! the simulator, and back again.

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

// Internal
use super::mpc::Control;
use super::Params;
use util::maths::{clamp, lin_map};

// ---------------------------------------------------------------------------
// DATA STRUCTURES
// ---------------------------------------------------------------------------

/// Normalised actuator demands.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Actuation {
    /// Steering demand in [-1, 1]
    pub steering: f64,

    /// Throttle demand in [-1, 1], negative values brake
    pub throttle: f64,
}

// ---------------------------------------------------------------------------
// PUBLIC FUNCTIONS
// ---------------------------------------------------------------------------

/// Normalise the optimiser's actuation and apply the braking override.
///
/// Returns the actuation and whether or not the braking override was applied. Non-finite inputs
/// are replaced by zero.
pub fn post_process(control: &Control, params: &Params) -> (Actuation, bool) {
    let mpc = &params.mpc;

    let mut steering = normalise(control.steer_rad, mpc.max_steer_rad);
    if params.invert_steering {
        steering = -steering;
    }

    let mut throttle = normalise(control.accel, mpc.max_throttle);

    let brake = steering.abs() > params.brake_steer_threshold
        && mpc.ref_speed > params.brake_ref_speed_cutoff;

    if brake {
        throttle = clamp(throttle * params.brake_factor, -1.0, 1.0);
    }

    (Actuation { steering, throttle }, brake)
}

/// Convert normalised demands, as reported back in telemetry, into a physical actuation.
///
/// This undoes the normalisation and steering inversion of [`post_process`], but not the braking
/// override. Non-finite demands are replaced by zero.
pub fn to_physical(steering: f64, throttle: f64, params: &Params) -> Control {
    let mpc = &params.mpc;

    let mut steering = finite_or_zero(clamp(steering, -1.0, 1.0));
    if params.invert_steering {
        steering = -steering;
    }

    Control {
        steer_rad: lin_map((-1.0, 1.0), (-mpc.max_steer_rad, mpc.max_steer_rad), steering),
        accel: lin_map(
            (-1.0, 1.0),
            (-mpc.max_throttle, mpc.max_throttle),
            finite_or_zero(clamp(throttle, -1.0, 1.0))
        )
    }
}

// ---------------------------------------------------------------------------
// PRIVATE FUNCTIONS
// ---------------------------------------------------------------------------

/// Map `[-max, max]` onto `[-1, 1]`, clamping anything outside.
fn normalise(value: f64, max: f64) -> f64 {
    finite_or_zero(clamp(lin_map((-max, max), (-1.0, 1.0), value), -1.0, 1.0))
}

fn finite_or_zero(value: f64) -> f64 {
    if value.is_finite() {
        value
    }
    else {
        0.0
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use approx::assert_relative_eq;

    fn params() -> Params {
        let mut p = Params::default();
        p.mpc.max_steer_rad = 0.436332;
        p.mpc.max_throttle = 1.0;
        p.mpc.ref_speed = 80.0;
        p.brake_steer_threshold = 0.1;
        p.brake_ref_speed_cutoff = 60.0;
        p.brake_factor = -0.0005;
        p
    }

    #[test]
    fn test_normalisation() {
        let p = params();

        let (act, brake) = post_process(&Control { steer_rad: 0.0218166, accel: 0.5 }, &p);

        assert_relative_eq!(act.steering, 0.05, epsilon = 1e-12);
        assert_relative_eq!(act.throttle, 0.5, epsilon = 1e-12);
        assert!(!brake);
    }

    #[test]
    fn test_clamping() {
        let p = params();

        let (act, _) = post_process(&Control { steer_rad: -2.0, accel: 0.0 }, &p);
        assert_eq!(act.steering, -1.0);

        let (act, _) = post_process(&Control { steer_rad: 0.0, accel: 7.0 }, &p);
        assert_eq!(act.throttle, 1.0);

        let (act, _) = post_process(&Control { steer_rad: f64::NAN, accel: f64::INFINITY }, &p);
        assert_eq!(act, Actuation { steering: 0.0, throttle: 1.0 });
    }

    #[test]
    fn test_inversion() {
        let mut p = params();
        p.invert_steering = true;

        let (act, _) = post_process(&Control { steer_rad: 0.218166, accel: 0.0 }, &p);
        assert_relative_eq!(act.steering, -0.5, epsilon = 1e-12);

        let c = to_physical(act.steering, 0.25, &p);
        assert_relative_eq!(c.steer_rad, 0.218166, epsilon = 1e-12);
        assert_relative_eq!(c.accel, 0.25, epsilon = 1e-12);
    }

    #[test]
    fn test_brake_override() {
        let p = params();

        // Sharp turn at a high reference speed
        let (act, brake) = post_process(&Control { steer_rad: 0.3, accel: 0.8 }, &p);
        assert!(brake);
        assert_relative_eq!(act.throttle, 0.8 * -0.0005, epsilon = 1e-15);

        // Same every time
        assert_eq!(post_process(&Control { steer_rad: 0.3, accel: 0.8 }, &p), (act, brake));
    }

    #[test]
    fn test_brake_override_inactive() {
        // Gentle steering
        let p = params();
        let (act, brake) = post_process(&Control { steer_rad: 0.02, accel: 0.8 }, &p);
        assert!(!brake);
        assert_relative_eq!(act.throttle, 0.8, epsilon = 1e-12);

        // Reference speed at the cutoff
        let mut p = params();
        p.mpc.ref_speed = 60.0;
        let (act, brake) = post_process(&Control { steer_rad: 0.3, accel: 0.8 }, &p);
        assert!(!brake);
        assert_relative_eq!(act.throttle, 0.8, epsilon = 1e-12);
    }

    #[test]
    fn test_to_physical_non_finite() {
        let c = to_physical(f64::NAN, 3.0, &params());
        assert_eq!(c, Control { steer_rad: 0.0, accel: 1.0 });
    }
}
