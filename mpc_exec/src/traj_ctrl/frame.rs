//! # Frame transformations
//!
//! Conversion of waypoints between the global (map) frame and the vehicle body frame. The body
//! frame is centred on the vehicle with +x pointing forward and +y to the left.

// ---------------------------------------------------------------------------
// ENUMERATIONS
// ---------------------------------------------------------------------------

/// Errors which can occur during a frame transformation.
#[derive(Debug, thiserror::Error, PartialEq)]
pub enum FrameError {
    #[error("Expected the same number of x and y coordinates, found {0} x and {1} y")]
    LengthMismatch(usize, usize),
}

// ---------------------------------------------------------------------------
// PUBLIC FUNCTIONS
// ---------------------------------------------------------------------------

/// Transform global frame points into the body frame of a vehicle at `(px, py)` with heading
/// `psi` (radians).
///
/// Points are translated by `(-px, -py)` and then rotated by `-psi`. The order of the points is
/// preserved.
pub fn to_body_frame(
    global_x: &[f64],
    global_y: &[f64],
    px: f64,
    py: f64,
    psi: f64
) -> Result<(Vec<f64>, Vec<f64>), FrameError> {
    check_lengths(global_x, global_y)?;

    let (sin_psi, cos_psi) = psi.sin_cos();

    Ok(global_x
        .iter()
        .zip(global_y.iter())
        .map(|(gx, gy)| {
            let dx = gx - px;
            let dy = gy - py;
            (
                dx * cos_psi + dy * sin_psi,
                dy * cos_psi - dx * sin_psi
            )
        })
        .unzip())
}

/// Transform body frame points back into the global frame, the inverse of [`to_body_frame`].
pub fn to_global_frame(
    local_x: &[f64],
    local_y: &[f64],
    px: f64,
    py: f64,
    psi: f64
) -> Result<(Vec<f64>, Vec<f64>), FrameError> {
    check_lengths(local_x, local_y)?;

    let (sin_psi, cos_psi) = psi.sin_cos();

    Ok(local_x
        .iter()
        .zip(local_y.iter())
        .map(|(lx, ly)| {
            (
                lx * cos_psi - ly * sin_psi + px,
                lx * sin_psi + ly * cos_psi + py
            )
        })
        .unzip())
}

// ---------------------------------------------------------------------------
// PRIVATE FUNCTIONS
// ---------------------------------------------------------------------------

fn check_lengths(x: &[f64], y: &[f64]) -> Result<(), FrameError> {
    if x.len() != y.len() {
        return Err(FrameError::LengthMismatch(x.len(), y.len()))
    }

    Ok(())
}

#[cfg(test)]
mod test {
    use super::*;
    use approx::assert_relative_eq;
    use std::f64::consts::FRAC_PI_2;

    #[test]
    fn test_own_position_is_origin() {
        let (lx, ly) = to_body_frame(&[12.5], &[-3.0], 12.5, -3.0, 0.7).unwrap();

        assert_eq!(lx, vec![0.0]);
        assert_eq!(ly, vec![0.0]);
    }

    #[test]
    fn test_rotation() {
        // Vehicle facing +y, a point further along +y is straight ahead and a point at +x is on
        // the vehicle's right
        let (lx, ly) = to_body_frame(&[1.0, 2.0], &[5.0, 1.0], 1.0, 1.0, FRAC_PI_2).unwrap();

        assert_relative_eq!(lx[0], 4.0, epsilon = 1e-12);
        assert_relative_eq!(ly[0], 0.0, epsilon = 1e-12);
        assert_relative_eq!(lx[1], 0.0, epsilon = 1e-12);
        assert_relative_eq!(ly[1], -1.0, epsilon = 1e-12);
    }

    #[test]
    fn test_invertible() {
        let gx = vec![-32.16173, -43.49173, -61.09, -78.29172, -93.05002, -107.7717];
        let gy = vec![113.361, 105.941, 92.88499, 78.73102, 65.34102, 50.57938];
        let (px, py, psi) = (-40.62, 108.73, 3.733651);

        let (lx, ly) = to_body_frame(&gx, &gy, px, py, psi).unwrap();
        assert_eq!(lx.len(), gx.len());

        let (rx, ry) = to_global_frame(&lx, &ly, px, py, psi).unwrap();

        for i in 0..gx.len() {
            assert_relative_eq!(rx[i], gx[i], epsilon = 1e-9);
            assert_relative_eq!(ry[i], gy[i], epsilon = 1e-9);
        }
    }

    #[test]
    fn test_length_mismatch() {
        assert_eq!(
            to_body_frame(&[1.0, 2.0], &[1.0], 0.0, 0.0, 0.0),
            Err(FrameError::LengthMismatch(2, 1))
        );
    }
}
