//! Utility maths functions

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

use num_traits::Float;

/// Map a value from one range into another.
pub fn lin_map<T>(source_range: (T, T), target_range: (T, T), value: T) -> T
where
    T: Float
{
    target_range.0
        + ((value - source_range.0)
        * (target_range.1 - target_range.0)
        / (source_range.1 - source_range.0))
}

/// Evaluate a polynomial at `value`.
///
/// The coefficients are in ascending order of power, i.e. `coeffs[i]`
/// multiplies `value^i`. An empty coefficient list evaluates to zero.
pub fn poly_val<T>(value: T, coeffs: &[T]) -> T
where
    T: Float
{
    // Horner's scheme, starting from the highest power
    coeffs
        .iter()
        .rev()
        .fold(T::zero(), |acc, &c| acc * value + c)
}

/// Get the coefficients of the derivative of a polynomial.
///
/// Both input and output coefficients are in ascending order of power. The
/// derivative of a constant (or empty) polynomial is the empty polynomial.
pub fn poly_deriv<T>(coeffs: &[T]) -> Vec<T>
where
    T: Float
{
    coeffs
        .iter()
        .enumerate()
        .skip(1)
        .map(|(i, &c)| c * T::from(i).unwrap_or_else(T::nan))
        .collect()
}

/// Clamp a value into the range `[min, max]`.
///
/// Unlike `f64::clamp` this will not panic if `min > max`, instead `max` takes
/// priority.
pub fn clamp<T>(value: T, min: T, max: T) -> T
where
    T: Float
{
    let mut ret = value;

    if ret < min {
        ret = min
    }
    if ret > max {
        ret = max
    }

    ret
}
