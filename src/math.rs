//! Numeric tolerance and epsilon-tolerant comparisons.
//!
//! All geometric and kinematic state lives in [`nalgebra::DVector<f64>`];
//! this module carries the shared tolerance used by equality tests,
//! force cutoffs and the collision search.

use nalgebra::DVector;

/// Small numeric tolerance for scalar equality, force cutoffs and
/// geometric checks.
pub const EPSILON: f64 = 1e-6;

/// Epsilon-tolerant scalar equality.
#[inline]
pub fn feq(a: f64, b: f64) -> bool {
    (a - b).abs() < EPSILON
}

/// Epsilon-tolerant vector equality. Vectors of different dimensions are
/// never equal.
pub fn vec_eq(a: &DVector<f64>, b: &DVector<f64>) -> bool {
    a.len() == b.len() && a.iter().zip(b.iter()).all(|(x, y)| feq(*x, *y))
}
