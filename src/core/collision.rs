use crate::error::{Error, Result};
use nalgebra::DVector;
use ordered_float::NotNan;

/// Coefficients `[d0, d1, d2]` of the squared distance between two lines
/// through `pos_a`/`pos_b` colinear to `dir_a`/`dir_b`:
///
/// ```text
/// dist²(t) = d0 + d1·t + d2·t²
/// d0 = |pos_a − pos_b|², d1 = 2·(pos_a − pos_b)·(dir_a − dir_b),
/// d2 = |dir_a − dir_b|²
/// ```
pub fn dist_poly(
    pos_a: &DVector<f64>,
    dir_a: &DVector<f64>,
    pos_b: &DVector<f64>,
    dir_b: &DVector<f64>,
) -> [f64; 3] {
    let dp = pos_a - pos_b;
    let dv = dir_a - dir_b;
    [dp.norm_squared(), 2.0 * dp.dot(&dv), dv.norm_squared()]
}

/// Evaluate a squared-distance polynomial at time `t`.
#[inline]
pub fn eval_dist_sq(poly: &[f64; 3], t: f64) -> f64 {
    poly[0] + t * poly[1] + t * t * poly[2]
}

/// Exact time of impact of two bounding spheres of radii `ra` and `rb`
/// whose center distance follows `poly`: the smaller root of
/// `dist²(t) = (ra + rb)²`.
///
/// The caller guarantees an approaching configuration (positive closest
/// approach time with penetrating minimal distance), which makes the
/// discriminant positive.
pub fn time_to_hit(ra: f64, rb: f64, poly: &[f64; 3]) -> f64 {
    let target = (ra + rb) * (ra + rb);
    let disc = poly[1] * poly[1] - 4.0 * poly[2] * (poly[0] - target);
    (-poly[1] - disc.sqrt()) / (2.0 * poly[2])
}

/// Result of a collision search: the ordered index pair of the colliding
/// particles and the sub-step time at which their bounding spheres touch.
///
/// Holds indices rather than references; the engine never removes
/// particles, so indices stay valid for the lifetime of the run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Collision {
    time: NotNan<f64>,
    first: usize,
    second: usize,
}

impl Collision {
    /// Build a collision result, validating that the time is finite and
    /// the pair ordered (`first < second`).
    pub fn new(time: f64, first: usize, second: usize) -> Result<Self> {
        if !time.is_finite() {
            return Err(Error::InvalidParam("collision time must be finite".into()));
        }
        let time = NotNan::new(time)
            .map_err(|_| Error::InvalidParam("collision time cannot be NaN".into()))?;
        if first >= second {
            return Err(Error::InvalidParam(format!(
                "collision pair must be ordered, got ({first}, {second})"
            )));
        }
        Ok(Self {
            time,
            first,
            second,
        })
    }

    /// Sub-step time of impact, relative to the start of the step that
    /// found it.
    #[inline]
    pub fn time(&self) -> f64 {
        self.time.into_inner()
    }

    /// Index of the earlier particle of the pair.
    #[inline]
    pub fn first(&self) -> usize {
        self.first
    }

    /// Index of the later particle of the pair.
    #[inline]
    pub fn second(&self) -> usize {
        self.second
    }

    /// Both indices as a tuple.
    #[inline]
    pub fn pair(&self) -> (usize, usize) {
        (self.first, self.second)
    }
}
