use crate::codec::{self, Tokens};
use crate::error::{Error, Result};
use crate::math::vec_eq;
use nalgebra::DVector;
use serde_json::{json, Value};
use std::fmt;
use std::io::Write;

/// Kind of geometric body carried by a particle.
///
/// The discriminant values are the `_type` codes of the persisted formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShapeKind {
    /// Axis-aligned box spanned by the axes.
    Facoid,
    /// Ellipsoid with the axes as principal diameters.
    Spheroid,
    /// Simplex spanned by the axes.
    Pyramidoid,
}

impl ShapeKind {
    /// Persisted integer code.
    #[inline]
    pub fn code(self) -> u8 {
        match self {
            ShapeKind::Facoid => 0,
            ShapeKind::Spheroid => 1,
            ShapeKind::Pyramidoid => 2,
        }
    }

    /// Decode a persisted integer code.
    pub fn from_code(code: u8) -> Result<Self> {
        match code {
            0 => Ok(ShapeKind::Facoid),
            1 => Ok(ShapeKind::Spheroid),
            2 => Ok(ShapeKind::Pyramidoid),
            other => Err(Error::Format(format!("unknown shape kind code {other}"))),
        }
    }
}

impl fmt::Display for ShapeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ShapeKind::Facoid => "facoid",
            ShapeKind::Spheroid => "spheroid",
            ShapeKind::Pyramidoid => "pyramidoid",
        };
        write!(f, "{name}")
    }
}

/// Parametrized geometric body: a center position and one axis vector per
/// dimension. The factory produces a unit body (center at the origin, axes
/// the standard basis); sizing rescales axes in place.
#[derive(Debug, Clone)]
pub struct Shape {
    kind: ShapeKind,
    center: DVector<f64>,
    axes: Vec<DVector<f64>>,
}

impl Shape {
    /// Create a unit body of the given dimension and kind.
    pub fn new(dim: usize, kind: ShapeKind) -> Result<Self> {
        if dim == 0 {
            return Err(Error::InvalidParam("dimension must be > 0".into()));
        }
        let axes = (0..dim)
            .map(|k| {
                let mut a = DVector::zeros(dim);
                a[k] = 1.0;
                a
            })
            .collect();
        Ok(Self {
            kind,
            center: DVector::zeros(dim),
            axes,
        })
    }

    /// Spatial dimension.
    #[inline]
    pub fn dim(&self) -> usize {
        self.center.len()
    }

    /// Body kind.
    #[inline]
    pub fn kind(&self) -> ShapeKind {
        self.kind
    }

    /// Center position.
    #[inline]
    pub fn center(&self) -> &DVector<f64> {
        &self.center
    }

    /// Set the center position.
    pub fn set_center(&mut self, center: &DVector<f64>) -> Result<()> {
        if center.len() != self.dim() {
            return Err(Error::InvalidParam(format!(
                "center dimension {} does not match shape dimension {}",
                center.len(),
                self.dim()
            )));
        }
        self.center.copy_from(center);
        Ok(())
    }

    /// Displace the center by `disp` (dimension already validated by the
    /// caller).
    pub(crate) fn translate(&mut self, disp: &DVector<f64>) {
        self.center += disp;
    }

    /// The `i`-th axis vector.
    ///
    /// Panics if `i` is out of range, like slice indexing.
    #[inline]
    pub fn axis(&self, i: usize) -> &DVector<f64> {
        &self.axes[i]
    }

    /// Scale the `i`-th axis vector by `scale`.
    ///
    /// Panics if `i` is out of range, like slice indexing.
    pub fn scale_axis(&mut self, i: usize, scale: f64) {
        self.axes[i] *= scale;
    }

    /// Radius of the bounding sphere around the center.
    ///
    /// A spheroid's extent along each axis is half that axis, so the bound
    /// is half the largest axis norm; box-like kinds are bounded by their
    /// half-diagonal.
    pub fn bounding_radius(&self) -> f64 {
        match self.kind {
            ShapeKind::Spheroid => {
                0.5 * self
                    .axes
                    .iter()
                    .map(DVector::norm)
                    .fold(0.0_f64, f64::max)
            }
            ShapeKind::Facoid | ShapeKind::Pyramidoid => {
                0.5 * self
                    .axes
                    .iter()
                    .map(DVector::norm_squared)
                    .sum::<f64>()
                    .sqrt()
            }
        }
    }

    /// Epsilon-tolerant structural equality over kind, center and axes.
    pub fn is_same(&self, other: &Shape) -> bool {
        self.kind == other.kind
            && vec_eq(&self.center, &other.center)
            && self
                .axes
                .iter()
                .zip(other.axes.iter())
                .all(|(a, b)| vec_eq(a, b))
    }

    /// Encode as `{"_dim", "_type", "_pos", "_axis"}`.
    pub fn to_json(&self) -> Value {
        let axes: Vec<Value> = self.axes.iter().map(codec::vec_to_json).collect();
        json!({
            "_dim": self.dim().to_string(),
            "_type": self.kind.code().to_string(),
            "_pos": codec::vec_to_json(&self.center),
            "_axis": axes,
        })
    }

    /// Decode from the JSON form, validating dimension agreement of every
    /// carried vector.
    pub fn from_json(node: &Value) -> Result<Self> {
        let dim = codec::usize_prop(node, "_dim")?;
        if dim == 0 {
            return Err(Error::Format("shape dimension must be > 0".into()));
        }
        let code = codec::usize_prop(node, "_type")?;
        let kind = ShapeKind::from_code(u8::try_from(code).map_err(|_| {
            Error::Format(format!("unknown shape kind code {code}"))
        })?)?;
        let center = codec::vec_from_json(codec::prop(node, "_pos")?)?;
        if center.len() != dim {
            return Err(Error::Format("shape center dimension mismatch".into()));
        }
        let axis_nodes = codec::array_prop(node, "_axis")?;
        if axis_nodes.len() != dim {
            return Err(Error::Format(format!(
                "shape declares {dim} axes but carries {}",
                axis_nodes.len()
            )));
        }
        let mut axes = Vec::with_capacity(dim);
        for a in axis_nodes {
            let axis = codec::vec_from_json(a)?;
            if axis.len() != dim {
                return Err(Error::Format("shape axis dimension mismatch".into()));
            }
            axes.push(axis);
        }
        Ok(Self { kind, center, axes })
    }

    /// Write the text block: `<kind> <dim>`, center vector, then one axis
    /// vector per dimension.
    pub fn write_text<W: Write>(&self, w: &mut W) -> Result<()> {
        writeln!(w, "{} {}", self.kind.code(), self.dim())?;
        codec::write_vec(w, &self.center)?;
        for a in &self.axes {
            codec::write_vec(w, a)?;
        }
        Ok(())
    }

    /// Read the text block written by [`Shape::write_text`].
    pub fn read_text(t: &mut Tokens) -> Result<Self> {
        let code = t.next_usize()?;
        let kind = ShapeKind::from_code(
            u8::try_from(code).map_err(|_| Error::Format(format!("unknown shape kind code {code}")))?,
        )?;
        let dim = t.next_usize()?;
        if dim == 0 {
            return Err(Error::Format("shape dimension must be > 0".into()));
        }
        let center = codec::read_vec(t)?;
        if center.len() != dim {
            return Err(Error::Format("shape center dimension mismatch".into()));
        }
        let mut axes = Vec::with_capacity(dim);
        for _ in 0..dim {
            let axis = codec::read_vec(t)?;
            if axis.len() != dim {
                return Err(Error::Format("shape axis dimension mismatch".into()));
            }
            axes.push(axis);
        }
        Ok(Self { kind, center, axes })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::math::feq;

    #[test]
    fn unit_body_defaults() -> Result<()> {
        let s = Shape::new(3, ShapeKind::Spheroid)?;
        assert_eq!(s.dim(), 3);
        assert_eq!(s.kind(), ShapeKind::Spheroid);
        assert!(s.center().iter().all(|&c| c == 0.0));
        for k in 0..3 {
            assert!(feq(s.axis(k).norm(), 1.0));
        }
        Ok(())
    }

    #[test]
    fn zero_dimension_rejected() {
        assert!(Shape::new(0, ShapeKind::Facoid).is_err());
    }

    #[test]
    fn unit_spheroid_bounding_radius_is_half() -> Result<()> {
        let s = Shape::new(2, ShapeKind::Spheroid)?;
        assert!(feq(s.bounding_radius(), 0.5));
        Ok(())
    }

    #[test]
    fn facoid_bounding_radius_is_half_diagonal() -> Result<()> {
        let s = Shape::new(2, ShapeKind::Facoid)?;
        assert!(feq(s.bounding_radius(), 0.5 * 2.0_f64.sqrt()));
        Ok(())
    }

    #[test]
    fn axis_rescale_grows_bound() -> Result<()> {
        let mut s = Shape::new(2, ShapeKind::Spheroid)?;
        s.scale_axis(1, 4.0);
        assert!(feq(s.bounding_radius(), 2.0));
        Ok(())
    }

    #[test]
    fn equality_is_epsilon_tolerant() -> Result<()> {
        let a = Shape::new(2, ShapeKind::Spheroid)?;
        let mut b = a.clone();
        assert!(a.is_same(&b));
        b.scale_axis(0, 1.5);
        assert!(!a.is_same(&b));
        Ok(())
    }

    #[test]
    fn json_round_trip() -> Result<()> {
        let mut s = Shape::new(2, ShapeKind::Pyramidoid)?;
        s.set_center(&DVector::from_vec(vec![4.0, 5.0]))?;
        s.scale_axis(0, 2.0);
        let back = Shape::from_json(&s.to_json())?;
        assert!(s.is_same(&back));
        Ok(())
    }

    #[test]
    fn text_round_trip() -> Result<()> {
        let mut s = Shape::new(3, ShapeKind::Facoid)?;
        s.set_center(&DVector::from_vec(vec![-1.0, 0.25, 9.0]))?;
        let mut buf = Vec::new();
        s.write_text(&mut buf)?;
        let mut t = Tokens::from_reader(&mut buf.as_slice())?;
        let back = Shape::read_text(&mut t)?;
        assert!(s.is_same(&back));
        Ok(())
    }

    #[test]
    fn bad_kind_code_rejected() {
        assert!(ShapeKind::from_code(7).is_err());
    }
}
