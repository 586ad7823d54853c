use crate::codec::{self, Tokens};
use crate::core::collision;
use crate::core::shape::{Shape, ShapeKind};
use crate::error::{Error, Result};
use crate::math::{feq, vec_eq, EPSILON};
use nalgebra::DVector;
use serde_json::{json, Value};
use std::any::Any;
use std::fmt;
use std::io::{Read, Write};

/// A body in the simulation: a geometric shape plus kinematic and physical
/// attributes.
///
/// The shape's center is the particle position. `speed` and `accel` are
/// user-controlled; `sys_accel` is the per-step accumulator for
/// environmental forces and is recomputed on every step, so it is excluded
/// from persistence and from [`Particle::is_same`]. A `fixed` particle
/// keeps speed and accel pinned to zero but its position stays mutable.
pub struct Particle {
    shape: Shape,
    speed: DVector<f64>,
    accel: DVector<f64>,
    sys_accel: DVector<f64>,
    mass: f64,
    drag: f64,
    fixed: bool,
    user_data: Option<Box<dyn Any>>,
}

impl Particle {
    /// Create a particle of dimension `dim` with a default unit body of the
    /// given kind. Mass and drag start at zero, the particle is unfixed.
    pub fn new(dim: usize, kind: ShapeKind) -> Result<Self> {
        let shape = Shape::new(dim, kind)?;
        Ok(Self {
            shape,
            speed: DVector::zeros(dim),
            accel: DVector::zeros(dim),
            sys_accel: DVector::zeros(dim),
            mass: 0.0,
            drag: 0.0,
            fixed: false,
            user_data: None,
        })
    }

    /// Spatial dimension.
    #[inline]
    pub fn dim(&self) -> usize {
        self.shape.dim()
    }

    /// The geometric body.
    #[inline]
    pub fn shape(&self) -> &Shape {
        &self.shape
    }

    /// Kind of the geometric body.
    #[inline]
    pub fn shape_kind(&self) -> ShapeKind {
        self.shape.kind()
    }

    /// Position (the shape's center).
    #[inline]
    pub fn pos(&self) -> &DVector<f64> {
        self.shape.center()
    }

    /// Set the position. Applies even when the particle is fixed.
    pub fn set_pos(&mut self, pos: &DVector<f64>) -> Result<()> {
        self.shape.set_center(pos)
    }

    /// The `i`-th axis of the shape.
    ///
    /// Panics if `i` is out of range, like slice indexing.
    #[inline]
    pub fn axis(&self, i: usize) -> &DVector<f64> {
        self.shape.axis(i)
    }

    /// Current speed.
    #[inline]
    pub fn speed(&self) -> &DVector<f64> {
        &self.speed
    }

    /// Set the speed. Silently does nothing when the particle is fixed; the
    /// dimension is validated either way.
    pub fn set_speed(&mut self, speed: &DVector<f64>) -> Result<()> {
        self.check_dim(speed, "speed")?;
        if !self.fixed {
            self.speed.copy_from(speed);
        }
        Ok(())
    }

    /// User acceleration.
    #[inline]
    pub fn accel(&self) -> &DVector<f64> {
        &self.accel
    }

    /// Set the user acceleration. Silently does nothing when the particle
    /// is fixed; the dimension is validated either way.
    pub fn set_accel(&mut self, accel: &DVector<f64>) -> Result<()> {
        self.check_dim(accel, "accel")?;
        if !self.fixed {
            self.accel.copy_from(accel);
        }
        Ok(())
    }

    /// Per-step environmental force accumulator.
    #[inline]
    pub fn sys_accel(&self) -> &DVector<f64> {
        &self.sys_accel
    }

    /// Replace the environmental accumulator (recomputed by the simulation
    /// before every step).
    pub(crate) fn set_sys_accel(&mut self, sys_accel: DVector<f64>) {
        self.sys_accel = sys_accel;
    }

    /// Mass.
    #[inline]
    pub fn mass(&self) -> f64 {
        self.mass
    }

    /// Set the mass. A strictly positive mass is required only to take part
    /// in elastic collision response.
    pub fn set_mass(&mut self, mass: f64) {
        self.mass = mass;
    }

    /// Linear velocity-damping coefficient per unit time.
    #[inline]
    pub fn drag(&self) -> f64 {
        self.drag
    }

    /// Set the drag coefficient.
    pub fn set_drag(&mut self, drag: f64) {
        self.drag = drag;
    }

    /// Whether the particle is fixed in place.
    #[inline]
    pub fn is_fixed(&self) -> bool {
        self.fixed
    }

    /// Set the fixed flag. Fixing a particle immediately zeroes its speed
    /// and user acceleration.
    pub fn set_fixed(&mut self, fixed: bool) {
        self.fixed = fixed;
        if fixed {
            self.speed.fill(0.0);
            self.accel.fill(0.0);
        }
    }

    /// Rescale each shape axis so its length equals the matching component
    /// of `size`.
    pub fn set_size_vec(&mut self, size: &DVector<f64>) -> Result<()> {
        self.check_dim(size, "size")?;
        for i in 0..self.dim() {
            let scale = size[i] / self.shape.axis(i).norm();
            self.shape.scale_axis(i, scale);
        }
        Ok(())
    }

    /// Rescale every shape axis to the same length `size`.
    pub fn set_size_scalar(&mut self, size: f64) {
        for i in 0..self.dim() {
            let scale = size / self.shape.axis(i).norm();
            self.shape.scale_axis(i, scale);
        }
    }

    /// Attach opaque user data. It is never cloned, compared or persisted.
    pub fn set_user_data(&mut self, data: Box<dyn Any>) {
        self.user_data = Some(data);
    }

    /// Borrow the attached user data, if any.
    pub fn user_data(&self) -> Option<&dyn Any> {
        self.user_data.as_deref()
    }

    /// Detach and return the user data.
    pub fn take_user_data(&mut self) -> Option<Box<dyn Any>> {
        self.user_data.take()
    }

    /// Displacement from the current position to the position after `dt`:
    /// `dt·speed + 0.5·dt²·(accel − drag·speed + sys_accel)`.
    pub fn displacement(&self, dt: f64) -> DVector<f64> {
        let mut disp = &self.accel - &self.speed * self.drag;
        disp += &self.sys_accel;
        disp *= 0.5 * dt * dt;
        disp.axpy(dt, &self.speed, 1.0);
        disp
    }

    /// Integrate the particle over `dt`:
    ///
    /// ```text
    /// x(t+dt) = x(t) + v(t)·dt + 0.5·dt²·(a(t) − drag·v(t) + a_sys(t))
    /// v(t+dt) = v(t)·(1 − drag·dt) + dt·(a(t) + a_sys(t))
    /// ```
    ///
    /// No-op when the particle is fixed.
    pub fn advance(&mut self, dt: f64) {
        if self.fixed {
            return;
        }
        let disp = self.displacement(dt);
        self.shape.translate(&disp);
        self.speed *= 1.0 - self.drag * dt;
        self.speed.axpy(dt, &self.accel, 1.0);
        self.speed.axpy(dt, &self.sys_accel, 1.0);
    }

    /// Exchange impulses between two colliding particles along their line
    /// of centers, assuming a perfectly elastic collision.
    ///
    /// Both masses must be non-zero in absolute value; a fixed endpoint
    /// keeps its (zero) speed and only the other particle recoils.
    pub fn apply_elastic_collision(a: &mut Particle, b: &mut Particle) -> Result<()> {
        if a.dim() != b.dim() {
            return Err(Error::InvalidParam(format!(
                "colliding particles have dimensions {} and {}",
                a.dim(),
                b.dim()
            )));
        }
        if a.mass.abs() < EPSILON || b.mass.abs() < EPSILON {
            return Err(Error::InvalidParam(
                "elastic collision requires non-zero masses".into(),
            ));
        }
        let dp = a.pos() - b.pos();
        let dv = &a.speed - &b.speed;
        let c = 2.0 * dp.dot(&dv) / ((a.mass + b.mass) * dp.norm_squared());
        if !a.fixed {
            a.speed.axpy(-c * b.mass, &dp, 1.0);
        }
        if !b.fixed {
            b.speed.axpy(c * a.mass, &dp, 1.0);
        }
        Ok(())
    }

    /// Coefficients of the squared-distance polynomial between two
    /// particles extrapolated along their raw speeds. See
    /// [`collision::dist_poly`] for the closed form.
    pub fn dist_poly_between(a: &Particle, b: &Particle) -> [f64; 3] {
        collision::dist_poly(a.pos(), &a.speed, b.pos(), &b.speed)
    }

    /// Epsilon-tolerant structural equality over shape, speed, accel, mass
    /// and the fixed flag. Drag and user data are not compared.
    pub fn is_same(&self, other: &Particle) -> bool {
        self.shape.is_same(&other.shape)
            && vec_eq(&self.speed, &other.speed)
            && vec_eq(&self.accel, &other.accel)
            && feq(self.mass, other.mass)
            && self.fixed == other.fixed
    }

    fn check_dim(&self, v: &DVector<f64>, what: &str) -> Result<()> {
        if v.len() != self.dim() {
            return Err(Error::InvalidParam(format!(
                "{what} dimension {} does not match particle dimension {}",
                v.len(),
                self.dim()
            )));
        }
        Ok(())
    }

    /// Encode the persisted field set as JSON. `sys_accel` and user data
    /// are not part of it.
    pub fn to_json(&self) -> Value {
        json!({
            "_dim": self.dim().to_string(),
            "_type": self.shape_kind().code().to_string(),
            "_shape": self.shape.to_json(),
            "_speed": codec::vec_to_json(&self.speed),
            "_accel": codec::vec_to_json(&self.accel),
            "_mass": self.mass.to_string(),
            "_drag": self.drag.to_string(),
            "_fixed": u8::from(self.fixed).to_string(),
        })
    }

    /// Decode from the JSON form. The fixed invariant is re-applied: a
    /// stream claiming a fixed particle with non-zero speed loads with the
    /// speed zeroed.
    pub fn from_json(node: &Value) -> Result<Self> {
        let dim = codec::usize_prop(node, "_dim")?;
        if dim == 0 {
            return Err(Error::Format("particle dimension must be > 0".into()));
        }
        let code = codec::usize_prop(node, "_type")?;
        let kind = ShapeKind::from_code(
            u8::try_from(code).map_err(|_| Error::Format(format!("unknown shape kind code {code}")))?,
        )?;
        let shape = Shape::from_json(codec::prop(node, "_shape")?)?;
        if shape.dim() != dim || shape.kind() != kind {
            return Err(Error::Format(
                "particle shape disagrees with declared dimension/kind".into(),
            ));
        }
        let speed = codec::vec_from_json(codec::prop(node, "_speed")?)?;
        let accel = codec::vec_from_json(codec::prop(node, "_accel")?)?;
        if speed.len() != dim || accel.len() != dim {
            return Err(Error::Format("particle vector dimension mismatch".into()));
        }
        let mass = codec::f64_prop(node, "_mass")?;
        let drag = codec::f64_prop(node, "_drag")?;
        let fixed = codec::bool_prop(node, "_fixed")?;
        let mut p = Self {
            shape,
            speed,
            accel,
            sys_accel: DVector::zeros(dim),
            mass,
            drag,
            fixed: false,
            user_data: None,
        };
        p.set_fixed(fixed);
        Ok(p)
    }

    /// Stream the JSON encoding, compact or pretty.
    pub fn save_json<W: Write>(&self, w: &mut W, compact: bool) -> Result<()> {
        let node = self.to_json();
        if compact {
            serde_json::to_writer(w, &node)?;
        } else {
            serde_json::to_writer_pretty(w, &node)?;
        }
        Ok(())
    }

    /// Load a particle from a JSON stream.
    pub fn load_json<R: Read>(r: &mut R) -> Result<Self> {
        let node: Value = serde_json::from_reader(r)?;
        Self::from_json(&node)
    }

    /// Write the plain-text block: shape block, speed vector, accel vector,
    /// then one line `<mass> <drag> <fixedAsInt>`.
    pub fn write_text<W: Write>(&self, w: &mut W) -> Result<()> {
        self.shape.write_text(w)?;
        codec::write_vec(w, &self.speed)?;
        codec::write_vec(w, &self.accel)?;
        writeln!(w, "{} {} {}", self.mass, self.drag, u8::from(self.fixed))?;
        Ok(())
    }

    /// Read the block written by [`Particle::write_text`].
    pub fn read_text(t: &mut Tokens) -> Result<Self> {
        let shape = Shape::read_text(t)?;
        let dim = shape.dim();
        let speed = codec::read_vec(t)?;
        let accel = codec::read_vec(t)?;
        if speed.len() != dim || accel.len() != dim {
            return Err(Error::Format("particle vector dimension mismatch".into()));
        }
        let mass = t.next_f64()?;
        let drag = t.next_f64()?;
        let fixed = t.next_flag()?;
        let mut p = Self {
            shape,
            speed,
            accel,
            sys_accel: DVector::zeros(dim),
            mass,
            drag,
            fixed: false,
            user_data: None,
        };
        p.set_fixed(fixed);
        Ok(p)
    }

    /// Load a particle from a plain-text stream.
    pub fn load_text<R: Read>(r: &mut R) -> Result<Self> {
        let mut t = Tokens::from_reader(r)?;
        Self::read_text(&mut t)
    }
}

impl Clone for Particle {
    /// Deep copy of shape and kinematic/physical state. The clone starts
    /// with a zeroed `sys_accel` and without user data.
    fn clone(&self) -> Self {
        Self {
            shape: self.shape.clone(),
            speed: self.speed.clone(),
            accel: self.accel.clone(),
            sys_accel: DVector::zeros(self.dim()),
            mass: self.mass,
            drag: self.drag,
            fixed: self.fixed,
            user_data: None,
        }
    }
}

impl fmt::Debug for Particle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Particle")
            .field("shape", &self.shape)
            .field("speed", &self.speed)
            .field("accel", &self.accel)
            .field("sys_accel", &self.sys_accel)
            .field("mass", &self.mass)
            .field("drag", &self.drag)
            .field("fixed", &self.fixed)
            .field("user_data", &self.user_data.is_some())
            .finish()
    }
}

impl fmt::Display for Particle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "{} {}D at {}",
            self.shape_kind(),
            self.dim(),
            fmt_vec(self.pos())
        )?;
        writeln!(f, "speed: {}", fmt_vec(&self.speed))?;
        writeln!(f, "accel: {}", fmt_vec(&self.accel))?;
        writeln!(f, "mass: {:.3}", self.mass)?;
        writeln!(f, "drag: {:.3}", self.drag)?;
        writeln!(f, "{}", if self.fixed { "fixed" } else { "unfixed" })
    }
}

/// Render a vector as `<c0, c1, ..>` for human-readable output.
pub(crate) fn fmt_vec(v: &DVector<f64>) -> String {
    let comps: Vec<String> = v.iter().map(|c| format!("{c:.6}")).collect();
    format!("<{}>", comps.join(", "))
}
