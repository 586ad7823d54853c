use crate::codec::{self, Tokens};
use crate::core::collision::{self, Collision};
use crate::core::particle::Particle;
use crate::core::shape::ShapeKind;
use crate::error::{Error, Result};
use crate::math::{feq, EPSILON};
use nalgebra::DVector;
use serde_json::{json, Value};
use std::fmt;
use std::io::{Read, Write};
use tracing::{debug, trace};

/// Standard gravity (m·s⁻²), a convenient `down_gravity` value.
pub const STANDARD_GRAVITY: f64 = 9.80665;

/// Newtonian gravitational constant (m³·kg⁻¹·s⁻²), a convenient `gravity`
/// value for SI-unit scenes.
pub const GRAVITATIONAL_CONSTANT: f64 = 6.6740831e-11;

/// Default nominal step size (s).
pub const DEFAULT_DELTA_T: f64 = 0.01;

/// Cap on resolved collisions within a single [`Simulation::step`] frame.
/// Pathological configurations (recurring zero-time contacts) fail with
/// [`Error::IterationLimit`] instead of looping forever.
pub const MAX_COLLISIONS_PER_STEP: usize = 10_000;

/// The simulation engine: an ordered, owned set of particles plus the
/// global time and force parameters, with collision-unaware ([`next`]) and
/// collision-exact ([`step`], [`step_to_collision`]) stepping.
///
/// Every contained particle has the simulation's dimension. The engine
/// never removes particles, so particle indices are stable for the whole
/// run.
///
/// [`next`]: Simulation::next
/// [`step`]: Simulation::step
/// [`step_to_collision`]: Simulation::step_to_collision
#[derive(Debug, Clone)]
pub struct Simulation {
    dim: usize,
    particles: Vec<Particle>,
    delta_t: f64,
    down_gravity: f64,
    gravity: f64,
    cur_time: f64,
}

impl Simulation {
    /// Create an empty simulation of spatial dimension `dim` with the
    /// default step size and no forces.
    pub fn new(dim: usize) -> Result<Self> {
        if dim == 0 {
            return Err(Error::InvalidParam("dimension must be > 0".into()));
        }
        Ok(Self {
            dim,
            particles: Vec::new(),
            delta_t: DEFAULT_DELTA_T,
            down_gravity: 0.0,
            gravity: 0.0,
            cur_time: 0.0,
        })
    }

    /// Spatial dimension.
    #[inline]
    pub fn dim(&self) -> usize {
        self.dim
    }

    /// Number of particles.
    #[inline]
    pub fn num_particles(&self) -> usize {
        self.particles.len()
    }

    /// All particles in insertion order.
    #[inline]
    pub fn particles(&self) -> &[Particle] {
        &self.particles
    }

    /// Mutable access to all particles.
    #[inline]
    pub fn particles_mut(&mut self) -> &mut [Particle] {
        &mut self.particles
    }

    /// The `i`-th particle.
    ///
    /// Panics if `i` is out of range, like slice indexing.
    #[inline]
    pub fn particle(&self, i: usize) -> &Particle {
        &self.particles[i]
    }

    /// Mutable access to the `i`-th particle.
    ///
    /// Panics if `i` is out of range, like slice indexing.
    #[inline]
    pub fn particle_mut(&mut self, i: usize) -> &mut Particle {
        &mut self.particles[i]
    }

    /// Append `n` default particles with a unit body of the given kind.
    pub fn add_particles(&mut self, n: usize, kind: ShapeKind) -> Result<()> {
        if n == 0 {
            return Err(Error::InvalidParam("particle count must be > 0".into()));
        }
        self.particles.reserve(n);
        for _ in 0..n {
            self.particles.push(Particle::new(self.dim, kind)?);
        }
        Ok(())
    }

    /// Nominal step size.
    #[inline]
    pub fn delta_t(&self) -> f64 {
        self.delta_t
    }

    /// Set the nominal step size.
    pub fn set_delta_t(&mut self, delta_t: f64) {
        self.delta_t = delta_t;
    }

    /// Current simulation time.
    #[inline]
    pub fn cur_time(&self) -> f64 {
        self.cur_time
    }

    /// Set the simulation clock.
    pub fn set_cur_time(&mut self, t: f64) {
        self.cur_time = t;
    }

    /// Uniform downward acceleration, applied along axis 1.
    #[inline]
    pub fn down_gravity(&self) -> f64 {
        self.down_gravity
    }

    /// Set the uniform downward acceleration.
    pub fn set_down_gravity(&mut self, g: f64) {
        self.down_gravity = g;
    }

    /// Pairwise attraction constant.
    #[inline]
    pub fn gravity(&self) -> f64 {
        self.gravity
    }

    /// Set the pairwise attraction constant.
    pub fn set_gravity(&mut self, g: f64) {
        self.gravity = g;
    }

    /// Recompute the environmental force accumulator of particle `idx`.
    ///
    /// No-op for a fixed particle. The accumulator is reset, the uniform
    /// down-gravity subtracted along axis 1 (when that axis exists), and
    /// when pairwise gravity is active every *other* particle attracts
    /// `idx` with magnitude `gravity·mᵢ·mⱼ/d²` toward itself, regardless
    /// of the other particle's fixed state. Coincident pairs (d ≤ ε) are
    /// skipped.
    fn update_sys_accel(&mut self, idx: usize) {
        if self.particles[idx].is_fixed() {
            return;
        }
        let mut acc = DVector::zeros(self.dim);
        if self.down_gravity.abs() > EPSILON && self.dim > 1 {
            acc[1] = -self.down_gravity;
        }
        if self.gravity.abs() > EPSILON {
            let pos_i = self.particles[idx].pos().clone();
            let mass_i = self.particles[idx].mass();
            for (j, q) in self.particles.iter().enumerate() {
                if j == idx {
                    continue;
                }
                let mut dir = q.pos() - &pos_i;
                let dist = dir.norm();
                if dist > EPSILON {
                    let mag = self.gravity * mass_i * q.mass() / (dist * dist);
                    dir /= dist;
                    acc.axpy(mag, &dir, 1.0);
                }
            }
        }
        self.particles[idx].set_sys_accel(acc);
    }

    /// Advance every particle by one nominal `delta_t`, ignoring
    /// collisions. Fast-approaching particles may tunnel through each
    /// other; use [`Simulation::step`] when that matters.
    ///
    /// Accumulation and motion are interleaved per particle, so later
    /// particles see the already-updated positions of earlier ones within
    /// the same call.
    pub fn next(&mut self) {
        for i in 0..self.particles.len() {
            self.update_sys_accel(i);
            let dt = self.delta_t;
            self.particles[i].advance(dt);
        }
        self.cur_time += self.delta_t;
    }

    /// Advance by at most `delta_t`, stopping early at the first predicted
    /// impact.
    ///
    /// Each pair is tested once against the effective per-unit-time
    /// velocities `displacement(delta_t)/delta_t` (drag and environmental
    /// forces folded in). The earliest exact time of impact of two
    /// bounding spheres, if any, bounds the sub-step; all particles are
    /// then moved by the resolved sub-step and the clock advances by it.
    ///
    /// Returns the colliding pair, or `None` when the full `delta_t` was
    /// consumed without contact. Speeds are *not* corrected here; see
    /// [`Particle::apply_elastic_collision`] and [`Simulation::step`].
    pub fn step_to_collision(&mut self) -> Result<Option<Collision>> {
        if self.delta_t <= 0.0 {
            return Err(Error::InvalidParam(
                "delta_t must be > 0 for collision search".into(),
            ));
        }
        let mut deltat = self.delta_t;
        let mut found: Option<Collision> = None;
        let n = self.particles.len();
        for i in 0..n {
            self.update_sys_accel(i);
        }
        if n > 1 {
            let inv_dt = 1.0 / self.delta_t;
            let vels: Vec<DVector<f64>> = self
                .particles
                .iter()
                .map(|p| p.displacement(self.delta_t) * inv_dt)
                .collect();
            let radii: Vec<f64> = self
                .particles
                .iter()
                .map(|p| p.shape().bounding_radius())
                .collect();
            for i in 0..n - 1 {
                for j in (i + 1)..n {
                    let poly = collision::dist_poly(
                        self.particles[i].pos(),
                        &vels[i],
                        self.particles[j].pos(),
                        &vels[j],
                    );
                    // Time of closest approach; straight-line non-converging
                    // pairs fall back to the current candidate sub-step.
                    let t_nearest = if poly[2].abs() > EPSILON {
                        -0.5 * poly[1] / poly[2]
                    } else {
                        deltat
                    };
                    let dist_nearest = collision::eval_dist_sq(&poly, t_nearest).sqrt();
                    if t_nearest > 0.0 && dist_nearest < radii[i] + radii[j] {
                        let t_hit = collision::time_to_hit(radii[i], radii[j], &poly);
                        if t_hit < deltat {
                            trace!(i, j, t_hit, "earlier impact candidate");
                            deltat = t_hit;
                            found = Some(Collision::new(t_hit, i, j)?);
                        }
                    }
                }
            }
        }
        for p in &mut self.particles {
            p.advance(deltat);
        }
        self.cur_time += deltat;
        if let Some(c) = &found {
            debug!(
                first = c.first(),
                second = c.second(),
                time = c.time(),
                "sub-step ended on predicted impact"
            );
        }
        Ok(found)
    }

    /// Advance exactly one nominal `delta_t`, resolving every intervening
    /// collision at its exact time of impact.
    ///
    /// The step size is transiently shrunk to the remaining frame time
    /// after each resolved collision and restored before returning, on
    /// success and on failure alike. A frame resolving more than
    /// [`MAX_COLLISIONS_PER_STEP`] collisions fails with
    /// [`Error::IterationLimit`].
    pub fn step(&mut self) -> Result<()> {
        let goal = self.cur_time + self.delta_t;
        let orig = self.delta_t;
        let outcome = self.step_until(goal);
        self.delta_t = orig;
        outcome
    }

    fn step_until(&mut self, goal: f64) -> Result<()> {
        let mut resolved = 0usize;
        while self.cur_time < goal {
            if let Some(hit) = self.step_to_collision()? {
                let (a, b) = pair_mut(&mut self.particles, hit.first(), hit.second());
                Particle::apply_elastic_collision(a, b)?;
                debug!(
                    first = hit.first(),
                    second = hit.second(),
                    cur_time = self.cur_time,
                    "resolved elastic collision"
                );
                resolved += 1;
                if resolved > MAX_COLLISIONS_PER_STEP {
                    return Err(Error::IterationLimit(MAX_COLLISIONS_PER_STEP));
                }
                self.delta_t = goal - self.cur_time;
            }
        }
        Ok(())
    }

    /// Epsilon-tolerant comparison of every scalar field plus per-index
    /// particle equality.
    pub fn is_same(&self, other: &Simulation) -> bool {
        self.dim == other.dim
            && feq(self.delta_t, other.delta_t)
            && feq(self.cur_time, other.cur_time)
            && feq(self.down_gravity, other.down_gravity)
            && feq(self.gravity, other.gravity)
            && self.particles.len() == other.particles.len()
            && self
                .particles
                .iter()
                .zip(other.particles.iter())
                .all(|(a, b)| a.is_same(b))
    }

    /// Encode the persisted field set as JSON.
    pub fn to_json(&self) -> Value {
        let parts: Vec<Value> = self.particles.iter().map(Particle::to_json).collect();
        json!({
            "_dim": self.dim.to_string(),
            "_curTime": self.cur_time.to_string(),
            "_deltaT": self.delta_t.to_string(),
            "_downGravity": self.down_gravity.to_string(),
            "_gravity": self.gravity.to_string(),
            "_nbParticle": self.particles.len().to_string(),
            "_particles": parts,
        })
    }

    /// Decode from the JSON form, validating the dimension, the declared
    /// particle count against the carried array, and every particle's
    /// dimension. Failure constructs nothing.
    pub fn from_json(node: &Value) -> Result<Self> {
        let dim = codec::usize_prop(node, "_dim")?;
        if dim == 0 {
            return Err(Error::Format("simulation dimension must be > 0".into()));
        }
        let cur_time = codec::f64_prop(node, "_curTime")?;
        let delta_t = codec::f64_prop(node, "_deltaT")?;
        let down_gravity = codec::f64_prop(node, "_downGravity")?;
        let gravity = codec::f64_prop(node, "_gravity")?;
        let nb = codec::usize_prop(node, "_nbParticle")?;
        let part_nodes = codec::array_prop(node, "_particles")?;
        if part_nodes.len() != nb {
            return Err(Error::Format(format!(
                "simulation declares {nb} particles but carries {}",
                part_nodes.len()
            )));
        }
        let mut particles = Vec::with_capacity(nb);
        for pn in part_nodes {
            let p = Particle::from_json(pn)?;
            if p.dim() != dim {
                return Err(Error::Format(
                    "particle dimension disagrees with simulation dimension".into(),
                ));
            }
            particles.push(p);
        }
        Ok(Self {
            dim,
            particles,
            delta_t,
            down_gravity,
            gravity,
            cur_time,
        })
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

    /// Load a simulation from a JSON stream.
    pub fn load_json<R: Read>(r: &mut R) -> Result<Self> {
        let node: Value = serde_json::from_reader(r)?;
        Self::from_json(&node)
    }

    /// Write the plain-text encoding: one header line
    /// `<dim> <curTime> <deltaT> <downGravity> <gravity> <particleCount>`
    /// followed by that many particle blocks.
    pub fn save_text<W: Write>(&self, w: &mut W) -> Result<()> {
        writeln!(
            w,
            "{} {} {} {} {} {}",
            self.dim,
            self.cur_time,
            self.delta_t,
            self.down_gravity,
            self.gravity,
            self.particles.len()
        )?;
        for p in &self.particles {
            p.write_text(w)?;
        }
        Ok(())
    }

    /// Load a simulation from a plain-text stream. Failure constructs
    /// nothing.
    pub fn load_text<R: Read>(r: &mut R) -> Result<Self> {
        let mut t = Tokens::from_reader(r)?;
        let dim = t.next_usize()?;
        if dim == 0 {
            return Err(Error::Format("simulation dimension must be > 0".into()));
        }
        let cur_time = t.next_f64()?;
        let delta_t = t.next_f64()?;
        let down_gravity = t.next_f64()?;
        let gravity = t.next_f64()?;
        let nb = t.next_usize()?;
        let mut particles = Vec::with_capacity(nb);
        for _ in 0..nb {
            let p = Particle::read_text(&mut t)?;
            if p.dim() != dim {
                return Err(Error::Format(
                    "particle dimension disagrees with simulation dimension".into(),
                ));
            }
            particles.push(p);
        }
        Ok(Self {
            dim,
            particles,
            delta_t,
            down_gravity,
            gravity,
            cur_time,
        })
    }
}

impl fmt::Display for Simulation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "dimension: {}", self.dim)?;
        writeln!(f, "t: {:.6}", self.cur_time)?;
        writeln!(f, "dt: {:.6}", self.delta_t)?;
        writeln!(f, "down gravity: {:.6}", self.down_gravity)?;
        writeln!(f, "gravity: {:.6}", self.gravity)?;
        writeln!(f, "nb particles: {}", self.particles.len())?;
        for (i, p) in self.particles.iter().enumerate() {
            writeln!(f, "particle #{i}:")?;
            write!(f, "{p}")?;
        }
        Ok(())
    }
}

/// Disjoint mutable borrows of two particles with `i < j`.
fn pair_mut(parts: &mut [Particle], i: usize, j: usize) -> (&mut Particle, &mut Particle) {
    let (head, tail) = parts.split_at_mut(j);
    (&mut head[i], &mut tail[0])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::math::vec_eq;

    fn vec2(x: f64, y: f64) -> DVector<f64> {
        DVector::from_vec(vec![x, y])
    }

    fn close(a: f64, b: f64, tol: f64) -> bool {
        (a - b).abs() < tol
    }

    #[test]
    fn create_defaults() -> Result<()> {
        let sim = Simulation::new(2)?;
        assert_eq!(sim.dim(), 2);
        assert_eq!(sim.num_particles(), 0);
        assert!(feq(sim.delta_t(), DEFAULT_DELTA_T));
        assert!(feq(sim.down_gravity(), 0.0));
        assert!(feq(sim.gravity(), 0.0));
        assert!(feq(sim.cur_time(), 0.0));
        Ok(())
    }

    #[test]
    fn zero_dimension_rejected() {
        assert!(Simulation::new(0).is_err());
    }

    #[test]
    fn add_particles_appends_defaults() -> Result<()> {
        let mut sim = Simulation::new(2)?;
        sim.add_particles(2, ShapeKind::Spheroid)?;
        assert_eq!(sim.num_particles(), 2);
        assert_eq!(sim.particle(0).dim(), 2);
        assert!(sim.add_particles(0, ShapeKind::Spheroid).is_err());
        Ok(())
    }

    #[test]
    fn next_moves_free_particle_linearly() -> Result<()> {
        let mut sim = Simulation::new(2)?;
        sim.add_particles(1, ShapeKind::Spheroid)?;
        sim.particle_mut(0).set_speed(&vec2(1.0, 0.5))?;
        for i in 1..=10 {
            sim.next();
            let expect = vec2(0.01 * i as f64, 0.005 * i as f64);
            assert!(
                vec_eq(sim.particle(0).pos(), &expect),
                "step {i}: got {:?}",
                sim.particle(0).pos()
            );
        }
        assert!(feq(sim.cur_time(), 0.1));
        Ok(())
    }

    #[test]
    fn down_gravity_projectile_regression() -> Result<()> {
        let mut sim = Simulation::new(2)?;
        sim.set_down_gravity(STANDARD_GRAVITY);
        sim.add_particles(1, ShapeKind::Spheroid)?;
        sim.particle_mut(0).set_speed(&vec2(1.0, 0.5))?;
        let expect = [
            (0.010000, 0.004510),
            (0.020000, 0.008039),
            (0.030000, 0.010587),
            (0.040000, 0.012155),
            (0.050000, 0.012742),
            (0.060000, 0.012348),
            (0.070000, 0.010974),
            (0.080000, 0.008619),
            (0.090000, 0.005283),
            (0.100000, 0.000967),
        ];
        for (x, y) in expect {
            sim.next();
            let pos = sim.particle(0).pos();
            assert!(close(pos[0], x, 1e-5), "x: {} vs {x}", pos[0]);
            assert!(close(pos[1], y, 1e-5), "y: {} vs {y}", pos[1]);
        }
        Ok(())
    }

    #[test]
    fn pairwise_gravity_toward_fixed_attractor_regression() -> Result<()> {
        let mut sim = Simulation::new(2)?;
        sim.set_gravity(1.0);
        sim.add_particles(2, ShapeKind::Spheroid)?;
        sim.particle_mut(0).set_speed(&vec2(1.0, 0.5))?;
        sim.particle_mut(0).set_mass(1.0);
        sim.particle_mut(1).set_pos(&vec2(1.0, 1.0))?;
        sim.particle_mut(1).set_mass(1.0);
        sim.particle_mut(1).set_fixed(true);
        let expect = [
            (0.010018, 0.005018),
            (0.020071, 0.010071),
            (0.030160, 0.015161),
            (0.040286, 0.020287),
            (0.050449, 0.025452),
            (0.060649, 0.030654),
            (0.070887, 0.035896),
            (0.081164, 0.041177),
            (0.091479, 0.046499),
            (0.101834, 0.051862),
        ];
        for (x, y) in expect {
            sim.next();
            let pos = sim.particle(0).pos();
            assert!(close(pos[0], x, 1e-5), "x: {} vs {x}", pos[0]);
            assert!(close(pos[1], y, 1e-5), "y: {} vs {y}", pos[1]);
        }
        // The attractor never moved.
        assert!(vec_eq(sim.particle(1).pos(), &vec2(1.0, 1.0)));
        Ok(())
    }

    #[test]
    fn step_to_collision_head_on() -> Result<()> {
        let mut sim = Simulation::new(2)?;
        sim.add_particles(2, ShapeKind::Spheroid)?;
        sim.particle_mut(0).set_speed(&vec2(1.0, 0.0))?;
        sim.particle_mut(0).set_mass(1.0);
        sim.particle_mut(1).set_pos(&vec2(3.0, 0.0))?;
        sim.particle_mut(1).set_speed(&vec2(-1.0, 0.0))?;
        sim.particle_mut(1).set_mass(1.0);
        sim.set_delta_t(2.0);
        let hit = sim.step_to_collision()?.expect("impact expected");
        assert_eq!(hit.pair(), (0, 1));
        // Unit-diameter spheres 3 apart closing at 2: contact after 1 s.
        assert!(feq(hit.time(), 1.0));
        assert!(feq(sim.cur_time(), 1.0));
        assert!(vec_eq(sim.particle(0).pos(), &vec2(1.0, 0.0)));
        assert!(vec_eq(sim.particle(1).pos(), &vec2(2.0, 0.0)));
        Ok(())
    }

    #[test]
    fn step_to_collision_none_when_out_of_reach() -> Result<()> {
        let mut sim = Simulation::new(2)?;
        sim.add_particles(2, ShapeKind::Spheroid)?;
        sim.particle_mut(1).set_pos(&vec2(10.0, 0.0))?;
        sim.particle_mut(0).set_speed(&vec2(1.0, 0.0))?;
        let hit = sim.step_to_collision()?;
        assert!(hit.is_none());
        assert!(feq(sim.cur_time(), DEFAULT_DELTA_T));
        Ok(())
    }

    #[test]
    fn step_to_collision_requires_positive_delta_t() -> Result<()> {
        let mut sim = Simulation::new(2)?;
        sim.set_delta_t(0.0);
        assert!(sim.step_to_collision().is_err());
        Ok(())
    }

    #[test]
    fn display_lists_particles() -> Result<()> {
        let mut sim = Simulation::new(2)?;
        sim.add_particles(2, ShapeKind::Spheroid)?;
        let text = format!("{sim}");
        assert!(text.contains("nb particles: 2"));
        assert!(text.contains("particle #1:"));
        Ok(())
    }

    #[test]
    fn clone_and_is_same() -> Result<()> {
        let mut sim = Simulation::new(2)?;
        sim.add_particles(2, ShapeKind::Spheroid)?;
        sim.particle_mut(1).set_mass(1.0);
        let mut clone = sim.clone();
        assert!(sim.is_same(&clone));
        clone.particle_mut(1).set_mass(2.0);
        assert!(!sim.is_same(&clone));

        let mut clone2 = sim.clone();
        clone2.set_gravity(0.5);
        assert!(!sim.is_same(&clone2));
        Ok(())
    }
}
