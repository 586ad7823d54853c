//! Event-driven particle dynamics.
//!
//! The crate advances a set of point/extended masses under user forces,
//! linear drag, uniform down-gravity and pairwise Newtonian attraction,
//! detects the earliest future collision within a time budget by solving
//! the exact time-of-impact quadratic, and resolves collisions as elastic
//! impulses. [`core::Simulation::step`] composes these into a frame that
//! cannot tunnel through a collision.

pub mod codec;
pub mod core;
pub mod error;
pub mod math;

pub use crate::core::{Collision, Particle, Shape, ShapeKind, Simulation};
pub use crate::error::{Error, Result};
