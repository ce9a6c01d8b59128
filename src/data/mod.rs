//! Curve data structures and synthetic sample generation.

pub mod curve;
pub mod sample;

pub use curve::{Curve, CurveMeta};
