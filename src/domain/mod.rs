//! Shared domain types.

pub mod types;

pub use types::{Axis, FitRange, MinimizerOptions, RangeKind, RegressorKind, Segment};
