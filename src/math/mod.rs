//! Small numeric helpers shared by estimators and feature extraction.

pub mod filter;
pub mod ols;

pub use filter::{gaussian_filter1d, gradient, uniform_filter1d};
pub use ols::solve_least_squares;
