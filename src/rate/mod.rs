//! Curve quality rating: feature extraction, training sets, regressors.

pub mod container;
pub mod features;
pub mod rater;
pub mod regressors;
pub mod training;

pub use features::{compute_features, FeatureVector};
pub use rater::{CurveRater, RATING_INVALID};
pub use training::TrainingSet;
