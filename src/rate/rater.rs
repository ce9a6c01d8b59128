//! The rating engine.
//!
//! A [`CurveRater`] owns a trained regressor plus the training set's
//! per-feature normalization statistics. Rating a feature vector:
//!
//! 1. binary gate: any binary feature that is exactly 0 marks the curve as
//!    certainly bad (rating 0)
//! 2. NaN short-circuit: any NaN among the normalized continuous features
//!    yields the invalid sentinel (-1) instead of feeding NaN into the
//!    regressor
//! 3. otherwise the regressor output is clamped to [0, 10]
//!
//! Normalization always uses the training set's own statistics (mean/std
//! per feature), never the query sample's.

use log::warn;

use crate::data::Curve;
use crate::domain::RegressorKind;
use crate::error::FdError;
use crate::fit::FitProperties;
use crate::rate::features::{compute_features, continuous_names, FeatureVector};
use crate::rate::regressors::{self, QualityRegressor};
use crate::rate::training::TrainingSet;

/// Sentinel rating for curves whose required features are unavailable.
pub const RATING_INVALID: f64 = -1.0;

/// A rater: trained regressor + normalization statistics.
pub struct CurveRater {
    kind: RegressorKind,
    regressor: Box<dyn QualityRegressor>,
    /// Per-feature (mean, std) of the training set.
    stats: Vec<(f64, f64)>,
}

impl CurveRater {
    /// Build a rater from a training set.
    ///
    /// The regressor is trained on the normalized training samples; the
    /// same normalization is applied to every query.
    pub fn new(kind: RegressorKind, training_set: &TrainingSet) -> Result<Self, FdError> {
        let expected: Vec<String> = continuous_names().iter().map(|s| s.to_string()).collect();
        if training_set.feature_names != expected {
            return Err(FdError::Rating(format!(
                "training set features {:?} do not match the extractor's {:?}",
                training_set.feature_names, expected
            )));
        }
        if training_set.is_empty() {
            return Err(FdError::Rating(format!(
                "training set '{}' has no usable samples",
                training_set.label
            )));
        }

        let stats = training_set.feature_stats();
        let normalized: Vec<Vec<f64>> = training_set
            .samples
            .iter()
            .map(|row| normalize(row, &stats))
            .collect();
        let regressor = regressors::train(kind, &normalized, &training_set.response)?;
        Ok(CurveRater {
            kind,
            regressor,
            stats,
        })
    }

    pub fn kind(&self) -> RegressorKind {
        self.kind
    }

    /// Rate a precomputed feature vector.
    pub fn rate_vector(&self, features: &FeatureVector) -> f64 {
        // Binary gate: an exact 0 means a rule-based disqualification.
        if features.binary_values().iter().any(|&v| v == 0.0) {
            return 0.0;
        }

        let normalized = normalize(&features.continuous_values(), &self.stats);
        if normalized.iter().any(|v| !v.is_finite()) {
            return RATING_INVALID;
        }

        match self.regressor.predict(&normalized) {
            Ok(score) => score.clamp(0.0, 10.0),
            Err(err) => {
                warn!("regressor failed, reporting invalid rating: {err}");
                RATING_INVALID
            }
        }
    }

    /// Extract features from a fitted curve and rate them.
    pub fn rate_curve(&self, curve: &Curve, props: &FitProperties) -> f64 {
        self.rate_vector(&compute_features(curve, props))
    }
}

fn normalize(values: &[f64], stats: &[(f64, f64)]) -> Vec<f64> {
    values
        .iter()
        .zip(stats.iter())
        .map(|(&v, &(mean, std))| (v - mean) / std)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::sample::{hertz_approach_curve, SyntheticCurve};
    use crate::fit::{fit_curve, FitProperties};
    use crate::model::ModelRegistry;
    use crate::rate::features::FEATURE_NAMES;

    fn vector_with(values: &[(usize, f64)], fill: f64) -> FeatureVector {
        let mut v = vec![fill; FEATURE_NAMES.len()];
        for &(i, value) in values {
            v[i] = value;
        }
        FeatureVector::from_values(v)
    }

    #[test]
    fn nan_feature_short_circuits_to_invalid_for_every_regressor() {
        let ts = TrainingSet::builtin();
        // Binary features pass (1.0); one continuous feature is NaN.
        let features = vector_with(&[(5, f64::NAN)], 1.0);
        for kind in RegressorKind::all() {
            let rater = CurveRater::new(kind, &ts).unwrap();
            assert_eq!(
                rater.rate_vector(&features),
                RATING_INVALID,
                "{kind:?} must short-circuit on NaN"
            );
        }
    }

    #[test]
    fn binary_zero_gates_to_rating_zero() {
        let ts = TrainingSet::builtin();
        let rater = CurveRater::new(RegressorKind::Ridge, &ts).unwrap();
        // bin_size (index 2) fails; everything else is clean.
        let features = vector_with(&[(2, 0.0)], 0.1);
        assert_eq!(rater.rate_vector(&features), 0.0);
    }

    #[test]
    fn clean_low_residual_vector_rates_high() {
        let ts = TrainingSet::builtin();
        for kind in RegressorKind::all() {
            let rater = CurveRater::new(kind, &ts).unwrap();
            // Feature values matching the best training rows.
            let mut values = vec![1.0, 1.0, 1.0];
            values.extend_from_slice(&ts.samples[0]);
            let score = rater.rate_vector(&FeatureVector::from_values(values));
            assert!(score >= 6.0, "{kind:?} scored {score}");
            assert!(score <= 10.0);
        }
    }

    #[test]
    fn noisy_high_residual_vector_rates_low() {
        let ts = TrainingSet::builtin();
        let rater = CurveRater::new(RegressorKind::Knn, &ts).unwrap();
        let mut values = vec![1.0, 1.0, 1.0];
        values.extend_from_slice(&ts.samples[ts.samples.len() - 1]);
        let score = rater.rate_vector(&FeatureVector::from_values(values));
        assert!(score <= 4.0, "scored {score}");
    }

    #[test]
    fn output_is_clamped_to_the_rating_scale() {
        let ts = TrainingSet::builtin();
        let rater = CurveRater::new(RegressorKind::Ridge, &ts).unwrap();
        // An extreme vector can push a linear model outside [0, 10].
        let mut values = vec![1.0, 1.0, 1.0];
        values.extend(std::iter::repeat(-50.0).take(9));
        let score = rater.rate_vector(&FeatureVector::from_values(values));
        assert!((0.0..=10.0).contains(&score));
    }

    #[test]
    fn unfitted_curve_rates_invalid_end_to_end() {
        let curve = hertz_approach_curve(&SyntheticCurve::default());
        let props = FitProperties::default();
        let rater = CurveRater::new(RegressorKind::RandomForest, &TrainingSet::builtin()).unwrap();
        assert_eq!(rater.rate_curve(&curve, &props), RATING_INVALID);
    }

    #[test]
    fn fitted_long_curve_gets_a_real_rating() {
        let cfg = SyntheticCurve {
            n_points: 800,
            noise_std: 2e-11,
            ..SyntheticCurve::default()
        };
        let registry = ModelRegistry::with_builtin();
        let mut curve = hertz_approach_curve(&cfg);
        let mut props = FitProperties::default();
        fit_curve(&mut curve, &mut props, &registry).unwrap();

        let rater = CurveRater::new(RegressorKind::Knn, &TrainingSet::builtin()).unwrap();
        let score = rater.rate_curve(&curve, &props);
        assert!(
            (0.0..=10.0).contains(&score),
            "expected a valid rating, got {score}"
        );
    }
}
