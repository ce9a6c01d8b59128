//! Shared domain types.
//!
//! These types are intentionally kept lightweight and serializable so they can
//! be:
//!
//! - used in-memory during preprocessing/fitting/rating
//! - persisted in the CLI profile and exported fit records
//! - exposed on the command line via `clap::ValueEnum`

use clap::ValueEnum;
use serde::{Deserialize, Serialize};

/// Which part of the force-distance cycle to operate on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum Segment {
    /// The tip approaches the sample (indentation happens here).
    Approach,
    /// The tip retracts from the sample.
    Retract,
}

impl Segment {
    /// The flag value stored in the curve's `segment` column.
    pub fn flag(self) -> u8 {
        match self {
            Segment::Approach => 0,
            Segment::Retract => 1,
        }
    }
}

/// A named data column that can serve as a fitting axis.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum Axis {
    /// Tip-sample separation (requires the `compute_tip_position` step).
    TipPosition,
    /// Measured cantilever height.
    Height,
    /// Calibrated force.
    Force,
}

impl Axis {
    /// Human-readable label used in errors and reports.
    pub fn label(self) -> &'static str {
        match self {
            Axis::TipPosition => "tip position",
            Axis::Height => "height",
            Axis::Force => "force",
        }
    }
}

/// How the fitting range bounds are interpreted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum RangeKind {
    /// Bounds are absolute x-axis values.
    Absolute,
    /// Bounds are measured relative to the fitted contact point.
    ///
    /// The contact point is itself a fit parameter, so this requires an
    /// initial full-range pass followed by re-centered refinement passes.
    RelativeCp,
}

/// The x-range over which a model is fitted.
///
/// Equal bounds (`min == max`) mean "use the whole segment"; this mirrors the
/// `[0, 0]` default of the fit profile.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FitRange {
    pub kind: RangeKind,
    pub min: f64,
    pub max: f64,
}

impl FitRange {
    pub fn absolute(min: f64, max: f64) -> Self {
        FitRange {
            kind: RangeKind::Absolute,
            min,
            max,
        }
    }

    pub fn relative_cp(min: f64, max: f64) -> Self {
        FitRange {
            kind: RangeKind::RelativeCp,
            min,
            max,
        }
    }

    /// Whole-segment absolute range.
    pub fn full() -> Self {
        FitRange::absolute(0.0, 0.0)
    }

    /// `true` when the bounds select the whole segment.
    pub fn is_full(&self) -> bool {
        self.min == self.max
    }
}

impl Default for FitRange {
    fn default() -> Self {
        FitRange::full()
    }
}

/// Keyword overrides forwarded to the external least-squares minimizer.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MinimizerOptions {
    /// Relative reduction tolerance of the sum of squares.
    pub ftol: f64,
    /// Relative parameter change tolerance.
    pub xtol: f64,
    /// Maximum number of allowed residual evaluations without progress.
    pub patience: usize,
}

impl Default for MinimizerOptions {
    fn default() -> Self {
        MinimizerOptions {
            ftol: 1e-10,
            xtol: 1e-10,
            patience: 100,
        }
    }
}

/// The named regressors available to the rating engine.
///
/// Each is a black box trained offline on a labeled training set; the rating
/// engine only calls `predict` and clamps the output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum RegressorKind {
    /// Ensemble of decision trees (bagging).
    RandomForest,
    /// Single decision tree.
    DecisionTree,
    /// k-nearest-neighbours regression.
    Knn,
    /// Ridge (L2-regularized linear) regression.
    Ridge,
}

impl RegressorKind {
    pub fn display_name(self) -> &'static str {
        match self {
            RegressorKind::RandomForest => "Random Forest",
            RegressorKind::DecisionTree => "Decision Tree",
            RegressorKind::Knn => "k-Nearest Neighbours",
            RegressorKind::Ridge => "Ridge (linear)",
        }
    }

    /// All regressor kinds, in a stable order.
    pub fn all() -> [RegressorKind; 4] {
        [
            RegressorKind::RandomForest,
            RegressorKind::DecisionTree,
            RegressorKind::Knn,
            RegressorKind::Ridge,
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn full_range_detection() {
        assert!(FitRange::full().is_full());
        assert!(!FitRange::absolute(-1e-6, 0.0).is_full());
    }

    #[test]
    fn segment_flags() {
        assert_eq!(Segment::Approach.flag(), 0);
        assert_eq!(Segment::Retract.flag(), 1);
    }
}
