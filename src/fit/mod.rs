//! The model fitting engine.
//!
//! [`FitProperties`] carries the full fit configuration together with the
//! cached [`FitRecord`] result. Every configuration setter invalidates the
//! cached record, so a stale result can never be read after the
//! configuration changed; changing the model additionally drops the initial
//! parameter set, which belongs to the previous model.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::domain::{Axis, FitRange, MinimizerOptions, Segment};
use crate::model::ParamSet;

pub mod fitter;
pub mod guess;
pub mod lm;
pub mod plateau;

pub use fitter::fit_curve;
pub use guess::complete_initial_parameters;

/// Result of one fit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FitRecord {
    pub params_fitted: ParamSet,
    /// Whether the minimizer converged. Non-convergence is recorded here,
    /// never raised, so batch pipelines continue past individual failures.
    pub success: bool,
    /// Sum of squared (weighted) residuals; NaN when no fit was attempted.
    pub chi_sqr: f64,
    /// Actual x-window of the fitted samples.
    pub xmin: f64,
    pub xmax: f64,
    /// Optimal indentation depth from the plateau search, when enabled.
    pub optimal_fit_delta: Option<f64>,
    /// Fitted moduli over the scanned indentation depths.
    pub optimal_fit_e_array: Option<Vec<f64>>,
    /// The scanned indentation depths.
    pub optimal_fit_delta_array: Option<Vec<f64>>,
}

/// Fit configuration plus cached result for one curve.
#[derive(Debug, Clone)]
pub struct FitProperties {
    model_key: String,
    preprocessing: Vec<String>,
    preprocessing_options: BTreeMap<String, Value>,
    segment: Segment,
    x_axis: Axis,
    y_axis: Axis,
    range: FitRange,
    /// Half-width of the contact-point down-weighting window in x units;
    /// zero disables weighting.
    weight_cp: f64,
    /// Geometric correction factor `k` (1 = single contact).
    gcf_k: f64,
    /// Search for the optimal fit via the modulus-plateau scan.
    optimal_fit_edelta: bool,
    optimal_fit_num_samples: usize,
    minimizer: MinimizerOptions,
    params_initial: Option<ParamSet>,
    record: Option<FitRecord>,
}

impl Default for FitProperties {
    fn default() -> Self {
        FitProperties {
            model_key: "hertz_para".to_string(),
            preprocessing: Vec::new(),
            preprocessing_options: BTreeMap::new(),
            segment: Segment::Approach,
            x_axis: Axis::TipPosition,
            y_axis: Axis::Force,
            range: FitRange::full(),
            weight_cp: 5e-7,
            gcf_k: 1.0,
            optimal_fit_edelta: false,
            optimal_fit_num_samples: 100,
            minimizer: MinimizerOptions::default(),
            params_initial: None,
            record: None,
        }
    }
}

macro_rules! invalidating_setter {
    ($(#[$doc:meta])* $setter:ident, $field:ident, $ty:ty) => {
        $(#[$doc])*
        pub fn $setter(&mut self, value: $ty) {
            if self.$field != value {
                self.$field = value;
                self.record = None;
            }
        }
    };
}

impl FitProperties {
    pub fn new() -> Self {
        FitProperties::default()
    }

    /// Change the model. Also drops the initial parameters, which are only
    /// meaningful for the previous model.
    pub fn set_model_key(&mut self, key: impl Into<String>) {
        let key = key.into();
        if self.model_key != key {
            self.model_key = key;
            self.params_initial = None;
            self.record = None;
        }
    }

    pub fn model_key(&self) -> &str {
        &self.model_key
    }

    invalidating_setter!(
        /// Preprocessing pipeline recorded with the fit.
        set_preprocessing, preprocessing, Vec<String>);
    invalidating_setter!(set_preprocessing_options, preprocessing_options,
        BTreeMap<String, Value>);
    invalidating_setter!(set_segment, segment, Segment);
    invalidating_setter!(set_x_axis, x_axis, Axis);
    invalidating_setter!(set_y_axis, y_axis, Axis);
    invalidating_setter!(set_range, range, FitRange);
    invalidating_setter!(set_weight_cp, weight_cp, f64);
    invalidating_setter!(set_gcf_k, gcf_k, f64);
    invalidating_setter!(set_optimal_fit_edelta, optimal_fit_edelta, bool);
    invalidating_setter!(set_optimal_fit_num_samples, optimal_fit_num_samples, usize);
    invalidating_setter!(set_minimizer, minimizer, MinimizerOptions);

    pub fn preprocessing(&self) -> &[String] {
        &self.preprocessing
    }

    pub fn preprocessing_options(&self) -> &BTreeMap<String, Value> {
        &self.preprocessing_options
    }

    pub fn segment(&self) -> Segment {
        self.segment
    }

    pub fn x_axis(&self) -> Axis {
        self.x_axis
    }

    pub fn y_axis(&self) -> Axis {
        self.y_axis
    }

    pub fn range(&self) -> FitRange {
        self.range
    }

    pub fn weight_cp(&self) -> f64 {
        self.weight_cp
    }

    pub fn gcf_k(&self) -> f64 {
        self.gcf_k
    }

    pub fn optimal_fit_edelta(&self) -> bool {
        self.optimal_fit_edelta
    }

    pub fn optimal_fit_num_samples(&self) -> usize {
        self.optimal_fit_num_samples
    }

    pub fn minimizer(&self) -> MinimizerOptions {
        self.minimizer
    }

    pub fn set_params_initial(&mut self, params: Option<ParamSet>) {
        if self.params_initial != params {
            self.params_initial = params;
            self.record = None;
        }
    }

    pub fn params_initial(&self) -> Option<&ParamSet> {
        self.params_initial.as_ref()
    }

    /// The cached fit result, if the configuration has not changed since the
    /// last fit.
    pub fn record(&self) -> Option<&FitRecord> {
        self.record.as_ref()
    }

    pub(crate) fn store_record(&mut self, record: FitRecord) {
        self.record = Some(record);
    }

    pub(crate) fn clear_record(&mut self) {
        self.record = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Param;

    fn record_stub() -> FitRecord {
        FitRecord {
            params_fitted: ParamSet::new(),
            success: true,
            chi_sqr: 0.0,
            xmin: 0.0,
            xmax: 1.0,
            optimal_fit_delta: None,
            optimal_fit_e_array: None,
            optimal_fit_delta_array: None,
        }
    }

    #[test]
    fn config_change_invalidates_cached_record() {
        let mut props = FitProperties::new();
        props.store_record(record_stub());
        assert!(props.record().is_some());

        props.set_weight_cp(0.0);
        assert!(props.record().is_none());

        props.store_record(record_stub());
        // Setting the identical value keeps the cache.
        props.set_weight_cp(0.0);
        assert!(props.record().is_some());
    }

    #[test]
    fn model_change_drops_initial_parameters() {
        let mut props = FitProperties::new();
        let mut params = ParamSet::new();
        params.add("E", Param::new(1.0));
        props.set_params_initial(Some(params));
        props.store_record(record_stub());

        props.set_model_key("hertz_cone");
        assert!(props.params_initial().is_none());
        assert!(props.record().is_none());
    }

    #[test]
    fn range_change_invalidates() {
        let mut props = FitProperties::new();
        props.store_record(record_stub());
        props.set_range(FitRange::relative_cp(-1e-6, 0.0));
        assert!(props.record().is_none());
    }
}
