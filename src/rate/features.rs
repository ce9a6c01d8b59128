//! Rating feature extraction.
//!
//! Given a fitted curve, [`compute_features`] produces a fixed-order vector
//! of named scalar features. Any feature whose prerequisite is unmet (no
//! fit, no contact point, too little data) is NaN, never omitted, so the
//! vector has constant length and key set regardless of upstream failure.
//!
//! Conventions: features operate on the approach segment; the tip position
//! descends, so the baseline is the region right of the contact point
//! (`x > cp`) and the indentation the region left of it (`x < cp`).
//! Residuals are the unweighted `fit - force`, recomputed from the curve's
//! `fit` column. Continuous features are log-compressed to land roughly
//! in [0, 1] for typical curves.

use crate::data::Curve;
use crate::fit::FitProperties;
use crate::math::{gaussian_filter1d, gradient, solve_least_squares};
use nalgebra::{DMatrix, DVector};

/// Feature names, sorted; binary features first by the `bin_`/`con_` prefix.
pub const FEATURE_NAMES: [&str; 12] = [
    "bin_cp_in_range",
    "bin_idt_spikes",
    "bin_size",
    "con_apr_flatness",
    "con_apr_size",
    "con_apr_sum",
    "con_bln_slope",
    "con_bln_variation",
    "con_cp_magnitude",
    "con_idt_monotony",
    "con_idt_spike_area",
    "con_idt_sum",
];

/// Names of the continuous features (the regressor inputs).
pub fn continuous_names() -> Vec<&'static str> {
    FEATURE_NAMES
        .iter()
        .copied()
        .filter(|n| n.starts_with("con_"))
        .collect()
}

/// A fixed-order feature vector.
#[derive(Debug, Clone, PartialEq)]
pub struct FeatureVector {
    values: Vec<f64>,
}

impl FeatureVector {
    pub fn names() -> &'static [&'static str] {
        &FEATURE_NAMES
    }

    pub fn values(&self) -> &[f64] {
        &self.values
    }

    pub fn get(&self, name: &str) -> f64 {
        FEATURE_NAMES
            .iter()
            .position(|n| *n == name)
            .map_or(f64::NAN, |i| self.values[i])
    }

    /// The binary gate features (1 = good, 0 = bad, NaN = unknown).
    pub fn binary_values(&self) -> Vec<f64> {
        self.values_with_prefix("bin_")
    }

    /// The continuous features, in name order.
    pub fn continuous_values(&self) -> Vec<f64> {
        self.values_with_prefix("con_")
    }

    fn values_with_prefix(&self, prefix: &str) -> Vec<f64> {
        FEATURE_NAMES
            .iter()
            .zip(self.values.iter())
            .filter(|(n, _)| n.starts_with(prefix))
            .map(|(_, v)| *v)
            .collect()
    }

    /// Build a vector from raw values (training-set tooling).
    pub fn from_values(values: Vec<f64>) -> Self {
        assert_eq!(values.len(), FEATURE_NAMES.len());
        FeatureVector { values }
    }
}

/// Approach-segment views used by the individual features.
struct Extractor {
    /// Tip position over the approach (descending).
    x: Vec<f64>,
    /// Force over the approach.
    y: Vec<f64>,
    /// Residuals `fit - force` over the approach.
    res: Vec<f64>,
    /// Fitted contact point, when the fit succeeded and has one.
    cp: Option<f64>,
    /// Whether any fit record exists at all.
    has_record: bool,
}

/// Compute the feature vector for a fitted curve.
pub fn compute_features(curve: &Curve, props: &FitProperties) -> FeatureVector {
    let extractor = Extractor::new(curve, props);
    let values = FEATURE_NAMES
        .iter()
        .map(|name| extractor.compute(name))
        .collect();
    FeatureVector { values }
}

impl Extractor {
    fn new(curve: &Curve, props: &FitProperties) -> Self {
        let indices = curve.segment_indices(crate::domain::Segment::Approach);
        let x = match curve.axis_data(props.x_axis()) {
            Ok(data) => indices.iter().map(|&i| data[i]).collect(),
            Err(_) => Vec::new(),
        };
        let y: Vec<f64> = match curve.axis_data(props.y_axis()) {
            Ok(data) => indices.iter().map(|&i| data[i]).collect(),
            Err(_) => Vec::new(),
        };
        let res: Vec<f64> = indices
            .iter()
            .map(|&i| curve.fit[i] - curve.force[i])
            .collect();

        let record = props.record();
        let cp = record.and_then(|r| {
            if r.success && r.params_fitted.contains("contact_point") {
                Some(r.params_fitted.value("contact_point"))
            } else {
                None
            }
        });

        Extractor {
            x,
            y,
            res,
            cp,
            has_record: record.is_some(),
        }
    }

    fn compute(&self, name: &str) -> f64 {
        match name {
            "bin_cp_in_range" => self.bin_cp_in_range(),
            "bin_idt_spikes" => self.bin_idt_spikes(),
            "bin_size" => self.bin_size(),
            "con_apr_flatness" => self.con_apr_flatness(),
            "con_apr_size" => self.con_apr_size(),
            "con_apr_sum" => self.con_apr_sum(),
            "con_bln_slope" => self.con_bln_slope(),
            "con_bln_variation" => self.con_bln_variation(),
            "con_cp_magnitude" => self.con_cp_magnitude(),
            "con_idt_monotony" => self.con_idt_monotony(),
            "con_idt_spike_area" => self.con_idt_spike_area(),
            "con_idt_sum" => self.con_idt_sum(),
            _ => f64::NAN,
        }
    }

    fn max_force(&self) -> f64 {
        self.y.iter().copied().fold(f64::NEG_INFINITY, f64::max)
    }

    /// Baseline residuals (right of the contact point), NaN dropped.
    fn baseline_residuals(&self, cp: f64) -> Vec<f64> {
        self.x
            .iter()
            .zip(self.res.iter())
            .filter(|(&x, &r)| x > cp && r.is_finite())
            .map(|(_, &r)| r)
            .collect()
    }

    /// Indentation residuals (left of the contact point), NaN dropped.
    fn indentation_residuals(&self, cp: f64) -> Vec<f64> {
        self.x
            .iter()
            .zip(self.res.iter())
            .filter(|(&x, &r)| x < cp && r.is_finite())
            .map(|(_, &r)| r)
            .collect()
    }

    /// Contact point position outside of the data range.
    fn bin_cp_in_range(&self) -> f64 {
        let Some(cp) = self.cp else { return f64::NAN };
        let xmin = self.x.iter().copied().fold(f64::INFINITY, f64::min);
        let xmax = self.x.iter().copied().fold(f64::NEG_INFINITY, f64::max);
        if cp < xmin || cp > xmax {
            0.0
        } else {
            1.0
        }
    }

    /// Sudden spikes in the indentation residuals.
    fn bin_idt_spikes(&self) -> f64 {
        let Some(cp) = self.cp else { return f64::NAN };
        let diff = self.indentation_residuals(cp);
        if diff.len() <= 50 {
            return f64::NAN;
        }
        let smooth_wide = gaussian_filter1d(&diff, 11.0);
        let smooth_narrow = gaussian_filter1d(&diff, 1.0);
        let delta1: Vec<f64> = diff
            .iter()
            .zip(smooth_wide.iter())
            .map(|(d, s)| d - s)
            .collect();
        let std = std_dev(&delta1);
        let over: Vec<bool> = smooth_narrow
            .iter()
            .zip(smooth_wide.iter())
            .map(|(n, w)| (n - w).abs() > 3.0 * std)
            .collect();
        let npeaks = over.windows(2).filter(|w| w[0] != w[1]).count();
        if npeaks <= 5 {
            1.0
        } else {
            0.0
        }
    }

    /// Dataset too small for a reliable rating.
    fn bin_size(&self) -> f64 {
        if !self.has_record {
            return f64::NAN;
        }
        if self.y.len() < 600 {
            0.0
        } else {
            1.0
        }
    }

    /// Fraction of positive-gradient baseline residuals (0.5 = flat).
    fn con_apr_flatness(&self) -> f64 {
        let Some(cp) = self.cp else { return f64::NAN };
        let r_bl = self.baseline_residuals(cp);
        let sigma = 5.0_f64.max(((r_bl.len() / 120 / 2) * 2 + 1) as f64);
        let smoothed = gaussian_filter1d(&r_bl, sigma);
        if smoothed.len() <= 2 {
            return f64::NAN;
        }
        let grad = gradient(&smoothed);
        let pos = grad.iter().filter(|&&g| g > 0.0).count() as f64;
        let neg = grad.iter().filter(|&&g| g < 0.0).count() as f64;
        if pos + neg == 0.0 {
            f64::NAN
        } else {
            pos / (pos + neg)
        }
    }

    /// Length of the baseline relative to the whole approach.
    fn con_apr_size(&self) -> f64 {
        let Some(cp) = self.cp else { return f64::NAN };
        if self.x.is_empty() {
            return f64::NAN;
        }
        let aprsize = self.x.iter().filter(|&&x| x > cp).count() as f64;
        1.0 - aprsize / self.x.len() as f64
    }

    /// Absolute residual sum over the baseline.
    fn con_apr_sum(&self) -> f64 {
        let Some(cp) = self.cp else { return f64::NAN };
        let diff = self.baseline_residuals(cp);
        if diff.is_empty() || self.x.is_empty() {
            return f64::NAN;
        }
        let norm = self.x.len() as f64 * self.max_force();
        let value = diff.iter().map(|d| d.abs()).sum::<f64>() / norm * 100.0;
        (1.0 + value).ln()
    }

    /// Slope of a least-squares line through the outer baseline residuals.
    fn con_bln_slope(&self) -> f64 {
        let Some(cp) = self.cp else { return f64::NAN };
        let xmax = self.x.iter().copied().fold(f64::NEG_INFINITY, f64::max);
        let breakp = (xmax + cp) / 2.0;
        let pairs: Vec<(f64, f64)> = self
            .x
            .iter()
            .zip(self.res.iter())
            .filter(|(&x, &r)| x > breakp && x.is_finite() && r.is_finite())
            .map(|(&x, &r)| (x, r))
            .collect();
        if pairs.len() <= 20 {
            return f64::NAN;
        }
        let mut design = DMatrix::<f64>::zeros(pairs.len(), 2);
        let mut rhs = DVector::<f64>::zeros(pairs.len());
        for (i, (x, r)) in pairs.iter().enumerate() {
            design[(i, 0)] = *x;
            design[(i, 1)] = 1.0;
            rhs[i] = *r;
        }
        let Some(beta) = solve_least_squares(&design, &rhs) else {
            return f64::NAN;
        };
        let value = beta[0] / self.max_force();
        (1.0 + value.abs()).ln() / 10.0
    }

    /// Level difference between the beginning and end of the baseline.
    fn con_bln_variation(&self) -> f64 {
        let Some(cp) = self.cp else { return f64::NAN };
        let mut r_bl = self.baseline_residuals(cp);
        let offset = r_bl.len() / 10;
        if offset > 0 {
            r_bl.truncate(r_bl.len() - offset);
        }
        if r_bl.len() <= 20 {
            return f64::NAN;
        }
        let avg1 = r_bl[..10].iter().sum::<f64>() / 10.0;
        let avg2 = r_bl[r_bl.len() - 10..].iter().sum::<f64>() / 10.0;
        let value = (avg1 - avg2).abs() / self.max_force() * 1e3;
        (1.0 + value).ln() / 5.0
    }

    /// Mean residual magnitude around the contact point.
    fn con_cp_magnitude(&self) -> f64 {
        let Some(cp) = self.cp else { return f64::NAN };
        let n_ind = self.x.iter().filter(|&&x| x < cp).count();
        let r_range = n_ind / 10;
        let Some(cpidx) = nanargmin_abs_offset(&self.x, cp) else {
            return f64::NAN;
        };
        let lo = cpidx.saturating_sub(r_range);
        let hi = (cpidx + r_range).min(self.res.len());
        if lo >= hi {
            return f64::NAN;
        }
        let sum: f64 = self.res[lo..hi]
            .iter()
            .filter(|r| r.is_finite())
            .map(|r| r.abs())
            .sum();
        sum / self.max_force() / 100.0
    }

    /// Gradient sign balance over the indentation part.
    fn con_idt_monotony(&self) -> f64 {
        let Some(cp) = self.cp else { return f64::NAN };
        let a_ind: Vec<f64> = self
            .x
            .iter()
            .zip(self.y.iter())
            .filter(|(&x, _)| x < cp)
            .map(|(_, &y)| y)
            .collect();
        if a_ind.len() <= 2 {
            return f64::NAN;
        }
        let smoothed = gaussian_filter1d(&a_ind, 2.0);
        let grad = gradient(&smoothed);
        let gz: f64 = grad.iter().filter(|&&g| g > 0.0).sum::<f64>().abs();
        let lz: f64 = grad.iter().filter(|&&g| g < 0.0).sum::<f64>().abs();
        let value = a_ind.len() as f64 * lz / gz;
        (1.0 + value).ln() / 10.0
    }

    /// Area of spikes in the indentation residuals.
    fn con_idt_spike_area(&self) -> f64 {
        let Some(cp) = self.cp else { return f64::NAN };
        let diff = self.indentation_residuals(cp);
        if diff.len() <= 20 {
            return f64::NAN;
        }
        let smooth_wide = gaussian_filter1d(&diff, 11.0);
        let smooth_narrow = gaussian_filter1d(&diff, 1.0);
        let delta1: Vec<f64> = diff
            .iter()
            .zip(smooth_wide.iter())
            .map(|(d, s)| d - s)
            .collect();
        let delta2: Vec<f64> = smooth_narrow
            .iter()
            .zip(smooth_wide.iter())
            .map(|(n, w)| (n - w).abs())
            .collect();
        let std = std_dev(&delta1);
        let peaks: f64 = delta1
            .iter()
            .zip(delta2.iter())
            .filter(|(&d1, _)| d1 > 3.0 * std)
            .map(|(_, &d2)| d2)
            .sum();
        let value = (std + peaks) / self.max_force();
        (1.0 + value).ln() * 20.0
    }

    /// Overall residual level in the indentation part.
    fn con_idt_sum(&self) -> f64 {
        let Some(cp) = self.cp else { return f64::NAN };
        let diff = self.indentation_residuals(cp);
        if diff.is_empty() {
            return f64::NAN;
        }
        let area = diff.iter().map(|d| d.abs()).sum::<f64>() / diff.len() as f64;
        let ymax = self.max_force();
        let ymin = self.y.iter().copied().fold(f64::INFINITY, f64::min);
        let norm = (ymax - ymin).abs() / 2.0;
        let value = area / norm;
        (1.0 + value).ln() * 5.0
    }
}

fn std_dev(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    let mean = values.iter().sum::<f64>() / values.len() as f64;
    let var = values.iter().map(|v| (v - mean) * (v - mean)).sum::<f64>() / values.len() as f64;
    var.sqrt()
}

/// Index of the finite x-value closest to `target`.
fn nanargmin_abs_offset(x: &[f64], target: f64) -> Option<usize> {
    let mut best: Option<(usize, f64)> = None;
    for (i, &v) in x.iter().enumerate() {
        if !v.is_finite() {
            continue;
        }
        let d = (v - target).abs();
        if best.map_or(true, |(_, bd)| d < bd) {
            best = Some((i, d));
        }
    }
    best.map(|(i, _)| i)
}
