//! Model evaluation wrappers and the fit residual function.
//!
//! The fitter never calls a model kernel directly. It goes through
//! [`model_direction_agnostic`], which
//!
//! - reverses the abscissa when it is ascending (models assume the approach
//!   runs from large tip positions toward indentation), and
//! - applies the geometric correction factor `k` by transforming the
//!   contact-point-relative coordinate, leaving the raw data untouched:
//!   `delta' = cp + (delta - cp)/k`.
//!
//! For the Hertz family the correction rescales the indentation depth as
//! `(cp - delta)/k`, so a paraboloidal fit with factor `k` yields
//! `E(k) = E(1) · k^(3/2)`.

use crate::model::{FitModel, ParamSet};

/// Weights taper linearly to this floor at the contact point, so the samples
/// there keep a small say in the fit instead of being erased entirely.
pub const CP_WEIGHT_FLOOR: f64 = 1e-3;

/// Evaluate a model regardless of the direction of the abscissa, applying
/// the geometric correction factor.
pub fn model_direction_agnostic(
    model: &FitModel,
    params: &ParamSet,
    x: &[f64],
    gcf_k: f64,
) -> Vec<f64> {
    let reverted = x.len() > 1 && x[0] < x[x.len() - 1];

    let corrected: Vec<f64>;
    let delta: &[f64] = if gcf_k != 1.0 {
        let cp = params.value("contact_point");
        corrected = x.iter().map(|&d| cp + (d - cp) / gcf_k).collect();
        &corrected
    } else {
        x
    };

    if reverted {
        let rev: Vec<f64> = delta.iter().rev().copied().collect();
        let mut out = model.eval_raw(params, &rev);
        out.reverse();
        out
    } else {
        model.eval_raw(params, delta)
    }
}

/// Residuals for fitting: model output minus measured values, down-weighted
/// around the contact point.
///
/// `weight_cp` is the half-width (in x units) of the linear down-weighting
/// window; zero disables weighting. The contact-point region shows adhesion
/// and snap-in artifacts that contact models cannot represent, and without
/// the window those few samples dominate the nonlinear fit.
pub fn residuals(
    model: &FitModel,
    params: &ParamSet,
    x: &[f64],
    y: &[f64],
    weight_cp: f64,
    gcf_k: f64,
) -> Vec<f64> {
    let md = model_direction_agnostic(model, params, x, gcf_k);
    let mut resid: Vec<f64> = y.iter().zip(md.iter()).map(|(&yi, &mi)| yi - mi).collect();

    if weight_cp > 0.0 {
        let cp = params.value("contact_point");
        let weights = contact_point_weights(cp, x, weight_cp);
        for (r, w) in resid.iter_mut().zip(weights.iter()) {
            *r *= w;
        }
    }
    resid
}

/// Linear contact-point weights.
///
/// Weights grow linearly with the distance from the contact point, reach 1
/// at `weight_dist`, and never drop below [`CP_WEIGHT_FLOOR`].
pub fn contact_point_weights(cp: f64, delta: &[f64], weight_dist: f64) -> Vec<f64> {
    delta
        .iter()
        .map(|&d| ((d - cp).abs() / weight_dist).min(1.0).max(CP_WEIGHT_FLOOR))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::hertz::hertz_paraboloidal;

    #[test]
    fn weights_are_one_outside_the_window_and_floored_at_cp() {
        let delta = [-2.0, -1.0, -0.5, 0.0, 0.5, 1.0, 2.0];
        let w = contact_point_weights(0.0, &delta, 1.0);
        assert_eq!(w[0], 1.0);
        assert_eq!(w[6], 1.0);
        assert_eq!(w[3], CP_WEIGHT_FLOOR);
        assert!((w[2] - 0.5).abs() < 1e-12);
        assert!((w[4] - 0.5).abs() < 1e-12);
    }

    #[test]
    fn direction_agnostic_evaluation_matches_reversed_input() {
        let model = hertz_paraboloidal();
        let params = model.parameter_defaults();
        let desc: Vec<f64> = (0..20).map(|i| 1e-6 - i as f64 * 1e-7).collect();
        let asc: Vec<f64> = desc.iter().rev().copied().collect();

        let out_desc = model_direction_agnostic(&model, &params, &desc, 1.0);
        let mut out_asc = model_direction_agnostic(&model, &params, &asc, 1.0);
        out_asc.reverse();
        for (a, b) in out_desc.iter().zip(out_asc.iter()) {
            assert!((a - b).abs() < 1e-18);
        }
    }

    #[test]
    fn geometric_correction_rescales_indentation() {
        let model = hertz_paraboloidal();
        let params = model.parameter_defaults();
        let delta = [-1e-6];
        let f1 = model_direction_agnostic(&model, &params, &delta, 1.0)[0];
        let f05 = model_direction_agnostic(&model, &params, &delta, 0.5)[0];
        // Halving k doubles the effective indentation: F ∝ delta^(3/2).
        assert!((f05 / f1 - 2.0_f64.powf(1.5)).abs() < 1e-9);
    }

    #[test]
    fn zero_half_width_disables_weighting() {
        let model = hertz_paraboloidal();
        let params = model.parameter_defaults();
        let x = [-1e-6, -0.5e-6, 0.5e-6];
        let y = [1e-9, 0.5e-9, 0.0];
        let plain = residuals(&model, &params, &x, &y, 0.0, 1.0);
        let md = model_direction_agnostic(&model, &params, &x, 1.0);
        for ((r, yi), mi) in plain.iter().zip(y.iter()).zip(md.iter()) {
            assert!((r - (yi - mi)).abs() < 1e-18);
        }
    }
}
