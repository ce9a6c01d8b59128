//! Built-in contact mechanics models (Hertz/Sneddon family).
//!
//! All models share the convention that the curve is indented for tip
//! positions below the contact point: the indentation depth is
//! `contact_point - delta`, and the model evaluates to the baseline wherever
//! that depth is not positive.

use crate::data::Curve;
use crate::domain::{Axis, Segment};
use crate::model::{AncillaryDef, FitModel, ModelKernel, Param, ParamDef, ParamSet};

/// All built-in models, in registration order.
pub fn builtin_models() -> Vec<FitModel> {
    vec![
        hertz_paraboloidal(),
        sneddon_spherical_approx(),
        hertz_conical(),
        hertz_three_sided_pyramid(),
    ]
}

/// Hertz model for a paraboloidal indenter.
///
/// `F = 4/3 · E/(1-nu²) · sqrt(R) · delta^(3/2)`
pub fn hertz_paraboloidal() -> FitModel {
    FitModel {
        key: "hertz_para".to_string(),
        name: "parabolic indenter (Hertz)".to_string(),
        parameters: standard_parameters(),
        ancillaries: Vec::new(),
        kernel: ModelKernel::Native(|params, delta| {
            let e = params.value("E");
            let r = params.value("R");
            let nu = params.value("nu");
            let cp = params.value("contact_point");
            let bl = params.value("baseline");
            let aa = 4.0 / 3.0 * e / (1.0 - nu * nu) * r.sqrt();
            delta
                .iter()
                .map(|&d| {
                    let root = cp - d;
                    if root > 0.0 {
                        aa * root.powf(1.5) + bl
                    } else {
                        bl
                    }
                })
                .collect()
        }),
        valid_axis_x: Axis::TipPosition,
        valid_axis_y: Axis::Force,
    }
}

/// Hertz model for a spherical indenter (Sneddon, series approximation).
///
/// The paraboloidal force with a fourth-order correction in `delta/R`,
/// accurate for indentations that are not small against the tip radius.
pub fn sneddon_spherical_approx() -> FitModel {
    FitModel {
        key: "sneddon_spher_approx".to_string(),
        name: "spherical indenter (Sneddon, approximative)".to_string(),
        parameters: standard_parameters(),
        ancillaries: vec![AncillaryDef {
            key: "E".to_string(),
            name: "Young's Modulus estimate".to_string(),
            unit: "Pa".to_string(),
            compute: ancillary_emodulus_estimate,
        }],
        kernel: ModelKernel::Native(|params, delta| {
            let e = params.value("E");
            let r = params.value("R");
            let nu = params.value("nu");
            let cp = params.value("contact_point");
            let bl = params.value("baseline");
            let aa = 4.0 / 3.0 * e / (1.0 - nu * nu) * r.sqrt();
            delta
                .iter()
                .map(|&d| {
                    let root = cp - d;
                    if root > 0.0 {
                        let x = root / r;
                        let series = 1.0 - x / 10.0 - x * x / 840.0
                            + 11.0 / 15120.0 * x * x * x
                            + 1357.0 / 6_652_800.0 * x * x * x * x;
                        aa * root.powf(1.5) * series + bl
                    } else {
                        bl
                    }
                })
                .collect()
        }),
        valid_axis_x: Axis::TipPosition,
        valid_axis_y: Axis::Force,
    }
}

/// Hertz model for a conical indenter.
///
/// `F = 2/pi · tan(alpha) · E/(1-nu²) · delta²`
pub fn hertz_conical() -> FitModel {
    FitModel {
        key: "hertz_cone".to_string(),
        name: "conical indenter (Hertz)".to_string(),
        parameters: angle_parameters(),
        ancillaries: Vec::new(),
        kernel: ModelKernel::Native(|params, delta| {
            let e = params.value("E");
            let alpha = params.value("alpha").to_radians();
            let nu = params.value("nu");
            let cp = params.value("contact_point");
            let bl = params.value("baseline");
            let aa = 2.0 * alpha.tan() / std::f64::consts::PI * e / (1.0 - nu * nu);
            delta
                .iter()
                .map(|&d| {
                    let root = cp - d;
                    if root > 0.0 {
                        aa * root * root + bl
                    } else {
                        bl
                    }
                })
                .collect()
        }),
        valid_axis_x: Axis::TipPosition,
        valid_axis_y: Axis::Force,
    }
}

/// Hertz model for a three-sided pyramidal indenter.
///
/// `F = 0.8887 · tan(alpha) · E/(1-nu²) · delta²`
pub fn hertz_three_sided_pyramid() -> FitModel {
    FitModel {
        key: "hertz_pyr3s".to_string(),
        name: "pyramidal indenter, three-sided (Hertz)".to_string(),
        parameters: angle_parameters(),
        ancillaries: Vec::new(),
        kernel: ModelKernel::Native(|params, delta| {
            let e = params.value("E");
            let alpha = params.value("alpha").to_radians();
            let nu = params.value("nu");
            let cp = params.value("contact_point");
            let bl = params.value("baseline");
            let aa = 0.8887 * alpha.tan() * e / (1.0 - nu * nu);
            delta
                .iter()
                .map(|&d| {
                    let root = cp - d;
                    if root > 0.0 {
                        aa * root * root + bl
                    } else {
                        bl
                    }
                })
                .collect()
        }),
        valid_axis_x: Axis::TipPosition,
        valid_axis_y: Axis::Force,
    }
}

/// `E, R, nu, contact_point, baseline` (spherical/paraboloidal tips).
fn standard_parameters() -> Vec<ParamDef> {
    vec![
        ParamDef::new("E", "Young's Modulus", "Pa", Param::new(3e3).with_min(0.0)),
        ParamDef::new(
            "R",
            "Tip Radius",
            "m",
            Param::new(10e-6).with_min(0.0).fixed(),
        ),
        ParamDef::new(
            "nu",
            "Poisson's Ratio",
            "",
            Param::new(0.5).with_min(0.0).with_max(0.5).fixed(),
        ),
        ParamDef::new("contact_point", "Contact Point", "m", Param::new(0.0)),
        ParamDef::new("baseline", "Force Baseline", "N", Param::new(0.0)),
    ]
}

/// `E, alpha, nu, contact_point, baseline` (cone/pyramid tips).
fn angle_parameters() -> Vec<ParamDef> {
    vec![
        ParamDef::new("E", "Young's Modulus", "Pa", Param::new(3e3).with_min(0.0)),
        ParamDef::new(
            "alpha",
            "Half Cone Angle",
            "°",
            Param::new(25.0).with_min(0.0).with_max(90.0).fixed(),
        ),
        ParamDef::new(
            "nu",
            "Poisson's Ratio",
            "",
            Param::new(0.5).with_min(0.0).with_max(0.5).fixed(),
        ),
        ParamDef::new("contact_point", "Contact Point", "m", Param::new(0.0)),
        ParamDef::new("baseline", "Force Baseline", "N", Param::new(0.0)),
    ]
}

/// Rough modulus estimate from the maximum-indentation point.
///
/// Inverts the paraboloidal Hertz force at the deepest sample of the
/// approach segment, using the context's `R`, `nu` and `contact_point`.
/// Returns NaN when the curve has no tip position or no indentation.
fn ancillary_emodulus_estimate(curve: &Curve, context: &ParamSet) -> f64 {
    let Some(tip) = curve.tip_position.as_ref() else {
        return f64::NAN;
    };
    let r = context.value("R");
    let nu = context.value("nu");
    let cp = context.value("contact_point");
    if !(r.is_finite() && r > 0.0 && nu.is_finite() && cp.is_finite()) {
        return f64::NAN;
    }

    let indices = curve.segment_indices(Segment::Approach);
    let mut best: Option<usize> = None;
    for &i in &indices {
        let depth = cp - tip[i];
        if depth > 0.0 && best.map_or(true, |b| depth > cp - tip[b]) {
            best = Some(i);
        }
    }
    let Some(imax) = best else {
        return f64::NAN;
    };

    let depth = cp - tip[imax];
    let force = curve.force[imax];
    if !(force.is_finite() && force > 0.0) {
        return f64::NAN;
    }
    0.75 * force * (1.0 - nu * nu) / (r.sqrt() * depth.powf(1.5))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::sample::{hertz_approach_curve, SyntheticCurve};

    fn eval(model: &FitModel, delta: &[f64]) -> Vec<f64> {
        model.eval_raw(&model.parameter_defaults(), delta)
    }

    #[test]
    fn baseline_left_of_contact() {
        for model in builtin_models() {
            let out = eval(&model, &[1e-6, 0.5e-6, 0.0]);
            assert_eq!(out[0], 0.0, "{} above surface", model.key);
            assert_eq!(out[2], 0.0, "{} exactly at contact", model.key);
        }
    }

    #[test]
    fn force_increases_with_indentation() {
        for model in builtin_models() {
            let out = eval(&model, &[-0.2e-6, -0.5e-6, -1.0e-6]);
            assert!(out[0] > 0.0, "{}", model.key);
            assert!(out[1] > out[0], "{}", model.key);
            assert!(out[2] > out[1], "{}", model.key);
        }
    }

    #[test]
    fn spherical_approximation_close_to_parabolic_for_shallow_indentation() {
        let para = hertz_paraboloidal();
        let spher = sneddon_spherical_approx();
        // delta/R = 0.01: the series correction is below a percent.
        let delta = [-0.1e-6];
        let fp = eval(&para, &delta)[0];
        let fs = eval(&spher, &delta)[0];
        assert!((fp - fs).abs() / fp < 0.01);
        // At delta/R = 0.1 the correction is visible and reduces the force.
        let delta = [-1.0e-6];
        let fp = eval(&para, &delta)[0];
        let fs = eval(&spher, &delta)[0];
        assert!(fs < fp);
        assert!((fp - fs) / fp > 0.005);
    }

    #[test]
    fn hertz_para_matches_generator() {
        let cfg = SyntheticCurve::default();
        let curve = hertz_approach_curve(&cfg);
        let model = hertz_paraboloidal();
        let tip = curve.tip_position.as_ref().unwrap();
        let out = model.eval_raw(&model.parameter_defaults(), tip);
        for (a, b) in out.iter().zip(curve.force.iter()) {
            assert!((a - b).abs() < 1e-15);
        }
    }

    #[test]
    fn emodulus_ancillary_recovers_order_of_magnitude() {
        let cfg = SyntheticCurve::default();
        let curve = hertz_approach_curve(&cfg);
        let model = sneddon_spherical_approx();
        let context = model.parameter_defaults();
        let est = (model.ancillaries[0].compute)(&curve, &context);
        // The paraboloidal inversion on spherical-ish data is approximate but
        // must land close to the true modulus.
        assert!(est.is_finite());
        assert!((est - cfg.e_modulus).abs() / cfg.e_modulus < 0.05, "est={est}");
    }

    #[test]
    fn emodulus_ancillary_nan_without_tip_position() {
        let cfg = SyntheticCurve::default();
        let mut curve = hertz_approach_curve(&cfg);
        curve.tip_position = None;
        let model = sneddon_spherical_approx();
        let est = (model.ancillaries[0].compute)(&curve, &model.parameter_defaults());
        assert!(est.is_nan());
    }
}
