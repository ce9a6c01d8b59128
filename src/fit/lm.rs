//! Bridge to the external Levenberg-Marquardt minimizer.
//!
//! The `levenberg-marquardt` crate works on an unconstrained free-parameter
//! vector. This module maps our bounded/fixed [`ParamSet`] onto that vector:
//!
//! - parameters with `vary = false` are excluded from the vector entirely
//! - bounded parameters are transformed with the MINPACK-style sine
//!   transform, so the minimizer moves in an unconstrained coordinate while
//!   the model always sees values inside the bounds
//!
//! The Jacobian is computed with central differences; the minimizer itself
//! stays a black box behind [`LevenbergMarquardt::minimize`].

use levenberg_marquardt::{LeastSquaresProblem, LevenbergMarquardt};
use nalgebra::storage::Owned;
use nalgebra::{DMatrix, DVector, Dyn};

use crate::domain::MinimizerOptions;
use crate::model::{residual, FitModel, ParamSet};

/// Outcome of one minimizer invocation.
#[derive(Debug, Clone)]
pub struct FitOutcome {
    pub params: ParamSet,
    pub success: bool,
    /// Sum of squared (weighted) residuals at the final parameters.
    pub chi_sqr: f64,
}

/// Bounds transform between external (bounded) and internal (free) space.
#[derive(Debug, Clone, Copy)]
struct Bounds {
    min: f64,
    max: f64,
}

impl Bounds {
    fn to_internal(self, value: f64) -> f64 {
        match (self.min.is_finite(), self.max.is_finite()) {
            (true, true) => {
                let span = self.max - self.min;
                let u = ((value - self.min) / span * 2.0 - 1.0).clamp(-1.0, 1.0);
                u.asin()
            }
            (true, false) => {
                let shifted = (value - self.min + 1.0).max(1.0);
                (shifted * shifted - 1.0).sqrt()
            }
            (false, true) => {
                let shifted = (self.max - value + 1.0).max(1.0);
                (shifted * shifted - 1.0).sqrt()
            }
            (false, false) => value,
        }
    }

    fn to_external(self, theta: f64) -> f64 {
        match (self.min.is_finite(), self.max.is_finite()) {
            (true, true) => self.min + (self.max - self.min) / 2.0 * (theta.sin() + 1.0),
            (true, false) => self.min - 1.0 + (theta * theta + 1.0).sqrt(),
            (false, true) => self.max + 1.0 - (theta * theta + 1.0).sqrt(),
            (false, false) => theta,
        }
    }
}

struct CurveProblem<'a> {
    model: &'a FitModel,
    x: &'a [f64],
    y: &'a [f64],
    weight_cp: f64,
    gcf_k: f64,
    /// Full parameter set, kept in sync with `theta`.
    params: ParamSet,
    free_keys: Vec<String>,
    free_bounds: Vec<Bounds>,
    theta: DVector<f64>,
}

impl CurveProblem<'_> {
    fn params_for_theta(&self, theta: &DVector<f64>) -> ParamSet {
        let mut params = self.params.clone();
        for (i, key) in self.free_keys.iter().enumerate() {
            params.set_value(key, self.free_bounds[i].to_external(theta[i]));
        }
        params
    }

    fn residuals_for(&self, params: &ParamSet) -> Option<DVector<f64>> {
        let r = residual::residuals(self.model, params, self.x, self.y, self.weight_cp, self.gcf_k);
        if r.iter().all(|v| v.is_finite()) {
            Some(DVector::from_vec(r))
        } else {
            None
        }
    }
}

impl LeastSquaresProblem<f64, Dyn, Dyn> for CurveProblem<'_> {
    type ResidualStorage = Owned<f64, Dyn>;
    type JacobianStorage = Owned<f64, Dyn, Dyn>;
    type ParameterStorage = Owned<f64, Dyn>;

    fn set_params(&mut self, theta: &DVector<f64>) {
        self.theta.copy_from(theta);
        self.params = self.params_for_theta(theta);
    }

    fn params(&self) -> DVector<f64> {
        self.theta.clone()
    }

    fn residuals(&self) -> Option<DVector<f64>> {
        self.residuals_for(&self.params)
    }

    fn jacobian(&self) -> Option<DMatrix<f64>> {
        let n = self.x.len();
        let p = self.free_keys.len();
        let mut jac = DMatrix::<f64>::zeros(n, p);
        for j in 0..p {
            let h = f64::EPSILON.sqrt() * (1.0 + self.theta[j].abs());
            let mut plus = self.theta.clone();
            plus[j] += h;
            let mut minus = self.theta.clone();
            minus[j] -= h;
            let rp = self.residuals_for(&self.params_for_theta(&plus))?;
            let rm = self.residuals_for(&self.params_for_theta(&minus))?;
            for i in 0..n {
                jac[(i, j)] = (rp[i] - rm[i]) / (2.0 * h);
            }
        }
        Some(jac)
    }
}

/// Run the external minimizer on one prepared data window.
///
/// Never fails: non-finite data or a non-converging minimizer is reported
/// through `success = false` with the last parameter values held.
pub fn minimize(
    model: &FitModel,
    x: &[f64],
    y: &[f64],
    weight_cp: f64,
    gcf_k: f64,
    params_initial: &ParamSet,
    opts: &MinimizerOptions,
) -> FitOutcome {
    let mut free_keys = Vec::new();
    let mut free_bounds = Vec::new();
    let mut theta = Vec::new();
    for (key, param) in params_initial.iter() {
        if param.vary {
            let bounds = Bounds {
                min: param.min,
                max: param.max,
            };
            theta.push(bounds.to_internal(param.value));
            free_keys.push(key.to_string());
            free_bounds.push(bounds);
        }
    }

    let chi = |params: &ParamSet| -> f64 {
        residual::residuals(model, params, x, y, weight_cp, gcf_k)
            .iter()
            .map(|r| r * r)
            .sum()
    };

    if free_keys.is_empty() {
        // Nothing to optimize; evaluate the configuration as-is.
        let chi_sqr = chi(params_initial);
        return FitOutcome {
            params: params_initial.clone(),
            success: chi_sqr.is_finite(),
            chi_sqr,
        };
    }

    let problem = CurveProblem {
        model,
        x,
        y,
        weight_cp,
        gcf_k,
        params: params_initial.clone(),
        free_keys,
        free_bounds,
        theta: DVector::from_vec(theta),
    };

    let lm = LevenbergMarquardt::new()
        .with_ftol(opts.ftol)
        .with_xtol(opts.xtol)
        .with_patience(opts.patience);
    let (problem, report) = lm.minimize(problem);

    let params = problem.params_for_theta(&problem.theta);
    let chi_sqr = chi(&params);
    FitOutcome {
        params,
        success: report.termination.was_successful() && chi_sqr.is_finite(),
        chi_sqr,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::hertz::hertz_paraboloidal;

    #[test]
    fn bounds_transform_round_trips() {
        let cases = [
            (Bounds { min: 0.0, max: 1.0 }, 0.25),
            (
                Bounds {
                    min: 0.0,
                    max: f64::INFINITY,
                },
                3000.0,
            ),
            (
                Bounds {
                    min: f64::NEG_INFINITY,
                    max: 2.0,
                },
                -5.0,
            ),
            (
                Bounds {
                    min: f64::NEG_INFINITY,
                    max: f64::INFINITY,
                },
                -1.5e-6,
            ),
        ];
        for (bounds, value) in cases {
            let theta = bounds.to_internal(value);
            let back = bounds.to_external(theta);
            assert!(
                (back - value).abs() < 1e-9 * value.abs().max(1.0),
                "{value} -> {theta} -> {back}"
            );
        }
    }

    #[test]
    fn bounded_values_stay_inside_bounds() {
        let bounds = Bounds { min: 0.0, max: 0.5 };
        for theta in [-10.0, -1.0, 0.0, 2.0, 100.0] {
            let v = bounds.to_external(theta);
            assert!((0.0..=0.5).contains(&v));
        }
    }

    #[test]
    fn recovers_modulus_from_perturbed_start() {
        let model = hertz_paraboloidal();
        let mut truth = model.parameter_defaults();
        truth.set_value("E", 2500.0);

        let x: Vec<f64> = (0..200).map(|i| 1e-6 - i as f64 * 1.5e-8).collect();
        let y = model.eval_raw(&truth, &x);

        let mut start = model.parameter_defaults();
        start.set_value("E", 800.0);

        let outcome = minimize(
            &model,
            &x,
            &y,
            0.0,
            1.0,
            &start,
            &MinimizerOptions::default(),
        );
        assert!(outcome.success);
        assert!(
            (outcome.params.value("E") - 2500.0).abs() / 2500.0 < 1e-3,
            "E = {}",
            outcome.params.value("E")
        );
    }

    #[test]
    fn fixed_parameters_do_not_move() {
        let model = hertz_paraboloidal();
        let mut start = model.parameter_defaults();
        start.set_value("E", 1000.0);
        if let Some(p) = start.get_mut("contact_point") {
            p.vary = false;
            p.value = 0.0;
        }

        let x: Vec<f64> = (0..100).map(|i| 0.5e-6 - i as f64 * 1.5e-8).collect();
        let truth = model.parameter_defaults();
        let y = model.eval_raw(&truth, &x);

        let outcome = minimize(
            &model,
            &x,
            &y,
            0.0,
            1.0,
            &start,
            &MinimizerOptions::default(),
        );
        assert_eq!(outcome.params.value("contact_point"), 0.0);
        let r = outcome.params.value("R");
        assert_eq!(r, 10e-6, "fixed R must not move");
    }

    #[test]
    fn all_fixed_parameters_evaluate_without_optimizing() {
        let model = hertz_paraboloidal();
        let mut params = model.parameter_defaults();
        for key in ["E", "contact_point", "baseline"] {
            if let Some(p) = params.get_mut(key) {
                p.vary = false;
            }
        }
        let x = [0.5e-6, -0.5e-6];
        let y = model.eval_raw(&params, &x);
        let outcome = minimize(&model, &x, &y, 0.0, 1.0, &params, &MinimizerOptions::default());
        assert!(outcome.success);
        assert!(outcome.chi_sqr < 1e-24);
    }
}
