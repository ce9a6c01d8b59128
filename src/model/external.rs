//! Loading fit models from external definition files.
//!
//! An external model is a JSON file describing the full [`FitModel`]
//! contract: key, display name, parameter table, and a model form chosen
//! from a closed set of expressions in the indentation depth
//! `depth = contact_point - delta`:
//!
//! ```json
//! {
//!   "key": "power_basic",
//!   "name": "power-law indenter (external)",
//!   "parameters": [
//!     {"key": "a", "name": "Prefactor", "unit": "N/m^1.5", "value": 1.0},
//!     {"key": "contact_point", "name": "Contact Point", "unit": "m", "value": 0.0},
//!     {"key": "baseline", "name": "Force Baseline", "unit": "N", "value": 0.0}
//!   ],
//!   "form": {"type": "power_law", "prefactor_key": "a", "exponent": 1.5}
//! }
//! ```
//!
//! The file is parsed and fully validated (form references, then the common
//! registration checks) before the registry is touched, so a malformed
//! definition can never leave a half-registered model behind.

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::domain::Axis;
use crate::error::FdError;
use crate::model::{
    validate_model, FitModel, ModelKernel, ModelRegistry, Param, ParamDef, ParamSet,
};

/// Closed set of expression kernels available to external models.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ModelForm {
    /// `F = prefactor · depth^exponent + baseline`
    PowerLaw { prefactor_key: String, exponent: f64 },
    /// `F = sum_i coeff_i · depth^(i+1) + baseline`
    Polynomial { coefficient_keys: Vec<String> },
}

impl ModelForm {
    /// Evaluate the form; the baseline applies left of the contact point.
    pub fn eval(&self, params: &ParamSet, delta: &[f64]) -> Vec<f64> {
        let cp = params.value("contact_point");
        let bl = params.value("baseline");
        match self {
            ModelForm::PowerLaw {
                prefactor_key,
                exponent,
            } => {
                let a = params.value(prefactor_key);
                delta
                    .iter()
                    .map(|&d| {
                        let depth = cp - d;
                        if depth > 0.0 {
                            a * depth.powf(*exponent) + bl
                        } else {
                            bl
                        }
                    })
                    .collect()
            }
            ModelForm::Polynomial { coefficient_keys } => {
                let coeffs: Vec<f64> =
                    coefficient_keys.iter().map(|k| params.value(k)).collect();
                delta
                    .iter()
                    .map(|&d| {
                        let depth = cp - d;
                        if depth > 0.0 {
                            let mut acc = bl;
                            let mut pow = depth;
                            for &c in &coeffs {
                                acc += c * pow;
                                pow *= depth;
                            }
                            acc
                        } else {
                            bl
                        }
                    })
                    .collect()
            }
        }
    }

    /// Check that the form only references declared parameters.
    fn validate(&self, parameters: &[ParamDef]) -> Result<(), String> {
        let has = |key: &str| parameters.iter().any(|p| p.key == key);
        match self {
            ModelForm::PowerLaw {
                prefactor_key,
                exponent,
            } => {
                if !has(prefactor_key) {
                    return Err(format!(
                        "form references undeclared parameter '{prefactor_key}'"
                    ));
                }
                if !(exponent.is_finite() && *exponent > 0.0) {
                    return Err(format!("invalid power-law exponent {exponent}"));
                }
            }
            ModelForm::Polynomial { coefficient_keys } => {
                if coefficient_keys.is_empty() {
                    return Err("polynomial form needs at least one coefficient".into());
                }
                for key in coefficient_keys {
                    if !has(key) {
                        return Err(format!("form references undeclared parameter '{key}'"));
                    }
                }
            }
        }
        for required in ["contact_point", "baseline"] {
            if !has(required) {
                return Err(format!("expression models need a '{required}' parameter"));
            }
        }
        Ok(())
    }
}

/// One parameter row of an external definition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExternalParam {
    pub key: String,
    pub name: String,
    #[serde(default)]
    pub unit: String,
    pub value: f64,
    #[serde(default = "neg_infinity")]
    pub min: f64,
    #[serde(default = "infinity")]
    pub max: f64,
    #[serde(default = "default_true")]
    pub vary: bool,
}

fn neg_infinity() -> f64 {
    f64::NEG_INFINITY
}

fn infinity() -> f64 {
    f64::INFINITY
}

fn default_true() -> bool {
    true
}

/// The on-disk external model definition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExternalModelFile {
    pub key: String,
    pub name: String,
    pub parameters: Vec<ExternalParam>,
    pub form: ModelForm,
}

impl ExternalModelFile {
    /// Build and validate a [`FitModel`] from the definition.
    pub fn into_model(self) -> Result<FitModel, FdError> {
        let parameters: Vec<ParamDef> = self
            .parameters
            .iter()
            .map(|p| {
                ParamDef::new(
                    &p.key,
                    &p.name,
                    &p.unit,
                    Param {
                        value: p.value,
                        min: p.min,
                        max: p.max,
                        vary: p.vary,
                    },
                )
            })
            .collect();

        self.form
            .validate(&parameters)
            .map_err(|reason| FdError::ModelValidation {
                key: self.key.clone(),
                reason,
            })?;

        let model = FitModel {
            key: self.key,
            name: self.name,
            parameters,
            ancillaries: Vec::new(),
            kernel: ModelKernel::Expr(self.form),
            valid_axis_x: Axis::TipPosition,
            valid_axis_y: Axis::Force,
        };
        validate_model(&model)?;
        Ok(model)
    }
}

/// Load an external model definition, running the same sanity checks as
/// built-in registration.
pub fn load_model_from_file(path: &Path) -> Result<FitModel, FdError> {
    let text = fs::read_to_string(path).map_err(|e| FdError::io(path, e))?;
    let file: ExternalModelFile = serde_json::from_str(&text).map_err(|e| FdError::Parse {
        path: path.to_path_buf(),
        reason: e.to_string(),
    })?;
    file.into_model()
}

/// Load an external model and register it, making it available under its
/// declared key for the remainder of the process.
pub fn register_model_from_file(
    registry: &mut ModelRegistry,
    path: &Path,
) -> Result<String, FdError> {
    let model = load_model_from_file(path)?;
    let key = model.key.clone();
    registry.register(model)?;
    Ok(key)
}
