//! Fit profile persistence.
//!
//! A profile is the persisted configuration record behind the CLI: the
//! preprocessing recipe, model choice and per-parameter overrides, fitting
//! range, contact-point weighting, training-set reference and regressor
//! choice. The primary format is JSON; the legacy `key = value` line format
//! of earlier tool generations is still readable.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::domain::{FitRange, RangeKind, RegressorKind, Segment};
use crate::error::FdError;
use crate::fit::FitProperties;
use crate::model::{FitModel, ParamSet};
use crate::rate::training::BUILTIN_LABEL;

/// Per-parameter initial value and vary flag stored in a profile.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ProfileParam {
    pub value: f64,
    pub vary: bool,
}

/// The persisted fit configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Profile {
    pub preprocessing: Vec<String>,
    pub preprocessing_options: BTreeMap<String, Value>,
    pub model_key: String,
    /// Overrides applied on top of the model's parameter defaults.
    pub fit_params: BTreeMap<String, ProfileParam>,
    pub range_kind: RangeKind,
    pub range_x: [f64; 2],
    pub segment: Segment,
    pub weight_cp: f64,
    pub gcf_k: f64,
    pub optimal_fit_edelta: bool,
    pub optimal_fit_num_samples: usize,
    /// Training-set reference: the bundled label or a directory path.
    pub training_set: String,
    pub regressor: RegressorKind,
    /// External model definition files loaded before fitting.
    pub external_models: Vec<PathBuf>,
}

impl Default for Profile {
    fn default() -> Self {
        Profile {
            preprocessing: vec![
                "compute_tip_position".to_string(),
                "correct_force_offset".to_string(),
                "correct_tip_offset".to_string(),
            ],
            preprocessing_options: BTreeMap::new(),
            model_key: "sneddon_spher_approx".to_string(),
            fit_params: BTreeMap::new(),
            range_kind: RangeKind::Absolute,
            range_x: [0.0, 0.0],
            segment: Segment::Approach,
            weight_cp: 5e-7,
            gcf_k: 1.0,
            optimal_fit_edelta: false,
            optimal_fit_num_samples: 100,
            training_set: BUILTIN_LABEL.to_string(),
            regressor: RegressorKind::RandomForest,
            external_models: Vec::new(),
        }
    }
}

impl Profile {
    /// Load a profile, accepting JSON or the legacy line format.
    pub fn load(path: &Path) -> Result<Profile, FdError> {
        let text = fs::read_to_string(path).map_err(|e| FdError::io(path, e))?;
        match serde_json::from_str(&text) {
            Ok(profile) => Ok(profile),
            Err(_) => Profile::parse_legacy(&text).map_err(|reason| FdError::Parse {
                path: path.to_path_buf(),
                reason,
            }),
        }
    }

    pub fn save(&self, path: &Path) -> Result<(), FdError> {
        let text = serde_json::to_string_pretty(self).map_err(|e| FdError::Parse {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;
        fs::write(path, text).map_err(|e| FdError::io(path, e))
    }

    /// Parse the legacy `key = value` format.
    ///
    /// Recognized keys: `model_key`, `preprocessing` (comma-separated),
    /// `range_type`, `range_x` (two comma-separated floats), `segment`
    /// (`approach`/`retract`), `weight_cp`, `gcf_k`, `training_set`,
    /// `regressor`, and per-parameter `fit param <key> value` /
    /// `fit param <key> vary` entries.
    fn parse_legacy(text: &str) -> Result<Profile, String> {
        let mut profile = Profile::default();
        for (lineno, raw) in text.lines().enumerate() {
            let line = raw.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let Some((key, value)) = line.split_once('=') else {
                return Err(format!("line {} has no '=': '{raw}'", lineno + 1));
            };
            let key = key.trim();
            let value = value.trim();
            let bad = |what: &str| format!("invalid {what} '{value}' on line {}", lineno + 1);

            if let Some(param_key) = key
                .strip_prefix("fit param ")
                .and_then(|rest| rest.strip_suffix(" value"))
            {
                let parsed: f64 = value.parse().map_err(|_| bad("parameter value"))?;
                let entry = profile
                    .fit_params
                    .entry(param_key.to_string())
                    .or_insert(ProfileParam {
                        value: parsed,
                        vary: true,
                    });
                entry.value = parsed;
                continue;
            }
            if let Some(param_key) = key
                .strip_prefix("fit param ")
                .and_then(|rest| rest.strip_suffix(" vary"))
            {
                let parsed: bool = value.parse().map_err(|_| bad("vary flag"))?;
                let entry = profile
                    .fit_params
                    .entry(param_key.to_string())
                    .or_insert(ProfileParam {
                        value: f64::NAN,
                        vary: parsed,
                    });
                entry.vary = parsed;
                continue;
            }

            match key {
                "model_key" => profile.model_key = value.to_string(),
                "preprocessing" => {
                    profile.preprocessing = value
                        .split(',')
                        .map(|s| s.trim().to_string())
                        .filter(|s| !s.is_empty())
                        .collect();
                }
                "range_type" => {
                    profile.range_kind = match value {
                        "absolute" => RangeKind::Absolute,
                        "relative cp" | "relative-cp" => RangeKind::RelativeCp,
                        _ => return Err(bad("range type")),
                    };
                }
                "range_x" => {
                    let parts: Vec<&str> = value.split(',').map(str::trim).collect();
                    if parts.len() != 2 {
                        return Err(bad("range"));
                    }
                    profile.range_x = [
                        parts[0].parse().map_err(|_| bad("range"))?,
                        parts[1].parse().map_err(|_| bad("range"))?,
                    ];
                }
                "segment" => {
                    profile.segment = match value {
                        "approach" | "0" => Segment::Approach,
                        "retract" | "1" => Segment::Retract,
                        _ => return Err(bad("segment")),
                    };
                }
                "weight_cp" => {
                    profile.weight_cp = value.parse().map_err(|_| bad("weight_cp"))?;
                }
                "gcf_k" => {
                    profile.gcf_k = value.parse().map_err(|_| bad("gcf_k"))?;
                }
                "training_set" | "rating training set" => {
                    profile.training_set = value.to_string();
                }
                "regressor" | "rating regressor" => {
                    profile.regressor = match value {
                        "random-forest" | "Random Forest" => RegressorKind::RandomForest,
                        "decision-tree" | "Decision Tree" => RegressorKind::DecisionTree,
                        "knn" => RegressorKind::Knn,
                        "ridge" => RegressorKind::Ridge,
                        _ => return Err(bad("regressor")),
                    };
                }
                _ => return Err(format!("unknown profile key '{key}'")),
            }
        }

        // A vary-only override without a value would inject NaN.
        for (key, param) in &profile.fit_params {
            if param.value.is_nan() {
                return Err(format!("fit parameter '{key}' has a vary flag but no value"));
            }
        }
        Ok(profile)
    }

    /// Build the fit properties encoded by this profile.
    pub fn fit_properties(&self) -> FitProperties {
        let mut props = FitProperties::new();
        props.set_model_key(self.model_key.clone());
        props.set_preprocessing(self.preprocessing.clone());
        props.set_preprocessing_options(self.preprocessing_options.clone());
        props.set_segment(self.segment);
        props.set_range(FitRange {
            kind: self.range_kind,
            min: self.range_x[0],
            max: self.range_x[1],
        });
        props.set_weight_cp(self.weight_cp);
        props.set_gcf_k(self.gcf_k);
        props.set_optimal_fit_edelta(self.optimal_fit_edelta);
        props.set_optimal_fit_num_samples(self.optimal_fit_num_samples);
        props
    }

    /// Initial parameters for a model: the model defaults with this
    /// profile's value/vary overrides applied (bounds stay the model's).
    pub fn initial_params(&self, model: &FitModel) -> Result<ParamSet, FdError> {
        let mut params = model.parameter_defaults();
        for (key, over) in &self.fit_params {
            let Some(param) = params.get_mut(key) else {
                return Err(FdError::Config(format!(
                    "profile sets parameter '{}' unknown to model '{}'",
                    key, model.key
                )));
            };
            param.value = over.value;
            param.vary = over.vary;
        }
        Ok(params)
    }
}
