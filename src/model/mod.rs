//! Fit models and the model registry.
//!
//! A [`FitModel`] is an immutable descriptor: a unique key, a display name,
//! an ordered parameter list (key, name, unit, default value, bounds, vary
//! flag), optional ancillary parameters, the model kernel, and the axes it
//! is valid for. Models are values, not trait objects with behavior spread
//! over a hierarchy; the kernel is either a native function or a declarative
//! expression loaded from an external file.
//!
//! The [`ModelRegistry`] is an explicit, injectable value so tests can work
//! with isolated registries. A process-wide registry (behind a mutex, since
//! registry mutation is not designed for concurrent writers) is available
//! for the CLI via [`global`].

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, OnceLock};

use serde::{Deserialize, Serialize};

use crate::data::Curve;
use crate::domain::Axis;
use crate::error::FdError;

pub mod external;
pub mod hertz;
pub mod residual;

pub use external::load_model_from_file;

/// One fit parameter: value, bounds, vary flag.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Param {
    pub value: f64,
    pub min: f64,
    pub max: f64,
    pub vary: bool,
}

impl Param {
    pub fn new(value: f64) -> Self {
        Param {
            value,
            min: f64::NEG_INFINITY,
            max: f64::INFINITY,
            vary: true,
        }
    }

    pub fn with_min(mut self, min: f64) -> Self {
        self.min = min;
        self
    }

    pub fn with_max(mut self, max: f64) -> Self {
        self.max = max;
        self
    }

    pub fn fixed(mut self) -> Self {
        self.vary = false;
        self
    }
}

/// An ordered set of named parameters.
///
/// Order matters: it matches the model's declared parameter list and is
/// preserved through serialization.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ParamSet {
    entries: Vec<(String, Param)>,
}

impl ParamSet {
    pub fn new() -> Self {
        ParamSet::default()
    }

    /// Insert or replace a parameter.
    pub fn add(&mut self, key: impl Into<String>, param: Param) {
        let key = key.into();
        if let Some(entry) = self.entries.iter_mut().find(|(k, _)| *k == key) {
            entry.1 = param;
        } else {
            self.entries.push((key, param));
        }
    }

    pub fn get(&self, key: &str) -> Option<&Param> {
        self.entries.iter().find(|(k, _)| k == key).map(|(_, p)| p)
    }

    pub fn get_mut(&mut self, key: &str) -> Option<&mut Param> {
        self.entries
            .iter_mut()
            .find(|(k, _)| k == key)
            .map(|(_, p)| p)
    }

    /// Value of a parameter; NaN when the key is absent so that a missing
    /// parameter surfaces as a failed fit instead of a panic.
    pub fn value(&self, key: &str) -> f64 {
        self.get(key).map_or(f64::NAN, |p| p.value)
    }

    /// Set the value of an existing parameter; returns whether the key
    /// existed.
    pub fn set_value(&mut self, key: &str, value: f64) -> bool {
        match self.get_mut(key) {
            Some(p) => {
                p.value = value;
                true
            }
            None => false,
        }
    }

    pub fn contains(&self, key: &str) -> bool {
        self.get(key).is_some()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Param)> {
        self.entries.iter().map(|(k, p)| (k.as_str(), p))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Number of parameters with `vary = true`.
    pub fn varied_count(&self) -> usize {
        self.entries.iter().filter(|(_, p)| p.vary).count()
    }
}

/// Native model kernel: `(params, delta) -> force`.
pub type NativeModelFn = fn(&ParamSet, &[f64]) -> Vec<f64>;

/// Ancillary parameter recipe: `(curve, initial-parameter context) -> value`.
///
/// The context is the initial parameter set *before* any ancillary seeding,
/// which breaks the circular dependency between ancillaries and initial
/// parameters. Recipes return NaN when the quantity cannot be computed.
pub type AncillaryFn = fn(&Curve, &ParamSet) -> f64;

/// Declared model parameter.
#[derive(Debug, Clone)]
pub struct ParamDef {
    pub key: String,
    pub name: String,
    pub unit: String,
    pub default: Param,
}

impl ParamDef {
    pub fn new(key: &str, name: &str, unit: &str, default: Param) -> Self {
        ParamDef {
            key: key.to_string(),
            name: name.to_string(),
            unit: unit.to_string(),
            default,
        }
    }
}

/// Declared ancillary parameter.
#[derive(Debug, Clone)]
pub struct AncillaryDef {
    pub key: String,
    pub name: String,
    pub unit: String,
    pub compute: AncillaryFn,
}

/// The computational kernel of a model.
#[derive(Debug, Clone)]
pub enum ModelKernel {
    Native(NativeModelFn),
    /// Declarative expression from an external model definition.
    Expr(external::ModelForm),
}

/// Immutable fit model descriptor.
#[derive(Debug, Clone)]
pub struct FitModel {
    pub key: String,
    pub name: String,
    pub parameters: Vec<ParamDef>,
    pub ancillaries: Vec<AncillaryDef>,
    pub kernel: ModelKernel,
    pub valid_axis_x: Axis,
    pub valid_axis_y: Axis,
}

impl FitModel {
    /// Default parameter set declared by the model.
    pub fn parameter_defaults(&self) -> ParamSet {
        let mut set = ParamSet::new();
        for def in &self.parameters {
            set.add(def.key.clone(), def.default);
        }
        set
    }

    pub fn has_parameter(&self, key: &str) -> bool {
        self.parameters.iter().any(|p| p.key == key)
    }

    /// Evaluate the raw model function (no direction handling, no geometric
    /// correction); see [`residual::model_direction_agnostic`] for the
    /// wrapper the fitter uses.
    pub fn eval_raw(&self, params: &ParamSet, delta: &[f64]) -> Vec<f64> {
        match &self.kernel {
            ModelKernel::Native(f) => f(params, delta),
            ModelKernel::Expr(form) => form.eval(params, delta),
        }
    }
}

/// Validate a model descriptor prior to registration.
///
/// The checks mirror the registration contract: trimmed unique keys, no
/// leading/trailing whitespace in names/units, consistent parameter lists,
/// and a `contact_point` parameter (required for geometric correction and
/// the contact-point residual weighting).
pub fn validate_model(model: &FitModel) -> Result<(), FdError> {
    let fail = |reason: String| {
        Err(FdError::ModelValidation {
            key: model.key.clone(),
            reason,
        })
    };

    if model.key.is_empty() {
        return fail("model key is empty".into());
    }
    if model.key != model.key.trim() {
        return fail("model key has leading/trailing whitespace".into());
    }
    if model.name != model.name.trim() {
        return fail("model name has leading/trailing whitespace".into());
    }
    if model.parameters.is_empty() {
        return fail("model declares no parameters".into());
    }

    let mut seen_keys = Vec::new();
    let mut seen_names = Vec::new();
    for def in &model.parameters {
        if def.key != def.key.trim() || def.key.is_empty() {
            return fail(format!("parameter key '{}' has stray whitespace", def.key));
        }
        if def.name != def.name.trim() {
            return fail(format!(
                "parameter name '{}' has leading/trailing spaces",
                def.name
            ));
        }
        if def.unit != def.unit.trim() {
            return fail(format!(
                "parameter unit '{}' has leading/trailing spaces",
                def.unit
            ));
        }
        if seen_keys.contains(&def.key) {
            return fail(format!("duplicate parameter key '{}'", def.key));
        }
        if seen_names.contains(&def.name) {
            return fail(format!("duplicate parameter name '{}'", def.name));
        }
        seen_keys.push(def.key.clone());
        seen_names.push(def.name.clone());
    }

    if !model.has_parameter("contact_point") {
        return fail("missing the 'contact_point' parameter".into());
    }

    for anc in &model.ancillaries {
        if anc.key != anc.key.trim() || anc.key.is_empty() {
            return fail(format!("ancillary key '{}' has stray whitespace", anc.key));
        }
        if anc.name != anc.name.trim() {
            return fail(format!(
                "ancillary name '{}' has leading/trailing spaces",
                anc.name
            ));
        }
    }

    Ok(())
}

/// Registry of fit models, keyed by model key.
///
/// Cloning is cheap (the descriptors are shared); the CLI clones a snapshot
/// out of the global registry so batch workers can read it without holding
/// the lock.
#[derive(Clone, Default)]
pub struct ModelRegistry {
    models: BTreeMap<String, Arc<FitModel>>,
}

impl ModelRegistry {
    /// An empty registry.
    pub fn new() -> Self {
        ModelRegistry::default()
    }

    /// A registry populated with the built-in models.
    pub fn with_builtin() -> Self {
        let mut registry = ModelRegistry::new();
        for model in hertz::builtin_models() {
            registry
                .register(model)
                .expect("built-in models pass validation");
        }
        registry
    }

    /// Register a model after validating it.
    ///
    /// The registry is untouched when validation fails; registering a key
    /// twice is an error.
    pub fn register(&mut self, model: FitModel) -> Result<(), FdError> {
        validate_model(&model)?;
        if self.models.contains_key(&model.key) {
            return Err(FdError::DuplicateModel(model.key));
        }
        self.models.insert(model.key.clone(), Arc::new(model));
        Ok(())
    }

    /// Remove a model.
    ///
    /// Deregistering an unknown key is an explicit error (not a silent
    /// no-op), so typos in dynamic register/deregister cycles surface.
    pub fn deregister(&mut self, key: &str) -> Result<(), FdError> {
        match self.models.remove(key) {
            Some(_) => Ok(()),
            None => Err(FdError::ModelNotFound(key.to_string())),
        }
    }

    pub fn get(&self, key: &str) -> Result<Arc<FitModel>, FdError> {
        self.models
            .get(key)
            .cloned()
            .ok_or_else(|| FdError::ModelNotFound(key.to_string()))
    }

    pub fn contains(&self, key: &str) -> bool {
        self.models.contains_key(key)
    }

    pub fn keys(&self) -> Vec<String> {
        self.models.keys().cloned().collect()
    }
}

/// The process-wide registry used by the CLI.
///
/// Lifecycle: initialized with the built-in models on first access,
/// extendable at runtime through register/deregister. Library code takes a
/// `&ModelRegistry` instead, so tests can inject isolated registries.
pub fn global() -> &'static Mutex<ModelRegistry> {
    static GLOBAL: OnceLock<Mutex<ModelRegistry>> = OnceLock::new();
    GLOBAL.get_or_init(|| Mutex::new(ModelRegistry::with_builtin()))
}
