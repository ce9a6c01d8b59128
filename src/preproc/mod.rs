//! Preprocessing pipeline.
//!
//! Preprocessing steps are registered in a static table. Each step declares
//! required predecessors (the pipeline reorders the requested list to satisfy
//! them, or fails before touching any data) and optional predecessors (which
//! only influence ordering when present). Steps run exactly once per
//! `apply` call and mutate the working curve in place; the sample count is
//! never changed.
//!
//! A single `apply` call is deterministic. Applying the same pipeline twice
//! in sequence is allowed but not idempotent for the offset corrections
//! (`correct_force_offset`, `correct_tip_offset`), which shift their columns
//! again relative to the newly estimated baseline/contact point.

use std::collections::BTreeMap;

use log::warn;
use serde_json::Value;

use crate::data::Curve;
use crate::domain::Segment;
use crate::error::FdError;
use crate::math::filter::median_filter1d;
use crate::math::gradient;
use crate::poc::{self, PocMethod, DEFAULT_POC_METHOD};

type StepFn = fn(&mut Curve, Option<&Value>) -> Result<(), FdError>;

/// A registered preprocessing step.
pub struct PreprocStep {
    pub key: &'static str,
    pub name: &'static str,
    pub require_steps: &'static [&'static str],
    pub optional_steps: &'static [&'static str],
    func: StepFn,
}

/// All registered preprocessing steps.
pub const PREPROCESSORS: &[PreprocStep] = &[
    PreprocStep {
        key: "compute_tip_position",
        name: "tip-sample separation",
        require_steps: &[],
        optional_steps: &[],
        func: compute_tip_position,
    },
    PreprocStep {
        key: "correct_force_offset",
        name: "baseline correction",
        require_steps: &[],
        optional_steps: &[],
        func: correct_force_offset,
    },
    PreprocStep {
        key: "correct_tip_offset",
        name: "contact point estimation",
        require_steps: &["compute_tip_position"],
        optional_steps: &["correct_force_offset"],
        func: correct_tip_offset,
    },
    PreprocStep {
        key: "correct_split_approach_retract",
        name: "segment discovery",
        require_steps: &["compute_tip_position"],
        optional_steps: &["correct_force_offset"],
        func: correct_split_approach_retract,
    },
    PreprocStep {
        key: "smooth_height",
        name: "spatial smoothing",
        require_steps: &[],
        optional_steps: &["compute_tip_position"],
        func: smooth_height,
    },
];

/// Look up a step by key.
pub fn get_step(key: &str) -> Result<&'static PreprocStep, FdError> {
    PREPROCESSORS
        .iter()
        .find(|s| s.key == key)
        .ok_or_else(|| FdError::Config(format!("unknown preprocessing step '{key}'")))
}

/// Identifiers of all registered steps.
pub fn available() -> Vec<&'static str> {
    PREPROCESSORS.iter().map(|s| s.key).collect()
}

/// Reorder identifiers so required (and, when present, optional) predecessors
/// come first.
///
/// Fails when an identifier is unknown, when a required predecessor is absent
/// from the list entirely, or when the constraints cannot be satisfied (a
/// cycle is implied).
pub fn autosort(identifiers: &[String]) -> Result<Vec<String>, FdError> {
    // Validate keys, uniqueness and required-presence up front, before any
    // reordering. Each step runs exactly once per pipeline.
    for (n, id) in identifiers.iter().enumerate() {
        if identifiers[..n].contains(id) {
            return Err(FdError::Config(format!(
                "preprocessing step '{id}' is listed twice"
            )));
        }
        let step = get_step(id)?;
        for req in step.require_steps {
            if !identifiers.iter().any(|i| i == req) {
                return Err(FdError::Config(format!(
                    "preprocessing step '{}' requires step '{}', \
                     which is not part of the pipeline",
                    id, req
                )));
            }
        }
    }

    let mut sorted: Vec<String> = identifiers.to_vec();
    // Move steps after their predecessors until stable. The iteration count
    // is bounded; if the constraints are still violated afterwards, they are
    // cyclic.
    let rounds = identifiers.len() * identifiers.len() + 1;
    for _ in 0..rounds {
        let mut changed = false;
        for id in identifiers {
            let step = get_step(id)?;
            let cix = sorted.iter().position(|i| i == id).expect("id present");
            let mut max_pred = None;
            for pred in step
                .require_steps
                .iter()
                .chain(step.optional_steps.iter())
            {
                if let Some(pix) = sorted.iter().position(|i| i == pred) {
                    if pix > cix {
                        max_pred = Some(max_pred.map_or(pix, |m: usize| m.max(pix)));
                    }
                }
            }
            if let Some(pix) = max_pred {
                let item = sorted.remove(cix);
                sorted.insert(pix, item);
                changed = true;
            }
        }
        if !changed {
            return Ok(sorted);
        }
    }

    Err(FdError::Config(format!(
        "cyclic preprocessing constraints in {identifiers:?}"
    )))
}

/// Run a preprocessing pipeline on a curve.
///
/// `options` maps step keys to their option objects (currently only
/// `correct_tip_offset` takes an option: `{"method": "<poc method>"}`).
pub fn apply(
    curve: &mut Curve,
    identifiers: &[String],
    options: &BTreeMap<String, Value>,
) -> Result<(), FdError> {
    let ordered = autosort(identifiers)?;
    for key in options.keys() {
        // Options for steps that never run are a configuration smell.
        if !identifiers.iter().any(|i| i == key) {
            return Err(FdError::Config(format!(
                "options given for step '{key}' which is not in the pipeline"
            )));
        }
    }
    for id in &ordered {
        let step = get_step(id)?;
        (step.func)(curve, options.get(id.as_str()))?;
    }
    Ok(())
}

/// Tip-sample separation.
///
/// Populates the tip position column by adding the force normalized by the
/// spring constant to the cantilever height. A no-op when the column already
/// exists.
fn compute_tip_position(curve: &mut Curve, _options: Option<&Value>) -> Result<(), FdError> {
    if curve.tip_position.is_some() {
        return Ok(());
    }
    let Some(k) = curve.meta.spring_constant else {
        return Err(FdError::MissingMetadata(
            "cannot compute tip position: metadata 'spring constant' is absent".into(),
        ));
    };
    if !(k.is_finite() && k > 0.0) {
        return Err(FdError::MissingMetadata(format!(
            "cannot compute tip position: invalid spring constant {k}"
        )));
    }
    let tip: Vec<f64> = curve
        .height
        .iter()
        .zip(curve.force.iter())
        .map(|(&z, &f)| z + f / k)
        .collect();
    curve.tip_position = Some(tip);
    Ok(())
}

/// Baseline correction.
///
/// Subtracts the average baseline force before the estimated contact point.
/// Order-sensitive: re-applying shifts the force again relative to the new
/// baseline estimate.
fn correct_force_offset(curve: &mut Curve, _options: Option<&Value>) -> Result<(), FdError> {
    let offset = match poc::poc_deviation_from_baseline(clip_approach(&curve.force)) {
        Some((idx, _)) if idx > 0 => {
            curve.force[..idx].iter().sum::<f64>() / idx as f64
        }
        _ => curve.force[0],
    };
    for f in &mut curve.force {
        *f -= offset;
    }
    Ok(())
}

fn clip_approach(force: &[f64]) -> &[f64] {
    let mut idmax = 0;
    for (i, v) in force.iter().enumerate() {
        if *v > force[idmax] {
            idmax = i;
        }
    }
    &force[..idmax]
}

/// Contact point estimation.
///
/// Subtracts the estimated contact-point position from the tip position, so
/// that the contact point sits near zero. Order-sensitive like
/// `correct_force_offset`.
fn correct_tip_offset(curve: &mut Curve, options: Option<&Value>) -> Result<(), FdError> {
    let method = match options.and_then(|v| v.get("method")).and_then(Value::as_str) {
        Some(name) => parse_poc_method(name)?,
        None => DEFAULT_POC_METHOD,
    };
    let Some(tip) = curve.tip_position.as_ref() else {
        return Err(FdError::Config(
            "correct_tip_offset requires the tip position column".into(),
        ));
    };
    let result = poc::estimate_poc(tip, &curve.force, method)?;
    let offset = result.estimate.position;
    if let Some(tip) = curve.tip_position.as_mut() {
        for x in tip {
            *x -= offset;
        }
    }
    Ok(())
}

fn parse_poc_method(name: &str) -> Result<PocMethod, FdError> {
    [
        PocMethod::DeviationFromBaseline,
        PocMethod::FrechetDirectPath,
        PocMethod::FitConstantLine,
        PocMethod::FitConstantPolynomial,
        PocMethod::GradientZeroCrossing,
    ]
    .into_iter()
    .find(|m| m.identifier() == name)
    .ok_or_else(|| FdError::Config(format!("unknown POC method '{name}'")))
}

/// Segment discovery (farthest point method).
///
/// The microscope's segment flags can lag the physical turnaround. This step
/// re-derives the approach/retract split as the point farthest from the
/// origin in normalized (position, force) space. When the contact point
/// cannot be estimated the curve is left unchanged (with a warning).
fn correct_split_approach_retract(curve: &mut Curve, _options: Option<&Value>) -> Result<(), FdError> {
    let Some(tip) = curve.tip_position.as_ref() else {
        return Err(FdError::Config(
            "correct_split_approach_retract requires the tip position column".into(),
        ));
    };

    let Some((idp, _)) = poc::poc_deviation_from_baseline(clip_approach(&curve.force)) else {
        warn!(
            "cannot correct the approach/retract split: \
             contact point position could not be estimated"
        );
        return Ok(());
    };
    if idp == 0 {
        warn!("cannot correct the approach/retract split: empty baseline");
        return Ok(());
    }

    // Normalize tip position so maximum indentation maps to 1.
    let mut x: Vec<f64> = tip.iter().map(|&v| v - tip[idp]).collect();
    let xmin = x.iter().copied().fold(f64::INFINITY, f64::min);
    if !(xmin.is_finite() && xmin < 0.0) {
        warn!("cannot correct the approach/retract split: no indentation found");
        return Ok(());
    }
    for v in &mut x {
        *v /= xmin;
        if *v < 0.0 {
            *v = 0.0;
        }
    }

    // Normalize force so the maximum maps to 1; zero out baseline noise.
    let bl_avg = curve.force[..idp].iter().sum::<f64>() / idp as f64;
    let mut y: Vec<f64> = curve.force.iter().map(|&f| f - bl_avg).collect();
    let ymax = y.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    if !(ymax.is_finite() && ymax > 0.0) {
        warn!("cannot correct the approach/retract split: no force rise found");
        return Ok(());
    }
    let bl_std = std_dev(&y[..idp]);
    for v in &mut y {
        *v /= ymax;
        if *v < bl_std {
            *v = 0.0;
        }
    }

    let mut idmin = 0;
    let mut best = f64::NEG_INFINITY;
    for i in 0..curve.len() {
        let d = x[i] * x[i] + y[i] * y[i];
        if d > best {
            best = d;
            idmin = i;
        }
    }

    for (i, s) in curve.segment.iter_mut().enumerate() {
        *s = u8::from(i >= idmin);
    }
    Ok(())
}

fn std_dev(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    let mean = values.iter().sum::<f64>() / values.len() as f64;
    let var = values.iter().map(|v| (v - mean) * (v - mean)).sum::<f64>() / values.len() as f64;
    var.sqrt()
}

/// Spatial smoothing of the position columns.
///
/// Applies a monotone median filter to the height and (if present) tip
/// position columns, separately for the approach and retract segments. The
/// window is doubled until the smoothed data is monotone.
fn smooth_height(curve: &mut Curve, _options: Option<&Value>) -> Result<(), FdError> {
    let masks = [
        curve.segment_indices(Segment::Approach),
        curve.segment_indices(Segment::Retract),
    ];
    let mut columns: Vec<&mut Vec<f64>> = Vec::new();
    columns.push(&mut curve.height);
    if let Some(tip) = curve.tip_position.as_mut() {
        columns.push(tip);
    }
    for column in columns {
        for indices in &masks {
            if indices.len() < 3 {
                continue;
            }
            let data: Vec<f64> = indices.iter().map(|&i| column[i]).collect();
            let smoothed = smooth_axis_monotone(&data);
            for (&i, v) in indices.iter().zip(smoothed) {
                column[i] = v;
            }
        }
    }
    Ok(())
}

/// Median smoothing with automatic window growth until monotone.
fn smooth_axis_monotone(data: &[f64]) -> Vec<f64> {
    let mut window = 15usize;
    let mut smooth = median_filter1d(data, window);
    // Growth is bounded; beyond the data length the filter output is the
    // global median and trivially monotone.
    while !is_monotone(&smooth) && window < 2 * data.len() {
        window = window * 2 + 1;
        warn!("doubled smoothing window to {window} to keep the axis monotone");
        smooth = median_filter1d(data, window);
    }
    smooth
}

fn is_monotone(data: &[f64]) -> bool {
    let g = gradient(data);
    let abs_sum: f64 = g.iter().map(|v| v.abs()).sum();
    let sum_abs: f64 = g.iter().sum::<f64>().abs();
    (abs_sum - sum_abs).abs() <= 1e-12 * abs_sum.max(1.0)
}
