//! Top-level application orchestration.
//!
//! `src/main.rs` is intentionally tiny; this module is the "real main" that
//! parses CLI arguments, loads the profile, runs the batch pipeline and
//! writes reports. Curves are independent, so the batch fit fans out with
//! rayon over a read-only registry snapshot and a shared rater.

use std::fs;
use std::path::{Path, PathBuf};

use clap::Parser;
use log::{info, warn};
use rayon::prelude::*;

use crate::cli::{Cli, Command, FitArgs, GenTrainingSetArgs, SampleArgs, SetupProfileArgs};
use crate::data::sample::{hertz_approach_curve, SyntheticCurve};
use crate::data::Curve;
use crate::error::FdError;
use crate::fit::{fit_curve, FitProperties};
use crate::io::curve::{read_curve_json, write_fitted_json, CurveRecord};
use crate::model::{self, FitModel, ModelRegistry};
use crate::profile::{Profile, ProfileParam};
use crate::rate::features::{compute_features, FEATURE_NAMES};
use crate::rate::training::write_training_dir;
use crate::rate::{CurveRater, TrainingSet, RATING_INVALID};
use crate::report::{
    format_run_summary, format_statistics_header, format_statistics_row, CurveStats,
};

/// Entry point for the `fd` binary.
pub fn run() -> Result<(), FdError> {
    let _ = env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .try_init();
    let cli = Cli::parse();

    match cli.command {
        Command::SetupProfile(args) => handle_setup_profile(&cli.profile, args),
        Command::Fit(args) => handle_fit(&cli.profile, args),
        Command::GenTrainingSet(args) => handle_gen_training_set(&cli.profile, args),
        Command::Sample(args) => handle_sample(args),
    }
}

/// Load the external models referenced by the profile into the global
/// registry and return a read-only snapshot for the workers.
fn registry_snapshot(profile: &Profile) -> Result<ModelRegistry, FdError> {
    let mut guard = model::global()
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner());
    for path in &profile.external_models {
        let loaded = crate::model::load_model_from_file(path)?;
        if guard.contains(&loaded.key) {
            continue;
        }
        guard.register(loaded)?;
        info!("loaded external model from {}", path.display());
    }
    Ok(guard.clone())
}

fn handle_setup_profile(path: &Path, args: SetupProfileArgs) -> Result<(), FdError> {
    let mut profile = if path.exists() {
        Profile::load(path)?
    } else {
        Profile::default()
    };

    if let Some(model) = args.model {
        if profile.model_key != model {
            // The old overrides belong to the old model's parameters.
            profile.fit_params.clear();
        }
        profile.model_key = model;
    }
    if let Some(steps) = args.preprocessing {
        profile.preprocessing = steps
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();
    }
    if let Some(method) = args.poc_method {
        profile.preprocessing_options.insert(
            "correct_tip_offset".to_string(),
            serde_json::json!({ "method": method.identifier() }),
        );
    }
    if let Some(kind) = args.range_kind {
        profile.range_kind = kind;
    }
    if let Some(min) = args.range_min {
        profile.range_x[0] = min;
    }
    if let Some(max) = args.range_max {
        profile.range_x[1] = max;
    }
    if let Some(segment) = args.segment {
        profile.segment = segment;
    }
    if let Some(weight) = args.weight_cp {
        profile.weight_cp = weight;
    }
    if let Some(k) = args.gcf_k {
        profile.gcf_k = k;
    }
    if let Some(optimal) = args.optimal_fit {
        profile.optimal_fit_edelta = optimal;
    }
    if let Some(ts) = args.training_set {
        profile.training_set = ts;
    }
    if let Some(regressor) = args.regressor {
        profile.regressor = regressor;
    }
    for external in args.external_models {
        if !profile.external_models.contains(&external) {
            profile.external_models.push(external);
        }
    }

    // Validate the configuration against the registry before persisting.
    let registry = registry_snapshot(&profile)?;
    let model = registry.get(&profile.model_key)?;
    crate::preproc::autosort(&profile.preprocessing)?;
    apply_param_overrides(&mut profile, &model, &args.params, &args.vary)?;
    profile.initial_params(&model)?;

    profile.save(path)?;
    info!("profile written to {}", path.display());
    Ok(())
}

fn apply_param_overrides(
    profile: &mut Profile,
    model: &FitModel,
    params: &[String],
    vary: &[String],
) -> Result<(), FdError> {
    let defaults = model.parameter_defaults();

    fn entry_for(
        profile: &Profile,
        defaults: &crate::model::ParamSet,
        model_key: &str,
        key: &str,
    ) -> Result<ProfileParam, FdError> {
        if let Some(existing) = profile.fit_params.get(key) {
            return Ok(*existing);
        }
        let Some(default) = defaults.get(key) else {
            return Err(FdError::Config(format!(
                "parameter '{key}' is unknown to model '{model_key}'"
            )));
        };
        Ok(ProfileParam {
            value: default.value,
            vary: default.vary,
        })
    }

    for spec in params {
        let Some((key, value)) = spec.split_once('=') else {
            return Err(FdError::Config(format!(
                "--param expects KEY=VALUE, got '{spec}'"
            )));
        };
        let mut entry = entry_for(profile, &defaults, &model.key, key)?;
        entry.value = value
            .parse()
            .map_err(|_| FdError::Config(format!("invalid value in '--param {spec}'")))?;
        profile.fit_params.insert(key.to_string(), entry);
    }
    for spec in vary {
        let Some((key, value)) = spec.split_once('=') else {
            return Err(FdError::Config(format!(
                "--vary expects KEY=BOOL, got '{spec}'"
            )));
        };
        let mut entry = entry_for(profile, &defaults, &model.key, key)?;
        entry.vary = value
            .parse()
            .map_err(|_| FdError::Config(format!("invalid flag in '--vary {spec}'")))?;
        profile.fit_params.insert(key.to_string(), entry);
    }
    Ok(())
}

fn handle_fit(profile_path: &Path, args: FitArgs) -> Result<(), FdError> {
    let profile = Profile::load(profile_path)?;
    let registry = registry_snapshot(&profile)?;

    // Configuration errors surface here, before any curve is touched.
    registry.get(&profile.model_key)?;
    crate::preproc::autosort(&profile.preprocessing)?;
    let training_set = TrainingSet::resolve(&profile.training_set)?;
    let rater = CurveRater::new(profile.regressor, &training_set)?;
    info!(
        "rating with {} on training set '{}'",
        profile.regressor.display_name(),
        training_set.label
    );

    let files = curve_files(&args.data_path)?;
    if files.is_empty() {
        warn!("no curve files found in {}", args.data_path.display());
    }
    fs::create_dir_all(&args.out_dir).map_err(|e| FdError::io(&args.out_dir, e))?;

    let stats: Vec<CurveStats> = files
        .par_iter()
        .map(|path| process_curve(path, &profile, &registry, &rater, &args.out_dir))
        .collect();

    let table_path = args.out_dir.join("statistics.tsv");
    let mut table = format_statistics_header();
    table.push('\n');
    for row in &stats {
        table.push_str(&format_statistics_row(row));
        table.push('\n');
    }
    fs::write(&table_path, table).map_err(|e| FdError::io(&table_path, e))?;

    print!("{}", format_run_summary(&stats));
    println!("Statistics written to {}", table_path.display());
    Ok(())
}

/// Fit and rate one curve; per-curve failures are annotated, not fatal.
fn process_curve(
    path: &Path,
    profile: &Profile,
    registry: &ModelRegistry,
    rater: &CurveRater,
    out_dir: &Path,
) -> CurveStats {
    info!("processing {}", path.display());
    match fit_one(path, profile, registry, out_dir) {
        Ok((curve, props)) => {
            let rating = rater.rate_curve(&curve, &props);
            let record = props.record();
            CurveStats {
                path: path.display().to_string(),
                enumeration: curve.meta.enumeration,
                success: record.map_or(false, |r| r.success),
                e_modulus: record.map_or(f64::NAN, |r| r.params_fitted.value("E")),
                chi_sqr: record.map_or(f64::NAN, |r| r.chi_sqr),
                rating,
                error: None,
            }
        }
        Err(err) => {
            warn!("skipping {}: {err}", path.display());
            CurveStats {
                path: path.display().to_string(),
                enumeration: 0,
                success: false,
                e_modulus: f64::NAN,
                chi_sqr: f64::NAN,
                rating: RATING_INVALID,
                error: Some(err.to_string()),
            }
        }
    }
}

fn fit_one(
    path: &Path,
    profile: &Profile,
    registry: &ModelRegistry,
    out_dir: &Path,
) -> Result<(Curve, FitProperties), FdError> {
    let mut curve = read_curve_json(path)?;
    crate::preproc::apply(
        &mut curve,
        &profile.preprocessing,
        &profile.preprocessing_options,
    )?;

    let model = registry.get(&profile.model_key)?;
    let mut props = profile.fit_properties();
    props.set_params_initial(Some(profile.initial_params(&model)?));
    fit_curve(&mut curve, &mut props, registry)?;

    if let Some(record) = props.record() {
        let stem = path
            .file_stem()
            .map(|s| s.to_string_lossy().to_string())
            .unwrap_or_else(|| "curve".to_string());
        let artifact = out_dir.join(format!("{stem}_fit.json"));
        let x = curve.axis_data(props.x_axis())?;
        write_fitted_json(
            &artifact,
            x,
            &curve.force,
            &curve.fit,
            record,
            &path.display().to_string(),
        )?;
    }

    Ok((curve, props))
}

fn handle_gen_training_set(profile_path: &Path, args: GenTrainingSetArgs) -> Result<(), FdError> {
    let profile = Profile::load(profile_path)?;
    let registry = registry_snapshot(&profile)?;
    let model = registry.get(&profile.model_key)?;

    let container = crate::rate::container::RatingContainer::load(&args.container)?;

    let mut rows = Vec::new();
    let mut response = Vec::new();
    for group in container.rated_groups() {
        let Some(record) = group.curve.clone() else {
            continue;
        };
        let result = (|| -> Result<Vec<f64>, FdError> {
            let mut curve = record.into_curve(&args.container)?;
            let steps = if group.preprocessing.is_empty() {
                &profile.preprocessing
            } else {
                &group.preprocessing
            };
            crate::preproc::apply(&mut curve, steps, &profile.preprocessing_options)?;
            let mut props = profile.fit_properties();
            props.set_params_initial(Some(profile.initial_params(&model)?));
            fit_curve(&mut curve, &mut props, &registry)?;
            Ok(compute_features(&curve, &props).values().to_vec())
        })();
        match result {
            Ok(features) => {
                rows.push(features);
                response.push(f64::from(group.rating));
            }
            Err(err) => warn!("skipping group '{}': {err}", group.name),
        }
    }

    if rows.is_empty() {
        return Err(FdError::Rating(format!(
            "no usable rated groups in {}",
            args.container.display()
        )));
    }

    let names: Vec<String> = FEATURE_NAMES.iter().map(|s| s.to_string()).collect();
    write_training_dir(&args.out_dir, &names, &rows, &response)?;
    println!(
        "Training set with {} samples written to {}",
        rows.len(),
        args.out_dir.display()
    );
    Ok(())
}

fn handle_sample(args: SampleArgs) -> Result<(), FdError> {
    fs::create_dir_all(&args.out_dir).map_err(|e| FdError::io(&args.out_dir, e))?;
    for i in 0..args.count {
        let cfg = SyntheticCurve {
            n_points: args.points,
            // Vary the modulus and contact point so the set is not trivial.
            e_modulus: 2000.0 + 250.0 * (i % 8) as f64,
            contact_point: -(i as f64) * 0.05e-6,
            noise_std: args.noise * (1 + i % 3) as f64,
            seed: args.seed.wrapping_add(i as u64),
            with_retract: true,
            ..SyntheticCurve::default()
        };
        let curve = hertz_approach_curve(&cfg);
        let record = CurveRecord {
            height: curve.height,
            force: curve.force,
            segment: Some(curve.segment),
            spring_constant: curve.meta.spring_constant,
        };
        let path = args.out_dir.join(format!("sample_{i:03}.json"));
        let text = serde_json::to_string(&record).map_err(|e| FdError::Parse {
            path: path.clone(),
            reason: e.to_string(),
        })?;
        fs::write(&path, text).map_err(|e| FdError::io(&path, e))?;
    }
    println!(
        "{} synthetic curves written to {}",
        args.count,
        args.out_dir.display()
    );
    Ok(())
}

fn curve_files(dir: &Path) -> Result<Vec<PathBuf>, FdError> {
    let mut files = Vec::new();
    let entries = fs::read_dir(dir).map_err(|e| FdError::io(dir, e))?;
    for entry in entries {
        let entry = entry.map_err(|e| FdError::io(dir, e))?;
        let path = entry.path();
        if path.extension().is_some_and(|ext| ext == "json") {
            files.push(path);
        }
    }
    files.sort();
    Ok(files)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rate::container::{RatingContainer, RatingGroup};

    fn temp_dir(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("fd-curves-test-{name}"));
        let _ = fs::remove_dir_all(&dir);
        fs::create_dir_all(&dir).unwrap();
        dir
    }

    fn sample_record(seed: u64) -> CurveRecord {
        let curve = hertz_approach_curve(&SyntheticCurve {
            n_points: 400,
            noise_std: 2e-11,
            seed,
            ..SyntheticCurve::default()
        });
        CurveRecord {
            height: curve.height,
            force: curve.force,
            segment: Some(curve.segment),
            spring_constant: curve.meta.spring_constant,
        }
    }

    #[test]
    fn batch_fit_annotates_bad_curves_and_completes() {
        let data = temp_dir("batch-data");
        let out = temp_dir("batch-out");

        // Two good curves and one without the required spring constant.
        for i in 0..2u64 {
            let record = sample_record(i);
            fs::write(
                data.join(format!("good_{i}.json")),
                serde_json::to_string(&record).unwrap(),
            )
            .unwrap();
        }
        let mut broken = sample_record(9);
        broken.spring_constant = None;
        fs::write(
            data.join("broken.json"),
            serde_json::to_string(&broken).unwrap(),
        )
        .unwrap();

        let mut profile = Profile::default();
        profile.model_key = "hertz_para".to_string();
        let registry = ModelRegistry::with_builtin();
        let rater =
            CurveRater::new(profile.regressor, &TrainingSet::builtin()).unwrap();

        let files = curve_files(&data).unwrap();
        assert_eq!(files.len(), 3);
        let stats: Vec<CurveStats> = files
            .iter()
            .map(|p| process_curve(p, &profile, &registry, &rater, &out))
            .collect();

        let failures: Vec<_> = stats.iter().filter(|s| s.error.is_some()).collect();
        assert_eq!(failures.len(), 1);
        assert!(failures[0].path.contains("broken"));
        let successes = stats.iter().filter(|s| s.success).count();
        assert_eq!(successes, 2);

        // Artifacts exist for the fitted curves.
        assert!(out.join("good_0_fit.json").exists());
        assert!(out.join("good_1_fit.json").exists());
    }

    #[test]
    fn training_set_generation_from_container() {
        let dir = temp_dir("gen-ts");
        let container_path = dir.join("ratings.json");
        let out = dir.join("ts");

        let mut container = RatingContainer::default();
        for (i, rating) in [(0u64, 9), (1u64, 4), (2u64, 0)] {
            container.append(RatingGroup {
                name: format!("group{i}"),
                curve: Some(sample_record(i)),
                preprocessing: Vec::new(),
                params_fitted: None,
                rating,
                comment: String::new(),
                user: "tester".to_string(),
                timestamp: "2024-06-01T08:00:00Z".to_string(),
            });
        }
        container.save(&container_path).unwrap();

        let profile_path = dir.join("profile.json");
        let mut profile = Profile::default();
        profile.model_key = "hertz_para".to_string();
        profile.save(&profile_path).unwrap();

        handle_gen_training_set(
            &profile_path,
            GenTrainingSetArgs {
                container: container_path,
                out_dir: out.clone(),
            },
        )
        .unwrap();

        assert!(out.join("train_response.txt").exists());
        for name in FEATURE_NAMES {
            assert!(out.join(format!("train_{name}.txt")).exists(), "{name}");
        }
    }
}
