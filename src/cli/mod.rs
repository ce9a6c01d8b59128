//! Command-line parsing for the `fd` binary.
//!
//! Argument parsing and command dispatch stay separate from the
//! analysis code. The interactive rating collection (a GUI) is a separate
//! tool; this CLI covers profile setup, batch fitting, training-set
//! generation and synthetic sample data.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

use crate::domain::{RangeKind, RegressorKind, Segment};
use crate::poc::PocMethod;

/// Top-level CLI.
#[derive(Debug, Parser)]
#[command(name = "fd", version, about = "AFM force-indentation curve analysis")]
pub struct Cli {
    /// Path to the fit profile.
    #[arg(long, global = true, default_value = "fd_profile.json")]
    pub profile: PathBuf,

    #[command(subcommand)]
    pub command: Command,
}

/// CLI subcommands.
#[derive(Debug, Subcommand)]
pub enum Command {
    /// Create or update the fit profile (non-interactive).
    SetupProfile(SetupProfileArgs),
    /// Fit all curve files in a directory and emit a statistics table.
    Fit(FitArgs),
    /// Convert a rating container into a flat training-set directory.
    GenTrainingSet(GenTrainingSetArgs),
    /// Write synthetic demonstration curves.
    Sample(SampleArgs),
}

/// Options for `fd setup-profile`. Only given flags are changed; an
/// existing profile is loaded first.
#[derive(Debug, Parser)]
pub struct SetupProfileArgs {
    /// Model key (e.g. hertz_para, sneddon_spher_approx).
    #[arg(long)]
    pub model: Option<String>,

    /// Comma-separated preprocessing step keys.
    #[arg(long)]
    pub preprocessing: Option<String>,

    /// POC method for the correct_tip_offset step.
    #[arg(long, value_enum)]
    pub poc_method: Option<PocMethod>,

    /// How the fitting range bounds are interpreted.
    #[arg(long, value_enum)]
    pub range_kind: Option<RangeKind>,

    /// Lower fitting range bound.
    #[arg(long)]
    pub range_min: Option<f64>,

    /// Upper fitting range bound.
    #[arg(long)]
    pub range_max: Option<f64>,

    /// Segment to fit.
    #[arg(long, value_enum)]
    pub segment: Option<Segment>,

    /// Contact-point weighting half-width (0 disables).
    #[arg(long)]
    pub weight_cp: Option<f64>,

    /// Geometric correction factor k.
    #[arg(long)]
    pub gcf_k: Option<f64>,

    /// Enable/disable the optimal-fit plateau search.
    #[arg(long)]
    pub optimal_fit: Option<bool>,

    /// Training-set reference ("demo" or a directory).
    #[arg(long)]
    pub training_set: Option<String>,

    /// Rating regressor.
    #[arg(long, value_enum)]
    pub regressor: Option<RegressorKind>,

    /// Initial parameter override, KEY=VALUE (repeatable).
    #[arg(long = "param", value_name = "KEY=VALUE")]
    pub params: Vec<String>,

    /// Vary flag override, KEY=true|false (repeatable).
    #[arg(long = "vary", value_name = "KEY=BOOL")]
    pub vary: Vec<String>,

    /// External model definition file to load before fitting (repeatable).
    #[arg(long = "external-model", value_name = "FILE")]
    pub external_models: Vec<PathBuf>,
}

/// Options for `fd fit`.
#[derive(Debug, Parser)]
pub struct FitArgs {
    /// Input folder containing curve JSON records.
    pub data_path: PathBuf,

    /// Results directory (statistics.tsv plus per-curve artifacts).
    pub out_dir: PathBuf,
}

/// Options for `fd gen-training-set`.
#[derive(Debug, Parser)]
pub struct GenTrainingSetArgs {
    /// Rating container (JSON) with manually rated curves.
    pub container: PathBuf,

    /// Output directory for the train_*.txt files.
    pub out_dir: PathBuf,
}

/// Options for `fd sample`.
#[derive(Debug, Parser)]
pub struct SampleArgs {
    /// Output directory for the generated curve records.
    pub out_dir: PathBuf,

    /// Number of curves to generate.
    #[arg(long, default_value_t = 10)]
    pub count: usize,

    /// Samples per curve.
    #[arg(long, default_value_t = 1000)]
    pub points: usize,

    /// Force noise standard deviation [N].
    #[arg(long, default_value_t = 2e-11)]
    pub noise: f64,

    /// Base random seed.
    #[arg(long, default_value_t = 42)]
    pub seed: u64,
}
