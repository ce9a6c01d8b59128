//! Training sets for the rating regressors.
//!
//! A training set is a named collection of per-feature sample columns plus
//! the matching manual-rating array, immutable once loaded. On disk it is a
//! directory of `train_<feature>.txt` files (one value per line) and a
//! `train_response.txt`; a small bundled set (`demo`) ships with the crate
//! for smoke tests and first runs.
//!
//! Loading applies the imputation rule for degenerate feature values:
//!
//! - a NaN feature whose paired response is exactly 0 becomes 0
//! - an infinite feature value becomes twice the maximum finite value
//!   observed for that feature within the set
//!
//! Rows that still contain NaN afterwards are dropped together with their
//! responses.

use std::fs;
use std::path::Path;

use log::debug;

use crate::error::FdError;
use crate::rate::features::continuous_names;

/// Name of the bundled demonstration training set.
pub const BUILTIN_LABEL: &str = "demo";

/// An immutable training set: `samples[row][feature]` plus responses.
#[derive(Debug, Clone)]
pub struct TrainingSet {
    pub label: String,
    pub feature_names: Vec<String>,
    pub samples: Vec<Vec<f64>>,
    pub response: Vec<f64>,
}

impl TrainingSet {
    /// Resolve a training-set reference: a bundled label or a directory.
    pub fn resolve(reference: &str) -> Result<TrainingSet, FdError> {
        if reference == BUILTIN_LABEL {
            Ok(TrainingSet::builtin())
        } else {
            TrainingSet::from_dir(Path::new(reference))
        }
    }

    /// The bundled demonstration set.
    ///
    /// Feature samples are synthetic but shaped like real extractions
    /// (log-compressed residual statistics in roughly [0, 1]); responses
    /// cover the full rating scale so every regressor has signal to fit.
    pub fn builtin() -> TrainingSet {
        let names: Vec<String> = continuous_names().iter().map(|s| s.to_string()).collect();
        // Rows: flatness, size, sum, slope, variation, magnitude, monotony,
        // spike area, idt sum -- one row per manually rated curve.
        let samples: Vec<Vec<f64>> = vec![
            vec![0.50, 0.45, 0.08, 0.02, 0.05, 0.004, 0.00, 0.10, 0.06],
            vec![0.52, 0.50, 0.10, 0.03, 0.06, 0.005, 0.01, 0.12, 0.08],
            vec![0.48, 0.42, 0.12, 0.02, 0.08, 0.006, 0.00, 0.15, 0.10],
            vec![0.55, 0.48, 0.20, 0.05, 0.12, 0.010, 0.02, 0.25, 0.18],
            vec![0.45, 0.55, 0.25, 0.06, 0.15, 0.012, 0.03, 0.30, 0.22],
            vec![0.60, 0.40, 0.35, 0.08, 0.20, 0.020, 0.05, 0.45, 0.30],
            vec![0.40, 0.60, 0.40, 0.10, 0.25, 0.025, 0.06, 0.50, 0.35],
            vec![0.65, 0.35, 0.55, 0.15, 0.35, 0.040, 0.10, 0.70, 0.50],
            vec![0.35, 0.65, 0.60, 0.18, 0.40, 0.050, 0.12, 0.80, 0.55],
            vec![0.70, 0.30, 0.75, 0.25, 0.55, 0.080, 0.20, 1.00, 0.75],
            vec![0.30, 0.70, 0.85, 0.30, 0.65, 0.100, 0.25, 1.20, 0.85],
            vec![0.75, 0.25, 1.00, 0.40, 0.80, 0.150, 0.35, 1.50, 1.00],
        ];
        // High-quality curves have small residual features; the manual
        // ratings above decline as the features grow.
        let response = vec![
            10.0, 9.0, 9.0, 8.0, 7.0, 6.0, 5.0, 4.0, 3.0, 2.0, 1.0, 0.0,
        ];
        TrainingSet {
            label: BUILTIN_LABEL.to_string(),
            feature_names: names,
            samples,
            response,
        }
    }

    /// Load a training set from a directory of per-feature files.
    pub fn from_dir(path: &Path) -> Result<TrainingSet, FdError> {
        let names: Vec<String> = continuous_names().iter().map(|s| s.to_string()).collect();

        let response = read_column(&path.join("train_response.txt"))?;
        let n = response.len();

        let mut columns = Vec::with_capacity(names.len());
        for name in &names {
            let file = path.join(format!("train_{name}.txt"));
            let column = read_column(&file)?;
            if column.len() != n {
                return Err(FdError::Parse {
                    path: file,
                    reason: format!(
                        "feature column has {} samples, response has {n}",
                        column.len()
                    ),
                });
            }
            columns.push(column);
        }

        let mut set = TrainingSet {
            label: path.display().to_string(),
            feature_names: names,
            samples: transpose(&columns, n),
            response,
        };
        set.impute_and_prune();
        Ok(set)
    }

    /// Apply the imputation rule column-wise, then drop rows that still
    /// contain NaN (and their responses).
    fn impute_and_prune(&mut self) {
        let n_features = self.feature_names.len();
        for feature in 0..n_features {
            let mut column: Vec<f64> = self.samples.iter().map(|row| row[feature]).collect();
            impute_feature_column(&mut column, &self.response);
            for (row, value) in self.samples.iter_mut().zip(column) {
                row[feature] = value;
            }
        }

        let keep: Vec<bool> = self
            .samples
            .iter()
            .map(|row| row.iter().all(|v| !v.is_nan()))
            .collect();
        let dropped = keep.iter().filter(|&&k| !k).count();
        if dropped > 0 {
            debug!("dropping {dropped} training rows with NaN features");
            let mut rows = std::mem::take(&mut self.samples);
            let mut response = std::mem::take(&mut self.response);
            let mut keep_iter = keep.iter();
            rows.retain(|_| *keep_iter.next().expect("mask length"));
            let mut keep_iter = keep.iter();
            response.retain(|_| *keep_iter.next().expect("mask length"));
            self.samples = rows;
            self.response = response;
        }
    }

    /// Per-feature mean and standard deviation over the sample rows.
    ///
    /// The standard deviation is floored so normalization never divides by
    /// zero on constant features.
    pub fn feature_stats(&self) -> Vec<(f64, f64)> {
        let n = self.samples.len().max(1) as f64;
        (0..self.feature_names.len())
            .map(|feature| {
                let column: Vec<f64> = self.samples.iter().map(|row| row[feature]).collect();
                let mean = column.iter().sum::<f64>() / n;
                let var = column.iter().map(|v| (v - mean) * (v - mean)).sum::<f64>() / n;
                (mean, var.sqrt().max(1e-12))
            })
            .collect()
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }
}

/// Imputation rule for one feature column.
///
/// NaN values with a paired response of exactly 0 become 0; infinite values
/// become twice the maximum finite value of the column. Other NaN values are
/// left for row pruning.
pub fn impute_feature_column(values: &mut [f64], response: &[f64]) {
    let max_finite = values
        .iter()
        .copied()
        .filter(|v| v.is_finite())
        .fold(f64::NEG_INFINITY, f64::max);

    for (value, &resp) in values.iter_mut().zip(response.iter()) {
        if value.is_nan() && resp == 0.0 {
            *value = 0.0;
        } else if value.is_infinite() {
            *value = 2.0 * max_finite;
        }
    }
}

/// Write a training set directory (all feature columns plus the responses).
pub fn write_training_dir(
    path: &Path,
    feature_names: &[String],
    rows: &[Vec<f64>],
    response: &[f64],
) -> Result<(), FdError> {
    fs::create_dir_all(path).map_err(|e| FdError::io(path, e))?;
    for (feature, name) in feature_names.iter().enumerate() {
        let file = path.join(format!("train_{name}.txt"));
        let mut text = String::new();
        for row in rows {
            text.push_str(&format!("{:.6e}\n", row[feature]));
        }
        fs::write(&file, text).map_err(|e| FdError::io(&file, e))?;
    }
    let mut text = String::new();
    for r in response {
        text.push_str(&format!("{:.6e}\n", r));
    }
    let file = path.join("train_response.txt");
    fs::write(&file, text).map_err(|e| FdError::io(&file, e))
}

fn read_column(path: &Path) -> Result<Vec<f64>, FdError> {
    let text = fs::read_to_string(path).map_err(|e| FdError::io(path, e))?;
    let mut out = Vec::new();
    for (lineno, line) in text.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let value = match line {
            "nan" | "NaN" => f64::NAN,
            "inf" | "Inf" => f64::INFINITY,
            "-inf" | "-Inf" => f64::NEG_INFINITY,
            other => other.parse::<f64>().map_err(|_| FdError::Parse {
                path: path.to_path_buf(),
                reason: format!("invalid number '{other}' on line {}", lineno + 1),
            })?,
        };
        out.push(value);
    }
    Ok(out)
}

fn transpose(columns: &[Vec<f64>], n_rows: usize) -> Vec<Vec<f64>> {
    (0..n_rows)
        .map(|row| columns.iter().map(|col| col[row]).collect())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nan_with_zero_response_becomes_zero() {
        let mut values = vec![1.0, f64::NAN, 3.0];
        let response = vec![5.0, 0.0, 2.0];
        impute_feature_column(&mut values, &response);
        assert_eq!(values[1], 0.0);
    }

    #[test]
    fn nan_with_nonzero_response_stays_nan() {
        let mut values = vec![1.0, f64::NAN, 3.0];
        let response = vec![5.0, 7.0, 2.0];
        impute_feature_column(&mut values, &response);
        assert!(values[1].is_nan());
    }

    #[test]
    fn infinity_becomes_twice_the_finite_maximum() {
        let mut values = vec![1.0, f64::INFINITY, 3.0, f64::NEG_INFINITY];
        let response = vec![1.0, 2.0, 3.0, 4.0];
        impute_feature_column(&mut values, &response);
        assert_eq!(values[1], 6.0);
        assert_eq!(values[3], 6.0);
    }

    #[test]
    fn builtin_set_is_consistent() {
        let set = TrainingSet::builtin();
        assert_eq!(set.feature_names.len(), 9);
        assert_eq!(set.samples.len(), set.response.len());
        for row in &set.samples {
            assert_eq!(row.len(), set.feature_names.len());
        }
        for (mean, std) in set.feature_stats() {
            assert!(mean.is_finite());
            assert!(std > 0.0);
        }
    }

    #[test]
    fn directory_round_trip_applies_imputation() {
        let dir = std::env::temp_dir().join("fd-curves-test-training");
        let _ = fs::remove_dir_all(&dir);

        let set = TrainingSet::builtin();
        let mut rows = set.samples.clone();
        let mut response = set.response.clone();
        // One NaN with response 0 (imputed to 0), one inf (imputed to twice
        // the finite max), one NaN with a nonzero response (row dropped).
        rows.push(vec![f64::NAN; 9]);
        response.push(0.0);
        rows.push(vec![f64::INFINITY, 0.1, 0.1, 0.1, 0.1, 0.1, 0.1, 0.1, 0.1]);
        response.push(5.0);
        rows.push(vec![f64::NAN, 0.1, 0.1, 0.1, 0.1, 0.1, 0.1, 0.1, 0.1]);
        response.push(4.0);

        write_training_dir(&dir, &set.feature_names, &rows, &response).unwrap();
        let loaded = TrainingSet::from_dir(&dir).unwrap();

        // Original rows + imputed-NaN row + imputed-inf row; the unresolvable
        // NaN row is pruned.
        assert_eq!(loaded.len(), set.len() + 2);
        let nan_row = &loaded.samples[set.len()];
        assert!(nan_row.iter().all(|&v| v == 0.0));
        let inf_row = &loaded.samples[set.len() + 1];
        let max_finite = loaded.samples[..set.len()]
            .iter()
            .chain(std::iter::once(nan_row))
            .map(|r| r[0])
            .fold(f64::NEG_INFINITY, f64::max);
        assert_eq!(inf_row[0], 2.0 * max_finite);
    }
}
