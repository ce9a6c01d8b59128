//! Neutral JSON curve records.
//!
//! Vendor AFM formats are out of scope; curves enter the pipeline through a
//! small JSON record that an external converter produces. The same module
//! writes the per-curve fit artifact emitted by the batch CLI.

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::data::{Curve, CurveMeta};
use crate::error::FdError;
use crate::fit::FitRecord;

/// On-disk curve record.
///
/// `segment` is optional; without it the curve is split at the force maximum
/// (everything up to and including the maximum is the approach).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CurveRecord {
    pub height: Vec<f64>,
    pub force: Vec<f64>,
    #[serde(default)]
    pub segment: Option<Vec<u8>>,
    #[serde(default)]
    pub spring_constant: Option<f64>,
}

impl CurveRecord {
    pub fn into_curve(self, source: &Path) -> Result<Curve, FdError> {
        let segment = match self.segment {
            Some(seg) => seg,
            None => {
                let idmax = argmax(&self.force);
                let mut seg = vec![0u8; self.force.len()];
                for s in seg.iter_mut().skip(idmax + 1) {
                    *s = 1;
                }
                seg
            }
        };
        let meta = CurveMeta {
            spring_constant: self.spring_constant,
            source: Some(source.to_path_buf()),
            enumeration: 0,
        };
        Curve::new(self.height, self.force, segment, meta)
    }
}

fn argmax(values: &[f64]) -> usize {
    let mut best = 0;
    for (i, v) in values.iter().enumerate() {
        if *v > values[best] {
            best = i;
        }
    }
    best
}

/// Read a curve from a JSON record file.
pub fn read_curve_json(path: &Path) -> Result<Curve, FdError> {
    let text = fs::read_to_string(path).map_err(|e| FdError::io(path, e))?;
    let record: CurveRecord = serde_json::from_str(&text).map_err(|e| FdError::Parse {
        path: path.to_path_buf(),
        reason: e.to_string(),
    })?;
    record.into_curve(path)
}

/// Per-curve artifact written by the batch fit command.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FittedCurveFile {
    pub tool: String,
    pub source: String,
    pub x: Vec<f64>,
    pub y: Vec<f64>,
    pub fit: Vec<f64>,
    pub success: bool,
    pub chi_sqr: f64,
    pub params: Vec<(String, f64)>,
}

/// Write the fitted-curve artifact next to the statistics table.
pub fn write_fitted_json(
    path: &Path,
    x: &[f64],
    y: &[f64],
    fit: &[f64],
    record: &FitRecord,
    source: &str,
) -> Result<(), FdError> {
    let file = FittedCurveFile {
        tool: format!("fd-curves {}", env!("CARGO_PKG_VERSION")),
        source: source.to_string(),
        x: x.to_vec(),
        y: y.to_vec(),
        fit: fit.to_vec(),
        success: record.success,
        chi_sqr: record.chi_sqr,
        params: record
            .params_fitted
            .iter()
            .map(|(k, p)| (k.to_string(), p.value))
            .collect(),
    };
    let text = serde_json::to_string_pretty(&file).map_err(|e| FdError::Parse {
        path: path.to_path_buf(),
        reason: e.to_string(),
    })?;
    fs::write(path, text).map_err(|e| FdError::io(path, e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn record_without_segment_splits_at_force_maximum() {
        let record = CurveRecord {
            height: vec![0.0; 5],
            force: vec![0.0, 1.0, 3.0, 2.0, 1.0],
            segment: None,
            spring_constant: Some(0.05),
        };
        let curve = record.into_curve(&PathBuf::from("test.json")).unwrap();
        assert_eq!(curve.segment, vec![0, 0, 0, 1, 1]);
    }
}
