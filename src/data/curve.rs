//! The in-memory force-distance curve.
//!
//! A curve is a column store of equally long sample arrays plus metadata.
//! The raw columns (`height`, `force`, `segment`) come from the ingestion
//! layer; `tip_position` and the `fit*` columns are derived by preprocessing
//! and fitting. Preprocessing operates element-wise or as whole-array
//! corrections and never resamples, so the sample count is constant for the
//! lifetime of a curve.

use std::path::PathBuf;

use crate::domain::{Axis, Segment};
use crate::error::FdError;

/// Metadata attached to a curve by the ingestion layer.
#[derive(Debug, Clone, Default)]
pub struct CurveMeta {
    /// Cantilever spring constant [N/m]. Required for tip-position
    /// computation; fitting fails fast without it.
    pub spring_constant: Option<f64>,
    /// Source file, if the curve was read from disk.
    pub source: Option<PathBuf>,
    /// Index of the curve within its source file.
    pub enumeration: usize,
}

/// A force-distance curve with derived columns.
#[derive(Debug, Clone)]
pub struct Curve {
    /// Measured cantilever height [m].
    pub height: Vec<f64>,
    /// Calibrated force [N].
    pub force: Vec<f64>,
    /// Tip-sample separation [m]; populated by `compute_tip_position`.
    pub tip_position: Option<Vec<f64>>,
    /// Segment flag per sample (0 = approach, 1 = retract).
    pub segment: Vec<u8>,
    /// Model values over the fitted segment; NaN elsewhere.
    pub fit: Vec<f64>,
    /// Weighted fit residuals over the fitted segment; NaN elsewhere.
    pub fit_residuals: Vec<f64>,
    /// Samples that entered the last fit.
    pub fit_range: Vec<bool>,
    pub meta: CurveMeta,
}

impl Curve {
    /// Build a curve from raw columns, validating column lengths.
    pub fn new(
        height: Vec<f64>,
        force: Vec<f64>,
        segment: Vec<u8>,
        meta: CurveMeta,
    ) -> Result<Self, FdError> {
        let n = height.len();
        if n == 0 {
            return Err(FdError::Config("curve has no samples".into()));
        }
        if force.len() != n || segment.len() != n {
            return Err(FdError::Config(format!(
                "column length mismatch: height={}, force={}, segment={}",
                n,
                force.len(),
                segment.len()
            )));
        }
        Ok(Curve {
            height,
            force,
            tip_position: None,
            segment,
            fit: vec![f64::NAN; n],
            fit_residuals: vec![f64::NAN; n],
            fit_range: vec![false; n],
            meta,
        })
    }

    pub fn len(&self) -> usize {
        self.height.len()
    }

    pub fn is_empty(&self) -> bool {
        self.height.is_empty()
    }

    /// Data of a fitting axis.
    ///
    /// Fails with a configuration error when the tip position has not been
    /// computed yet (the `compute_tip_position` preprocessing step).
    pub fn axis_data(&self, axis: Axis) -> Result<&[f64], FdError> {
        match axis {
            Axis::Height => Ok(&self.height),
            Axis::Force => Ok(&self.force),
            Axis::TipPosition => self.tip_position.as_deref().ok_or_else(|| {
                FdError::Config(
                    "column 'tip position' not available; \
                     add the 'compute_tip_position' preprocessing step"
                        .into(),
                )
            }),
        }
    }

    /// Boolean mask selecting one segment.
    pub fn segment_mask(&self, segment: Segment) -> Vec<bool> {
        let flag = segment.flag();
        self.segment.iter().map(|&s| s == flag).collect()
    }

    /// Indices belonging to one segment, in sample order.
    pub fn segment_indices(&self, segment: Segment) -> Vec<usize> {
        let flag = segment.flag();
        self.segment
            .iter()
            .enumerate()
            .filter_map(|(i, &s)| if s == flag { Some(i) } else { None })
            .collect()
    }

    /// Reset the derived fit columns to their unfitted state.
    pub fn clear_fit_columns(&mut self) {
        for v in &mut self.fit {
            *v = f64::NAN;
        }
        for v in &mut self.fit_residuals {
            *v = f64::NAN;
        }
        for v in &mut self.fit_range {
            *v = false;
        }
    }
}
