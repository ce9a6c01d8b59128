//! The regressors available for rating, behind one trait.
//!
//! Each regressor is a black box: it is parameterized ("trained") on a
//! labeled training set when the rater is constructed and only exposes
//! `predict` afterwards. The rating engine never looks inside.

use smartcore::ensemble::random_forest_regressor::{
    RandomForestRegressor, RandomForestRegressorParameters,
};
use smartcore::linalg::basic::matrix::DenseMatrix;
use smartcore::linear::ridge_regression::{RidgeRegression, RidgeRegressionParameters};
use smartcore::metrics::distance::euclidian::Euclidian;
use smartcore::neighbors::knn_regressor::{KNNRegressor, KNNRegressorParameters};
use smartcore::tree::decision_tree_regressor::{
    DecisionTreeRegressor, DecisionTreeRegressorParameters,
};

use crate::domain::RegressorKind;
use crate::error::FdError;

/// A trained regressor: `predict(feature vector) -> raw score`.
pub trait QualityRegressor: Send + Sync {
    fn predict(&self, sample: &[f64]) -> Result<f64, FdError>;
}

fn rating_err<E: std::fmt::Display>(context: &str) -> impl FnOnce(E) -> FdError + '_ {
    move |e| FdError::Rating(format!("{context}: {e}"))
}

fn to_matrix(rows: &[Vec<f64>]) -> Result<DenseMatrix<f64>, FdError> {
    DenseMatrix::from_2d_vec(&rows.to_vec()).map_err(rating_err("building sample matrix"))
}

/// Train a regressor of the requested kind on `(x, y)`.
pub fn train(
    kind: RegressorKind,
    x: &[Vec<f64>],
    y: &[f64],
) -> Result<Box<dyn QualityRegressor>, FdError> {
    if x.is_empty() || x.len() != y.len() {
        return Err(FdError::Rating(format!(
            "training set is empty or inconsistent ({} samples, {} responses)",
            x.len(),
            y.len()
        )));
    }
    let matrix = to_matrix(x)?;
    let y = y.to_vec();

    match kind {
        RegressorKind::RandomForest => {
            let params = RandomForestRegressorParameters::default()
                .with_n_trees(100)
                .with_max_depth(15)
                .with_seed(42);
            let model = RandomForestRegressor::fit(&matrix, &y, params)
                .map_err(rating_err("training random forest"))?;
            Ok(Box::new(Forest { model }))
        }
        RegressorKind::DecisionTree => {
            let params = DecisionTreeRegressorParameters::default().with_max_depth(6);
            let model = DecisionTreeRegressor::fit(&matrix, &y, params)
                .map_err(rating_err("training decision tree"))?;
            Ok(Box::new(Tree { model }))
        }
        RegressorKind::Knn => {
            let k = 3.min(y.len());
            let params = KNNRegressorParameters::default().with_k(k);
            let model = KNNRegressor::fit(&matrix, &y, params)
                .map_err(rating_err("training k-nearest-neighbours"))?;
            Ok(Box::new(Knn { model }))
        }
        RegressorKind::Ridge => {
            let params = RidgeRegressionParameters::default().with_alpha(1.0);
            let model = RidgeRegression::fit(&matrix, &y, params)
                .map_err(rating_err("training ridge regression"))?;
            Ok(Box::new(Ridge { model }))
        }
    }
}

struct Forest {
    model: RandomForestRegressor<f64, f64, DenseMatrix<f64>, Vec<f64>>,
}

struct Tree {
    model: DecisionTreeRegressor<f64, f64, DenseMatrix<f64>, Vec<f64>>,
}

struct Knn {
    model: KNNRegressor<f64, f64, DenseMatrix<f64>, Vec<f64>, Euclidian<f64>>,
}

struct Ridge {
    model: RidgeRegression<f64, f64, DenseMatrix<f64>, Vec<f64>>,
}

macro_rules! impl_predict {
    ($ty:ident, $label:literal) => {
        impl QualityRegressor for $ty {
            fn predict(&self, sample: &[f64]) -> Result<f64, FdError> {
                let matrix = to_matrix(&[sample.to_vec()])?;
                let out = self
                    .model
                    .predict(&matrix)
                    .map_err(rating_err(concat!($label, " prediction")))?;
                out.first().copied().ok_or_else(|| {
                    FdError::Rating(concat!($label, " returned no prediction").into())
                })
            }
        }
    };
}

impl_predict!(Forest, "random forest");
impl_predict!(Tree, "decision tree");
impl_predict!(Knn, "k-nearest-neighbours");
impl_predict!(Ridge, "ridge");
