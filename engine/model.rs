use crate::scaler::Standardizer;
use ndarray::{Array1, Array2, ArrayView1, ArrayView2, Axis};
use thiserror::Error;

// --- Public Data Structures ---
// A fitted classifier together with the preprocessing it expects, so that a
// `TrainedModel` is everything needed to turn raw feature rows into labels.

/// Weights and bias of one logistic decision function.
#[derive(Debug, Clone, PartialEq)]
pub struct LinearPredictor {
    pub intercept: f64,
    pub weights: Array1<f64>,
}

impl LinearPredictor {
    /// The linear predictor `Xw + b` for every row.
    pub fn decision(&self, x: ArrayView2<f64>) -> Array1<f64> {
        x.dot(&self.weights) + self.intercept
    }

    /// `sigmoid(Xw + b)` for every row.
    pub fn probability(&self, x: ArrayView2<f64>) -> Array1<f64> {
        self.decision(x).mapv(sigmoid)
    }
}

/// The decision functions of a fitted model.
#[derive(Debug, Clone, PartialEq)]
pub enum Coefficients {
    /// Two classes: the predictor gives the probability of the larger class.
    Binary(LinearPredictor),
    /// One predictor per class, in class order.
    OneVsRest(Vec<LinearPredictor>),
}

/// The complete fitted model.
#[derive(Debug, Clone, PartialEq)]
pub struct TrainedModel {
    /// Column names of the feature matrix, in matrix order.
    pub feature_names: Vec<String>,
    /// Statistics fitted on the training rows.
    pub standardizer: Standardizer,
    /// Distinct outcome values seen in training, ascending.
    pub classes: Vec<f64>,
    pub coefficients: Coefficients,
    /// Optimizer iterations used per decision function.
    pub iterations: Vec<usize>,
}

#[derive(Error, Debug, PartialEq)]
pub enum ModelError {
    #[error("Prediction data has {found} feature columns, but the model was trained on {expected}.")]
    MismatchedFeatureCount { found: usize, expected: usize },
}

impl TrainedModel {
    pub fn n_features(&self) -> usize {
        self.feature_names.len()
    }

    /// Class probabilities for already standardized rows.
    ///
    /// Returns shape `[n_rows, n_classes]`. For one-vs-rest models each column
    /// is that class's own sigmoid, so rows need not sum to one.
    pub fn predict_proba(&self, scaled: ArrayView2<f64>) -> Result<Array2<f64>, ModelError> {
        self.check_width(scaled)?;
        let n = scaled.nrows();
        match &self.coefficients {
            Coefficients::Binary(predictor) => {
                let positive = predictor.probability(scaled);
                let mut out = Array2::zeros((n, 2));
                out.column_mut(0).assign(&positive.mapv(|p| 1.0 - p));
                out.column_mut(1).assign(&positive);
                Ok(out)
            }
            Coefficients::OneVsRest(predictors) => {
                let mut out = Array2::zeros((n, predictors.len()));
                for (k, predictor) in predictors.iter().enumerate() {
                    out.column_mut(k).assign(&predictor.probability(scaled));
                }
                Ok(out)
            }
        }
    }

    /// Predicted class values for already standardized rows.
    pub fn predict(&self, scaled: ArrayView2<f64>) -> Result<Array1<f64>, ModelError> {
        let proba = self.predict_proba(scaled)?;
        Ok(proba
            .axis_iter(Axis(0))
            .map(|row| self.classes[argmax(row)])
            .collect())
    }

    fn check_width(&self, x: ArrayView2<f64>) -> Result<(), ModelError> {
        if x.ncols() != self.n_features() {
            return Err(ModelError::MismatchedFeatureCount {
                found: x.ncols(),
                expected: self.n_features(),
            });
        }
        Ok(())
    }
}

/// Numerically stable logistic function.
pub fn sigmoid(z: f64) -> f64 {
    if z >= 0.0 {
        1.0 / (1.0 + (-z).exp())
    } else {
        let e = z.exp();
        e / (1.0 + e)
    }
}

/// Index of the largest entry; the first one wins ties. A binary row
/// `[1 - p, p]` therefore picks the positive class only when `p > 0.5`.
fn argmax(row: ArrayView1<f64>) -> usize {
    let mut best = 0;
    for (k, &value) in row.iter().enumerate() {
        if value > row[best] {
            best = k;
        }
    }
    best
}
