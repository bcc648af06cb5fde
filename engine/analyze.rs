//! Prediction on the held-out rows and accuracy scoring.

use crate::model::{ModelError, TrainedModel};
use ndarray::{Array1, ArrayView1, ArrayView2};
use thiserror::Error;

#[derive(Error, Debug, PartialEq)]
pub enum AnalysisError {
    #[error("The test subset is empty; accuracy is undefined.")]
    EmptyTestSet,
    #[error("Test features and labels disagree: {features} rows vs {labels} labels.")]
    LengthMismatch { features: usize, labels: usize },
    #[error(transparent)]
    FeatureMismatch(#[from] ModelError),
    #[error("An analysis hook failed: {0}")]
    Hook(String),
}

/// Predictions for the test rows and how well they match the truth.
#[derive(Debug, Clone, PartialEq)]
pub struct Evaluation {
    pub predictions: Array1<f64>,
    pub truth: Array1<f64>,
    pub accuracy: f64,
}

impl Evaluation {
    pub fn n_correct(&self) -> usize {
        count_matches(self.predictions.view(), self.truth.view())
    }
}

/// A hook for analyses beyond accuracy. The default does nothing.
pub trait Analysis {
    fn analyze(&self, _: &Evaluation) -> Result<(), AnalysisError> {
        Ok(())
    }
}

/// The default analysis: none.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoAnalysis;

impl Analysis for NoAnalysis {}

/// Predicts every test row and scores the predictions.
pub fn evaluate(
    model: &TrainedModel,
    x_test: ArrayView2<f64>,
    y_test: ArrayView1<f64>,
) -> Result<Evaluation, AnalysisError> {
    if x_test.nrows() != y_test.len() {
        return Err(AnalysisError::LengthMismatch {
            features: x_test.nrows(),
            labels: y_test.len(),
        });
    }
    let predictions = model.predict(x_test)?;
    let accuracy = accuracy(predictions.view(), y_test)?;
    let evaluation = Evaluation {
        predictions,
        truth: y_test.to_owned(),
        accuracy,
    };
    log::info!(
        "Predicted {} test rows, {} correct; accuracy {:.4}",
        evaluation.predictions.len(),
        evaluation.n_correct(),
        evaluation.accuracy
    );
    Ok(evaluation)
}

/// Fraction of positions where `predicted` equals `truth` exactly.
pub fn accuracy(predicted: ArrayView1<f64>, truth: ArrayView1<f64>) -> Result<f64, AnalysisError> {
    if predicted.len() != truth.len() {
        return Err(AnalysisError::LengthMismatch {
            features: predicted.len(),
            labels: truth.len(),
        });
    }
    if truth.is_empty() {
        return Err(AnalysisError::EmptyTestSet);
    }
    Ok(count_matches(predicted, truth) as f64 / truth.len() as f64)
}

fn count_matches(predicted: ArrayView1<f64>, truth: ArrayView1<f64>) -> usize {
    predicted
        .iter()
        .zip(truth.iter())
        .filter(|(p, t)| p == t)
        .count()
}
