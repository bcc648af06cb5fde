// ========================================================================================
//
//                               THE PIPELINE ORCHESTRATOR
//
// ========================================================================================
//
// Composes the five stages into a strict linear chain:
//
//     Loader -> Preprocessor -> Trainer -> Predictor/Analyzer -> Reporter
//
// There are no retries and no branches. The first failing stage aborts the run, and
// its error is wrapped in a `PipelineError` variant naming the stage.

use crate::analyze::{Analysis, AnalysisError, NoAnalysis, evaluate};
use crate::config::{ConfigError, PipelineConfig};
use crate::data::{DataError, load_sources};
use crate::estimate::{EstimationError, train};
use crate::model::TrainedModel;
use crate::preprocess::{Identity, PreprocessError, TableTransform, preprocess};
use crate::report::{PolicyReporter, Reporter};
use ndarray::Array1;
use std::io::{self, Write};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("Invalid configuration: {0}")]
    Config(#[from] ConfigError),
    #[error("Loading failed: {0}")]
    Load(#[from] DataError),
    #[error("Preprocessing failed: {0}")]
    Preprocess(#[from] PreprocessError),
    #[error("Training failed: {0}")]
    Train(#[from] EstimationError),
    #[error("Prediction and analysis failed: {0}")]
    Analyze(#[from] AnalysisError),
    #[error("Reporting failed: {0}")]
    Report(#[source] io::Error),
}

/// What a successful run produced.
#[derive(Debug, Clone)]
pub struct PipelineSummary {
    pub model: TrainedModel,
    pub predictions: Array1<f64>,
    pub accuracy: f64,
    pub test_rows: usize,
}

/// A configured run with its extension points.
pub struct Pipeline {
    config: PipelineConfig,
    transform: Box<dyn TableTransform>,
    analysis: Box<dyn Analysis>,
    reporter: Box<dyn Reporter>,
}

impl Pipeline {
    pub fn new(config: PipelineConfig) -> Self {
        Self {
            config,
            transform: Box::new(Identity),
            analysis: Box::new(NoAnalysis),
            reporter: Box::new(PolicyReporter),
        }
    }

    /// Adds a table transform that runs after imputation.
    pub fn with_transform(mut self, transform: impl TableTransform + 'static) -> Self {
        self.transform = Box::new(transform);
        self
    }

    /// Adds an analysis that runs after accuracy is printed.
    pub fn with_analysis(mut self, analysis: impl Analysis + 'static) -> Self {
        self.analysis = Box::new(analysis);
        self
    }

    pub fn with_reporter(mut self, reporter: impl Reporter + 'static) -> Self {
        self.reporter = Box::new(reporter);
        self
    }

    /// Runs every stage once, writing the human-readable summary to `out`.
    pub fn run(&self, out: &mut dyn Write) -> Result<PipelineSummary, PipelineError> {
        self.config.validate()?;

        // --- Stage 1: Loader ---
        let sources = load_sources(&self.config.inputs)?;

        // --- Stage 2: Preprocessor ---
        let combined = preprocess(sources, &self.config.preprocess, self.transform.as_ref())?;

        // --- Stage 3: Trainer ---
        let output = train(&combined, &self.config.training)?;

        // --- Stage 4: Predictor/Analyzer ---
        let evaluation = evaluate(&output.model, output.x_test.view(), output.y_test.view())?;
        writeln!(out, "Model Accuracy: {:?}", evaluation.accuracy).map_err(PipelineError::Report)?;
        self.analysis.analyze(&evaluation)?;

        // --- Stage 5: Reporter ---
        self.reporter
            .report(&evaluation, out)
            .map_err(PipelineError::Report)?;

        Ok(PipelineSummary {
            model: output.model,
            test_rows: evaluation.predictions.len(),
            predictions: evaluation.predictions,
            accuracy: evaluation.accuracy,
        })
    }
}
