//! # Model Estimation
//!
//! Turns the combined table into a fitted classifier:
//!
//! 1.  **Design:** every column except the outcome becomes a feature. Numeric
//!     columns map one-to-one; categorical columns expand into one indicator
//!     column per category.
//! 2.  **Split:** rows are partitioned into train and test subsets with a
//!     seeded shuffle, so identical inputs always give the identical partition.
//! 3.  **Standardize:** column statistics are estimated on the training rows
//!     only and then applied to both subsets. Test rows never influence them.
//! 4.  **Fit (BFGS):** L2-regularized logistic regression. The penalized
//!     negative log-likelihood is convex, so the quasi-Newton optimizer from
//!     `wolfe_bfgs` converges to the unique optimum. Problems with more than two
//!     classes are fitted one-vs-rest.

// External Crate for Optimization
use wolfe_bfgs::{Bfgs, BfgsError, BfgsSolution};

use crate::config::{CategoricalEncoding, TrainingConfig};
use crate::model::{Coefficients, LinearPredictor, TrainedModel, sigmoid};
use crate::scaler::Standardizer;
use crate::split::train_test_split;
use crate::table::{ColumnData, Table};

use ndarray::{Array1, Array2, ArrayView1, ArrayView2, Axis, s};
use std::collections::BTreeSet;
use thiserror::Error;

/// A comprehensive error type for the model estimation process.
#[derive(Error, Debug, PartialEq)]
pub enum EstimationError {
    #[error("The outcome column '{0}' was not found in the combined table.")]
    MissingColumn(String),

    #[error("The column '{column}' cannot be used as numeric data: {reason}")]
    NumericConversion { column: String, reason: String },

    #[error("The column '{0}' still contains missing values; impute before training.")]
    MissingValues(String),

    #[error("No feature columns remain after removing the outcome column.")]
    NoFeatures,

    #[error(
        "Cannot split {rows} rows with a test fraction of {test_fraction}; both subsets must be non-empty."
    )]
    InvalidSplit { rows: usize, test_fraction: f64 },

    #[error("The training subset contains a single outcome class ({0}); at least two are required.")]
    SingleClass(f64),

    #[error("BFGS optimization failed: {0}")]
    OptimizationFailed(String),
}

/// The products of training consumed by the analysis stage.
#[derive(Debug, Clone)]
pub struct TrainingOutput {
    pub model: TrainedModel,
    /// Test rows, already standardized with the training statistics.
    pub x_test: Array2<f64>,
    pub y_test: Array1<f64>,
}

/// The feature matrix and label vector extracted from a table.
#[derive(Debug, Clone, PartialEq)]
pub struct Design {
    pub x: Array2<f64>,
    pub y: Array1<f64>,
    pub feature_names: Vec<String>,
}

/// The main entry point for model training.
pub fn train(table: &Table, config: &TrainingConfig) -> Result<TrainingOutput, EstimationError> {
    let design = build_design(table, &config.outcome_column, config.categorical_encoding)?;
    let n_rows = design.x.nrows();
    log::info!(
        "Starting model training. {} samples, {} features.",
        n_rows,
        design.feature_names.len()
    );

    let split = train_test_split(n_rows, config.test_fraction, config.seed).ok_or(
        EstimationError::InvalidSplit {
            rows: n_rows,
            test_fraction: config.test_fraction,
        },
    )?;
    log::info!(
        "Split {} rows into {} train / {} test (seed {})",
        n_rows,
        split.train.len(),
        split.test.len(),
        config.seed
    );

    let x_train_raw = design.x.select(Axis(0), &split.train);
    let y_train = design.y.select(Axis(0), &split.train);
    let x_test_raw = design.x.select(Axis(0), &split.test);
    let y_test = design.y.select(Axis(0), &split.test);

    let standardizer = Standardizer::fit(x_train_raw.view());
    let x_train = standardizer.transform(x_train_raw.view());
    let x_test = standardizer.transform(x_test_raw.view());

    let classes = distinct_classes(y_train.view());
    if classes.len() < 2 {
        return Err(EstimationError::SingleClass(classes.first().copied().unwrap_or(f64::NAN)));
    }
    if classes.len() > 2 {
        log::warn!(
            "Outcome has {} distinct training values {:?}; fitting one-vs-rest.",
            classes.len(),
            classes
        );
    }

    let (coefficients, iterations) = if classes.len() == 2 {
        let targets = indicator(y_train.view(), classes[1]);
        let (predictor, iters) = fit_logistic(x_train.view(), targets.view(), config)?;
        (Coefficients::Binary(predictor), vec![iters])
    } else {
        let mut predictors = Vec::with_capacity(classes.len());
        let mut iterations = Vec::with_capacity(classes.len());
        for &class in &classes {
            let targets = indicator(y_train.view(), class);
            let (predictor, iters) = fit_logistic(x_train.view(), targets.view(), config)?;
            predictors.push(predictor);
            iterations.push(iters);
        }
        (Coefficients::OneVsRest(predictors), iterations)
    };

    let model = TrainedModel {
        feature_names: design.feature_names,
        standardizer,
        classes,
        coefficients,
        iterations,
    };
    log::info!("Model training completed successfully");

    Ok(TrainingOutput {
        model,
        x_test,
        y_test,
    })
}

/// Separates the outcome from the features and encodes both numerically.
pub fn build_design(
    table: &Table,
    outcome: &str,
    encoding: CategoricalEncoding,
) -> Result<Design, EstimationError> {
    let label_column = table
        .column(outcome)
        .ok_or_else(|| EstimationError::MissingColumn(outcome.to_string()))?;
    let y = match &label_column.data {
        ColumnData::Numeric(values) => complete(values, outcome)?,
        other => {
            return Err(EstimationError::NumericConversion {
                column: outcome.to_string(),
                reason: format!(
                    "the outcome must hold numeric class values, found a {} column",
                    other.kind()
                ),
            });
        }
    };
    // Labels are class identifiers. A fractional value usually means a missing
    // label was mean-imputed.
    if let Some(label) = y.iter().find(|v| v.fract() != 0.0) {
        return Err(EstimationError::NumericConversion {
            column: outcome.to_string(),
            reason: format!("class labels must be whole numbers, found {label}"),
        });
    }

    let n = table.height();
    let mut feature_names = Vec::new();
    let mut feature_columns: Vec<Array1<f64>> = Vec::new();
    for column in table.columns().iter().filter(|c| c.name != outcome) {
        match &column.data {
            ColumnData::Numeric(values) => {
                feature_names.push(column.name.clone());
                feature_columns.push(complete(values, &column.name)?);
            }
            ColumnData::Categorical(values) => {
                if encoding == CategoricalEncoding::Reject {
                    return Err(EstimationError::NumericConversion {
                        column: column.name.clone(),
                        reason: "categorical features are rejected by configuration".to_string(),
                    });
                }
                if values.iter().any(Option::is_none) {
                    return Err(EstimationError::MissingValues(column.name.clone()));
                }
                let categories: BTreeSet<&str> = values.iter().flatten().map(String::as_str).collect();
                for category in categories {
                    feature_names.push(format!("{}={}", column.name, category));
                    feature_columns.push(
                        values
                            .iter()
                            .map(|v| if v.as_deref() == Some(category) { 1.0 } else { 0.0 })
                            .collect(),
                    );
                }
            }
        }
    }

    if feature_columns.is_empty() {
        return Err(EstimationError::NoFeatures);
    }

    let mut x = Array2::zeros((n, feature_columns.len()));
    for (j, values) in feature_columns.iter().enumerate() {
        x.column_mut(j).assign(values);
    }

    Ok(Design {
        x,
        y,
        feature_names,
    })
}

/// Fits one binary L2-regularized logistic regression with BFGS.
///
/// `targets` must hold 0/1 values. Minimizes
/// `sum_i [log(1 + exp(z_i)) - t_i z_i] + ||w||^2 / (2C)` with `z = Xw + b`;
/// the intercept is not penalized.
pub fn fit_logistic(
    x: ArrayView2<f64>,
    targets: ArrayView1<f64>,
    config: &TrainingConfig,
) -> Result<(LinearPredictor, usize), EstimationError> {
    let p = x.ncols();
    let design = x.to_owned();
    let t = targets.to_owned();
    let penalty = 1.0 / config.inverse_regularization;

    let cost_and_grad = move |theta: &Array1<f64>| -> (f64, Array1<f64>) {
        let w = theta.slice(s![..p]);
        let b = theta[p];
        let z = design.dot(&w) + b;

        let mut loss = 0.0;
        let mut residual = Array1::<f64>::zeros(z.len());
        for i in 0..z.len() {
            loss += softplus(z[i]) - t[i] * z[i];
            residual[i] = sigmoid(z[i]) - t[i];
        }
        loss += 0.5 * penalty * w.dot(&w);

        let mut grad = Array1::<f64>::zeros(p + 1);
        let grad_w = design.t().dot(&residual) + &w * penalty;
        grad.slice_mut(s![..p]).assign(&grad_w);
        grad[p] = residual.sum();
        (loss, grad)
    };

    let solution = match Bfgs::new(Array1::zeros(p + 1), cost_and_grad)
        .with_tolerance(config.tolerance)
        .with_max_iterations(config.max_iterations)
        .run()
    {
        Ok(solution) => solution,
        // Both variants carry the best point reached; keep it, unconverged.
        Err(BfgsError::MaxIterationsReached { last_solution }) => {
            log::warn!(
                "BFGS did not converge within {} iterations; using the best point found.",
                config.max_iterations
            );
            *last_solution
        }
        Err(BfgsError::LineSearchFailed {
            last_solution,
            max_attempts,
        }) => {
            log::warn!(
                "BFGS line search failed after {max_attempts} attempts; using the best point found."
            );
            *last_solution
        }
        Err(e) => return Err(EstimationError::OptimizationFailed(format!("{e:?}"))),
    };
    let BfgsSolution {
        final_point,
        final_value,
        iterations,
        ..
    } = solution;

    log::debug!(
        "BFGS finished after {} iterations with penalized loss {:.6}",
        iterations,
        final_value
    );

    Ok((
        LinearPredictor {
            intercept: final_point[p],
            weights: final_point.slice(s![..p]).to_owned(),
        },
        iterations as usize,
    ))
}

/// `log(1 + exp(z))` without overflow.
fn softplus(z: f64) -> f64 {
    z.max(0.0) + (-z.abs()).exp().ln_1p()
}

fn complete(values: &[Option<f64>], name: &str) -> Result<Array1<f64>, EstimationError> {
    values
        .iter()
        .map(|v| v.ok_or_else(|| EstimationError::MissingValues(name.to_string())))
        .collect()
}

fn distinct_classes(y: ArrayView1<f64>) -> Vec<f64> {
    let mut classes = y.to_vec();
    classes.sort_by(f64::total_cmp);
    classes.dedup();
    classes
}

fn indicator(y: ArrayView1<f64>, class: f64) -> Array1<f64> {
    y.mapv(|v| if v == class { 1.0 } else { 0.0 })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::table::Column;
    use approx::assert_abs_diff_eq;
    use ndarray::array;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};
    use rand_distr::StandardNormal;

    /// A table whose outcome follows a logistic model in `signal`.
    fn synthetic_table(n: usize, seed: u64) -> Table {
        let mut rng = StdRng::seed_from_u64(seed);
        let mut signal = Vec::with_capacity(n);
        let mut noise = Vec::with_capacity(n);
        let mut outcome = Vec::with_capacity(n);
        for _ in 0..n {
            let s: f64 = rng.sample(StandardNormal);
            let e: f64 = rng.sample(StandardNormal);
            let p = sigmoid(3.0 * s);
            let y = if rng.r#gen::<f64>() < p { 1.0 } else { 0.0 };
            signal.push(Some(10.0 + 4.0 * s));
            noise.push(Some(e));
            outcome.push(Some(y));
        }
        Table::new(vec![
            Column::numeric("outcome", outcome),
            Column::numeric("signal", signal),
            Column::numeric("noise", noise),
        ])
        .unwrap()
    }

    #[test]
    fn missing_outcome_column_is_reported() {
        let table = Table::new(vec![Column::numeric("age", vec![Some(1.0), Some(2.0)])]).unwrap();
        let err = train(&table, &TrainingConfig::default()).unwrap_err();
        assert_eq!(err, EstimationError::MissingColumn("outcome".to_string()));
    }

    #[test]
    fn categorical_outcome_is_a_conversion_error() {
        let table = Table::new(vec![
            Column::categorical("outcome", vec![Some("yes".to_string()), Some("no".to_string())]),
            Column::numeric("age", vec![Some(1.0), Some(2.0)]),
        ])
        .unwrap();
        let err = build_design(&table, "outcome", CategoricalEncoding::OneHot).unwrap_err();
        assert!(matches!(err, EstimationError::NumericConversion { ref column, .. } if column == "outcome"));
    }

    #[test]
    fn one_hot_expands_categorical_features() {
        let table = Table::new(vec![
            Column::numeric("outcome", vec![Some(0.0), Some(1.0), Some(1.0)]),
            Column::categorical(
                "housing",
                vec![Some("rent".to_string()), Some("own".to_string()), Some("rent".to_string())],
            ),
            Column::numeric("age", vec![Some(30.0), Some(40.0), Some(50.0)]),
        ])
        .unwrap();
        let design = build_design(&table, "outcome", CategoricalEncoding::OneHot).unwrap();
        assert_eq!(design.feature_names, vec!["housing=own", "housing=rent", "age"]);
        assert_eq!(
            design.x,
            array![[0.0, 1.0, 30.0], [1.0, 0.0, 40.0], [0.0, 1.0, 50.0]]
        );
        assert_eq!(design.y, array![0.0, 1.0, 1.0]);

        let err = build_design(&table, "outcome", CategoricalEncoding::Reject).unwrap_err();
        assert!(matches!(err, EstimationError::NumericConversion { ref column, .. } if column == "housing"));
    }

    #[test]
    fn outcome_alone_leaves_no_features() {
        let table = Table::new(vec![Column::numeric("outcome", vec![Some(0.0), Some(1.0)])]).unwrap();
        let err = build_design(&table, "outcome", CategoricalEncoding::OneHot).unwrap_err();
        assert_eq!(err, EstimationError::NoFeatures);
    }

    #[test]
    fn single_training_class_is_rejected() {
        let table = Table::new(vec![
            Column::numeric("outcome", vec![Some(1.0); 10]),
            Column::numeric("x", (0..10).map(|i| Some(i as f64)).collect()),
        ])
        .unwrap();
        let err = train(&table, &TrainingConfig::default()).unwrap_err();
        assert_eq!(err, EstimationError::SingleClass(1.0));
    }

    #[test]
    fn too_few_rows_cannot_be_split() {
        let table = Table::new(vec![
            Column::numeric("outcome", vec![Some(1.0)]),
            Column::numeric("x", vec![Some(1.0)]),
        ])
        .unwrap();
        let err = train(&table, &TrainingConfig::default()).unwrap_err();
        assert!(matches!(err, EstimationError::InvalidSplit { rows: 1, .. }));
    }

    #[test]
    fn gradient_vanishes_at_the_fitted_optimum() {
        let x = array![[-2.0], [-1.0], [-0.5], [0.5], [1.0], [2.0], [0.2], [-0.2]];
        let t = array![0.0, 0.0, 1.0, 0.0, 1.0, 1.0, 1.0, 0.0];
        let config = TrainingConfig {
            tolerance: 1e-6,
            max_iterations: 500,
            ..TrainingConfig::default()
        };
        let (fit, _) = fit_logistic(x.view(), t.view(), &config).unwrap();

        let z = x.dot(&fit.weights) + fit.intercept;
        let residual = z.mapv(sigmoid) - &t;
        let grad_w = x.column(0).dot(&residual) + fit.weights[0];
        assert_abs_diff_eq!(grad_w, 0.0, epsilon = 1e-4);
        assert_abs_diff_eq!(residual.sum(), 0.0, epsilon = 1e-4);
        assert!(fit.weights[0] > 0.0);
    }

    #[test]
    fn recovers_the_direction_of_a_real_signal() {
        let table = synthetic_table(400, 11);
        let output = train(&table, &TrainingConfig::default()).unwrap();
        assert_eq!(output.model.classes, vec![0.0, 1.0]);
        match &output.model.coefficients {
            Coefficients::Binary(predictor) => {
                assert!(predictor.weights[0] > 1.0, "signal weight {}", predictor.weights[0]);
                assert!(predictor.weights[0].abs() > 3.0 * predictor.weights[1].abs());
            }
            other => panic!("expected a binary model, got {:?}", other),
        }
        assert_eq!(output.x_test.nrows(), 80);
        assert_eq!(output.y_test.len(), 80);
    }

    #[test]
    fn iteration_limit_keeps_the_best_point_found() {
        let table = synthetic_table(200, 5);
        let config = TrainingConfig {
            max_iterations: 2,
            ..TrainingConfig::default()
        };
        let output = train(&table, &config).unwrap();
        assert!(output.model.iterations[0] <= 2);
        match &output.model.coefficients {
            Coefficients::Binary(predictor) => {
                assert!(predictor.weights.iter().all(|w| w.is_finite()));
                assert!(predictor.intercept.is_finite());
            }
            other => panic!("expected a binary model, got {:?}", other),
        }
    }

    #[test]
    fn fractional_labels_are_rejected() {
        // A missing 0/1 label mean-imputed to 0.5.
        let table = Table::new(vec![
            Column::numeric("outcome", vec![Some(0.0), Some(1.0), Some(0.5), Some(1.0)]),
            Column::numeric("x", vec![Some(1.0), Some(2.0), Some(3.0), Some(4.0)]),
        ])
        .unwrap();
        let err = build_design(&table, "outcome", CategoricalEncoding::OneHot).unwrap_err();
        match err {
            EstimationError::NumericConversion { column, reason } => {
                assert_eq!(column, "outcome");
                assert!(reason.contains("0.5"), "reason: {reason}");
            }
            other => panic!("expected NumericConversion, got {:?}", other),
        }
    }

    #[test]
    fn training_is_deterministic_for_a_fixed_seed() {
        let table = synthetic_table(120, 3);
        let first = train(&table, &TrainingConfig::default()).unwrap();
        let second = train(&table, &TrainingConfig::default()).unwrap();
        assert_eq!(first.model, second.model);
        assert_eq!(first.x_test, second.x_test);
        assert_eq!(first.y_test, second.y_test);
    }

    #[test]
    fn test_rows_are_scaled_with_training_statistics() {
        let table = synthetic_table(60, 5);
        let config = TrainingConfig::default();
        let output = train(&table, &config).unwrap();

        let design = build_design(&table, "outcome", config.categorical_encoding).unwrap();
        let split = train_test_split(60, config.test_fraction, config.seed).unwrap();
        let train_rows = design.x.select(Axis(0), &split.train);
        let test_rows = design.x.select(Axis(0), &split.test);

        let n = train_rows.nrows() as f64;
        for j in 0..design.x.ncols() {
            let column = train_rows.column(j);
            let mean = column.sum() / n;
            let std = (column.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n).sqrt();
            for (i, &raw) in test_rows.column(j).iter().enumerate() {
                assert_eq!(output.x_test[[i, j]], (raw - mean) / std);
            }
        }
        assert_eq!(output.y_test, design.y.select(Axis(0), &split.test));
    }

    #[test]
    fn three_classes_fit_one_vs_rest() {
        let mut outcome = Vec::new();
        let mut x = Vec::new();
        for i in 0..90 {
            let class = (i % 3) as f64;
            outcome.push(Some(class));
            x.push(Some(class * 5.0 + (i as f64 * 0.37).sin()));
        }
        let table = Table::new(vec![
            Column::numeric("outcome", outcome),
            Column::numeric("x", x),
        ])
        .unwrap();
        let output = train(&table, &TrainingConfig::default()).unwrap();
        assert_eq!(output.model.classes, vec![0.0, 1.0, 2.0]);
        assert!(matches!(&output.model.coefficients, Coefficients::OneVsRest(p) if p.len() == 3));
        assert_eq!(output.model.iterations.len(), 3);
    }
}
