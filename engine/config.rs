//! # Pipeline Configuration
//!
//! Every tunable of a run lives here: where the four source tables are, how
//! rows are aligned and gaps filled, and how the classifier is trained. Every
//! field has a default matching the classic pipeline, so an empty TOML file (or
//! no file at all) reproduces it exactly.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Errors raised while reading or validating a configuration file.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read configuration file '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Failed to parse TOML configuration file '{path}': {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
    #[error("The field separator must be a single ASCII character, found '{0}'.")]
    InvalidSeparator(char),
    #[error("The test fraction must lie strictly between 0 and 1, found {0}.")]
    InvalidTestFraction(f64),
    #[error("The inverse regularization strength must be positive and finite, found {0}.")]
    InvalidRegularization(f64),
}

/// Locations and format of the four source tables.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct InputConfig {
    pub ehr: PathBuf,
    pub proms: PathBuf,
    pub wearable: PathBuf,
    pub sdoh: PathBuf,
    pub separator: char,
}

impl Default for InputConfig {
    fn default() -> Self {
        Self {
            ehr: PathBuf::from("ehr_data.csv"),
            proms: PathBuf::from("proms_data.csv"),
            wearable: PathBuf::from("wearable_data.csv"),
            sdoh: PathBuf::from("sdoh_data.csv"),
            separator: ',',
        }
    }
}

impl InputConfig {
    /// Rebases every relative input path onto `dir`. Absolute paths are kept.
    pub fn resolve_against(&mut self, dir: &Path) {
        for path in [
            &mut self.ehr,
            &mut self.proms,
            &mut self.wearable,
            &mut self.sdoh,
        ] {
            if path.is_relative() {
                *path = dir.join(&*path);
            }
        }
    }

    pub fn separator_byte(&self) -> Result<u8, ConfigError> {
        if self.separator.is_ascii() {
            Ok(self.separator as u8)
        } else {
            Err(ConfigError::InvalidSeparator(self.separator))
        }
    }
}

/// How rows of the four tables are matched to one another.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RowAlignment {
    /// Row `i` of every table describes the same record.
    #[default]
    Positional,
    /// Rows are matched on the named identifier column, which every table must carry.
    JoinKey(String),
}

/// Fill rule for missing cells in numeric columns.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NumericImputation {
    #[default]
    Mean,
    Median,
}

/// Fill rule for missing cells in categorical columns.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CategoricalImputation {
    /// The most frequent value; ties go to the lexicographically smallest.
    #[default]
    Mode,
    /// A fixed placeholder category.
    Sentinel(String),
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PreprocessConfig {
    pub alignment: RowAlignment,
    pub numeric_imputation: NumericImputation,
    pub categorical_imputation: CategoricalImputation,
}

/// What the trainer does with a categorical feature column.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CategoricalEncoding {
    /// One indicator column per category.
    #[default]
    OneHot,
    /// Refuse to train on non-numeric features.
    Reject,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct TrainingConfig {
    pub outcome_column: String,
    pub test_fraction: f64,
    pub seed: u64,
    pub categorical_encoding: CategoricalEncoding,
    /// Inverse L2 regularization strength; smaller values regularize more.
    pub inverse_regularization: f64,
    pub max_iterations: usize,
    /// Gradient-norm tolerance for the BFGS optimizer.
    pub tolerance: f64,
}

impl Default for TrainingConfig {
    fn default() -> Self {
        Self {
            outcome_column: "outcome".to_string(),
            test_fraction: 0.2,
            seed: 42,
            categorical_encoding: CategoricalEncoding::OneHot,
            inverse_regularization: 1.0,
            max_iterations: 100,
            tolerance: 1e-4,
        }
    }
}

/// The complete description of a run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PipelineConfig {
    pub inputs: InputConfig,
    pub preprocess: PreprocessConfig,
    pub training: TrainingConfig,
}

impl PipelineConfig {
    /// Parses a configuration from TOML text and validates it.
    pub fn from_toml_str(text: &str, origin: &Path) -> Result<Self, ConfigError> {
        let config: PipelineConfig = toml::from_str(text).map_err(|source| ConfigError::Parse {
            path: origin.to_path_buf(),
            source,
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Reads and validates a TOML configuration file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&text, path)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.inputs.separator_byte()?;
        let fraction = self.training.test_fraction;
        if !(fraction > 0.0 && fraction < 1.0) {
            return Err(ConfigError::InvalidTestFraction(fraction));
        }
        let c = self.training.inverse_regularization;
        if !(c.is_finite() && c > 0.0) {
            return Err(ConfigError::InvalidRegularization(c));
        }
        Ok(())
    }
}
