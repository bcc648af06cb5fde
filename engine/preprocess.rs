//! # Integration and Imputation
//!
//! Merges the four source tables into one wide table and fills the gaps.
//!
//! 1.  **Alignment:** rows are matched either by position (every table must
//!     then have the same height) or by an explicit identifier column, in which
//!     case the other tables are reordered to follow the EHR table.
//! 2.  **Concatenation:** columns are appended in source order. Column names
//!     must be unique across all sources.
//! 3.  **Imputation:** every missing cell is filled from its own column,
//!     computed over the combined table. Numeric columns use the mean (or
//!     median); categorical columns use the mode (or a sentinel). A column with
//!     nothing to impute from is an error, never a silent NaN.

use crate::config::{CategoricalImputation, NumericImputation, PreprocessConfig, RowAlignment};
use crate::data::SourceTables;
use crate::table::{Column, ColumnData, Table};
use itertools::Itertools;
use std::collections::{BTreeMap, HashMap};
use thiserror::Error;

#[derive(Error, Debug, PartialEq)]
pub enum PreprocessError {
    #[error(
        "The {source_name} table has {found} rows but the EHR table has {expected}. Positional alignment requires equal row counts."
    )]
    ShapeMismatch {
        source_name: &'static str,
        expected: usize,
        found: usize,
    },
    #[error("The column '{0}' appears in more than one source table.")]
    DuplicateColumn(String),
    #[error("The {source_name} table has no join key column '{key}'.")]
    MissingKey {
        source_name: &'static str,
        key: String,
    },
    #[error("The {source_name} table has a missing or repeated join key value '{value}'.")]
    DuplicateKey {
        source_name: &'static str,
        value: String,
    },
    #[error("The key '{value}' from the EHR table has no matching row in the {source_name} table.")]
    UnmatchedKey {
        source_name: &'static str,
        value: String,
    },
    #[error("The column '{0}' has no non-missing values, so there is nothing to impute from.")]
    EmptyColumn(String),
    #[error("A table transform failed: {0}")]
    Transform(String),
}

/// A hook for additional table-level preprocessing after imputation.
pub trait TableTransform {
    fn transform(&self, table: Table) -> Result<Table, PreprocessError> {
        Ok(table)
    }
}

/// The default transform: leaves the table untouched.
#[derive(Debug, Default, Clone, Copy)]
pub struct Identity;

impl TableTransform for Identity {}

/// Runs alignment, concatenation, imputation, and the transform hook.
pub fn preprocess(
    sources: SourceTables,
    config: &PreprocessConfig,
    transform: &dyn TableTransform,
) -> Result<Table, PreprocessError> {
    let combined = combine(sources, &config.alignment)?;
    log::info!(
        "Combined table: {} rows, {} columns",
        combined.height(),
        combined.width()
    );
    log::debug!("Combined columns: {:?}", combined.column_names());
    let imputed = impute(combined, config)?;
    transform.transform(imputed)
}

/// Aligns and concatenates the source tables column-wise.
pub fn combine(sources: SourceTables, alignment: &RowAlignment) -> Result<Table, PreprocessError> {
    let aligned = match alignment {
        RowAlignment::Positional => {
            let expected = sources.ehr.height();
            for (source_name, table) in sources.labelled() {
                if table.height() != expected {
                    return Err(PreprocessError::ShapeMismatch {
                        source_name,
                        expected,
                        found: table.height(),
                    });
                }
            }
            sources.into_labelled().map(|(_, table)| table)
        }
        RowAlignment::JoinKey(key) => align_on_key(sources, key)?,
    };

    let columns: Vec<Column> = aligned
        .into_iter()
        .flat_map(Table::into_columns)
        .collect();
    if let Some(name) = columns.iter().map(|c| c.name.as_str()).duplicates().next() {
        return Err(PreprocessError::DuplicateColumn(name.to_string()));
    }

    // Heights were checked above, so the only way this fails is a bug in alignment.
    Table::new(columns).map_err(|ragged| PreprocessError::ShapeMismatch {
        source_name: "combined",
        expected: ragged.expected,
        found: ragged.found,
    })
}

/// Reorders every table to the EHR key order and drops the key column.
fn align_on_key(sources: SourceTables, key: &str) -> Result<[Table; 4], PreprocessError> {
    let mut indexed = Vec::with_capacity(4);
    for (source_name, mut table) in sources.into_labelled() {
        let key_column = table
            .take_column(key)
            .ok_or_else(|| PreprocessError::MissingKey {
                source_name,
                key: key.to_string(),
            })?;
        let mut positions = HashMap::with_capacity(table.height());
        for row in 0..key_column.data.len() {
            let value = key_column
                .cell_text(row)
                .ok_or_else(|| PreprocessError::DuplicateKey {
                    source_name,
                    value: "<missing>".to_string(),
                })?;
            if positions.insert(value.clone(), row).is_some() {
                return Err(PreprocessError::DuplicateKey { source_name, value });
            }
        }
        indexed.push((source_name, table, key_column, positions));
    }

    let (_, ehr, ehr_keys, _) = &indexed[0];
    let order: Vec<String> = (0..ehr.height())
        .filter_map(|row| ehr_keys.cell_text(row))
        .collect();

    let mut aligned = Vec::with_capacity(4);
    for (name, table, _, positions) in &indexed {
        let source_name = *name;
        if positions.len() != order.len() {
            let value = positions
                .keys()
                .find(|k| !order.contains(k))
                .cloned()
                .unwrap_or_default();
            return Err(PreprocessError::UnmatchedKey { source_name, value });
        }
        let rows = order
            .iter()
            .map(|k| {
                positions
                    .get(k)
                    .copied()
                    .ok_or_else(|| PreprocessError::UnmatchedKey {
                        source_name,
                        value: k.clone(),
                    })
            })
            .collect::<Result<Vec<_>, _>>()?;
        aligned.push(table.select_rows(&rows));
    }

    log::info!("Aligned {} records on join key '{}'", order.len(), key);
    aligned
        .try_into()
        .map_err(|tables: Vec<Table>| PreprocessError::ShapeMismatch {
            source_name: "aligned",
            expected: 4,
            found: tables.len(),
        })
}

/// Fills every missing cell from its own column.
pub fn impute(table: Table, config: &PreprocessConfig) -> Result<Table, PreprocessError> {
    let mut filled = Vec::with_capacity(table.width());
    for column in table.into_columns() {
        let missing = column.data.missing_count();
        let data = match column.data {
            ColumnData::Numeric(values) => {
                let observed: Vec<f64> = values.iter().flatten().copied().collect();
                let fill = match config.numeric_imputation {
                    NumericImputation::Mean => mean(&observed),
                    NumericImputation::Median => median(&observed),
                }
                .ok_or_else(|| PreprocessError::EmptyColumn(column.name.clone()))?;
                if missing > 0 {
                    log::debug!("Filling {missing} cells of '{}' with {fill}", column.name);
                }
                ColumnData::Numeric(values.into_iter().map(|v| Some(v.unwrap_or(fill))).collect())
            }
            ColumnData::Categorical(values) => {
                let fill = match &config.categorical_imputation {
                    CategoricalImputation::Mode => mode(&values),
                    CategoricalImputation::Sentinel(text) => {
                        values.iter().any(Option::is_some).then(|| text.clone())
                    }
                }
                .ok_or_else(|| PreprocessError::EmptyColumn(column.name.clone()))?;
                if missing > 0 {
                    log::debug!("Filling {missing} cells of '{}' with '{fill}'", column.name);
                }
                ColumnData::Categorical(
                    values
                        .into_iter()
                        .map(|v| Some(v.unwrap_or_else(|| fill.clone())))
                        .collect(),
                )
            }
        };
        filled.push(Column {
            name: column.name,
            data,
        });
    }

    Table::new(filled).map_err(|ragged| PreprocessError::ShapeMismatch {
        source_name: "imputed",
        expected: ragged.expected,
        found: ragged.found,
    })
}

fn mean(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    Some(values.iter().sum::<f64>() / values.len() as f64)
}

fn median(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(f64::total_cmp);
    let mid = sorted.len() / 2;
    if sorted.len() % 2 == 0 {
        Some((sorted[mid - 1] + sorted[mid]) / 2.0)
    } else {
        Some(sorted[mid])
    }
}

fn mode(values: &[Option<String>]) -> Option<String> {
    let mut counts: BTreeMap<&str, usize> = BTreeMap::new();
    for value in values.iter().flatten() {
        *counts.entry(value.as_str()).or_default() += 1;
    }
    // BTreeMap iterates in key order, so the first maximum is the smallest key.
    let mut best: Option<(&str, usize)> = None;
    for (value, count) in counts {
        if best.is_none_or(|(_, top)| count > top) {
            best = Some((value, count));
        }
    }
    best.map(|(value, _)| value.to_string())
}
