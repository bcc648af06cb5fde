//! # Data Loading Module
//!
//! This module is the exclusive entry point for the four user-provided source
//! tables (EHR, PROMs, wearable, SDOH). It reads delimited text files with a
//! header row and turns them into typed `Table`s.
//!
//! - No Schema: columns and types are whatever the files contain. A column is
//!   numeric when every present cell is a number, categorical otherwise.
//! - User-Centric Errors: a file that cannot be opened is an `Io` error, a file
//!   that does not parse as a table is a `Format` error. Both name the path.
//! - Scoped Acquisition: each file handle is opened, read fully, and dropped
//!   inside `load_table`, on the success and the failure path alike.

use crate::config::InputConfig;
use crate::table::Table;
use polars::prelude::*;
use std::fs::File;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// A comprehensive error type for all data loading failures.
#[derive(Error, Debug)]
pub enum DataError {
    #[error("Could not open or read '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("The file '{path}' is not a well-formed delimited table: {reason}")]
    Format { path: PathBuf, reason: String },
}

/// The four source tables, in their canonical order.
#[derive(Debug, Clone)]
pub struct SourceTables {
    pub ehr: Table,
    pub proms: Table,
    pub wearable: Table,
    pub sdoh: Table,
}

impl SourceTables {
    /// Labelled tables in concatenation order.
    pub fn labelled(&self) -> [(&'static str, &Table); 4] {
        [
            ("EHR", &self.ehr),
            ("PROMs", &self.proms),
            ("wearable", &self.wearable),
            ("SDOH", &self.sdoh),
        ]
    }

    pub fn into_labelled(self) -> [(&'static str, Table); 4] {
        [
            ("EHR", self.ehr),
            ("PROMs", self.proms),
            ("wearable", self.wearable),
            ("SDOH", self.sdoh),
        ]
    }
}

/// Loads all four source tables described by `inputs`.
pub fn load_sources(inputs: &InputConfig) -> Result<SourceTables, DataError> {
    let separator = inputs.separator_byte().map_err(|e| DataError::Format {
        path: inputs.ehr.clone(),
        reason: e.to_string(),
    })?;
    Ok(SourceTables {
        ehr: load_table(&inputs.ehr, separator)?,
        proms: load_table(&inputs.proms, separator)?,
        wearable: load_table(&inputs.wearable, separator)?,
        sdoh: load_table(&inputs.sdoh, separator)?,
    })
}

/// Reads a single delimited file with a header row.
pub fn load_table(path: &Path, separator: u8) -> Result<Table, DataError> {
    log::info!("Loading table from '{}'", path.display());

    let file = File::open(path).map_err(|source| DataError::Io {
        path: path.to_path_buf(),
        source,
    })?;

    let format_error = |reason: String| DataError::Format {
        path: path.to_path_buf(),
        reason,
    };

    let df = CsvReader::new(file)
        .with_options(
            CsvReadOptions::default()
                .with_has_header(true)
                // No schema: a column's type must hold for every row, not a prefix.
                .with_infer_schema_length(None)
                .with_parse_options(CsvParseOptions::default().with_separator(separator)),
        )
        .finish()
        .map_err(|e| format_error(e.to_string()))?;

    let columns = df
        .get_columns()
        .iter()
        .map(|column| internal::convert_column(column.as_materialized_series()))
        .collect::<Result<Vec<_>, String>>()
        .map_err(format_error)?;

    let table = Table::new(columns).map_err(|ragged| {
        format_error(format!(
            "column '{}' has {} rows, expected {}",
            ragged.column, ragged.found, ragged.expected
        ))
    })?;

    log::info!(
        "Loaded '{}': {} rows, {} columns",
        path.display(),
        table.height(),
        table.width()
    );
    Ok(table)
}

mod internal {
    use crate::table::Column;
    use polars::prelude::{DataType, Series};

    /// Converts a parsed polars column into the typed representation.
    /// Text columns stay categorical; everything else must cast to `f64`.
    pub(super) fn convert_column(series: &Series) -> Result<Column, String> {
        let name = series.name().to_string();

        if matches!(series.dtype(), DataType::String) {
            let values = series
                .str()
                .map_err(|e| e.to_string())?
                .into_iter()
                .map(|cell| cell.map(str::to_string))
                .collect();
            return Ok(Column::categorical(name, values));
        }

        let casted = series.cast(&DataType::Float64).map_err(|_| {
            format!(
                "column '{name}' has type {:?}, which cannot be read as numbers",
                series.dtype()
            )
        })?;
        if casted.null_count() != series.null_count() {
            return Err(format!(
                "column '{name}' has type {:?}, which cannot be read as numbers",
                series.dtype()
            ));
        }

        // NaN cells are treated as missing, matching the usual CSV convention.
        let values = casted
            .f64()
            .map_err(|e| e.to_string())?
            .into_iter()
            .map(|cell| cell.filter(|v| !v.is_nan()))
            .collect();
        Ok(Column::numeric(name, values))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::table::ColumnData;
    use approx::assert_abs_diff_eq;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn create_test_csv(content: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "{}", content).unwrap();
        file.flush().unwrap();
        file
    }

    #[test]
    fn loads_numeric_and_categorical_columns() {
        let file = create_test_csv("age,smoker,bmi\n40,no,22.5\n55,yes,\n61,,30.1");
        let table = load_table(file.path(), b',').unwrap();

        assert_eq!(table.height(), 3);
        assert_eq!(table.column_names(), vec!["age", "smoker", "bmi"]);

        match &table.column("age").unwrap().data {
            ColumnData::Numeric(values) => {
                assert_abs_diff_eq!(values[0].unwrap(), 40.0);
                assert_abs_diff_eq!(values[2].unwrap(), 61.0);
            }
            other => panic!("expected numeric age column, got {:?}", other),
        }
        assert_eq!(
            table.column("smoker").unwrap().data,
            ColumnData::Categorical(vec![Some("no".to_string()), Some("yes".to_string()), None])
        );
        assert_eq!(table.column("bmi").unwrap().data.missing_count(), 1);
    }

    #[test]
    fn late_float_keeps_an_integer_column_numeric() {
        let mut content = String::from("steps");
        for i in 0..150 {
            content.push_str(&format!("\n{i}"));
        }
        content.push_str("\n12.5");
        let file = create_test_csv(&content);
        let table = load_table(file.path(), b',').unwrap();

        assert_eq!(table.height(), 151);
        match &table.column("steps").unwrap().data {
            ColumnData::Numeric(values) => {
                assert_abs_diff_eq!(values[149].unwrap(), 149.0);
                assert_abs_diff_eq!(values[150].unwrap(), 12.5);
            }
            other => panic!("expected numeric steps column, got {:?}", other),
        }
    }

    #[test]
    fn late_text_makes_a_column_categorical() {
        let mut content = String::from("code,age");
        for i in 0..150 {
            content.push_str(&format!("\n{i},{}", 20 + i % 50));
        }
        content.push_str("\nA12,33");
        let file = create_test_csv(&content);
        let table = load_table(file.path(), b',').unwrap();

        match &table.column("code").unwrap().data {
            ColumnData::Categorical(values) => {
                assert_eq!(values.len(), 151);
                assert_eq!(values[150].as_deref(), Some("A12"));
            }
            other => panic!("expected categorical code column, got {:?}", other),
        }
        assert_eq!(table.column("age").unwrap().data.kind(), "numeric");
    }

    #[test]
    fn honours_the_separator() {
        let file = create_test_csv("steps\theart_rate\n1000\t60\n2000\t72");
        let table = load_table(file.path(), b'\t').unwrap();
        assert_eq!(table.column_names(), vec!["steps", "heart_rate"]);
        assert_eq!(table.height(), 2);
    }

    #[test]
    fn missing_file_is_an_io_error() {
        let err = load_table(Path::new("/definitely/not/here.csv"), b',').unwrap_err();
        match err {
            DataError::Io { path, .. } => assert_eq!(path, Path::new("/definitely/not/here.csv")),
            other => panic!("expected Io error, got {:?}", other),
        }
    }

    #[test]
    fn empty_file_is_a_format_error() {
        let file = NamedTempFile::new().unwrap();
        let err = load_table(file.path(), b',').unwrap_err();
        assert!(matches!(err, DataError::Format { .. }), "got {:?}", err);
    }

    #[test]
    fn load_sources_reports_the_failing_path() {
        let ehr = create_test_csv("outcome\n0\n1");
        let inputs = InputConfig {
            ehr: ehr.path().to_path_buf(),
            proms: PathBuf::from("/missing/proms.csv"),
            ..InputConfig::default()
        };
        let err = load_sources(&inputs).unwrap_err();
        assert!(err.to_string().contains("/missing/proms.csv"));
    }
}
