//! # In-Memory Tables
//!
//! The typed, column-oriented representation every stage of the pipeline
//! passes along. A `Table` is an ordered list of named columns of equal length.
//! Each column is a tagged variant over its kind, so imputation and encoding can
//! dispatch on what the cells actually hold instead of assuming everything is a
//! number.

/// The cells of a single column.
#[derive(Debug, Clone, PartialEq)]
pub enum ColumnData {
    /// Every present cell parsed as a number. `None` marks a missing cell.
    Numeric(Vec<Option<f64>>),
    /// Textual cells, e.g. a category label. `None` marks a missing cell.
    Categorical(Vec<Option<String>>),
}

impl ColumnData {
    pub(crate) fn len(&self) -> usize {
        match self {
            Self::Numeric(values) => values.len(),
            Self::Categorical(values) => values.len(),
        }
    }

    pub fn missing_count(&self) -> usize {
        match self {
            Self::Numeric(values) => values.iter().filter(|v| v.is_none()).count(),
            Self::Categorical(values) => values.iter().filter(|v| v.is_none()).count(),
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::Numeric(_) => "numeric",
            Self::Categorical(_) => "categorical",
        }
    }

    /// Returns a copy holding only the rows at `indices`, in that order.
    pub fn select_rows(&self, indices: &[usize]) -> ColumnData {
        match self {
            Self::Numeric(values) => Self::Numeric(indices.iter().map(|&i| values[i]).collect()),
            Self::Categorical(values) => {
                Self::Categorical(indices.iter().map(|&i| values[i].clone()).collect())
            }
        }
    }
}

/// A named column.
#[derive(Debug, Clone, PartialEq)]
pub struct Column {
    pub name: String,
    pub data: ColumnData,
}

impl Column {
    pub fn numeric(name: impl Into<String>, values: Vec<Option<f64>>) -> Self {
        Self {
            name: name.into(),
            data: ColumnData::Numeric(values),
        }
    }

    pub fn categorical(name: impl Into<String>, values: Vec<Option<String>>) -> Self {
        Self {
            name: name.into(),
            data: ColumnData::Categorical(values),
        }
    }

    /// Renders a cell as text, used for join keys. Missing cells yield `None`.
    pub fn cell_text(&self, row: usize) -> Option<String> {
        match &self.data {
            ColumnData::Numeric(values) => values[row].map(|v| v.to_string()),
            ColumnData::Categorical(values) => values[row].clone(),
        }
    }
}

/// An ordered collection of equal-length named columns.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Table {
    columns: Vec<Column>,
    height: usize,
}

/// The table could not be assembled because a column had the wrong length.
#[derive(Debug, Clone, PartialEq)]
pub struct RaggedColumn {
    pub column: String,
    pub expected: usize,
    pub found: usize,
}

impl Table {
    /// Builds a table, checking that every column has the same number of rows.
    pub fn new(columns: Vec<Column>) -> Result<Self, RaggedColumn> {
        let height = columns.first().map_or(0, |c| c.data.len());
        if let Some(bad) = columns.iter().find(|c| c.data.len() != height) {
            return Err(RaggedColumn {
                column: bad.name.clone(),
                expected: height,
                found: bad.data.len(),
            });
        }
        Ok(Self { columns, height })
    }

    pub fn height(&self) -> usize {
        self.height
    }

    pub fn width(&self) -> usize {
        self.columns.len()
    }

    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    pub fn into_columns(self) -> Vec<Column> {
        self.columns
    }

    pub fn column_names(&self) -> Vec<&str> {
        self.columns.iter().map(|c| c.name.as_str()).collect()
    }

    pub fn column(&self, name: &str) -> Option<&Column> {
        self.columns.iter().find(|c| c.name == name)
    }

    /// Removes and returns the named column.
    pub fn take_column(&mut self, name: &str) -> Option<Column> {
        let index = self.columns.iter().position(|c| c.name == name)?;
        Some(self.columns.remove(index))
    }

    /// Returns a copy of the table holding only the rows at `indices`.
    pub fn select_rows(&self, indices: &[usize]) -> Table {
        Table {
            columns: self
                .columns
                .iter()
                .map(|c| Column {
                    name: c.name.clone(),
                    data: c.data.select_rows(indices),
                })
                .collect(),
            height: indices.len(),
        }
    }
}
