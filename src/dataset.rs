//! In-memory tabular data model.
//!
//! A [`Dataset`] is an ordered list of uniquely named [`Column`]s that all
//! hold the same number of [`Cell`]s. Cells are individually typed, so a
//! column may mix integers, floats and missing markers the way a pandas
//! `object` or `float64` column would after a JSON round-trip.

use crate::errors::{Result, SandboxError};
use std::collections::HashSet;

/// One typed value in a column.
#[derive(Debug, Clone, PartialEq)]
pub enum Cell {
    Missing,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
}

impl Cell {
    /// Build a float cell, folding NaN into [`Cell::Missing`].
    pub fn float(value: f64) -> Self {
        if value.is_nan() {
            Cell::Missing
        } else {
            Cell::Float(value)
        }
    }

    pub fn is_missing(&self) -> bool {
        match self {
            Cell::Missing => true,
            Cell::Float(v) => v.is_nan(),
            _ => false,
        }
    }

    /// Numeric view of the cell. Booleans count as 0/1, text is not numeric.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Cell::Int(v) => Some(*v as f64),
            Cell::Float(v) if !v.is_nan() => Some(*v),
            Cell::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
            _ => None,
        }
    }

    pub fn is_numeric(&self) -> bool {
        matches!(self, Cell::Int(_) | Cell::Float(_) | Cell::Bool(_))
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Cell::Missing => "NoneType",
            Cell::Bool(_) => "bool",
            Cell::Int(_) => "int",
            Cell::Float(_) => "float",
            Cell::Text(_) => "str",
        }
    }
}

/// A named column of cells.
#[derive(Debug, Clone, PartialEq)]
pub struct Column {
    name: String,
    cells: Vec<Cell>,
}

impl Column {
    pub fn new(name: impl Into<String>, cells: Vec<Cell>) -> Self {
        Self {
            name: name.into(),
            cells,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn cells(&self) -> &[Cell] {
        &self.cells
    }

    pub fn into_cells(self) -> Vec<Cell> {
        self.cells
    }

    pub fn len(&self) -> usize {
        self.cells.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }

    pub fn missing_count(&self) -> usize {
        self.cells.iter().filter(|c| c.is_missing()).count()
    }
}

/// An ordered collection of equally long, uniquely named columns.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Dataset {
    columns: Vec<Column>,
    rows: usize,
}

impl Dataset {
    /// Create a dataset, validating column lengths and name uniqueness.
    pub fn new(columns: Vec<Column>) -> Result<Self> {
        let rows = columns.first().map(Column::len).unwrap_or(0);
        let mut seen = HashSet::new();
        for column in &columns {
            if column.len() != rows {
                return Err(SandboxError::InvalidDataset(format!(
                    "column '{}' has {} rows, expected {}",
                    column.name(),
                    column.len(),
                    rows
                )));
            }
            if !seen.insert(column.name().to_string()) {
                return Err(SandboxError::InvalidDataset(format!(
                    "duplicate column name '{}'",
                    column.name()
                )));
            }
        }
        Ok(Self { columns, rows })
    }

    /// A dataset with no columns but a fixed number of rows.
    pub fn with_rows(rows: usize) -> Self {
        Self {
            columns: Vec::new(),
            rows,
        }
    }

    pub fn row_count(&self) -> usize {
        self.rows
    }

    pub fn column_count(&self) -> usize {
        self.columns.len()
    }

    pub fn cell_count(&self) -> usize {
        self.rows * self.columns.len()
    }

    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    pub fn column_names(&self) -> Vec<&str> {
        self.columns.iter().map(Column::name).collect()
    }

    pub fn column(&self, name: &str) -> Option<&Column> {
        self.columns.iter().find(|c| c.name() == name)
    }

    pub fn position(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c.name() == name)
    }

    pub fn missing_count(&self) -> usize {
        self.columns.iter().map(Column::missing_count).sum()
    }

    /// Replace an existing column in place or append a new one.
    pub fn set_column(&mut self, name: &str, cells: Vec<Cell>) -> Result<()> {
        if self.columns.is_empty() {
            self.rows = cells.len();
        } else if cells.len() != self.rows {
            return Err(SandboxError::value_error(format!(
                "Length of values ({}) does not match length of index ({})",
                cells.len(),
                self.rows
            )));
        }
        match self.position(name) {
            Some(idx) => self.columns[idx].cells = cells,
            None => self.columns.push(Column::new(name, cells)),
        }
        Ok(())
    }

    pub fn remove_column(&mut self, name: &str) -> Option<Column> {
        let idx = self.position(name)?;
        Some(self.columns.remove(idx))
    }

    pub fn rename_column(&mut self, from: &str, to: &str) -> Result<()> {
        if from == to {
            return Ok(());
        }
        if self.position(to).is_some() {
            return Err(SandboxError::value_error(format!(
                "cannot rename '{}' to existing column '{}'",
                from, to
            )));
        }
        if let Some(idx) = self.position(from) {
            self.columns[idx].name = to.to_string();
        }
        Ok(())
    }

    /// Keep the rows at the given positions, in order.
    pub fn take_rows(&self, indices: &[usize]) -> Dataset {
        let columns = self
            .columns
            .iter()
            .map(|c| {
                Column::new(
                    c.name(),
                    indices.iter().map(|&i| c.cells[i].clone()).collect(),
                )
            })
            .collect();
        Dataset {
            columns,
            rows: indices.len(),
        }
    }

    /// Keep the rows whose mask entry is true.
    pub fn filter_rows(&self, mask: &[bool]) -> Dataset {
        let indices: Vec<usize> = mask
            .iter()
            .enumerate()
            .filter_map(|(i, keep)| keep.then_some(i))
            .collect();
        self.take_rows(&indices)
    }

    /// Project onto the named columns, in the requested order.
    pub fn select(&self, names: &[String]) -> Result<Dataset> {
        let mut columns = Vec::with_capacity(names.len());
        for name in names {
            let column = self.column(name).ok_or_else(|| {
                SandboxError::script(
                    crate::errors::ScriptErrorKind::KeyError,
                    format!("\"['{}'] not in index\"", name),
                )
            })?;
            columns.push(column.clone());
        }
        let mut out = Dataset::new(columns)?;
        out.rows = self.rows;
        Ok(out)
    }

    pub fn row(&self, index: usize) -> Vec<&Cell> {
        self.columns.iter().map(|c| &c.cells[index]).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Dataset {
        Dataset::new(vec![
            Column::new("age", vec![Cell::Int(30), Cell::Missing, Cell::Int(40)]),
            Column::new(
                "name",
                vec![
                    Cell::Text("a".into()),
                    Cell::Text("b".into()),
                    Cell::Text("c".into()),
                ],
            ),
        ])
        .unwrap()
    }

    #[test]
    fn test_rejects_ragged_columns() {
        let result = Dataset::new(vec![
            Column::new("a", vec![Cell::Int(1)]),
            Column::new("b", vec![]),
        ]);
        assert!(matches!(result, Err(SandboxError::InvalidDataset(_))));
    }

    #[test]
    fn test_rejects_duplicate_names() {
        let result = Dataset::new(vec![
            Column::new("a", vec![Cell::Int(1)]),
            Column::new("a", vec![Cell::Int(2)]),
        ]);
        assert!(result.is_err());
    }

    #[test]
    fn test_set_column_length_mismatch() {
        let mut ds = sample();
        let err = ds.set_column("x", vec![Cell::Int(1)]).unwrap_err();
        assert_eq!(
            err.to_string(),
            "ValueError: Length of values (1) does not match length of index (3)"
        );
    }

    #[test]
    fn test_nan_float_is_missing() {
        assert_eq!(Cell::float(f64::NAN), Cell::Missing);
        assert!(Cell::Float(f64::NAN).is_missing());
        assert_eq!(sample().missing_count(), 1);
    }

    #[test]
    fn test_filter_and_select() {
        let ds = sample();
        let filtered = ds.filter_rows(&[true, false, true]);
        assert_eq!(filtered.row_count(), 2);
        assert_eq!(filtered.missing_count(), 0);

        let projected = ds.select(&["name".to_string()]).unwrap();
        assert_eq!(projected.column_names(), vec!["name"]);
        assert!(ds.select(&["nope".to_string()]).is_err());
    }
}
