//! Tabular simulation output
//!
//! Simulations report their trajectory as a table: rows are time steps or
//! samples, columns are named state variables. Cells are loosely typed since
//! CSV and JSON outputs mix numbers, booleans, and labels.

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum TableError {
    #[error("Row has {actual} cells, table has {expected} columns")]
    WidthMismatch { expected: usize, actual: usize },
}

/// One table cell
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum CellValue {
    /// Missing or null cell
    Null,
    Bool(bool),
    Num(f64),
    Text(String),
}

impl CellValue {
    /// Numeric view; non-numeric cells read as NaN
    pub fn as_f64(&self) -> f64 {
        match self {
            Self::Num(v) => *v,
            Self::Null | Self::Bool(_) | Self::Text(_) => f64::NAN,
        }
    }
}

impl From<f64> for CellValue {
    fn from(v: f64) -> Self {
        Self::Num(v)
    }
}

impl From<bool> for CellValue {
    fn from(v: bool) -> Self {
        Self::Bool(v)
    }
}

impl From<&str> for CellValue {
    fn from(v: &str) -> Self {
        Self::Text(v.to_string())
    }
}

/// Row-major table with a required header
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Table {
    columns: Vec<String>,
    rows: Vec<Vec<CellValue>>,
}

impl Table {
    /// Create an empty table with the given header
    pub fn new(columns: Vec<String>) -> Self {
        Self {
            columns,
            rows: Vec::new(),
        }
    }

    /// Create a table from a header and pre-built rows
    pub fn from_rows(
        columns: Vec<String>,
        rows: Vec<Vec<CellValue>>,
    ) -> Result<Self, TableError> {
        let mut table = Self::new(columns);
        for row in rows {
            table.push_row(row)?;
        }
        Ok(table)
    }

    /// Append one row; its width must match the header
    pub fn push_row(&mut self, row: Vec<CellValue>) -> Result<(), TableError> {
        if row.len() != self.columns.len() {
            return Err(TableError::WidthMismatch {
                expected: self.columns.len(),
                actual: row.len(),
            });
        }
        self.rows.push(row);
        Ok(())
    }

    pub fn column_names(&self) -> &[String] {
        &self.columns
    }

    pub fn rows(&self) -> &[Vec<CellValue>] {
        &self.rows
    }

    /// Number of rows
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c == name)
    }

    /// All cells of a named column, top to bottom
    pub fn column(&self, name: &str) -> Option<Vec<&CellValue>> {
        let idx = self.column_index(name)?;
        Some(self.rows.iter().map(|r| &r[idx]).collect())
    }

    /// Numeric view of a column; non-numeric cells become NaN
    pub fn numeric_column(&self, name: &str) -> Option<Vec<f64>> {
        let idx = self.column_index(name)?;
        Some(self.rows.iter().map(|r| r[idx].as_f64()).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn demo_table() -> Table {
        Table::from_rows(
            vec!["t".into(), "infected".into(), "label".into()],
            vec![
                vec![0.0.into(), 10.0.into(), "a".into()],
                vec![1.0.into(), 50.0.into(), "b".into()],
                vec![2.0.into(), 30.0.into(), CellValue::Null],
            ],
        )
        .unwrap()
    }

    #[test]
    fn test_push_row_width_check() {
        let mut table = Table::new(vec!["a".into(), "b".into()]);
        assert!(table.push_row(vec![1.0.into(), 2.0.into()]).is_ok());
        let err = table.push_row(vec![1.0.into()]).unwrap_err();
        assert_eq!(
            err,
            TableError::WidthMismatch {
                expected: 2,
                actual: 1
            }
        );
    }

    #[test]
    fn test_numeric_column() {
        let table = demo_table();
        let infected = table.numeric_column("infected").unwrap();
        assert_eq!(infected, vec![10.0, 50.0, 30.0]);

        // Non-numeric cells become NaN
        let labels = table.numeric_column("label").unwrap();
        assert!(labels[0].is_nan());
        assert!(labels[2].is_nan());

        assert!(table.numeric_column("missing").is_none());
    }

    #[test]
    fn test_serde_round_trip() {
        let table = demo_table();
        let json = serde_json::to_string(&table).unwrap();
        let back: Table = serde_json::from_str(&json).unwrap();
        assert_eq!(back, table);
    }
}
