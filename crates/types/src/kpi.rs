//! KPI reducer specifications
//!
//! A KPI is a scalar reduction over the trajectory table. Column reducers
//! pair a column with a named operation and an optional row filter; custom
//! reducers are arbitrary closures over the table. The specs live here so
//! both the dispatch layer (models publish their KPI definitions) and the
//! engine (the aggregator evaluates them) can share them.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

use crate::table::Table;

/// Built-in column reduction operations
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ColumnOp {
    Max,
    Min,
    Mean,
    Sum,
    /// Sample standard deviation (n - 1); NaN for fewer than two values
    Std,
    /// Value in the last row
    Final,
}

impl ColumnOp {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Max => "max",
            Self::Min => "min",
            Self::Mean => "mean",
            Self::Sum => "sum",
            Self::Std => "std",
            Self::Final => "final",
        }
    }
}

/// Comparison operator for row filters
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CmpOp {
    Gt,
    Ge,
    Lt,
    Le,
    Eq,
    Ne,
}

impl CmpOp {
    pub fn evaluate(&self, lhs: f64, rhs: f64) -> bool {
        match self {
            Self::Gt => lhs > rhs,
            Self::Ge => lhs >= rhs,
            Self::Lt => lhs < rhs,
            Self::Le => lhs <= rhs,
            Self::Eq => lhs == rhs,
            Self::Ne => lhs != rhs,
        }
    }
}

/// Keep only rows where `column <op> value` holds
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RowFilter {
    pub column: String,
    pub op: CmpOp,
    pub value: f64,
}

impl RowFilter {
    pub fn new(column: impl Into<String>, op: CmpOp, value: f64) -> Self {
        Self {
            column: column.into(),
            op,
            value,
        }
    }
}

/// Custom reducer signature
pub type KpiFn = Arc<dyn Fn(&Table) -> f64 + Send + Sync>;

/// How one KPI is computed from a trajectory table
#[derive(Clone)]
pub enum KpiSpec {
    /// Reduce one column with a built-in operation
    Column {
        column: String,
        op: ColumnOp,
        filter: Option<RowFilter>,
    },
    /// Arbitrary reduction over the whole table
    Custom(KpiFn),
}

impl KpiSpec {
    pub fn column(column: impl Into<String>, op: ColumnOp) -> Self {
        Self::Column {
            column: column.into(),
            op,
            filter: None,
        }
    }

    pub fn filtered(column: impl Into<String>, op: ColumnOp, filter: RowFilter) -> Self {
        Self::Column {
            column: column.into(),
            op,
            filter: Some(filter),
        }
    }

    pub fn custom(f: impl Fn(&Table) -> f64 + Send + Sync + 'static) -> Self {
        Self::Custom(Arc::new(f))
    }
}

impl fmt::Debug for KpiSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Column { column, op, filter } => f
                .debug_struct("Column")
                .field("column", column)
                .field("op", op)
                .field("filter", filter)
                .finish(),
            Self::Custom(_) => f.write_str("Custom(..)"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cmp_ops() {
        assert!(CmpOp::Gt.evaluate(2.0, 1.0));
        assert!(CmpOp::Ge.evaluate(1.0, 1.0));
        assert!(CmpOp::Lt.evaluate(0.5, 1.0));
        assert!(CmpOp::Le.evaluate(1.0, 1.0));
        assert!(CmpOp::Eq.evaluate(3.0, 3.0));
        assert!(CmpOp::Ne.evaluate(3.0, 4.0));
    }

    #[test]
    fn test_op_names() {
        assert_eq!(ColumnOp::Std.name(), "std");
        assert_eq!(ColumnOp::Final.name(), "final");
    }
}
