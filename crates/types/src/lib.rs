//! Shared data model for the simulation auto-optimizer
//!
//! This crate defines the vocabulary every other crate speaks: typed
//! parameter spaces with encode/decode into dense real vectors, tabular
//! simulation output, the standard simulation result container, per-iteration
//! records, KPI reducer specifications, progress event wire types, and the
//! dispatch error taxonomy.

pub mod errors;
pub mod events;
pub mod kpi;
pub mod record;
pub mod result;
pub mod space;
pub mod table;
pub mod value;

pub use errors::DispatchError;
pub use events::{CompletionSummary, ProgressEvent};
pub use kpi::{CmpOp, ColumnOp, KpiSpec, RowFilter};
pub use record::{IterationRecord, IterationStatus};
pub use result::SimulationResult;
pub use space::{
    ParameterDef, ParameterSpace, ParameterSpec, ParameterVector, SpaceError, ValidationIssue,
};
pub use table::{CellValue, Table, TableError};
pub use value::ParameterValue;
