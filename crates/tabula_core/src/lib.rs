//! Core document model for Tabula.
//! This crate is the single source of truth for aspect tree invariants,
//! undo history, typed cell storage and the project file format.

pub mod command;
pub mod config;
pub mod error;
pub mod formula;
pub mod logging;
pub mod model;
pub mod persistence;
pub mod project;

pub use command::column_cmds::ColumnOp;
pub use command::matrix_cmds::MatrixOp;
pub use command::table_cmds::RowOp;
pub use command::{Command, CommandError, StackLimits};
pub use config::{ConfigError, Settings};
pub use error::{CellError, CellErrorKind, StructuralError, TypeError};
pub use formula::FormulaError;
pub use logging::{default_log_level, init_from_settings, init_logging, logging_status, LoggingError};
pub use model::aspect::{Aspect, AspectId, AspectKind, AspectType};
pub use model::cell::{CellValue, Validity};
pub use model::column::Column;
pub use model::interval::RowRange;
pub use model::matrix::{Coordinates, Matrix};
pub use model::mode::{ColumnMode, DataType, Notation, NumericFormat, PlotDesignation};
pub use model::naming::NameDiversion;
pub use persistence::autosave::{AutosaveOutcome, Autosaver, SaveLock};
pub use persistence::{FormatError, LoadIssue, LoadReport, PersistError, SaveOptions};
pub use project::events::{ChangeEvent, ChangeKind, Observer, ObserverId};
pub use project::script::{ColumnRef, ScriptSession};
pub use project::{Mutation, Project, ProjectError, ProjectResult, RecalcReport};

/// Returns the core crate version.
pub fn core_version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}

#[cfg(test)]
mod tests {
    use super::core_version;

    #[test]
    fn version_is_not_empty() {
        assert!(!core_version().is_empty());
    }
}
