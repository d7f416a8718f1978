//! Shared error taxonomy for tree and cell operations.
//!
//! # Responsibility
//! - Structural errors for tree edits (naming, ownership, moves).
//! - Type errors for cell and column edits.
//!
//! # See also
//! - `crate::command::CommandError` and `crate::project::ProjectError`,
//!   which wrap these for callers.

use crate::model::aspect::{AspectId, AspectType};
use crate::model::mode::{ColumnMode, DataType};
use std::error::Error;
use std::fmt::{Display, Formatter};

/// Tree edit rejected before anything was mutated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StructuralError {
    /// Name is blank after trim.
    EmptyName,
    /// Name contains the path separator or a control character.
    InvalidName(String),
    /// Parent kind cannot own the child kind.
    IllegalChild {
        parent: AspectType,
        child: AspectType,
    },
    /// Move target is the aspect itself or one of its descendants.
    MoveIntoDescendant { aspect: AspectId, target: AspectId },
    AspectNotFound(AspectId),
    PathNotFound(String),
    NotAContainer(AspectId),
    NotAColumn(AspectId),
    NotATable(AspectId),
    NotAMatrix(AspectId),
    /// The project root cannot be removed, moved or re-parented.
    RootImmutable,
    PositionOutOfRange { position: usize, len: usize },
    /// Row count or matrix size past the supported maximum.
    SizeLimit { requested: usize, limit: usize },
    /// An id in the added subtree is already part of the tree.
    DuplicateId(AspectId),
}

impl Display for StructuralError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::EmptyName => write!(f, "name must not be blank"),
            Self::InvalidName(name) => write!(f, "invalid aspect name: {name:?}"),
            Self::IllegalChild { parent, child } => write!(
                f,
                "{} cannot contain {}",
                parent.as_str(),
                child.as_str()
            ),
            Self::MoveIntoDescendant { aspect, target } => write!(
                f,
                "cannot move into self/child: aspect {aspect} under {target}"
            ),
            Self::AspectNotFound(id) => write!(f, "aspect not found: {id}"),
            Self::PathNotFound(path) => write!(f, "path not found: {path}"),
            Self::NotAContainer(id) => write!(f, "aspect cannot have children: {id}"),
            Self::NotAColumn(id) => write!(f, "aspect is not a column: {id}"),
            Self::NotATable(id) => write!(f, "aspect is not a table: {id}"),
            Self::NotAMatrix(id) => write!(f, "aspect is not a matrix: {id}"),
            Self::RootImmutable => write!(f, "project root cannot be moved or removed"),
            Self::PositionOutOfRange { position, len } => {
                write!(f, "child position {position} out of range (len {len})")
            }
            Self::SizeLimit { requested, limit } => {
                write!(f, "size {requested} exceeds the limit of {limit}")
            }
            Self::DuplicateId(id) => write!(f, "aspect id already in the tree: {id}"),
        }
    }
}

impl Error for StructuralError {}

/// Cell or column edit rejected for type reasons.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TypeError {
    /// Payload type does not match the column mode.
    InvalidRowType {
        row: usize,
        expected: ColumnMode,
        found: DataType,
    },
    /// Text could not be converted for the column mode.
    InvalidRowValue { row: usize, detail: String },
    /// Row index outside `0..` (scripting accepts signed rows).
    InvalidRowIndex(i64),
    /// Display pattern is not usable.
    InvalidFormat(String),
    /// Scripting referred to a column that does not exist.
    UnknownColumn(String),
}

impl Display for TypeError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InvalidRowType {
                row,
                expected,
                found,
            } => write!(
                f,
                "invalid row type at row {row}: column is {} but value is {}",
                expected.as_str(),
                found.as_str()
            ),
            Self::InvalidRowValue { row, detail } => {
                write!(f, "invalid row value at row {row}: {detail}")
            }
            Self::InvalidRowIndex(row) => write!(f, "invalid row index: {row}"),
            Self::InvalidFormat(format) => write!(f, "invalid display format: {format:?}"),
            Self::UnknownColumn(name) => write!(f, "unknown column: {name}"),
        }
    }
}

impl TypeError {
    /// `InvalidRowIndex` for an unsigned row, saturating at `i64::MAX`.
    pub(crate) fn row_index(row: usize) -> Self {
        Self::InvalidRowIndex(i64::try_from(row).unwrap_or(i64::MAX))
    }
}

impl Error for TypeError {}

/// Per-cell problem category.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CellErrorKind {
    InvalidRowType,
    InvalidRowValue,
    InvalidRowIndex,
}

impl CellErrorKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::InvalidRowType => "invalid row type",
            Self::InvalidRowValue => "invalid row value",
            Self::InvalidRowIndex => "invalid row index",
        }
    }
}

/// Problem with one cell that did not abort the surrounding edit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CellError {
    pub row: i64,
    pub kind: CellErrorKind,
    pub detail: String,
}

impl Display for CellError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} at row {}: {}", self.kind.as_str(), self.row, self.detail)
    }
}

impl Error for CellError {}
