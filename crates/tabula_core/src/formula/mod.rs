//! Column and matrix formulas.
//!
//! # Responsibility
//! - Parse formula text and resolve column references.
//! - Keep dependencies in an explicit graph and detect cycles before any
//!   evaluation, so a cycle is reported instead of recursed into.
//! - Compute result values; writing them back is left to commands.
//!
//! # See also
//! - `crate::project::Project::recalculate`

pub mod expr;
pub mod graph;

use crate::formula::expr::{Env, Formula};
use crate::formula::graph::DependencyGraph;
use crate::model::aspect::{Aspect, AspectId};
use crate::model::column::Column;
use crate::model::matrix::Matrix;
use std::collections::{HashMap, HashSet};
use std::error::Error;
use std::fmt::{Display, Formatter};

/// Variables available to matrix formulas: 1-based row/column and the
/// coordinates of the cell.
pub const MATRIX_VARIABLES: &[&str] = &["i", "j", "x", "y"];

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FormulaError {
    Syntax {
        column: String,
        message: String,
        position: usize,
    },
    UnknownColumn {
        column: String,
        reference: String,
    },
    /// Columns that read each other, directly or through others.
    Cycle { columns: Vec<String> },
    /// Column reads a column that sits on a cycle.
    UpstreamCycle { column: String },
}

impl Display for FormulaError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Syntax {
                column,
                message,
                position,
            } => write!(f, "formula syntax error in {column}: {message} at offset {position}"),
            Self::UnknownColumn { column, reference } => {
                write!(f, "formula in {column} references unknown column {reference:?}")
            }
            Self::Cycle { columns } => {
                write!(f, "cyclic formula dependency: {}", columns.join(" -> "))
            }
            Self::UpstreamCycle { column } => {
                write!(f, "formula in {column} depends on a cyclic formula")
            }
        }
    }
}

impl Error for FormulaError {}

/// Computed values of one formula column.
#[derive(Debug, Clone, PartialEq)]
pub struct ColumnResult {
    pub column: AspectId,
    pub values: Vec<Option<f64>>,
}

struct RowEnv<'a> {
    row: usize,
    references: &'a HashMap<&'a str, AspectId>,
    computed: &'a HashMap<AspectId, Vec<Option<f64>>>,
    columns: &'a HashMap<AspectId, &'a Column>,
}

impl Env for RowEnv<'_> {
    fn variable(&self, name: &str) -> Option<f64> {
        (name == "i").then_some((self.row + 1) as f64)
    }

    fn column(&self, reference: &str) -> Option<f64> {
        let id = self.references.get(reference)?;
        if let Some(values) = self.computed.get(id) {
            return values.get(self.row).copied().flatten();
        }
        self.columns.get(id)?.numeric_value(self.row)
    }
}

/// Evaluates the formula columns in `targets`, in dependency order.
///
/// Columns that are not evaluable (cycles, syntax errors) are skipped; their
/// errors are available from the graph.
pub fn evaluate_columns(
    graph: &DependencyGraph,
    root: &Aspect,
    targets: &HashSet<AspectId>,
) -> Vec<ColumnResult> {
    let columns: HashMap<AspectId, &Column> = root
        .walk()
        .into_iter()
        .filter_map(|aspect| aspect.as_column().map(|column| (aspect.id(), column)))
        .collect();
    let mut computed: HashMap<AspectId, Vec<Option<f64>>> = HashMap::new();
    let mut results = Vec::new();

    for id in graph.order().iter().filter(|id| targets.contains(id)) {
        let Some(node) = graph.node(*id) else {
            continue;
        };
        let rows = root
            .find(node.table)
            .and_then(Aspect::table_row_count)
            .unwrap_or(0);
        let references: HashMap<&str, AspectId> = node
            .references
            .iter()
            .map(|(text, id)| (text.as_str(), *id))
            .collect();
        let values: Vec<Option<f64>> = (0..rows)
            .map(|row| {
                let env = RowEnv {
                    row,
                    references: &references,
                    computed: &computed,
                    columns: &columns,
                };
                node.formula.eval(&env)
            })
            .collect();
        computed.insert(*id, values.clone());
        results.push(ColumnResult {
            column: *id,
            values,
        });
    }
    results
}

struct CellEnv {
    variables: [f64; 4],
}

impl Env for CellEnv {
    fn variable(&self, name: &str) -> Option<f64> {
        MATRIX_VARIABLES
            .iter()
            .position(|candidate| *candidate == name)
            .map(|index| self.variables[index])
    }

    fn column(&self, _reference: &str) -> Option<f64> {
        None
    }
}

/// Computes every cell of `matrix` from its formula, row-major. Cells whose
/// result is undefined become NaN.
pub fn evaluate_matrix(matrix: &Matrix, path: &str) -> Result<Vec<f64>, FormulaError> {
    let formula =
        Formula::parse(matrix.formula(), MATRIX_VARIABLES).map_err(|err| FormulaError::Syntax {
            column: path.to_string(),
            message: err.message,
            position: err.position,
        })?;
    if let Some(reference) = formula.references().first() {
        return Err(FormulaError::UnknownColumn {
            column: path.to_string(),
            reference: reference.to_string(),
        });
    }
    let mut cells = Vec::with_capacity(matrix.rows() * matrix.columns());
    for row in 0..matrix.rows() {
        for column in 0..matrix.columns() {
            let env = CellEnv {
                variables: [
                    (row + 1) as f64,
                    (column + 1) as f64,
                    matrix.x_at(column),
                    matrix.y_at(row),
                ],
            };
            cells.push(formula.eval(&env).unwrap_or(f64::NAN));
        }
    }
    Ok(cells)
}
