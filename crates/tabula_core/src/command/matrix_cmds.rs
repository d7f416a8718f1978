//! Matrix commands.

use crate::command::{Command, CommandContext, CommandError, CommandResult};
use crate::error::{StructuralError, TypeError};
use crate::model::aspect::AspectId;
use crate::model::matrix::{Coordinates, Matrix};
use crate::model::{matrix_cell_count, MAX_MATRIX_CELLS};
use crate::model::mode::NumericFormat;
use crate::project::events::ChangeKind;
use std::any::Any;

#[derive(Debug, Clone, PartialEq)]
pub enum MatrixOp {
    SetCell { row: usize, column: usize, value: f64 },
    Resize { rows: usize, columns: usize },
    SetCoordinates(Coordinates),
    SetNumericFormat(NumericFormat),
    SetFormula(String),
    /// Replaces every cell, row-major; used for formula results.
    Assign(Vec<f64>),
}

#[derive(Debug)]
enum Saved {
    Cell(f64),
    Whole(Box<Matrix>),
}

#[derive(Debug)]
pub struct MatrixEdit {
    matrix: AspectId,
    op: MatrixOp,
    saved: Option<Saved>,
    label: String,
}

impl MatrixEdit {
    pub fn new(matrix: AspectId, op: MatrixOp) -> Self {
        Self {
            matrix,
            op,
            saved: None,
            label: "edit matrix".to_string(),
        }
    }

    fn verb(&self) -> String {
        match &self.op {
            MatrixOp::SetCell { row, column, .. } => format!("set cell {row},{column}"),
            MatrixOp::Resize { rows, columns } => format!("resize to {rows}x{columns}"),
            MatrixOp::SetCoordinates(_) => "set coordinates".to_string(),
            MatrixOp::SetNumericFormat(_) => "change format".to_string(),
            MatrixOp::SetFormula(_) => "set formula".to_string(),
            MatrixOp::Assign(_) => "apply formula".to_string(),
        }
    }

    fn change_kind(&self) -> ChangeKind {
        match &self.op {
            MatrixOp::SetNumericFormat(_) => ChangeKind::FormatChanged,
            MatrixOp::SetFormula(_) => ChangeKind::FormulaChanged,
            _ => ChangeKind::MatrixChanged,
        }
    }
}

impl Command for MatrixEdit {
    fn description(&self) -> String {
        self.label.clone()
    }

    fn apply(&mut self, ctx: &mut CommandContext<'_>) -> CommandResult<()> {
        let aspect = ctx.aspect(self.matrix)?;
        let name = aspect.name().to_string();
        let matrix = aspect
            .as_matrix()
            .ok_or(StructuralError::NotAMatrix(self.matrix))?;
        let saved = match &self.op {
            MatrixOp::SetCell { row, column, .. } => {
                let previous = matrix
                    .cell(*row, *column)
                    .ok_or_else(|| TypeError::row_index(*row))?;
                Saved::Cell(previous)
            }
            MatrixOp::Resize { rows, columns } if matrix_cell_count(*rows, *columns).is_none() => {
                return Err(StructuralError::SizeLimit {
                    requested: rows.saturating_mul(*columns),
                    limit: MAX_MATRIX_CELLS,
                }
                .into());
            }
            MatrixOp::Assign(cells) if cells.len() != matrix.cells().len() => {
                return Err(TypeError::InvalidRowValue {
                    row: 0,
                    detail: format!(
                        "expected {} values, got {}",
                        matrix.cells().len(),
                        cells.len()
                    ),
                }
                .into());
            }
            _ => Saved::Whole(Box::new(matrix.clone())),
        };

        let matrix = ctx.matrix_mut(self.matrix)?;
        match &self.op {
            MatrixOp::SetCell { row, column, value } => {
                matrix.set_cell(*row, *column, *value);
            }
            MatrixOp::Resize { rows, columns } => {
                matrix.resize(*rows, *columns);
            }
            MatrixOp::SetCoordinates(coordinates) => matrix.set_coordinates(*coordinates),
            MatrixOp::SetNumericFormat(format) => matrix.set_numeric_format(*format),
            MatrixOp::SetFormula(formula) => matrix.set_formula(formula.trim().to_string()),
            MatrixOp::Assign(cells) => {
                matrix.replace_cells(cells.clone());
            }
        }
        self.saved = Some(saved);
        self.label = format!("{name}: {}", self.verb());
        ctx.emit(self.change_kind(), self.matrix);
        Ok(())
    }

    fn invert(&mut self, ctx: &mut CommandContext<'_>) -> CommandResult<()> {
        let matrix = ctx.matrix_mut(self.matrix)?;
        match (&self.op, self.saved.take()) {
            (MatrixOp::SetCell { row, column, .. }, Some(Saved::Cell(previous))) => {
                matrix.set_cell(*row, *column, previous);
            }
            (_, Some(Saved::Whole(previous))) => *matrix = *previous,
            (_, other) => {
                self.saved = other;
                return Err(CommandError::TargetMissing(self.matrix));
            }
        }
        ctx.emit(self.change_kind(), self.matrix);
        Ok(())
    }

    fn footprint(&self) -> usize {
        match &self.saved {
            Some(Saved::Whole(matrix)) => matrix.footprint(),
            _ => std::mem::size_of::<f64>(),
        }
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

#[cfg(test)]
mod tests {
    use super::{MatrixEdit, MatrixOp};
    use crate::command::{CommandContext, CommandError, CommandStack};
    use crate::error::StructuralError;
    use crate::model::aspect::Aspect;
    use crate::model::matrix::Matrix;

    #[test]
    fn resize_and_cell_edit_undo_exactly() {
        let matrix = Matrix::new(2, 2).expect("small grid");
        let mut root = Aspect::project("P").with_child(Aspect::matrix("M", matrix));
        let before = root.clone();
        let id = root.children()[0].id();
        let mut events = Vec::new();
        let mut stack = CommandStack::default();
        let mut ctx = CommandContext::new(&mut root, &mut events);

        stack
            .push(
                Box::new(MatrixEdit::new(
                    id,
                    MatrixOp::SetCell {
                        row: 1,
                        column: 0,
                        value: 9.5,
                    },
                )),
                &mut ctx,
            )
            .expect("set cell");
        stack
            .push(
                Box::new(MatrixEdit::new(
                    id,
                    MatrixOp::Resize {
                        rows: 1,
                        columns: 1,
                    },
                )),
                &mut ctx,
            )
            .expect("resize");
        stack.undo(&mut ctx).expect("undo resize");
        stack.undo(&mut ctx).expect("undo cell");
        assert_eq!(ctx.root(), &before);
    }

    #[test]
    fn out_of_range_cell_is_rejected() {
        let matrix = Matrix::new(1, 1).expect("small grid");
        let mut root = Aspect::project("P").with_child(Aspect::matrix("M", matrix));
        let id = root.children()[0].id();
        let mut events = Vec::new();
        let mut stack = CommandStack::default();
        let mut ctx = CommandContext::new(&mut root, &mut events);
        let op = MatrixOp::SetCell {
            row: 3,
            column: 0,
            value: 1.0,
        };
        assert!(stack
            .push(Box::new(MatrixEdit::new(id, op)), &mut ctx)
            .is_err());
    }

    #[test]
    fn oversized_resize_is_rejected_before_mutation() {
        let matrix = Matrix::new(1, 1).expect("small grid");
        let mut root = Aspect::project("P").with_child(Aspect::matrix("M", matrix));
        let before = root.clone();
        let id = root.children()[0].id();
        let mut events = Vec::new();
        let mut stack = CommandStack::default();
        let mut ctx = CommandContext::new(&mut root, &mut events);
        let op = MatrixOp::Resize {
            rows: usize::MAX,
            columns: 2,
        };

        let err = stack
            .push(Box::new(MatrixEdit::new(id, op)), &mut ctx)
            .expect_err("too large");
        assert!(matches!(
            err,
            CommandError::Structural(StructuralError::SizeLimit { .. })
        ));
        assert_eq!(ctx.root(), &before);
        assert!(!stack.can_undo());
    }
}
