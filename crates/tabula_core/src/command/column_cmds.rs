//! Column commands: cell edits, mode changes, masks and formats.
//!
//! # Invariants
//! - Type checks run before mutation; per-cell conversion failures do not
//!   abort the edit and are reported through `Notices::cell_errors`.
//! - Consecutive edits of one cell may merge into a single undo step; the
//!   merged command keeps the oldest snapshot.

use crate::command::{Command, CommandContext, CommandError, CommandResult, Notices};
use crate::error::{CellError, CellErrorKind, StructuralError, TypeError};
use crate::model::aspect::AspectId;
use crate::model::cell::CellValue;
use crate::model::column::{CellSnapshot, Column};
use crate::model::interval::RowRange;
use crate::model::mode::{is_valid_datetime_format, ColumnMode, NumericFormat, PlotDesignation};
use crate::model::{row_span, MAX_ROWS};
use crate::project::events::ChangeKind;
use std::any::Any;

/// Rows `first..first + count` must stay below `MAX_ROWS`.
fn check_span(first: usize, count: usize) -> Result<(), TypeError> {
    match row_span(first, count) {
        Some(_) => Ok(()),
        None => Err(TypeError::row_index(first.saturating_add(count))),
    }
}

/// New content for one cell.
#[derive(Debug, Clone, PartialEq)]
pub enum CellInput {
    /// Raw text run through the column's input filter.
    Text(String),
    /// Typed payload; must match the column's storage type.
    Value(CellValue),
}

/// Sets one cell. Mergeable with later edits of the same cell.
#[derive(Debug)]
pub struct SetCell {
    column: AspectId,
    row: usize,
    input: CellInput,
    before: Option<CellSnapshot>,
    error: Option<CellError>,
    label: String,
}

impl SetCell {
    pub fn new(column: AspectId, row: usize, input: CellInput) -> Self {
        Self {
            column,
            row,
            input,
            before: None,
            error: None,
            label: format!("set cell {row}"),
        }
    }
}

impl Command for SetCell {
    fn description(&self) -> String {
        self.label.clone()
    }

    fn apply(&mut self, ctx: &mut CommandContext<'_>) -> CommandResult<()> {
        let name = ctx.aspect(self.column)?.name().to_string();
        let column = ctx.column(self.column)?;
        Column::check_row(self.row)?;
        if let CellInput::Value(value) = &self.input {
            column.check_value(self.row, value)?;
        }
        let snapshot = column.snapshot_cell(self.row);

        let column = ctx.column_mut(self.column)?;
        self.error = match &self.input {
            CellInput::Text(raw) => column.set_text(self.row, raw),
            CellInput::Value(value) => {
                column.set_value(self.row, value.clone())?;
                None
            }
        };
        self.before = Some(snapshot);
        self.label = format!("{name}: set cell {}", self.row);
        ctx.emit(ChangeKind::DataChanged, self.column);
        Ok(())
    }

    fn invert(&mut self, ctx: &mut CommandContext<'_>) -> CommandResult<()> {
        let snapshot = self
            .before
            .as_ref()
            .ok_or(CommandError::TargetMissing(self.column))?;
        ctx.column_mut(self.column)?.restore_cell(snapshot);
        ctx.emit(ChangeKind::DataChanged, self.column);
        Ok(())
    }

    fn merge_with(&mut self, next: &dyn Command) -> bool {
        let Some(next) = next.as_any().downcast_ref::<SetCell>() else {
            return false;
        };
        if next.column != self.column || next.row != self.row {
            return false;
        }
        self.input = next.input.clone();
        self.error = next.error.clone();
        true
    }

    fn footprint(&self) -> usize {
        std::mem::size_of::<CellSnapshot>()
            + match &self.input {
                CellInput::Text(raw) => raw.len(),
                CellInput::Value(CellValue::Text(text)) => text.len(),
                CellInput::Value(_) => 0,
            }
    }

    fn notices(&self) -> Notices {
        Notices {
            diversion: None,
            cell_errors: self.error.iter().cloned().collect(),
        }
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Whole-column edit.
#[derive(Debug, Clone, PartialEq)]
pub enum ColumnOp {
    /// Re-types every cell; failures become invalid cells.
    SetMode(ColumnMode),
    /// Raw texts written from `first` on.
    ReplaceTexts { first: usize, values: Vec<String> },
    /// Typed values written from `first` on; all must match the mode.
    ReplaceValues { first: usize, values: Vec<CellValue> },
    InsertRows { before: usize, count: usize },
    RemoveRows { first: usize, count: usize },
    Clear,
    SetMasked { range: RowRange, masked: bool },
    SetInvalid { range: RowRange, invalid: bool },
    ClearMasks,
    SetPlotDesignation(PlotDesignation),
    SetNumericFormat(NumericFormat),
    SetDateTimeFormat(String),
    SetFormula(String),
    /// Formula results; `None` marks the row invalid.
    AssignNumeric(Vec<Option<f64>>),
}

impl ColumnOp {
    fn verb(&self) -> String {
        match self {
            Self::SetMode(mode) => format!("change mode to {}", mode.as_str()),
            Self::ReplaceTexts { values, .. } => format!("replace {} cells", values.len()),
            Self::ReplaceValues { values, .. } => format!("replace {} cells", values.len()),
            Self::InsertRows { count, .. } => format!("insert {count} rows"),
            Self::RemoveRows { count, .. } => format!("remove {count} rows"),
            Self::Clear => "clear".to_string(),
            Self::SetMasked { masked: true, .. } => "mask cells".to_string(),
            Self::SetMasked { masked: false, .. } => "unmask cells".to_string(),
            Self::SetInvalid { invalid: true, .. } => "set cells invalid".to_string(),
            Self::SetInvalid { invalid: false, .. } => "set cells valid".to_string(),
            Self::ClearMasks => "clear masks".to_string(),
            Self::SetPlotDesignation(designation) => {
                format!("set plot designation {}", designation.as_str())
            }
            Self::SetNumericFormat(_) | Self::SetDateTimeFormat(_) => "change format".to_string(),
            Self::SetFormula(_) => "set formula".to_string(),
            Self::AssignNumeric(_) => "apply formula".to_string(),
        }
    }

    fn change_kind(&self) -> ChangeKind {
        match self {
            Self::SetMode(_) => ChangeKind::ModeChanged,
            Self::SetMasked { .. } | Self::ClearMasks => ChangeKind::MaskingChanged,
            Self::SetPlotDesignation(_) => ChangeKind::PlotDesignationChanged,
            Self::SetNumericFormat(_) | Self::SetDateTimeFormat(_) => ChangeKind::FormatChanged,
            Self::SetFormula(_) => ChangeKind::FormulaChanged,
            Self::InsertRows { .. } | Self::RemoveRows { .. } => ChangeKind::RowCountChanged,
            _ => ChangeKind::DataChanged,
        }
    }
}

/// State needed to undo a `ColumnEdit`.
#[derive(Debug)]
enum Saved {
    Whole(Box<Column>),
    PlotDesignation(PlotDesignation),
    NumericFormat(NumericFormat),
    DateTimeFormat(String),
    Formula(String),
}

/// Applies one `ColumnOp` to a column.
#[derive(Debug)]
pub struct ColumnEdit {
    column: AspectId,
    op: ColumnOp,
    saved: Option<Saved>,
    cell_errors: Vec<CellError>,
    label: String,
}

impl ColumnEdit {
    pub fn new(column: AspectId, op: ColumnOp) -> Self {
        Self {
            label: op.verb(),
            column,
            op,
            saved: None,
            cell_errors: Vec::new(),
        }
    }

    fn check(&self, column: &Column) -> CommandResult<()> {
        match &self.op {
            ColumnOp::ReplaceTexts { first, values } => {
                check_span(*first, values.len())?;
            }
            ColumnOp::ReplaceValues { first, values } => {
                check_span(*first, values.len())?;
                for (offset, value) in values.iter().enumerate() {
                    column.check_value(first + offset, value)?;
                }
            }
            ColumnOp::InsertRows { count, .. } => {
                if row_span(column.row_count(), *count).is_none() {
                    return Err(StructuralError::SizeLimit {
                        requested: column.row_count().saturating_add(*count),
                        limit: MAX_ROWS,
                    }
                    .into());
                }
            }
            ColumnOp::SetMasked { range, .. } | ColumnOp::SetInvalid { range, .. } => {
                Column::check_row(range.end())?;
            }
            ColumnOp::AssignNumeric(values) => check_span(0, values.len())?,
            ColumnOp::SetDateTimeFormat(format) if !is_valid_datetime_format(format) => {
                return Err(TypeError::InvalidFormat(format.clone()).into());
            }
            _ => {}
        }
        Ok(())
    }

    fn save(&self, column: &Column) -> Saved {
        match &self.op {
            ColumnOp::SetPlotDesignation(_) => Saved::PlotDesignation(column.plot_designation()),
            ColumnOp::SetNumericFormat(_) => Saved::NumericFormat(column.numeric_format()),
            ColumnOp::SetDateTimeFormat(_) => {
                Saved::DateTimeFormat(column.datetime_format().to_string())
            }
            ColumnOp::SetFormula(_) => Saved::Formula(column.formula().to_string()),
            _ => Saved::Whole(Box::new(column.clone())),
        }
    }

    /// Runs the op; returns per-cell problems.
    fn run(op: &ColumnOp, column: &mut Column) -> Vec<CellError> {
        let mut errors = Vec::new();
        match op {
            ColumnOp::SetMode(mode) => {
                let from = column.mode();
                errors = column
                    .convert_to(*mode)
                    .into_iter()
                    .map(|row| CellError {
                        row: row as i64,
                        kind: CellErrorKind::InvalidRowValue,
                        detail: format!(
                            "cannot convert from {} to {}",
                            from.as_str(),
                            mode.as_str()
                        ),
                    })
                    .collect();
            }
            ColumnOp::ReplaceTexts { first, values } => {
                for (offset, raw) in values.iter().enumerate() {
                    if let Some(error) = column.set_text(first + offset, raw) {
                        errors.push(error);
                    }
                }
            }
            ColumnOp::ReplaceValues { first, values } => {
                for (offset, value) in values.iter().enumerate() {
                    if let Err(err) = column.set_value(first + offset, value.clone()) {
                        errors.push(CellError {
                            row: (first + offset) as i64,
                            kind: CellErrorKind::InvalidRowType,
                            detail: err.to_string(),
                        });
                    }
                }
            }
            ColumnOp::InsertRows { before, count } => column.insert_rows(*before, *count),
            ColumnOp::RemoveRows { first, count } => column.remove_rows(*first, *count),
            ColumnOp::Clear => column.clear(),
            ColumnOp::SetMasked { range, masked } => column.set_masked(*range, *masked),
            ColumnOp::SetInvalid { range, invalid } => column.set_invalid(*range, *invalid),
            ColumnOp::ClearMasks => column.clear_masks(),
            ColumnOp::SetPlotDesignation(designation) => column.set_plot_designation(*designation),
            ColumnOp::SetNumericFormat(format) => column.set_numeric_format(*format),
            ColumnOp::SetDateTimeFormat(format) => column.set_datetime_format(format.clone()),
            ColumnOp::SetFormula(formula) => column.set_formula(formula.trim().to_string()),
            ColumnOp::AssignNumeric(values) => {
                errors = column
                    .assign_numeric(values)
                    .into_iter()
                    .map(|row| CellError {
                        row: row as i64,
                        kind: CellErrorKind::InvalidRowValue,
                        detail: "formula result does not fit the column mode".to_string(),
                    })
                    .collect();
            }
        }
        errors
    }
}

impl Command for ColumnEdit {
    fn description(&self) -> String {
        self.label.clone()
    }

    fn apply(&mut self, ctx: &mut CommandContext<'_>) -> CommandResult<()> {
        let name = ctx.aspect(self.column)?.name().to_string();
        let column = ctx.column(self.column)?;
        self.check(column)?;
        let saved = self.save(column);

        let column = ctx.column_mut(self.column)?;
        self.cell_errors = Self::run(&self.op, column);
        self.saved = Some(saved);
        self.label = format!("{name}: {}", self.op.verb());
        ctx.emit(self.op.change_kind(), self.column);
        Ok(())
    }

    fn invert(&mut self, ctx: &mut CommandContext<'_>) -> CommandResult<()> {
        let saved = self
            .saved
            .take()
            .ok_or(CommandError::TargetMissing(self.column))?;
        let column = match ctx.column_mut(self.column) {
            Ok(column) => column,
            Err(err) => {
                self.saved = Some(saved);
                return Err(err);
            }
        };
        match saved {
            Saved::Whole(previous) => *column = *previous,
            Saved::PlotDesignation(designation) => column.set_plot_designation(designation),
            Saved::NumericFormat(format) => column.set_numeric_format(format),
            Saved::DateTimeFormat(format) => column.set_datetime_format(format),
            Saved::Formula(formula) => column.set_formula(formula),
        }
        ctx.emit(self.op.change_kind(), self.column);
        Ok(())
    }

    fn footprint(&self) -> usize {
        match &self.saved {
            Some(Saved::Whole(column)) => column.footprint(),
            Some(Saved::DateTimeFormat(text)) | Some(Saved::Formula(text)) => text.len(),
            _ => 0,
        }
    }

    fn notices(&self) -> Notices {
        Notices {
            diversion: None,
            cell_errors: self.cell_errors.clone(),
        }
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

#[cfg(test)]
mod tests {
    use super::{CellInput, ColumnEdit, ColumnOp, SetCell};
    use crate::command::{CommandContext, CommandError, CommandStack, PushOutcome};
    use crate::error::TypeError;
    use crate::model::aspect::Aspect;
    use crate::model::cell::CellValue;
    use crate::model::column::Column;
    use crate::model::interval::RowRange;
    use crate::model::mode::ColumnMode;
    use crate::model::MAX_ROWS;

    fn table_with(column: Column) -> Aspect {
        Aspect::project("P").with_child(
            Aspect::table("T", 0, 0).with_child(Aspect::column("A", column)),
        )
    }

    fn column_id(root: &Aspect) -> uuid::Uuid {
        root.find_by_path("P/T/A").expect("column").id()
    }

    #[test]
    fn huge_rows_and_counts_are_rejected_before_mutation() {
        let mut root = table_with(Column::numeric(vec![1.0]));
        let before = root.clone();
        let id = column_id(&root);
        let mut events = Vec::new();
        let mut stack = CommandStack::default();
        let mut ctx = CommandContext::new(&mut root, &mut events);

        let err = stack
            .push(
                Box::new(SetCell::new(id, usize::MAX, CellInput::Text("1".into()))),
                &mut ctx,
            )
            .expect_err("row out of range");
        assert!(matches!(
            err,
            CommandError::Type(TypeError::InvalidRowIndex(_))
        ));

        let ops = [
            ColumnOp::ReplaceTexts {
                first: usize::MAX,
                values: vec!["1".into()],
            },
            ColumnOp::InsertRows {
                before: 0,
                count: usize::MAX,
            },
            ColumnOp::SetMasked {
                range: RowRange::single(MAX_ROWS),
                masked: true,
            },
        ];
        for op in ops {
            assert!(stack
                .push(Box::new(ColumnEdit::new(id, op)), &mut ctx)
                .is_err());
        }
        assert_eq!(ctx.root(), &before);
        assert!(!stack.can_undo());
    }

    #[test]
    fn repeated_edits_of_one_cell_merge_into_one_step() {
        let mut root = table_with(Column::numeric(vec![1.0]));
        let before = root.clone();
        let id = column_id(&root);
        let mut events = Vec::new();
        let mut stack = CommandStack::default();
        let mut ctx = CommandContext::new(&mut root, &mut events);

        let first = stack
            .push(
                Box::new(SetCell::new(id, 0, CellInput::Text("2".into()))),
                &mut ctx,
            )
            .expect("first edit");
        let second = stack
            .push(
                Box::new(SetCell::new(id, 0, CellInput::Text("3".into()))),
                &mut ctx,
            )
            .expect("second edit");
        assert_eq!(first, PushOutcome::Pushed);
        assert_eq!(second, PushOutcome::Merged);
        assert_eq!(stack.undo_len(), 1);

        stack.undo(&mut ctx).expect("undo");
        assert_eq!(ctx.root(), &before);
        stack.redo(&mut ctx).expect("redo");
        let value = ctx
            .root()
            .find(id)
            .and_then(|aspect| aspect.as_column())
            .and_then(|column| column.value(0));
        assert_eq!(value, Some(CellValue::Numeric(3.0)));
    }

    #[test]
    fn typed_set_with_wrong_type_fails_cleanly() {
        let mut root = table_with(Column::numeric(vec![1.0]));
        let id = column_id(&root);
        let mut events = Vec::new();
        let mut stack = CommandStack::default();
        let mut ctx = CommandContext::new(&mut root, &mut events);

        let err = stack
            .push(
                Box::new(SetCell::new(
                    id,
                    0,
                    CellInput::Value(CellValue::Text("x".into())),
                )),
                &mut ctx,
            )
            .expect_err("type mismatch");
        assert!(matches!(
            err,
            CommandError::Type(TypeError::InvalidRowType { .. })
        ));
        assert!(!stack.can_undo());
    }

    #[test]
    fn bulk_text_replace_reports_each_failure() {
        let mut root = table_with(Column::new(ColumnMode::Numeric));
        let id = column_id(&root);
        let mut events = Vec::new();
        let mut stack = CommandStack::default();
        let mut ctx = CommandContext::new(&mut root, &mut events);

        let op = ColumnOp::ReplaceTexts {
            first: 0,
            values: vec!["1".into(), "x".into(), "3".into(), "y".into()],
        };
        stack
            .push(Box::new(ColumnEdit::new(id, op)), &mut ctx)
            .expect("bulk replace");
        let rows: Vec<i64> = stack
            .last_notices()
            .cell_errors
            .iter()
            .map(|error| error.row)
            .collect();
        assert_eq!(rows, vec![1, 3]);
    }

    #[test]
    fn invalid_datetime_format_is_rejected() {
        let mut root = table_with(Column::new(ColumnMode::DateTime));
        let id = column_id(&root);
        let mut events = Vec::new();
        let mut stack = CommandStack::default();
        let mut ctx = CommandContext::new(&mut root, &mut events);

        let err = stack
            .push(
                Box::new(ColumnEdit::new(
                    id,
                    ColumnOp::SetDateTimeFormat("%Q".into()),
                )),
                &mut ctx,
            )
            .expect_err("bad pattern");
        assert!(matches!(err, CommandError::Type(TypeError::InvalidFormat(_))));
    }
}
