//! Table-wide row commands.
//!
//! Row edits touch every column of a table, so they snapshot the affected
//! columns and restore them wholesale on undo.

use crate::command::{Command, CommandContext, CommandError, CommandResult};
use crate::error::StructuralError;
use crate::model::aspect::{Aspect, AspectId};
use crate::model::column::Column;
use crate::model::{row_span, MAX_ROWS};
use crate::project::events::ChangeKind;
use std::any::Any;

/// Row-level edit applied to all columns of a table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RowOp {
    /// Sets the declared row count; longer columns are truncated.
    SetRowCount(usize),
    Insert { before: usize, count: usize },
    Remove { first: usize, count: usize },
}

#[derive(Debug)]
pub struct TableRows {
    table: AspectId,
    op: RowOp,
    saved_rows: usize,
    saved_columns: Vec<(AspectId, Column)>,
    label: String,
}

impl TableRows {
    pub fn new(table: AspectId, op: RowOp) -> Self {
        Self {
            table,
            op,
            saved_rows: 0,
            saved_columns: Vec::new(),
            label: "change rows".to_string(),
        }
    }

    fn table_aspect<'c>(ctx: &'c CommandContext<'_>, id: AspectId) -> CommandResult<&'c Aspect> {
        let aspect = ctx.aspect(id)?;
        if aspect.as_table().is_none() {
            return Err(StructuralError::NotATable(id).into());
        }
        Ok(aspect)
    }

    fn verb(&self) -> String {
        match self.op {
            RowOp::SetRowCount(rows) => format!("set row count to {rows}"),
            RowOp::Insert { count, .. } => format!("insert {count} rows"),
            RowOp::Remove { count, .. } => format!("remove {count} rows"),
        }
    }

    fn touches(&self, column: &Column) -> bool {
        match self.op {
            RowOp::SetRowCount(rows) => column.row_count() > rows,
            RowOp::Insert { before, count } => count > 0 && before <= column.row_count(),
            RowOp::Remove { first, count } => count > 0 && first < column.row_count(),
        }
    }

    /// Row count after the op; fails past `MAX_ROWS`.
    fn next_row_count(&self, current: usize) -> Result<usize, StructuralError> {
        let next = match self.op {
            RowOp::SetRowCount(rows) => Some(rows).filter(|rows| *rows <= MAX_ROWS),
            RowOp::Insert { before, count } if before <= current => row_span(current, count),
            RowOp::Insert { .. } => Some(current),
            RowOp::Remove { first, count } if first < current => {
                Some(current - count.min(current - first))
            }
            RowOp::Remove { .. } => Some(current),
        };
        next.ok_or_else(|| StructuralError::SizeLimit {
            requested: match self.op {
                RowOp::SetRowCount(rows) => rows,
                RowOp::Insert { count, .. } => current.saturating_add(count),
                RowOp::Remove { .. } => current,
            },
            limit: MAX_ROWS,
        })
    }
}

impl Command for TableRows {
    fn description(&self) -> String {
        self.label.clone()
    }

    fn apply(&mut self, ctx: &mut CommandContext<'_>) -> CommandResult<()> {
        let table = Self::table_aspect(ctx, self.table)?;
        let current = table.table_row_count().unwrap_or(0);
        let next_rows = self.next_row_count(current)?;
        let saved_columns: Vec<(AspectId, Column)> = table
            .columns()
            .filter_map(|child| child.as_column().map(|column| (child.id(), column)))
            .filter(|(_, column)| self.touches(column))
            .map(|(id, column)| (id, column.clone()))
            .collect();
        let saved_rows = table.as_table().map_or(0, |table| table.row_count());
        self.label = format!("{}: {}", table.name(), self.verb());

        for (id, _) in &saved_columns {
            let column = ctx.column_mut(*id)?;
            match self.op {
                RowOp::SetRowCount(rows) => column.truncate(rows),
                RowOp::Insert { before, count } => column.insert_rows(before, count),
                RowOp::Remove { first, count } => column.remove_rows(first, count),
            }
        }
        if let Some(table) = ctx.aspect_mut(self.table)?.as_table_mut() {
            table.set_row_count(next_rows);
        }
        self.saved_rows = saved_rows;
        self.saved_columns = saved_columns;
        ctx.emit(ChangeKind::RowCountChanged, self.table);
        Ok(())
    }

    fn invert(&mut self, ctx: &mut CommandContext<'_>) -> CommandResult<()> {
        Self::table_aspect(ctx, self.table)?;
        for (id, _) in &self.saved_columns {
            ctx.column(*id)?;
        }
        for (id, saved) in &self.saved_columns {
            *ctx.column_mut(*id)? = saved.clone();
        }
        ctx.aspect_mut(self.table)?
            .as_table_mut()
            .ok_or(CommandError::TargetMissing(self.table))?
            .set_row_count(self.saved_rows);
        ctx.emit(ChangeKind::RowCountChanged, self.table);
        Ok(())
    }

    fn footprint(&self) -> usize {
        self.saved_columns
            .iter()
            .map(|(_, column)| column.footprint())
            .sum()
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

#[cfg(test)]
mod tests {
    use super::{RowOp, TableRows};
    use crate::command::{CommandContext, CommandError, CommandStack};
    use crate::error::StructuralError;
    use crate::model::aspect::Aspect;
    use crate::model::column::Column;
    use crate::model::MAX_ROWS;

    #[test]
    fn shrinking_row_count_truncates_and_undo_restores() {
        let mut root = Aspect::project("P").with_child(
            Aspect::table("T", 4, 0)
                .with_child(Aspect::column("A", Column::numeric(vec![1.0, 2.0, 3.0, 4.0])))
                .with_child(Aspect::column("B", Column::numeric(vec![5.0]))),
        );
        let before = root.clone();
        let table = root.children()[0].id();
        let mut events = Vec::new();
        let mut stack = CommandStack::default();
        let mut ctx = CommandContext::new(&mut root, &mut events);

        stack
            .push(
                Box::new(TableRows::new(table, RowOp::SetRowCount(2))),
                &mut ctx,
            )
            .expect("shrink");
        let shrunk = ctx.root().find(table).expect("table");
        assert_eq!(shrunk.table_row_count(), Some(2));

        stack.undo(&mut ctx).expect("undo");
        assert_eq!(ctx.root(), &before);
    }

    #[test]
    fn inserted_rows_shift_every_column() {
        let mut root = Aspect::project("P").with_child(
            Aspect::table("T", 2, 0)
                .with_child(Aspect::column("A", Column::numeric(vec![1.0, 2.0]))),
        );
        let table = root.children()[0].id();
        let mut events = Vec::new();
        let mut stack = CommandStack::default();
        let mut ctx = CommandContext::new(&mut root, &mut events);

        stack
            .push(
                Box::new(TableRows::new(table, RowOp::Insert { before: 1, count: 3 })),
                &mut ctx,
            )
            .expect("insert");
        let column = ctx
            .root()
            .find_by_path("P/T/A")
            .and_then(Aspect::as_column)
            .expect("column");
        assert_eq!(column.row_count(), 5);
        assert_eq!(column.numeric_value(4), Some(2.0));
        assert_eq!(column.numeric_value(1), None);
    }

    #[test]
    fn row_counts_past_limit_are_rejected() {
        let mut root = Aspect::project("P").with_child(
            Aspect::table("T", 2, 0)
                .with_child(Aspect::column("A", Column::numeric(vec![1.0, 2.0]))),
        );
        let before = root.clone();
        let table = root.children()[0].id();
        let mut events = Vec::new();
        let mut stack = CommandStack::default();
        let mut ctx = CommandContext::new(&mut root, &mut events);

        for op in [
            RowOp::Insert {
                before: 0,
                count: usize::MAX,
            },
            RowOp::SetRowCount(MAX_ROWS + 1),
        ] {
            let err = stack
                .push(Box::new(TableRows::new(table, op)), &mut ctx)
                .expect_err("too many rows");
            assert!(matches!(
                err,
                CommandError::Structural(StructuralError::SizeLimit { .. })
            ));
        }
        assert_eq!(ctx.root(), &before);
    }
}
