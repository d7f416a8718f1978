//! Cell access for the embedded scripting bridge.
//!
//! Scripts address cells by table path, column name or index and a signed
//! row; every write becomes an undoable command on the project.

use crate::error::{StructuralError, TypeError};
use crate::model::aspect::{Aspect, AspectId, AspectType};
use crate::model::cell::CellValue;
use crate::model::MAX_ROWS;
use crate::project::{Mutation, Project, ProjectResult};

/// Column selector as scripts pass it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ColumnRef {
    Name(String),
    /// 0-based position among the table's columns.
    Index(usize),
}

impl From<&str> for ColumnRef {
    fn from(value: &str) -> Self {
        Self::Name(value.to_string())
    }
}

impl From<usize> for ColumnRef {
    fn from(value: usize) -> Self {
        Self::Index(value)
    }
}

pub struct ScriptSession<'p> {
    project: &'p mut Project,
}

/// Signed script rows must land in `0..MAX_ROWS`.
fn check_row(row: i64) -> Result<usize, TypeError> {
    usize::try_from(row)
        .ok()
        .filter(|row| *row < MAX_ROWS)
        .ok_or(TypeError::InvalidRowIndex(row))
}

impl<'p> ScriptSession<'p> {
    pub fn new(project: &'p mut Project) -> Self {
        Self { project }
    }

    pub fn project(&self) -> &Project {
        &*self.project
    }

    fn table(&self, table_path: &str) -> ProjectResult<&Aspect> {
        let table = self
            .project
            .find_by_path(table_path)
            .ok_or_else(|| StructuralError::PathNotFound(table_path.to_string()))?;
        if table.aspect_type() != AspectType::Table {
            return Err(StructuralError::NotATable(table.id()).into());
        }
        Ok(table)
    }

    fn column_id(&self, table_path: &str, column: &ColumnRef) -> ProjectResult<AspectId> {
        let table = self.table(table_path)?;
        let found = match column {
            ColumnRef::Name(name) => table
                .child_by_name(name)
                .ok_or_else(|| TypeError::UnknownColumn(name.clone()))?,
            ColumnRef::Index(index) => table
                .columns()
                .nth(*index)
                .ok_or_else(|| TypeError::UnknownColumn(format!("#{index}")))?,
        };
        Ok(found.id())
    }

    pub fn row_count(&self, table_path: &str) -> ProjectResult<usize> {
        let table = self.table(table_path)?;
        Ok(table.table_row_count().unwrap_or(0))
    }

    pub fn column_names(&self, table_path: &str) -> ProjectResult<Vec<String>> {
        let table = self.table(table_path)?;
        Ok(table
            .columns()
            .map(|column| column.name().to_string())
            .collect())
    }

    /// Typed value of a valid cell; `None` for invalid, masked or missing
    /// cells.
    ///
    /// # Errors
    /// - `TypeError::InvalidRowIndex` for negative rows or rows past
    ///   `MAX_ROWS`.
    /// - `TypeError::UnknownColumn` / `StructuralError` for bad addresses.
    pub fn get_cell(
        &self,
        table_path: &str,
        column: impl Into<ColumnRef>,
        row: i64,
    ) -> ProjectResult<Option<CellValue>> {
        let row = check_row(row)?;
        let id = self.column_id(table_path, &column.into())?;
        Ok(self.project.column(id)?.valid_value(row))
    }

    /// Display text of a cell, as the column's output filter renders it.
    pub fn get_cell_text(
        &self,
        table_path: &str,
        column: impl Into<ColumnRef>,
        row: i64,
    ) -> ProjectResult<String> {
        let row = check_row(row)?;
        let id = self.column_id(table_path, &column.into())?;
        Ok(self.project.column(id)?.display(row))
    }

    /// Writes raw text through the column's input filter.
    pub fn set_cell(
        &mut self,
        table_path: &str,
        column: impl Into<ColumnRef>,
        row: i64,
        text: &str,
    ) -> ProjectResult<Mutation> {
        let row = check_row(row)?;
        let id = self.column_id(table_path, &column.into())?;
        self.project.set_cell_text(id, row, text)
    }

    pub fn set_cell_value(
        &mut self,
        table_path: &str,
        column: impl Into<ColumnRef>,
        row: i64,
        value: CellValue,
    ) -> ProjectResult<Mutation> {
        let row = check_row(row)?;
        let id = self.column_id(table_path, &column.into())?;
        self.project.set_cell_value(id, row, value)
    }
}

#[cfg(test)]
mod tests {
    use super::ScriptSession;
    use crate::error::TypeError;
    use crate::model::cell::CellValue;
    use crate::project::{Project, ProjectError};

    fn project_with_table() -> Project {
        let mut project = Project::new("P");
        let root = project.root().id();
        project.add_table(root, "T", 3, 2).expect("add table");
        project
    }

    #[test]
    fn reads_and_writes_by_name_and_index() {
        let mut project = project_with_table();
        let mut session = ScriptSession::new(&mut project);
        session.set_cell("P/T", "1", 0, "2.5").expect("set by name");
        session
            .set_cell_value("P/T", 1usize, 2, CellValue::Numeric(4.0))
            .expect("set by index");

        assert_eq!(
            session.get_cell("P/T", 0usize, 0).expect("get"),
            Some(CellValue::Numeric(2.5))
        );
        assert_eq!(session.get_cell_text("P/T", "2", 2).expect("text"), "4");
        assert_eq!(session.column_names("P/T").expect("names"), vec!["1", "2"]);
        assert!(project.can_undo());
    }

    #[test]
    fn negative_rows_and_unknown_columns_are_type_errors() {
        let mut project = project_with_table();
        let mut session = ScriptSession::new(&mut project);
        assert!(matches!(
            session.get_cell("P/T", "1", -1),
            Err(ProjectError::Type(TypeError::InvalidRowIndex(-1)))
        ));
        assert!(matches!(
            session.set_cell("P/T", "missing", 0, "1"),
            Err(ProjectError::Type(TypeError::UnknownColumn(_)))
        ));
        assert_eq!(session.project().undo_text().as_deref(), Some("P: add T"));
    }
}
