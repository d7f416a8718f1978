//! Project facade: the one mutation surface over the aspect tree.
//!
//! # Responsibility
//! - Turn every edit into a command on the undo history.
//! - Notify observers after each committed apply, undo or redo.
//! - Track formula dependencies and recalculate on request.
//! - Save and open project files.
//!
//! # Invariants
//! - The tree is only reachable read-only from outside; all writes go
//!   through commands.
//! - A failed operation mutates nothing and notifies nobody.
//! - `is_modified` is false exactly at the last saved (or opened) state.
//!
//! # See also
//! - `crate::command` for the undo engine
//! - `crate::persistence` for the file format

pub mod events;
pub mod results_log;
pub mod script;

use crate::command::aspect_cmds::{
    AddChild, DescriptionField, Move, RemoveChild, Rename, SetDescription,
};
use crate::command::column_cmds::{CellInput, ColumnEdit, ColumnOp, SetCell};
use crate::command::matrix_cmds::{MatrixEdit, MatrixOp};
use crate::command::table_cmds::{RowOp, TableRows};
use crate::command::{
    Command, CommandContext, CommandError, CommandGroup, CommandStack, PushOutcome,
};
use crate::config::{ConfigError, Settings};
use crate::error::{CellError, StructuralError, TypeError};
use crate::formula::graph::DependencyGraph;
use crate::formula::{evaluate_columns, evaluate_matrix, FormulaError};
use crate::model::aspect::{Aspect, AspectId, AspectType};
use crate::model::cell::CellValue;
use crate::model::column::Column;
use crate::model::interval::RowRange;
use crate::model::matrix::Matrix;
use crate::model::mode::{ColumnMode, PlotDesignation};
use crate::model::MAX_MATRIX_CELLS;
use crate::model::naming::NameDiversion;
use crate::persistence::autosave::SaveLock;
use crate::persistence::file::{self, PersistError, SaveOptions};
use crate::persistence::loader::{LoadReport, LoadedProject};
use crate::project::events::{ChangeEvent, Observer, ObserverId, ObserverList};
use crate::project::results_log::ResultsLog;
use log::{info, warn};
use std::collections::HashSet;
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::path::{Path, PathBuf};

#[derive(Debug)]
pub enum ProjectError {
    Structural(StructuralError),
    Type(TypeError),
    Formula(FormulaError),
    Command(CommandError),
    Persist(PersistError),
    Config(ConfigError),
    /// Another save (user or autosave) is running.
    SaveInProgress,
    /// `save` called on a project that was never saved or opened.
    NoFilePath,
}

impl Display for ProjectError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Structural(err) => write!(f, "{err}"),
            Self::Type(err) => write!(f, "{err}"),
            Self::Formula(err) => write!(f, "{err}"),
            Self::Command(err) => write!(f, "{err}"),
            Self::Persist(err) => write!(f, "{err}"),
            Self::Config(err) => write!(f, "{err}"),
            Self::SaveInProgress => write!(f, "a save is already in progress"),
            Self::NoFilePath => write!(f, "project has no file name yet"),
        }
    }
}

impl Error for ProjectError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Structural(err) => Some(err),
            Self::Type(err) => Some(err),
            Self::Formula(err) => Some(err),
            Self::Command(err) => Some(err),
            Self::Persist(err) => Some(err),
            Self::Config(err) => Some(err),
            Self::SaveInProgress | Self::NoFilePath => None,
        }
    }
}

impl From<StructuralError> for ProjectError {
    fn from(value: StructuralError) -> Self {
        Self::Structural(value)
    }
}

impl From<TypeError> for ProjectError {
    fn from(value: TypeError) -> Self {
        Self::Type(value)
    }
}

impl From<FormulaError> for ProjectError {
    fn from(value: FormulaError) -> Self {
        Self::Formula(value)
    }
}

impl From<CommandError> for ProjectError {
    fn from(value: CommandError) -> Self {
        match value {
            CommandError::Structural(err) => Self::Structural(err),
            CommandError::Type(err) => Self::Type(err),
            other => Self::Command(other),
        }
    }
}

impl From<PersistError> for ProjectError {
    fn from(value: PersistError) -> Self {
        Self::Persist(value)
    }
}

impl From<ConfigError> for ProjectError {
    fn from(value: ConfigError) -> Self {
        Self::Config(value)
    }
}

pub type ProjectResult<T> = Result<T, ProjectError>;

/// Outcome of a successful edit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Mutation {
    /// Undo label, also written to the results log.
    pub description: String,
    /// Aspect the edit was about (the new child for additions).
    pub target: AspectId,
    pub diversion: Option<NameDiversion>,
    /// Cells that could not take the requested value and became invalid.
    pub cell_errors: Vec<CellError>,
    /// Folded into the previous undo step instead of adding one.
    pub merged: bool,
}

/// Outcome of `Project::recalculate`.
#[derive(Debug, Clone, PartialEq)]
pub struct RecalcReport {
    /// Formula columns whose values were recomputed.
    pub evaluated: Vec<AspectId>,
    /// Columns that could not be evaluated; their cells kept their values.
    pub errors: Vec<FormulaError>,
    /// The undo step holding the new values, if any value changed.
    pub mutation: Option<Mutation>,
}

pub struct Project {
    root: Aspect,
    active_folder: AspectId,
    history: CommandStack,
    observers: ObserverList,
    /// `None` when structure or formulas changed since the last build.
    graph: Option<DependencyGraph>,
    /// Aspects whose values changed since the last recalculation.
    dirty: HashSet<AspectId>,
    results_log: ResultsLog,
    file_path: Option<PathBuf>,
    settings: Settings,
    save_lock: SaveLock,
}

impl std::fmt::Debug for Project {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Project")
            .field("name", &self.root.name())
            .field("file_path", &self.file_path)
            .field("undo_len", &self.history.undo_len())
            .field("observers", &self.observers.len())
            .finish()
    }
}

impl Project {
    pub fn new(name: &str) -> Self {
        Self::with_settings(name, Settings::default())
    }

    pub fn with_settings(name: &str, settings: Settings) -> Self {
        Self::from_root(Aspect::project(name), settings, None)
    }

    fn from_root(root: Aspect, settings: Settings, file_path: Option<PathBuf>) -> Self {
        Self {
            active_folder: root.id(),
            root,
            history: CommandStack::new(settings.stack_limits()),
            observers: ObserverList::default(),
            graph: None,
            dirty: HashSet::new(),
            results_log: ResultsLog::default(),
            file_path,
            settings,
            save_lock: SaveLock::default(),
        }
    }

    pub fn root(&self) -> &Aspect {
        &self.root
    }

    pub fn name(&self) -> &str {
        self.root.name()
    }

    pub fn find(&self, id: AspectId) -> Option<&Aspect> {
        self.root.find(id)
    }

    pub fn find_by_path(&self, path: &str) -> Option<&Aspect> {
        self.root.find_by_path(path)
    }

    pub fn path_of(&self, id: AspectId) -> Option<String> {
        self.root.path_of(id)
    }

    /// Resolves `path` to an id, or `PathNotFound`.
    pub fn id_at(&self, path: &str) -> ProjectResult<AspectId> {
        self.find_by_path(path)
            .map(Aspect::id)
            .ok_or_else(|| StructuralError::PathNotFound(path.to_string()).into())
    }

    pub fn column(&self, id: AspectId) -> ProjectResult<&Column> {
        let aspect = self.find(id).ok_or(StructuralError::AspectNotFound(id))?;
        aspect
            .as_column()
            .ok_or_else(|| StructuralError::NotAColumn(id).into())
    }

    pub fn matrix(&self, id: AspectId) -> ProjectResult<&Matrix> {
        let aspect = self.find(id).ok_or(StructuralError::AspectNotFound(id))?;
        aspect
            .as_matrix()
            .ok_or_else(|| StructuralError::NotAMatrix(id).into())
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn set_settings(&mut self, settings: Settings) {
        self.history.set_limits(settings.stack_limits());
        self.settings = settings;
    }

    pub fn results_log(&self) -> &ResultsLog {
        &self.results_log
    }

    pub fn file_path(&self) -> Option<&Path> {
        self.file_path.as_deref()
    }

    pub fn save_lock(&self) -> &SaveLock {
        &self.save_lock
    }

    /// Folder new aspects go into by default. Not undoable, not saved.
    pub fn active_folder(&self) -> AspectId {
        self.active_folder
    }

    pub fn set_active_folder(&mut self, id: AspectId) -> ProjectResult<()> {
        let aspect = self.find(id).ok_or(StructuralError::AspectNotFound(id))?;
        if !matches!(aspect.aspect_type(), AspectType::Project | AspectType::Folder) {
            return Err(StructuralError::NotAContainer(id).into());
        }
        self.active_folder = id;
        Ok(())
    }

    pub fn subscribe(&mut self, observer: impl Observer + 'static) -> ObserverId {
        self.observers.subscribe(Box::new(observer))
    }

    pub fn unsubscribe(&mut self, id: ObserverId) -> bool {
        self.observers.unsubscribe(id)
    }

    /// Runs `command` through the history and publishes its effects.
    fn execute(&mut self, command: Box<dyn Command>, target: AspectId) -> ProjectResult<Mutation> {
        let mut events = Vec::new();
        let pushed = {
            let mut ctx = CommandContext::new(&mut self.root, &mut events);
            self.history.push(command, &mut ctx)
        };
        let outcome = match pushed {
            Ok(outcome) => outcome,
            Err(err) => {
                warn!(
                    "event=project_edit module=project status=error error={}",
                    err
                );
                return Err(err.into());
            }
        };

        let notices = self.history.last_notices();
        let description = self.history.undo_text().unwrap_or_default();
        self.results_log.info(description.clone());
        if let Some(diversion) = &notices.diversion {
            self.results_log.warning(format!(
                "name {:?} is taken, using {:?}",
                diversion.requested, diversion.assigned
            ));
        }
        for cell_error in &notices.cell_errors {
            self.results_log.warning(cell_error.to_string());
        }
        self.publish(&events);

        Ok(Mutation {
            description,
            target,
            diversion: notices.diversion,
            cell_errors: notices.cell_errors,
            merged: outcome == PushOutcome::Merged,
        })
    }

    /// Updates formula bookkeeping, then notifies observers.
    fn publish(&mut self, events: &[ChangeEvent]) {
        for event in events {
            if event.kind.affects_structure() {
                self.graph = None;
            }
            if event.kind.affects_values() {
                self.dirty.insert(event.aspect_id);
            }
        }
        if !self.root.contains(self.active_folder) {
            self.active_folder = self.root.id();
        }
        self.observers.dispatch(events);
    }

    pub fn undo(&mut self) -> ProjectResult<String> {
        let mut events = Vec::new();
        let description = {
            let mut ctx = CommandContext::new(&mut self.root, &mut events);
            self.history.undo(&mut ctx)?
        };
        self.results_log.info(format!("undo: {description}"));
        self.publish(&events);
        Ok(description)
    }

    pub fn redo(&mut self) -> ProjectResult<String> {
        let mut events = Vec::new();
        let description = {
            let mut ctx = CommandContext::new(&mut self.root, &mut events);
            self.history.redo(&mut ctx)?
        };
        self.results_log.info(format!("redo: {description}"));
        self.publish(&events);
        Ok(description)
    }

    pub fn can_undo(&self) -> bool {
        self.history.can_undo()
    }

    pub fn can_redo(&self) -> bool {
        self.history.can_redo()
    }

    pub fn undo_text(&self) -> Option<String> {
        self.history.undo_text()
    }

    pub fn redo_text(&self) -> Option<String> {
        self.history.redo_text()
    }

    pub fn is_modified(&self) -> bool {
        !self.history.is_clean()
    }

    /// Applies several edits as one undo step. Either all apply or none.
    pub fn apply_group(
        &mut self,
        description: &str,
        commands: Vec<Box<dyn Command>>,
    ) -> ProjectResult<Mutation> {
        let target = self.root.id();
        self.execute(Box::new(CommandGroup::new(description, commands)), target)
    }

    /// Inserts `child` (with its subtree) under `parent`; `None` appends.
    pub fn add_child(
        &mut self,
        parent: AspectId,
        child: Aspect,
        position: Option<usize>,
    ) -> ProjectResult<Mutation> {
        let command = AddChild::new(parent, child, position);
        let target = command.child_id();
        self.execute(Box::new(command), target)
    }

    pub fn add_folder(&mut self, parent: AspectId, name: &str) -> ProjectResult<Mutation> {
        self.add_child(parent, Aspect::folder(name), None)
    }

    /// Adds a table with `columns` numeric columns (`1`, `2`, ...; first X).
    pub fn add_table(
        &mut self,
        parent: AspectId,
        name: &str,
        rows: usize,
        columns: usize,
    ) -> ProjectResult<Mutation> {
        let mut table = Aspect::table(name, rows, columns);
        let format = self.settings.numeric_format();
        for column in table.children_mut() {
            if let Some(column) = column.as_column_mut() {
                column.set_numeric_format(format);
            }
        }
        self.add_child(parent, table, None)
    }

    pub fn add_matrix(
        &mut self,
        parent: AspectId,
        name: &str,
        rows: usize,
        columns: usize,
    ) -> ProjectResult<Mutation> {
        let mut matrix = Matrix::new(rows, columns).ok_or(StructuralError::SizeLimit {
            requested: rows.saturating_mul(columns),
            limit: MAX_MATRIX_CELLS,
        })?;
        matrix.set_numeric_format(self.settings.numeric_format());
        self.add_child(parent, Aspect::matrix(name, matrix), None)
    }

    pub fn add_column(
        &mut self,
        table: AspectId,
        name: &str,
        mode: ColumnMode,
    ) -> ProjectResult<Mutation> {
        let mut column = Column::new(mode);
        column.set_numeric_format(self.settings.numeric_format());
        self.add_child(table, Aspect::column(name, column), None)
    }

    /// Detaches `child` from `parent`; undo reattaches it at its old
    /// position.
    pub fn remove_child(&mut self, parent: AspectId, child: AspectId) -> ProjectResult<Mutation> {
        if child == self.root.id() {
            return Err(StructuralError::RootImmutable.into());
        }
        let actual = self
            .root
            .parent_of(child)
            .ok_or(StructuralError::AspectNotFound(child))?;
        if actual.id() != parent {
            return Err(StructuralError::AspectNotFound(child).into());
        }
        self.execute(Box::new(RemoveChild::new(child)), child)
    }

    pub fn rename(&mut self, id: AspectId, name: &str) -> ProjectResult<Mutation> {
        self.execute(Box::new(Rename::new(id, name)), id)
    }

    /// Re-parents `id`; refuses moves into itself or a descendant.
    pub fn move_aspect(
        &mut self,
        id: AspectId,
        new_parent: AspectId,
        position: Option<usize>,
    ) -> ProjectResult<Mutation> {
        self.execute(Box::new(Move::new(id, new_parent, position)), id)
    }

    pub fn set_comment(&mut self, id: AspectId, comment: &str) -> ProjectResult<Mutation> {
        let command = SetDescription::new(id, DescriptionField::Comment, comment);
        self.execute(Box::new(command), id)
    }

    pub fn set_caption_spec(&mut self, id: AspectId, spec: &str) -> ProjectResult<Mutation> {
        let command = SetDescription::new(id, DescriptionField::CaptionSpec, spec);
        self.execute(Box::new(command), id)
    }

    /// Writes raw text through the column's input filter. Text that does not
    /// convert leaves an invalid cell and a `cell_errors` entry.
    pub fn set_cell_text(&mut self, column: AspectId, row: usize, text: &str) -> ProjectResult<Mutation> {
        let command = SetCell::new(column, row, CellInput::Text(text.to_string()));
        self.execute(Box::new(command), column)
    }

    /// Writes a typed value; a type that does not match the column mode is
    /// rejected with `TypeError::InvalidRowType`.
    pub fn set_cell_value(
        &mut self,
        column: AspectId,
        row: usize,
        value: CellValue,
    ) -> ProjectResult<Mutation> {
        let command = SetCell::new(column, row, CellInput::Value(value));
        self.execute(Box::new(command), column)
    }

    pub fn edit_column(&mut self, column: AspectId, op: ColumnOp) -> ProjectResult<Mutation> {
        self.execute(Box::new(ColumnEdit::new(column, op)), column)
    }

    pub fn set_column_mode(&mut self, column: AspectId, mode: ColumnMode) -> ProjectResult<Mutation> {
        self.edit_column(column, ColumnOp::SetMode(mode))
    }

    pub fn set_plot_designation(
        &mut self,
        column: AspectId,
        designation: PlotDesignation,
    ) -> ProjectResult<Mutation> {
        self.edit_column(column, ColumnOp::SetPlotDesignation(designation))
    }

    pub fn set_masked(
        &mut self,
        column: AspectId,
        range: RowRange,
        masked: bool,
    ) -> ProjectResult<Mutation> {
        self.edit_column(column, ColumnOp::SetMasked { range, masked })
    }

    pub fn set_formula(&mut self, column: AspectId, formula: &str) -> ProjectResult<Mutation> {
        self.edit_column(column, ColumnOp::SetFormula(formula.to_string()))
    }

    pub fn edit_table_rows(&mut self, table: AspectId, op: RowOp) -> ProjectResult<Mutation> {
        self.execute(Box::new(TableRows::new(table, op)), table)
    }

    pub fn set_row_count(&mut self, table: AspectId, rows: usize) -> ProjectResult<Mutation> {
        self.edit_table_rows(table, RowOp::SetRowCount(rows))
    }

    pub fn edit_matrix(&mut self, matrix: AspectId, op: MatrixOp) -> ProjectResult<Mutation> {
        self.execute(Box::new(MatrixEdit::new(matrix, op)), matrix)
    }

    fn graph(&mut self) -> &DependencyGraph {
        let root = &self.root;
        self.graph.get_or_insert_with(|| DependencyGraph::build(root))
    }

    /// Formula columns that need new values: everything after a structural
    /// change, otherwise the dirty set and whatever reads it.
    fn stale_formula_columns(&self, graph: &DependencyGraph, full: bool) -> HashSet<AspectId> {
        if full {
            return graph.order().iter().copied().collect();
        }
        let mut targets = HashSet::new();
        for id in &self.dirty {
            if graph.node(*id).is_some() {
                targets.insert(*id);
            }
            targets.extend(graph.dependants(*id));
            if self
                .root
                .find(*id)
                .is_some_and(|aspect| aspect.aspect_type() == AspectType::Table)
            {
                targets.extend(
                    graph
                        .order()
                        .iter()
                        .copied()
                        .filter(|column| graph.node(*column).is_some_and(|node| node.table == *id)),
                );
            }
        }
        targets
    }

    /// Re-evaluates stale formula columns in dependency order as one undo
    /// step. Cyclic columns are reported and keep their values.
    pub fn recalculate(&mut self) -> ProjectResult<RecalcReport> {
        let full = self.graph.is_none();
        let graph = match self.graph.take() {
            Some(graph) => graph,
            None => DependencyGraph::build(&self.root),
        };
        let targets = self.stale_formula_columns(&graph, full);
        let errors = graph.errors();
        let results = evaluate_columns(&graph, &self.root, &targets);
        self.graph = Some(graph);

        let mut evaluated = Vec::with_capacity(results.len());
        let mut commands: Vec<Box<dyn Command>> = Vec::new();
        for result in results {
            evaluated.push(result.column);
            let Ok(current) = self.column(result.column) else {
                continue;
            };
            let mut updated = current.clone();
            updated.assign_numeric(&result.values);
            if &updated != current {
                commands.push(Box::new(ColumnEdit::new(
                    result.column,
                    ColumnOp::AssignNumeric(result.values),
                )));
            }
        }

        let mutation = if commands.is_empty() {
            None
        } else {
            Some(self.apply_group("recalculate", commands)?)
        };
        self.dirty.clear();
        for err in &errors {
            self.results_log.error(err.to_string());
        }
        info!(
            "event=formula_recalc module=project status={} evaluated={} errors={}",
            if errors.is_empty() { "ok" } else { "partial" },
            evaluated.len(),
            errors.len()
        );
        Ok(RecalcReport {
            evaluated,
            errors,
            mutation,
        })
    }

    /// Computes a formula column's values without storing them.
    ///
    /// # Errors
    /// - `FormulaError::Cycle` (or another formula error) when the column
    ///   cannot be evaluated.
    pub fn evaluate_column(&mut self, id: AspectId) -> ProjectResult<Vec<Option<f64>>> {
        let column = self.column(id)?;
        if !column.has_formula() {
            return Ok((0..column.row_count())
                .map(|row| column.numeric_value(row))
                .collect());
        }
        let graph = self.graph();
        if let Some(err) = graph.error(id) {
            return Err(err.clone().into());
        }
        let targets: HashSet<AspectId> = graph.order().iter().copied().collect();
        let graph = self.graph.as_ref().ok_or(StructuralError::AspectNotFound(id))?;
        evaluate_columns(graph, &self.root, &targets)
            .into_iter()
            .find(|result| result.column == id)
            .map(|result| result.values)
            .ok_or_else(|| StructuralError::AspectNotFound(id).into())
    }

    /// Fills a matrix from its formula as one undo step.
    pub fn recalculate_matrix(&mut self, id: AspectId) -> ProjectResult<Mutation> {
        let path = self.path_of(id).unwrap_or_default();
        let cells = evaluate_matrix(self.matrix(id)?, &path)?;
        self.edit_matrix(id, MatrixOp::Assign(cells))
    }

    fn save_options(&self) -> SaveOptions {
        SaveOptions {
            compress: self.settings.compress_by_default,
            keep_backup: self.settings.keep_backup,
        }
    }

    /// Saves to the current file.
    pub fn save(&mut self) -> ProjectResult<()> {
        let path = self.file_path.clone().ok_or(ProjectError::NoFilePath)?;
        self.save_as(path)
    }

    /// Saves to `path` and makes it the current file.
    pub fn save_as(&mut self, path: impl AsRef<Path>) -> ProjectResult<()> {
        let path = path.as_ref();
        let guard = self
            .save_lock
            .try_acquire()
            .ok_or(ProjectError::SaveInProgress)?;
        let saved = file::save(&self.root, path, self.save_options());
        drop(guard);
        saved?;
        self.history.set_clean();
        self.file_path = Some(path.to_path_buf());
        self.results_log
            .info(format!("saved to {}", path.display()));
        Ok(())
    }

    /// Opens a project file. Partial loads succeed; see the report.
    pub fn open(path: impl AsRef<Path>, settings: Settings) -> ProjectResult<(Self, LoadReport)> {
        let path = path.as_ref();
        let loaded = file::load(path)?;
        Ok(Self::from_loaded(loaded, settings, path))
    }

    /// Opens the `<file>~` backup kept by the last save of `path`.
    pub fn open_backup(path: impl AsRef<Path>, settings: Settings) -> ProjectResult<(Self, LoadReport)> {
        let path = path.as_ref();
        let loaded = file::load_backup(path)?;
        Ok(Self::from_loaded(loaded, settings, path))
    }

    fn from_loaded(loaded: LoadedProject, settings: Settings, path: &Path) -> (Self, LoadReport) {
        let LoadedProject { root, report, .. } = loaded;
        let mut project = Self::from_root(root, settings, Some(path.to_path_buf()));
        project
            .results_log
            .info(format!("opened {}", path.display()));
        if !report.is_clean() {
            for problem in &report.problems {
                project.results_log.error(problem.to_string());
            }
            for warning in &report.warnings {
                project.results_log.warning(warning.to_string());
            }
            let summary = report.summary();
            let headline = summary.lines().next().unwrap_or_default();
            project.results_log.warning(headline);
        }
        (project, report)
    }
}
