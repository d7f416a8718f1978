//! Lenient conversion of a project document into an aspect tree.
//!
//! # Invariants
//! - Only document-level failures (syntax, root, version) abort a load.
//! - Each table, matrix and column is converted independently; a broken
//!   one is skipped with exactly one problem naming its path.
//! - Cell-level failures are problems but keep their column; the cell is
//!   loaded as an invalid placeholder.
//! - Substituted defaults and unknown elements are warnings.
//! - The returned tree satisfies every model invariant (unique sibling
//!   names, unique ids, payload type matching mode).

use crate::model::aspect::{
    now_millis, Aspect, AspectId, AspectKind, AspectType, DEFAULT_CAPTION_SPEC, PATH_SEPARATOR,
};
use crate::model::cell::{CellValue, ColumnData};
use crate::model::column::Column;
use crate::model::filter::{parse_datetime, parse_number, ISO_DATETIME_FORMAT};
use crate::model::interval::{IntervalSet, RowRange};
use crate::model::matrix::{Coordinates, Matrix};
use crate::model::mode::{
    is_valid_datetime_format, ColumnMode, DataType, Notation, NumericFormat, PlotDesignation,
    MAX_NUMERIC_DIGITS,
};
use crate::model::naming;
use crate::model::table::Table;
use crate::model::{matrix_cell_count, MAX_ROWS};
use crate::persistence::xml::{parse_document, Element};
use crate::persistence::{FormatVersion, CURRENT_VERSION, ROOT_ELEMENT};
use chrono::{DateTime, Utc};
use log::{info, warn};
use std::collections::HashSet;
use std::error::Error;
use std::fmt::{Display, Formatter};
use uuid::Uuid;

/// Elements inside aspects that are not aspects themselves.
const PROPERTY_ELEMENTS: &[&str] = &["comment", "formula", "masking", "invalid", "cell"];

/// Document-level failure; nothing was loaded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FormatError {
    /// XML syntax error.
    Malformed(String),
    /// Root element is not a project document.
    NotAProject(String),
    /// Version attribute missing or unparsable.
    InvalidVersion(String),
    UnsupportedVersion {
        found: FormatVersion,
        supported: FormatVersion,
    },
    MissingProject,
}

impl Display for FormatError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Malformed(message) => write!(f, "malformed project file: {message}"),
            Self::NotAProject(root) => {
                write!(f, "not a project file: root element is <{root}>")
            }
            Self::InvalidVersion(raw) => write!(f, "invalid or missing file version `{raw}`"),
            Self::UnsupportedVersion { found, supported } => write!(
                f,
                "file version {found} is not supported (this build reads {}.x, writes {supported})",
                supported.major
            ),
            Self::MissingProject => write!(f, "project file contains no project element"),
        }
    }
}

impl Error for FormatError {}

/// One diagnostic, addressed by aspect path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadIssue {
    pub path: String,
    pub message: String,
}

impl Display for LoadIssue {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.path, self.message)
    }
}

/// Everything that went wrong or was patched up while loading.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LoadReport {
    /// Elements or cells that could not be loaded.
    pub problems: Vec<LoadIssue>,
    /// Defaults substituted, names changed, elements ignored.
    pub warnings: Vec<LoadIssue>,
}

impl LoadReport {
    /// Whether some content was dropped.
    pub fn is_partial(&self) -> bool {
        !self.problems.is_empty()
    }

    pub fn is_clean(&self) -> bool {
        self.problems.is_empty() && self.warnings.is_empty()
    }

    /// Human-readable summary for the results log.
    pub fn summary(&self) -> String {
        let mut lines = Vec::new();
        if self.is_partial() {
            lines.push(format!(
                "loading partly failed: {} problem(s), {} warning(s)",
                self.problems.len(),
                self.warnings.len()
            ));
        } else if !self.warnings.is_empty() {
            lines.push(format!("loaded with {} warning(s)", self.warnings.len()));
        } else {
            return "loaded without problems".to_string();
        }
        lines.extend(self.problems.iter().map(|issue| format!("problem: {issue}")));
        lines.extend(self.warnings.iter().map(|issue| format!("warning: {issue}")));
        lines.join("\n")
    }

    fn problem(&mut self, path: &str, message: impl Into<String>) {
        let message = message.into();
        warn!(
            "event=load_problem module=persistence status=error reason=\"{}\"",
            message
        );
        self.problems.push(LoadIssue {
            path: path.to_string(),
            message,
        });
    }

    fn warning(&mut self, path: &str, message: impl Into<String>) {
        self.warnings.push(LoadIssue {
            path: path.to_string(),
            message: message.into(),
        });
    }
}

#[derive(Debug, Clone)]
pub struct LoadedProject {
    pub root: Aspect,
    pub version: FormatVersion,
    pub report: LoadReport,
}

/// Parses a project document.
///
/// # Errors
/// - `FormatError` when the document as a whole is unusable; element-level
///   failures end up in `LoadedProject::report` instead.
pub fn load_str(xml: &str) -> Result<LoadedProject, FormatError> {
    let document = parse_document(xml).map_err(FormatError::Malformed)?;
    if document.name != ROOT_ELEMENT {
        return Err(FormatError::NotAProject(document.name));
    }
    let raw_version = document.attr("version").unwrap_or_default();
    let version = FormatVersion::parse(raw_version)
        .ok_or_else(|| FormatError::InvalidVersion(raw_version.to_string()))?;
    if !version.is_supported() {
        return Err(FormatError::UnsupportedVersion {
            found: version,
            supported: CURRENT_VERSION,
        });
    }

    let mut loader = Loader::default();
    if version > CURRENT_VERSION {
        loader.report.warning(
            ROOT_ELEMENT,
            format!("written by newer version {version}; unknown content is ignored"),
        );
    }
    let mut projects = document.children_named("project");
    let project = projects.next().ok_or(FormatError::MissingProject)?;
    if projects.next().is_some() {
        loader
            .report
            .warning(ROOT_ELEMENT, "additional project elements ignored");
    }
    for other in document.children.iter().filter(|child| child.name != "project") {
        loader
            .report
            .warning(ROOT_ELEMENT, format!("unknown element <{}> ignored", other.name));
    }

    let root = loader.load_container(project, AspectKind::Project, "");
    info!(
        "event=project_parse module=persistence status={} version={} problems={} warnings={}",
        if loader.report.is_partial() { "partial" } else { "ok" },
        version,
        loader.report.problems.len(),
        loader.report.warnings.len()
    );
    Ok(LoadedProject {
        root,
        version,
        report: loader.report,
    })
}

#[derive(Default)]
struct Loader {
    report: LoadReport,
    seen_ids: HashSet<AspectId>,
}

/// Attributes shared by all aspects.
struct Header {
    id: AspectId,
    name: String,
    path: String,
    comment: String,
    caption_spec: String,
    creation_time: DateTime<Utc>,
}

impl Header {
    fn into_aspect(self, kind: AspectKind) -> Aspect {
        Aspect::from_parts(
            self.id,
            self.name,
            self.comment,
            self.caption_spec,
            self.creation_time,
            kind,
        )
    }
}

fn join_path(parent: &str, name: &str) -> String {
    if parent.is_empty() {
        name.to_string()
    } else {
        format!("{parent}{PATH_SEPARATOR}{name}")
    }
}

fn parse_range(element: &Element) -> Option<RowRange> {
    let start = element.attr("start")?.trim().parse::<usize>().ok()?;
    let end = element.attr("end")?.trim().parse::<usize>().ok()?;
    RowRange::new(start, end).filter(|range| range.end() < MAX_ROWS)
}

impl Loader {
    fn header(&mut self, element: &Element, aspect_type: AspectType, parent_path: &str) -> Header {
        let raw_name = element.attr("name").unwrap_or_default();
        let mut name = naming::sanitize(raw_name).unwrap_or_else(|| raw_name.to_string());
        name = naming::escape_for(aspect_type, &name);
        let path = join_path(parent_path, &name);
        if name != raw_name {
            self.report
                .warning(&path, format!("name {raw_name:?} changed to {name:?}"));
        }

        let id = match element.attr("id").map(|raw| Uuid::parse_str(raw.trim())) {
            Some(Ok(id)) if !self.seen_ids.contains(&id) => id,
            Some(Ok(_)) => {
                self.report.warning(&path, "duplicate id replaced");
                Uuid::new_v4()
            }
            _ => {
                self.report.warning(&path, "invalid or missing id replaced");
                Uuid::new_v4()
            }
        };
        self.seen_ids.insert(id);

        let creation_time = match element
            .attr("creation_time")
            .map(|raw| DateTime::parse_from_rfc3339(raw.trim()))
        {
            Some(Ok(time)) => time.with_timezone(&Utc),
            _ => {
                self.report
                    .warning(&path, "invalid or missing creation time, using current time");
                now_millis()
            }
        };

        Header {
            id,
            name,
            path,
            comment: element.child_text("comment"),
            caption_spec: element
                .attr("caption_spec")
                .unwrap_or(DEFAULT_CAPTION_SPEC)
                .to_string(),
            creation_time,
        }
    }

    /// Loads a project or folder with all loadable children.
    fn load_container(&mut self, element: &Element, kind: AspectKind, parent_path: &str) -> Aspect {
        let header = self.header(element, kind.aspect_type(), parent_path);
        let path = header.path.clone();
        let mut container = header.into_aspect(kind);
        for child in &element.children {
            let loaded = match child.name.as_str() {
                "folder" => Some(self.load_container(child, AspectKind::Folder, &path)),
                "table" => self.load_table(child, &path),
                "matrix" => self.load_matrix(child, &path),
                name if PROPERTY_ELEMENTS.contains(&name) => continue,
                other => {
                    self.report
                        .warning(&path, format!("unknown element <{other}> ignored"));
                    continue;
                }
            };
            if let Some(loaded) = loaded {
                self.attach(&mut container, loaded, &path);
            }
        }
        container
    }

    /// Appends `child`, diverting its name if a sibling already has it.
    fn attach(&mut self, parent: &mut Aspect, mut child: Aspect, parent_path: &str) {
        let assigned = naming::unique_name(
            child.name(),
            parent.children().iter().map(Aspect::name),
        );
        if assigned != child.name() {
            self.report.warning(
                &join_path(parent_path, &assigned),
                format!("duplicate name {:?} changed to {assigned:?}", child.name()),
            );
            child.set_name(assigned);
        }
        let end = parent.children().len();
        parent.insert_child(end, child);
    }

    fn load_table(&mut self, element: &Element, parent_path: &str) -> Option<Aspect> {
        let header = self.header(element, AspectType::Table, parent_path);
        let path = header.path.clone();
        let Some(rows) = element
            .attr("rows")
            .and_then(|raw| raw.trim().parse::<usize>().ok())
            .filter(|rows| *rows <= MAX_ROWS)
        else {
            self.report.problem(&path, "invalid or missing number of rows");
            return None;
        };
        let mut table = header.into_aspect(AspectKind::Table(Table::new(rows)));
        for child in &element.children {
            match child.name.as_str() {
                "column" => {
                    if let Some(column) = self.load_column(child, &path) {
                        self.attach(&mut table, column, &path);
                    }
                }
                name if PROPERTY_ELEMENTS.contains(&name) => {}
                other => self
                    .report
                    .warning(&path, format!("unknown element <{other}> ignored")),
            }
        }
        let declared = element
            .attr("columns")
            .and_then(|raw| raw.trim().parse::<usize>().ok());
        let loaded = table.children().len();
        if declared.is_some_and(|declared| declared != loaded) {
            self.report
                .warning(&path, format!("expected {declared:?} columns, loaded {loaded}"));
        }
        Some(table)
    }

    fn numeric_format(&mut self, element: &Element, path: &str) -> NumericFormat {
        let notation = element
            .attr("numeric_format")
            .and_then(|raw| raw.trim().chars().next())
            .and_then(Notation::from_char);
        let digits = element
            .attr("numeric_digits")
            .and_then(|raw| raw.trim().parse::<u8>().ok())
            .filter(|digits| *digits <= MAX_NUMERIC_DIGITS);
        match (notation, digits) {
            (Some(notation), Some(digits)) => NumericFormat::new(notation, digits),
            _ => {
                self.report
                    .warning(path, "invalid or missing numeric format, using default");
                NumericFormat::default()
            }
        }
    }

    fn ranges(&mut self, element: &Element, name: &str, path: &str) -> Result<IntervalSet, ()> {
        let mut set = IntervalSet::new();
        for holder in element.children_named(name) {
            for range in holder.children_named("row_range") {
                match parse_range(range) {
                    Some(range) => set.insert(range),
                    None => {
                        self.report.problem(path, "invalid or missing start/end row");
                        return Err(());
                    }
                }
            }
        }
        Ok(set)
    }

    fn load_column(&mut self, element: &Element, parent_path: &str) -> Option<Aspect> {
        let header = self.header(element, AspectType::Column, parent_path);
        let path = header.path.clone();

        let Some(data_type) = element.attr("type").and_then(DataType::parse) else {
            self.report.problem(&path, "column type invalid");
            return None;
        };
        let Some(mode) = element.attr("mode").and_then(ColumnMode::parse) else {
            self.report.problem(&path, "column mode invalid");
            return None;
        };
        if mode.data_type() != data_type {
            self.report.problem(&path, "column type invalid");
            return None;
        }
        let Some(plot_designation) = element
            .attr("plot_designation")
            .and_then(PlotDesignation::parse)
        else {
            self.report.problem(&path, "column plot designation invalid");
            return None;
        };
        let masked = self.ranges(element, "masking", &path).ok()?;
        let mut invalid = self.ranges(element, "invalid", &path).ok()?;

        let numeric_format = self.numeric_format(element, &path);
        let datetime_format = match element.attr("datetime_format") {
            Some(format) if is_valid_datetime_format(format) => format.to_string(),
            Some(_) => {
                self.report
                    .warning(&path, "invalid date-time format, using default");
                mode.default_datetime_format().to_string()
            }
            None => mode.default_datetime_format().to_string(),
        };

        let data = self.load_cells(element, data_type, &mut invalid, &path);
        let column = Column::from_parts(
            mode,
            plot_designation,
            data,
            invalid,
            masked,
            numeric_format,
            datetime_format,
            element.child_text("formula").trim().to_string(),
        );
        match column {
            Some(column) => Some(header.into_aspect(AspectKind::Column(column))),
            None => {
                self.report.problem(&path, "column type invalid");
                None
            }
        }
    }

    /// Reads `<cell row="n">` children. Rows without a readable cell are
    /// placeholders flagged invalid.
    fn load_cells(
        &mut self,
        element: &Element,
        data_type: DataType,
        invalid: &mut IntervalSet,
        path: &str,
    ) -> ColumnData {
        let mut cells: Vec<(usize, CellValue)> = Vec::new();
        for cell in element.children_named("cell") {
            let raw_row = cell.attr("row").unwrap_or_default();
            let Some(row) = raw_row
                .trim()
                .parse::<i64>()
                .ok()
                .and_then(|row| usize::try_from(row).ok())
                .filter(|row| *row < MAX_ROWS)
            else {
                self.report
                    .problem(path, format!("invalid row index `{raw_row}`"));
                continue;
            };
            if let Some(declared) = cell.attr("type") {
                if DataType::parse(declared) != Some(data_type) {
                    self.report
                        .problem(path, format!("invalid row type in row {row}"));
                    invalid.insert(RowRange::single(row));
                    continue;
                }
            }
            let value = match data_type {
                DataType::Numeric => parse_number(&cell.text).map(CellValue::Numeric),
                DataType::Text => Some(CellValue::Text(cell.text.clone())),
                DataType::DateTime => {
                    parse_datetime(&cell.text, Some(ISO_DATETIME_FORMAT)).map(CellValue::DateTime)
                }
            };
            match value {
                Some(value) => cells.push((row, value)),
                None => {
                    self.report
                        .problem(path, format!("invalid row value in row {row}"));
                    invalid.insert(RowRange::single(row));
                }
            }
        }

        let len = cells
            .iter()
            .map(|(row, _)| row + 1)
            .chain(invalid.ranges().last().map(|range| range.end() + 1))
            .max()
            .unwrap_or(0);
        let mut present = vec![false; len];
        let mut data = ColumnData::empty(data_type);
        data.resize(len);
        for (row, value) in cells {
            if data.set(row, value) {
                present[row] = true;
            }
        }
        for (row, filled) in present.iter().enumerate() {
            if !filled {
                invalid.insert(RowRange::single(row));
            }
        }
        data
    }

    fn load_matrix(&mut self, element: &Element, parent_path: &str) -> Option<Aspect> {
        let header = self.header(element, AspectType::Matrix, parent_path);
        let path = header.path.clone();
        let dimension = |name: &str| {
            element
                .attr(name)
                .and_then(|raw| raw.trim().parse::<usize>().ok())
        };
        let (Some(rows), Some(columns)) = (dimension("rows"), dimension("cols")) else {
            self.report
                .problem(&path, "invalid or missing matrix dimensions");
            return None;
        };
        let Some(size) = matrix_cell_count(rows, columns) else {
            self.report
                .problem(&path, "invalid or missing matrix dimensions");
            return None;
        };

        let defaults = Coordinates::spanning(rows, columns);
        let mut coordinate = |name: &str, fallback: f64| match element
            .attr(name)
            .and_then(parse_number)
        {
            Some(value) => value,
            None => {
                self.report
                    .warning(&path, format!("invalid or missing {name}, using default"));
                fallback
            }
        };
        let coordinates = Coordinates {
            x_start: coordinate("x_start", defaults.x_start),
            x_end: coordinate("x_end", defaults.x_end),
            y_start: coordinate("y_start", defaults.y_start),
            y_end: coordinate("y_end", defaults.y_end),
        };
        let numeric_format = self.numeric_format(element, &path);

        let mut cells = vec![0.0; size];
        for cell in element.children_named("cell") {
            let index = |name: &str| {
                cell.attr(name)
                    .and_then(|raw| raw.trim().parse::<usize>().ok())
            };
            let (Some(row), Some(col)) = (index("row"), index("col")) else {
                self.report.problem(&path, "invalid row index");
                continue;
            };
            if row >= rows || col >= columns {
                self.report
                    .problem(&path, format!("invalid row index {row},{col}"));
                continue;
            }
            match parse_number(&cell.text) {
                Some(value) => cells[row * columns + col] = value,
                None => self
                    .report
                    .problem(&path, format!("invalid row value in cell {row},{col}")),
            }
        }

        let formula = element.child_text("formula").trim().to_string();
        match Matrix::from_parts(rows, columns, cells, coordinates, numeric_format, formula) {
            Some(matrix) => Some(header.into_aspect(AspectKind::Matrix(matrix))),
            None => {
                self.report
                    .problem(&path, "invalid or missing matrix dimensions");
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{load_str, FormatError};
    use crate::model::cell::CellValue;
    use crate::model::cell::Validity;

    fn document(body: &str) -> String {
        format!(
            "<?xml version=\"1.0\"?><tabula_project version=\"1.0\">\
             <project id=\"4b3c9fb5-0c8a-4d40-9d55-3b1d0f9e8a01\" name=\"P\" \
             creation_time=\"2024-03-01T10:00:00.000Z\">{body}</project></tabula_project>"
        )
    }

    #[test]
    fn document_level_failures_abort() {
        assert!(matches!(load_str("<a><b></a>"), Err(FormatError::Malformed(_))));
        assert!(matches!(
            load_str("<other version=\"1.0\"/>"),
            Err(FormatError::NotAProject(_))
        ));
        assert!(matches!(
            load_str("<tabula_project/>"),
            Err(FormatError::InvalidVersion(_))
        ));
        assert!(matches!(
            load_str("<tabula_project version=\"2.0\"><project name=\"P\"/></tabula_project>"),
            Err(FormatError::UnsupportedVersion { .. })
        ));
        assert!(matches!(
            load_str("<tabula_project version=\"1.0\"/>"),
            Err(FormatError::MissingProject)
        ));
    }

    #[test]
    fn broken_column_is_skipped_and_cells_degrade() {
        let xml = document(
            "<table name=\"T\" rows=\"3\" columns=\"2\">\
               <column name=\"A\" type=\"Numeric\" mode=\"Numeric\" plot_designation=\"X\">\
                 <cell row=\"0\">1.5</cell><cell row=\"2\">oops</cell><cell row=\"-1\">3</cell>\
               </column>\
               <column name=\"B\" type=\"Numeric\" plot_designation=\"Y\"/>\
             </table>",
        );
        let loaded = load_str(&xml).expect("loads partially");
        let table = loaded.root.find_by_path("P/T").expect("table kept");
        assert_eq!(table.children().len(), 1);

        let column = table.children()[0].as_column().expect("column");
        assert_eq!(column.row_count(), 3);
        assert_eq!(column.value(0), Some(CellValue::Numeric(1.5)));
        assert_eq!(column.validity(1), Validity::Invalid);
        assert_eq!(column.validity(2), Validity::Invalid);

        let messages: Vec<String> = loaded
            .report
            .problems
            .iter()
            .map(|issue| issue.to_string())
            .collect();
        assert_eq!(messages.len(), 3);
        assert!(messages.iter().any(|m| m == "P/T/B: column mode invalid"));
        assert!(loaded.report.summary().starts_with("loading partly failed"));
    }

    #[test]
    fn duplicate_names_and_bad_metadata_become_warnings() {
        let xml = document(
            "<folder name=\"F\"/><folder name=\"F\" creation_time=\"yesterday\"/>\
             <table name=\"my_table\" rows=\"0\"/><chart name=\"x\"/>",
        );
        let loaded = load_str(&xml).expect("loads");
        let names: Vec<&str> = loaded.root.children().iter().map(|c| c.name()).collect();
        assert_eq!(names, vec!["F", "F 2", "my-table"]);
        assert!(!loaded.report.is_partial());
        assert!(loaded
            .report
            .warnings
            .iter()
            .any(|issue| issue.message.contains("unknown element <chart>")));
    }

    #[test]
    fn huge_cell_row_is_a_problem_not_a_crash() {
        let xml = document(
            "<table name=\"T\" rows=\"1\" columns=\"1\">\
               <column name=\"A\" type=\"Numeric\" mode=\"Numeric\" plot_designation=\"X\">\
                 <cell row=\"0\">1</cell><cell row=\"9223372036854775807\">2</cell>\
               </column>\
             </table>",
        );
        let loaded = load_str(&xml).expect("loads partially");
        assert_eq!(loaded.report.problems.len(), 1);
        assert!(loaded.report.problems[0].message.starts_with("invalid row index"));
        let column = loaded
            .root
            .find_by_path("P/T/A")
            .and_then(|aspect| aspect.as_column())
            .expect("column kept");
        assert_eq!(column.row_count(), 1);
    }

    #[test]
    fn overflowing_range_end_skips_only_its_column() {
        let xml = document(
            "<table name=\"T\" rows=\"1\" columns=\"2\">\
               <column name=\"A\" type=\"Numeric\" mode=\"Numeric\" plot_designation=\"X\">\
                 <invalid><row_range start=\"0\" end=\"18446744073709551615\"/></invalid>\
               </column>\
               <column name=\"B\" type=\"Numeric\" mode=\"Numeric\" plot_designation=\"Y\"/>\
             </table>",
        );
        let loaded = load_str(&xml).expect("loads partially");
        assert_eq!(loaded.report.problems.len(), 1);
        assert_eq!(loaded.report.problems[0].path, "P/T/A");
        assert_eq!(
            loaded.report.problems[0].message,
            "invalid or missing start/end row"
        );
        assert!(loaded.root.find_by_path("P/T/B").is_some());
    }

    #[test]
    fn oversized_tables_and_matrices_are_skipped() {
        let xml = document(
            "<table name=\"Huge\" rows=\"18446744073709551615\"/>\
             <matrix name=\"Wide\" rows=\"4294967296\" cols=\"4294967296\"/>\
             <matrix name=\"Small\" rows=\"1\" cols=\"1\"/>",
        );
        let loaded = load_str(&xml).expect("loads partially");
        let paths: Vec<&str> = loaded
            .report
            .problems
            .iter()
            .map(|issue| issue.path.as_str())
            .collect();
        assert_eq!(paths, ["P/Huge", "P/Wide"]);
        assert!(loaded.root.find_by_path("P/Small").is_some());
    }
}
