//! Aspect tree node model.
//!
//! # Responsibility
//! - Define the closed set of aspect kinds and the owning tree node.
//! - Resolve ids and `/`-separated paths to nodes.
//!
//! # Invariants
//! - `children` is exclusively owned; an aspect appears once in the tree.
//! - Only containers have children, and only of accepted kinds.
//! - Creation time is UTC truncated to milliseconds so it survives a
//!   save/load round trip unchanged.
//!
//! # See also
//! - `crate::model::naming` for sibling naming rules.

use crate::model::column::Column;
use crate::model::matrix::Matrix;
use crate::model::naming::{self, DEFAULT_ASPECT_NAME};
use crate::model::table::Table;
use chrono::{DateTime, SubsecRound, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Stable aspect identifier, persisted in project files.
pub type AspectId = Uuid;

/// Separator between names in an aspect path.
pub const PATH_SEPARATOR: char = '/';

/// Caption layout: name, then ` - comment` when a comment exists.
pub const DEFAULT_CAPTION_SPEC: &str = "%n%C{ - }%c";

/// Kind tag of an aspect.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AspectType {
    Project,
    Folder,
    Table,
    Matrix,
    Column,
}

impl AspectType {
    /// Element name used in project files.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Project => "project",
            Self::Folder => "folder",
            Self::Table => "table",
            Self::Matrix => "matrix",
            Self::Column => "column",
        }
    }

    pub fn is_container(self) -> bool {
        matches!(self, Self::Project | Self::Folder | Self::Table)
    }

    /// Returns whether an aspect of this kind may own a `child` aspect.
    pub fn accepts(self, child: AspectType) -> bool {
        match self {
            Self::Project | Self::Folder => {
                matches!(child, Self::Folder | Self::Table | Self::Matrix)
            }
            Self::Table => child == Self::Column,
            Self::Matrix | Self::Column => false,
        }
    }
}

/// Kind-specific payload of an aspect.
#[derive(Debug, Clone, PartialEq)]
pub enum AspectKind {
    Project,
    Folder,
    Table(Table),
    Matrix(Matrix),
    Column(Column),
}

impl AspectKind {
    pub fn aspect_type(&self) -> AspectType {
        match self {
            Self::Project => AspectType::Project,
            Self::Folder => AspectType::Folder,
            Self::Table(_) => AspectType::Table,
            Self::Matrix(_) => AspectType::Matrix,
            Self::Column(_) => AspectType::Column,
        }
    }
}

/// One node of the project tree.
#[derive(Debug, Clone, PartialEq)]
pub struct Aspect {
    id: AspectId,
    name: String,
    comment: String,
    caption_spec: String,
    creation_time: DateTime<Utc>,
    kind: AspectKind,
    children: Vec<Aspect>,
}

/// Current time at the precision creation times are stored with.
pub fn now_millis() -> DateTime<Utc> {
    Utc::now().trunc_subsecs(3)
}

impl Aspect {
    /// Creates a fresh aspect; blank names become `"Unnamed"` and table or
    /// matrix names are escaped.
    pub fn new(name: impl Into<String>, kind: AspectKind) -> Self {
        let name = name.into();
        let trimmed = name.trim();
        let name = if trimmed.is_empty() {
            DEFAULT_ASPECT_NAME.to_string()
        } else {
            naming::escape_for(kind.aspect_type(), trimmed)
        };
        Self {
            id: Uuid::new_v4(),
            name,
            comment: String::new(),
            caption_spec: DEFAULT_CAPTION_SPEC.to_string(),
            creation_time: now_millis(),
            kind,
            children: Vec::new(),
        }
    }

    pub fn project(name: impl Into<String>) -> Self {
        Self::new(name, AspectKind::Project)
    }

    pub fn folder(name: impl Into<String>) -> Self {
        Self::new(name, AspectKind::Folder)
    }

    pub fn column(name: impl Into<String>, column: Column) -> Self {
        Self::new(name, AspectKind::Column(column))
    }

    pub fn matrix(name: impl Into<String>, matrix: Matrix) -> Self {
        Self::new(name, AspectKind::Matrix(matrix))
    }

    /// Table with `columns` default numeric columns named `1..=columns`;
    /// the first is designated X, the rest Y.
    pub fn table(name: impl Into<String>, rows: usize, columns: usize) -> Self {
        let mut table = Self::new(name, AspectKind::Table(Table::new(rows)));
        table.children = Table::default_columns(columns);
        table
    }

    /// Rebuilds an aspect from persisted attributes without renaming it.
    pub(crate) fn from_parts(
        id: AspectId,
        name: String,
        comment: String,
        caption_spec: String,
        creation_time: DateTime<Utc>,
        kind: AspectKind,
    ) -> Self {
        Self {
            id,
            name,
            comment,
            caption_spec,
            creation_time,
            kind,
            children: Vec::new(),
        }
    }

    pub fn with_comment(mut self, comment: impl Into<String>) -> Self {
        self.comment = comment.into();
        self
    }

    /// Builder for assembling trees outside the command layer, e.g. for
    /// analysis results passed to `Project::add_child`.
    pub fn with_child(mut self, child: Aspect) -> Self {
        self.children.push(child);
        self
    }

    pub fn id(&self) -> AspectId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn comment(&self) -> &str {
        &self.comment
    }

    pub fn caption_spec(&self) -> &str {
        &self.caption_spec
    }

    pub fn creation_time(&self) -> DateTime<Utc> {
        self.creation_time
    }

    pub fn kind(&self) -> &AspectKind {
        &self.kind
    }

    pub fn aspect_type(&self) -> AspectType {
        self.kind.aspect_type()
    }

    pub fn children(&self) -> &[Aspect] {
        &self.children
    }

    pub fn child_by_name(&self, name: &str) -> Option<&Aspect> {
        self.children.iter().find(|child| child.name == name)
    }

    pub fn position_of(&self, child: AspectId) -> Option<usize> {
        self.children.iter().position(|aspect| aspect.id == child)
    }

    pub fn as_column(&self) -> Option<&Column> {
        match &self.kind {
            AspectKind::Column(column) => Some(column),
            _ => None,
        }
    }

    pub fn as_table(&self) -> Option<&Table> {
        match &self.kind {
            AspectKind::Table(table) => Some(table),
            _ => None,
        }
    }

    pub fn as_matrix(&self) -> Option<&Matrix> {
        match &self.kind {
            AspectKind::Matrix(matrix) => Some(matrix),
            _ => None,
        }
    }

    /// Column children of a table, in order.
    pub fn columns(&self) -> impl Iterator<Item = &Aspect> {
        self.children
            .iter()
            .filter(|child| child.aspect_type() == AspectType::Column)
    }

    /// Rows of a table: its declared row count or its longest column.
    pub fn table_row_count(&self) -> Option<usize> {
        let table = self.as_table()?;
        let longest = self
            .columns()
            .filter_map(|child| child.as_column().map(Column::row_count))
            .max()
            .unwrap_or(0);
        Some(table.row_count().max(longest))
    }

    /// Expands the caption spec: `%n` name, `%c` comment, `%C{text}` text
    /// shown only when the comment is not empty, `%%` a literal percent.
    pub fn caption(&self) -> String {
        let mut out = String::new();
        let mut chars = self.caption_spec.chars().peekable();
        while let Some(c) = chars.next() {
            if c != '%' {
                out.push(c);
                continue;
            }
            match chars.next() {
                Some('n') => out.push_str(&self.name),
                Some('c') => out.push_str(&self.comment),
                Some('C') if chars.peek() == Some(&'{') => {
                    chars.next();
                    let text: String = chars.by_ref().take_while(|c| *c != '}').collect();
                    if !self.comment.is_empty() {
                        out.push_str(&text);
                    }
                }
                Some('%') => out.push('%'),
                Some(other) => {
                    out.push('%');
                    out.push(other);
                }
                None => out.push('%'),
            }
        }
        out
    }

    /// Finds `id` in this subtree, including `self`.
    pub fn find(&self, id: AspectId) -> Option<&Aspect> {
        if self.id == id {
            return Some(self);
        }
        self.children.iter().find_map(|child| child.find(id))
    }

    pub(crate) fn find_mut(&mut self, id: AspectId) -> Option<&mut Aspect> {
        if self.id == id {
            return Some(self);
        }
        self.children.iter_mut().find_map(|child| child.find_mut(id))
    }

    /// Returns whether `id` is `self` or one of its descendants.
    pub fn contains(&self, id: AspectId) -> bool {
        self.find(id).is_some()
    }

    /// Parent of `id` within this subtree.
    pub fn parent_of(&self, id: AspectId) -> Option<&Aspect> {
        if self.children.iter().any(|child| child.id == id) {
            return Some(self);
        }
        self.children.iter().find_map(|child| child.parent_of(id))
    }

    /// Path of `id` starting with this aspect's name.
    pub fn path_of(&self, id: AspectId) -> Option<String> {
        let mut names = Vec::new();
        if !self.collect_path(id, &mut names) {
            return None;
        }
        Some(names.join(&PATH_SEPARATOR.to_string()))
    }

    fn collect_path<'a>(&'a self, id: AspectId, names: &mut Vec<&'a str>) -> bool {
        names.push(&self.name);
        if self.id == id {
            return true;
        }
        for child in &self.children {
            if child.collect_path(id, names) {
                return true;
            }
        }
        names.pop();
        false
    }

    /// Resolves a path whose first segment names this aspect.
    pub fn find_by_path(&self, path: &str) -> Option<&Aspect> {
        let mut segments = path
            .trim_matches(PATH_SEPARATOR)
            .split(PATH_SEPARATOR)
            .map(str::trim);
        if segments.next()? != self.name {
            return None;
        }
        segments.try_fold(self, |current, segment| current.child_by_name(segment))
    }

    /// Depth-first pre-order walk of this subtree.
    pub fn walk(&self) -> Vec<&Aspect> {
        let mut out = Vec::new();
        let mut stack = vec![self];
        while let Some(aspect) = stack.pop() {
            out.push(aspect);
            stack.extend(aspect.children.iter().rev());
        }
        out
    }

    pub(crate) fn set_name(&mut self, name: String) {
        self.name = name;
    }

    pub(crate) fn set_comment(&mut self, comment: String) {
        self.comment = comment;
    }

    pub(crate) fn set_caption_spec(&mut self, caption_spec: String) {
        self.caption_spec = caption_spec;
    }

    pub(crate) fn kind_mut(&mut self) -> &mut AspectKind {
        &mut self.kind
    }

    pub(crate) fn as_column_mut(&mut self) -> Option<&mut Column> {
        match &mut self.kind {
            AspectKind::Column(column) => Some(column),
            _ => None,
        }
    }

    pub(crate) fn as_table_mut(&mut self) -> Option<&mut Table> {
        match &mut self.kind {
            AspectKind::Table(table) => Some(table),
            _ => None,
        }
    }

    pub(crate) fn as_matrix_mut(&mut self) -> Option<&mut Matrix> {
        match &mut self.kind {
            AspectKind::Matrix(matrix) => Some(matrix),
            _ => None,
        }
    }

    pub(crate) fn children_mut(&mut self) -> &mut Vec<Aspect> {
        &mut self.children
    }

    /// Inserts at `position`, clamped to the end.
    pub(crate) fn insert_child(&mut self, position: usize, child: Aspect) -> usize {
        let position = position.min(self.children.len());
        self.children.insert(position, child);
        position
    }

    pub(crate) fn take_child(&mut self, id: AspectId) -> Option<(usize, Aspect)> {
        let position = self.position_of(id)?;
        Some((position, self.children.remove(position)))
    }

    /// Approximate bytes owned by this subtree.
    pub fn footprint(&self) -> usize {
        let own = std::mem::size_of::<Aspect>()
            + self.name.len()
            + self.comment.len()
            + self.caption_spec.len()
            + match &self.kind {
                AspectKind::Column(column) => column.footprint(),
                AspectKind::Matrix(matrix) => matrix.footprint(),
                _ => 0,
            };
        own + self.children.iter().map(Aspect::footprint).sum::<usize>()
    }
}

#[cfg(test)]
mod tests {
    use super::{Aspect, AspectType};

    fn sample_tree() -> Aspect {
        Aspect::project("Project").with_child(
            Aspect::folder("F")
                .with_child(Aspect::table("T1", 10, 2))
                .with_child(Aspect::folder("Sub")),
        )
    }

    #[test]
    fn kinds_accept_only_allowed_children() {
        assert!(AspectType::Folder.accepts(AspectType::Table));
        assert!(AspectType::Table.accepts(AspectType::Column));
        assert!(!AspectType::Table.accepts(AspectType::Folder));
        assert!(!AspectType::Folder.accepts(AspectType::Project));
        assert!(!AspectType::Matrix.is_container());
    }

    #[test]
    fn paths_resolve_both_ways() {
        let tree = sample_tree();
        let column = tree
            .find_by_path("Project/F/T1/2")
            .expect("column path should resolve");
        assert_eq!(column.aspect_type(), AspectType::Column);
        assert_eq!(
            tree.path_of(column.id()).as_deref(),
            Some("Project/F/T1/2")
        );
        assert!(tree.find_by_path("Project/F/missing").is_none());
        assert!(tree.find_by_path("Other/F").is_none());
    }

    #[test]
    fn parent_lookup_and_walk_order() {
        let tree = sample_tree();
        let table = tree.find_by_path("Project/F/T1").expect("table");
        let folder = tree.parent_of(table.id()).expect("parent");
        assert_eq!(folder.name(), "F");
        let names: Vec<&str> = tree.walk().iter().map(|aspect| aspect.name()).collect();
        assert_eq!(names, vec!["Project", "F", "T1", "1", "2", "Sub"]);
    }

    #[test]
    fn blank_names_and_table_underscores_are_normalized() {
        assert_eq!(Aspect::folder("  ").name(), "Unnamed");
        assert_eq!(Aspect::table("raw_data", 0, 0).name(), "raw-data");
        assert_eq!(Aspect::folder("raw_data").name(), "raw_data");
    }

    #[test]
    fn caption_shows_comment_suffix_only_when_present() {
        let bare = Aspect::folder("Data");
        assert_eq!(bare.caption(), "Data");
        let commented = Aspect::folder("Data").with_comment("raw");
        assert_eq!(commented.caption(), "Data - raw");
    }
}
