//! Formula dependency graph and cycle detection.
//!
//! # Invariants
//! - Built from the tree alone; rebuilding after any structural or formula
//!   change yields the current dependencies.
//! - `order` lists every evaluable formula column after all formula
//!   columns it reads.
//! - Columns on a cycle, or downstream of one, are never in `order`.

use crate::formula::expr::Formula;
use crate::formula::FormulaError;
use crate::model::aspect::{Aspect, AspectId, AspectType, PATH_SEPARATOR};
use std::collections::{BTreeSet, HashMap, HashSet, VecDeque};

/// Variables available to column formulas (`i` is the 1-based row).
pub const COLUMN_VARIABLES: &[&str] = &["i"];

/// A formula column and what it reads.
#[derive(Debug, Clone)]
pub struct FormulaNode {
    pub id: AspectId,
    pub table: AspectId,
    pub formula: Formula,
    /// Reference text to resolved column id.
    pub references: Vec<(String, AspectId)>,
}

#[derive(Debug, Clone, Default)]
pub struct DependencyGraph {
    nodes: HashMap<AspectId, FormulaNode>,
    order: Vec<AspectId>,
    errors: HashMap<AspectId, FormulaError>,
}

impl DependencyGraph {
    /// Parses every formula column under `root` and orders them.
    pub fn build(root: &Aspect) -> Self {
        let mut graph = Self::default();
        for table in root
            .walk()
            .into_iter()
            .filter(|aspect| aspect.aspect_type() == AspectType::Table)
        {
            let folder = root.parent_of(table.id());
            for column in table.columns() {
                let Some(data) = column.as_column() else {
                    continue;
                };
                if !data.has_formula() {
                    continue;
                }
                let path = root.path_of(column.id()).unwrap_or_default();
                match resolve(data.formula(), &path, table, folder) {
                    Ok((formula, references)) => {
                        graph.nodes.insert(
                            column.id(),
                            FormulaNode {
                                id: column.id(),
                                table: table.id(),
                                formula,
                                references,
                            },
                        );
                    }
                    Err(err) => {
                        graph.errors.insert(column.id(), err);
                    }
                }
            }
        }
        graph.order_nodes(root);
        graph
    }

    pub fn node(&self, id: AspectId) -> Option<&FormulaNode> {
        self.nodes.get(&id)
    }

    pub fn is_formula(&self, id: AspectId) -> bool {
        self.nodes.contains_key(&id) || self.errors.contains_key(&id)
    }

    /// Evaluation order of all evaluable formula columns.
    pub fn order(&self) -> &[AspectId] {
        &self.order
    }

    pub fn error(&self, id: AspectId) -> Option<&FormulaError> {
        self.errors.get(&id)
    }

    /// Distinct errors (one per cycle), in a stable order.
    pub fn errors(&self) -> Vec<FormulaError> {
        let mut unique: Vec<FormulaError> = Vec::new();
        for err in self.errors.values() {
            if !unique.contains(err) {
                unique.push(err.clone());
            }
        }
        unique.sort_by_key(|err| err.to_string());
        unique
    }

    /// Formula columns that read `id` directly or transitively.
    pub fn dependants(&self, id: AspectId) -> HashSet<AspectId> {
        let mut found = HashSet::new();
        let mut queue = VecDeque::from([id]);
        while let Some(current) = queue.pop_front() {
            for node in self.nodes.values() {
                if node.references.iter().any(|(_, dep)| *dep == current)
                    && found.insert(node.id)
                {
                    queue.push_back(node.id);
                }
            }
        }
        found
    }

    /// Kahn's algorithm over formula columns; what cannot be peeled sits on
    /// a cycle or downstream of one.
    fn order_nodes(&mut self, root: &Aspect) {
        let mut indegree: HashMap<AspectId, usize> = HashMap::new();
        let mut readers: HashMap<AspectId, Vec<AspectId>> = HashMap::new();
        let mut blocked_by_error: Vec<AspectId> = Vec::new();
        for node in self.nodes.values() {
            let mut count = 0;
            for (_, dep) in &node.references {
                if self.nodes.contains_key(dep) {
                    count += 1;
                    readers.entry(*dep).or_default().push(node.id);
                } else if self.errors.contains_key(dep) {
                    blocked_by_error.push(node.id);
                }
            }
            indegree.insert(node.id, count);
        }

        let mut ready: BTreeSet<AspectId> = indegree
            .iter()
            .filter(|(_, count)| **count == 0)
            .map(|(id, _)| *id)
            .collect();
        let mut order = Vec::with_capacity(self.nodes.len());
        while let Some(id) = ready.pop_first() {
            order.push(id);
            for reader in readers.get(&id).into_iter().flatten() {
                if let Some(count) = indegree.get_mut(reader) {
                    *count -= 1;
                    if *count == 0 {
                        ready.insert(*reader);
                    }
                }
            }
        }

        let remaining: Vec<AspectId> = self
            .nodes
            .keys()
            .filter(|id| !order.contains(id))
            .copied()
            .collect();
        self.report_cycles(root, &remaining);

        let mut blocked: HashSet<AspectId> = remaining.into_iter().collect();
        for id in blocked_by_error {
            blocked.insert(id);
            blocked.extend(self.dependants(id));
        }
        self.order = order.into_iter().filter(|id| !blocked.contains(id)).collect();
    }

    fn reaches(&self, from: AspectId, to: AspectId) -> bool {
        let mut seen = HashSet::new();
        let mut stack = vec![from];
        while let Some(current) = stack.pop() {
            let Some(node) = self.nodes.get(&current) else {
                continue;
            };
            for (_, dep) in &node.references {
                if *dep == to {
                    return true;
                }
                if seen.insert(*dep) {
                    stack.push(*dep);
                }
            }
        }
        false
    }

    fn report_cycles(&mut self, root: &Aspect, remaining: &[AspectId]) {
        let on_cycle: Vec<AspectId> = remaining
            .iter()
            .copied()
            .filter(|id| self.reaches(*id, *id))
            .collect();
        let mut assigned: HashSet<AspectId> = HashSet::new();
        for id in &on_cycle {
            if assigned.contains(id) {
                continue;
            }
            let members: Vec<AspectId> = on_cycle
                .iter()
                .copied()
                .filter(|other| other == id || (self.reaches(*id, *other) && self.reaches(*other, *id)))
                .collect();
            let mut columns: Vec<String> = members
                .iter()
                .map(|member| root.path_of(*member).unwrap_or_default())
                .collect();
            columns.sort();
            let err = FormulaError::Cycle { columns };
            for member in members {
                assigned.insert(member);
                self.errors.insert(member, err.clone());
            }
        }
        for id in remaining {
            if !assigned.contains(id) {
                let column = root.path_of(*id).unwrap_or_default();
                self.errors.insert(*id, FormulaError::UpstreamCycle { column });
            }
        }
    }
}

/// Parses a column formula and resolves its `col(...)` references.
///
/// `"name"` is a sibling column; `"Table/name"` is a column of a table in
/// the same folder.
fn resolve(
    source: &str,
    path: &str,
    table: &Aspect,
    folder: Option<&Aspect>,
) -> Result<(Formula, Vec<(String, AspectId)>), FormulaError> {
    let formula =
        Formula::parse(source, COLUMN_VARIABLES).map_err(|err| FormulaError::Syntax {
            column: path.to_string(),
            message: err.message,
            position: err.position,
        })?;
    let mut references = Vec::new();
    for reference in formula.references() {
        let target = match reference.split_once(PATH_SEPARATOR) {
            None => table.child_by_name(reference),
            Some((table_name, column_name)) => folder
                .and_then(|folder| folder.child_by_name(table_name))
                .filter(|aspect| aspect.aspect_type() == AspectType::Table)
                .and_then(|other| other.child_by_name(column_name)),
        }
        .filter(|aspect| aspect.aspect_type() == AspectType::Column);
        match target {
            Some(target) => references.push((reference.to_string(), target.id())),
            None => {
                return Err(FormulaError::UnknownColumn {
                    column: path.to_string(),
                    reference: reference.to_string(),
                })
            }
        }
    }
    Ok((formula, references))
}
