//! Tree structure commands: add, remove, rename, move, describe.
//!
//! # Invariants
//! - Every check runs before the first mutation, so a failed `apply`
//!   leaves the tree untouched.
//! - Detached subtrees are owned by the command that detached them.
//! - A collision-avoiding name is computed on the first apply; later
//!   redos reproduce the same name because the sibling set is identical.

use crate::command::{Command, CommandContext, CommandError, CommandResult, Notices};
use crate::error::StructuralError;
use crate::model::aspect::{Aspect, AspectId};
use crate::model::naming::{self, NameDiversion};
use crate::model::MAX_ROWS;
use crate::project::events::ChangeKind;
use log::info;
use std::any::Any;
use std::collections::HashSet;

/// Names of the children of `parent`, except `skip`.
fn sibling_names(parent: &Aspect, skip: Option<AspectId>) -> Vec<String> {
    parent
        .children()
        .iter()
        .filter(|child| Some(child.id()) != skip)
        .map(|child| child.name().to_string())
        .collect()
}

fn assign_name(parent: &Aspect, requested: &str, skip: Option<AspectId>) -> String {
    let taken = sibling_names(parent, skip);
    naming::unique_name(requested, taken.iter().map(String::as_str))
}

fn diversion(requested: &str, assigned: &str) -> Option<NameDiversion> {
    (requested != assigned).then(|| {
        info!(
            "event=name_diversion module=command status=ok requested={} assigned={}",
            requested, assigned
        );
        NameDiversion {
            requested: requested.to_string(),
            assigned: assigned.to_string(),
        }
    })
}

fn check_accepts(parent: &Aspect, child: &Aspect) -> Result<(), StructuralError> {
    if !parent.aspect_type().is_container() {
        return Err(StructuralError::NotAContainer(parent.id()));
    }
    if !parent.aspect_type().accepts(child.aspect_type()) {
        return Err(StructuralError::IllegalChild {
            parent: parent.aspect_type(),
            child: child.aspect_type(),
        });
    }
    Ok(())
}

/// Checks an incoming subtree against the tree it joins: every nested
/// parent/child pair must be legal, nested names valid, sizes within limits
/// and no id may already be present.
fn check_subtree(root: &Aspect, child: &Aspect) -> Result<(), StructuralError> {
    let mut ids: HashSet<AspectId> = root.walk().into_iter().map(Aspect::id).collect();
    for aspect in child.walk() {
        if !ids.insert(aspect.id()) {
            return Err(StructuralError::DuplicateId(aspect.id()));
        }
        if aspect.id() != child.id() {
            naming::validate(aspect.name())?;
        }
        for nested in aspect.children() {
            check_accepts(aspect, nested)?;
        }
        let rows = aspect
            .as_table()
            .map(|table| table.row_count())
            .or_else(|| aspect.as_column().map(|column| column.row_count()))
            .unwrap_or(0);
        if rows > MAX_ROWS {
            return Err(StructuralError::SizeLimit {
                requested: rows,
                limit: MAX_ROWS,
            });
        }
    }
    Ok(())
}

/// Renames nested children that collide with an earlier sibling. Returns
/// the diversions, outermost first.
fn divert_nested_names(aspect: &mut Aspect) -> Vec<NameDiversion> {
    let mut diversions = Vec::new();
    let mut taken: Vec<String> = Vec::with_capacity(aspect.children().len());
    for child in aspect.children_mut() {
        let requested = child.name().to_string();
        let assigned = naming::unique_name(&requested, taken.iter().map(String::as_str));
        if let Some(diverted) = diversion(&requested, &assigned) {
            child.set_name(assigned.clone());
            diversions.push(diverted);
        }
        taken.push(assigned);
    }
    for child in aspect.children_mut() {
        diversions.extend(divert_nested_names(child));
    }
    diversions
}

fn check_position(position: Option<usize>, len: usize) -> Result<usize, StructuralError> {
    match position {
        None => Ok(len),
        Some(position) if position <= len => Ok(position),
        Some(position) => Err(StructuralError::PositionOutOfRange { position, len }),
    }
}

/// Inserts a new child (possibly a whole subtree).
#[derive(Debug)]
pub struct AddChild {
    parent: AspectId,
    child_id: AspectId,
    position: Option<usize>,
    inserted_at: usize,
    /// Present while the child is not in the tree.
    detached: Option<Aspect>,
    diversion: Option<NameDiversion>,
    label: String,
}

impl AddChild {
    pub fn new(parent: AspectId, child: Aspect, position: Option<usize>) -> Self {
        Self {
            parent,
            child_id: child.id(),
            position,
            inserted_at: 0,
            label: format!("add {}", child.name()),
            detached: Some(child),
            diversion: None,
        }
    }

    pub fn child_id(&self) -> AspectId {
        self.child_id
    }
}

impl Command for AddChild {
    fn description(&self) -> String {
        self.label.clone()
    }

    fn apply(&mut self, ctx: &mut CommandContext<'_>) -> CommandResult<()> {
        let child = self
            .detached
            .as_ref()
            .ok_or(CommandError::TargetMissing(self.child_id))?;
        let requested = naming::validate(child.name())?;
        let parent = ctx.aspect(self.parent)?;
        check_accepts(parent, child)?;
        check_subtree(ctx.root(), child)?;
        let position = check_position(self.position, parent.children().len())?;
        let assigned = assign_name(parent, &requested, None);
        let parent_name = parent.name().to_string();

        let mut child = self
            .detached
            .take()
            .ok_or(CommandError::TargetMissing(self.child_id))?;
        if self.diversion.is_none() {
            self.diversion = diversion(&requested, &assigned);
        }
        divert_nested_names(&mut child);
        self.label = format!("{parent_name}: add {assigned}");
        child.set_name(assigned);
        self.inserted_at = ctx.aspect_mut(self.parent)?.insert_child(position, child);
        ctx.emit(ChangeKind::AspectAdded, self.child_id);
        Ok(())
    }

    fn invert(&mut self, ctx: &mut CommandContext<'_>) -> CommandResult<()> {
        let path = ctx.root().path_of(self.child_id).unwrap_or_default();
        let (_, child) = ctx
            .aspect_mut(self.parent)?
            .take_child(self.child_id)
            .ok_or(CommandError::TargetMissing(self.child_id))?;
        self.detached = Some(child);
        ctx.emit_with_path(ChangeKind::AspectRemoved, self.child_id, path);
        Ok(())
    }

    fn footprint(&self) -> usize {
        self.detached.as_ref().map_or(0, Aspect::footprint)
    }

    fn notices(&self) -> Notices {
        Notices {
            diversion: self.diversion.clone(),
            cell_errors: Vec::new(),
        }
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Detaches a child; the command owns the subtree until evicted.
#[derive(Debug)]
pub struct RemoveChild {
    child_id: AspectId,
    parent: Option<AspectId>,
    position: usize,
    detached: Option<Aspect>,
    label: String,
}

impl RemoveChild {
    pub fn new(child_id: AspectId) -> Self {
        Self {
            child_id,
            parent: None,
            position: 0,
            detached: None,
            label: "remove aspect".to_string(),
        }
    }
}

impl Command for RemoveChild {
    fn description(&self) -> String {
        self.label.clone()
    }

    fn apply(&mut self, ctx: &mut CommandContext<'_>) -> CommandResult<()> {
        if ctx.root().id() == self.child_id {
            return Err(StructuralError::RootImmutable.into());
        }
        let parent = ctx
            .root()
            .parent_of(self.child_id)
            .ok_or(StructuralError::AspectNotFound(self.child_id))?;
        let parent_id = parent.id();
        let parent_name = parent.name().to_string();
        let path = ctx.root().path_of(self.child_id).unwrap_or_default();

        let (position, child) = ctx
            .aspect_mut(parent_id)?
            .take_child(self.child_id)
            .ok_or(CommandError::TargetMissing(self.child_id))?;
        self.label = format!("{parent_name}: remove {}", child.name());
        self.parent = Some(parent_id);
        self.position = position;
        self.detached = Some(child);
        ctx.emit_with_path(ChangeKind::AspectRemoved, self.child_id, path);
        Ok(())
    }

    fn invert(&mut self, ctx: &mut CommandContext<'_>) -> CommandResult<()> {
        let parent_id = self
            .parent
            .ok_or(CommandError::TargetMissing(self.child_id))?;
        ctx.aspect(parent_id)?;
        let child = self
            .detached
            .take()
            .ok_or(CommandError::TargetMissing(self.child_id))?;
        ctx.aspect_mut(parent_id)?.insert_child(self.position, child);
        ctx.emit(ChangeKind::AspectAdded, self.child_id);
        Ok(())
    }

    fn footprint(&self) -> usize {
        self.detached.as_ref().map_or(0, Aspect::footprint)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Renames an aspect, diverting to a unique name on collision.
#[derive(Debug)]
pub struct Rename {
    id: AspectId,
    requested: String,
    previous: Option<String>,
    diversion: Option<NameDiversion>,
    label: String,
}

impl Rename {
    pub fn new(id: AspectId, name: impl Into<String>) -> Self {
        let requested = name.into();
        Self {
            id,
            label: format!("rename to {requested}"),
            requested,
            previous: None,
            diversion: None,
        }
    }
}

impl Command for Rename {
    fn description(&self) -> String {
        self.label.clone()
    }

    fn apply(&mut self, ctx: &mut CommandContext<'_>) -> CommandResult<()> {
        let requested = naming::validate(&self.requested)?;
        let aspect = ctx.aspect(self.id)?;
        let requested = naming::escape_for(aspect.aspect_type(), &requested);
        let old_name = aspect.name().to_string();
        let assigned = match ctx.root().parent_of(self.id) {
            Some(parent) => assign_name(parent, &requested, Some(self.id)),
            None => requested.clone(),
        };

        if self.diversion.is_none() {
            self.diversion = diversion(&requested, &assigned);
        }
        self.label = format!("{old_name}: rename to {assigned}");
        self.previous = Some(old_name);
        ctx.aspect_mut(self.id)?.set_name(assigned);
        ctx.emit(ChangeKind::AspectRenamed, self.id);
        Ok(())
    }

    fn invert(&mut self, ctx: &mut CommandContext<'_>) -> CommandResult<()> {
        let previous = self
            .previous
            .clone()
            .ok_or(CommandError::TargetMissing(self.id))?;
        ctx.aspect_mut(self.id)?.set_name(previous);
        ctx.emit(ChangeKind::AspectRenamed, self.id);
        Ok(())
    }

    fn notices(&self) -> Notices {
        Notices {
            diversion: self.diversion.clone(),
            cell_errors: Vec::new(),
        }
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Moves an aspect to a new parent (or position), renaming on collision.
#[derive(Debug)]
pub struct Move {
    id: AspectId,
    new_parent: AspectId,
    position: Option<usize>,
    old_parent: Option<AspectId>,
    old_position: usize,
    old_name: String,
    diversion: Option<NameDiversion>,
    label: String,
}

impl Move {
    pub fn new(id: AspectId, new_parent: AspectId, position: Option<usize>) -> Self {
        Self {
            id,
            new_parent,
            position,
            old_parent: None,
            old_position: 0,
            old_name: String::new(),
            diversion: None,
            label: "move aspect".to_string(),
        }
    }
}

impl Command for Move {
    fn description(&self) -> String {
        self.label.clone()
    }

    fn apply(&mut self, ctx: &mut CommandContext<'_>) -> CommandResult<()> {
        let root = ctx.root();
        if root.id() == self.id {
            return Err(StructuralError::RootImmutable.into());
        }
        let aspect = root
            .find(self.id)
            .ok_or(StructuralError::AspectNotFound(self.id))?;
        if aspect.contains(self.new_parent) {
            return Err(StructuralError::MoveIntoDescendant {
                aspect: self.id,
                target: self.new_parent,
            }
            .into());
        }
        let new_parent = root
            .find(self.new_parent)
            .ok_or(StructuralError::AspectNotFound(self.new_parent))?;
        check_accepts(new_parent, aspect)?;
        let old_parent = root
            .parent_of(self.id)
            .ok_or(StructuralError::AspectNotFound(self.id))?;
        let old_parent_id = old_parent.id();
        let old_position = old_parent
            .position_of(self.id)
            .ok_or(CommandError::TargetMissing(self.id))?;
        let remaining = if old_parent_id == self.new_parent {
            new_parent.children().len() - 1
        } else {
            new_parent.children().len()
        };
        let position = check_position(self.position, remaining)?;
        let old_name = aspect.name().to_string();
        let assigned = assign_name(new_parent, &old_name, Some(self.id));
        let new_parent_name = new_parent.name().to_string();

        let (_, mut moved) = ctx
            .aspect_mut(old_parent_id)?
            .take_child(self.id)
            .ok_or(CommandError::TargetMissing(self.id))?;
        if self.diversion.is_none() {
            self.diversion = diversion(&old_name, &assigned);
        }
        self.label = format!("{old_name}: move to {new_parent_name}");
        moved.set_name(assigned);
        ctx.aspect_mut(self.new_parent)?.insert_child(position, moved);
        self.old_parent = Some(old_parent_id);
        self.old_position = old_position;
        self.old_name = old_name;
        ctx.emit(ChangeKind::AspectMoved, self.id);
        Ok(())
    }

    fn invert(&mut self, ctx: &mut CommandContext<'_>) -> CommandResult<()> {
        let old_parent = self.old_parent.ok_or(CommandError::TargetMissing(self.id))?;
        ctx.aspect(old_parent)?;
        let (_, mut moved) = ctx
            .aspect_mut(self.new_parent)?
            .take_child(self.id)
            .ok_or(CommandError::TargetMissing(self.id))?;
        moved.set_name(self.old_name.clone());
        ctx.aspect_mut(old_parent)?
            .insert_child(self.old_position, moved);
        ctx.emit(ChangeKind::AspectMoved, self.id);
        Ok(())
    }

    fn notices(&self) -> Notices {
        Notices {
            diversion: self.diversion.clone(),
            cell_errors: Vec::new(),
        }
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Which descriptive text a `SetDescription` edits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DescriptionField {
    Comment,
    CaptionSpec,
}

/// Sets the comment or caption spec of an aspect.
#[derive(Debug)]
pub struct SetDescription {
    id: AspectId,
    field: DescriptionField,
    value: String,
    previous: Option<String>,
    label: String,
}

impl SetDescription {
    pub fn new(id: AspectId, field: DescriptionField, value: impl Into<String>) -> Self {
        Self {
            id,
            field,
            value: value.into(),
            previous: None,
            label: "change description".to_string(),
        }
    }

    fn write(&self, aspect: &mut Aspect, value: String) {
        match self.field {
            DescriptionField::Comment => aspect.set_comment(value),
            DescriptionField::CaptionSpec => aspect.set_caption_spec(value),
        }
    }
}

impl Command for SetDescription {
    fn description(&self) -> String {
        self.label.clone()
    }

    fn apply(&mut self, ctx: &mut CommandContext<'_>) -> CommandResult<()> {
        let aspect = ctx.aspect(self.id)?;
        let (previous, what) = match self.field {
            DescriptionField::Comment => (aspect.comment().to_string(), "comment"),
            DescriptionField::CaptionSpec => (aspect.caption_spec().to_string(), "caption"),
        };
        self.label = format!("{}: set {what}", aspect.name());
        self.previous = Some(previous);
        let value = self.value.clone();
        let aspect = ctx.aspect_mut(self.id)?;
        self.write(aspect, value);
        ctx.emit(ChangeKind::DescriptionChanged, self.id);
        Ok(())
    }

    fn invert(&mut self, ctx: &mut CommandContext<'_>) -> CommandResult<()> {
        let previous = self
            .previous
            .clone()
            .ok_or(CommandError::TargetMissing(self.id))?;
        let aspect = ctx.aspect_mut(self.id)?;
        self.write(aspect, previous);
        ctx.emit(ChangeKind::DescriptionChanged, self.id);
        Ok(())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

#[cfg(test)]
mod tests {
    use super::{AddChild, Move, RemoveChild, Rename};
    use crate::command::{CommandContext, CommandError, CommandStack};
    use crate::error::StructuralError;
    use crate::model::aspect::Aspect;
    use crate::model::column::Column;
    use crate::model::mode::ColumnMode;
    use crate::model::MAX_ROWS;

    #[test]
    fn add_child_diverts_colliding_name_and_keeps_it_on_redo() {
        let mut root = Aspect::project("P").with_child(Aspect::folder("F"));
        let folder = root.children()[0].id();
        let mut events = Vec::new();
        let mut stack = CommandStack::default();
        let mut ctx = CommandContext::new(&mut root, &mut events);

        stack
            .push(
                Box::new(AddChild::new(folder, Aspect::table("T1", 1, 1), None)),
                &mut ctx,
            )
            .expect("first table");
        let second = AddChild::new(folder, Aspect::table("T1", 1, 1), None);
        let second_id = second.child_id();
        stack.push(Box::new(second), &mut ctx).expect("second table");
        let diversion = stack.last_notices().diversion.expect("collision diverted");
        assert_eq!(diversion.assigned, "T1 2");

        stack.undo(&mut ctx).expect("undo");
        assert!(ctx.root().find(second_id).is_none());
        stack.redo(&mut ctx).expect("redo");
        let restored = ctx.root().find(second_id).expect("restored");
        assert_eq!(restored.name(), "T1 2");
    }

    #[test]
    fn adding_an_aspect_already_in_the_tree_is_rejected() {
        let mut root = Aspect::project("P");
        let project = root.id();
        let table = Aspect::table("T", 1, 1);
        let copy = table.clone();
        let mut events = Vec::new();
        let mut stack = CommandStack::default();
        let mut ctx = CommandContext::new(&mut root, &mut events);

        stack
            .push(Box::new(AddChild::new(project, table, None)), &mut ctx)
            .expect("first add");
        let after_first = ctx.root().clone();
        let err = stack
            .push(Box::new(AddChild::new(project, copy, None)), &mut ctx)
            .expect_err("same id twice");
        assert!(matches!(
            err,
            CommandError::Structural(StructuralError::DuplicateId(_))
        ));
        assert_eq!(ctx.root(), &after_first);

        stack.undo(&mut ctx).expect("undo first add");
        assert!(ctx.root().children().is_empty());
    }

    #[test]
    fn nested_subtree_is_checked_and_its_names_diverted() {
        let mut root = Aspect::project("P");
        let project = root.id();
        let before = root.clone();
        let mut events = Vec::new();
        let mut stack = CommandStack::default();
        let mut ctx = CommandContext::new(&mut root, &mut events);

        let column = Aspect::column("C", Column::new(ColumnMode::Numeric));
        let illegal = Aspect::folder("F").with_child(column);
        let err = stack
            .push(Box::new(AddChild::new(project, illegal, None)), &mut ctx)
            .expect_err("folders hold no columns");
        assert!(matches!(
            err,
            CommandError::Structural(StructuralError::IllegalChild { .. })
        ));
        assert_eq!(ctx.root(), &before);

        let subtree = Aspect::folder("F")
            .with_child(Aspect::folder("X"))
            .with_child(Aspect::folder("X").with_child(Aspect::table("T", 0, 0)));
        stack
            .push(Box::new(AddChild::new(project, subtree, None)), &mut ctx)
            .expect("valid subtree");
        let names: Vec<&str> = ctx.root().children()[0]
            .children()
            .iter()
            .map(Aspect::name)
            .collect();
        assert_eq!(names, ["X", "X 2"]);
        assert!(ctx.root().find_by_path("P/F/X 2/T").is_some());

        stack.undo(&mut ctx).expect("undo");
        stack.redo(&mut ctx).expect("redo");
        assert!(ctx.root().find_by_path("P/F/X 2/T").is_some());
    }

    #[test]
    fn oversized_table_is_rejected() {
        let mut root = Aspect::project("P");
        let project = root.id();
        let mut events = Vec::new();
        let mut stack = CommandStack::default();
        let mut ctx = CommandContext::new(&mut root, &mut events);

        let err = stack
            .push(
                Box::new(AddChild::new(project, Aspect::table("T", MAX_ROWS + 1, 0), None)),
                &mut ctx,
            )
            .expect_err("too many rows");
        assert!(matches!(
            err,
            CommandError::Structural(StructuralError::SizeLimit { .. })
        ));
    }

    #[test]
    fn illegal_child_is_rejected_without_mutation() {
        let mut root = Aspect::project("P").with_child(Aspect::table("T", 1, 1));
        let table = root.children()[0].id();
        let before = root.clone();
        let mut events = Vec::new();
        let mut stack = CommandStack::default();
        let mut ctx = CommandContext::new(&mut root, &mut events);

        let err = stack
            .push(
                Box::new(AddChild::new(table, Aspect::folder("X"), None)),
                &mut ctx,
            )
            .expect_err("tables hold columns only");
        assert!(matches!(
            err,
            CommandError::Structural(StructuralError::IllegalChild { .. })
        ));
        assert_eq!(ctx.root(), &before);
        assert!(!stack.can_undo());
    }

    #[test]
    fn move_into_descendant_is_rejected() {
        let mut root = Aspect::project("P")
            .with_child(Aspect::folder("A").with_child(Aspect::folder("B")));
        let a = root.children()[0].id();
        let b = root.children()[0].children()[0].id();
        let mut events = Vec::new();
        let mut stack = CommandStack::default();
        let mut ctx = CommandContext::new(&mut root, &mut events);

        let err = stack
            .push(Box::new(Move::new(a, b, None)), &mut ctx)
            .expect_err("cycle");
        assert!(err.to_string().contains("cannot move into self/child"));
        let err = stack
            .push(Box::new(Move::new(a, a, None)), &mut ctx)
            .expect_err("self");
        assert!(matches!(
            err,
            CommandError::Structural(StructuralError::MoveIntoDescendant { .. })
        ));
    }

    #[test]
    fn move_and_remove_invert_exactly() {
        let mut root = Aspect::project("P")
            .with_child(Aspect::folder("A").with_child(Aspect::table("T", 2, 2)))
            .with_child(Aspect::folder("B").with_child(Aspect::table("T", 1, 1)));
        let before = root.clone();
        let table = root.children()[0].children()[0].id();
        let b = root.children()[1].id();
        let mut events = Vec::new();
        let mut stack = CommandStack::default();
        let mut ctx = CommandContext::new(&mut root, &mut events);

        stack
            .push(Box::new(Move::new(table, b, Some(0))), &mut ctx)
            .expect("move");
        assert_eq!(ctx.root().children()[1].children()[0].name(), "T 2");
        stack
            .push(Box::new(RemoveChild::new(b)), &mut ctx)
            .expect("remove");
        stack
            .push(Box::new(Rename::new(ctx.root().id(), "Renamed")), &mut ctx)
            .expect("rename root");

        for _ in 0..3 {
            stack.undo(&mut ctx).expect("undo");
        }
        assert_eq!(ctx.root(), &before);
    }

    #[test]
    fn rename_rejects_blank_and_separator() {
        let mut root = Aspect::project("P");
        let id = root.id();
        let mut events = Vec::new();
        let mut stack = CommandStack::default();
        let mut ctx = CommandContext::new(&mut root, &mut events);
        assert!(stack.push(Box::new(Rename::new(id, " ")), &mut ctx).is_err());
        assert!(stack.push(Box::new(Rename::new(id, "a/b")), &mut ctx).is_err());
        assert_eq!(ctx.root().name(), "P");
    }
}
