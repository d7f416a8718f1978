//! Undo/redo command engine.
//!
//! # Responsibility
//! - Define the reversible `Command` contract and the context it runs in.
//! - Keep a linear undo/redo history with merge, depth and memory limits.
//!
//! # Invariants
//! - A command is pushed only after `apply` fully succeeded.
//! - A failed `apply`/`invert` leaves the tree unchanged.
//! - Pushing a new command clears the redo stack.
//! - `invert` after `apply` restores bit-identical state.
//!
//! # See also
//! - `crate::project::Project`, the only public caller.

pub mod aspect_cmds;
pub mod column_cmds;
pub mod matrix_cmds;
pub mod table_cmds;

use crate::error::{CellError, StructuralError, TypeError};
use crate::model::aspect::{Aspect, AspectId};
use crate::model::column::Column;
use crate::model::matrix::Matrix;
use crate::model::naming::NameDiversion;
use crate::project::events::{ChangeEvent, ChangeKind};
use log::{debug, info, warn};
use std::any::Any;
use std::error::Error;
use std::fmt::{Debug, Display, Formatter};
use std::time::{Duration, Instant};

/// Command execution failure; nothing was mutated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommandError {
    Structural(StructuralError),
    Type(TypeError),
    /// Target aspect no longer exists or has the wrong kind.
    TargetMissing(AspectId),
    NothingToUndo,
    NothingToRedo,
}

impl Display for CommandError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Structural(err) => write!(f, "{err}"),
            Self::Type(err) => write!(f, "{err}"),
            Self::TargetMissing(id) => write!(f, "command target missing: {id}"),
            Self::NothingToUndo => write!(f, "nothing to undo"),
            Self::NothingToRedo => write!(f, "nothing to redo"),
        }
    }
}

impl Error for CommandError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Structural(err) => Some(err),
            Self::Type(err) => Some(err),
            _ => None,
        }
    }
}

impl From<StructuralError> for CommandError {
    fn from(value: StructuralError) -> Self {
        Self::Structural(value)
    }
}

impl From<TypeError> for CommandError {
    fn from(value: TypeError) -> Self {
        Self::Type(value)
    }
}

pub type CommandResult<T> = Result<T, CommandError>;

/// Side information a command reports after applying.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Notices {
    pub diversion: Option<NameDiversion>,
    pub cell_errors: Vec<CellError>,
}

/// Mutable view of the tree handed to commands.
pub struct CommandContext<'a> {
    root: &'a mut Aspect,
    events: &'a mut Vec<ChangeEvent>,
}

impl<'a> CommandContext<'a> {
    pub fn new(root: &'a mut Aspect, events: &'a mut Vec<ChangeEvent>) -> Self {
        Self { root, events }
    }

    pub fn root(&self) -> &Aspect {
        self.root
    }

    pub(crate) fn aspect(&self, id: AspectId) -> CommandResult<&Aspect> {
        self.root.find(id).ok_or(CommandError::TargetMissing(id))
    }

    pub(crate) fn aspect_mut(&mut self, id: AspectId) -> CommandResult<&mut Aspect> {
        self.root
            .find_mut(id)
            .ok_or(CommandError::TargetMissing(id))
    }

    pub(crate) fn column(&self, id: AspectId) -> CommandResult<&Column> {
        self.aspect(id)?
            .as_column()
            .ok_or(CommandError::Structural(StructuralError::NotAColumn(id)))
    }

    pub(crate) fn column_mut(&mut self, id: AspectId) -> CommandResult<&mut Column> {
        self.aspect_mut(id)?
            .as_column_mut()
            .ok_or(CommandError::Structural(StructuralError::NotAColumn(id)))
    }

    pub(crate) fn matrix_mut(&mut self, id: AspectId) -> CommandResult<&mut Matrix> {
        self.aspect_mut(id)?
            .as_matrix_mut()
            .ok_or(CommandError::Structural(StructuralError::NotAMatrix(id)))
    }

    /// Records an event for `id` using its current path.
    pub(crate) fn emit(&mut self, kind: ChangeKind, id: AspectId) {
        let aspect_path = self.root.path_of(id).unwrap_or_default();
        self.emit_with_path(kind, id, aspect_path);
    }

    pub(crate) fn emit_with_path(&mut self, kind: ChangeKind, id: AspectId, aspect_path: String) {
        self.events.push(ChangeEvent {
            kind,
            aspect_id: id,
            aspect_path,
        });
    }
}

/// Reversible unit of mutation.
pub trait Command: Debug {
    /// Label shown in undo/redo menus and the results log.
    fn description(&self) -> String;

    /// Performs the change. On error nothing may have been mutated.
    fn apply(&mut self, ctx: &mut CommandContext<'_>) -> CommandResult<()>;

    /// Reverts a previous successful `apply`.
    fn invert(&mut self, ctx: &mut CommandContext<'_>) -> CommandResult<()>;

    /// Absorbs `next` (already applied) into `self`. Opt-in per kind.
    fn merge_with(&mut self, _next: &dyn Command) -> bool {
        false
    }

    /// Bytes of snapshot state held for undo.
    fn footprint(&self) -> usize {
        0
    }

    fn notices(&self) -> Notices {
        Notices::default()
    }

    fn as_any(&self) -> &dyn Any;
}

/// Sequence applied in order and inverted in reverse, as one undo step.
#[derive(Debug)]
pub struct CommandGroup {
    description: String,
    commands: Vec<Box<dyn Command>>,
}

impl CommandGroup {
    pub fn new(description: impl Into<String>, commands: Vec<Box<dyn Command>>) -> Self {
        Self {
            description: description.into(),
            commands,
        }
    }

    pub fn len(&self) -> usize {
        self.commands.len()
    }

    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }
}

impl Command for CommandGroup {
    fn description(&self) -> String {
        self.description.clone()
    }

    fn apply(&mut self, ctx: &mut CommandContext<'_>) -> CommandResult<()> {
        for index in 0..self.commands.len() {
            if let Err(err) = self.commands[index].apply(ctx) {
                for applied in self.commands[..index].iter_mut().rev() {
                    if let Err(rollback) = applied.invert(ctx) {
                        warn!(
                            "event=group_rollback module=command status=error description={} error={}",
                            applied.description(),
                            rollback
                        );
                    }
                }
                return Err(err);
            }
        }
        Ok(())
    }

    fn invert(&mut self, ctx: &mut CommandContext<'_>) -> CommandResult<()> {
        for index in (0..self.commands.len()).rev() {
            if let Err(err) = self.commands[index].invert(ctx) {
                for inverted in self.commands[index + 1..].iter_mut() {
                    if let Err(rollback) = inverted.apply(ctx) {
                        warn!(
                            "event=group_rollback module=command status=error description={} error={}",
                            inverted.description(),
                            rollback
                        );
                    }
                }
                return Err(err);
            }
        }
        Ok(())
    }

    fn footprint(&self) -> usize {
        self.commands.iter().map(|command| command.footprint()).sum()
    }

    fn notices(&self) -> Notices {
        let mut notices = Notices::default();
        for command in &self.commands {
            let inner = command.notices();
            if notices.diversion.is_none() {
                notices.diversion = inner.diversion;
            }
            notices.cell_errors.extend(inner.cell_errors);
        }
        notices
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// History bounds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StackLimits {
    pub max_depth: usize,
    pub max_bytes: usize,
    pub merge_window: Duration,
}

impl Default for StackLimits {
    fn default() -> Self {
        Self {
            max_depth: 100,
            max_bytes: 64 * 1024 * 1024,
            merge_window: Duration::from_millis(500),
        }
    }
}

/// What `push` did with the command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PushOutcome {
    Pushed,
    /// Folded into the previous undo step.
    Merged,
}

#[derive(Debug)]
struct Entry {
    command: Box<dyn Command>,
    pushed_at: Instant,
}

/// Linear undo/redo history.
#[derive(Debug)]
pub struct CommandStack {
    undo: Vec<Entry>,
    redo: Vec<Entry>,
    limits: StackLimits,
    /// Undo depth at which the document was last saved.
    clean_index: Option<usize>,
}

impl Default for CommandStack {
    fn default() -> Self {
        Self::new(StackLimits::default())
    }
}

impl CommandStack {
    pub fn new(limits: StackLimits) -> Self {
        Self {
            undo: Vec::new(),
            redo: Vec::new(),
            limits,
            clean_index: Some(0),
        }
    }

    pub fn limits(&self) -> StackLimits {
        self.limits
    }

    pub fn set_limits(&mut self, limits: StackLimits) {
        self.limits = limits;
        self.enforce_limits();
    }

    /// Applies `command` and records it. Nothing is recorded on failure.
    pub fn push(
        &mut self,
        mut command: Box<dyn Command>,
        ctx: &mut CommandContext<'_>,
    ) -> CommandResult<PushOutcome> {
        command.apply(ctx)?;
        let description = command.description();
        let now = Instant::now();

        if self.try_merge(command.as_ref(), now) {
            debug!(
                "event=command_merge module=command status=ok description={}",
                description
            );
            return Ok(PushOutcome::Merged);
        }

        if self.clean_index.is_some_and(|index| index > self.undo.len()) {
            self.clean_index = None;
        }
        self.redo.clear();
        self.undo.push(Entry {
            command,
            pushed_at: now,
        });
        info!(
            "event=command_push module=command status=ok depth={} description={}",
            self.undo.len(),
            description
        );
        self.enforce_limits();
        Ok(PushOutcome::Pushed)
    }

    fn try_merge(&mut self, command: &dyn Command, now: Instant) -> bool {
        if !self.redo.is_empty() || self.clean_index == Some(self.undo.len()) {
            return false;
        }
        let window = self.limits.merge_window;
        let Some(top) = self.undo.last_mut() else {
            return false;
        };
        if now.duration_since(top.pushed_at) > window {
            return false;
        }
        if top.command.merge_with(command) {
            top.pushed_at = now;
            return true;
        }
        false
    }

    pub fn undo(&mut self, ctx: &mut CommandContext<'_>) -> CommandResult<String> {
        let mut entry = self.undo.pop().ok_or(CommandError::NothingToUndo)?;
        if let Err(err) = entry.command.invert(ctx) {
            self.undo.push(entry);
            return Err(err);
        }
        let description = entry.command.description();
        info!(
            "event=command_undo module=command status=ok depth={} description={}",
            self.undo.len(),
            description
        );
        self.redo.push(entry);
        Ok(description)
    }

    pub fn redo(&mut self, ctx: &mut CommandContext<'_>) -> CommandResult<String> {
        let mut entry = self.redo.pop().ok_or(CommandError::NothingToRedo)?;
        if let Err(err) = entry.command.apply(ctx) {
            self.redo.push(entry);
            return Err(err);
        }
        let description = entry.command.description();
        info!(
            "event=command_redo module=command status=ok depth={} description={}",
            self.undo.len() + 1,
            description
        );
        entry.pushed_at = Instant::now();
        self.undo.push(entry);
        Ok(description)
    }

    pub fn can_undo(&self) -> bool {
        !self.undo.is_empty()
    }

    pub fn can_redo(&self) -> bool {
        !self.redo.is_empty()
    }

    pub fn undo_text(&self) -> Option<String> {
        self.undo.last().map(|entry| entry.command.description())
    }

    pub fn redo_text(&self) -> Option<String> {
        self.redo.last().map(|entry| entry.command.description())
    }

    pub fn undo_len(&self) -> usize {
        self.undo.len()
    }

    pub fn redo_len(&self) -> usize {
        self.redo.len()
    }

    /// Notices of the most recent undo step.
    pub fn last_notices(&self) -> Notices {
        self.undo
            .last()
            .map(|entry| entry.command.notices())
            .unwrap_or_default()
    }

    /// Marks the current position as the saved state.
    pub fn set_clean(&mut self) {
        self.clean_index = Some(self.undo.len());
    }

    pub fn is_clean(&self) -> bool {
        self.clean_index == Some(self.undo.len())
    }

    /// Drops all history; the current state becomes clean.
    pub fn clear(&mut self) {
        self.undo.clear();
        self.redo.clear();
        self.clean_index = Some(0);
    }

    fn footprint(&self) -> usize {
        self.undo
            .iter()
            .chain(&self.redo)
            .map(|entry| entry.command.footprint())
            .sum()
    }

    fn enforce_limits(&mut self) {
        while !self.undo.is_empty()
            && (self.undo.len() > self.limits.max_depth
                || (self.undo.len() > 1 && self.footprint() > self.limits.max_bytes))
        {
            let evicted = self.undo.remove(0);
            self.clean_index = self.clean_index.and_then(|index| index.checked_sub(1));
            info!(
                "event=command_evict module=command status=ok depth={} description={}",
                self.undo.len(),
                evicted.command.description()
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{
        Command, CommandContext, CommandError, CommandGroup, CommandResult, CommandStack,
        StackLimits,
    };
    use crate::error::StructuralError;
    use crate::model::aspect::Aspect;
    use std::any::Any;

    #[derive(Debug)]
    struct AppendComment {
        text: String,
        previous: Option<String>,
    }

    impl Command for AppendComment {
        fn description(&self) -> String {
            format!("append {}", self.text)
        }

        fn apply(&mut self, ctx: &mut CommandContext<'_>) -> CommandResult<()> {
            let id = ctx.root().id();
            let aspect = ctx.aspect_mut(id)?;
            self.previous = Some(aspect.comment().to_string());
            let next = format!("{}{}", aspect.comment(), self.text);
            aspect.set_comment(next);
            Ok(())
        }

        fn invert(&mut self, ctx: &mut CommandContext<'_>) -> CommandResult<()> {
            let id = ctx.root().id();
            let previous = self.previous.take().unwrap_or_default();
            ctx.aspect_mut(id)?.set_comment(previous);
            Ok(())
        }

        fn as_any(&self) -> &dyn Any {
            self
        }
    }

    /// Applies and inverts according to its flags without touching the tree.
    #[derive(Debug)]
    struct Flaky {
        apply_fails: bool,
        invert_fails: bool,
    }

    impl Command for Flaky {
        fn description(&self) -> String {
            "flaky".to_string()
        }

        fn apply(&mut self, _ctx: &mut CommandContext<'_>) -> CommandResult<()> {
            if self.apply_fails {
                return Err(StructuralError::EmptyName.into());
            }
            Ok(())
        }

        fn invert(&mut self, _ctx: &mut CommandContext<'_>) -> CommandResult<()> {
            if self.invert_fails {
                return Err(CommandError::NothingToUndo);
            }
            Ok(())
        }

        fn as_any(&self) -> &dyn Any {
            self
        }
    }

    fn append(text: &str) -> Box<dyn Command> {
        Box::new(AppendComment {
            text: text.to_string(),
            previous: None,
        })
    }

    #[test]
    fn undo_redo_walks_linear_history() {
        let mut root = Aspect::project("P");
        let mut events = Vec::new();
        let mut stack = CommandStack::new(StackLimits::default());
        let mut ctx = CommandContext::new(&mut root, &mut events);

        stack.push(append("a"), &mut ctx).expect("push a");
        stack.push(append("b"), &mut ctx).expect("push b");
        assert_eq!(ctx.root().comment(), "ab");

        assert_eq!(stack.undo(&mut ctx).expect("undo"), "append b");
        assert_eq!(ctx.root().comment(), "a");
        stack.redo(&mut ctx).expect("redo");
        assert_eq!(ctx.root().comment(), "ab");

        stack.undo(&mut ctx).expect("undo b");
        stack.push(append("c"), &mut ctx).expect("push c");
        assert!(!stack.can_redo());
        assert_eq!(
            stack.redo(&mut ctx).expect_err("redo cleared"),
            CommandError::NothingToRedo
        );
    }

    #[test]
    fn group_rollback_continues_past_failed_invert() {
        let mut root = Aspect::project("P");
        let mut events = Vec::new();
        let mut stack = CommandStack::new(StackLimits::default());
        let mut ctx = CommandContext::new(&mut root, &mut events);
        let group = CommandGroup::new(
            "batch",
            vec![
                append("a"),
                Box::new(Flaky {
                    apply_fails: false,
                    invert_fails: true,
                }),
                Box::new(Flaky {
                    apply_fails: true,
                    invert_fails: false,
                }),
            ],
        );

        let err = stack
            .push(Box::new(group), &mut ctx)
            .expect_err("third command fails");
        assert_eq!(err, CommandError::Structural(StructuralError::EmptyName));
        assert_eq!(ctx.root().comment(), "");
        assert!(!stack.can_undo());
    }

    #[test]
    fn depth_limit_evicts_oldest_and_drops_clean_marker() {
        let mut root = Aspect::project("P");
        let mut events = Vec::new();
        let limits = StackLimits {
            max_depth: 2,
            ..StackLimits::default()
        };
        let mut stack = CommandStack::new(limits);
        let mut ctx = CommandContext::new(&mut root, &mut events);

        assert!(stack.is_clean());
        for text in ["a", "b", "c"] {
            stack.push(append(text), &mut ctx).expect("push");
        }
        assert_eq!(stack.undo_len(), 2);
        stack.undo(&mut ctx).expect("undo c");
        stack.undo(&mut ctx).expect("undo b");
        assert!(stack.undo(&mut ctx).is_err());
        assert_eq!(ctx.root().comment(), "a");
        assert!(!stack.is_clean());
    }

    #[test]
    fn clean_marker_follows_undo_position() {
        let mut root = Aspect::project("P");
        let mut events = Vec::new();
        let mut stack = CommandStack::new(StackLimits::default());
        let mut ctx = CommandContext::new(&mut root, &mut events);

        stack.push(append("a"), &mut ctx).expect("push");
        stack.set_clean();
        stack.push(append("b"), &mut ctx).expect("push");
        assert!(!stack.is_clean());
        stack.undo(&mut ctx).expect("undo");
        assert!(stack.is_clean());
    }
}
