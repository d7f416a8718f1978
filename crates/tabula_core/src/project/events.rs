//! Structured change notification.
//!
//! # Invariants
//! - Events are delivered synchronously, after the triggering apply, undo
//!   or redo has fully committed and before the call returns.
//! - Observers are called in subscription order.

use crate::model::aspect::AspectId;
use serde::Serialize;

/// What changed about an aspect.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeKind {
    AspectAdded,
    AspectRemoved,
    AspectRenamed,
    AspectMoved,
    /// Comment or caption spec.
    DescriptionChanged,
    DataChanged,
    ModeChanged,
    PlotDesignationChanged,
    FormatChanged,
    FormulaChanged,
    MaskingChanged,
    RowCountChanged,
    MatrixChanged,
}

impl ChangeKind {
    /// Whether formula columns reading this aspect need re-evaluation.
    pub fn affects_values(self) -> bool {
        matches!(
            self,
            Self::DataChanged
                | Self::ModeChanged
                | Self::MaskingChanged
                | Self::RowCountChanged
                | Self::AspectRemoved
                | Self::AspectAdded
        )
    }

    /// Whether formula dependencies may resolve differently afterwards.
    pub fn affects_structure(self) -> bool {
        matches!(
            self,
            Self::AspectAdded
                | Self::AspectRemoved
                | Self::AspectRenamed
                | Self::AspectMoved
                | Self::FormulaChanged
        )
    }
}

/// One change notification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChangeEvent {
    pub kind: ChangeKind,
    pub aspect_id: AspectId,
    /// Path at the time of the change; for removals, the path it had.
    pub aspect_path: String,
}

/// Receiver of change events.
pub trait Observer {
    fn on_change(&mut self, event: &ChangeEvent);
}

impl<F> Observer for F
where
    F: FnMut(&ChangeEvent),
{
    fn on_change(&mut self, event: &ChangeEvent) {
        self(event)
    }
}

/// Handle returned by `subscribe`, used to unsubscribe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ObserverId(u64);

#[derive(Default)]
pub(crate) struct ObserverList {
    next_id: u64,
    observers: Vec<(ObserverId, Box<dyn Observer>)>,
}

impl ObserverList {
    pub(crate) fn subscribe(&mut self, observer: Box<dyn Observer>) -> ObserverId {
        self.next_id += 1;
        let id = ObserverId(self.next_id);
        self.observers.push((id, observer));
        id
    }

    pub(crate) fn unsubscribe(&mut self, id: ObserverId) -> bool {
        let before = self.observers.len();
        self.observers.retain(|(current, _)| *current != id);
        self.observers.len() != before
    }

    pub(crate) fn dispatch(&mut self, events: &[ChangeEvent]) {
        for event in events {
            for (_, observer) in &mut self.observers {
                observer.on_change(event);
            }
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.observers.len()
    }
}

impl std::fmt::Debug for ObserverList {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ObserverList")
            .field("observers", &self.observers.len())
            .finish()
    }
}
