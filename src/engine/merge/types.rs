use std::fmt;
use std::sync::Arc;

/// Lifecycle of a merge unit. `Completed`, `Cancelled` and `Faulted` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum UnitState {
    Created = 0,
    Running = 1,
    Completed = 2,
    Cancelled = 3,
    Faulted = 4,
}

impl UnitState {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            UnitState::Completed | UnitState::Cancelled | UnitState::Faulted
        )
    }

    pub(crate) fn from_u8(raw: u8) -> Self {
        match raw {
            0 => UnitState::Created,
            1 => UnitState::Running,
            2 => UnitState::Completed,
            3 => UnitState::Cancelled,
            _ => UnitState::Faulted,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            UnitState::Created => "created",
            UnitState::Running => "running",
            UnitState::Completed => "completed",
            UnitState::Cancelled => "cancelled",
            UnitState::Faulted => "faulted",
        }
    }
}

impl fmt::Display for UnitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What prompted the engine to look for merges.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeTrigger {
    SegmentFlush,
    FullFlush,
    Explicit,
    MergeFinished,
    Closing,
}

impl fmt::Display for MergeTrigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            MergeTrigger::SegmentFlush => "segment_flush",
            MergeTrigger::FullFlush => "full_flush",
            MergeTrigger::Explicit => "explicit",
            MergeTrigger::MergeFinished => "merge_finished",
            MergeTrigger::Closing => "closing",
        };
        f.write_str(name)
    }
}

/// Point-in-time copy of a unit, safe to hand to other threads.
#[derive(Debug)]
pub struct UnitSnapshot<R> {
    pub id: u64,
    pub state: UnitState,
    pub request: Option<Arc<R>>,
}

impl<R> Clone for UnitSnapshot<R> {
    fn clone(&self) -> Self {
        Self {
            id: self.id,
            state: self.state,
            request: self.request.clone(),
        }
    }
}
