//! Pass scheduling state machine

use std::fmt;

/// Scheduling state of a live session.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SyncState {
    #[default]
    Idle,
    /// A pass is in flight
    Running,
    /// A pass is in flight and at least one trigger arrived since it started
    PendingRerun,
    /// Cancelled; nothing else happens
    Stopped,
}

/// Outcome of feeding an event to a [`SyncState`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transition {
    pub next: SyncState,
    /// The caller must start exactly one pass
    pub start_pass: bool,
}

impl Transition {
    fn stay(state: SyncState) -> Self {
        Self {
            next: state,
            start_pass: false,
        }
    }

    fn start() -> Self {
        Self {
            next: SyncState::Running,
            start_pass: true,
        }
    }
}

impl SyncState {
    /// A change notification arrived.
    pub fn on_trigger(self) -> Transition {
        match self {
            SyncState::Idle => Transition::start(),
            SyncState::Running | SyncState::PendingRerun => Transition::stay(SyncState::PendingRerun),
            SyncState::Stopped => Transition::stay(SyncState::Stopped),
        }
    }

    /// The in-flight pass finished, successfully or not.
    pub fn on_pass_complete(self) -> Transition {
        match self {
            SyncState::Running => Transition::stay(SyncState::Idle),
            SyncState::PendingRerun => Transition::start(),
            SyncState::Idle | SyncState::Stopped => Transition::stay(self),
        }
    }

    /// External cancellation; terminal from any state.
    pub fn on_cancel(self) -> Transition {
        Transition::stay(SyncState::Stopped)
    }

    pub fn is_busy(self) -> bool {
        matches!(self, SyncState::Running | SyncState::PendingRerun)
    }
}

impl fmt::Display for SyncState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SyncState::Idle => "idle",
            SyncState::Running => "running",
            SyncState::PendingRerun => "pending-rerun",
            SyncState::Stopped => "stopped",
        };
        f.write_str(name)
    }
}
