//! Deploy lifecycle state machine.

use std::fmt;

use tracing::debug;

/// Phase of one deploy run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SyncState {
    Idle,
    Hashing,
    Negotiating,
    Uploading,
    Polling,
    Ready,
    Failed,
    Cancelled,
}

impl SyncState {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Ready | Self::Failed | Self::Cancelled)
    }

    /// Whether `self → next` is an edge of the lifecycle.
    pub fn can_transition_to(self, next: SyncState) -> bool {
        use SyncState::*;
        if self.is_terminal() {
            return false;
        }
        if next == Cancelled {
            return true;
        }
        matches!(
            (self, next),
            (Idle, Hashing)
                | (Hashing, Negotiating)
                | (Hashing, Failed)
                | (Negotiating, Uploading)
                | (Negotiating, Polling)
                | (Negotiating, Failed)
                | (Uploading, Polling)
                | (Uploading, Failed)
                | (Polling, Ready)
                | (Polling, Failed)
        )
    }
}

impl fmt::Display for SyncState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Idle => "idle",
            Self::Hashing => "hashing",
            Self::Negotiating => "negotiating",
            Self::Uploading => "uploading",
            Self::Polling => "polling",
            Self::Ready => "ready",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        };
        f.write_str(name)
    }
}

/// Rejected transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("invalid deploy state transition {from} -> {to}")]
pub struct InvalidTransition {
    pub from: SyncState,
    pub to: SyncState,
}

/// Current state plus every state visited, in order.
#[derive(Debug, Clone)]
pub struct StateMachine {
    current: SyncState,
    history: Vec<SyncState>,
}

impl Default for StateMachine {
    fn default() -> Self {
        Self::new()
    }
}

impl StateMachine {
    pub fn new() -> Self {
        Self {
            current: SyncState::Idle,
            history: vec![SyncState::Idle],
        }
    }

    pub fn current(&self) -> SyncState {
        self.current
    }

    pub fn history(&self) -> &[SyncState] {
        &self.history
    }

    pub fn transition(&mut self, next: SyncState) -> Result<(), InvalidTransition> {
        if !self.current.can_transition_to(next) {
            return Err(InvalidTransition {
                from: self.current,
                to: next,
            });
        }
        debug!(from = %self.current, to = %next, "deploy state");
        self.current = next;
        self.history.push(next);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use SyncState::*;

    #[test]
    fn happy_path() {
        let mut sm = StateMachine::new();
        for next in [Hashing, Negotiating, Uploading, Polling, Ready] {
            sm.transition(next).unwrap();
        }
        assert_eq!(sm.current(), Ready);
        assert_eq!(
            sm.history(),
            &[Idle, Hashing, Negotiating, Uploading, Polling, Ready]
        );
    }

    #[test]
    fn empty_required_lists_skip_uploading() {
        assert!(Negotiating.can_transition_to(Polling));
    }

    #[test]
    fn cancel_from_any_live_state() {
        for state in [Idle, Hashing, Negotiating, Uploading, Polling] {
            assert!(state.can_transition_to(Cancelled), "{state}");
        }
    }

    #[test]
    fn terminal_states_are_final() {
        for state in [Ready, Failed, Cancelled] {
            for next in [Idle, Hashing, Polling, Failed, Cancelled] {
                assert!(!state.can_transition_to(next));
            }
        }
    }

    #[test]
    fn rejects_skipping_phases() {
        let mut sm = StateMachine::new();
        let err = sm.transition(Uploading).unwrap_err();
        assert_eq!(err, InvalidTransition { from: Idle, to: Uploading });
        assert_eq!(sm.current(), Idle);
        assert!(!Idle.can_transition_to(Failed));
        assert!(!Hashing.can_transition_to(Ready));
    }
}
