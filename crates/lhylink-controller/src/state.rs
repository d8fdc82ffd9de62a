use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};

use serde::{Deserialize, Serialize};

use crate::notify::Notifier;

/// Lifecycle state of the send loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ControllerState {
    Unknown,
    Initialize,
    Active,
    Idle,
    Paused,
    /// Waiting for the board to drain while paused.
    Busy,
    /// Waiting for the board to drain.
    Wait,
    Terminate,
    End,
}

impl ControllerState {
    /// True when the normal queue must not be framed.
    pub fn is_paused(self) -> bool {
        matches!(self, ControllerState::Paused | ControllerState::Busy)
    }

    /// True once the loop is stopping or stopped.
    pub fn is_finished(self) -> bool {
        matches!(self, ControllerState::Terminate | ControllerState::End)
    }

    pub fn name(self) -> &'static str {
        match self {
            ControllerState::Unknown => "unknown",
            ControllerState::Initialize => "initialize",
            ControllerState::Active => "active",
            ControllerState::Idle => "idle",
            ControllerState::Paused => "paused",
            ControllerState::Busy => "busy",
            ControllerState::Wait => "wait",
            ControllerState::Terminate => "terminate",
            ControllerState::End => "end",
        }
    }
}

impl fmt::Display for ControllerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// State shared between the handle and the send loop.
///
/// Every change is published to the notifier after the lock is released.
pub(crate) struct StateCell {
    state: Mutex<ControllerState>,
    notifier: Arc<dyn Notifier>,
}

impl StateCell {
    pub(crate) fn new(notifier: Arc<dyn Notifier>) -> Self {
        Self {
            state: Mutex::new(ControllerState::Unknown),
            notifier,
        }
    }

    fn lock(&self) -> MutexGuard<'_, ControllerState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub(crate) fn get(&self) -> ControllerState {
        *self.lock()
    }

    /// Unconditionally set the state. Returns the previous state.
    pub(crate) fn set(&self, next: ControllerState) -> ControllerState {
        let previous = std::mem::replace(&mut *self.lock(), next);
        if previous != next {
            tracing::debug!(from = %previous, to = %next, "controller state changed");
            self.notifier.state_changed(next);
        }
        previous
    }

    /// Move to `next` only if the current state is one of `from`.
    pub(crate) fn transition(&self, from: &[ControllerState], next: ControllerState) -> bool {
        let previous = {
            let mut state = self.lock();
            if !from.contains(&state) {
                return false;
            }
            std::mem::replace(&mut *state, next)
        };
        if previous != next {
            tracing::debug!(from = %previous, to = %next, "controller state changed");
            self.notifier.state_changed(next);
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notify::{ChannelNotifier, ControllerEvent};

    #[test]
    fn transition_only_from_listed_states() {
        let (notifier, events) = ChannelNotifier::new();
        let cell = StateCell::new(Arc::new(notifier));

        assert!(!cell.transition(&[ControllerState::Active], ControllerState::Idle));
        assert_eq!(cell.get(), ControllerState::Unknown);

        assert_eq!(cell.set(ControllerState::Active), ControllerState::Unknown);
        assert!(cell.transition(&[ControllerState::Active], ControllerState::Idle));
        assert_eq!(cell.get(), ControllerState::Idle);

        let states: Vec<_> = events
            .try_iter()
            .filter_map(|event| match event {
                ControllerEvent::State { state } => Some(state),
                _ => None,
            })
            .collect();
        assert_eq!(states, vec![ControllerState::Active, ControllerState::Idle]);
    }

    #[test]
    fn unchanged_state_is_not_published() {
        let (notifier, events) = ChannelNotifier::new();
        let cell = StateCell::new(Arc::new(notifier));
        cell.set(ControllerState::Paused);
        cell.set(ControllerState::Paused);
        assert_eq!(events.try_iter().count(), 1);
    }

    #[test]
    fn paused_and_finished_groups() {
        assert!(ControllerState::Busy.is_paused());
        assert!(!ControllerState::Wait.is_paused());
        assert!(ControllerState::End.is_finished());
        assert_eq!(
            serde_json::to_string(&ControllerState::Terminate).unwrap(),
            "\"terminate\""
        );
    }
}
