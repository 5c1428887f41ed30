//! Client-side view of the session.
//!
//! Tracks the last known state from notifications. Tick events are applied
//! only when they belong to the session currently shown, so a late tick
//! from a stopped session cannot resurrect it.

use crate::types::{EngineEvent, EngineState, TransitionReason};

/// What an event changed in the view.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ViewUpdate {
    /// The state was replaced by a transition
    Transition(TransitionReason),
    /// The remaining time of the shown session changed
    Tick(u64),
    /// The event did not apply to the shown session
    Ignored,
}

/// Last known session state as seen by a subscriber.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionView {
    state: EngineState,
}

impl SessionView {
    pub fn new(initial: EngineState) -> Self {
        Self { state: initial }
    }

    pub fn state(&self) -> &EngineState {
        &self.state
    }

    /// Applies a notification.
    pub fn apply(&mut self, event: &EngineEvent) -> ViewUpdate {
        match event {
            EngineEvent::SessionState(change) => {
                self.state = change.state.clone();
                ViewUpdate::Transition(change.reason)
            }
            EngineEvent::SessionTick(tick) => {
                let current = self.state.is_running()
                    && self.state.session_id.as_deref() == Some(tick.session_id.as_str());
                if !current {
                    return ViewUpdate::Ignored;
                }
                self.state.remaining_sec = tick.remaining_sec;
                ViewUpdate::Tick(tick.remaining_sec)
            }
        }
    }

    /// Whether a start command makes sense right now.
    pub fn can_start(&self) -> bool {
        !self.state.is_running()
    }

    /// Whether a stop command makes sense right now.
    pub fn can_stop(&self) -> bool {
        self.state.is_running()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{SessionStatus, StateChange, TickPayload};

    fn running(id: &str, remaining_sec: u64) -> EngineState {
        EngineState {
            status: SessionStatus::Running,
            session_id: Some(id.to_string()),
            planned_duration_sec: 10,
            start_ts_ms: Some(1_700_000_000_000),
            remaining_sec,
        }
    }

    fn tick(id: &str, remaining_sec: u64) -> EngineEvent {
        EngineEvent::SessionTick(TickPayload {
            session_id: id.to_string(),
            remaining_sec,
        })
    }

    fn change(state: EngineState, reason: TransitionReason) -> EngineEvent {
        EngineEvent::SessionState(StateChange { state, reason })
    }

    #[test]
    fn test_idle_view_controls() {
        let view = SessionView::new(EngineState::idle(2700));
        assert!(view.can_start());
        assert!(!view.can_stop());
    }

    #[test]
    fn test_tick_updates_current_session() {
        let mut view = SessionView::new(running("a", 10));

        assert_eq!(view.apply(&tick("a", 9)), ViewUpdate::Tick(9));
        assert_eq!(view.state().remaining_sec, 9);
        assert!(view.can_stop());
    }

    #[test]
    fn test_tick_for_other_session_is_ignored() {
        let mut view = SessionView::new(running("b", 10));

        assert_eq!(view.apply(&tick("a", 3)), ViewUpdate::Ignored);
        assert_eq!(view.state().remaining_sec, 10);
    }

    #[test]
    fn test_late_tick_after_stop_is_ignored() {
        let mut view = SessionView::new(running("a", 10));
        view.apply(&change(EngineState::idle(2700), TransitionReason::Stopped));

        assert_eq!(view.apply(&tick("a", 8)), ViewUpdate::Ignored);
        assert!(!view.state().is_running());
        assert!(view.can_start());
    }

    #[test]
    fn test_transition_replaces_state() {
        let mut view = SessionView::new(EngineState::idle(2700));

        let update = view.apply(&change(running("c", 10), TransitionReason::Started));

        assert_eq!(update, ViewUpdate::Transition(TransitionReason::Started));
        assert_eq!(view.state().session_id.as_deref(), Some("c"));
    }
}
