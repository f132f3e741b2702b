//! Pipeline lifecycle state machine.
//!
//! Guarded transitions replace scattered boolean flags; anything outside the
//! allowed table is a programmer error surfaced as `invalid_state_transition`.

use std::collections::VecDeque;

use univoice_core::{Error, PipelineState, Result};

const TRANSITION_LOG_CAPACITY: usize = 32;

/// One recorded transition, for diagnostics.
#[derive(Debug, Clone)]
pub struct TransitionRecord {
    pub from: PipelineState,
    pub to: PipelineState,
    pub reason: String,
    /// Unix epoch milliseconds.
    pub at: u64,
}

#[derive(Debug)]
pub struct StateMachine {
    state: PipelineState,
    /// Where `resume()` returns to; set by `pause()`.
    resume_target: PipelineState,
    log: VecDeque<TransitionRecord>,
}

impl Default for StateMachine {
    fn default() -> Self {
        Self::new()
    }
}

impl StateMachine {
    pub fn new() -> Self {
        Self {
            state: PipelineState::Idle,
            resume_target: PipelineState::Listening,
            log: VecDeque::with_capacity(TRANSITION_LOG_CAPACITY),
        }
    }

    pub fn state(&self) -> PipelineState {
        self.state
    }

    pub fn is_running(&self) -> bool {
        matches!(
            self.state,
            PipelineState::Listening | PipelineState::Processing | PipelineState::Paused
        )
    }

    fn allowed(from: PipelineState, to: PipelineState) -> bool {
        use PipelineState::*;
        matches!(
            (from, to),
            (Idle, Starting)
                | (Starting, Listening)
                | (Starting, Error)
                | (Starting, Idle)
                | (Listening, Processing)
                | (Listening, Stopping)
                | (Listening, Error)
                | (Listening, Paused)
                | (Processing, Listening)
                | (Processing, Stopping)
                | (Processing, Error)
                | (Stopping, Idle)
                | (Stopping, Error)
                | (Error, Idle)
                | (Paused, Listening)
                | (Paused, Stopping)
        )
    }

    /// Perform a guarded transition, recording it with a reason code.
    pub fn transition(&mut self, to: PipelineState, reason: &str) -> Result<()> {
        if !Self::allowed(self.state, to) {
            return Err(Error::InvalidStateTransition {
                from: self.state.to_string(),
                to: to.to_string(),
            });
        }
        self.record(to, reason);
        self.state = to;
        Ok(())
    }

    /// Legal only from `listening`.
    pub fn pause(&mut self, reason: &str) -> Result<()> {
        if self.state != PipelineState::Listening {
            return Err(Error::InvalidStateTransition {
                from: self.state.to_string(),
                to: PipelineState::Paused.to_string(),
            });
        }
        self.resume_target = self.state;
        self.transition(PipelineState::Paused, reason)
    }

    /// Return to the state that was active before `pause()`.
    pub fn resume(&mut self, reason: &str) -> Result<()> {
        if self.state != PipelineState::Paused {
            return Err(Error::InvalidStateTransition {
                from: self.state.to_string(),
                to: self.resume_target.to_string(),
            });
        }
        self.transition(self.resume_target, reason)
    }

    pub fn recent_transitions(&self) -> impl Iterator<Item = &TransitionRecord> {
        self.log.iter()
    }

    fn record(&mut self, to: PipelineState, reason: &str) {
        if self.log.len() == TRANSITION_LOG_CAPACITY {
            self.log.pop_front();
        }
        self.log.push_back(TransitionRecord {
            from: self.state,
            to,
            reason: reason.to_string(),
            at: chrono::Utc::now().timestamp_millis().max(0) as u64,
        });
        tracing::debug!(from = %self.state, to = %to, reason, "state transition");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn listening() -> StateMachine {
        let mut sm = StateMachine::new();
        sm.transition(PipelineState::Starting, "test").unwrap();
        sm.transition(PipelineState::Listening, "test").unwrap();
        sm
    }

    #[test]
    fn happy_path_lifecycle() {
        let mut sm = StateMachine::new();
        sm.transition(PipelineState::Starting, "start command").unwrap();
        sm.transition(PipelineState::Listening, "asr connected").unwrap();
        sm.transition(PipelineState::Stopping, "stop command").unwrap();
        sm.transition(PipelineState::Idle, "drained").unwrap();
        assert_eq!(sm.state(), PipelineState::Idle);
        assert_eq!(sm.recent_transitions().count(), 4);
    }

    #[test]
    fn illegal_transitions_are_typed_errors() {
        let mut sm = StateMachine::new();
        let err = sm.transition(PipelineState::Listening, "skip").unwrap_err();
        assert_eq!(err.code(), "invalid_state_transition");
        // State unchanged after a refused transition.
        assert_eq!(sm.state(), PipelineState::Idle);
    }

    #[test]
    fn pause_only_from_listening() {
        let mut sm = StateMachine::new();
        assert!(sm.pause("test").is_err());

        let mut sm = listening();
        sm.pause("user").unwrap();
        assert_eq!(sm.state(), PipelineState::Paused);
    }

    #[test]
    fn resume_returns_to_previous_state() {
        let mut sm = listening();
        sm.pause("user").unwrap();
        sm.resume("user").unwrap();
        assert_eq!(sm.state(), PipelineState::Listening);
    }

    #[test]
    fn paused_can_stop_directly() {
        let mut sm = listening();
        sm.pause("user").unwrap();
        sm.transition(PipelineState::Stopping, "stop while paused").unwrap();
        sm.transition(PipelineState::Idle, "drained").unwrap();
    }

    #[test]
    fn error_recovers_only_to_idle() {
        let mut sm = listening();
        sm.transition(PipelineState::Error, "asr dropped").unwrap();
        assert!(sm.transition(PipelineState::Listening, "no").is_err());
        sm.transition(PipelineState::Idle, "acknowledged").unwrap();
    }

    #[test]
    fn log_is_bounded() {
        let mut sm = StateMachine::new();
        for _ in 0..40 {
            sm.transition(PipelineState::Starting, "loop").unwrap();
            sm.transition(PipelineState::Idle, "loop").unwrap();
        }
        assert_eq!(sm.recent_transitions().count(), TRANSITION_LOG_CAPACITY);
    }
}
