//! Host-side handshake state machine.
//!
//! ```text
//! IDLE -> LOADING -> CONFIGURED -> RUNNING -> COMPLETING -> DONE
//!            |                        |
//!            +------> TIMED_OUT <-----+
//! any non-DONE state -> FAILED
//! ```
//!
//! The advance guard is claimed by the first transition into COMPLETING,
//! TIMED_OUT or FAILED. Whoever receives `claims_advance == true` owns the
//! single call to the page's advance action.

use thiserror::Error;

use crate::models::SessionState;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HandshakeError {
    #[error("invalid handshake transition {from} -> {to}")]
    InvalidTransition {
        from: SessionState,
        to: SessionState,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transition {
    pub from: SessionState,
    pub to: SessionState,
    pub claims_advance: bool,
}

#[derive(Debug, Clone, Default)]
pub struct Handshake {
    state: SessionState,
    advance_claimed: bool,
}

impl Handshake {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn advance_claimed(&self) -> bool {
        self.advance_claimed
    }

    pub fn can_transition_to(&self, next: SessionState) -> bool {
        use SessionState::*;

        match (self.state, next) {
            (Idle, Loading) => true,
            (Loading, Configured) => true,
            (Configured, Running) => true,
            // Running is inferred, so a completion may land while still Configured.
            (Configured | Running, Completing) => true,
            (Completing, Done) => true,
            (Loading | Configured | Running, TimedOut) => true,
            (from, Failed) => !from.is_terminal(),
            _ => false,
        }
    }

    pub fn transition(&mut self, next: SessionState) -> Result<Transition, HandshakeError> {
        if !self.can_transition_to(next) {
            return Err(HandshakeError::InvalidTransition {
                from: self.state,
                to: next,
            });
        }

        let claims_advance = matches!(
            next,
            SessionState::Completing | SessionState::TimedOut | SessionState::Failed
        ) && !self.advance_claimed;
        if claims_advance {
            self.advance_claimed = true;
        }

        let from = self.state;
        self.state = next;
        Ok(Transition {
            from,
            to: next,
            claims_advance,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use SessionState::*;

    #[test]
    fn happy_path() {
        let mut handshake = Handshake::new();
        for next in [Loading, Configured, Running] {
            assert!(!handshake.transition(next).unwrap().claims_advance);
        }
        assert!(handshake.transition(Completing).unwrap().claims_advance);
        assert!(!handshake.transition(Done).unwrap().claims_advance);
        assert_eq!(handshake.state(), Done);
    }

    #[test]
    fn terminal_states_accept_nothing() {
        for terminal in [Done, Failed, TimedOut] {
            for next in SessionState::ALL {
                let mut handshake = Handshake {
                    state: terminal,
                    advance_claimed: true,
                };
                assert!(handshake.transition(next).is_err(), "{terminal} -> {next}");
            }
        }
    }

    #[test]
    fn second_completion_loses() {
        let mut handshake = Handshake::new();
        handshake.transition(Loading).unwrap();
        handshake.transition(Configured).unwrap();
        handshake.transition(Running).unwrap();
        handshake.transition(Completing).unwrap();
        assert!(handshake.transition(Completing).is_err());
        assert!(handshake.transition(TimedOut).is_err());
    }

    #[test]
    fn failure_during_completion_does_not_reclaim_advance() {
        let mut handshake = Handshake::new();
        for next in [Loading, Configured, Completing] {
            handshake.transition(next).unwrap();
        }
        let failed = handshake.transition(Failed).unwrap();
        assert!(!failed.claims_advance);
        assert!(handshake.advance_claimed());
    }

    #[test]
    fn timed_out_only_from_loading_or_running() {
        let mut idle = Handshake::new();
        assert!(idle.transition(TimedOut).is_err());

        let mut loading = Handshake::new();
        loading.transition(Loading).unwrap();
        assert!(loading.transition(TimedOut).unwrap().claims_advance);
    }

    fn arb_state() -> impl Strategy<Value = SessionState> {
        prop::sample::select(SessionState::ALL.to_vec())
    }

    proptest! {
        /// However transitions are attempted, at most one of them claims the advance.
        #[test]
        fn advance_is_claimed_at_most_once(attempts in prop::collection::vec(arb_state(), 0..40)) {
            let mut handshake = Handshake::new();
            let claims = attempts
                .into_iter()
                .filter_map(|next| handshake.transition(next).ok())
                .filter(|t| t.claims_advance)
                .count();
            prop_assert!(claims <= 1);
            prop_assert_eq!(claims == 1, handshake.advance_claimed());
        }
    }
}
