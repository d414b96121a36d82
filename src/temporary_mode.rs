//! Self-reverting user modes.
//!
//! Entering a temporary mode remembers which mode and airflow level the unit was in, so that
//! they can be restored once the mode expires. Entering another temporary mode while one is
//! active only moves the expiry: the state to restore stays the one from before the first.

use crate::registers::TemporaryMode;
use std::time::Duration;
use tokio::time::Instant;
use tracing::debug;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, serde::Serialize)]
pub struct SavedState {
    pub mode: Option<i64>,
    pub fan_mode: Option<i64>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum State {
    Idle,
    Active { mode: TemporaryMode, expires_at: Instant, saved: SavedState, generation: u64 },
}

#[derive(Debug)]
pub struct Controller {
    state: State,
    generation: u64,
}

impl Default for Controller {
    fn default() -> Self {
        Self { state: State::Idle, generation: 0 }
    }
}

impl Controller {
    pub fn state(&self) -> State {
        self.state
    }

    /// Returns the generation the expiry timer must present to [`Controller::expire`].
    pub fn enter(
        &mut self,
        mode: TemporaryMode,
        duration: Duration,
        now: Instant,
        current: SavedState,
    ) -> u64 {
        let saved = match self.state {
            State::Idle => current,
            State::Active { saved, mode: previous, .. } => {
                debug!(message = "chaining temporary modes", %previous, next = %mode);
                saved
            }
        };
        self.generation += 1;
        let generation = self.generation;
        self.state = State::Active { mode, expires_at: now + duration, saved, generation };
        generation
    }

    /// The state to restore, if `generation` is still the active one.
    pub fn expire(&mut self, generation: u64) -> Option<SavedState> {
        match self.state {
            State::Active { generation: active, saved, .. } if active == generation => {
                self.state = State::Idle;
                Some(saved)
            }
            _ => None,
        }
    }

    /// Forget the active temporary mode without restoring anything.
    pub fn cancel(&mut self) -> bool {
        let was_active = matches!(self.state, State::Active { .. });
        self.state = State::Idle;
        was_active
    }
}

#[cfg(test)]
mod test {
    use super::*;

    const BEFORE: SavedState = SavedState { mode: Some(0), fan_mode: Some(3) };

    #[test]
    fn chains_restore_the_state_before_the_first_mode() {
        let mut c = Controller::default();
        let now = Instant::now();
        let first = c.enter(TemporaryMode::Fireplace, Duration::from_secs(60), now, BEFORE);
        let during = SavedState { mode: Some(4), fan_mode: Some(5) };
        let second = c.enter(TemporaryMode::Away, Duration::from_secs(3600), now, during);
        assert_ne!(first, second);
        assert!(matches!(c.state(), State::Active { mode: TemporaryMode::Away, .. }));
        // The first timer lost the race.
        assert_eq!(c.expire(first), None);
        assert_eq!(c.expire(second), Some(BEFORE));
        assert_eq!(c.state(), State::Idle);
        assert_eq!(c.expire(second), None);
    }

    #[test]
    fn cancelled_modes_do_not_revert() {
        let mut c = Controller::default();
        let now = Instant::now();
        let generation = c.enter(TemporaryMode::Boost, Duration::from_secs(60), now, BEFORE);
        assert!(c.cancel());
        assert!(!c.cancel());
        assert_eq!(c.expire(generation), None);
    }

    #[test]
    fn expiry_is_measured_from_entry() {
        let mut c = Controller::default();
        let now = Instant::now();
        let generation = c.enter(TemporaryMode::Refresh, Duration::from_secs(60), now, SavedState::default());
        match c.state() {
            State::Active { expires_at, .. } => assert_eq!(expires_at, now + Duration::from_secs(60)),
            State::Idle => panic!("should be active"),
        }
        assert_eq!(c.expire(generation), Some(SavedState::default()));
    }
}
