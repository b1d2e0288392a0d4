//! Element states and state transitions.

use std::fmt;

use crate::error::StateChangeError;

/// Element state.
///
/// States are ordered: `Null < Ready < Paused < Playing`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub enum State {
    /// Initial state: no resources allocated.
    #[default]
    Null,
    /// Resources allocated, no data flowing.
    Ready,
    /// Pads active, data prerolled, clock stopped.
    Paused,
    /// Data flowing with the clock running.
    Playing,
}

impl State {
    /// The state one step closer to `target`, or `self` if already there.
    pub fn step_towards(self, target: State) -> State {
        use State::*;
        match self.cmp(&target) {
            std::cmp::Ordering::Less => match self {
                Null => Ready,
                Ready => Paused,
                _ => Playing,
            },
            std::cmp::Ordering::Greater => match self {
                Playing => Paused,
                Paused => Ready,
                _ => Null,
            },
            std::cmp::Ordering::Equal => self,
        }
    }

    /// Lowercase name.
    pub fn name(self) -> &'static str {
        match self {
            State::Null => "null",
            State::Ready => "ready",
            State::Paused => "paused",
            State::Playing => "playing",
        }
    }
}

impl fmt::Display for State {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name().to_ascii_uppercase())
    }
}

/// A single-step transition between adjacent states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StateChange {
    /// NULL → READY
    NullToReady,
    /// READY → PAUSED
    ReadyToPaused,
    /// PAUSED → PLAYING
    PausedToPlaying,
    /// PLAYING → PAUSED
    PlayingToPaused,
    /// PAUSED → READY
    PausedToReady,
    /// READY → NULL
    ReadyToNull,
}

impl StateChange {
    /// The transition from `current` one step towards `target`.
    ///
    /// Returns `None` if `current == target`.
    pub fn towards(current: State, target: State) -> Option<StateChange> {
        Self::between(current, current.step_towards(target))
    }

    /// The transition between two adjacent states.
    pub fn between(from: State, to: State) -> Option<StateChange> {
        use State::*;
        match (from, to) {
            (Null, Ready) => Some(Self::NullToReady),
            (Ready, Paused) => Some(Self::ReadyToPaused),
            (Paused, Playing) => Some(Self::PausedToPlaying),
            (Playing, Paused) => Some(Self::PlayingToPaused),
            (Paused, Ready) => Some(Self::PausedToReady),
            (Ready, Null) => Some(Self::ReadyToNull),
            _ => None,
        }
    }

    /// State before the transition.
    pub fn current(self) -> State {
        match self {
            Self::NullToReady => State::Null,
            Self::ReadyToPaused | Self::ReadyToNull => State::Ready,
            Self::PausedToPlaying | Self::PausedToReady => State::Paused,
            Self::PlayingToPaused => State::Playing,
        }
    }

    /// State after the transition.
    pub fn next(self) -> State {
        match self {
            Self::ReadyToNull => State::Null,
            Self::NullToReady | Self::PausedToReady => State::Ready,
            Self::ReadyToPaused | Self::PlayingToPaused => State::Paused,
            Self::PausedToPlaying => State::Playing,
        }
    }

    /// True for transitions towards PLAYING.
    pub fn is_upward(self) -> bool {
        self.next() > self.current()
    }
}

impl fmt::Display for StateChange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}->{}", self.current(), self.next())
    }
}

/// Non-failure outcome of a state transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum StateChangeSuccess {
    /// The transition completed.
    #[default]
    Success,
    /// The transition completes later; see `Element::commit_async_state`.
    Async,
    /// Completed, but the element cannot produce data in PAUSED (live source).
    NoPreroll,
}

/// Outcome of a state transition.
pub type StateChangeResult = Result<StateChangeSuccess, StateChangeError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_order() {
        assert!(State::Null < State::Ready);
        assert!(State::Paused < State::Playing);
    }

    #[test]
    fn test_step_towards() {
        assert_eq!(State::Null.step_towards(State::Playing), State::Ready);
        assert_eq!(State::Playing.step_towards(State::Null), State::Paused);
        assert_eq!(State::Paused.step_towards(State::Paused), State::Paused);
    }

    #[test]
    fn test_transition_between() {
        let t = StateChange::towards(State::Ready, State::Playing).unwrap();
        assert_eq!(t, StateChange::ReadyToPaused);
        assert_eq!(t.current(), State::Ready);
        assert_eq!(t.next(), State::Paused);
        assert!(t.is_upward());
        assert!(StateChange::between(State::Null, State::Paused).is_none());
        assert!(StateChange::towards(State::Ready, State::Ready).is_none());
        assert_eq!(StateChange::PlayingToPaused.to_string(), "PLAYING->PAUSED");
    }
}
