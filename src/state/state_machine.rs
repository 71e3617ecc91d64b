use thiserror::Error;

use crate::config::QUESTIONS_PER_QUIZ;

/// Lifecycle phases a room moves through while hosting a quiz.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QuizPhase {
    /// Participants may join and leave; the host may start a quiz.
    Lobby,
    /// The start countdown is running; the first question opens when it fires.
    Starting,
    /// Question `i` is open for answers.
    Asking(u8),
    /// Question `i` is closed; the reveal window runs before the next one.
    Reveal(u8),
    /// All questions are done; standings are being emitted.
    Finished,
    /// Terminal. The room's transient state is gone.
    Dead,
}

impl QuizPhase {
    pub fn is_terminal(self) -> bool {
        matches!(self, QuizPhase::Dead)
    }
}

/// Events that can be applied to the room state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QuizEvent {
    /// The host pressed start while the room was in the lobby.
    HostStarted,
    /// The start countdown elapsed.
    StartDelayElapsed,
    /// A participant claimed first-correct on question `i`.
    WinnerClaimed(u8),
    /// Question `i` hit its deadline with no correct answer.
    DeadlineExpired(u8),
    /// The reveal window after question `i` elapsed.
    RevealElapsed(u8),
    /// Standings went out; nothing remains to run.
    Retired,
    /// The last seated participant left the room.
    LastParticipantLeft,
    /// A storage failure forced the room down mid-quiz.
    Aborted,
}

/// Error returned when attempting to apply an invalid transition.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid transition: {event:?} cannot be applied while in {from:?}")]
pub struct InvalidTransition {
    pub from: QuizPhase,
    pub event: QuizEvent,
}

/// State machine implementing the per-room quiz lifecycle.
#[derive(Debug, Clone)]
pub struct QuizStateMachine {
    phase: QuizPhase,
}

impl Default for QuizStateMachine {
    fn default() -> Self {
        Self {
            phase: QuizPhase::Lobby,
        }
    }
}

impl QuizStateMachine {
    /// Create a new state machine initialised in the lobby.
    pub fn new() -> Self {
        Self::default()
    }

    /// Inspect the current phase.
    pub fn phase(&self) -> QuizPhase {
        self.phase
    }

    /// Apply an event, moving the machine to the next phase.
    pub fn apply(&mut self, event: QuizEvent) -> Result<QuizPhase, InvalidTransition> {
        let next = self.compute_transition(event)?;
        self.phase = next;
        Ok(next)
    }

    /// Compute the transition for an event if the transition is valid.
    fn compute_transition(&self, event: QuizEvent) -> Result<QuizPhase, InvalidTransition> {
        let last = (QUESTIONS_PER_QUIZ - 1) as u8;
        let next = match (self.phase, event) {
            (QuizPhase::Lobby, QuizEvent::HostStarted) => QuizPhase::Starting,
            (QuizPhase::Starting, QuizEvent::StartDelayElapsed) => QuizPhase::Asking(0),
            (QuizPhase::Asking(i), QuizEvent::WinnerClaimed(j)) if i == j => QuizPhase::Reveal(i),
            (QuizPhase::Asking(i), QuizEvent::DeadlineExpired(j)) if i == j => QuizPhase::Reveal(i),
            (QuizPhase::Reveal(i), QuizEvent::RevealElapsed(j)) if i == j && i < last => {
                QuizPhase::Asking(i + 1)
            }
            (QuizPhase::Reveal(i), QuizEvent::RevealElapsed(j)) if i == j => QuizPhase::Finished,
            (QuizPhase::Finished, QuizEvent::Retired) => QuizPhase::Dead,
            (_, QuizEvent::LastParticipantLeft) => QuizPhase::Dead,
            (_, QuizEvent::Aborted) => QuizPhase::Dead,
            (from, event) => return Err(InvalidTransition { from, event }),
        };

        Ok(next)
    }
}
