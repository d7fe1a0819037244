//! Error types shared across the core crate.

use std::time::Duration;

use thiserror::Error;

use crate::session::ModeKind;

/// Failure talking to the text-generation service.
#[derive(Debug, Error)]
pub enum GenerationError {
    /// The request never produced an HTTP response.
    #[error("generation request failed: {0}")]
    Transport(#[from] reqwest::Error),

    /// The service answered with a non-success status.
    #[error("generation service returned {status}: {body}")]
    Status {
        /// HTTP status code.
        status: u16,
        /// Response body, truncated.
        body: String,
    },

    /// The response body did not have the expected shape.
    #[error("could not decode generation response: {0}")]
    Decode(String),

    /// The service answered successfully but without any text.
    #[error("generation service returned an empty response")]
    Empty,

    /// The call did not finish within the configured limit.
    #[error("generation timed out after {0:?}")]
    TimedOut(Duration),
}

impl GenerationError {
    /// Whether repeating the same request may succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Transport(_) | Self::TimedOut(_) => true,
            Self::Status { status, .. } => *status == 429 || *status >= 500,
            Self::Decode(_) | Self::Empty => false,
        }
    }
}

/// An operation the current game state does not allow. The session is left
/// untouched whenever one of these is returned.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Rejection {
    /// Story-dependent operation before the story exists.
    #[error("the story has not been generated yet")]
    StoryNotReady,

    /// A second story install.
    #[error("the story has already been generated")]
    StoryAlreadyInstalled,

    /// The cast is missing.
    #[error("no player role has been assigned")]
    NoPlayerRole,

    /// Checkpoint outside the selectable range.
    #[error("checkpoint {number} cannot be selected (allowed: 1..={max})")]
    CheckpointNotSelectable {
        /// One-based checkpoint the player asked for.
        number: usize,
        /// Highest selectable checkpoint.
        max: usize,
    },

    /// Blank or whitespace-only intervention.
    #[error("intervention text is empty")]
    EmptyInput,

    /// The turn limit is reached.
    #[error("all {max} turns have been used")]
    TurnsExhausted {
        /// Turn limit of a game.
        max: u32,
    },

    /// Operation not allowed in the current mode.
    #[error("operation requires {expected:?} mode but the game is in {actual:?}")]
    WrongMode {
        /// Mode the operation needs.
        expected: ModeKind,
        /// Mode the game was in.
        actual: ModeKind,
    },

    /// Ticket or finish before the outcome was generated.
    #[error("the present has no outcome yet")]
    OutcomeMissing,

    /// Outcome request while one is cached.
    #[error("an outcome for this state is already cached")]
    OutcomeCached,

    /// Ticket spent on a successful ending.
    #[error("a ticket can only be spent after a failed ending")]
    OutcomeNotFailure,

    /// All tickets are used.
    #[error("no tickets left")]
    NoTickets,

    /// Finishing on a failure while the player could still retry.
    #[error("tickets remain; spend one or keep intervening")]
    TicketsRemaining,

    /// A reply or outcome built for an earlier state.
    #[error("the game moved on before this reply arrived")]
    Stale,
}

/// Error returned by state-machine operations that call the generator.
#[derive(Debug, Error)]
pub enum GameError {
    /// The state machine refused the operation.
    #[error(transparent)]
    Rejected(#[from] Rejection),

    /// The generation call failed.
    #[error(transparent)]
    Generation(#[from] GenerationError),
}
