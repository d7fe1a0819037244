#![allow(missing_docs)]

//! Game session state and the time-slip state machine.

mod machine;
mod models;

pub use machine::{Game, PendingIntervention, PendingOutcome, StoryDraft};
pub use models::{Exchange, Mode, ModeKind, Outcome, Session, MAX_TURNS, STARTING_TICKETS};
