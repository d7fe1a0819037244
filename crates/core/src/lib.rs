#![warn(clippy::all, missing_docs)]

//! Core game logic for About Time.
//!
//! This crate hosts the tag codec, checkpoint splitting, cast extraction,
//! the outcome policy and the session state machine, plus the generation
//! client and configuration used by the terminal UI.

pub mod cast;
pub mod checkpoints;
pub mod config;
pub mod error;
pub mod llm;
pub mod outcome;
pub mod prompts;
pub mod session;
pub mod tags;
pub mod tone;

pub use cast::Cast;
pub use config::AppConfig;
pub use error::{GameError, GenerationError, Rejection};
pub use llm::{Generator, OpenAiClient};
pub use outcome::{FailureMode, Verdict};
pub use session::{Exchange, Game, Mode, Outcome, Session, MAX_TURNS, STARTING_TICKETS};
pub use tone::Tone;
