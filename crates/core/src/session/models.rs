#![allow(missing_docs)]

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};

use crate::{
    cast::Cast,
    checkpoints::strip_label,
    outcome::Verdict,
    tags::Ending,
};

/// Interventions available in one game.
pub const MAX_TURNS: u32 = 20;
/// Retries available after failed endings.
pub const STARTING_TICKETS: u32 = 3;

/// Where the player currently is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    /// Choosing a checkpoint to travel back to.
    SelectCheckpoint,
    /// Intervening at the given zero-based checkpoint.
    Past { checkpoint: usize },
    /// Looking at the ending the current timeline produces.
    Present,
    /// Terminal.
    GameOver { success: bool },
}

impl Mode {
    pub fn kind(&self) -> ModeKind {
        match self {
            Self::SelectCheckpoint => ModeKind::SelectCheckpoint,
            Self::Past { .. } => ModeKind::Past,
            Self::Present => ModeKind::Present,
            Self::GameOver { .. } => ModeKind::GameOver,
        }
    }
}

/// [`Mode`] without its payload, for error reporting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ModeKind {
    SelectCheckpoint,
    Past,
    Present,
    GameOver,
}

/// One player line and the reply it produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Exchange {
    pub player_input: String,
    /// Reply with its status tag removed.
    pub reply: String,
    /// Risk delta decoded from the reply's status tag.
    pub delta: i32,
    pub at: DateTime<Utc>,
}

/// A generated ending for the current timeline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Outcome {
    /// What the policy asked the model to write.
    pub verdict: Verdict,
    /// Ending text without its tag.
    pub text: String,
    /// What the ending tag declared; `None` when the tag was missing.
    pub ending: Option<Ending>,
}

impl Outcome {
    /// Missing tags count as failure.
    pub fn is_success(&self) -> bool {
        self.ending == Some(Ending::Success)
    }
}

/// Everything one game accumulates. Mutated only through [`super::Game`].
#[derive(Debug, Clone)]
pub struct Session {
    pub(crate) turn: u32,
    pub(crate) tickets: u32,
    pub(crate) mode: Mode,
    pub(crate) risk: i32,
    pub(crate) touched: BTreeSet<usize>,
    pub(crate) improved: BTreeSet<usize>,
    pub(crate) selected_checkpoint: Option<usize>,
    pub(crate) story: String,
    pub(crate) checkpoints: Vec<String>,
    pub(crate) logs: BTreeMap<usize, Vec<Exchange>>,
    pub(crate) cast: Option<Cast>,
    pub(crate) outcome: Option<Outcome>,
    /// Free-form memo kept by the player.
    pub notes: String,
    pub(crate) started_at: DateTime<Utc>,
}

impl Default for Session {
    fn default() -> Self {
        Self::new()
    }
}

impl Session {
    pub fn new() -> Self {
        Self {
            turn: 0,
            tickets: STARTING_TICKETS,
            mode: Mode::SelectCheckpoint,
            risk: 0,
            touched: BTreeSet::new(),
            improved: BTreeSet::new(),
            selected_checkpoint: None,
            story: String::new(),
            checkpoints: Vec::new(),
            logs: BTreeMap::new(),
            cast: None,
            outcome: None,
            notes: String::new(),
            started_at: Utc::now(),
        }
    }

    pub fn turn(&self) -> u32 {
        self.turn
    }

    pub fn turns_left(&self) -> u32 {
        MAX_TURNS.saturating_sub(self.turn)
    }

    pub fn tickets(&self) -> u32 {
        self.tickets
    }

    pub fn mode(&self) -> Mode {
        self.mode
    }

    pub fn risk(&self) -> i32 {
        self.risk
    }

    pub fn touched(&self) -> &BTreeSet<usize> {
        &self.touched
    }

    pub fn improved(&self) -> &BTreeSet<usize> {
        &self.improved
    }

    /// Zero-based index of the most recently selected checkpoint.
    pub fn selected_checkpoint(&self) -> Option<usize> {
        self.selected_checkpoint
    }

    pub fn story(&self) -> &str {
        &self.story
    }

    pub fn checkpoints(&self) -> &[String] {
        &self.checkpoints
    }

    /// Checkpoint text without its leading label.
    pub fn checkpoint_body(&self, index: usize) -> Option<String> {
        self.checkpoints.get(index).map(|block| strip_label(block))
    }

    pub fn logs(&self) -> &BTreeMap<usize, Vec<Exchange>> {
        &self.logs
    }

    pub fn log(&self, checkpoint: usize) -> &[Exchange] {
        self.logs
            .get(&checkpoint)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    pub fn cast(&self) -> Option<&Cast> {
        self.cast.as_ref()
    }

    /// Name the player speaks as, empty until the story exists.
    pub fn player_role(&self) -> &str {
        self.cast.as_ref().map(Cast::player_role).unwrap_or("")
    }

    pub fn outcome(&self) -> Option<&Outcome> {
        self.outcome.as_ref()
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    pub fn is_story_ready(&self) -> bool {
        !self.checkpoints.is_empty()
    }
}
