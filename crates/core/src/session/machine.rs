use std::{ops::RangeInclusive, time::Duration};

use chrono::Utc;
use tracing::{info, warn};

use super::models::{Exchange, Mode, ModeKind, Outcome, Session, MAX_TURNS};
use crate::{
    cast::{extract_cast, Cast},
    checkpoints::{is_ending_block, split_checkpoints},
    config::AppConfig,
    error::{GameError, GenerationError, Rejection},
    llm::{generate, ChatRequest, DeltaSink, Generator},
    outcome::{judge, Verdict},
    prompts,
    tags::{decode_ending, decode_status},
    tone::{SeededTone, Tone, ToneSeed, ToneSource, ToneThresholds},
};

/// A generated story, cut into checkpoints, with its cast worked out.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoryDraft {
    pub story: String,
    pub checkpoints: Vec<String>,
    pub cast: Cast,
}

impl StoryDraft {
    /// Generate the story (streamed into `sink` when given) and extract the cast.
    pub async fn generate(
        generator: &dyn Generator,
        sink: Option<&DeltaSink>,
        limit: Duration,
    ) -> Result<Self, GenerationError> {
        let story = generate(generator, &prompts::story_request(), sink, limit)
            .await?
            .trim()
            .to_string();
        let checkpoints = split_checkpoints(&story);
        let cast = extract_cast(
            generator,
            &story,
            checkpoints.last().map(String::as_str),
            limit,
        )
        .await;
        Ok(Self {
            story,
            checkpoints,
            cast,
        })
    }
}

/// An intervention whose request has been built but whose reply has not
/// been applied yet.
#[derive(Debug, Clone)]
pub struct PendingIntervention {
    pub checkpoint: usize,
    /// Turn counter when the request was built.
    pub turn_before: u32,
    pub input: String,
    pub tone: Tone,
    pub request: ChatRequest,
}

/// An ending request for the state captured in `turn` and `tickets`.
#[derive(Debug, Clone)]
pub struct PendingOutcome {
    pub verdict: Verdict,
    pub turn: u32,
    pub tickets: u32,
    pub request: ChatRequest,
}

/// Owns the [`Session`] and performs every mode transition.
///
/// Operations that talk to the generator come in two halves, `prepare_*` /
/// `*_request` and `apply_*`, so a caller can run the call elsewhere and
/// drop it without touching the session. The `async` helpers chain both.
pub struct Game {
    session: Session,
    tone: Box<dyn ToneSource>,
    thresholds: ToneThresholds,
    timeout: Duration,
    stream: bool,
}

impl Game {
    pub fn new(config: &AppConfig) -> Self {
        Self {
            session: Session::new(),
            tone: Box::new(SeededTone),
            thresholds: config.tone,
            timeout: config.request_timeout(),
            stream: config.stream,
        }
    }

    /// Replace the tone draw, e.g. with a fixed value in tests.
    pub fn with_tone_source(mut self, source: impl ToneSource + 'static) -> Self {
        self.tone = Box::new(source);
        self
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    pub fn notes_mut(&mut self) -> &mut String {
        &mut self.session.notes
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Whether story and intervention replies should be streamed.
    pub fn streams(&self) -> bool {
        self.stream
    }

    fn expect_mode(&self, expected: ModeKind) -> Result<(), Rejection> {
        let actual = self.session.mode.kind();
        if actual == expected {
            Ok(())
        } else {
            Err(Rejection::WrongMode { expected, actual })
        }
    }

    /// Whether a story still has to be generated before anything else.
    pub fn needs_story(&self) -> bool {
        !self.session.is_story_ready()
    }

    /// Install a generated story. Only the first draft is ever accepted.
    pub fn install_story(&mut self, draft: StoryDraft) -> Result<(), Rejection> {
        self.expect_mode(ModeKind::SelectCheckpoint)?;
        if self.session.is_story_ready() {
            return Err(Rejection::StoryAlreadyInstalled);
        }
        if draft.checkpoints.is_empty() {
            return Err(Rejection::StoryNotReady);
        }

        let session = &mut self.session;
        session.logs = (0..draft.checkpoints.len())
            .map(|index| (index, Vec::new()))
            .collect();
        session.story = draft.story;
        session.checkpoints = draft.checkpoints;
        info!(
            checkpoints = session.checkpoints.len(),
            player = %draft.cast.player_role(),
            victim = %draft.cast.victim,
            "story installed"
        );
        session.cast = Some(draft.cast);
        Ok(())
    }

    /// Generate and install the story if there is none yet.
    pub async fn ensure_story(
        &mut self,
        generator: &dyn Generator,
        sink: Option<&DeltaSink>,
    ) -> Result<(), GameError> {
        if !self.needs_story() {
            return Ok(());
        }
        self.expect_mode(ModeKind::SelectCheckpoint)?;
        let sink = sink.filter(|_| self.stream);
        let draft = StoryDraft::generate(generator, sink, self.timeout).await?;
        self.install_story(draft)?;
        Ok(())
    }

    /// One-based checkpoint numbers that may be travelled to. A closing
    /// ending block is excluded.
    pub fn selectable_checkpoints(&self) -> RangeInclusive<usize> {
        let checkpoints = &self.session.checkpoints;
        let mut last = checkpoints.len();
        if checkpoints.last().is_some_and(|block| is_ending_block(block)) {
            last -= 1;
        }
        1..=last
    }

    /// Travel to checkpoint `number` (one-based).
    pub fn select_checkpoint(&mut self, number: usize) -> Result<(), Rejection> {
        self.expect_mode(ModeKind::SelectCheckpoint)?;
        if !self.session.is_story_ready() {
            return Err(Rejection::StoryNotReady);
        }
        if self.session.player_role().is_empty() {
            return Err(Rejection::NoPlayerRole);
        }
        let selectable = self.selectable_checkpoints();
        if !selectable.contains(&number) {
            return Err(Rejection::CheckpointNotSelectable {
                number,
                max: *selectable.end(),
            });
        }

        let checkpoint = number - 1;
        self.session.selected_checkpoint = Some(checkpoint);
        self.session.mode = Mode::Past { checkpoint };
        info!(checkpoint = number, turn = self.session.turn, "travelled to checkpoint");
        Ok(())
    }

    pub fn return_to_present(&mut self) -> Result<(), Rejection> {
        self.expect_mode(ModeKind::Past)?;
        self.session.mode = Mode::Present;
        info!(turn = self.session.turn, risk = self.session.risk, "returned to present");
        Ok(())
    }

    /// Validate `input` and build the intervention request. Only the tone
    /// source advances; the session is unchanged.
    pub fn prepare_intervention(&mut self, input: &str) -> Result<PendingIntervention, Rejection> {
        let Mode::Past { checkpoint } = self.session.mode else {
            return Err(Rejection::WrongMode {
                expected: ModeKind::Past,
                actual: self.session.mode.kind(),
            });
        };
        let input = input.trim();
        if input.is_empty() {
            return Err(Rejection::EmptyInput);
        }
        if self.session.turn >= MAX_TURNS {
            return Err(Rejection::TurnsExhausted { max: MAX_TURNS });
        }
        let cast = self.session.cast.as_ref().ok_or(Rejection::NoPlayerRole)?;

        let prior = self.session.log(checkpoint);
        let draw = self.tone.draw(ToneSeed {
            turn: self.session.turn + 1,
            checkpoint,
            risk: self.session.risk,
        });
        let tone = self.thresholds.pick(draw, prior.len());
        let body = self.session.checkpoint_body(checkpoint).unwrap_or_default();
        let request = prompts::intervention_request(cast, &body, prior, input, tone);

        Ok(PendingIntervention {
            checkpoint,
            turn_before: self.session.turn,
            input: input.to_string(),
            tone,
            request,
        })
    }

    /// Record the reply to a prepared intervention.
    pub fn apply_intervention(
        &mut self,
        pending: PendingIntervention,
        raw_reply: &str,
    ) -> Result<Exchange, Rejection> {
        let session = &mut self.session;
        if session.turn != pending.turn_before
            || session.mode != (Mode::Past { checkpoint: pending.checkpoint })
        {
            return Err(Rejection::Stale);
        }

        let decoded = decode_status(raw_reply);
        let exchange = Exchange {
            player_input: pending.input,
            reply: decoded.visible,
            delta: decoded.delta,
            at: Utc::now(),
        };

        session.turn += 1;
        session.risk += decoded.delta;
        session.touched.insert(pending.checkpoint);
        if decoded.delta < 0 {
            session.improved.insert(pending.checkpoint);
        }
        session.outcome = None;
        session
            .logs
            .entry(pending.checkpoint)
            .or_default()
            .push(exchange.clone());

        info!(
            turn = session.turn,
            checkpoint = pending.checkpoint + 1,
            tone = pending.tone.label(),
            delta = decoded.delta,
            risk = session.risk,
            "intervention applied"
        );
        Ok(exchange)
    }

    /// Prepare, generate and apply one intervention.
    pub async fn intervene(
        &mut self,
        generator: &dyn Generator,
        input: &str,
        sink: Option<&DeltaSink>,
    ) -> Result<Exchange, GameError> {
        let pending = self.prepare_intervention(input)?;
        let sink = sink.filter(|_| self.stream);
        let raw = generate(generator, &pending.request, sink, self.timeout).await?;
        Ok(self.apply_intervention(pending, &raw)?)
    }

    /// Build the ending request for the current state. Rejected when an
    /// outcome is already cached.
    pub fn outcome_request(&self) -> Result<PendingOutcome, Rejection> {
        self.expect_mode(ModeKind::Present)?;
        if self.session.outcome.is_some() {
            return Err(Rejection::OutcomeCached);
        }
        let cast = self.session.cast.as_ref().ok_or(Rejection::NoPlayerRole)?;

        let verdict = judge(
            self.session.risk,
            self.session.touched.len(),
            self.session.improved.len(),
        );
        let summary =
            prompts::intervention_summary(&self.session.checkpoints, &self.session.logs);
        let request = prompts::ending_request(cast, &self.session.story, &summary, verdict);

        Ok(PendingOutcome {
            verdict,
            turn: self.session.turn,
            tickets: self.session.tickets,
            request,
        })
    }

    /// Cache the ending generated for `pending`.
    pub fn apply_outcome(
        &mut self,
        pending: PendingOutcome,
        raw_reply: &str,
    ) -> Result<Outcome, Rejection> {
        let session = &mut self.session;
        if session.mode != Mode::Present
            || session.turn != pending.turn
            || session.tickets != pending.tickets
        {
            return Err(Rejection::Stale);
        }
        if session.outcome.is_some() {
            return Err(Rejection::OutcomeCached);
        }

        let decoded = decode_ending(raw_reply);
        if decoded.ending.is_none() {
            warn!("ending reply carried no ending tag, treating as failure");
        }
        let outcome = Outcome {
            verdict: pending.verdict,
            text: decoded.visible,
            ending: decoded.ending,
        };
        info!(
            verdict = ?outcome.verdict,
            success = outcome.is_success(),
            turn = session.turn,
            tickets = session.tickets,
            "outcome generated"
        );
        session.outcome = Some(outcome.clone());
        Ok(outcome)
    }

    /// Return the cached outcome, generating it first if there is none.
    pub async fn resolve_present(
        &mut self,
        generator: &dyn Generator,
    ) -> Result<Outcome, GameError> {
        self.expect_mode(ModeKind::Present)?;
        if let Some(outcome) = &self.session.outcome {
            return Ok(outcome.clone());
        }
        let pending = self.outcome_request()?;
        let raw = generate(generator, &pending.request, None, self.timeout).await?;
        Ok(self.apply_outcome(pending, &raw)?)
    }

    fn ticket_check(&self) -> Result<(), Rejection> {
        self.expect_mode(ModeKind::Present)?;
        let outcome = self.session.outcome.as_ref().ok_or(Rejection::OutcomeMissing)?;
        if outcome.is_success() {
            return Err(Rejection::OutcomeNotFailure);
        }
        if self.session.tickets == 0 {
            return Err(Rejection::NoTickets);
        }
        if self.session.turn >= MAX_TURNS {
            return Err(Rejection::TurnsExhausted { max: MAX_TURNS });
        }
        Ok(())
    }

    pub fn can_spend_ticket(&self) -> bool {
        self.ticket_check().is_ok()
    }

    /// Spend a ticket after a failed ending and go back to checkpoint selection.
    pub fn spend_ticket(&mut self) -> Result<(), Rejection> {
        self.ticket_check()?;
        self.session.tickets -= 1;
        self.session.outcome = None;
        self.session.mode = Mode::SelectCheckpoint;
        info!(tickets = self.session.tickets, turn = self.session.turn, "ticket spent");
        Ok(())
    }

    fn finish_check(&self) -> Result<bool, Rejection> {
        self.expect_mode(ModeKind::Present)?;
        let outcome = self.session.outcome.as_ref().ok_or(Rejection::OutcomeMissing)?;
        if outcome.is_success() {
            return Ok(true);
        }
        if self.session.tickets == 0 || self.session.turn >= MAX_TURNS {
            Ok(false)
        } else {
            Err(Rejection::TicketsRemaining)
        }
    }

    pub fn can_finish(&self) -> bool {
        self.finish_check().is_ok()
    }

    /// End the game on the cached outcome. Returns whether it was a success.
    pub fn finish(&mut self) -> Result<bool, Rejection> {
        let success = self.finish_check()?;
        self.session.mode = Mode::GameOver { success };
        info!(success, turn = self.session.turn, risk = self.session.risk, "game over");
        Ok(success)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tone::FixedTone;

    const STORY: &str = "[체크포인트 1: 약속]\n민우는 카페에서 지연을 기다렸다.\n\n\
[체크포인트 2: 비]\n비가 내리는 거리를 민우와 지연이 걸었다.\n\n\
[체크포인트 3: 다툼]\n민우가 먼저 화를 냈다.\n\n\
[체크포인트 4: 밤길]\n민우는 운전대를 잡았다.\n\n\
[엔딩: 이별]\n결국 지연이 쓰러졌다.";

    fn config() -> AppConfig {
        AppConfig {
            api_key: "test".to_string(),
            ..AppConfig::default()
        }
    }

    fn draft() -> StoryDraft {
        StoryDraft {
            story: STORY.to_string(),
            checkpoints: split_checkpoints(STORY),
            cast: Cast {
                first: "민우".to_string(),
                second: "지연".to_string(),
                victim: "지연".to_string(),
            },
        }
    }

    fn game_in_past(number: usize) -> Game {
        let mut game = Game::new(&config()).with_tone_source(FixedTone(0.5));
        game.install_story(draft()).unwrap();
        game.select_checkpoint(number).unwrap();
        game
    }

    #[test]
    fn installation_creates_one_log_per_checkpoint() {
        let mut game = Game::new(&config());
        assert!(game.needs_story());
        game.install_story(draft()).unwrap();

        let keys: Vec<usize> = game.session().logs().keys().copied().collect();
        assert_eq!(keys, vec![0, 1, 2, 3, 4]);
        assert_eq!(game.session().player_role(), "민우");
        assert_eq!(
            game.install_story(draft()),
            Err(Rejection::StoryAlreadyInstalled)
        );
    }

    #[test]
    fn selection_before_story_is_rejected() {
        let mut game = Game::new(&config());
        assert_eq!(game.select_checkpoint(1), Err(Rejection::StoryNotReady));
        assert_eq!(game.session().mode(), Mode::SelectCheckpoint);
    }

    #[test]
    fn ending_block_is_not_selectable() {
        let mut game = Game::new(&config());
        game.install_story(draft()).unwrap();
        assert_eq!(game.selectable_checkpoints(), 1..=4);
        assert_eq!(
            game.select_checkpoint(5),
            Err(Rejection::CheckpointNotSelectable { number: 5, max: 4 })
        );
        assert_eq!(
            game.select_checkpoint(0),
            Err(Rejection::CheckpointNotSelectable { number: 0, max: 4 })
        );

        game.select_checkpoint(4).unwrap();
        assert_eq!(game.session().selected_checkpoint(), Some(3));
        assert_eq!(game.session().mode(), Mode::Past { checkpoint: 3 });
    }

    #[test]
    fn blank_input_changes_nothing() {
        let mut game = game_in_past(1);
        assert_eq!(
            game.prepare_intervention("   \n").unwrap_err(),
            Rejection::EmptyInput
        );
        assert_eq!(game.session().turn(), 0);
        assert!(game.session().log(0).is_empty());
    }

    #[test]
    fn applied_reply_updates_counters() {
        let mut game = game_in_past(2);
        let pending = game.prepare_intervention("  우산을 챙기자  ").unwrap();
        assert_eq!(pending.input, "우산을 챙기자");
        assert_eq!(pending.tone, Tone::NegativeAnchor);

        let exchange = game
            .apply_intervention(pending, "지연은 고개를 끄덕였다. <STATUS: risk_down1>")
            .unwrap();
        assert_eq!(exchange.reply, "지연은 고개를 끄덕였다.");
        assert_eq!(exchange.delta, -1);

        let session = game.session();
        assert_eq!(session.turn(), 1);
        assert_eq!(session.risk(), -1);
        assert!(session.touched().contains(&1));
        assert!(session.improved().contains(&1));
        assert_eq!(session.log(1).len(), 1);
    }

    #[test]
    fn second_exchange_uses_later_thresholds() {
        let mut game = game_in_past(1);
        let first = game.prepare_intervention("안녕").unwrap();
        game.apply_intervention(first, "<STATUS: neutral>").unwrap();
        let second = game.prepare_intervention("다시").unwrap();
        assert_eq!(second.tone, Tone::SubtleMixed);
        assert_eq!(second.request.messages.len(), 5);
    }

    #[test]
    fn dropped_request_leaves_session_untouched() {
        let mut game = game_in_past(1);
        let before = game.session().clone();
        let pending = game.prepare_intervention("멈춰").unwrap();
        drop(pending);
        let after = game.session();
        assert_eq!(after.turn(), before.turn());
        assert_eq!(after.risk(), before.risk());
        assert_eq!(after.logs(), before.logs());
    }

    #[test]
    fn stale_reply_is_rejected() {
        let mut game = game_in_past(1);
        let stale = game.prepare_intervention("첫 번째").unwrap();
        let fresh = game.prepare_intervention("두 번째").unwrap();
        game.apply_intervention(fresh, "<STATUS: risk_up1>").unwrap();

        assert_eq!(
            game.apply_intervention(stale, "<STATUS: risk_down2>"),
            Err(Rejection::Stale)
        );
        assert_eq!(game.session().turn(), 1);
        assert_eq!(game.session().risk(), 1);
    }

    #[test]
    fn outcome_is_cached_and_cleared_by_ticket() {
        let mut game = game_in_past(1);
        game.return_to_present().unwrap();

        let pending = game.outcome_request().unwrap();
        assert!(!pending.verdict.is_success());
        let outcome = game
            .apply_outcome(pending, "결국 지연은 떠났다. <ENDING: failure>")
            .unwrap();
        assert_eq!(outcome.text, "결국 지연은 떠났다.");
        assert_eq!(game.outcome_request().unwrap_err(), Rejection::OutcomeCached);

        assert_eq!(game.finish(), Err(Rejection::TicketsRemaining));
        game.spend_ticket().unwrap();
        assert_eq!(game.session().tickets(), 2);
        assert!(game.session().outcome().is_none());
        assert_eq!(game.session().mode(), Mode::SelectCheckpoint);
    }

    #[test]
    fn untagged_ending_is_failure() {
        let mut game = game_in_past(1);
        game.return_to_present().unwrap();
        let pending = game.outcome_request().unwrap();
        let outcome = game.apply_outcome(pending, "모호한 결말.").unwrap();
        assert!(!outcome.is_success());
        assert!(game.can_spend_ticket());
        assert!(!game.can_finish());
    }

    #[test]
    fn success_finishes_immediately() {
        let mut game = game_in_past(1);
        game.return_to_present().unwrap();
        let pending = game.outcome_request().unwrap();
        game.apply_outcome(pending, "둘은 함께 웃었다. <ENDING: success>")
            .unwrap();
        assert_eq!(game.spend_ticket(), Err(Rejection::OutcomeNotFailure));
        assert_eq!(game.finish(), Ok(true));
        assert_eq!(game.session().mode(), Mode::GameOver { success: true });
    }

    #[test]
    fn wrong_mode_is_reported() {
        let mut game = Game::new(&config());
        assert_eq!(
            game.return_to_present(),
            Err(Rejection::WrongMode {
                expected: ModeKind::Past,
                actual: ModeKind::SelectCheckpoint,
            })
        );
    }
}
