//! Narrative tone of an intervention reply.
//!
//! The tone biases how the partner reacts, independent of the risk delta the
//! model reports. One draw per intervention, seeded by `(turn, checkpoint,
//! risk)` so replays of the same state pick the same tone.

use rand::{rngs::StdRng, Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Mood requested for the partner's reaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tone {
    /// Suspicion, coldness or irritation; may only report risk up or neutral.
    NegativeAnchor,
    /// Calm with a single odd signal; reports neutral.
    SubtleMixed,
    /// Warmth or small reconciliation; reports risk down.
    PositiveFeint,
}

impl Tone {
    /// Short Korean label used inside prompts.
    pub fn label(self) -> &'static str {
        match self {
            Self::NegativeAnchor => "부정적",
            Self::SubtleMixed => "미묘",
            Self::PositiveFeint => "긍정적",
        }
    }
}

/// Inputs the tone draw is keyed on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ToneSeed {
    /// Turn number the intervention will occupy (1-based).
    pub turn: u32,
    /// Zero-based checkpoint index.
    pub checkpoint: usize,
    /// Risk before the intervention.
    pub risk: i32,
}

impl ToneSeed {
    fn key(&self) -> String {
        format!("{}-{}-{}", self.turn, self.checkpoint, self.risk)
    }
}

/// Source of the uniform draw behind tone selection.
pub trait ToneSource: Send {
    /// Return a value in `[0, 1)` for `seed`.
    fn draw(&mut self, seed: ToneSeed) -> f64;
}

/// Deterministic source: hashes the seed key and draws from a seeded `StdRng`.
#[derive(Debug, Default, Clone, Copy)]
pub struct SeededTone;

impl ToneSource for SeededTone {
    fn draw(&mut self, seed: ToneSeed) -> f64 {
        let digest = Sha256::digest(seed.key().as_bytes());
        let mut bytes = [0u8; 8];
        bytes.copy_from_slice(&digest[..8]);
        let mut rng = StdRng::seed_from_u64(u64::from_le_bytes(bytes));
        rng.random::<f64>()
    }
}

/// Always returns the same value. Handy for tests and scripted demos.
#[derive(Debug, Clone, Copy)]
pub struct FixedTone(pub f64);

impl ToneSource for FixedTone {
    fn draw(&mut self, _seed: ToneSeed) -> f64 {
        self.0
    }
}

/// Cut points for the tone draw.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ToneThresholds {
    /// First exchange at a checkpoint: below this, negative.
    pub first_negative: f64,
    /// First exchange: below this (and above `first_negative`), mixed; else positive.
    pub first_mixed: f64,
    /// Later exchanges: below this, positive.
    pub later_positive: f64,
    /// Later exchanges: below this, mixed; else negative.
    pub later_mixed: f64,
}

impl Default for ToneThresholds {
    fn default() -> Self {
        Self {
            first_negative: 0.6,
            first_mixed: 0.8,
            later_positive: 0.4,
            later_mixed: 0.7,
        }
    }
}

impl ToneThresholds {
    /// Check that every cut point lies in `[0, 1]` and each pair is ordered.
    pub fn validate(&self) -> Result<(), String> {
        let in_unit = |value: f64| (0.0..=1.0).contains(&value);
        if ![
            self.first_negative,
            self.first_mixed,
            self.later_positive,
            self.later_mixed,
        ]
        .into_iter()
        .all(in_unit)
        {
            return Err("tone thresholds must lie in [0, 1]".to_string());
        }
        if self.first_negative > self.first_mixed {
            return Err("tone.first_negative must not exceed tone.first_mixed".to_string());
        }
        if self.later_positive > self.later_mixed {
            return Err("tone.later_positive must not exceed tone.later_mixed".to_string());
        }
        Ok(())
    }

    /// Map a draw to a tone. `prior_exchanges` counts earlier replies at the
    /// same checkpoint; the opening exchange leans negative.
    pub fn pick(&self, draw: f64, prior_exchanges: usize) -> Tone {
        if prior_exchanges == 0 {
            if draw < self.first_negative {
                Tone::NegativeAnchor
            } else if draw < self.first_mixed {
                Tone::SubtleMixed
            } else {
                Tone::PositiveFeint
            }
        } else if draw < self.later_positive {
            Tone::PositiveFeint
        } else if draw < self.later_mixed {
            Tone::SubtleMixed
        } else {
            Tone::NegativeAnchor
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn seeded_draw_is_reproducible() {
        let seed = ToneSeed {
            turn: 3,
            checkpoint: 1,
            risk: -1,
        };
        let first = SeededTone.draw(seed);
        let second = SeededTone.draw(seed);
        assert_eq!(first, second);
        assert!((0.0..1.0).contains(&first));
    }

    #[test]
    fn different_seeds_spread_out() {
        let draws: Vec<f64> = (1..=20)
            .map(|turn| {
                SeededTone.draw(ToneSeed {
                    turn,
                    checkpoint: 0,
                    risk: 0,
                })
            })
            .collect();
        let first = draws[0];
        assert!(draws.iter().any(|draw| (draw - first).abs() > f64::EPSILON));
    }

    #[test]
    fn opening_exchange_leans_negative() {
        let thresholds = ToneThresholds::default();
        assert_eq!(thresholds.pick(0.1, 0), Tone::NegativeAnchor);
        assert_eq!(thresholds.pick(0.7, 0), Tone::SubtleMixed);
        assert_eq!(thresholds.pick(0.9, 0), Tone::PositiveFeint);
    }

    #[test]
    fn later_exchanges_lean_positive() {
        let thresholds = ToneThresholds::default();
        assert_eq!(thresholds.pick(0.1, 2), Tone::PositiveFeint);
        assert_eq!(thresholds.pick(0.5, 2), Tone::SubtleMixed);
        assert_eq!(thresholds.pick(0.95, 2), Tone::NegativeAnchor);
    }

    #[test]
    fn fixed_source_ignores_seed() {
        let mut source = FixedTone(0.25);
        let seed = ToneSeed {
            turn: 1,
            checkpoint: 4,
            risk: 7,
        };
        assert_eq!(source.draw(seed), 0.25);
    }
}
