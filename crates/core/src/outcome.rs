//! Deciding what kind of ending the accumulated state earns.


/// Risk at or below which the tragedy can be averted.
pub const SUCCESS_RISK: i32 = -2;
/// Checkpoints that must have been touched, and improved, for a success.
pub const SUCCESS_CHECKPOINTS: usize = 2;

/// Shape of a failed ending.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureMode {
    /// The original risk flags still overlap; the same tragedy repeats.
    SameCause,
    /// Some flags were defused but a displaced combination causes a different loss.
    Butterfly,
}

/// The ending the next outcome request asks for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    /// The victim is saved.
    Success,
    /// The tragedy happens in the given way.
    Failure(FailureMode),
}

impl Verdict {
    /// Whether this is [`Verdict::Success`].
    pub fn is_success(self) -> bool {
        matches!(self, Self::Success)
    }
}

/// Apply the outcome policy to the current counters.
pub fn judge(risk: i32, touched: usize, improved: usize) -> Verdict {
    if risk <= SUCCESS_RISK && touched >= SUCCESS_CHECKPOINTS && improved >= SUCCESS_CHECKPOINTS {
        return Verdict::Success;
    }
    let worsened = touched.saturating_sub(improved);
    if improved == 0 || worsened > 0 {
        Verdict::Failure(FailureMode::SameCause)
    } else {
        Verdict::Failure(FailureMode::Butterfly)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn success_needs_all_three_conditions() {
        assert_eq!(judge(-2, 2, 2), Verdict::Success);
        assert_eq!(judge(-5, 4, 3), Verdict::Success);
        assert!(!judge(-2, 1, 1).is_success());
        assert!(!judge(-2, 3, 1).is_success());
        assert!(!judge(-1, 2, 2).is_success());
    }

    #[test]
    fn improved_everywhere_but_not_enough_is_butterfly() {
        assert_eq!(judge(-1, 2, 2), Verdict::Failure(FailureMode::Butterfly));
    }

    #[test]
    fn untouched_or_worsened_is_same_cause() {
        assert_eq!(judge(0, 1, 0), Verdict::Failure(FailureMode::SameCause));
        assert_eq!(judge(0, 0, 0), Verdict::Failure(FailureMode::SameCause));
        assert_eq!(judge(1, 3, 2), Verdict::Failure(FailureMode::SameCause));
    }
}
