//! Trailing machine tags appended by the generation service.
//!
//! Interventions end in a `<STATUS: …>` tag carrying a risk delta, endings
//! in an `<ENDING: success|failure>` tag. Decoding never fails: a missing or
//! malformed tag reads as "no change" (status) or "undetermined" (ending).

use once_cell::sync::Lazy;
use regex::{Captures, Regex};

/// Largest absolute risk delta a single reply may report.
pub const MAX_DELTA: i32 = 2;

static STATUS_AT_END_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r#"(?i)\s*["“”']?<STATUS:\s*(?:(risk_up|risk_down)\s*([+-]?\d+)?|neutral)\s*>["“”']?\s*$"#,
    )
    .expect("invalid trailing status regex")
});

static STATUS_ANYWHERE_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?i)["“”']?<STATUS:[^>]+>["“”']?\s*"#).expect("invalid stray status regex")
});

static ENDING_AT_END_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?i)\s*["“”']?<ENDING:\s*(success|failure)\s*>["“”']?\s*$"#)
        .expect("invalid trailing ending regex")
});

static ENDING_ANYWHERE_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?i)["“”']?<ENDING:[^>]*>["“”']?\s*"#).expect("invalid stray ending regex")
});

/// Result of decoding a status-tagged reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusDecode {
    /// Reply text with every status tag removed.
    pub visible: String,
    /// Signed risk delta, clamped to `[-MAX_DELTA, MAX_DELTA]`.
    pub delta: i32,
}

/// Success or failure as declared by an ending tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Ending {
    /// `<ENDING: success>`
    Success,
    /// `<ENDING: failure>`
    Failure,
}

/// Result of decoding an ending-tagged reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EndingDecode {
    /// Ending text with every ending tag removed.
    pub visible: String,
    /// `None` when no well-formed tag closes the text.
    pub ending: Option<Ending>,
}

impl EndingDecode {
    /// An undetermined ending counts as a failure.
    pub fn is_success(&self) -> bool {
        self.ending == Some(Ending::Success)
    }
}

/// Decode the risk delta from a reply and return the text the player sees.
pub fn decode_status(text: &str) -> StatusDecode {
    let trimmed = text.trim_end();
    let delta = STATUS_AT_END_RE
        .captures(trimmed)
        .and_then(|caps| status_delta(&caps));

    match delta {
        Some(delta) => {
            let without_tail = STATUS_AT_END_RE.replace(trimmed, "");
            StatusDecode {
                visible: remove_stray_status(&without_tail),
                delta,
            }
        }
        None => StatusDecode {
            visible: remove_stray_status(trimmed),
            delta: 0,
        },
    }
}

/// Remove status tags from `text` without looking at their values.
pub fn strip_status(text: &str) -> String {
    decode_status(text).visible
}

/// Decode the ending kind from generated ending text.
pub fn decode_ending(text: &str) -> EndingDecode {
    let trimmed = text.trim();
    let ending = ENDING_AT_END_RE.captures(trimmed).and_then(|caps| {
        match caps.get(1)?.as_str().to_ascii_lowercase().as_str() {
            "success" => Some(Ending::Success),
            "failure" => Some(Ending::Failure),
            _ => None,
        }
    });

    let without_tail = if ending.is_some() {
        ENDING_AT_END_RE.replace(trimmed, "").into_owned()
    } else {
        trimmed.to_string()
    };
    let visible = ENDING_ANYWHERE_RE
        .replace_all(&without_tail, "")
        .trim()
        .to_string();

    EndingDecode { visible, ending }
}

/// Remove ending tags from `text`.
pub fn strip_ending(text: &str) -> String {
    decode_ending(text).visible
}

fn status_delta(caps: &Captures<'_>) -> Option<i32> {
    let Some(kind) = caps.get(1) else {
        // neutral
        return Some(0);
    };
    let magnitude = match caps.get(2) {
        Some(num) => num.as_str().parse::<i64>().ok()?,
        None => 1,
    };
    let signed = if kind.as_str().eq_ignore_ascii_case("risk_down") {
        magnitude.saturating_neg()
    } else {
        magnitude
    };
    Some(signed.clamp(-(MAX_DELTA as i64), MAX_DELTA as i64) as i32)
}

fn remove_stray_status(text: &str) -> String {
    STATUS_ANYWHERE_RE
        .replace_all(text, "")
        .trim_end()
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clamps_large_deltas() {
        assert_eq!(decode_status("그가 웃었다. <STATUS: risk_up3>").delta, 2);
        assert_eq!(decode_status("그가 웃었다. <STATUS: risk_down5>").delta, -2);
        assert_eq!(decode_status("그가 웃었다. <STATUS: risk_up>").delta, 1);
        assert_eq!(decode_status("그가 웃었다. <STATUS: risk_down>").delta, -1);
    }

    #[test]
    fn neutral_and_missing_tags_are_zero() {
        let neutral = decode_status("조용한 밤이었다.\n<STATUS: neutral>");
        assert_eq!(neutral.delta, 0);
        assert_eq!(neutral.visible, "조용한 밤이었다.");

        let plain = decode_status("태그가 없는 문단.");
        assert_eq!(plain.delta, 0);
        assert_eq!(plain.visible, "태그가 없는 문단.");
    }

    #[test]
    fn removes_quotes_around_trailing_tag() {
        let decoded = decode_status("지연이 고개를 끄덕였다. \"<STATUS: Risk_Down2>\"  ");
        assert_eq!(decoded.delta, -2);
        assert_eq!(decoded.visible, "지연이 고개를 끄덕였다.");
    }

    #[test]
    fn keeps_closing_quote_of_final_dialogue() {
        let decoded =
            decode_status("지연은 고개를 저었다. \"괜찮아, 가자.\"\n<STATUS: risk_down1>");
        assert_eq!(decoded.delta, -1);
        assert_eq!(decoded.visible, "지연은 고개를 저었다. \"괜찮아, 가자.\"");

        let ending = decode_ending("민우가 웃었다. “고마워.”\n<ENDING: success>");
        assert_eq!(ending.ending, Some(Ending::Success));
        assert_eq!(ending.visible, "민우가 웃었다. “고마워.”");

        let stray = strip_status("“가지 마.” <STATUS: risk_up1> 그녀는 멈췄다.");
        assert_eq!(stray, "“가지 마.” 그녀는 멈췄다.");
    }

    #[test]
    fn stray_tags_are_removed_without_delta() {
        let decoded = decode_status("<STATUS: risk_up1> 민우는 말을 멈췄다. 그리고 떠났다.");
        assert_eq!(decoded.delta, 0);
        assert_eq!(decoded.visible, "민우는 말을 멈췄다. 그리고 떠났다.");
    }

    #[test]
    fn unparseable_number_is_treated_as_absent() {
        let decoded = decode_status("끝. <STATUS: risk_up99999999999999999999>");
        assert_eq!(decoded.delta, 0);
        assert_eq!(decoded.visible, "끝.");
    }

    #[test]
    fn stripping_is_idempotent() {
        let samples = [
            "문단. <STATUS: neutral> <STATUS: risk_up1>",
            "문단. '<STATUS: risk_down1>'",
            "문단 <STATUS: risk_up2> 중간",
            "그냥 문장",
        ];
        for sample in samples {
            let once = strip_status(sample);
            assert_eq!(strip_status(&once), once, "sample: {sample}");
        }

        let ending = "결말. <ENDING: failure> <ENDING: success>";
        let once = strip_ending(ending);
        assert_eq!(strip_ending(&once), once);
    }

    #[test]
    fn decodes_trailing_ending() {
        let success = decode_ending("두 사람은 웃었다.\n<ENDING: SUCCESS>");
        assert_eq!(success.ending, Some(Ending::Success));
        assert!(success.is_success());
        assert_eq!(success.visible, "두 사람은 웃었다.");

        let failure = decode_ending("결국 지연은 눈을 감았다. <ENDING: failure>");
        assert_eq!(failure.ending, Some(Ending::Failure));
        assert!(!failure.is_success());
    }

    #[test]
    fn ending_not_at_end_is_undetermined() {
        let decoded = decode_ending("<ENDING: success> 그러나 이야기는 계속된다.");
        assert_eq!(decoded.ending, None);
        assert!(!decoded.is_success());
        assert_eq!(decoded.visible, "그러나 이야기는 계속된다.");
    }
}
