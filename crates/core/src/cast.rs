//! Working out who the two lovers are and which of them dies.
//!
//! The model is asked first; anything unusable from it falls back to a
//! frequency count over the story text, which never fails.

use std::{collections::HashMap, time::Duration};

use once_cell::sync::Lazy;
use regex::Regex;
use serde::Deserialize;
use serde_json::Value;
use tracing::{info, warn};

use crate::{
    checkpoints::remove_labels,
    llm::{with_timeout, Generator},
    prompts,
};

/// Names used when the story does not yield two candidates.
pub const PLACEHOLDER_NAMES: [&str; 2] = ["인물A", "인물B"];

const EDGE_PUNCTUATION: &[char] = &[
    '"', '\'', '(', ')', '[', ']', '{', '}', ',', '.', '?', '!', '~', '…', '·', '-', ':', ';',
];
const PARTICLES: &[char] = &['은', '는', '이', '가', '을', '를', '과', '와', '랑', '도', '만'];

static NAME_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[가-힣]{2,3}$").expect("invalid name regex"));
static HANGUL_RUN_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[가-힣]{2,3}").expect("invalid hangul run regex"));

/// The two characters of the story.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Cast {
    /// Most frequent name; the victim's partner when the model agrees.
    pub first: String,
    /// Second name.
    pub second: String,
    /// Always equal to `first` or `second`.
    pub victim: String,
}

impl Cast {
    /// The character the player speaks as: whoever is not the victim.
    pub fn player_role(&self) -> &str {
        if self.victim == self.first {
            &self.second
        } else {
            &self.first
        }
    }
}

/// Ask the model for the cast, falling back to [`fallback_cast`] on any problem.
pub async fn extract_cast(
    generator: &dyn Generator,
    story: &str,
    last_block: Option<&str>,
    limit: Duration,
) -> Cast {
    let request = prompts::cast_request(story);
    match with_timeout(limit, generator.complete(&request)).await {
        Ok(raw) => match parse_cast_reply(&raw) {
            Some(cast) => {
                info!(
                    first = %cast.first,
                    second = %cast.second,
                    victim = %cast.victim,
                    "cast extracted by model"
                );
                return cast;
            }
            None => warn!(reply = %raw, "cast reply unusable, using frequency fallback"),
        },
        Err(err) => warn!(%err, "cast request failed, using frequency fallback"),
    }
    let cast = fallback_cast(story, last_block);
    info!(
        first = %cast.first,
        second = %cast.second,
        victim = %cast.victim,
        "cast guessed from story text"
    );
    cast
}

#[derive(Deserialize)]
struct CastReply {
    #[serde(default)]
    characters: Vec<Value>,
    #[serde(default)]
    victim: Value,
}

/// Parse the model's JSON answer. Returns `None` unless it names exactly two
/// distinct valid names and a victim among them.
pub fn parse_cast_reply(raw: &str) -> Option<Cast> {
    let body = unfence(raw);
    let reply: CastReply = serde_json::from_str(body).ok()?;

    let names: Vec<String> = reply
        .characters
        .iter()
        .filter_map(Value::as_str)
        .map(clean_name)
        .filter(|name| is_valid_name(name))
        .collect();
    let victim = clean_name(reply.victim.as_str()?);

    match names.as_slice() {
        [first, second] if first != second && (victim == *first || victim == *second) => {
            Some(Cast {
                first: first.clone(),
                second: second.clone(),
                victim,
            })
        }
        _ => None,
    }
}

/// Guess the cast from name frequencies in `story`.
///
/// The victim is whichever of the two names occurs at least as often as the
/// other in `last_block` (the final paragraph when `None`).
pub fn fallback_cast(story: &str, last_block: Option<&str>) -> Cast {
    let text = remove_labels(story);
    let mut counts: HashMap<String, (usize, usize)> = HashMap::new();
    for (order, found) in HANGUL_RUN_RE.find_iter(&text).enumerate() {
        let name = clean_name(found.as_str());
        if name.is_empty() {
            continue;
        }
        counts.entry(name).or_insert((0, order)).0 += 1;
    }

    let mut ranked: Vec<(String, usize, usize)> = counts
        .into_iter()
        .map(|(name, (count, first_seen))| (name, count, first_seen))
        .collect();
    ranked.sort_by(|a, b| b.1.cmp(&a.1).then(a.2.cmp(&b.2)));

    let mut names = ranked.into_iter().map(|(name, ..)| name);
    let first = names.next().unwrap_or_else(|| PLACEHOLDER_NAMES[0].to_string());
    let second = names.next().unwrap_or_else(|| PLACEHOLDER_NAMES[1].to_string());

    let last = last_block
        .map(str::to_string)
        .unwrap_or_else(|| story.trim().rsplit("\n\n").next().unwrap_or("").to_string());
    let victim = if last.matches(first.as_str()).count() >= last.matches(second.as_str()).count() {
        first.clone()
    } else {
        second.clone()
    };

    Cast {
        first,
        second,
        victim,
    }
}

/// Trim punctuation and a trailing particle from a candidate name.
///
/// The particle is only dropped when at least two characters remain.
pub fn clean_name(raw: &str) -> String {
    let trimmed = raw
        .trim()
        .trim_start_matches(EDGE_PUNCTUATION)
        .trim_end_matches(EDGE_PUNCTUATION);

    if let Some(stripped) = trimmed.strip_suffix(PARTICLES) {
        if stripped.chars().count() >= 2 {
            return stripped.to_string();
        }
    }
    trimmed.to_string()
}

/// Two or three Hangul syllables.
pub fn is_valid_name(name: &str) -> bool {
    NAME_RE.is_match(name)
}

fn unfence(raw: &str) -> &str {
    let body = raw.trim().trim_matches('`').trim();
    match body.get(..4) {
        Some(tag) if tag.eq_ignore_ascii_case("json") => body[4..].trim(),
        _ => body,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checkpoints::split_checkpoints;

    const SAMPLE: &str = "[체크포인트 1: 약속]\n민우는 카페에서 지연을 기다렸다.\n\n\
[체크포인트 2: 비]\n비가 내리는 거리를 민우와 걸었다.\n\n\
[체크포인트 3: 다툼]\n민우가 먼저 화를 냈다.\n\n\
[체크포인트 4: 밤길]\n민우는 운전대를 잡았다.\n\n\
[엔딩: 이별]\n결국 지연이 쓰러지고 민우는 지연을 불렀다.";

    #[test]
    fn cleans_particles_and_punctuation() {
        assert_eq!(clean_name("\"민우는"), "민우");
        assert_eq!(clean_name(" 지연이! "), "지연");
        assert_eq!(clean_name("(서현)"), "서현");
        assert_eq!(clean_name("도는"), "도는");
        assert_eq!(clean_name("비가"), "비가");
    }

    #[test]
    fn validates_hangul_names() {
        assert!(is_valid_name("민우"));
        assert!(is_valid_name("김민우"));
        assert!(!is_valid_name("민"));
        assert!(!is_valid_name("남궁민우"));
        assert!(!is_valid_name("Minwoo"));
    }

    #[test]
    fn fallback_ranks_by_frequency() {
        let blocks = split_checkpoints(SAMPLE);
        let cast = fallback_cast(SAMPLE, blocks.last().map(String::as_str));
        assert_eq!(cast.first, "민우");
        assert_eq!(cast.second, "지연");
        assert_eq!(cast.victim, "지연");
        assert_eq!(cast.player_role(), "민우");

        let again = fallback_cast(SAMPLE, blocks.last().map(String::as_str));
        assert_eq!(again, cast);
    }

    #[test]
    fn fallback_pads_with_placeholders() {
        let cast = fallback_cast("ok", None);
        assert_eq!(cast.first, "인물A");
        assert_eq!(cast.second, "인물B");
        assert_eq!(cast.victim, "인물A");

        let single = fallback_cast("서연 서연 서연", None);
        assert_eq!(single.first, "서연");
        assert_eq!(single.second, "인물B");
        assert_eq!(single.victim, "서연");
    }

    #[test]
    fn parses_fenced_json() {
        let raw = "```json\n{\"characters\": [\"민우는\", \"지연\"], \"victim\": \"지연이\"}\n```";
        let cast = parse_cast_reply(raw).expect("valid cast");
        assert_eq!(cast.first, "민우");
        assert_eq!(cast.second, "지연");
        assert_eq!(cast.victim, "지연");
        assert_eq!(cast.player_role(), "민우");
    }

    #[test]
    fn rejects_unusable_replies() {
        assert!(parse_cast_reply("not json").is_none());
        assert!(parse_cast_reply(r#"{"characters": ["민우"], "victim": "민우"}"#).is_none());
        let rejected = [
            r#"{"characters": ["민우", "민우"], "victim": "민우"}"#,
            r#"{"characters": ["민우", "지연"], "victim": "서현"}"#,
            r#"{"characters": ["Minwoo", "지연"], "victim": "지연"}"#,
            r#"{"characters": ["민우", "지연", "서현"], "victim": "지연"}"#,
        ];
        for reply in rejected {
            assert!(parse_cast_reply(reply).is_none(), "reply: {reply}");
        }
    }
}
