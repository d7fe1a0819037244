//! Splitting a generated story into labelled checkpoint blocks.

use once_cell::sync::Lazy;
use regex::Regex;

/// Number of blocks a story is cut into.
pub const MAX_CHECKPOINTS: usize = 5;

/// Shared label grammar: `[체크포인트 N]`, `[CPN]`, `[Checkpoint N]`, `[엔딩]`,
/// `[결말]`, `[Ending]`, `[Conclusion]`, each with an optional `: subtitle`.
const LABEL: &str =
    r"\[(?:체크포인트\s*[1-5]|CP[1-5]|Checkpoint\s*[1-5]|엔딩|결말|Ending|Conclusion)(?::[^\]]*)?\]";

static LABEL_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(&format!("(?i){LABEL}")).expect("invalid checkpoint label regex"));

static LEADING_LABEL_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(&format!(r"(?i)^\s*{LABEL}\s*")).expect("invalid leading label regex")
});

static ENDING_LABEL_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)^\s*\[(?:엔딩|결말|Ending|Conclusion|체크포인트\s*5|Checkpoint\s*5|CP5)(?::[^\]]*)?\]",
    )
    .expect("invalid ending label regex")
});

static BLANK_LINE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\n[ \t]*\n").expect("invalid paragraph regex"));

/// Cut `text` into at most [`MAX_CHECKPOINTS`] blocks, labels included.
///
/// Blocks start right before each label. When the labels yield fewer than
/// five fragments the text is split on blank lines instead.
pub fn split_checkpoints(text: &str) -> Vec<String> {
    let mut cuts: Vec<usize> = LABEL_RE.find_iter(text).map(|m| m.start()).collect();
    if cuts.first() != Some(&0) {
        cuts.insert(0, 0);
    }
    cuts.push(text.len());

    let fragments: Vec<String> = cuts
        .windows(2)
        .map(|pair| text[pair[0]..pair[1]].trim())
        .filter(|fragment| !fragment.is_empty())
        .map(str::to_string)
        .collect();

    if fragments.len() >= MAX_CHECKPOINTS {
        return fragments.into_iter().take(MAX_CHECKPOINTS).collect();
    }

    BLANK_LINE_RE
        .split(text.trim())
        .map(str::trim)
        .filter(|paragraph| !paragraph.is_empty())
        .take(MAX_CHECKPOINTS)
        .map(str::to_string)
        .collect()
}

/// Remove the leading label of a block, leaving the body.
pub fn strip_label(block: &str) -> String {
    LEADING_LABEL_RE.replace(block.trim(), "").into_owned()
}

/// Remove every label occurrence from `text`.
pub fn remove_labels(text: &str) -> String {
    LABEL_RE.replace_all(text, " ").into_owned()
}

/// Whether a block opens with an ending label; such a block cannot be revisited.
pub fn is_ending_block(block: &str) -> bool {
    ENDING_LABEL_RE.is_match(block)
}

/// A run of text that is either a checkpoint label or ordinary prose.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Segment<'a> {
    /// Slice of the source text.
    pub text: &'a str,
    /// Whether `text` is a checkpoint label.
    pub is_label: bool,
}

/// Split `text` into segments so every label occurrence can be styled.
pub fn highlight_labels(text: &str) -> Vec<Segment<'_>> {
    let mut segments = Vec::new();
    let mut last = 0;
    for found in LABEL_RE.find_iter(text) {
        if found.start() > last {
            segments.push(Segment {
                text: &text[last..found.start()],
                is_label: false,
            });
        }
        segments.push(Segment {
            text: found.as_str(),
            is_label: true,
        });
        last = found.end();
    }
    if last < text.len() {
        segments.push(Segment {
            text: &text[last..],
            is_label: false,
        });
    }
    segments
}
