//! Text assembly: join one item's recognised fragments into a coherent body.
//!
//! ## Why heuristic joining?
//!
//! OCR endpoints return fragments in scan order, but scan order says nothing
//! about paragraph structure: a fragment may end mid-sentence (the line
//! wrapped) or end a paragraph outright. The rules below decide, for each
//! adjacent pair, whether the boundary is a wrapped line (join with a space)
//! or a real break (join with a newline) — as a pure function of the two
//! fragment texts, so assembly is fully reproducible.
//!
//! The sentence-start signature is tuned for the two scripts this tool was
//! built against: an uppercase Latin letter, or a single Hangul syllable
//! followed by whitespace. Fragments in other scripts fall through to the
//! short-text threshold behaviour; no further script rules are applied.

use crate::recognize::TextSegment;
use once_cell::sync::Lazy;
use regex::Regex;

/// Sentence-ending punctuation (ASCII and fullwidth), optionally followed by
/// one closing quote or bracket.
static RE_SENTENCE_END: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"[.!?。！？…]["')\]」』]?$"#).unwrap());

/// New-paragraph markers: an opening bracket/parenthesis, a leading ordinal
/// like "1." or "1)", or a short label followed by a colon.
static RE_BLOCK_START: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(?:[(\[{（【「『〈《]|\d{1,3}[.)]|[^\s:：]{1,8}[:：]\s)").unwrap()
});

/// An uppercase Latin letter opening the fragment.
static RE_UPPER_LATIN: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[A-Z]").unwrap());

/// The script-specific sentence-start signature: one Hangul syllable
/// followed by whitespace.
static RE_HANGUL_SENTENCE_START: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[가-힣]\s").unwrap());

/// How two adjacent fragments are joined.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Joint {
    LineBreak,
    Space,
}

/// Decide the joint between `current` and `next`.
///
/// Evaluated strictly on the two fragment texts; no external state.
fn joint(current: &str, next: &str, short_text_threshold: usize) -> Joint {
    if RE_SENTENCE_END.is_match(current)
        || RE_BLOCK_START.is_match(next)
        || current.chars().count() < short_text_threshold
    {
        return Joint::LineBreak;
    }

    let next_starts_sentence =
        RE_UPPER_LATIN.is_match(next) || RE_HANGUL_SENTENCE_START.is_match(next);
    if !next_starts_sentence {
        // Mid-sentence wrap: the next fragment continues the current line.
        return Joint::Space;
    }

    Joint::LineBreak
}

/// Assemble the fragments of one item into a single text body.
///
/// Whitespace-only fragments contribute neither text nor a separator. The
/// result always ends with exactly one trailing newline (even when every
/// fragment was empty — downstream tooling expects newline-terminated files).
pub fn assemble(segments: &[TextSegment], short_text_threshold: usize) -> String {
    let fragments: Vec<&str> = segments
        .iter()
        .map(|s| s.text.trim())
        .filter(|t| !t.is_empty())
        .collect();

    let mut body = String::new();
    for (i, fragment) in fragments.iter().enumerate() {
        if i > 0 {
            match joint(fragments[i - 1], fragment, short_text_threshold) {
                Joint::LineBreak => body.push('\n'),
                Joint::Space => body.push(' '),
            }
        }
        body.push_str(fragment);
    }

    body.push('\n');
    body
}
