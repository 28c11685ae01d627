//! Message normalization and response post-processing

use once_cell::sync::Lazy;
use regex::Regex;
use unicode_segmentation::UnicodeSegmentation;

static WHITESPACE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").unwrap());

static EMOJI: Lazy<Regex> = Lazy::new(|| {
    Regex::new(concat!(
        "[",
        "\u{1F600}-\u{1F64F}", // emoticons
        "\u{1F300}-\u{1F5FF}", // symbols & pictographs
        "\u{1F680}-\u{1F6FF}", // transport & map
        "\u{1F1E0}-\u{1F1FF}", // flags
        "\u{1F900}-\u{1F9FF}",
        "\u{1FA70}-\u{1FAFF}",
        "\u{2600}-\u{26FF}",
        "\u{2700}-\u{27BF}", // dingbats
        "\u{FE0F}\u{200D}",
        "]+"
    ))
    .unwrap()
});

static SPEAKER_PREFIX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)^\s*(ai|vtuber|assistant|trợ lý)\s*:\s*").unwrap());

/// Cache key for a raw message: lower-cased words joined by `_`
///
/// Punctuation and repeated whitespace are dropped, so "Hi, MeiLin!" and
/// "hi   meilin" both map to `hi_meilin`.
pub fn trigger_key(raw: &str) -> String {
    raw.unicode_words()
        .map(|w| w.to_lowercase())
        .collect::<Vec<_>>()
        .join("_")
}

/// Trim and collapse internal whitespace
pub fn collapse_whitespace(text: &str) -> String {
    WHITESPACE.replace_all(text.trim(), " ").into_owned()
}

pub fn strip_emoji(text: &str) -> String {
    EMOJI.replace_all(text, "").into_owned()
}

/// Remove a leading "<speaker>:" label, emoji and redundant whitespace
pub fn clean_response(text: &str, persona_name: &str) -> String {
    let mut text = strip_emoji(text);

    let persona_prefix = format!("{}:", persona_name.to_lowercase());
    let trimmed = text.trim_start();
    if trimmed.to_lowercase().starts_with(&persona_prefix) {
        // Lower-casing may change byte lengths; skip by char count instead
        let skip = persona_prefix.chars().count();
        text = trimmed.chars().skip(skip).collect();
    } else {
        text = SPEAKER_PREFIX.replace(&text, "").into_owned();
    }

    collapse_whitespace(&text)
}

pub fn word_count(text: &str) -> usize {
    text.unicode_words().count()
}

/// Keep the first `max_sentences` sentences when `text` exceeds `max_words` words
pub fn shorten(text: &str, max_words: usize, max_sentences: usize) -> String {
    if word_count(text) <= max_words {
        return text.to_string();
    }

    let kept: String = text
        .split_sentence_bounds()
        .take(max_sentences.max(1))
        .collect();
    kept.trim().to_string()
}

/// Whether `text` contains `phrase` on word boundaries, ignoring case
pub fn contains_phrase(text: &str, phrase: &str) -> bool {
    let haystack = format!(" {} ", trigger_key(text).replace('_', " "));
    let needle = trigger_key(phrase).replace('_', " ");
    !needle.is_empty() && haystack.contains(&format!(" {} ", needle))
}
