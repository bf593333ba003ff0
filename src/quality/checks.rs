//! Heuristic checks over normalized model text. Each check is an independent
//! predicate returning an optional issue description, so they can be composed
//! per use (explanation, discriminant, riddle clue) and tested one by one.

use std::sync::LazyLock;

use regex::Regex;

use crate::config::QualityLimits;
use crate::text::{primary_language, word_count};

pub type Check = fn(&str, &CheckContext) -> Option<String>;

/// Inputs a check may need besides the text itself.
pub struct CheckContext<'a> {
    pub lang: String,
    pub limits: &'a QualityLimits,
}

impl<'a> CheckContext<'a> {
    pub fn new(locale: &str, limits: &'a QualityLimits) -> Self {
        Self {
            lang: primary_language(locale),
            limits,
        }
    }
}

const MAX_TOKEN_CHARS: usize = 30;
const MAX_DISCRIMINANT_CHARS: usize = 60;
const MAX_DISCRIMINANT_WORDS: usize = 8;

static DOUBLED_PUNCTUATION: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?:[,;:]\s*){2,}|[!?]{3,}|\.{4,}|[,;:]\s*[.!?]").unwrap());

static CITATION_MARKERS: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)\[\s*\d+\s*\]|\[(?:citation needed|réf\. nécessaire|source)\]|【[^】]*】|\bsources?\s*:|\(\s*(?:wikip[eé]dia|inaturalist)\s*\)|\bwikip[eé]dia\b",
    )
    .unwrap()
});

/// Double letters that are rare enough in a language to signal corrupted text.
fn rare_doubles(lang: &str) -> &'static [&'static str] {
    match lang {
        "en" => &["jj", "qq", "xx", "yy", "hh", "ww", "ii"],
        "fr" => &["hh", "jj", "kk", "qq", "vv", "ww", "xx", "yy", "ii", "uu", "aa"],
        "es" => &["hh", "jj", "kk", "qq", "vv", "ww", "xx", "yy", "zz", "ii", "uu", "ss"],
        "de" => &["jj", "qq", "vv", "ww", "xx", "yy", "ii", "uu"],
        "it" => &["hh", "jj", "kk", "qq", "ww", "xx", "yy", "ii", "uu", "aa"],
        _ => &[],
    }
}

/// Verb forms that turn a short nominal phrase into a narrative sentence.
fn narrative_verbs(lang: &str) -> &'static [&'static str] {
    match lang {
        "fr" => &[
            "est", "sont", "a", "ont", "possède", "possèdent", "présente", "présentent", "peut",
            "peuvent", "était", "permet", "se",
        ],
        "es" => &["es", "son", "tiene", "tienen", "posee", "poseen", "puede", "pueden", "era"],
        "de" => &["ist", "sind", "hat", "haben", "besitzt", "kann", "können", "war"],
        "it" => &["è", "sono", "ha", "hanno", "possiede", "può", "era"],
        _ => &[
            "is", "are", "has", "have", "was", "were", "can", "looks", "appears", "shows",
        ],
    }
}

fn lowercase_words(text: &str) -> Vec<String> {
    text.split(|c: char| !(c.is_alphanumeric() || c == '\'' || c == '’' || c == '-'))
        .filter(|w| !w.is_empty())
        .map(|w| w.to_lowercase())
        .collect()
}

pub fn check_word_count(text: &str, ctx: &CheckContext) -> Option<String> {
    let words = word_count(text);
    let limits = ctx.limits;
    let ceiling = (limits.max_words as f32 * limits.upper_tolerance).ceil() as usize;
    if words < limits.min_words {
        Some(format!("too short: {} words (min {})", words, limits.min_words))
    } else if words > ceiling {
        Some(format!("too long: {} words (max {})", words, ceiling))
    } else {
        None
    }
}

pub fn check_repeated_letters(text: &str, _ctx: &CheckContext) -> Option<String> {
    let mut run = 1;
    let mut prev: Option<char> = None;
    for ch in text.chars().flat_map(char::to_lowercase) {
        if ch.is_alphabetic() && prev == Some(ch) {
            run += 1;
            if run >= 3 {
                return Some(format!("repeated letter run '{}{}{}'", ch, ch, ch));
            }
        } else {
            run = 1;
        }
        prev = Some(ch);
    }
    None
}

pub fn check_duplicated_words(text: &str, _ctx: &CheckContext) -> Option<String> {
    let words = lowercase_words(text);
    words
        .windows(2)
        .find(|pair| pair[0] == pair[1] && pair[0].chars().any(char::is_alphabetic))
        .map(|pair| format!("duplicated word '{} {}'", pair[0], pair[1]))
}

pub fn check_long_tokens(text: &str, _ctx: &CheckContext) -> Option<String> {
    text.split_whitespace()
        .find(|t| t.chars().count() > MAX_TOKEN_CHARS)
        .map(|t| format!("abnormally long token '{}…'", t.chars().take(20).collect::<String>()))
}

pub fn check_doubled_punctuation(text: &str, _ctx: &CheckContext) -> Option<String> {
    DOUBLED_PUNCTUATION
        .find(text)
        .map(|m| format!("doubled punctuation '{}'", m.as_str()))
}

pub fn check_citation_markers(text: &str, _ctx: &CheckContext) -> Option<String> {
    CITATION_MARKERS
        .find(text)
        .map(|m| format!("citation marker '{}'", m.as_str()))
}

fn allowed_char(c: char) -> bool {
    c.is_alphanumeric()
        || c.is_whitespace()
        || matches!(
            c,
            '.' | ',' | ';' | ':' | '!' | '?' | '\'' | '"' | '(' | ')' | '-' | '–' | '—' | '’'
                | '‘' | '“' | '”' | '«' | '»' | '/' | '%' | '°' | '…' | '&' | '+'
        )
}

pub fn check_symbols(text: &str, _ctx: &CheckContext) -> Option<String> {
    let mut bad: Vec<char> = text.chars().filter(|c| !allowed_char(*c)).collect();
    if bad.is_empty() {
        return None;
    }
    bad.dedup();
    Some(format!(
        "unexpected symbols '{}'",
        bad.into_iter().take(5).collect::<String>()
    ))
}

pub fn check_rare_doubles(text: &str, ctx: &CheckContext) -> Option<String> {
    let lower = text.to_lowercase();
    rare_doubles(&ctx.lang)
        .iter()
        .find(|pair| lower.contains(**pair))
        .map(|pair| format!("suspicious double letters '{}'", pair))
}

pub fn check_truncation(text: &str, _ctx: &CheckContext) -> Option<String> {
    let trimmed = text.trim_end();
    let ends_cleanly = trimmed
        .chars()
        .last()
        .map_or(false, |c| matches!(c, '.' | '!' | '?' | '…' | '"' | '»' | ')' | '”'));
    if ends_cleanly {
        return None;
    }
    let last = trimmed.split_whitespace().last()?;
    (last.chars().count() <= 2).then(|| format!("looks truncated after '{}'", last))
}

pub fn check_narrative_verbs(text: &str, ctx: &CheckContext) -> Option<String> {
    let verbs = narrative_verbs(&ctx.lang);
    lowercase_words(text)
        .into_iter()
        .find(|w| verbs.contains(&w.as_str()))
        .map(|w| format!("reads like a sentence (verb '{}')", w))
}

pub fn check_discriminant_length(text: &str, _ctx: &CheckContext) -> Option<String> {
    let chars = text.chars().count();
    let words = word_count(text);
    (chars > MAX_DISCRIMINANT_CHARS || words > MAX_DISCRIMINANT_WORDS)
        .then(|| format!("too long: {} chars, {} words", chars, words))
}

/// Checks that signal corrupted generation, independent of text purpose.
pub const CORRUPTION_CHECKS: &[(&str, Check)] = &[
    ("repeated_letters", check_repeated_letters),
    ("duplicated_words", check_duplicated_words),
    ("long_token", check_long_tokens),
    ("punctuation", check_doubled_punctuation),
    ("citation", check_citation_markers),
    ("symbols", check_symbols),
    ("rare_doubles", check_rare_doubles),
];

/// Explanation-only checks, run in addition to `CORRUPTION_CHECKS`.
pub const EXPLANATION_CHECKS: &[(&str, Check)] = &[
    ("word_count", check_word_count),
    ("truncation", check_truncation),
];

pub const DISCRIMINANT_CHECKS: &[(&str, Check)] = &[
    ("narrative", check_narrative_verbs),
    ("discriminant_length", check_discriminant_length),
];
