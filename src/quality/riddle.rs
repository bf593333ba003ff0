use std::sync::LazyLock;

use regex::Regex;
use serde::Deserialize;

use super::checks::{check_truncation, Check, CheckContext, CORRUPTION_CHECKS};
use super::{normalize, run_checks, Field, QualityReport};
use crate::config::QualityLimits;
use crate::taxon::Taxon;
use crate::text::{primary_language, truncate_at_word};

static CLUE_PREFIX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)^\s*(?:(?:clue|indice|pista|hinweis|hint)\s*#?\s*\d*\s*[:.)\-–]\s*|#?\d+\s*[.):\-–/]\s*|[-*•–·]\s+)",
    )
    .unwrap()
});

/// An article directly before a name is swallowed with it.
const LEADING_ARTICLE: &str =
    r"(?:\b(?:the|an?|le|la|les|el|los|las|die|der|das|il|lo)\s+|\bl['’]\s*)?";

const CLUE_CHECKS: &[(&str, Check)] = &[("truncation", check_truncation)];

static JSON_ARRAY: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?s)\[.*\]").unwrap());

#[derive(Deserialize)]
struct ClueObject {
    clues: Vec<String>,
}

fn strip_prefix(line: &str) -> String {
    let mut out = line.trim().to_string();
    // "1. - Clue 1: text" style stacking
    for _ in 0..3 {
        let stripped = CLUE_PREFIX.replace(&out, "").into_owned();
        if stripped == out {
            break;
        }
        out = stripped;
    }
    out.trim().to_string()
}

fn try_json(raw: &str) -> Option<Vec<String>> {
    let trimmed = raw.trim();
    if let (Some(start), Some(end)) = (trimmed.find('{'), trimmed.rfind('}')) {
        if start < end {
            if let Ok(obj) = serde_json::from_str::<ClueObject>(&trimmed[start..=end]) {
                return Some(obj.clues);
            }
        }
    }
    let candidate = JSON_ARRAY.find(trimmed)?;
    serde_json::from_str::<Vec<String>>(candidate.as_str()).ok()
}

/// Split a riddle answer into raw clue lines.
pub fn parse_riddle(raw: &str) -> Vec<String> {
    if let Some(clues) = try_json(raw) {
        return clues
            .iter()
            .map(|c| strip_prefix(c))
            .filter(|c| !c.is_empty())
            .collect();
    }

    let lines: Vec<(bool, String)> = raw
        .lines()
        .map(|l| l.trim())
        .filter(|l| !l.is_empty() && !l.starts_with("```"))
        .filter(|l| !l.ends_with(':'))
        .map(|l| {
            let clue = strip_prefix(l);
            (clue != l, clue)
        })
        .filter(|(_, c)| !c.is_empty())
        .collect();

    // Once the answer is a numbered or bulleted list, unmarked lines are
    // preamble or sign-off.
    let listed = lines.iter().any(|(marked, _)| *marked);
    lines
        .into_iter()
        .filter(|(marked, _)| *marked || !listed)
        .map(|(_, c)| c)
        .collect()
}

/// Neutral stand-in for the species name.
pub fn placeholder(locale: &str) -> &'static str {
    match primary_language(locale).as_str() {
        "fr" => "cette espèce",
        "es" => "esta especie",
        "de" => "diese Art",
        "it" => "questa specie",
        _ => "this species",
    }
}

/// Replace every case-insensitive occurrence of the target's names. Full
/// names are replaced as substrings so no fragment like "Great Tits" survives;
/// the genus only as a whole word.
pub fn scrub_names(text: &str, target: &Taxon, replacement: &str) -> String {
    let mut names: Vec<&str> = vec![target.scientific_name.trim()];
    if let Some(common) = target.distinct_common_name() {
        names.push(common);
    }
    names.sort_by_key(|n| std::cmp::Reverse(n.chars().count()));

    let mut out = text.to_string();
    for name in names.into_iter().filter(|n| !n.is_empty()) {
        let pattern = format!("(?i){}{}", LEADING_ARTICLE, regex::escape(name));
        if let Ok(re) = Regex::new(&pattern) {
            out = re.replace_all(&out, replacement).into_owned();
        }
    }
    if let Some(genus) = target.genus() {
        if let Ok(re) = Regex::new(&format!(r"(?i)\b{}\b", regex::escape(genus))) {
            out = re.replace_all(&out, replacement).into_owned();
        }
    }
    capitalize_first(&out)
}

fn capitalize_first(text: &str) -> String {
    let mut chars = text.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

/// Strip numbering, scrub the target's names, cap length and drop fragments.
pub fn normalize_clues(
    clues: &[String],
    target: &Taxon,
    locale: &str,
    limits: &QualityLimits,
) -> Vec<String> {
    let replacement = placeholder(locale);
    clues
        .iter()
        .map(|c| normalize(&strip_prefix(c)))
        .map(|c| scrub_names(&c, target, replacement))
        .map(|c| truncate_at_word(&c, limits.max_clue_chars))
        .filter(|c| c.chars().count() >= limits.min_clue_chars)
        .collect()
}

/// Corruption heuristics for one clue.
pub fn validate_clue(clue: &str, locale: &str, limits: &QualityLimits) -> QualityReport {
    let ctx = CheckContext::new(locale, limits);
    let mut issues = Vec::new();
    run_checks(clue, CORRUPTION_CHECKS, Field::Explanation, &ctx, &mut issues);
    run_checks(clue, CLUE_CHECKS, Field::Explanation, &ctx, &mut issues);
    QualityReport { issues }
}
