//! Parsing and quality gating of raw model text.

pub mod checks;
pub mod riddle;

use std::sync::LazyLock;

use regex::Regex;
use serde::Deserialize;

use crate::config::QualityLimits;
use crate::prompts::DISCRIMINANT_SEPARATOR;
use crate::text::{collapse_whitespace, split_sentences};
use checks::{Check, CheckContext, CORRUPTION_CHECKS, DISCRIMINANT_CHECKS, EXPLANATION_CHECKS};

pub use riddle::{normalize_clues, parse_riddle, validate_clue};

/// Explanations shorter than this after normalization are unusable.
pub const MIN_EXPLANATION_CHARS: usize = 20;
const MIN_DISCRIMINANT_CHARS: usize = 3;

static NARRATION_ARTIFACTS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    [
        r"(?i),?\s*(?:as\s+)?(?:visible|seen|shown)\s+(?:on|in)\s+the\s+(?:photo(?:graph)?|image|picture)s?",
        r"(?i),?\s*(?:bien\s+)?visibles?\s+sur\s+(?:la|l['’]\s?)\s*(?:photo|image)s?",
        r"(?i),?\s*according\s+to\s+wikipedia,?",
        r"(?i),?\s*(?:selon|d['’]après)\s+wikip[ée]dia,?",
        r"\*\*|__",
    ]
    .iter()
    .map(|p| Regex::new(p).unwrap())
    .collect()
});

static SPACE_BEFORE_PUNCTUATION: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\s+([,.])").unwrap());

static JSON_OBJECT: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?s)\{.*\}").unwrap());

/// Explanation text split into its two public fields.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedExplanation {
    pub explanation: String,
    pub discriminant: Option<String>,
}

/// The shape a model answer turned out to have, in the order they are tried.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ModelOutput {
    /// `explanation --- discriminant`.
    Delimited(ParsedExplanation),
    /// A JSON object embedded somewhere in the text.
    Structured(ParsedExplanation),
    /// Plain prose; the discriminant is the last sentence when there are several.
    Freeform(ParsedExplanation),
    Unparseable,
}

impl ModelOutput {
    pub fn kind(&self) -> &'static str {
        match self {
            ModelOutput::Delimited(_) => "delimited",
            ModelOutput::Structured(_) => "structured",
            ModelOutput::Freeform(_) => "freeform",
            ModelOutput::Unparseable => "unparseable",
        }
    }

    pub fn into_parsed(self) -> Option<ParsedExplanation> {
        match self {
            ModelOutput::Delimited(p) | ModelOutput::Structured(p) | ModelOutput::Freeform(p) => Some(p),
            ModelOutput::Unparseable => None,
        }
    }
}

/// Collapse whitespace and strip narration artifacts the model tends to add.
pub fn normalize(text: &str) -> String {
    let mut out = collapse_whitespace(text);
    for re in NARRATION_ARTIFACTS.iter() {
        out = re.replace_all(&out, "").into_owned();
    }
    out = SPACE_BEFORE_PUNCTUATION.replace_all(&out, "$1").into_owned();
    let out = collapse_whitespace(&out);
    out.trim_matches(|c: char| c == '"' || c == '“' || c == '”' || c.is_whitespace())
        .to_string()
}

fn normalize_discriminant(text: &str) -> Option<String> {
    let d = normalize(text);
    let d = d.trim_end_matches(['.', '!', ';', ',']).trim();
    (d.chars().count() >= MIN_DISCRIMINANT_CHARS).then(|| d.to_string())
}

fn try_delimited(raw: &str) -> Option<ParsedExplanation> {
    let (left, right) = raw.split_once(DISCRIMINANT_SEPARATOR)?;
    let explanation = normalize(left);
    let discriminant = normalize_discriminant(right.trim_start_matches('-'))?;
    (explanation.chars().count() >= MIN_EXPLANATION_CHARS).then_some(ParsedExplanation {
        explanation,
        discriminant: Some(discriminant),
    })
}

#[derive(Deserialize)]
struct StructuredAnswer {
    #[serde(alias = "text")]
    explanation: String,
    #[serde(default, alias = "criterion", alias = "key_feature")]
    discriminant: Option<String>,
}

fn try_structured(raw: &str) -> Option<ParsedExplanation> {
    let candidate = JSON_OBJECT.find(raw)?;
    let answer: StructuredAnswer = serde_json::from_str(candidate.as_str()).ok()?;
    let explanation = normalize(&answer.explanation);
    (explanation.chars().count() >= MIN_EXPLANATION_CHARS).then(|| ParsedExplanation {
        explanation,
        discriminant: answer.discriminant.as_deref().and_then(normalize_discriminant),
    })
}

fn try_freeform(raw: &str) -> Option<ParsedExplanation> {
    let explanation = normalize(&raw.replace(DISCRIMINANT_SEPARATOR, " "));
    if explanation.chars().count() < MIN_EXPLANATION_CHARS {
        return None;
    }
    let sentences = split_sentences(&explanation);
    let discriminant = if sentences.len() > 1 {
        sentences.last().and_then(|s| normalize_discriminant(s))
    } else {
        None
    };
    Some(ParsedExplanation {
        explanation,
        discriminant,
    })
}

/// Classify a raw answer, trying delimited, then JSON, then plain prose.
pub fn classify_output(raw: &str) -> ModelOutput {
    if let Some(p) = try_delimited(raw) {
        return ModelOutput::Delimited(p);
    }
    if let Some(p) = try_structured(raw) {
        return ModelOutput::Structured(p);
    }
    if let Some(p) = try_freeform(raw) {
        return ModelOutput::Freeform(p);
    }
    ModelOutput::Unparseable
}

pub fn parse_explanation(raw: &str) -> Option<ParsedExplanation> {
    classify_output(raw).into_parsed()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Field {
    Explanation,
    Discriminant,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QualityIssue {
    pub check: &'static str,
    pub field: Field,
    pub message: String,
}

impl std::fmt::Display for QualityIssue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let field = match self.field {
            Field::Explanation => "explanation",
            Field::Discriminant => "discriminant",
        };
        write!(f, "{}/{}: {}", field, self.check, self.message)
    }
}

#[derive(Debug, Clone, Default)]
pub struct QualityReport {
    pub issues: Vec<QualityIssue>,
}

impl QualityReport {
    pub fn valid(&self) -> bool {
        self.issues.is_empty()
    }

    pub fn has_discriminant_issues(&self) -> bool {
        self.issues.iter().any(|i| i.field == Field::Discriminant)
    }

    pub fn has_explanation_issues(&self) -> bool {
        self.issues.iter().any(|i| i.field == Field::Explanation)
    }

    pub fn summary(&self) -> Vec<String> {
        self.issues.iter().map(ToString::to_string).collect()
    }
}

/// Replace exempt terms (species names, which legitimately contain tautonyms
/// like "Pica pica" or rare letter pairs) with a neutral word.
pub(crate) fn mask_terms(text: &str, exempt: &[&str]) -> String {
    let mut out = text.to_string();
    for term in exempt.iter().map(|t| t.trim()).filter(|t| !t.is_empty()) {
        if let Ok(re) = Regex::new(&format!("(?i){}", regex::escape(term))) {
            out = re.replace_all(&out, "species").into_owned();
        }
    }
    out
}

pub(crate) fn run_checks(
    text: &str,
    table: &[(&'static str, Check)],
    field: Field,
    ctx: &CheckContext,
    issues: &mut Vec<QualityIssue>,
) {
    for &(name, check) in table {
        if let Some(message) = check(text, ctx) {
            issues.push(QualityIssue {
                check: name,
                field,
                message,
            });
        }
    }
}

/// Run every heuristic over the explanation and discriminant. `exempt` terms
/// (species names) are masked first.
pub fn validate(
    parsed: &ParsedExplanation,
    locale: &str,
    limits: &QualityLimits,
    exempt: &[&str],
) -> QualityReport {
    let ctx = CheckContext::new(locale, limits);
    let mut issues = Vec::new();

    let explanation = mask_terms(&parsed.explanation, exempt);
    run_checks(&explanation, EXPLANATION_CHECKS, Field::Explanation, &ctx, &mut issues);
    run_checks(&explanation, CORRUPTION_CHECKS, Field::Explanation, &ctx, &mut issues);

    if let Some(discriminant) = &parsed.discriminant {
        let discriminant = mask_terms(discriminant, exempt);
        run_checks(&discriminant, CORRUPTION_CHECKS, Field::Discriminant, &ctx, &mut issues);
        run_checks(&discriminant, DISCRIMINANT_CHECKS, Field::Discriminant, &ctx, &mut issues);
    }

    QualityReport { issues }
}

#[cfg(test)]
mod tests {
    use super::*;

    const GOOD: &str = "The great tit has a broad black stripe down its yellow belly, while the blue tit shows a blue cap and a white face.";

    fn limits() -> QualityLimits {
        QualityLimits::default()
    }

    #[test]
    fn test_delimited_round_trip() {
        let raw = format!("{} --- short phrase", GOOD);
        let parsed = parse_explanation(&raw).unwrap();
        assert_eq!(parsed.explanation, GOOD);
        assert_eq!(parsed.discriminant.as_deref(), Some("short phrase"));
        assert_eq!(classify_output(&raw).kind(), "delimited");
    }

    #[test]
    fn test_delimited_with_newlines() {
        let raw = format!("{}\n---\nblack belly stripe.\n", GOOD);
        let parsed = parse_explanation(&raw).unwrap();
        assert_eq!(parsed.discriminant.as_deref(), Some("black belly stripe"));
    }

    #[test]
    fn test_short_delimited_half_falls_through() {
        let raw = format!("{} --- x", GOOD);
        let out = classify_output(&raw);
        assert_eq!(out.kind(), "freeform");
    }

    #[test]
    fn test_structured_json_in_fence() {
        let raw = format!(
            "```json\n{{\"explanation\": \"{}\", \"discriminant\": \"blue cap\"}}\n```",
            GOOD
        );
        let out = classify_output(&raw);
        assert_eq!(out.kind(), "structured");
        let parsed = out.into_parsed().unwrap();
        assert_eq!(parsed.explanation, GOOD);
        assert_eq!(parsed.discriminant.as_deref(), Some("blue cap"));
    }

    #[test]
    fn test_freeform_takes_last_sentence() {
        let raw = "The great tit is larger and has a black tie. Look for the black tie.";
        let parsed = parse_explanation(raw).unwrap();
        assert_eq!(parsed.explanation, raw);
        assert_eq!(parsed.discriminant.as_deref(), Some("Look for the black tie"));
    }

    #[test]
    fn test_freeform_single_sentence_has_no_discriminant() {
        let parsed = parse_explanation("The great tit has a black belly stripe").unwrap();
        assert!(parsed.discriminant.is_none());
    }

    #[test]
    fn test_unparseable() {
        assert_eq!(classify_output("   ").kind(), "unparseable");
        assert!(parse_explanation("Too short.").is_none());
    }

    #[test]
    fn test_normalize_strips_artifacts() {
        assert_eq!(
            normalize("  The  black tie ,  visible on the photo, is  the key  "),
            "The black tie, is the key"
        );
        assert_eq!(
            normalize("Selon Wikipédia, la mésange est **jaune**."),
            "la mésange est jaune."
        );
    }

    #[test]
    fn test_validate_accepts_clean_text() {
        let parsed = ParsedExplanation {
            explanation: GOOD.to_string(),
            discriminant: Some("black belly stripe".to_string()),
        };
        let report = validate(&parsed, "en", &limits(), &[]);
        assert!(report.valid(), "{:?}", report.summary());
    }

    #[test]
    fn test_validate_flags_duplicated_word() {
        let parsed = ParsedExplanation {
            explanation: "de de".to_string(),
            discriminant: None,
        };
        let report = validate(&parsed, "fr", &limits(), &[]);
        assert!(report.issues.iter().any(|i| i.check == "duplicated_words"));
        assert!(!report.valid());
    }

    #[test]
    fn test_validate_flags_punctuation_and_truncation() {
        let parsed = ParsedExplanation {
            explanation: "a,,b".to_string(),
            discriminant: None,
        };
        let report = validate(&parsed, "en", &limits(), &[]);
        assert!(report.issues.iter().any(|i| i.check == "punctuation"));

        let parsed = ParsedExplanation {
            explanation: "The great tit has a broad black stripe down its belly and it".to_string(),
            discriminant: None,
        };
        let report = validate(&parsed, "en", &limits(), &[]);
        assert!(report.issues.iter().any(|i| i.check == "truncation"));
    }

    #[test]
    fn test_validate_discriminant_issues_are_tagged() {
        let parsed = ParsedExplanation {
            explanation: GOOD.to_string(),
            discriminant: Some("the great tit has a black tie".to_string()),
        };
        let report = validate(&parsed, "en", &limits(), &[]);
        assert!(report.has_discriminant_issues());
        assert!(!report.has_explanation_issues());
    }

    #[test]
    fn test_species_names_are_exempt() {
        let parsed = ParsedExplanation {
            explanation: "The magpie Pica pica has a long tail and glossy black and white plumage.".to_string(),
            discriminant: None,
        };
        assert!(!validate(&parsed, "en", &limits(), &[]).valid());
        assert!(validate(&parsed, "en", &limits(), &["Pica pica"]).valid());
    }
}
