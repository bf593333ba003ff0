use serde::{Deserialize, Serialize};

use crate::taxon::{IconicGroup, Rank, SpeciesData, Taxon};
use crate::text::language_name;

/// Separator the explanation prompt asks the model to put before the discriminant.
pub const DISCRIMINANT_SEPARATOR: &str = "---";

pub const RIDDLE_CLUE_COUNT: usize = 3;

pub const EXPLANATION_SYSTEM_PROMPT: &str = r#"You are a naturalist coaching players of a species identification quiz. A player looked at a photo of one species and answered with another. Explain, warmly and concretely, how to tell the two apart next time.

Rules:
- Always refer to each species by the exact name given after "Name to use:". Never say "the first one", "the second one", "species A" or similar.
- Name visible field marks: shape, colour pattern, size, habitat, season, behaviour or sound. Prefer the one feature that settles the question.
- Use only facts consistent with the reference material. If it is thin, stay general rather than inventing details.
- Do not mention photos, images, sources, Wikipedia or the reference material itself.
- Write two to four plain sentences. No lists, no markdown, no emojis."#;

pub const RIDDLE_SYSTEM_PROMPT: &str = r#"You write riddles for a nature quiz. The player must guess a species from three clues.

Rules:
- Exactly three clues, one per line, ordered from hardest to easiest.
- Never write the species' scientific name, common name or genus name, in any language.
- Each clue is one short sentence, at most 160 characters.
- Clue 1 is subtle (ecology, taxonomy, range), clue 3 gives away the most recognisable trait.
- Use only facts consistent with the reference material.
- No numbering, no bullets, no markdown, no extra commentary."#;

/// Taxonomic distance between two confused species.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum SeverityTier {
    /// Same genus.
    Close,
    /// Same family, or nothing better known.
    Medium,
    /// Different kingdom, class or iconic group.
    Huge,
}

/// Rendered prompt, ready for the generative client.
#[derive(Debug, Clone)]
pub struct Prompt {
    pub system_text: String,
    pub user_parts: Vec<String>,
    pub response_schema: Option<serde_json::Value>,
}

fn same_known(a: Option<&str>, b: Option<&str>) -> Option<bool> {
    match (a, b) {
        (Some(a), Some(b)) => Some(a.trim().eq_ignore_ascii_case(b.trim())),
        _ => None,
    }
}

/// Genus match first, then family, then a kingdom or class mismatch, then an
/// iconic group mismatch. Anything undecided is `Medium`.
pub fn classify_severity(correct: &Taxon, wrong: &Taxon) -> SeverityTier {
    if same_known(correct.genus(), wrong.genus()) == Some(true) {
        return SeverityTier::Close;
    }
    if same_known(correct.family(), wrong.family()) == Some(true) {
        return SeverityTier::Medium;
    }
    let rank_differs = |rank| {
        same_known(correct.ancestor_name(rank), wrong.ancestor_name(rank)) == Some(false)
    };
    if rank_differs(Rank::Kingdom) || rank_differs(Rank::Class) {
        return SeverityTier::Huge;
    }
    let known = |g: IconicGroup| g != IconicGroup::Unknown;
    if known(correct.iconic_group)
        && known(wrong.iconic_group)
        && correct.iconic_group != wrong.iconic_group
    {
        return SeverityTier::Huge;
    }
    SeverityTier::Medium
}

fn tone_instruction(severity: SeverityTier) -> &'static str {
    match severity {
        SeverityTier::Close => {
            "These two species belong to the same genus and the mix-up is understandable. \
             Point to the single finest reliable detail that separates them."
        }
        SeverityTier::Medium => {
            "These two species are related but clearly distinct. \
             Point to the most obvious visible difference."
        }
        SeverityTier::Huge => {
            "These two species belong to very different groups. \
             Gently explain the big difference in body plan or lifestyle, without mocking the player."
        }
    }
}

fn reference_block(taxon: &Taxon, data: &SpeciesData) -> String {
    format!(
        "Name to use: {}\nReference material:\n{}",
        taxon.label(),
        data.context_text
    )
}

fn explanation_schema() -> serde_json::Value {
    serde_json::json!({
        "type": "object",
        "properties": {
            "explanation": { "type": "string" },
            "discriminant": { "type": "string" }
        },
        "required": ["explanation", "discriminant"]
    })
}

pub fn build_explanation_prompt(
    correct: &Taxon,
    wrong: &Taxon,
    locale: &str,
    severity: SeverityTier,
    data_correct: &SpeciesData,
    data_wrong: &SpeciesData,
    structured_output: bool,
) -> Prompt {
    let language = language_name(locale);

    let mut user_parts = vec![
        format!(
            "The photo showed {}. The player answered {}.",
            correct.label(),
            wrong.label()
        ),
        tone_instruction(severity).to_string(),
        reference_block(correct, data_correct),
        reference_block(wrong, data_wrong),
    ];

    let (format_instruction, response_schema) = if structured_output {
        (
            format!(
                "Answer in {language} as JSON with two fields: \"explanation\" (two to four sentences) \
                 and \"discriminant\" (the deciding feature as a short noun phrase of three to eight words, no verb)."
            ),
            Some(explanation_schema()),
        )
    } else {
        (
            format!(
                "Answer in {language}. Write the explanation, then a line containing only {DISCRIMINANT_SEPARATOR}, \
                 then the deciding feature as a short noun phrase of three to eight words, no verb."
            ),
            None,
        )
    };
    user_parts.push(format_instruction);

    Prompt {
        system_text: EXPLANATION_SYSTEM_PROMPT.to_string(),
        user_parts,
        response_schema,
    }
}

pub fn build_riddle_prompt(target: &Taxon, locale: &str, data: &SpeciesData) -> Prompt {
    let language = language_name(locale);
    let mut forbidden = vec![target.scientific_name.clone()];
    if let Some(common) = target.distinct_common_name() {
        forbidden.push(common.to_string());
    }
    if let Some(genus) = target.genus() {
        if !forbidden.iter().any(|f| f.eq_ignore_ascii_case(genus)) {
            forbidden.push(genus.to_string());
        }
    }

    let user_parts = vec![
        reference_block(target, data),
        format!("Forbidden words: {}", forbidden.join(", ")),
        format!(
            "Write exactly {RIDDLE_CLUE_COUNT} clues in {language}, one per line, hardest first, easiest last."
        ),
    ];

    Prompt {
        system_text: RIDDLE_SYSTEM_PROMPT.to_string(),
        user_parts,
        response_schema: None,
    }
}
