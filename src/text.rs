//! Small string helpers shared by the aggregator, the quality filter and the
//! fallback synthesizer. All lengths are in chars, never bytes.

/// Collapse every run of whitespace into a single space and trim.
pub fn collapse_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Cut `text` to at most `max_chars`, backing off to the last whitespace
/// before the limit so no word is split. Appends `…` when something was cut;
/// the ellipsis counts towards `max_chars`.
pub fn truncate_at_word(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let byte_limit = text
        .char_indices()
        .nth(max_chars.saturating_sub(1))
        .map(|(i, _)| i)
        .unwrap_or(text.len());
    let head = &text[..byte_limit];
    let cut = head
        .rfind(char::is_whitespace)
        .filter(|&i| i > 0)
        .unwrap_or(byte_limit);
    let trimmed = head[..cut].trim_end_matches(|c: char| c.is_whitespace() || c == ',' || c == ';');
    format!("{}…", trimmed)
}

/// Split into sentences on `.`, `!`, `?` or `…` followed by whitespace.
/// Terminal punctuation stays attached to its sentence.
pub fn split_sentences(text: &str) -> Vec<String> {
    let mut sentences = Vec::new();
    let mut current = String::new();
    let mut chars = text.chars().peekable();

    while let Some(ch) = chars.next() {
        current.push(ch);
        if matches!(ch, '.' | '!' | '?' | '…') {
            let at_boundary = chars.peek().map_or(true, |next| next.is_whitespace());
            if at_boundary {
                let sentence = current.trim();
                if !sentence.is_empty() {
                    sentences.push(sentence.to_string());
                }
                current.clear();
            }
        }
    }

    let rest = current.trim();
    if !rest.is_empty() {
        sentences.push(rest.to_string());
    }
    sentences
}

pub fn word_count(text: &str) -> usize {
    text.split_whitespace()
        .filter(|w| w.chars().any(char::is_alphanumeric))
        .count()
}

/// Primary language subtag: `"fr-CA"` → `"fr"`.
pub fn primary_language(locale: &str) -> String {
    locale
        .split(['-', '_'])
        .next()
        .unwrap_or(locale)
        .trim()
        .to_lowercase()
}

/// English name of a language, for prompt instructions.
pub fn language_name(locale: &str) -> &'static str {
    match primary_language(locale).as_str() {
        "fr" => "French",
        "es" => "Spanish",
        "de" => "German",
        "it" => "Italian",
        "pt" => "Portuguese",
        "nl" => "Dutch",
        _ => "English",
    }
}
