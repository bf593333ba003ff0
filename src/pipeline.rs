//! Generation orchestrator: reference data, prompt, model call with retry,
//! quality gate, fallback. Every terminal outcome is cached.

use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::cache::{PrunerHandle, SingleFlightCache};
use crate::config::{PipelineConfig, QualityPolicy};
use crate::error::PipelineError;
use crate::fallback::{build_fallback, build_fallback_riddle};
use crate::llm::{generate_with_retry, GenerationRequest, TextGenerator};
use crate::prompts::{
    build_explanation_prompt, build_riddle_prompt, classify_severity, Prompt, RIDDLE_CLUE_COUNT,
};
use crate::quality::{
    normalize_clues, parse_explanation, parse_riddle, validate, validate_clue, ParsedExplanation,
    QualityReport,
};
use crate::reference::{Aggregator, EncyclopediaSource};
use crate::taxon::{merge_sources, ExplanationResult, RiddleResult, RiddleSource, Taxon};
use crate::text::primary_language;

/// Bumped whenever prompts or parsing change, so old cache entries are ignored.
pub const PIPELINE_VERSION: &str = "v3";

const MAX_SOURCES: usize = 3;

#[derive(Clone)]
pub struct Pipeline {
    generator: Arc<dyn TextGenerator>,
    aggregator: Arc<Aggregator>,
    config: Arc<PipelineConfig>,
    explanations: SingleFlightCache<ExplanationResult>,
    riddles: SingleFlightCache<RiddleResult>,
}

impl Pipeline {
    pub fn new(
        generator: Arc<dyn TextGenerator>,
        encyclopedia: Arc<dyn EncyclopediaSource>,
        config: PipelineConfig,
    ) -> Self {
        let aggregator = Aggregator::new(
            encyclopedia,
            config.reference_timeout,
            config.description_budget,
        );
        Self {
            generator,
            aggregator: Arc::new(aggregator),
            explanations: SingleFlightCache::from_config(&config.cache),
            riddles: SingleFlightCache::from_config(&config.cache),
            config: Arc::new(config),
        }
    }

    /// Start periodic pruning of both caches. Pruning stops when the handles drop.
    pub fn spawn_pruners(&self) -> Vec<PrunerHandle> {
        let every = self.config.cache.prune_interval;
        vec![
            self.explanations.spawn_pruner(every),
            self.riddles.spawn_pruner(every),
        ]
    }

    /// Explain how to tell `correct` from `wrong`. Only caller contract
    /// violations are errors; upstream trouble ends in the fallback text.
    pub async fn generate_explanation(
        &self,
        correct: &Taxon,
        wrong: &Taxon,
        locale: &str,
    ) -> Result<ExplanationResult, PipelineError> {
        check_taxon(correct)?;
        check_taxon(wrong)?;
        let locale = check_locale(locale)?;

        let key = format!("{}:{}:{}-{}", PIPELINE_VERSION, locale, correct.id, wrong.id);
        let this = self.clone();
        let (correct, wrong) = (correct.clone(), wrong.clone());
        let result = self
            .explanations
            .get_or_fetch(&key, move || async move {
                this.produce_explanation(&correct, &wrong, &locale).await
            })
            .await;
        Ok(result)
    }

    /// Three clues for `target`, hardest first. Never fails once the input is valid.
    pub async fn generate_riddle(
        &self,
        target: &Taxon,
        locale: &str,
    ) -> Result<RiddleResult, PipelineError> {
        check_taxon(target)?;
        let locale = check_locale(locale)?;

        let key = format!("{}:{}:riddle:{}", PIPELINE_VERSION, locale, target.id);
        let this = self.clone();
        let target = target.clone();
        let result = self
            .riddles
            .get_or_fetch(&key, move || async move {
                this.produce_riddle(&target, &locale).await
            })
            .await;
        Ok(result)
    }

    fn request_for(&self, prompt: Prompt) -> GenerationRequest {
        GenerationRequest {
            system_instruction: prompt.system_text,
            parts: prompt.user_parts,
            temperature: self.config.generation.temperature,
            max_output_tokens: self.config.generation.max_output_tokens,
            response_schema: prompt.response_schema,
        }
    }

    async fn produce_explanation(
        &self,
        correct: &Taxon,
        wrong: &Taxon,
        locale: &str,
    ) -> ExplanationResult {
        let (data_correct, data_wrong) = tokio::join!(
            self.aggregator.collect_species_data(correct, locale),
            self.aggregator.collect_species_data(wrong, locale),
        );
        let severity = classify_severity(correct, wrong);
        debug!(correct = correct.id, wrong = wrong.id, ?severity, "classified pair");

        let prompt = build_explanation_prompt(
            correct,
            wrong,
            locale,
            severity,
            &data_correct,
            &data_wrong,
            self.config.generation.structured_output,
        );
        let request = self.request_for(prompt);
        let fallback =
            || build_fallback(correct, wrong, severity, &data_correct, &data_wrong, locale);

        let raw = match generate_with_retry(self.generator.as_ref(), &request, &self.config.generation)
            .await
        {
            Ok(raw) => raw,
            Err(e) => {
                warn!(correct = correct.id, wrong = wrong.id, error = %e, "model unavailable, using fallback explanation");
                return fallback();
            }
        };

        let Some(parsed) = parse_explanation(&raw) else {
            warn!(correct = correct.id, wrong = wrong.id, raw_len = raw.len(), "unparseable model output, using fallback explanation");
            return fallback();
        };

        let exempt = exempt_terms(&[correct, wrong]);
        let report = validate(&parsed, locale, &self.config.limits, &exempt);

        match apply_policy(parsed, &report, self.config.quality_policy) {
            Some(accepted) => {
                if !report.valid() {
                    warn!(correct = correct.id, wrong = wrong.id, issues = ?report.summary(), "accepted model output with quality issues");
                }
                info!(
                    correct = correct.id,
                    wrong = wrong.id,
                    has_discriminant = accepted.discriminant.is_some(),
                    "explanation generated"
                );
                ExplanationResult {
                    explanation: accepted.explanation,
                    discriminant: accepted.discriminant,
                    sources: merge_sources(
                        [data_correct.sources.as_slice(), data_wrong.sources.as_slice()],
                        MAX_SOURCES,
                    ),
                    fallback: false,
                }
            }
            None => {
                warn!(correct = correct.id, wrong = wrong.id, issues = ?report.summary(), "model output rejected, using fallback explanation");
                fallback()
            }
        }
    }

    async fn produce_riddle(&self, target: &Taxon, locale: &str) -> RiddleResult {
        let data = self.aggregator.collect_species_data(target, locale).await;
        let request = self.request_for(build_riddle_prompt(target, locale, &data));
        let limits = &self.config.limits;

        match generate_with_retry(self.generator.as_ref(), &request, &self.config.generation).await {
            Ok(raw) => {
                let clues: Vec<String> = normalize_clues(&parse_riddle(&raw), target, locale, limits)
                    .into_iter()
                    .filter(|clue| {
                        let report = validate_clue(clue, locale, limits);
                        if !report.valid() {
                            debug!(target = target.id, issues = ?report.summary(), "dropping clue");
                        }
                        report.valid()
                    })
                    .take(RIDDLE_CLUE_COUNT)
                    .collect();

                if clues.len() == RIDDLE_CLUE_COUNT {
                    info!(target = target.id, "riddle generated");
                    return RiddleResult {
                        clues,
                        sources: data.sources,
                        source: RiddleSource::Ai,
                    };
                }
                warn!(target = target.id, usable = clues.len(), "too few usable clues, using fallback riddle");
            }
            Err(e) => {
                warn!(target = target.id, error = %e, "model unavailable, using fallback riddle");
            }
        }

        RiddleResult {
            clues: build_fallback_riddle(target, &data, locale).to_vec(),
            sources: data.sources,
            source: RiddleSource::Fallback,
        }
    }
}

fn check_taxon(taxon: &Taxon) -> Result<(), PipelineError> {
    if taxon.id == 0 {
        return Err(PipelineError::MissingTaxonId);
    }
    if taxon.scientific_name.trim().is_empty() {
        return Err(PipelineError::MissingScientificName(taxon.id));
    }
    Ok(())
}

/// Output only depends on the primary language subtag, so `en`, `EN` and
/// `en-GB` share one cache entry.
fn check_locale(locale: &str) -> Result<String, PipelineError> {
    let lang = primary_language(locale);
    if lang.is_empty() {
        return Err(PipelineError::MissingLocale);
    }
    Ok(lang)
}

/// Species names may legitimately trip letter heuristics.
fn exempt_terms<'a>(taxa: &[&'a Taxon]) -> Vec<&'a str> {
    let mut terms = Vec::new();
    for &taxon in taxa {
        terms.push(taxon.scientific_name.as_str());
        terms.extend(taxon.common_name.as_deref());
        terms.extend(taxon.genus());
    }
    terms
}

fn apply_policy(
    mut parsed: ParsedExplanation,
    report: &QualityReport,
    policy: QualityPolicy,
) -> Option<ParsedExplanation> {
    if report.valid() {
        return Some(parsed);
    }
    match policy {
        QualityPolicy::Strict => None,
        QualityPolicy::Lenient => {
            if report.has_discriminant_issues() {
                parsed.discriminant = None;
            }
            Some(parsed)
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::error::GenerationError;
    use crate::llm::testing::{status, ScriptedGenerator};
    use crate::prompts::EXPLANATION_SYSTEM_PROMPT;
    use crate::reference::testing::StaticEncyclopedia;
    use crate::taxon::fixtures::*;
    use crate::taxon::{IconicGroup, Rank};

    const GOOD: &str = "The great tit has a broad black stripe down its yellow belly, while the blue tit shows a blue cap and a white face.";

    fn config(max_attempts: u32, policy: QualityPolicy) -> PipelineConfig {
        let mut config = PipelineConfig::default();
        config.generation.max_attempts = max_attempts;
        config.generation.attempt_timeout = Duration::from_millis(200);
        config.generation.backoff_step = Duration::from_millis(1);
        config.reference_timeout = Duration::from_millis(100);
        config.quality_policy = policy;
        config
    }

    fn pipeline(generator: &Arc<ScriptedGenerator>, config: PipelineConfig) -> Pipeline {
        let encyclopedia = StaticEncyclopedia::default().with_page(
            "en",
            "Parus major",
            "The great tit is a passerine bird in the tit family. It is the largest tit in Europe.",
        );
        Pipeline::new(generator.clone(), Arc::new(encyclopedia), config)
    }

    fn japanese_tit() -> Taxon {
        species(
            917150,
            "Parus minor",
            Some("Japanese Tit"),
            IconicGroup::Aves,
            &[
                (Rank::Kingdom, "Animalia"),
                (Rank::Class, "Aves"),
                (Rank::Family, "Paridae"),
                (Rank::Genus, "Parus"),
            ],
        )
    }

    fn delimited(explanation: &str, discriminant: &str) -> String {
        format!("{}\n---\n{}", explanation, discriminant)
    }

    #[tokio::test]
    async fn test_explanation_from_model() {
        let generator = Arc::new(ScriptedGenerator::always(&delimited(GOOD, "black belly stripe")));
        let p = pipeline(&generator, config(2, QualityPolicy::Lenient));

        let result = p
            .generate_explanation(&great_tit(), &blue_tit(), "en")
            .await
            .unwrap();
        assert!(!result.fallback);
        assert_eq!(result.explanation, GOOD);
        assert_eq!(result.discriminant.as_deref(), Some("black belly stripe"));
        assert_eq!(result.sources, vec!["Wikipedia (en)".to_string()]);

        let requests = generator.requests.lock().unwrap();
        assert_eq!(requests[0].system_instruction, EXPLANATION_SYSTEM_PROMPT);
    }

    #[tokio::test]
    async fn test_close_pair_recovers_after_transient_failures() {
        let generator = Arc::new(ScriptedGenerator::new(vec![
            Err(status(503)),
            Err(GenerationError::EmptyText),
            Ok(delimited(GOOD, "black belly stripe")),
        ]));
        let p = pipeline(&generator, config(3, QualityPolicy::Lenient));

        let (a, b) = (great_tit(), japanese_tit());
        assert_eq!(classify_severity(&a, &b), crate::prompts::SeverityTier::Close);
        let result = p.generate_explanation(&a, &b, "en").await.unwrap();
        assert!(!result.fallback);
        assert_eq!(generator.call_count(), 3);
    }

    #[tokio::test]
    async fn test_exhausted_retries_fall_back() {
        let generator = Arc::new(ScriptedGenerator::new(vec![Err(status(503))]));
        let p = pipeline(&generator, config(2, QualityPolicy::Lenient));

        let result = p
            .generate_explanation(&great_tit(), &blue_tit(), "en")
            .await
            .unwrap();
        assert!(result.fallback);
        assert!(!result.explanation.is_empty());
        assert_eq!(generator.call_count(), 2);
    }

    #[tokio::test]
    async fn test_non_retryable_error_falls_back_at_once() {
        let generator = Arc::new(ScriptedGenerator::new(vec![Err(status(400))]));
        let p = pipeline(&generator, config(3, QualityPolicy::Lenient));

        let result = p
            .generate_explanation(&great_tit(), &fly_agaric(), "fr")
            .await
            .unwrap();
        assert!(result.fallback);
        assert_eq!(generator.call_count(), 1);
    }

    #[tokio::test]
    async fn test_unparseable_output_falls_back() {
        let generator = Arc::new(ScriptedGenerator::always("ok"));
        let p = pipeline(&generator, config(1, QualityPolicy::Lenient));
        let result = p
            .generate_explanation(&great_tit(), &blue_tit(), "en")
            .await
            .unwrap();
        assert!(result.fallback);
    }

    #[tokio::test]
    async fn test_repeat_call_is_served_from_cache() {
        let generator = Arc::new(ScriptedGenerator::always(&delimited(GOOD, "black belly stripe")));
        let p = pipeline(&generator, config(2, QualityPolicy::Lenient));

        let first = p.generate_explanation(&great_tit(), &blue_tit(), "en").await.unwrap();
        let second = p.generate_explanation(&great_tit(), &blue_tit(), "en").await.unwrap();
        assert_eq!(first, second);
        assert_eq!(generator.call_count(), 1);

        // Other locale, other key.
        p.generate_explanation(&great_tit(), &blue_tit(), "fr").await.unwrap();
        assert_eq!(generator.call_count(), 2);
    }

    #[tokio::test]
    async fn test_locale_variants_share_a_cache_entry() {
        let generator = Arc::new(ScriptedGenerator::always(&delimited(GOOD, "black belly stripe")));
        let p = pipeline(&generator, config(2, QualityPolicy::Lenient));

        let first = p.generate_explanation(&great_tit(), &blue_tit(), "en").await.unwrap();
        let upper = p.generate_explanation(&great_tit(), &blue_tit(), "EN").await.unwrap();
        let regional = p.generate_explanation(&great_tit(), &blue_tit(), " en-GB ").await.unwrap();
        assert_eq!(first, upper);
        assert_eq!(first, regional);
        assert_eq!(generator.call_count(), 1);

        p.generate_riddle(&great_tit(), "fr_CA").await.unwrap();
        p.generate_riddle(&great_tit(), "FR").await.unwrap();
        assert_eq!(generator.call_count(), 2);
    }

    #[tokio::test]
    async fn test_concurrent_callers_share_one_model_call() {
        let generator = Arc::new(
            ScriptedGenerator::always(&delimited(GOOD, "black belly stripe"))
                .with_delay(Duration::from_millis(50)),
        );
        let p = pipeline(&generator, config(2, QualityPolicy::Lenient));
        let (a, b) = (great_tit(), blue_tit());

        let (x, y) = tokio::join!(
            p.generate_explanation(&a, &b, "en"),
            p.generate_explanation(&a, &b, "en"),
        );
        assert_eq!(x.unwrap(), y.unwrap());
        assert_eq!(generator.call_count(), 1);
    }

    #[tokio::test]
    async fn test_policy_decides_on_flawed_text() {
        let flawed = GOOD.replace("broad black", "broad black black");

        let generator = Arc::new(ScriptedGenerator::always(&delimited(&flawed, "black belly stripe")));
        let lenient = pipeline(&generator, config(1, QualityPolicy::Lenient));
        let result = lenient
            .generate_explanation(&great_tit(), &blue_tit(), "en")
            .await
            .unwrap();
        assert!(!result.fallback);
        assert!(result.explanation.contains("black black"));

        let generator = Arc::new(ScriptedGenerator::always(&delimited(&flawed, "black belly stripe")));
        let strict = pipeline(&generator, config(1, QualityPolicy::Strict));
        let result = strict
            .generate_explanation(&great_tit(), &blue_tit(), "en")
            .await
            .unwrap();
        assert!(result.fallback);
    }

    #[tokio::test]
    async fn test_lenient_drops_narrative_discriminant() {
        let generator = Arc::new(ScriptedGenerator::always(&delimited(
            GOOD,
            "it was seen hopping along the branch near the feeder",
        )));
        let p = pipeline(&generator, config(1, QualityPolicy::Lenient));
        let result = p
            .generate_explanation(&great_tit(), &blue_tit(), "en")
            .await
            .unwrap();
        assert!(!result.fallback);
        assert_eq!(result.explanation, GOOD);
        assert_eq!(result.discriminant, None);
    }

    #[tokio::test]
    async fn test_invalid_input_is_rejected_before_any_call() {
        let generator = Arc::new(ScriptedGenerator::always(GOOD));
        let p = pipeline(&generator, config(1, QualityPolicy::Lenient));

        let mut no_id = great_tit();
        no_id.id = 0;
        assert_eq!(
            p.generate_explanation(&no_id, &blue_tit(), "en").await,
            Err(PipelineError::MissingTaxonId)
        );

        let mut no_name = blue_tit();
        no_name.scientific_name = "  ".to_string();
        assert_eq!(
            p.generate_explanation(&great_tit(), &no_name, "en").await,
            Err(PipelineError::MissingScientificName(144849))
        );

        assert_eq!(
            p.generate_riddle(&great_tit(), " ").await,
            Err(PipelineError::MissingLocale)
        );
        assert_eq!(
            p.generate_riddle(&great_tit(), "-GB").await,
            Err(PipelineError::MissingLocale)
        );
        assert_eq!(generator.call_count(), 0);
    }

    #[tokio::test]
    async fn test_riddle_from_model_hides_names() {
        let raw = "1. It nests in holes in old trees and in nest boxes.\n\
                   2. The Great Tit visits garden feeders all winter.\n\
                   3. Parus major has a black stripe on a yellow belly.";
        let generator = Arc::new(ScriptedGenerator::always(raw));
        let p = pipeline(&generator, config(1, QualityPolicy::Lenient));

        let result = p.generate_riddle(&great_tit(), "en").await.unwrap();
        assert_eq!(result.source, RiddleSource::Ai);
        assert_eq!(result.clues.len(), 3);
        assert_eq!(result.clues[1], "This species visits garden feeders all winter.");
        for clue in &result.clues {
            let lower = clue.to_lowercase();
            assert!(!lower.contains("great tit"));
            assert!(!lower.contains("parus"));
        }
    }

    #[tokio::test]
    async fn test_riddle_with_too_few_clues_falls_back() {
        let generator = Arc::new(ScriptedGenerator::always(
            "1. It nests in holes in old trees.\n2. Its song has two notes.",
        ));
        let p = pipeline(&generator, config(1, QualityPolicy::Lenient));

        let result = p.generate_riddle(&great_tit(), "en").await.unwrap();
        assert_eq!(result.source, RiddleSource::Fallback);
        assert_eq!(result.clues.len(), 3);
        assert_eq!(result.clues[0], "It belongs to the family Paridae.");
    }

    #[tokio::test]
    async fn test_riddle_survives_model_outage() {
        let generator = Arc::new(ScriptedGenerator::new(vec![Err(status(500))]));
        let p = pipeline(&generator, config(2, QualityPolicy::Lenient));

        let result = p.generate_riddle(&great_tit(), "en").await.unwrap();
        assert_eq!(result.source, RiddleSource::Fallback);
        assert_eq!(result.clues.len(), 3);
        assert_eq!(result.sources, vec!["Wikipedia (en)".to_string()]);
        for clue in &result.clues {
            assert!(!clue.to_lowercase().contains("great tit"));
        }
    }
}
