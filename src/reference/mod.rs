//! Reference data aggregation: descriptive text for one taxon, gathered from
//! an encyclopedia in several languages plus the observation platform's own
//! description. Every lookup is best-effort.

pub mod wikipedia;

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use futures::future::join_all;
use tracing::debug;

use crate::taxon::{Description, SourceKind, SpeciesData, Taxon, TaxonomySnapshot};
use crate::text::{collapse_whitespace, primary_language, truncate_at_word};

pub use wikipedia::WikipediaClient;

/// Summaries whose first this-many normalized chars match are duplicates.
const DEDUP_PREFIX_CHARS: usize = 80;
const MAX_SOURCES: usize = 3;
const OBSERVATION_LABEL: &str = "iNaturalist";

/// An encyclopedia that can summarize a page by title.
#[async_trait]
pub trait EncyclopediaSource: Send + Sync {
    /// Display label for attribution, e.g. `Wikipedia (fr)`.
    fn label(&self, lang: &str) -> String;

    /// `Ok(None)` when there is no usable page.
    async fn summary(&self, title: &str, lang: &str) -> Result<Option<String>>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct Lookup {
    lang: String,
    title: String,
}

pub struct Aggregator {
    encyclopedia: Arc<dyn EncyclopediaSource>,
    timeout: Duration,
    description_budget: usize,
}

impl Aggregator {
    pub fn new(encyclopedia: Arc<dyn EncyclopediaSource>, timeout: Duration, description_budget: usize) -> Self {
        Self {
            encyclopedia,
            timeout,
            description_budget,
        }
    }

    /// Up to four lookups: target language and English, by scientific name and
    /// by common name when it differs. Duplicates are issued once.
    fn lookup_plan(taxon: &Taxon, lang: &str) -> Vec<Lookup> {
        let mut langs = vec![lang.to_string()];
        if lang != "en" {
            langs.push("en".to_string());
        }

        let mut titles = vec![taxon.scientific_name.trim().to_string()];
        if let Some(common) = taxon.distinct_common_name() {
            titles.push(common.to_string());
        }

        let mut plan: Vec<Lookup> = Vec::new();
        for lang in &langs {
            for title in &titles {
                let lookup = Lookup {
                    lang: lang.clone(),
                    title: title.clone(),
                };
                if !title.is_empty() && !plan.contains(&lookup) {
                    plan.push(lookup);
                }
            }
        }
        plan
    }

    async fn fetch(&self, lookup: &Lookup) -> Option<Description> {
        let call = self.encyclopedia.summary(&lookup.title, &lookup.lang);
        match tokio::time::timeout(self.timeout, call).await {
            Ok(Ok(Some(text))) => Some(Description {
                language: lookup.lang.clone(),
                text,
                source_kind: SourceKind::Encyclopedic,
            }),
            Ok(Ok(None)) => None,
            Ok(Err(e)) => {
                debug!(title = %lookup.title, lang = %lookup.lang, error = %e, "summary fetch failed");
                None
            }
            Err(_) => {
                debug!(title = %lookup.title, lang = %lookup.lang, "summary fetch timed out");
                None
            }
        }
    }

    /// Gather and merge descriptions for `taxon`. Never fails: missing sources
    /// only make the context thinner.
    pub async fn collect_species_data(&self, taxon: &Taxon, locale: &str) -> SpeciesData {
        let lang = primary_language(locale);
        let plan = Self::lookup_plan(taxon, &lang);

        let fetched = join_all(plan.iter().map(|lookup| self.fetch(lookup))).await;

        let mut raw: Vec<Description> = fetched.into_iter().flatten().collect();
        if let Some(observation) = observation_description(taxon, &lang) {
            raw.push(observation);
        }

        let mut seen = HashSet::new();
        let mut descriptions = Vec::new();
        let mut sources = Vec::new();
        for desc in raw {
            let text = collapse_whitespace(&desc.text);
            if text.is_empty() || !seen.insert(dedup_key(&text)) {
                continue;
            }
            let label = match desc.source_kind {
                SourceKind::Encyclopedic => self.encyclopedia.label(&desc.language),
                SourceKind::ObservationPlatform => OBSERVATION_LABEL.to_string(),
            };
            if sources.len() < MAX_SOURCES && !sources.contains(&label) {
                sources.push(label);
            }
            descriptions.push(Description {
                text: truncate_at_word(&text, self.description_budget),
                ..desc
            });
        }

        debug!(
            taxon_id = taxon.id,
            lookups = plan.len(),
            kept = descriptions.len(),
            "species data collected"
        );

        let context_text = context_text(taxon, &lang, &descriptions);
        SpeciesData {
            descriptions,
            sources,
            taxonomy: TaxonomySnapshot::of(taxon),
            context_text,
        }
    }
}

fn observation_description(taxon: &Taxon, lang: &str) -> Option<Description> {
    let html = taxon.observation_summary.as_deref()?.trim();
    if html.is_empty() {
        return None;
    }
    let text = html2text::from_read(html.as_bytes(), 10_000).unwrap_or_else(|_| html.to_string());
    Some(Description {
        language: lang.to_string(),
        text,
        source_kind: SourceKind::ObservationPlatform,
    })
}

fn dedup_key(text: &str) -> String {
    text.to_lowercase().chars().take(DEDUP_PREFIX_CHARS).collect()
}

fn context_text(taxon: &Taxon, lang: &str, descriptions: &[Description]) -> String {
    let mut lines = vec![format!("Species: {}", taxon.label())];
    if let Some(family) = taxon.family() {
        lines.push(format!("Family: {}", family));
    }
    for desc in descriptions {
        if desc.language == lang {
            lines.push(desc.text.clone());
        } else {
            lines.push(format!("[{}] {}", desc.language, desc.text));
        }
    }
    lines.join("\n")
}
