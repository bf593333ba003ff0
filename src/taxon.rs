use serde::{Deserialize, Serialize};

/// Stable numeric taxon identifier (iNaturalist taxon id).
pub type TaxonId = u64;

/// Taxonomic rank. Intermediate ranks the pipeline never reasons about
/// (subfamily, tribe, section...) deserialize as `Other`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Rank {
    Kingdom,
    Phylum,
    Class,
    Order,
    Family,
    Genus,
    Species,
    Subspecies,
    #[serde(other)]
    Other,
}

/// Coarse clade tag used to pick tone, tips and canned phrases.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum IconicGroup {
    Aves,
    Insecta,
    Arachnida,
    Mollusca,
    Mammalia,
    Reptilia,
    Amphibia,
    Actinopterygii,
    Plantae,
    Fungi,
    Animalia,
    #[serde(other)]
    Unknown,
}

impl IconicGroup {
    pub fn display_name(&self) -> &'static str {
        match self {
            IconicGroup::Aves => "birds",
            IconicGroup::Insecta => "insects",
            IconicGroup::Arachnida => "arachnids",
            IconicGroup::Mollusca => "molluscs",
            IconicGroup::Mammalia => "mammals",
            IconicGroup::Reptilia => "reptiles",
            IconicGroup::Amphibia => "amphibians",
            IconicGroup::Actinopterygii => "fishes",
            IconicGroup::Plantae => "plants",
            IconicGroup::Fungi => "fungi",
            IconicGroup::Animalia => "animals",
            IconicGroup::Unknown => "living things",
        }
    }
}

/// Minimal ancestor record carried by a taxon.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AncestorStub {
    pub rank: Rank,
    pub name: String,
}

/// A caller-supplied taxon. The pipeline only reads it.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Taxon {
    pub id: TaxonId,
    pub scientific_name: String,
    #[serde(default)]
    pub common_name: Option<String>,
    pub rank: Rank,
    #[serde(default)]
    pub ancestors: Vec<AncestorStub>,
    #[serde(default = "unknown_group")]
    pub iconic_group: IconicGroup,
    /// Description text embedded by the observation platform, usually HTML.
    #[serde(default)]
    pub observation_summary: Option<String>,
}

fn unknown_group() -> IconicGroup {
    IconicGroup::Unknown
}

impl Taxon {
    /// Name of the ancestor at `rank`, if the chain has one.
    pub fn ancestor_name(&self, rank: Rank) -> Option<&str> {
        self.ancestors
            .iter()
            .find(|a| a.rank == rank)
            .map(|a| a.name.as_str())
    }

    /// Genus from the ancestor chain, else the first word of a binomial name.
    pub fn genus(&self) -> Option<&str> {
        if self.rank == Rank::Genus {
            return Some(self.scientific_name.as_str());
        }
        self.ancestor_name(Rank::Genus).or_else(|| {
            if matches!(self.rank, Rank::Species | Rank::Subspecies) {
                self.scientific_name.split_whitespace().next()
            } else {
                None
            }
        })
    }

    pub fn family(&self) -> Option<&str> {
        if self.rank == Rank::Family {
            return Some(self.scientific_name.as_str());
        }
        self.ancestor_name(Rank::Family)
    }

    /// Common name when it says something the scientific name does not.
    pub fn distinct_common_name(&self) -> Option<&str> {
        self.common_name
            .as_deref()
            .map(str::trim)
            .filter(|c| !c.is_empty() && !c.eq_ignore_ascii_case(self.scientific_name.trim()))
    }

    /// `common (scientific)` when a common name exists, else scientific only.
    pub fn label(&self) -> String {
        match self.distinct_common_name() {
            Some(common) => format!("{} ({})", common, self.scientific_name),
            None => self.scientific_name.clone(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceKind {
    Encyclopedic,
    ObservationPlatform,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Description {
    pub language: String,
    pub text: String,
    pub source_kind: SourceKind,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaxonomySnapshot {
    pub scientific_name: String,
    pub common_name: Option<String>,
    pub rank: Rank,
    pub family: Option<String>,
    pub genus: Option<String>,
    pub order: Option<String>,
    pub iconic_group: IconicGroup,
}

impl TaxonomySnapshot {
    pub fn of(taxon: &Taxon) -> Self {
        Self {
            scientific_name: taxon.scientific_name.clone(),
            common_name: taxon.distinct_common_name().map(str::to_string),
            rank: taxon.rank,
            family: taxon.family().map(str::to_string),
            genus: taxon.genus().map(str::to_string),
            order: taxon.ancestor_name(Rank::Order).map(str::to_string),
            iconic_group: taxon.iconic_group,
        }
    }
}

/// Per-request reference material for one taxon.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SpeciesData {
    pub descriptions: Vec<Description>,
    /// Display labels, deduplicated, at most three.
    pub sources: Vec<String>,
    pub taxonomy: TaxonomySnapshot,
    pub context_text: String,
}

/// Public result of the explanation pipeline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExplanationResult {
    pub explanation: String,
    pub discriminant: Option<String>,
    pub sources: Vec<String>,
    /// True iff the content came from the fallback synthesizer.
    pub fallback: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RiddleSource {
    Ai,
    Fallback,
}

/// Public result of the riddle pipeline. `clues` is ordered hardest first.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RiddleResult {
    pub clues: Vec<String>,
    pub sources: Vec<String>,
    pub source: RiddleSource,
}

/// Merge source labels from several species, keeping order and at most `limit`.
pub fn merge_sources<'a>(lists: impl IntoIterator<Item = &'a [String]>, limit: usize) -> Vec<String> {
    let mut seen = std::collections::HashSet::new();
    let mut merged = Vec::new();
    for list in lists {
        for label in list {
            if merged.len() >= limit {
                return merged;
            }
            if seen.insert(label.as_str()) {
                merged.push(label.clone());
            }
        }
    }
    merged
}
