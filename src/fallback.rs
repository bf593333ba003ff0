//! Canned, network-free content used whenever the model cannot be trusted.
//! Everything here is deterministic and infallible.

use crate::prompts::SeverityTier;
use crate::quality::riddle::{placeholder, scrub_names};
use crate::taxon::{merge_sources, ExplanationResult, IconicGroup, SpeciesData, Taxon};
use crate::text::{primary_language, split_sentences, truncate_at_word};

const MAX_SOURCES: usize = 3;
const MIN_RIDDLE_SENTENCE_CHARS: usize = 25;
const MAX_RIDDLE_SENTENCE_CHARS: usize = 200;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Lang {
    En,
    Fr,
}

impl Lang {
    fn of(locale: &str) -> Self {
        match primary_language(locale).as_str() {
            "fr" => Lang::Fr,
            _ => Lang::En,
        }
    }
}

/// Coarse clade the tip tables are keyed by.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Clade {
    Birds,
    Insects,
    Plants,
    Fungi,
    Mammals,
    Herps,
    Generic,
}

impl Clade {
    fn of(group: IconicGroup) -> Self {
        match group {
            IconicGroup::Aves => Clade::Birds,
            IconicGroup::Insecta | IconicGroup::Arachnida => Clade::Insects,
            IconicGroup::Plantae => Clade::Plants,
            IconicGroup::Fungi => Clade::Fungi,
            IconicGroup::Mammalia => Clade::Mammals,
            IconicGroup::Reptilia | IconicGroup::Amphibia => Clade::Herps,
            _ => Clade::Generic,
        }
    }
}

fn tips(clade: Clade, lang: Lang) -> &'static [&'static str] {
    match (lang, clade) {
        (Lang::En, Clade::Birds) => &[
            "Compare the bill: its length, thickness and curve often separate similar birds at a glance.",
            "Check the head pattern, such as eye stripes, caps and cheek patches, which rarely vary within a species.",
            "Look at the wings for bars or contrasting panels, and at the tail for white edges or notches.",
            "Pay attention to overall size and posture, and to where the bird feeds, on the ground or in the canopy.",
        ],
        (Lang::En, Clade::Insects) => &[
            "Count and compare the spots or bands on the wings, since their layout is often specific.",
            "Look at the antennae: their length, thickness and tips help separate close look-alikes.",
            "Compare the shape of the body and the legs, and note the plant or place where it was found.",
        ],
        (Lang::En, Clade::Plants) => &[
            "Compare the leaves: their shape, their edges and how they are arranged along the stem.",
            "Look closely at the flowers, counting the petals and noting their colour and symmetry.",
            "Check the stem and the growth habit, and consider the habitat where the plant grows.",
        ],
        (Lang::En, Clade::Fungi) => &[
            "Turn the cap over and compare the gills, pores or spines underneath, along with their colour.",
            "Look at the stem for a ring or a cup at the base, two features that matter a lot for mushrooms.",
            "Note the substrate, wood or soil, and the kind of trees growing nearby.",
        ],
        (Lang::En, Clade::Mammals) => &[
            "Compare the ears and the tail, whose size and shape differ a lot between similar mammals.",
            "Look at the coat pattern and colour, especially on the face, the flanks and the belly.",
            "Consider the overall size and build, and the habitat where the animal was seen.",
        ],
        (Lang::En, Clade::Herps) => &[
            "Compare the pattern on the back and the flanks, and look at the colour of the belly when visible.",
            "Look at the shape of the head and the position of the eyes and the pupils.",
            "Consider the habitat, wet or dry, and whether the skin looks smooth, warty or scaly.",
        ],
        (Lang::En, Clade::Generic) => &[
            "Compare the overall shape and size first, then focus on one distinctive detail.",
            "Look carefully at the colours and the patterns, which are often specific to each species.",
            "Take the habitat and the season into account, since they help rule out look-alikes.",
            "Compare several photos of both species to learn the details that never change.",
        ],
        (Lang::Fr, Clade::Birds) => &[
            "Comparez le bec : sa longueur, son épaisseur et sa courbure séparent souvent des oiseaux proches.",
            "Observez le dessin de la tête, comme les sourcils, la calotte et les joues, qui varient peu au sein d'une espèce.",
            "Regardez les ailes pour repérer des barres ou des panneaux contrastés, et la queue pour ses bords blancs.",
            "Faites attention à la taille, à la posture et au lieu où l'oiseau se nourrit, au sol ou dans les arbres.",
        ],
        (Lang::Fr, Clade::Insects) => &[
            "Comptez et comparez les taches ou les bandes des ailes, leur disposition est souvent propre à chaque espèce.",
            "Regardez les antennes : leur longueur, leur épaisseur et leur extrémité aident à séparer les espèces proches.",
            "Comparez la forme du corps et des pattes, et notez la plante ou le lieu où il a été trouvé.",
        ],
        (Lang::Fr, Clade::Plants) => &[
            "Comparez les feuilles : leur forme, leur bord et leur disposition le long de la tige.",
            "Observez les fleurs de près, comptez les pétales et notez leur couleur et leur symétrie.",
            "Regardez la tige et le port de la plante, et tenez compte du milieu où elle pousse.",
        ],
        (Lang::Fr, Clade::Fungi) => &[
            "Retournez le chapeau et comparez les lames, les pores ou les aiguillons dessous, ainsi que leur couleur.",
            "Regardez le pied : la présence d'un anneau ou d'une volve à la base compte beaucoup chez les champignons.",
            "Notez le support, bois ou sol, et les arbres qui poussent à proximité.",
        ],
        (Lang::Fr, Clade::Mammals) => &[
            "Comparez les oreilles et la queue, dont la taille et la forme diffèrent beaucoup entre mammifères proches.",
            "Observez le pelage, surtout sur la face, les flancs et le ventre.",
            "Tenez compte de la taille, de la silhouette et du milieu où l'animal a été vu.",
        ],
        (Lang::Fr, Clade::Herps) => &[
            "Comparez le motif du dos et des flancs, et la couleur du ventre quand elle est visible.",
            "Regardez la forme de la tête ainsi que la position des yeux et la forme des pupilles.",
            "Tenez compte du milieu, humide ou sec, et de la peau, lisse, verruqueuse ou couverte d'écailles.",
        ],
        (Lang::Fr, Clade::Generic) => &[
            "Comparez d'abord la forme générale et la taille, puis concentrez-vous sur un détail distinctif.",
            "Observez attentivement les couleurs et les motifs, souvent propres à chaque espèce.",
            "Tenez compte du milieu et de la saison, ils aident à écarter les espèces ressemblantes.",
            "Comparez plusieurs photos des deux espèces pour retenir les détails qui ne changent jamais.",
        ],
    }
}

fn canned_discriminant(clade: Clade, lang: Lang) -> &'static str {
    match (lang, clade) {
        (Lang::En, Clade::Birds) => "bill shape and head pattern",
        (Lang::En, Clade::Insects) => "wing markings and antennae",
        (Lang::En, Clade::Plants) => "leaf shape and flower structure",
        (Lang::En, Clade::Fungi) => "gills, ring and stem base",
        (Lang::En, Clade::Mammals) => "ears, tail and coat pattern",
        (Lang::En, Clade::Herps) => "back pattern and head shape",
        (Lang::En, Clade::Generic) => "overall shape and colour pattern",
        (Lang::Fr, Clade::Birds) => "forme du bec et dessin de la tête",
        (Lang::Fr, Clade::Insects) => "motifs des ailes et antennes",
        (Lang::Fr, Clade::Plants) => "forme des feuilles et des fleurs",
        (Lang::Fr, Clade::Fungi) => "lames, anneau et base du pied",
        (Lang::Fr, Clade::Mammals) => "oreilles, queue et pelage",
        (Lang::Fr, Clade::Herps) => "motif du dos et forme de la tête",
        (Lang::Fr, Clade::Generic) => "forme générale et couleurs",
    }
}

fn lead_in(severity: SeverityTier, lang: Lang, correct: &str, wrong: &str) -> String {
    match (lang, severity) {
        (Lang::En, SeverityTier::Close) => format!(
            "{} and {} are close relatives from the same genus, so the difference is subtle.",
            correct, wrong
        ),
        (Lang::En, SeverityTier::Medium) => {
            format!("{} and {} are related but distinct species.", correct, wrong)
        }
        (Lang::En, SeverityTier::Huge) => format!(
            "{} and {} belong to very different groups of living things.",
            correct, wrong
        ),
        (Lang::Fr, SeverityTier::Close) => format!(
            "{} et {} sont proches parents au sein du même genre, la différence est donc subtile.",
            correct, wrong
        ),
        (Lang::Fr, SeverityTier::Medium) => format!(
            "{} et {} sont apparentés mais bien distincts.",
            correct, wrong
        ),
        (Lang::Fr, SeverityTier::Huge) => format!(
            "{} et {} appartiennent à des groupes du vivant très différents.",
            correct, wrong
        ),
    }
}

/// Index of the canned tip for a pair: `(correct_id + wrong_id) mod tip_count`.
pub fn tip_index(correct_id: u64, wrong_id: u64, tip_count: usize) -> usize {
    (correct_id.wrapping_add(wrong_id) % tip_count.max(1) as u64) as usize
}

/// Deterministic explanation for a confused pair. Same pair, same text.
pub fn build_fallback(
    correct: &Taxon,
    wrong: &Taxon,
    severity: SeverityTier,
    data_correct: &SpeciesData,
    data_wrong: &SpeciesData,
    locale: &str,
) -> ExplanationResult {
    let lang = Lang::of(locale);
    let clade = Clade::of(correct.iconic_group);
    let tips = tips(clade, lang);
    let tip = tips[tip_index(correct.id, wrong.id, tips.len())];

    ExplanationResult {
        explanation: format!(
            "{} {}",
            lead_in(severity, lang, &correct.label(), &wrong.label()),
            tip
        ),
        discriminant: Some(canned_discriminant(clade, lang).to_string()),
        sources: merge_sources(
            [data_correct.sources.as_slice(), data_wrong.sources.as_slice()],
            MAX_SOURCES,
        ),
        fallback: true,
    }
}

fn group_phrase(group: IconicGroup, lang: Lang) -> &'static str {
    match lang {
        Lang::En => group.display_name(),
        Lang::Fr => match group {
            IconicGroup::Aves => "oiseaux",
            IconicGroup::Insecta => "insectes",
            IconicGroup::Arachnida => "arachnides",
            IconicGroup::Mollusca => "mollusques",
            IconicGroup::Mammalia => "mammifères",
            IconicGroup::Reptilia => "reptiles",
            IconicGroup::Amphibia => "amphibiens",
            IconicGroup::Actinopterygii => "poissons",
            IconicGroup::Plantae => "plantes",
            IconicGroup::Fungi => "champignons",
            IconicGroup::Animalia => "animaux",
            IconicGroup::Unknown => "êtres vivants",
        },
    }
}

fn family_clue(target: &Taxon, lang: Lang) -> String {
    match (target.family(), lang) {
        (Some(family), Lang::En) => format!("It belongs to the family {}.", family),
        (Some(family), Lang::Fr) => format!("Elle appartient à la famille des {}.", family),
        (None, Lang::En) => "Its closest relatives are not the ones most people would guess.".to_string(),
        (None, Lang::Fr) => "Ses plus proches parents ne sont pas ceux que l'on imagine.".to_string(),
    }
}

/// The group phrase, unless it would name the target itself (a class or
/// kingdom such as Aves or Fungi), in which case the broadest group is used.
fn safe_group_phrase(target: &Taxon, lang: Lang) -> &'static str {
    let group = group_phrase(target.iconic_group, lang);
    let names = [Some(target.scientific_name.as_str()), target.common_name.as_deref()];
    let collides = names.into_iter().flatten().any(|name| {
        let (name, group) = (name.trim().to_lowercase(), group.to_lowercase());
        !name.is_empty() && (name.contains(&group) || group.contains(&name))
    });
    if collides {
        group_phrase(IconicGroup::Unknown, lang)
    } else {
        group
    }
}

fn generic_clues(target: &Taxon, lang: Lang) -> [String; 2] {
    let group = safe_group_phrase(target, lang);
    match lang {
        Lang::En => [
            "Look closely at its shape, its colours and its size to recognise it.".to_string(),
            format!("It is one of the {} that nature observers often record.", group),
        ],
        Lang::Fr => [
            "Observez bien sa forme, ses couleurs et sa taille pour la reconnaître.".to_string(),
            format!("Elle fait partie des {} souvent observés par les naturalistes.", group),
        ],
    }
}

/// Three clues built only from taxonomy and already-collected descriptions.
/// Clue 1 names the family; clues 2 and 3 reuse description sentences in the
/// target language with the species' names scrubbed, padded with generic lines.
pub fn build_fallback_riddle(target: &Taxon, data: &SpeciesData, locale: &str) -> [String; 3] {
    let lang = Lang::of(locale);
    let primary = primary_language(locale);
    let replacement = placeholder(locale);

    let mut name_free = Vec::new();
    let mut scrubbed = Vec::new();
    for desc in data.descriptions.iter().filter(|d| d.language == primary) {
        for sentence in split_sentences(&desc.text) {
            let count = sentence.chars().count();
            if !(MIN_RIDDLE_SENTENCE_CHARS..=MAX_RIDDLE_SENTENCE_CHARS).contains(&count)
                || sentence.ends_with('…')
            {
                continue;
            }
            let clean = scrub_names(&sentence, target, replacement);
            if clean == sentence {
                name_free.push(clean);
            } else {
                scrubbed.push(clean);
            }
        }
    }

    let mut from_text = name_free.into_iter().chain(scrubbed);
    let [generic_a, generic_b] = generic_clues(target, lang);
    let second = from_text.next().unwrap_or(generic_a);
    let third = from_text.next().unwrap_or(generic_b);

    [
        scrub_names(&family_clue(target, lang), target, replacement),
        truncate_at_word(&scrub_names(&second, target, replacement), MAX_RIDDLE_SENTENCE_CHARS),
        truncate_at_word(&scrub_names(&third, target, replacement), MAX_RIDDLE_SENTENCE_CHARS),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::QualityLimits;
    use crate::prompts::classify_severity;
    use crate::quality::{validate, ParsedExplanation};
    use crate::taxon::fixtures::*;
    use crate::taxon::{Description, Rank, SourceKind, TaxonomySnapshot};

    fn data(taxon: &Taxon, descriptions: Vec<Description>, sources: &[&str]) -> SpeciesData {
        SpeciesData {
            descriptions,
            sources: sources.iter().map(|s| s.to_string()).collect(),
            taxonomy: TaxonomySnapshot::of(taxon),
            context_text: String::new(),
        }
    }

    #[test]
    fn test_tip_index_is_modular() {
        assert_eq!(tip_index(3, 4, 4), 3);
        assert_eq!(tip_index(13094, 144849, 4), (13094 + 144849) % 4);
        assert_eq!(tip_index(u64::MAX, 2, 3), (1u64 % 3) as usize);
        assert_eq!(tip_index(1, 2, 0), 0);
    }

    #[test]
    fn test_fallback_is_deterministic() {
        let (a, b) = (great_tit(), blue_tit());
        let (da, db) = (data(&a, vec![], &["Wikipedia (en)"]), data(&b, vec![], &["iNaturalist"]));
        let first = build_fallback(&a, &b, SeverityTier::Medium, &da, &db, "en");
        let second = build_fallback(&a, &b, SeverityTier::Medium, &da, &db, "en");
        assert_eq!(first, second);
        assert!(first.fallback);
        assert_eq!(first.discriminant.as_deref(), Some("bill shape and head pattern"));
        assert_eq!(first.sources, vec!["Wikipedia (en)", "iNaturalist"]);
        let idx = tip_index(a.id, b.id, tips(Clade::Birds, Lang::En).len());
        assert!(first.explanation.ends_with(tips(Clade::Birds, Lang::En)[idx]));
    }

    #[test]
    fn test_unknown_clade_uses_generic_tips() {
        let a = species(5, "Foo bar", None, IconicGroup::Unknown, &[]);
        let b = great_tit();
        let r = build_fallback(&a, &b, SeverityTier::Huge, &data(&a, vec![], &[]), &data(&b, vec![], &[]), "fr");
        assert_eq!(r.discriminant.as_deref(), Some("forme générale et couleurs"));
        assert!(r.explanation.starts_with("Foo bar et Great Tit (Parus major) appartiennent"));
    }

    #[test]
    fn test_every_tip_passes_quality_checks() {
        let limits = QualityLimits::default();
        let (a, b) = (great_tit(), blue_tit());
        for locale in ["en", "fr"] {
            for offset in 0..4u64 {
                let mut a = a.clone();
                a.id += offset;
                for group in [
                    IconicGroup::Aves,
                    IconicGroup::Insecta,
                    IconicGroup::Plantae,
                    IconicGroup::Fungi,
                    IconicGroup::Mammalia,
                    IconicGroup::Amphibia,
                    IconicGroup::Unknown,
                ] {
                    a.iconic_group = group;
                    let severity = classify_severity(&a, &b);
                    let r = build_fallback(&a, &b, severity, &data(&a, vec![], &[]), &data(&b, vec![], &[]), locale);
                    let parsed = ParsedExplanation {
                        explanation: r.explanation.clone(),
                        discriminant: r.discriminant.clone(),
                    };
                    let exempt = [a.label(), b.label()];
                    let exempt: Vec<&str> = exempt.iter().map(String::as_str).collect();
                    let report = validate(&parsed, locale, &limits, &exempt);
                    assert!(report.valid(), "{} {:?}: {:?}", locale, group, report.summary());
                }
            }
        }
    }

    #[test]
    fn test_fallback_riddle_uses_family_and_descriptions() {
        let t = great_tit();
        let d = data(
            &t,
            vec![
                Description {
                    language: "en".to_string(),
                    text: "The great tit (Parus major) is a passerine bird. It nests in tree holes and nest boxes. Its song is a loud two-note whistle.".to_string(),
                    source_kind: SourceKind::Encyclopedic,
                },
                Description {
                    language: "fr".to_string(),
                    text: "Texte en français qui ne doit pas servir ici.".to_string(),
                    source_kind: SourceKind::Encyclopedic,
                },
            ],
            &[],
        );
        let clues = build_fallback_riddle(&t, &d, "en");
        assert_eq!(clues[0], "It belongs to the family Paridae.");
        assert_eq!(clues[1], "It nests in tree holes and nest boxes.");
        assert_eq!(clues[2], "Its song is a loud two-note whistle.");
    }

    #[test]
    fn test_fallback_riddle_pads_and_never_leaks_names() {
        let mut t = great_tit();
        t.ancestors.clear();
        let d = data(
            &t,
            vec![Description {
                language: "en".to_string(),
                text: "The Great Tit is the largest tit in Europe.".to_string(),
                source_kind: SourceKind::Encyclopedic,
            }],
            &[],
        );
        let clues = build_fallback_riddle(&t, &d, "en");
        assert_eq!(clues.len(), 3);
        for clue in &clues {
            assert!(clue.chars().count() >= 6);
            let lower = clue.to_lowercase();
            assert!(!lower.contains("great tit"));
            assert!(!lower.contains("parus major"));
        }
        assert_eq!(clues[1], "This species is the largest tit in Europe.");
        assert!(clues[2].contains("birds"));
    }

    fn higher_taxon(id: u64, scientific: &str, common: Option<&str>, rank: Rank, group: IconicGroup) -> Taxon {
        let mut t = species(id, scientific, common, group, &[]);
        t.rank = rank;
        t
    }

    #[test]
    fn test_fallback_riddle_for_class_and_kingdom_hides_names() {
        let targets = [
            higher_taxon(3, "Aves", Some("Birds"), Rank::Class, IconicGroup::Aves),
            higher_taxon(47170, "Fungi", None, Rank::Kingdom, IconicGroup::Fungi),
            higher_taxon(47126, "Plantae", Some("Plants"), Rank::Kingdom, IconicGroup::Plantae),
        ];
        for target in &targets {
            for locale in ["en", "fr"] {
                let clues = build_fallback_riddle(target, &data(target, vec![], &[]), locale);
                assert_eq!(clues.len(), 3);
                for clue in &clues {
                    let lower = clue.to_lowercase();
                    assert!(!lower.contains(&target.scientific_name.to_lowercase()), "{}", clue);
                    if let Some(common) = &target.common_name {
                        assert!(!lower.contains(&common.to_lowercase()), "{}", clue);
                    }
                }
            }
        }
        let birds = build_fallback_riddle(&targets[0], &data(&targets[0], vec![], &[]), "en");
        assert_eq!(birds[2], "It is one of the living things that nature observers often record.");
    }
}
