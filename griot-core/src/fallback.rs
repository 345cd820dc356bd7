//! Pre-authored stories served when generation cannot run.
//!
//! The library is the pipeline's floor: whatever goes wrong upstream, a
//! request always ends in a presentable artifact. Selection is by cultural
//! tag with a generic tale behind every unknown tag, and construction is
//! pure, so handing out a fallback can never itself fail.

use crate::artifact::{BranchId, BranchStub, StoryArtifact, StoryBlock, StoryId};
use crate::request::{EmotionalTone, StoryRequest};
use chrono::Utc;
use std::collections::HashMap;

/// Every fallback title starts with this, which makes degraded output easy
/// to spot in logs and in tests.
pub const FALLBACK_TITLE_PREFIX: &str = "The Storyteller's";

struct FallbackTemplate {
    title: &'static str,
    theme: &'static str,
    region: &'static str,
    character_name: &'static str,
    blocks: &'static [&'static str],
    note: (&'static str, &'static str),
    concepts: &'static [&'static str],
}

static GENERIC_TEMPLATE: FallbackTemplate = FallbackTemplate {
    title: "The Storyteller's Quiet Path",
    theme: "patience",
    region: "a small village",
    character_name: "Noor",
    blocks: &[
        "Noor wanted to reach the hilltop before sunset, so she planned her \
         walk the way her grandmother taught her: first the bridge, then the \
         olive grove, then the winding stairs. One step after another, always \
         in the same order, and the path carried her upward.",
        "Halfway there the wind undid her scarf, and she stopped to tie it \
         again. And again. Three tries before the knot held. \"Trying one \
         more time is not failing,\" she reminded herself. \"It is how \
         knots get learned.\"",
        "At the top she looked back at the whole path laid out below, every \
         step she had repeated now part of one long, finished journey.",
    ],
    note: (
        "storyteller",
        "Every culture keeps its tales alive through a trusted teller who \
         repeats them until they are known by heart.",
    ),
    concepts: &["sequences", "loops"],
};

static WEST_AFRICAN_TEMPLATE: FallbackTemplate = FallbackTemplate {
    title: "The Storyteller's Drum",
    theme: "rhythm and repetition",
    region: "West Africa",
    character_name: "Kofi",
    blocks: &[
        "Under the baobab tree, Kofi watched the griot strike the djembe: \
         one low note, two sharp notes, rest. One low note, two sharp notes, \
         rest. The same small pattern, played over and over, grew into a \
         rhythm big enough for the whole village to dance to.",
        "\"Your hands will forget,\" the griot laughed, \"so let the pattern \
         remember for you. Play it again and again until the drum answers \
         before you ask.\" Kofi repeated the pattern until his palms knew it \
         without him.",
        "When the moon rose, the griot called out a phrase and the drummers \
         answered back, call and response, each reply waiting for its \
         signal before it began.",
    ],
    note: (
        "djembe",
        "A goblet-shaped West African drum played with bare hands; its \
         patterns are passed down by repetition, not by writing.",
    ),
    concepts: &["loops", "events"],
};

static EAST_ASIAN_TEMPLATE: FallbackTemplate = FallbackTemplate {
    title: "The Storyteller's Lantern",
    theme: "small careful steps",
    region: "East Asia",
    character_name: "Mei",
    blocks: &[
        "Before the lantern festival, Mei folded paper with her grandfather. \
         \"The order matters,\" he said. \"Crease the spine first, then the \
         wings, then the crown. Skip a fold and the lantern will not \
         stand.\" So Mei followed the steps exactly, one fold after the \
         next.",
        "Outside, the night wind picked up. \"If the wind is strong, we \
         shelter the flame behind the screen,\" her grandfather said. \"If \
         the air is still, we let it ride open on the river.\" Mei watched \
         the treetops and made her choice.",
        "Her lantern drifted out among a hundred others, steady and bright, \
         because every fold had happened in its proper turn.",
    ],
    note: (
        "lantern festival",
        "A festival where paper lanterns are set afloat to carry wishes; \
         each lantern is folded in a strict sequence of creases.",
    ),
    concepts: &["sequences", "conditionals"],
};

static LATIN_AMERICAN_TEMPLATE: FallbackTemplate = FallbackTemplate {
    title: "The Storyteller's River",
    theme: "choices on the water",
    region: "Latin America",
    character_name: "Sofía",
    blocks: &[
        "Sofía's abuela packed the canoe and named each thing as it went \
         in: the jar called agua, the basket called maíz, the coil called \
         cuerda. \"Give everything its name,\" abuela said, \"and you will \
         always know what you carry.\"",
        "Where the river forked, Sofía had to decide. If the water ran \
         fast and white, she would take the slow channel past the reeds. \
         If it ran calm, she could choose the short way under the ceiba \
         tree. She read the current, then chose.",
        "That evening abuela asked not where she had gone, but how she had \
         decided, because a good choice can be told again like a good \
         story.",
    ],
    note: (
        "abuela",
        "Grandmother; in many Latin American families the abuela is the \
         keeper and reteller of the family's stories.",
    ),
    concepts: &["variables", "conditionals"],
};

lazy_static::lazy_static! {
    static ref REGIONAL_TEMPLATES: HashMap<&'static str, &'static FallbackTemplate> = {
        let mut table = HashMap::new();
        table.insert("west-african", &WEST_AFRICAN_TEMPLATE);
        table.insert("east-asian", &EAST_ASIAN_TEMPLATE);
        table.insert("latin-american", &LATIN_AMERICAN_TEMPLATE);
        table
    };
}

/// Canned branch choices, cycled through when a branch-set request has to
/// be answered without the generator.
const FALLBACK_BRANCHES: &[(&str, &str, EmotionalTone, &str)] = &[
    (
        "Practice the pattern one more time",
        "Repeating the steps until they feel like rhythm.",
        EmotionalTone::Calm,
        "loops",
    ),
    (
        "Take the unfamiliar path",
        "A fork in the road, and a condition to weigh before choosing.",
        EmotionalTone::Brave,
        "conditionals",
    ),
    (
        "Ask the elder what each thing is called",
        "Naming what you carry so you can use it later.",
        EmotionalTone::Curious,
        "variables",
    ),
    (
        "Retrace the steps from the beginning",
        "Walking the whole journey again, in order, to find what was missed.",
        EmotionalTone::Neutral,
        "sequences",
    ),
];

// ============================================================================
// FallbackLibrary
// ============================================================================

/// Deterministic source of pre-authored narrative output.
#[derive(Debug, Clone, Copy, Default)]
pub struct FallbackLibrary;

impl FallbackLibrary {
    pub fn new() -> Self {
        Self
    }

    /// A complete pre-authored story matched to the request's cultural tag,
    /// or the generic tale when the tag is unknown.
    pub fn story(&self, request: &StoryRequest) -> StoryArtifact {
        let tag = request.cultural_tag().to_lowercase();
        let template = REGIONAL_TEMPLATES
            .get(tag.as_str())
            .copied()
            .unwrap_or(&GENERIC_TEMPLATE);
        Self::build(template)
    }

    /// Pre-authored branch stubs, cycling the canned set to reach `count`.
    pub fn branches(&self, count: usize) -> Vec<BranchStub> {
        FALLBACK_BRANCHES
            .iter()
            .cycle()
            .take(count)
            .map(|(choice_text, preview, tone, concept)| BranchStub {
                id: BranchId::new(),
                choice_text: choice_text.to_string(),
                preview: preview.to_string(),
                tone: *tone,
                concept: concept.to_string(),
            })
            .collect()
    }

    fn build(template: &FallbackTemplate) -> StoryArtifact {
        let mut cultural_notes = HashMap::new();
        cultural_notes.insert(template.note.0.to_string(), template.note.1.to_string());

        StoryArtifact {
            id: StoryId::new(),
            title: template.title.to_string(),
            theme: template.theme.to_string(),
            region: template.region.to_string(),
            character_name: template.character_name.to_string(),
            blocks: template
                .blocks
                .iter()
                .map(|text| StoryBlock::text(*text))
                .collect(),
            challenge: None,
            branches: None,
            cultural_notes,
            concepts_covered: template.concepts.iter().map(|c| c.to_string()).collect(),
            created_at: Utc::now(),
        }
    }
}
