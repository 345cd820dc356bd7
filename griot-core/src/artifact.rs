//! Validated narrative artifacts.
//!
//! Types produced by the pipeline once a generation has passed validation:
//! whole stories, their content blocks, embedded challenges, and the branch
//! stubs a reader can choose between. Artifacts are immutable once cached;
//! a continuation becomes a new artifact under its own key.

use crate::request::EmotionalTone;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use uuid::Uuid;

// ============================================================================
// ID Types
// ============================================================================

/// Unique identifier for stories.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StoryId(pub Uuid);

impl StoryId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for StoryId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for StoryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Unique identifier for branch stubs, stable within the parent story.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BranchId(pub Uuid);

impl BranchId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for BranchId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for BranchId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ============================================================================
// Story content
// ============================================================================

/// One ordered block of story content.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoryBlock {
    pub text: String,
    /// Tone shift for this block, when it differs from the story's tone.
    pub tone: Option<EmotionalTone>,
    /// Path or URI of an accompanying media asset.
    pub media: Option<String>,
}

impl StoryBlock {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            tone: None,
            media: None,
        }
    }
}

/// A coding challenge embedded in a continuation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChallengeSpec {
    /// What the reader is asked to figure out.
    pub prompt: String,
    /// The learning concept the challenge exercises.
    pub concept: String,
    pub hint: Option<String>,
}

/// A short, unexpanded narrative choice offered to the reader.
///
/// Stubs are expanded into full artifacts via branch continuation; the id is
/// what ties a continuation request back to the choice that spawned it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BranchStub {
    pub id: BranchId,
    /// The choice as presented to the reader.
    pub choice_text: String,
    /// A short teaser of where the choice leads.
    pub preview: String,
    /// Tone the continuation should take.
    pub tone: EmotionalTone,
    /// The single learning concept this branch emphasizes.
    pub concept: String,
}

/// A validated story, ready for presentation and caching.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoryArtifact {
    pub id: StoryId,
    pub title: String,
    pub theme: String,
    /// Region the story is set in, derived from the cultural context.
    pub region: String,
    pub character_name: String,
    /// Story content in presentation order.
    pub blocks: Vec<StoryBlock>,
    pub challenge: Option<ChallengeSpec>,
    /// Branch choices, when this artifact carries them.
    pub branches: Option<Vec<BranchStub>>,
    /// Cultural vocabulary and notes keyed by term.
    pub cultural_notes: HashMap<String, String>,
    /// Learning concepts the narrative actually covers.
    pub concepts_covered: Vec<String>,
    pub created_at: DateTime<Utc>,
}

impl StoryArtifact {
    /// All narrative text joined in block order.
    pub fn full_text(&self) -> String {
        self.blocks
            .iter()
            .map(|b| b.text.as_str())
            .collect::<Vec<_>>()
            .join("\n\n")
    }

    /// Total word count across all content blocks.
    pub fn word_count(&self) -> usize {
        self.blocks
            .iter()
            .map(|b| b.text.split_whitespace().count())
            .sum()
    }

    /// Look up a branch stub by id.
    pub fn branch(&self, id: BranchId) -> Option<&BranchStub> {
        self.branches
            .as_deref()
            .and_then(|stubs| stubs.iter().find(|s| s.id == id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_artifact() -> StoryArtifact {
        StoryArtifact {
            id: StoryId::new(),
            title: "Amara and the Talking Drum".to_string(),
            theme: "perseverance".to_string(),
            region: "west-africa".to_string(),
            character_name: "Amara".to_string(),
            blocks: vec![
                StoryBlock::text("Amara beat the drum once, twice, three times."),
                StoryBlock::text("Each repeat brought the village closer."),
            ],
            challenge: None,
            branches: Some(vec![BranchStub {
                id: BranchId::new(),
                choice_text: "Follow the river".to_string(),
                preview: "The river hides a pattern.".to_string(),
                tone: EmotionalTone::Curious,
                concept: "loops".to_string(),
            }]),
            cultural_notes: HashMap::new(),
            concepts_covered: vec!["loops".to_string()],
            created_at: Utc::now(),
        }
    }

    #[test]
    fn full_text_joins_blocks_in_order() {
        let artifact = sample_artifact();
        let text = artifact.full_text();
        assert!(text.starts_with("Amara beat the drum"));
        assert!(text.ends_with("closer."));
    }

    #[test]
    fn word_count_sums_blocks() {
        let artifact = sample_artifact();
        assert_eq!(artifact.word_count(), 14);
    }

    #[test]
    fn branch_lookup_by_id() {
        let artifact = sample_artifact();
        let id = artifact.branches.as_ref().unwrap()[0].id;
        assert!(artifact.branch(id).is_some());
        assert!(artifact.branch(BranchId::new()).is_none());
    }
}
