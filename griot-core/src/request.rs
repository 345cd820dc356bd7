//! Story request model and cache-key derivation.
//!
//! A [`StoryRequest`] captures everything the pipeline needs to produce one
//! narrative output: which concepts to teach, how to pitch them, and where the
//! story sits in an existing narrative (fresh, branch set, or continuation).
//! Requests are immutable values; the cache key is a pure function of their
//! semantic content.

use crate::artifact::{BranchId, StoryId};
use serde::{Deserialize, Serialize};
use std::fmt;

// ============================================================================
// Request enums
// ============================================================================

/// The kind of narrative output a request asks for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RequestKind {
    /// A complete new story.
    Fresh,
    /// A set of branch choices extending an existing story.
    BranchSet,
    /// The continuation of one chosen branch.
    Continuation,
}

impl RequestKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            RequestKind::Fresh => "fresh",
            RequestKind::BranchSet => "branch-set",
            RequestKind::Continuation => "continuation",
        }
    }
}

/// Reader skill bands, used to pitch vocabulary and story complexity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SkillLevel {
    Beginner,
    Intermediate,
    Advanced,
}

impl SkillLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            SkillLevel::Beginner => "beginner",
            SkillLevel::Intermediate => "intermediate",
            SkillLevel::Advanced => "advanced",
        }
    }
}

/// Emotional register a story or branch should carry.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EmotionalTone {
    #[default]
    Neutral,
    Excited,
    Calm,
    Curious,
    Brave,
}

impl EmotionalTone {
    pub fn as_str(&self) -> &'static str {
        match self {
            EmotionalTone::Neutral => "neutral",
            EmotionalTone::Excited => "excited",
            EmotionalTone::Calm => "calm",
            EmotionalTone::Curious => "curious",
            EmotionalTone::Brave => "brave",
        }
    }

    /// Parse a tone name as emitted by the generator; unknown names map to
    /// `None` so callers can decide how to default.
    pub fn parse(name: &str) -> Option<Self> {
        match name.trim().to_lowercase().as_str() {
            "neutral" => Some(EmotionalTone::Neutral),
            "excited" => Some(EmotionalTone::Excited),
            "calm" => Some(EmotionalTone::Calm),
            "curious" => Some(EmotionalTone::Curious),
            "brave" => Some(EmotionalTone::Brave),
            _ => None,
        }
    }
}

impl fmt::Display for EmotionalTone {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// ============================================================================
// StoryRequest
// ============================================================================

/// Cultural-context tag used when a request does not name one.
pub const GENERAL_CONTEXT: &str = "general";

/// An immutable request for one narrative output.
///
/// Built per call and discarded after the pipeline answers it. Optional
/// fields fall back to documented defaults (`tone` → neutral,
/// `cultural_context` → "general") wherever they are consumed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoryRequest {
    pub kind: RequestKind,
    /// Learning concepts the story must cover, in presentation order.
    pub concepts: Vec<String>,
    pub skill_level: SkillLevel,
    pub tone: Option<EmotionalTone>,
    pub cultural_context: Option<String>,
    /// The story this request extends (branch sets and continuations).
    pub parent_story: Option<StoryId>,
    /// The chosen branch a continuation expands.
    pub branch_id: Option<BranchId>,
    /// Narrative-so-far blob handed to the prompt for context.
    pub history: Option<String>,
    /// Number of branches to produce (branch-set kind only).
    pub branch_count: Option<usize>,
}

impl StoryRequest {
    /// A request for a complete new story.
    pub fn fresh(concepts: Vec<String>, skill_level: SkillLevel) -> Self {
        Self {
            kind: RequestKind::Fresh,
            concepts,
            skill_level,
            tone: None,
            cultural_context: None,
            parent_story: None,
            branch_id: None,
            history: None,
            branch_count: None,
        }
    }

    /// A request for a set of branch choices extending `parent_story`.
    pub fn branch_set(
        parent_story: StoryId,
        concepts: Vec<String>,
        skill_level: SkillLevel,
        branch_count: usize,
    ) -> Self {
        Self {
            kind: RequestKind::BranchSet,
            concepts,
            skill_level,
            tone: None,
            cultural_context: None,
            parent_story: Some(parent_story),
            branch_id: None,
            history: None,
            branch_count: Some(branch_count),
        }
    }

    /// A request continuing the branch `branch_id` of `parent_story`.
    pub fn continuation(
        parent_story: StoryId,
        branch_id: BranchId,
        concepts: Vec<String>,
        skill_level: SkillLevel,
    ) -> Self {
        Self {
            kind: RequestKind::Continuation,
            concepts,
            skill_level,
            tone: None,
            cultural_context: None,
            parent_story: Some(parent_story),
            branch_id: Some(branch_id),
            history: None,
            branch_count: None,
        }
    }

    pub fn with_tone(mut self, tone: EmotionalTone) -> Self {
        self.tone = Some(tone);
        self
    }

    pub fn with_cultural_context(mut self, tag: impl Into<String>) -> Self {
        self.cultural_context = Some(tag.into());
        self
    }

    pub fn with_history(mut self, history: impl Into<String>) -> Self {
        self.history = Some(history.into());
        self
    }

    /// The tone to use, defaulting to neutral.
    pub fn effective_tone(&self) -> EmotionalTone {
        self.tone.unwrap_or_default()
    }

    /// The cultural-context tag to use, defaulting to [`GENERAL_CONTEXT`].
    pub fn cultural_tag(&self) -> &str {
        self.cultural_context.as_deref().unwrap_or(GENERAL_CONTEXT)
    }

    /// Derive this request's cache key.
    pub fn cache_key(&self) -> CacheKey {
        CacheKey::for_request(self)
    }
}

// ============================================================================
// CacheKey
// ============================================================================

/// Deterministic digest of a request's semantic content.
///
/// Built by concatenating canonicalized fields in a fixed order, with absent
/// optionals rendered as `-`. Two requests with the same semantic content
/// produce the same key no matter which order their optional fields were
/// populated in. The narrative-history blob is deliberately excluded: a
/// continuation's identity is its (parent, branch) pair, and the history text
/// is derived from the parent rather than being independent content.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CacheKey(String);

impl CacheKey {
    pub fn for_request(request: &StoryRequest) -> Self {
        let concepts = request.concepts.join(",");
        let tone = request.effective_tone();
        let parent = request
            .parent_story
            .map(|id| id.to_string())
            .unwrap_or_else(|| "-".to_string());
        let branch = request
            .branch_id
            .map(|id| id.to_string())
            .unwrap_or_else(|| "-".to_string());
        let count = request
            .branch_count
            .map(|n| n.to_string())
            .unwrap_or_else(|| "-".to_string());

        CacheKey(format!(
            "{}|{}|{}|{}|{}|{}|{}|{}",
            request.kind.as_str(),
            concepts,
            request.skill_level.as_str(),
            tone.as_str(),
            request.cultural_tag(),
            parent,
            branch,
            count,
        ))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
