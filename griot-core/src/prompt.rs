//! Prompt construction for the story generator.
//!
//! Pure functions from a [`StoryRequest`] to prompt text plus the output
//! contract its answer must meet. The contract is the shared ground truth
//! between prompting and validation: the validator checks exactly what the
//! prompt asked for, so the two cannot drift apart.
//!
//! Four templates exist: fresh story, branch set, continuation, and a
//! challenge section composed into continuation prompts that introduce an
//! embedded challenge.

use crate::request::{RequestKind, SkillLevel, StoryRequest};

/// Branches to ask for when a branch-set request does not say.
pub const DEFAULT_BRANCH_COUNT: usize = 3;

// ============================================================================
// Output contract
// ============================================================================

/// Inclusive bounds on narrative word counts.
///
/// For story kinds the bounds cover the total across content blocks; for
/// branch sets they cover each stub's preview text.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WordBounds {
    pub min: usize,
    pub max: usize,
}

impl WordBounds {
    pub fn contains(&self, words: usize) -> bool {
        words >= self.min && words <= self.max
    }
}

/// The structured output a prompt demands from the generator.
#[derive(Debug, Clone, PartialEq)]
pub struct OutputContract {
    /// Top-level JSON fields the response object must carry.
    pub required_fields: &'static [&'static str],
    pub word_bounds: WordBounds,
    /// Exact number of branches expected (branch-set kind).
    pub branch_count: Option<usize>,
    /// Whether the response must embed a challenge object.
    pub requires_challenge: bool,
}

impl OutputContract {
    /// Token allowance for the generation call, derived from the word cap so
    /// the service is never asked for less than the contract demands.
    pub fn max_tokens_hint(&self) -> u32 {
        (self.word_bounds.max as u32).saturating_mul(2).max(256)
    }
}

/// Fields a story-shaped response must carry.
const STORY_FIELDS: &[&str] = &[
    "title",
    "theme",
    "region",
    "character_name",
    "blocks",
    "cultural_notes",
    "concepts_covered",
];

/// Fields a branch-set response must carry.
const BRANCH_SET_FIELDS: &[&str] = &["branches"];

/// A prompt ready to send, plus the contract its answer must meet.
#[derive(Debug, Clone, PartialEq)]
pub struct PromptSpec {
    pub kind: RequestKind,
    pub system: String,
    pub text: String,
    pub contract: OutputContract,
    /// True when built by [`build_simplified_prompt`].
    pub simplified: bool,
}

// ============================================================================
// Builders
// ============================================================================

/// Build the prompt for a request. Total and deterministic: missing optional
/// fields fall back to their documented defaults.
pub fn build_prompt(request: &StoryRequest) -> PromptSpec {
    build_with_style(request, false)
}

/// Build a stricter, shorter variant of the same prompt, used for the one
/// retry after a validation failure. Same required fields, tighter bounds,
/// more insistent formatting instructions.
pub fn build_simplified_prompt(request: &StoryRequest) -> PromptSpec {
    build_with_style(request, true)
}

fn build_with_style(request: &StoryRequest, simplified: bool) -> PromptSpec {
    let contract = contract_for(request, simplified);
    let text = match request.kind {
        RequestKind::Fresh => fresh_prompt(request, &contract, simplified),
        RequestKind::BranchSet => branch_set_prompt(request, &contract, simplified),
        RequestKind::Continuation => continuation_prompt(request, &contract, simplified),
    };

    PromptSpec {
        kind: request.kind,
        system: system_prompt(request),
        text,
        contract,
        simplified,
    }
}

fn contract_for(request: &StoryRequest, simplified: bool) -> OutputContract {
    match request.kind {
        RequestKind::Fresh => OutputContract {
            required_fields: STORY_FIELDS,
            word_bounds: if simplified {
                WordBounds { min: 80, max: 300 }
            } else {
                WordBounds { min: 100, max: 500 }
            },
            branch_count: None,
            requires_challenge: false,
        },
        RequestKind::BranchSet => OutputContract {
            required_fields: BRANCH_SET_FIELDS,
            word_bounds: WordBounds { min: 5, max: 120 },
            branch_count: Some(request.branch_count.unwrap_or(DEFAULT_BRANCH_COUNT)),
            requires_challenge: false,
        },
        RequestKind::Continuation => OutputContract {
            required_fields: STORY_FIELDS,
            word_bounds: if simplified {
                WordBounds { min: 60, max: 250 }
            } else {
                WordBounds { min: 80, max: 400 }
            },
            branch_count: None,
            requires_challenge: wants_challenge(request),
        },
    }
}

/// Continuations embed a practice challenge once the reader is past the
/// beginner band.
fn wants_challenge(request: &StoryRequest) -> bool {
    request.kind == RequestKind::Continuation && request.skill_level != SkillLevel::Beginner
}

fn system_prompt(request: &StoryRequest) -> String {
    format!(
        r#"You are a master storyteller in the griot tradition, telling stories that teach children how to think like programmers. Your stories are warm, vivid, and rooted in the cultures they come from. You always answer with a single JSON object and nothing else.

Audience: {level} readers.
Cultural setting: {culture}.
Emotional tone: {tone}."#,
        level = request.skill_level.as_str(),
        culture = request.cultural_tag(),
        tone = request.effective_tone().as_str(),
    )
}

fn audience_guidance(level: SkillLevel) -> &'static str {
    match level {
        SkillLevel::Beginner => {
            "Use short sentences and everyday words. One idea per sentence. No jargon."
        }
        SkillLevel::Intermediate => {
            "Use clear language with occasional new vocabulary, explained through the story."
        }
        SkillLevel::Advanced => {
            "Use rich language and let the concepts appear in layered, interesting ways."
        }
    }
}

fn fresh_prompt(request: &StoryRequest, contract: &OutputContract, simplified: bool) -> String {
    format!(
        r#"Write a complete story for a child learning to code.

## Teaching Goals
The story must genuinely teach these concepts, in this order: {concepts}.
Each concept must appear in the narrative itself, by name or through everyday
phrasing a child would recognize.

## Setting and Voice
Set the story in the {culture} tradition with a named main character.
Carry an overall {tone} tone. {audience}

## Length
Between {min} and {max} words of story text in total.

{format_section}"#,
        concepts = request.concepts.join(", "),
        culture = request.cultural_tag(),
        tone = request.effective_tone().as_str(),
        audience = audience_guidance(request.skill_level),
        min = contract.word_bounds.min,
        max = contract.word_bounds.max,
        format_section = story_format_section(contract, simplified),
    )
}

fn branch_set_prompt(request: &StoryRequest, contract: &OutputContract, simplified: bool) -> String {
    let count = contract.branch_count.unwrap_or(DEFAULT_BRANCH_COUNT);
    format!(
        r#"The story so far has reached a turning point. Offer the reader {count} distinct choices for what happens next.

## Story So Far
{history}

## Choices
Each choice must emphasize exactly one of these concepts: {concepts}.
Give each choice its own emotional direction. {audience}
Keep each preview between {min} and {max} words.

{format_section}"#,
        count = count,
        history = request.history.as_deref().unwrap_or("(opening scene)"),
        concepts = request.concepts.join(", "),
        audience = audience_guidance(request.skill_level),
        min = contract.word_bounds.min,
        max = contract.word_bounds.max,
        format_section = branch_format_section(count, simplified),
    )
}

fn continuation_prompt(
    request: &StoryRequest,
    contract: &OutputContract,
    simplified: bool,
) -> String {
    let challenge = if contract.requires_challenge {
        challenge_section(request)
    } else {
        String::new()
    };

    format!(
        r#"Continue the story along the path the reader chose.

## Story So Far
{history}

## Teaching Goals
The continuation must genuinely teach: {concepts}.
Stay consistent with the characters and setting already established.
Carry a {tone} tone. {audience}

## Length
Between {min} and {max} words of story text in total.
{challenge}
{format_section}"#,
        history = request.history.as_deref().unwrap_or("(not provided)"),
        concepts = request.concepts.join(", "),
        tone = request.effective_tone().as_str(),
        audience = audience_guidance(request.skill_level),
        min = contract.word_bounds.min,
        max = contract.word_bounds.max,
        challenge = challenge,
        format_section = story_format_section(contract, simplified),
    )
}

/// The challenge template, composed into continuation prompts.
fn challenge_section(request: &StoryRequest) -> String {
    let concept = request
        .concepts
        .first()
        .map(String::as_str)
        .unwrap_or("the story's concept");
    format!(
        r#"
## Embedded Challenge
Weave one small challenge into the story: a moment where the main character
must apply {concept} and the reader is asked to figure it out too. Describe it
in the "challenge" JSON field with a "prompt" for the reader, the "concept"
it exercises, and an optional "hint".
"#,
        concept = concept,
    )
}

fn story_format_section(contract: &OutputContract, simplified: bool) -> String {
    let strictness = if simplified {
        "Respond with ONLY the JSON object. No greeting, no explanation, no markdown fences."
    } else {
        "Respond with a single JSON object."
    };
    let challenge_field = if contract.requires_challenge {
        "\n  \"challenge\": {\"prompt\": \"...\", \"concept\": \"...\", \"hint\": \"...\"},"
    } else {
        ""
    };
    format!(
        r#"## Response Format
{strictness} Use exactly this shape:

{{
  "title": "...",
  "theme": "...",
  "region": "...",
  "character_name": "...",
  "blocks": [
    {{"text": "...", "tone": "neutral", "media": null}}
  ],{challenge_field}
  "cultural_notes": {{"term": "what it means"}},
  "concepts_covered": ["..."]
}}"#,
        strictness = strictness,
        challenge_field = challenge_field,
    )
}

fn branch_format_section(count: usize, simplified: bool) -> String {
    let strictness = if simplified {
        "Respond with ONLY the JSON object. No greeting, no explanation, no markdown fences."
    } else {
        "Respond with a single JSON object."
    };
    format!(
        r#"## Response Format
{strictness} Use exactly this shape, with exactly {count} entries:

{{
  "branches": [
    {{"choice_text": "...", "preview": "...", "tone": "curious", "concept": "..."}}
  ]
}}"#,
        strictness = strictness,
        count = count,
    )
}
