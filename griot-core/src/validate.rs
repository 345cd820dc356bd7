//! Response validation against the output contract.
//!
//! Takes the raw generator output, extracts the JSON payload it should
//! contain, and checks it against the same [`OutputContract`] the prompt was
//! built from. Checks run in order: extraction (fatal on failure), schema
//! (accumulating), length (soft), concept coverage (hard). The parsed draft
//! is returned even when validation fails so callers can apply degraded
//! acceptance policies.

use crate::artifact::{
    BranchId, BranchStub, ChallengeSpec, StoryArtifact, StoryBlock, StoryId,
};
use crate::generate::RawGenerationResponse;
use crate::prompt::OutputContract;
use crate::request::{EmotionalTone, RequestKind, StoryRequest};
use crate::vocab::ConceptVocabulary;
use chrono::Utc;
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;
use tracing::debug;

/// Characters of raw text preserved in parse-failure diagnostics.
const PARSE_SNIPPET_CHARS: usize = 200;

// ============================================================================
// Validation results
// ============================================================================

/// Classification of a validation finding.
///
/// Length violations are soft: recorded, but never grounds for rejection on
/// their own. Everything else is hard.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValidationCode {
    /// No structured payload could be recovered from the raw text.
    Parse,
    /// A required field is missing, or a field has the wrong shape.
    Schema,
    /// Narrative length falls outside the contract's bounds.
    Length,
    /// A requested learning concept is not covered by the narrative.
    Coverage,
}

impl ValidationCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ValidationCode::Parse => "parse",
            ValidationCode::Schema => "schema",
            ValidationCode::Length => "length",
            ValidationCode::Coverage => "coverage",
        }
    }

    /// Hard errors force rejection; soft ones are recorded only.
    pub fn is_hard(&self) -> bool {
        !matches!(self, ValidationCode::Length)
    }
}

/// One validation finding: a code plus a human-readable message.
#[derive(Debug, Clone, PartialEq, Error)]
#[error("{}: {}", .code.as_str(), .message)]
pub struct ValidationError {
    pub code: ValidationCode,
    pub message: String,
}

impl ValidationError {
    fn new(code: ValidationCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

/// Outcome of validating one raw response.
#[derive(Debug, Clone)]
pub struct ValidationResult {
    /// True iff there are zero hard errors.
    pub is_valid: bool,
    /// The parsed draft, present whenever extraction succeeded, even when
    /// the draft later failed schema or coverage checks.
    pub extracted: Option<ExtractedDraft>,
    /// All findings, in check order.
    pub errors: Vec<ValidationError>,
}

impl ValidationResult {
    pub fn hard_errors(&self) -> impl Iterator<Item = &ValidationError> {
        self.errors.iter().filter(|e| e.code.is_hard())
    }

    pub fn soft_errors(&self) -> impl Iterator<Item = &ValidationError> {
        self.errors.iter().filter(|e| !e.code.is_hard())
    }

    fn from_findings(extracted: Option<ExtractedDraft>, errors: Vec<ValidationError>) -> Self {
        let is_valid = errors.iter().all(|e| !e.code.is_hard());
        Self {
            is_valid,
            extracted,
            errors,
        }
    }
}

// ============================================================================
// Drafts, typed per response kind
// ============================================================================

/// Parsed payload, tagged by response kind.
#[derive(Debug, Clone)]
pub enum ExtractedDraft {
    Story(StoryDraft),
    Branches(BranchSetDraft),
}

impl ExtractedDraft {
    pub fn as_story(&self) -> Option<&StoryDraft> {
        match self {
            ExtractedDraft::Story(draft) => Some(draft),
            _ => None,
        }
    }

    pub fn as_branches(&self) -> Option<&BranchSetDraft> {
        match self {
            ExtractedDraft::Branches(draft) => Some(draft),
            _ => None,
        }
    }
}

/// A story response as the generator shaped it. Fields the response failed
/// to supply are `None`; each miss has a matching schema error.
#[derive(Debug, Clone, Default)]
pub struct StoryDraft {
    pub title: Option<String>,
    pub theme: Option<String>,
    pub region: Option<String>,
    pub character_name: Option<String>,
    pub blocks: Vec<BlockDraft>,
    pub challenge: Option<ChallengeDraft>,
    pub cultural_notes: Option<HashMap<String, String>>,
    pub concepts_covered: Option<Vec<String>>,
}

#[derive(Debug, Clone)]
pub struct BlockDraft {
    pub text: String,
    pub tone: Option<EmotionalTone>,
    pub media: Option<String>,
}

#[derive(Debug, Clone)]
pub struct ChallengeDraft {
    pub prompt: String,
    pub concept: String,
    pub hint: Option<String>,
}

/// A branch-set response as the generator shaped it.
#[derive(Debug, Clone, Default)]
pub struct BranchSetDraft {
    pub branches: Vec<BranchStubDraft>,
}

#[derive(Debug, Clone)]
pub struct BranchStubDraft {
    pub choice_text: String,
    pub preview: String,
    pub tone: EmotionalTone,
    pub concept: String,
}

impl StoryDraft {
    /// Total word count across block texts.
    pub fn word_count(&self) -> usize {
        self.blocks
            .iter()
            .map(|b| b.text.split_whitespace().count())
            .sum()
    }

    /// All narrative text, joined in block order.
    pub fn narrative_text(&self) -> String {
        self.blocks
            .iter()
            .map(|b| b.text.as_str())
            .collect::<Vec<_>>()
            .join("\n\n")
    }

    /// Assemble the final artifact from a draft that passed its schema
    /// checks. Returns `None` when required parts are absent.
    pub fn into_artifact(self, request: &StoryRequest) -> Option<StoryArtifact> {
        let title = self.title?;
        let theme = self.theme?;
        let region = self.region?;
        let character_name = self.character_name?;
        if self.blocks.is_empty() {
            return None;
        }

        // Covered concepts are the generator's claims plus everything the
        // request demanded; coverage checking has already verified the text.
        let mut concepts_covered = self.concepts_covered.unwrap_or_default();
        for concept in &request.concepts {
            if !concepts_covered.iter().any(|c| c.eq_ignore_ascii_case(concept)) {
                concepts_covered.push(concept.clone());
            }
        }

        Some(StoryArtifact {
            id: StoryId::new(),
            title,
            theme,
            region,
            character_name,
            blocks: self
                .blocks
                .into_iter()
                .map(|b| StoryBlock {
                    text: b.text,
                    tone: b.tone,
                    media: b.media,
                })
                .collect(),
            challenge: self.challenge.map(|c| ChallengeSpec {
                prompt: c.prompt,
                concept: c.concept,
                hint: c.hint,
            }),
            branches: None,
            cultural_notes: self.cultural_notes.unwrap_or_default(),
            concepts_covered,
            created_at: Utc::now(),
        })
    }
}

impl BranchSetDraft {
    /// Assemble final branch stubs, assigning each a fresh stable id.
    pub fn into_stubs(self) -> Vec<BranchStub> {
        self.branches
            .into_iter()
            .map(|b| BranchStub {
                id: BranchId::new(),
                choice_text: b.choice_text,
                preview: b.preview,
                tone: b.tone,
                concept: b.concept,
            })
            .collect()
    }
}

// ============================================================================
// Validator
// ============================================================================

/// Validates raw generator output against the output contract.
pub struct ContentValidator {
    vocabulary: Arc<dyn ConceptVocabulary>,
}

impl ContentValidator {
    pub fn new(vocabulary: Arc<dyn ConceptVocabulary>) -> Self {
        Self { vocabulary }
    }

    /// Run all checks. Parse failure is fatal and immediate; schema, length,
    /// and coverage findings accumulate.
    pub fn validate(
        &self,
        raw: &RawGenerationResponse,
        contract: &OutputContract,
        request: &StoryRequest,
    ) -> ValidationResult {
        let object = match extract_object(&raw.text) {
            Ok(object) => object,
            Err(error) => {
                return ValidationResult {
                    is_valid: false,
                    extracted: None,
                    errors: vec![error],
                };
            }
        };
        debug!(
            kind = request.kind.as_str(),
            fields = object.len(),
            "extracted structured payload"
        );

        let mut errors = Vec::new();
        match request.kind {
            RequestKind::Fresh | RequestKind::Continuation => {
                let draft = decode_story(&object, contract, &mut errors);
                self.check_story_length(&draft, contract, &mut errors);
                self.check_coverage(&draft.narrative_text(), request, &mut errors);
                ValidationResult::from_findings(Some(ExtractedDraft::Story(draft)), errors)
            }
            RequestKind::BranchSet => {
                let draft = decode_branch_set(&object, contract, &mut errors);
                self.check_branch_lengths(&draft, contract, &mut errors);
                let corpus = branch_corpus(&draft);
                self.check_coverage(&corpus, request, &mut errors);
                ValidationResult::from_findings(Some(ExtractedDraft::Branches(draft)), errors)
            }
        }
    }

    fn check_story_length(
        &self,
        draft: &StoryDraft,
        contract: &OutputContract,
        errors: &mut Vec<ValidationError>,
    ) {
        if draft.blocks.is_empty() {
            return;
        }
        let words = draft.word_count();
        if !contract.word_bounds.contains(words) {
            errors.push(ValidationError::new(
                ValidationCode::Length,
                format!(
                    "narrative is {} words, expected between {} and {}",
                    words, contract.word_bounds.min, contract.word_bounds.max
                ),
            ));
        }
    }

    fn check_branch_lengths(
        &self,
        draft: &BranchSetDraft,
        contract: &OutputContract,
        errors: &mut Vec<ValidationError>,
    ) {
        for (index, stub) in draft.branches.iter().enumerate() {
            let words = stub.preview.split_whitespace().count();
            if !contract.word_bounds.contains(words) {
                errors.push(ValidationError::new(
                    ValidationCode::Length,
                    format!(
                        "branch {} preview is {} words, expected between {} and {}",
                        index, words, contract.word_bounds.min, contract.word_bounds.max
                    ),
                ));
            }
        }
    }

    /// Every requested concept must appear in the narrative, either by name
    /// or through one of its related terms.
    fn check_coverage(
        &self,
        corpus: &str,
        request: &StoryRequest,
        errors: &mut Vec<ValidationError>,
    ) {
        let corpus_lower = corpus.to_lowercase();
        for concept in &request.concepts {
            let mut covered = text_mentions_term(&corpus_lower, concept);
            if !covered {
                covered = self
                    .vocabulary
                    .related_terms(concept)
                    .iter()
                    .any(|term| text_mentions_term(&corpus_lower, term));
            }
            if !covered {
                errors.push(ValidationError::new(
                    ValidationCode::Coverage,
                    format!("concept \"{concept}\" is not covered by the narrative"),
                ));
            }
        }
    }
}

/// Choice text, previews, and concept labels: everything a branch set says.
fn branch_corpus(draft: &BranchSetDraft) -> String {
    let mut corpus = String::new();
    for stub in &draft.branches {
        corpus.push_str(&stub.choice_text);
        corpus.push('\n');
        corpus.push_str(&stub.preview);
        corpus.push('\n');
        corpus.push_str(&stub.concept);
        corpus.push('\n');
    }
    corpus
}

/// Word-boundary match for single terms, substring match for phrases.
fn text_mentions_term(text_lower: &str, term: &str) -> bool {
    let term = term.trim().to_lowercase();
    if term.is_empty() {
        return false;
    }
    if term.contains(char::is_whitespace) {
        text_lower.contains(&term)
    } else {
        text_lower
            .split(|c: char| !c.is_alphanumeric() && c != '-')
            .any(|word| word == term)
    }
}

// ============================================================================
// Extraction
// ============================================================================

/// Locate and parse the JSON object inside raw generator text. The payload
/// may be wrapped in prose or markdown fencing; everything outside the
/// outermost braces is ignored.
fn extract_object(text: &str) -> Result<Map<String, Value>, ValidationError> {
    let start = text.find('{');
    let end = text.rfind('}');
    let candidate = match (start, end) {
        (Some(start), Some(end)) if end > start => &text[start..=end],
        _ => {
            return Err(parse_failure(text, "no JSON object found"));
        }
    };

    let value: Value = serde_json::from_str(candidate)
        .map_err(|e| parse_failure(text, &format!("invalid JSON: {e}")))?;

    match value {
        Value::Object(object) => Ok(object),
        _ => Err(parse_failure(text, "payload is not a JSON object")),
    }
}

fn parse_failure(raw: &str, reason: &str) -> ValidationError {
    let snippet: String = raw.chars().take(PARSE_SNIPPET_CHARS).collect();
    ValidationError::new(
        ValidationCode::Parse,
        format!("{reason}; raw response begins: {snippet:?}"),
    )
}

// ============================================================================
// Schema decoding
// ============================================================================

fn missing(field: &str) -> ValidationError {
    ValidationError::new(
        ValidationCode::Schema,
        format!("missing required field `{field}`"),
    )
}

fn mistyped(field: &str, expected: &str) -> ValidationError {
    ValidationError::new(
        ValidationCode::Schema,
        format!("field `{field}` must be {expected}"),
    )
}

/// Fetch a field, recording a schema error when a contract-required field is
/// absent.
fn field<'v>(
    object: &'v Map<String, Value>,
    name: &'static str,
    contract: &OutputContract,
    errors: &mut Vec<ValidationError>,
) -> Option<&'v Value> {
    let value = object.get(name);
    if value.is_none() && contract.required_fields.contains(&name) {
        errors.push(missing(name));
    }
    value
}

fn decode_str(
    value: Option<&Value>,
    name: &'static str,
    errors: &mut Vec<ValidationError>,
) -> Option<String> {
    match value {
        Some(Value::String(s)) => Some(s.clone()),
        Some(_) => {
            errors.push(mistyped(name, "a string"));
            None
        }
        None => None,
    }
}

fn decode_str_list(
    value: Option<&Value>,
    name: &'static str,
    errors: &mut Vec<ValidationError>,
) -> Option<Vec<String>> {
    match value {
        Some(Value::Array(items)) => {
            let mut out = Vec::with_capacity(items.len());
            for item in items {
                match item {
                    Value::String(s) => out.push(s.clone()),
                    _ => {
                        errors.push(mistyped(name, "a list of strings"));
                        return None;
                    }
                }
            }
            Some(out)
        }
        Some(_) => {
            errors.push(mistyped(name, "a list of strings"));
            None
        }
        None => None,
    }
}

fn decode_str_map(
    value: Option<&Value>,
    name: &'static str,
    errors: &mut Vec<ValidationError>,
) -> Option<HashMap<String, String>> {
    match value {
        Some(Value::Object(entries)) => {
            let mut out = HashMap::with_capacity(entries.len());
            for (key, entry) in entries {
                match entry {
                    Value::String(s) => {
                        out.insert(key.clone(), s.clone());
                    }
                    _ => {
                        errors.push(mistyped(name, "a map of strings"));
                        return None;
                    }
                }
            }
            Some(out)
        }
        Some(_) => {
            errors.push(mistyped(name, "a map of strings"));
            None
        }
        None => None,
    }
}

/// Tone names are advisory: an unrecognized name decodes to `None` rather
/// than failing the block, but a non-string tone is still a schema error.
fn decode_tone(
    value: Option<&Value>,
    name: &str,
    errors: &mut Vec<ValidationError>,
) -> Option<EmotionalTone> {
    match value {
        Some(Value::String(s)) => EmotionalTone::parse(s),
        Some(Value::Null) | None => None,
        Some(_) => {
            errors.push(ValidationError::new(
                ValidationCode::Schema,
                format!("field `{name}` must be a string tone name"),
            ));
            None
        }
    }
}

fn decode_story(
    object: &Map<String, Value>,
    contract: &OutputContract,
    errors: &mut Vec<ValidationError>,
) -> StoryDraft {
    let title = decode_str(field(object, "title", contract, errors), "title", errors);
    let theme = decode_str(field(object, "theme", contract, errors), "theme", errors);
    let region = decode_str(field(object, "region", contract, errors), "region", errors);
    let character_name = decode_str(
        field(object, "character_name", contract, errors),
        "character_name",
        errors,
    );
    let blocks = decode_blocks(field(object, "blocks", contract, errors), errors);
    let cultural_notes = decode_str_map(
        field(object, "cultural_notes", contract, errors),
        "cultural_notes",
        errors,
    );
    let concepts_covered = decode_str_list(
        field(object, "concepts_covered", contract, errors),
        "concepts_covered",
        errors,
    );

    let challenge = decode_challenge(object.get("challenge"), errors);
    if contract.requires_challenge && challenge.is_none() {
        errors.push(missing("challenge"));
    }

    StoryDraft {
        title,
        theme,
        region,
        character_name,
        blocks,
        challenge,
        cultural_notes,
        concepts_covered,
    }
}

fn decode_blocks(value: Option<&Value>, errors: &mut Vec<ValidationError>) -> Vec<BlockDraft> {
    let items = match value {
        Some(Value::Array(items)) => items,
        Some(_) => {
            errors.push(mistyped("blocks", "a list of content blocks"));
            return Vec::new();
        }
        None => return Vec::new(),
    };

    if items.is_empty() {
        errors.push(ValidationError::new(
            ValidationCode::Schema,
            "field `blocks` must contain at least one block",
        ));
    }

    let mut blocks = Vec::with_capacity(items.len());
    for (index, item) in items.iter().enumerate() {
        let entry = match item.as_object() {
            Some(entry) => entry,
            None => {
                errors.push(ValidationError::new(
                    ValidationCode::Schema,
                    format!("blocks[{index}] must be an object"),
                ));
                continue;
            }
        };
        let text = match entry.get("text") {
            Some(Value::String(s)) if !s.trim().is_empty() => s.clone(),
            _ => {
                errors.push(ValidationError::new(
                    ValidationCode::Schema,
                    format!("blocks[{index}] is missing narrative `text`"),
                ));
                continue;
            }
        };
        let tone = decode_tone(entry.get("tone"), &format!("blocks[{index}].tone"), errors);
        let media = match entry.get("media") {
            Some(Value::String(s)) => Some(s.clone()),
            _ => None,
        };
        blocks.push(BlockDraft { text, tone, media });
    }
    blocks
}

fn decode_challenge(
    value: Option<&Value>,
    errors: &mut Vec<ValidationError>,
) -> Option<ChallengeDraft> {
    let entry = match value {
        Some(Value::Object(entry)) => entry,
        Some(Value::Null) | None => return None,
        Some(_) => {
            errors.push(mistyped("challenge", "an object"));
            return None;
        }
    };

    let prompt = match entry.get("prompt") {
        Some(Value::String(s)) if !s.trim().is_empty() => s.clone(),
        _ => {
            errors.push(ValidationError::new(
                ValidationCode::Schema,
                "challenge is missing its `prompt`",
            ));
            return None;
        }
    };
    let concept = match entry.get("concept") {
        Some(Value::String(s)) if !s.trim().is_empty() => s.clone(),
        _ => {
            errors.push(ValidationError::new(
                ValidationCode::Schema,
                "challenge is missing its `concept`",
            ));
            return None;
        }
    };
    let hint = match entry.get("hint") {
        Some(Value::String(s)) => Some(s.clone()),
        _ => None,
    };

    Some(ChallengeDraft {
        prompt,
        concept,
        hint,
    })
}

fn decode_branch_set(
    object: &Map<String, Value>,
    contract: &OutputContract,
    errors: &mut Vec<ValidationError>,
) -> BranchSetDraft {
    let items = match field(object, "branches", contract, errors) {
        Some(Value::Array(items)) => items,
        Some(_) => {
            errors.push(mistyped("branches", "a list of branch objects"));
            return BranchSetDraft::default();
        }
        None => return BranchSetDraft::default(),
    };

    let mut branches = Vec::with_capacity(items.len());
    for (index, item) in items.iter().enumerate() {
        let entry = match item.as_object() {
            Some(entry) => entry,
            None => {
                errors.push(ValidationError::new(
                    ValidationCode::Schema,
                    format!("branches[{index}] must be an object"),
                ));
                continue;
            }
        };

        let choice_text = match entry.get("choice_text") {
            Some(Value::String(s)) if !s.trim().is_empty() => s.clone(),
            _ => {
                errors.push(ValidationError::new(
                    ValidationCode::Schema,
                    format!("branches[{index}] is missing `choice_text`"),
                ));
                continue;
            }
        };
        let preview = match entry.get("preview") {
            Some(Value::String(s)) if !s.trim().is_empty() => s.clone(),
            _ => {
                errors.push(ValidationError::new(
                    ValidationCode::Schema,
                    format!("branches[{index}] is missing `preview`"),
                ));
                continue;
            }
        };
        let tone = match entry.get("tone") {
            Some(Value::String(s)) => match EmotionalTone::parse(s) {
                Some(tone) => tone,
                None => {
                    errors.push(ValidationError::new(
                        ValidationCode::Schema,
                        format!("branches[{index}] has unknown tone {s:?}"),
                    ));
                    continue;
                }
            },
            _ => {
                errors.push(ValidationError::new(
                    ValidationCode::Schema,
                    format!("branches[{index}] is missing `tone`"),
                ));
                continue;
            }
        };
        let concept = match entry.get("concept") {
            Some(Value::String(s)) if !s.trim().is_empty() => s.clone(),
            _ => {
                errors.push(ValidationError::new(
                    ValidationCode::Schema,
                    format!("branches[{index}] is missing `concept`"),
                ));
                continue;
            }
        };

        branches.push(BranchStubDraft {
            choice_text,
            preview,
            tone,
            concept,
        });
    }

    if let Some(expected) = contract.branch_count {
        if branches.len() != expected {
            errors.push(ValidationError::new(
                ValidationCode::Schema,
                format!("expected {expected} branches, got {}", branches.len()),
            ));
        }
    }

    BranchSetDraft { branches }
}
