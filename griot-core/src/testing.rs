//! Testing utilities for the narrative pipeline.
//!
//! This module provides tools for integration testing:
//! - `ScriptedGenerator` for deterministic generation without API calls
//! - `FixedProbe` for pinning connectivity up or down
//! - `MemoryBlobStore` and `FailingBlobStore` for exercising the durable tier
//! - Canned generator responses that pass validation
//! - Assertion helpers for verifying outcomes

use crate::artifact::StoryArtifact;
use crate::fallback::FALLBACK_TITLE_PREFIX;
use crate::generate::{
    ConnectivityProbe, GenerationError, GenerationReply, GenerationRequest, TextGenerator,
};
use crate::orchestrator::{NarrativeOrchestrator, OutcomeSource, StoryOutcome};
use crate::storage::{BlobStore, StorageError};
use async_trait::async_trait;
use std::collections::{BTreeMap, VecDeque};
use std::io;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

// ============================================================================
// Scripted generator
// ============================================================================

/// A generator that returns scripted text instead of calling a service.
///
/// Responses are served in order and the last one repeats forever, so a
/// script never runs dry mid-test. Failures queued with [`failing_first`]
/// are consumed before any response is served.
///
/// [`failing_first`]: ScriptedGenerator::failing_first
pub struct ScriptedGenerator {
    responses: Vec<String>,
    served: AtomicUsize,
    calls: AtomicUsize,
    failures: Mutex<VecDeque<GenerationError>>,
    delay: Option<Duration>,
    truncated: bool,
}

impl ScriptedGenerator {
    /// Answer every call with the same text.
    pub fn always(text: impl Into<String>) -> Self {
        Self::sequence(vec![text.into()])
    }

    /// Answer calls with these texts in order, repeating the last.
    pub fn sequence(responses: Vec<String>) -> Self {
        Self {
            responses,
            served: AtomicUsize::new(0),
            calls: AtomicUsize::new(0),
            failures: Mutex::new(VecDeque::new()),
            delay: None,
            truncated: false,
        }
    }

    /// Fail the first `count` calls with errors built by `factory`, then
    /// serve the script.
    pub fn failing_first(
        self,
        count: usize,
        factory: impl Fn() -> GenerationError,
    ) -> Self {
        {
            let mut failures = self
                .failures
                .lock()
                .expect("scripted generator failure queue poisoned");
            for _ in 0..count {
                failures.push_back(factory());
            }
        }
        self
    }

    /// Sleep this long before answering each call.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Mark every reply as cut off at the length cap.
    pub fn with_truncated(mut self) -> Self {
        self.truncated = true;
        self
    }

    /// How many times `complete` has been called, failures included.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TextGenerator for ScriptedGenerator {
    async fn complete(
        &self,
        _request: GenerationRequest,
    ) -> Result<GenerationReply, GenerationError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        let queued = self
            .failures
            .lock()
            .expect("scripted generator failure queue poisoned")
            .pop_front();
        if let Some(error) = queued {
            return Err(error);
        }

        let index = self.served.fetch_add(1, Ordering::SeqCst);
        let text = self
            .responses
            .get(index)
            .or_else(|| self.responses.last())
            .cloned()
            .unwrap_or_default();
        Ok(GenerationReply {
            text,
            truncated: self.truncated,
        })
    }

    fn name(&self) -> &str {
        "scripted"
    }
}

// ============================================================================
// Fixed connectivity probe
// ============================================================================

/// A probe that always reports the same connectivity state.
#[derive(Debug, Clone, Copy)]
pub struct FixedProbe {
    online: bool,
}

impl FixedProbe {
    pub fn online() -> Self {
        Self { online: true }
    }

    pub fn offline() -> Self {
        Self { online: false }
    }
}

#[async_trait]
impl ConnectivityProbe for FixedProbe {
    async fn is_online(&self) -> bool {
        self.online
    }
}

// ============================================================================
// Blob stores
// ============================================================================

/// An in-memory [`BlobStore`] for tests that need a durable tier without
/// touching the filesystem.
#[derive(Default)]
pub struct MemoryBlobStore {
    blobs: Mutex<BTreeMap<String, Vec<u8>>>,
}

impl MemoryBlobStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.blobs.lock().expect("blob store lock poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl BlobStore for MemoryBlobStore {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StorageError> {
        Ok(self
            .blobs
            .lock()
            .expect("blob store lock poisoned")
            .get(key)
            .cloned())
    }

    async fn put(&self, key: &str, bytes: &[u8]) -> Result<(), StorageError> {
        self.blobs
            .lock()
            .expect("blob store lock poisoned")
            .insert(key.to_string(), bytes.to_vec());
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), StorageError> {
        self.blobs
            .lock()
            .expect("blob store lock poisoned")
            .remove(key);
        Ok(())
    }

    async fn list_keys(&self, prefix: &str) -> Result<Vec<String>, StorageError> {
        Ok(self
            .blobs
            .lock()
            .expect("blob store lock poisoned")
            .keys()
            .filter(|k| k.starts_with(prefix))
            .cloned()
            .collect())
    }
}

/// A [`BlobStore`] whose every operation fails, for exercising best-effort
/// durable paths.
pub struct FailingBlobStore;

impl FailingBlobStore {
    fn error() -> StorageError {
        StorageError::Io(io::Error::other("synthetic storage failure"))
    }
}

#[async_trait]
impl BlobStore for FailingBlobStore {
    async fn get(&self, _key: &str) -> Result<Option<Vec<u8>>, StorageError> {
        Err(Self::error())
    }

    async fn put(&self, _key: &str, _bytes: &[u8]) -> Result<(), StorageError> {
        Err(Self::error())
    }

    async fn delete(&self, _key: &str) -> Result<(), StorageError> {
        Err(Self::error())
    }

    async fn list_keys(&self, _prefix: &str) -> Result<Vec<String>, StorageError> {
        Err(Self::error())
    }
}

// ============================================================================
// Canned responses
// ============================================================================

/// A generator response that passes validation for story requests covering
/// "loops" and "conditionals", padded to exactly `words` narrative words.
pub fn sample_story_response(words: usize) -> String {
    let base = "Amara learned to repeat the weaving steps again and again until \
                the pattern held, and when the thread ran short she had to decide \
                which color to choose.";
    let base_words = base.split_whitespace().count();
    let mut text = base.to_string();
    for _ in 0..words.saturating_sub(base_words) {
        text.push_str(" tale");
    }

    serde_json::json!({
        "title": "The Weaver of Patterns",
        "theme": "practice makes patterns",
        "region": "West Africa",
        "character_name": "Amara",
        "blocks": [ { "text": text } ],
        "cultural_notes": { "kente": "a woven cloth whose patterns repeat in bands" },
        "concepts_covered": ["loops", "conditionals"],
    })
    .to_string()
}

/// A generator response that passes validation for a branch-set request of
/// `count` branches covering "loops".
pub fn sample_branch_response(count: usize) -> String {
    let tones = ["curious", "brave", "calm", "excited"];
    let branches: Vec<_> = (0..count)
        .map(|i| {
            serde_json::json!({
                "choice_text": format!("Weave the pattern again, round {}", i + 1),
                "preview": "She repeats the motion until her hands remember it.",
                "tone": tones[i % tones.len()],
                "concept": "loops",
            })
        })
        .collect();

    serde_json::json!({ "branches": branches }).to_string()
}

// ============================================================================
// Pipeline harness
// ============================================================================

/// Bundles an orchestrator with handles to its scripted components.
pub struct PipelineHarness {
    pub orchestrator: NarrativeOrchestrator,
    pub generator: Arc<ScriptedGenerator>,
}

impl PipelineHarness {
    /// An online pipeline driven by the given script.
    pub fn online(generator: ScriptedGenerator) -> Self {
        Self::build(generator, true)
    }

    /// A pipeline whose probe reports offline.
    pub fn offline(generator: ScriptedGenerator) -> Self {
        Self::build(generator, false)
    }

    fn build(generator: ScriptedGenerator, online: bool) -> Self {
        let generator = Arc::new(generator);
        let probe = if online {
            FixedProbe::online()
        } else {
            FixedProbe::offline()
        };
        let orchestrator =
            NarrativeOrchestrator::new(generator.clone(), Arc::new(probe));
        Self {
            orchestrator,
            generator,
        }
    }

    /// How many generation calls the pipeline has made.
    pub fn generation_calls(&self) -> usize {
        self.generator.calls()
    }
}

// ============================================================================
// Assertion Helpers
// ============================================================================

/// Assert that an outcome was freshly generated.
#[track_caller]
pub fn assert_generated(outcome: &StoryOutcome) {
    assert_eq!(
        outcome.source,
        OutcomeSource::FreshlyGenerated,
        "Expected a freshly generated story, got {:?} (warnings: {:?})",
        outcome.source,
        outcome.warnings
    );
}

/// Assert that an outcome fell back to a pre-authored story.
#[track_caller]
pub fn assert_fallback(outcome: &StoryOutcome) {
    assert_eq!(
        outcome.source,
        OutcomeSource::Fallback,
        "Expected a fallback story, got {:?}",
        outcome.source
    );
    assert!(
        outcome.artifact.title.starts_with(FALLBACK_TITLE_PREFIX),
        "Fallback title should start with '{FALLBACK_TITLE_PREFIX}', got '{}'",
        outcome.artifact.title
    );
}

/// Assert that an artifact claims coverage of a concept.
#[track_caller]
pub fn assert_covers(artifact: &StoryArtifact, concept: &str) {
    assert!(
        artifact.concepts_covered.iter().any(|c| c == concept),
        "Expected '{concept}' in concepts_covered, got {:?}",
        artifact.concepts_covered
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::prompt::build_prompt;
    use crate::request::{SkillLevel, StoryRequest};
    use crate::validate::ContentValidator;
    use crate::vocab::StaticVocabulary;

    #[tokio::test]
    async fn scripted_generator_serves_in_order_and_repeats_last() {
        let generator = ScriptedGenerator::sequence(vec!["one".to_string(), "two".to_string()]);
        let request = GenerationRequest {
            system: String::new(),
            prompt: String::new(),
            max_tokens: 16,
            temperature: 0.7,
        };

        assert_eq!(generator.complete(request.clone()).await.unwrap().text, "one");
        assert_eq!(generator.complete(request.clone()).await.unwrap().text, "two");
        assert_eq!(generator.complete(request).await.unwrap().text, "two");
        assert_eq!(generator.calls(), 3);
    }

    #[tokio::test]
    async fn failures_are_consumed_before_responses() {
        let generator = ScriptedGenerator::always("after the storm")
            .failing_first(1, || GenerationError::Transient("503".to_string()));
        let request = GenerationRequest {
            system: String::new(),
            prompt: String::new(),
            max_tokens: 16,
            temperature: 0.7,
        };

        assert!(generator.complete(request.clone()).await.is_err());
        assert_eq!(
            generator.complete(request).await.unwrap().text,
            "after the storm"
        );
    }

    #[test]
    fn sample_story_response_passes_validation() {
        let request = StoryRequest::fresh(
            vec!["loops".to_string(), "conditionals".to_string()],
            SkillLevel::Beginner,
        );
        let spec = build_prompt(&request);
        let validator = ContentValidator::new(Arc::new(StaticVocabulary));

        let raw = crate::generate::RawGenerationResponse {
            text: sample_story_response(150),
            latency: Duration::from_millis(1),
            truncated: false,
        };
        let result = validator.validate(&raw, &spec.contract, &request);
        assert!(result.is_valid, "errors: {:?}", result.errors);
        assert!(result.errors.is_empty());
    }

    #[test]
    fn sample_branch_response_passes_validation() {
        let request = StoryRequest::branch_set(
            crate::artifact::StoryId::new(),
            vec!["loops".to_string()],
            SkillLevel::Intermediate,
            3,
        );
        let spec = build_prompt(&request);
        let validator = ContentValidator::new(Arc::new(StaticVocabulary));

        let raw = crate::generate::RawGenerationResponse {
            text: sample_branch_response(3),
            latency: Duration::from_millis(1),
            truncated: false,
        };
        let result = validator.validate(&raw, &spec.contract, &request);
        assert!(result.is_valid, "errors: {:?}", result.errors);
    }

    #[tokio::test]
    async fn memory_store_round_trips_and_lists() {
        let store = MemoryBlobStore::new();
        store.put("story/a", b"1").await.unwrap();
        store.put("meta/story/a", b"2").await.unwrap();

        assert_eq!(store.get("story/a").await.unwrap().as_deref(), Some(b"1".as_ref()));
        assert_eq!(store.list_keys("story/").await.unwrap(), vec!["story/a"]);
        store.delete("story/a").await.unwrap();
        assert!(store.get("story/a").await.unwrap().is_none());
    }
}
