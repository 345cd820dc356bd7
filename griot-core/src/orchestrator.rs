//! NarrativeOrchestrator - the primary public API for story generation.
//!
//! This module wires the prompt builder, generation client, validator,
//! cache, and fallback library into a single entry point. Every consumer
//! call runs the same pipeline: check the cache, check connectivity,
//! generate, validate, retry once with a simplified prompt, and fall back
//! to a pre-authored story when all else fails. Consumer calls never
//! return an error; degradation shows up in the outcome's `source` and
//! `warnings` instead.

use crate::artifact::{BranchStub, StoryArtifact};
use crate::cache::{CacheConfig, CacheStats, CachedPayload, HitLayer, StoryCache};
use crate::fallback::FallbackLibrary;
use crate::generate::{
    ConnectivityProbe, GenerationClient, GenerationOptions, RawGenerationResponse, TextGenerator,
};
use crate::prompt::{build_prompt, build_simplified_prompt, PromptSpec};
use crate::request::{CacheKey, RequestKind, StoryRequest};
use crate::storage::BlobStore;
use crate::validate::{ContentValidator, ExtractedDraft};
use crate::vocab::{ConceptVocabulary, StaticVocabulary};
use chrono::{DateTime, Utc};
use futures::FutureExt;
use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tokio::sync::{watch, Mutex};
use tracing::{debug, info, warn};

// ============================================================================
// Outcomes
// ============================================================================

/// Where an outcome's content came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutcomeSource {
    /// Produced by the generator during this call.
    FreshlyGenerated,
    /// Served from the in-memory cache tier.
    CacheMemory,
    /// Served from the durable tier and promoted back into memory.
    CacheDurable,
    /// Served from the pre-authored fallback library.
    Fallback,
}

impl OutcomeSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            OutcomeSource::FreshlyGenerated => "generated",
            OutcomeSource::CacheMemory => "cache-memory",
            OutcomeSource::CacheDurable => "cache-durable",
            OutcomeSource::Fallback => "fallback",
        }
    }
}

/// Result of a story request. Always presentable; inspect `source` and
/// `warnings` to see how the pipeline got there.
#[derive(Debug, Clone)]
pub struct StoryOutcome {
    pub artifact: StoryArtifact,
    pub source: OutcomeSource,
    /// Human-readable diagnostics accumulated along the pipeline.
    pub warnings: Vec<String>,
}

/// Result of a branch-set request.
#[derive(Debug, Clone)]
pub struct BranchOutcome {
    pub branches: Vec<BranchStub>,
    pub source: OutcomeSource,
    pub warnings: Vec<String>,
}

/// Kind-agnostic outcome shared between the pipeline and flight waiters.
#[derive(Debug, Clone)]
struct PipelineOutcome {
    payload: CachedPayload,
    source: OutcomeSource,
    warnings: Vec<String>,
}

// ============================================================================
// Configuration
// ============================================================================

/// Tuning for the orchestrator's moving parts.
#[derive(Debug, Clone, Default)]
pub struct OrchestratorConfig {
    /// Timeout, retry, and budget settings for the generation client.
    pub generation: GenerationOptions,
    /// Capacities for the two cache tiers.
    pub cache: CacheConfig,
    /// Pre-authored stories served when generation cannot deliver.
    pub fallback: FallbackLibrary,
}

impl OrchestratorConfig {
    pub fn with_generation(mut self, options: GenerationOptions) -> Self {
        self.generation = options;
        self
    }

    pub fn with_cache(mut self, config: CacheConfig) -> Self {
        self.cache = config;
        self
    }

    pub fn with_fallback(mut self, fallback: FallbackLibrary) -> Self {
        self.fallback = fallback;
        self
    }
}

// ============================================================================
// Builder
// ============================================================================

/// Assembles a [`NarrativeOrchestrator`] from its components.
pub struct OrchestratorBuilder {
    generator: Arc<dyn TextGenerator>,
    probe: Arc<dyn ConnectivityProbe>,
    vocabulary: Arc<dyn ConceptVocabulary>,
    store: Option<Arc<dyn BlobStore>>,
    config: OrchestratorConfig,
}

impl OrchestratorBuilder {
    /// Swap the built-in concept vocabulary for another source of related
    /// terms.
    pub fn with_vocabulary(mut self, vocabulary: Arc<dyn ConceptVocabulary>) -> Self {
        self.vocabulary = vocabulary;
        self
    }

    /// Attach a durable layer behind the in-memory cache.
    pub fn with_store(mut self, store: Arc<dyn BlobStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn with_config(mut self, config: OrchestratorConfig) -> Self {
        self.config = config;
        self
    }

    pub fn build(self) -> NarrativeOrchestrator {
        let generation = GenerationClient::new(self.generator, self.probe)
            .with_options(self.config.generation);
        let mut cache = StoryCache::new(self.config.cache);
        if let Some(store) = self.store {
            cache = cache.with_store(store);
        }

        NarrativeOrchestrator {
            inner: Arc::new(Inner {
                generation,
                validator: ContentValidator::new(self.vocabulary),
                cache,
                fallback: self.config.fallback,
                flights: Mutex::new(HashMap::new()),
            }),
        }
    }
}

// ============================================================================
// Orchestrator
// ============================================================================

/// The narrative pipeline.
///
/// This is the main entry point for story generation. It manages:
/// - prompt construction and the generation client
/// - response validation against the output contract
/// - the two-tier story cache
/// - fallback selection when generation cannot deliver
///
/// Cloning is cheap and clones share the same cache and in-flight table.
#[derive(Clone)]
pub struct NarrativeOrchestrator {
    inner: Arc<Inner>,
}

struct Inner {
    generation: GenerationClient,
    validator: ContentValidator,
    cache: StoryCache,
    fallback: FallbackLibrary,
    /// One entry per cache key currently being generated. Followers wait on
    /// the receiver instead of starting a duplicate generation.
    flights: Mutex<HashMap<CacheKey, watch::Receiver<Option<PipelineOutcome>>>>,
}

impl NarrativeOrchestrator {
    /// Build with default configuration and the built-in vocabulary.
    pub fn new(generator: Arc<dyn TextGenerator>, probe: Arc<dyn ConnectivityProbe>) -> Self {
        Self::builder(generator, probe).build()
    }

    pub fn builder(
        generator: Arc<dyn TextGenerator>,
        probe: Arc<dyn ConnectivityProbe>,
    ) -> OrchestratorBuilder {
        OrchestratorBuilder {
            generator,
            probe,
            vocabulary: Arc::new(StaticVocabulary),
            store: None,
            config: OrchestratorConfig::default(),
        }
    }

    /// Produce a complete story for a fresh request.
    ///
    /// Build the request with [`StoryRequest::fresh`]. This never fails:
    /// when generation is impossible the outcome carries a pre-authored
    /// story and `source` says so.
    pub async fn generate_story(&self, request: StoryRequest) -> StoryOutcome {
        self.story_outcome(request).await
    }

    /// Produce branch choices extending a story.
    ///
    /// Build the request with [`StoryRequest::branch_set`].
    pub async fn generate_branches(&self, request: StoryRequest) -> BranchOutcome {
        let outcome = self.run(&request).await;
        let PipelineOutcome {
            payload,
            source,
            mut warnings,
        } = outcome;
        match payload.into_branches() {
            Some(branches) => BranchOutcome {
                branches,
                source,
                warnings,
            },
            None => {
                warnings.push("pipeline produced a story for a branch request".to_string());
                BranchOutcome {
                    branches: self.inner.fallback_branches(&request),
                    source: OutcomeSource::Fallback,
                    warnings,
                }
            }
        }
    }

    /// Expand a previously chosen branch into a full continuation story.
    ///
    /// Build the request with [`StoryRequest::continuation`], seeding
    /// `with_history` from the parent story and chosen branch.
    pub async fn continue_from_branch(&self, request: StoryRequest) -> StoryOutcome {
        self.story_outcome(request).await
    }

    pub async fn cache_stats(&self) -> CacheStats {
        self.inner.cache.stats().await
    }

    /// Drop cached entries stored before `cutoff` from both cache layers.
    pub async fn purge_cache_older_than(&self, cutoff: DateTime<Utc>) -> usize {
        self.inner.cache.purge_older_than(cutoff).await
    }

    pub async fn clear_cache(&self) {
        self.inner.cache.clear().await
    }

    async fn story_outcome(&self, request: StoryRequest) -> StoryOutcome {
        let outcome = self.run(&request).await;
        let PipelineOutcome {
            payload,
            source,
            mut warnings,
        } = outcome;
        match payload.into_story() {
            Some(artifact) => StoryOutcome {
                artifact,
                source,
                warnings,
            },
            None => {
                warnings.push("pipeline produced branches for a story request".to_string());
                StoryOutcome {
                    artifact: self.inner.fallback.story(&request),
                    source: OutcomeSource::Fallback,
                    warnings,
                }
            }
        }
    }

    /// Run the pipeline behind the single-flight gate: the first caller for
    /// a key drives generation in a detached task, everyone else waits on
    /// the published outcome. Driving in a task means a caller that gives
    /// up early cannot strand the others.
    async fn run(&self, request: &StoryRequest) -> PipelineOutcome {
        let key = request.cache_key();

        let (lead, rx) = {
            let mut flights = self.inner.flights.lock().await;
            if let Some(rx) = flights.get(&key) {
                (None, rx.clone())
            } else {
                let (tx, rx) = watch::channel(None);
                flights.insert(key.clone(), rx.clone());
                (Some(tx), rx)
            }
        };

        match lead {
            Some(tx) => {
                let inner = Arc::clone(&self.inner);
                let request = request.clone();
                let flight_key = key.clone();
                tokio::spawn(async move {
                    let pipeline = inner.run_pipeline(&request, &flight_key);
                    let outcome = match AssertUnwindSafe(pipeline).catch_unwind().await {
                        Ok(outcome) => outcome,
                        Err(_) => {
                            warn!(key = %flight_key, "Pipeline panicked, serving fallback");
                            PipelineOutcome {
                                payload: inner.fallback_payload(&request),
                                source: OutcomeSource::Fallback,
                                warnings: vec!["internal pipeline failure".to_string()],
                            }
                        }
                    };
                    // The entry must leave the table no matter how the
                    // pipeline ended, or the key would be stuck joining a
                    // dead flight forever.
                    let _ = tx.send(Some(outcome));
                    inner.flights.lock().await.remove(&flight_key);
                });
            }
            None => debug!(key = %key, "Joining in-flight generation"),
        }

        self.await_flight(rx, request).await
    }

    async fn await_flight(
        &self,
        mut rx: watch::Receiver<Option<PipelineOutcome>>,
        request: &StoryRequest,
    ) -> PipelineOutcome {
        loop {
            let published = rx.borrow().clone();
            if let Some(outcome) = published {
                return outcome;
            }
            if rx.changed().await.is_err() {
                warn!("Generation flight ended without publishing, serving fallback");
                return PipelineOutcome {
                    payload: self.inner.fallback_payload(request),
                    source: OutcomeSource::Fallback,
                    warnings: vec!["generation task failed".to_string()],
                };
            }
        }
    }
}

// ============================================================================
// Pipeline
// ============================================================================

/// States of the request pipeline. Data produced by one stage rides along
/// to the next inside the variant.
enum Stage {
    CheckCache,
    CheckConnectivity,
    Generate { simplified: bool },
    Validate {
        spec: PromptSpec,
        raw: RawGenerationResponse,
    },
    StoreAndReturn { payload: CachedPayload },
    ReturnDefault,
}

impl Inner {
    /// Drive one request through the pipeline to a guaranteed outcome.
    async fn run_pipeline(&self, request: &StoryRequest, key: &CacheKey) -> PipelineOutcome {
        let mut warnings: Vec<String> = Vec::new();
        let mut stage = Stage::CheckCache;

        loop {
            stage = match stage {
                Stage::CheckCache => match self.lookup(request, key).await {
                    Some((payload, source)) => {
                        debug!(key = %key, source = source.as_str(), "Serving cached narrative");
                        return PipelineOutcome {
                            payload,
                            source,
                            warnings,
                        };
                    }
                    None => Stage::CheckConnectivity,
                },

                Stage::CheckConnectivity => {
                    if self.generation.is_online().await {
                        Stage::Generate { simplified: false }
                    } else {
                        warn!(key = %key, "Offline, serving pre-authored story");
                        warnings.push("offline: served a pre-authored story".to_string());
                        Stage::ReturnDefault
                    }
                }

                Stage::Generate { simplified } => {
                    let spec = if simplified {
                        build_simplified_prompt(request)
                    } else {
                        build_prompt(request)
                    };
                    match self.generation.generate(&spec).await {
                        Ok(raw) => {
                            if raw.truncated {
                                warnings.push("generator output was truncated".to_string());
                            }
                            Stage::Validate { spec, raw }
                        }
                        Err(e) => {
                            warn!(key = %key, error = %e, "Generation failed, serving fallback");
                            warnings.push(format!("generation failed: {e}"));
                            Stage::ReturnDefault
                        }
                    }
                }

                Stage::Validate { spec, raw } => {
                    let result = self.validator.validate(&raw, &spec.contract, request);
                    for error in &result.errors {
                        warnings.push(error.to_string());
                    }
                    let payload = if result.is_valid {
                        result
                            .extracted
                            .and_then(|draft| payload_from_draft(draft, request))
                    } else {
                        None
                    };
                    match payload {
                        Some(payload) => Stage::StoreAndReturn { payload },
                        None if !spec.simplified => {
                            debug!(key = %key, "Validation failed, retrying with simplified prompt");
                            Stage::Generate { simplified: true }
                        }
                        None => {
                            warn!(key = %key, "Validation failed twice, serving fallback");
                            Stage::ReturnDefault
                        }
                    }
                }

                Stage::StoreAndReturn { payload } => {
                    self.store(key, payload.clone()).await;
                    info!(
                        key = %key,
                        kind = request.kind.as_str(),
                        warnings = warnings.len(),
                        "Narrative generated and cached"
                    );
                    return PipelineOutcome {
                        payload,
                        source: OutcomeSource::FreshlyGenerated,
                        warnings,
                    };
                }

                Stage::ReturnDefault => {
                    return PipelineOutcome {
                        payload: self.fallback_payload(request),
                        source: OutcomeSource::Fallback,
                        warnings,
                    };
                }
            };
        }
    }

    async fn lookup(
        &self,
        request: &StoryRequest,
        key: &CacheKey,
    ) -> Option<(CachedPayload, OutcomeSource)> {
        match request.kind {
            RequestKind::BranchSet => self
                .cache
                .get_branches(key)
                .await
                .map(|(stubs, layer)| (CachedPayload::Branches(stubs), source_from(layer))),
            RequestKind::Fresh | RequestKind::Continuation => self
                .cache
                .get_story(key)
                .await
                .map(|(artifact, layer)| (CachedPayload::Story(artifact), source_from(layer))),
        }
    }

    async fn store(&self, key: &CacheKey, payload: CachedPayload) {
        match payload {
            CachedPayload::Story(artifact) => self.cache.put_story(key, artifact).await,
            CachedPayload::Branches(stubs) => self.cache.put_branches(key, stubs).await,
        }
    }

    fn fallback_payload(&self, request: &StoryRequest) -> CachedPayload {
        match request.kind {
            RequestKind::BranchSet => CachedPayload::Branches(self.fallback_branches(request)),
            RequestKind::Fresh | RequestKind::Continuation => {
                CachedPayload::Story(self.fallback.story(request))
            }
        }
    }

    fn fallback_branches(&self, request: &StoryRequest) -> Vec<BranchStub> {
        let count = request
            .branch_count
            .unwrap_or(crate::prompt::DEFAULT_BRANCH_COUNT);
        self.fallback.branches(count)
    }
}

fn payload_from_draft(draft: ExtractedDraft, request: &StoryRequest) -> Option<CachedPayload> {
    match draft {
        ExtractedDraft::Story(story) => story.into_artifact(request).map(CachedPayload::Story),
        ExtractedDraft::Branches(set) => Some(CachedPayload::Branches(set.into_stubs())),
    }
}

fn source_from(layer: HitLayer) -> OutcomeSource {
    match layer {
        HitLayer::Memory => OutcomeSource::CacheMemory,
        HitLayer::Durable => OutcomeSource::CacheDurable,
    }
}
