//! Culturally grounded coding stories with AI generation.
//!
//! This crate provides:
//! - Deterministic prompt construction for stories, branch sets, and
//!   continuations
//! - A reliability wrapper around the text-generation service with
//!   connectivity checks, timeouts, and bounded retries
//! - Validation of generated content against a per-kind output contract
//! - A two-tier FIFO cache with an optional durable layer
//! - Pre-authored fallback stories so a request always gets an answer
//!
//! # Quick Start
//!
//! ```ignore
//! use griot_core::{NarrativeOrchestrator, SkillLevel, StoryRequest};
//! use griot_core::generate::OnlineProbe;
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() {
//!     let generator = Arc::new(textgen::Client::from_env().unwrap());
//!     let orchestrator = NarrativeOrchestrator::new(generator, Arc::new(OnlineProbe));
//!
//!     let request = StoryRequest::fresh(vec!["loops".to_string()], SkillLevel::Beginner)
//!         .with_cultural_context("west-african");
//!
//!     let outcome = orchestrator.generate_story(request).await;
//!     println!("{}", outcome.artifact.full_text());
//! }
//! ```

pub mod artifact;
pub mod cache;
pub mod fallback;
pub mod generate;
pub mod orchestrator;
pub mod prompt;
pub mod request;
pub mod storage;
pub mod testing;
pub mod validate;
pub mod vocab;

// Primary public API
pub use artifact::{BranchId, BranchStub, ChallengeSpec, StoryArtifact, StoryBlock, StoryId};
pub use cache::{CacheConfig, CacheStats, StoryCache};
pub use generate::{
    ConnectivityProbe, GenerationClient, GenerationOptions, OnlineProbe, TextGenerator,
};
pub use orchestrator::{
    BranchOutcome, NarrativeOrchestrator, OrchestratorBuilder, OrchestratorConfig, OutcomeSource,
    StoryOutcome,
};
pub use request::{CacheKey, EmotionalTone, RequestKind, SkillLevel, StoryRequest};
pub use storage::{BlobStore, FsBlobStore};
pub use validate::{ContentValidator, ValidationCode, ValidationError, ValidationResult};
pub use vocab::{ConceptVocabulary, StaticVocabulary};
