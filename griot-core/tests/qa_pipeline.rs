//! QA tests for the full narrative pipeline using scripted components.
//!
//! These tests drive the public orchestrator API end to end:
//! - The learner journey: fresh story, branch choices, continuation
//! - Offline and failure degradation to pre-authored stories
//! - Validation gating with the one simplified retry
//! - Request coalescing for identical concurrent calls
//! - Durable cache survival across orchestrator instances
//!
//! Run with: `cargo test -p griot-core --test qa_pipeline`

use griot_core::fallback::FALLBACK_TITLE_PREFIX;
use griot_core::storage::FsBlobStore;
use griot_core::testing::{
    assert_covers, assert_fallback, assert_generated, sample_branch_response,
    sample_story_response, PipelineHarness, ScriptedGenerator,
};
use griot_core::{
    NarrativeOrchestrator, OutcomeSource, SkillLevel, StoryRequest,
};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

fn beginner_request(concepts: &[&str]) -> StoryRequest {
    StoryRequest::fresh(
        concepts.iter().map(|c| c.to_string()).collect(),
        SkillLevel::Beginner,
    )
}

/// A schema-complete story whose narrative is exactly the given text.
fn story_response_with_text(text: &str) -> String {
    serde_json::json!({
        "title": "The River Crossing",
        "theme": "perseverance",
        "region": "a wide river valley",
        "character_name": "Esi",
        "blocks": [ { "text": text } ],
        "cultural_notes": {},
        "concepts_covered": ["loops"],
    })
    .to_string()
}

/// A continuation response carrying the challenge block the contract
/// demands above beginner level.
fn continuation_response_with_challenge() -> String {
    let base = "Esi chose the reed bridge and crossed it plank by plank, repeating \
                the same careful step again and again until the far bank rose to \
                meet her, and at each loose plank she had to decide whether to \
                trust it or step around.";
    let mut text = base.to_string();
    for _ in 0..120 {
        text.push_str(" onward");
    }

    serde_json::json!({
        "title": "Across the Reed Bridge",
        "theme": "perseverance",
        "region": "a wide river valley",
        "character_name": "Esi",
        "blocks": [ { "text": text } ],
        "challenge": {
            "prompt": "How many times did Esi repeat her careful step pattern?",
            "concept": "loops",
            "hint": "Count one repeat per plank."
        },
        "cultural_notes": {},
        "concepts_covered": ["loops"],
    })
    .to_string()
}

// =============================================================================
// LEARNER JOURNEY
// =============================================================================

#[tokio::test]
async fn full_journey_story_branches_continuation() {
    let harness = PipelineHarness::online(ScriptedGenerator::sequence(vec![
        sample_story_response(200),
        sample_branch_response(3),
        sample_story_response(150),
    ]));
    let orch = &harness.orchestrator;

    // A fresh story for a beginner.
    let story = orch.generate_story(beginner_request(&["loops"])).await;
    assert_generated(&story);
    assert_covers(&story.artifact, "loops");

    // Branch choices extending it.
    let branch_request = StoryRequest::branch_set(
        story.artifact.id,
        vec!["loops".to_string()],
        SkillLevel::Beginner,
        3,
    );
    let branches = orch.generate_branches(branch_request).await;
    assert_eq!(branches.source, OutcomeSource::FreshlyGenerated);
    assert_eq!(branches.branches.len(), 3);

    // Continue down the first choice.
    let chosen = &branches.branches[0];
    let continuation_request = StoryRequest::continuation(
        story.artifact.id,
        chosen.id,
        vec!["loops".to_string()],
        SkillLevel::Beginner,
    )
    .with_tone(chosen.tone)
    .with_history(story.artifact.full_text());
    let continuation = orch.continue_from_branch(continuation_request).await;
    assert_generated(&continuation);

    assert_eq!(harness.generation_calls(), 3);
}

#[tokio::test]
async fn continuation_above_beginner_carries_a_challenge() {
    let harness = PipelineHarness::online(ScriptedGenerator::always(
        continuation_response_with_challenge(),
    ));

    let request = StoryRequest::continuation(
        griot_core::StoryId::new(),
        griot_core::BranchId::new(),
        vec!["loops".to_string()],
        SkillLevel::Intermediate,
    );
    let outcome = harness.orchestrator.continue_from_branch(request).await;

    assert_generated(&outcome);
    let challenge = outcome
        .artifact
        .challenge
        .expect("continuation should carry a challenge");
    assert_eq!(challenge.concept, "loops");
    assert!(challenge.hint.is_some());
}

#[tokio::test]
async fn accepted_story_lands_in_cache_for_identical_params() {
    let harness =
        PipelineHarness::online(ScriptedGenerator::always(sample_story_response(350)));
    let orch = &harness.orchestrator;
    let request = || {
        beginner_request(&["loops", "conditionals"])
            .with_tone(griot_core::EmotionalTone::Excited)
    };

    let first = orch.generate_story(request()).await;
    assert_generated(&first);
    assert!(first.warnings.is_empty(), "warnings: {:?}", first.warnings);
    assert_covers(&first.artifact, "loops");
    assert_covers(&first.artifact, "conditionals");

    let second = orch.generate_story(request()).await;
    assert_eq!(second.source, OutcomeSource::CacheMemory);
    assert_eq!(second.artifact.id, first.artifact.id);
    assert_eq!(harness.generation_calls(), 1);
}

#[tokio::test]
async fn different_tone_is_a_different_story() {
    let harness =
        PipelineHarness::online(ScriptedGenerator::always(sample_story_response(150)));
    let orch = &harness.orchestrator;

    let neutral = orch.generate_story(beginner_request(&["loops"])).await;
    let excited = orch
        .generate_story(beginner_request(&["loops"]).with_tone(griot_core::EmotionalTone::Excited))
        .await;

    assert_eq!(neutral.source, OutcomeSource::FreshlyGenerated);
    assert_eq!(excited.source, OutcomeSource::FreshlyGenerated);
    assert_eq!(harness.generation_calls(), 2);
}

// =============================================================================
// DEGRADATION
// =============================================================================

#[tokio::test]
async fn offline_request_returns_preauthored_story_without_calling_out() {
    let harness =
        PipelineHarness::offline(ScriptedGenerator::always(sample_story_response(150)));

    let outcome = harness
        .orchestrator
        .generate_story(beginner_request(&["loops"]).with_cultural_context("west-african"))
        .await;

    assert_fallback(&outcome);
    assert!(outcome.artifact.title.starts_with(FALLBACK_TITLE_PREFIX));
    assert_eq!(outcome.artifact.region, "West Africa");
    assert_eq!(harness.generation_calls(), 0);
}

#[tokio::test]
async fn unknown_cultural_tag_gets_the_generic_fallback() {
    let harness =
        PipelineHarness::offline(ScriptedGenerator::always(sample_story_response(150)));

    let outcome = harness
        .orchestrator
        .generate_story(beginner_request(&["loops"]).with_cultural_context("atlantean"))
        .await;

    assert_fallback(&outcome);
    assert_eq!(outcome.artifact.title, "The Storyteller's Quiet Path");
}

#[tokio::test]
async fn missing_concept_coverage_is_rejected_then_falls_back() {
    // Schema-valid, length-valid, but the narrative never touches loops.
    let off_topic = "Esi walked to the market and bought mangoes with her sister, \
                     explaining politely why the fruit mattered to the festival \
                     and greeting every neighbor she met along the dusty road."
        .repeat(4);
    let harness = PipelineHarness::online(ScriptedGenerator::always(
        story_response_with_text(&off_topic),
    ));

    let outcome = harness
        .orchestrator
        .generate_story(beginner_request(&["loops"]))
        .await;

    assert_fallback(&outcome);
    assert!(outcome.warnings.iter().any(|w| w.starts_with("coverage")));
    // Full attempt plus the one simplified retry.
    assert_eq!(harness.generation_calls(), 2);
}

#[tokio::test]
async fn parse_failure_retries_simplified_then_recovers() {
    let harness = PipelineHarness::online(ScriptedGenerator::sequence(vec![
        "I'm sorry, I cannot produce that story today.".to_string(),
        sample_story_response(150),
    ]));

    let outcome = harness
        .orchestrator
        .generate_story(beginner_request(&["loops"]))
        .await;

    assert_generated(&outcome);
    assert!(outcome.warnings.iter().any(|w| w.starts_with("parse")));
    assert_eq!(harness.generation_calls(), 2);
}

#[tokio::test]
async fn truncated_output_is_surfaced_as_a_warning() {
    let harness = PipelineHarness::online(
        ScriptedGenerator::always(sample_story_response(150)).with_truncated(),
    );

    let outcome = harness
        .orchestrator
        .generate_story(beginner_request(&["loops"]))
        .await;

    assert_generated(&outcome);
    assert!(outcome
        .warnings
        .iter()
        .any(|w| w.contains("truncated")));
}

// =============================================================================
// REQUEST COALESCING
// =============================================================================

#[tokio::test]
async fn identical_concurrent_requests_coalesce_into_one_generation() {
    let harness = PipelineHarness::online(
        ScriptedGenerator::always(sample_story_response(150))
            .with_delay(Duration::from_millis(40)),
    );
    let orch = &harness.orchestrator;

    let (a, b, c) = tokio::join!(
        orch.generate_story(beginner_request(&["loops"])),
        orch.generate_story(beginner_request(&["loops"])),
        orch.generate_story(beginner_request(&["loops"])),
    );

    assert_eq!(harness.generation_calls(), 1);
    assert_eq!(a.artifact.id, b.artifact.id);
    assert_eq!(b.artifact.id, c.artifact.id);
}

#[tokio::test]
async fn different_requests_do_not_coalesce() {
    let harness = PipelineHarness::online(
        ScriptedGenerator::always(sample_story_response(150))
            .with_delay(Duration::from_millis(20)),
    );
    let orch = &harness.orchestrator;

    let (_, _) = tokio::join!(
        orch.generate_story(beginner_request(&["loops"])),
        orch.generate_story(beginner_request(&["variables"])),
    );

    assert_eq!(harness.generation_calls(), 2);
}

// =============================================================================
// DURABLE CACHE ACROSS RESTARTS
// =============================================================================

#[tokio::test]
async fn durable_tier_serves_a_fresh_orchestrator_without_regenerating() {
    let dir = TempDir::new().expect("Failed to create temp dir");

    // First instance generates and mirrors to the durable tier.
    let first_gen = Arc::new(ScriptedGenerator::always(sample_story_response(150)));
    let first = NarrativeOrchestrator::builder(
        first_gen.clone(),
        Arc::new(griot_core::testing::FixedProbe::online()),
    )
    .with_store(Arc::new(FsBlobStore::new(dir.path())))
    .build();

    let original = first.generate_story(beginner_request(&["loops"])).await;
    assert_generated(&original);
    assert_eq!(first_gen.calls(), 1);

    // A second instance over the same directory finds it durably.
    let second_gen = Arc::new(ScriptedGenerator::always(sample_story_response(150)));
    let second = NarrativeOrchestrator::builder(
        second_gen.clone(),
        Arc::new(griot_core::testing::FixedProbe::online()),
    )
    .with_store(Arc::new(FsBlobStore::new(dir.path())))
    .build();

    let revived = second.generate_story(beginner_request(&["loops"])).await;
    assert_eq!(revived.source, OutcomeSource::CacheDurable);
    assert_eq!(revived.artifact.id, original.artifact.id);
    assert_eq!(second_gen.calls(), 0);
}
