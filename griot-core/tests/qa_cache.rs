//! QA tests for cache behavior at the public API.
//!
//! These tests verify the eviction contract end to end:
//! - Strict first-in-first-out eviction at tier capacity
//! - Reads never protecting an entry from eviction
//! - Independent story and branch-set tiers at their default sizes
//! - Promotion from the durable tier back into memory
//! - Purging, clearing, and hit-rate accounting
//!
//! Run with: `cargo test -p griot-core --test qa_cache`

use chrono::{Duration as ChronoDuration, Utc};
use griot_core::cache::HitLayer;
use griot_core::testing::{sample_story_response, MemoryBlobStore, PipelineHarness, ScriptedGenerator};
use griot_core::{
    BranchId, BranchStub, CacheConfig, EmotionalTone, SkillLevel, StoryArtifact, StoryCache,
    StoryId, StoryRequest,
};
use std::collections::HashMap;
use std::sync::Arc;

fn artifact(title: &str) -> StoryArtifact {
    StoryArtifact {
        id: StoryId::new(),
        title: title.to_string(),
        theme: "patience".to_string(),
        region: "general".to_string(),
        character_name: "Amara".to_string(),
        blocks: vec![griot_core::StoryBlock::text(
            "She repeated the weaving steps until the cloth was done.",
        )],
        challenge: None,
        branches: None,
        cultural_notes: HashMap::new(),
        concepts_covered: vec!["loops".to_string()],
        created_at: Utc::now(),
    }
}

fn stub(concept: &str) -> BranchStub {
    BranchStub {
        id: BranchId::new(),
        choice_text: format!("Try the {concept} path"),
        preview: "A short walk ahead.".to_string(),
        tone: EmotionalTone::Curious,
        concept: concept.to_string(),
    }
}

fn story_key(label: &str) -> griot_core::CacheKey {
    StoryRequest::fresh(vec![label.to_string()], SkillLevel::Beginner).cache_key()
}

fn branch_key(label: &str) -> griot_core::CacheKey {
    StoryRequest::branch_set(StoryId::new(), vec![label.to_string()], SkillLevel::Beginner, 3)
        .cache_key()
}

// =============================================================================
// FIFO EVICTION
// =============================================================================

#[tokio::test]
async fn story_tier_evicts_only_the_oldest_at_default_capacity() {
    let cache = StoryCache::new(CacheConfig::default());

    let keys: Vec<_> = (0..21).map(|i| story_key(&format!("concept-{i}"))).collect();
    for (i, key) in keys.iter().enumerate() {
        cache.put_story(key, artifact(&format!("Story {i}"))).await;
    }

    // Exactly one over capacity: the first insert and only the first is gone.
    assert!(cache.get_story(&keys[0]).await.is_none());
    for key in &keys[1..] {
        assert!(cache.get_story(key).await.is_some());
    }
    assert_eq!(cache.story_count().await, 20);
    assert_eq!(cache.stats().await.evictions, 1);
}

#[tokio::test]
async fn branch_tier_evicts_independently_at_its_own_capacity() {
    let cache = StoryCache::new(CacheConfig::default());

    cache.put_story(&story_key("loops"), artifact("Kept")).await;

    let keys: Vec<_> = (0..11).map(|i| branch_key(&format!("concept-{i}"))).collect();
    for key in &keys {
        cache.put_branches(key, vec![stub("loops")]).await;
    }

    assert!(cache.get_branches(&keys[0]).await.is_none());
    assert!(cache.get_branches(&keys[10]).await.is_some());
    assert_eq!(cache.branch_count().await, 10);
    // Story tier capacity is untouched by branch-set churn.
    assert!(cache.get_story(&story_key("loops")).await.is_some());
}

#[tokio::test]
async fn repeated_reads_do_not_save_an_entry_from_eviction() {
    let cache = StoryCache::new(CacheConfig::default().with_max_story_entries(2));
    let first = story_key("first");
    let second = story_key("second");
    let third = story_key("third");

    cache.put_story(&first, artifact("First")).await;
    cache.put_story(&second, artifact("Second")).await;
    for _ in 0..25 {
        assert!(cache.get_story(&first).await.is_some());
    }

    cache.put_story(&third, artifact("Third")).await;

    // Age is insertion order, not access order.
    assert!(cache.get_story(&first).await.is_none());
    assert!(cache.get_story(&second).await.is_some());
    assert!(cache.get_story(&third).await.is_some());
}

// =============================================================================
// DURABLE TIER
// =============================================================================

#[tokio::test]
async fn evicted_story_comes_back_from_the_durable_tier() {
    let store = Arc::new(MemoryBlobStore::new());
    let cache = StoryCache::new(CacheConfig::default().with_max_story_entries(1))
        .with_store(store.clone());
    let first = story_key("first");
    let second = story_key("second");

    cache.put_story(&first, artifact("First")).await;
    cache.put_story(&second, artifact("Second")).await;
    assert_eq!(cache.story_count().await, 1);

    // First read is served durably and promoted.
    let (hit, layer) = cache.get_story(&first).await.unwrap();
    assert_eq!(hit.title, "First");
    assert_eq!(layer, HitLayer::Durable);

    // The promotion made it the newest memory entry.
    let (_, layer) = cache.get_story(&first).await.unwrap();
    assert_eq!(layer, HitLayer::Memory);
}

#[tokio::test]
async fn purge_reclaims_both_memory_and_durable_entries() {
    let store = Arc::new(MemoryBlobStore::new());
    let cache = StoryCache::new(CacheConfig::default()).with_store(store.clone());

    cache.put_story(&story_key("first"), artifact("First")).await;
    cache.put_branches(&branch_key("first"), vec![stub("loops")]).await;
    assert!(!store.is_empty());

    let removed = cache.purge_older_than(Utc::now() + ChronoDuration::minutes(1)).await;

    // One story and one branch set, each counted in memory and durably.
    assert_eq!(removed, 4);
    assert_eq!(cache.story_count().await, 0);
    assert_eq!(cache.branch_count().await, 0);
    assert!(store.is_empty());
}

#[tokio::test]
async fn purge_with_an_old_cutoff_removes_nothing() {
    let cache = StoryCache::new(CacheConfig::default());
    cache.put_story(&story_key("first"), artifact("First")).await;

    let removed = cache.purge_older_than(Utc::now() - ChronoDuration::hours(1)).await;

    assert_eq!(removed, 0);
    assert_eq!(cache.story_count().await, 1);
}

// =============================================================================
// ACCOUNTING
// =============================================================================

#[tokio::test]
async fn hit_rate_reflects_lookup_history() {
    let cache = StoryCache::new(CacheConfig::default());
    let known = story_key("known");
    cache.put_story(&known, artifact("Known")).await;

    assert!(cache.get_story(&known).await.is_some());
    assert!(cache.get_story(&known).await.is_some());
    assert!(cache.get_story(&story_key("unknown")).await.is_none());
    assert!(cache.get_story(&story_key("also-unknown")).await.is_none());

    let stats = cache.stats().await;
    assert_eq!(stats.hits, 2);
    assert_eq!(stats.misses, 2);
    assert!((stats.hit_rate() - 0.5).abs() < f64::EPSILON);
}

// =============================================================================
// ORCHESTRATOR MAINTENANCE SURFACE
// =============================================================================

#[tokio::test]
async fn clearing_through_the_orchestrator_forces_regeneration() {
    let harness =
        PipelineHarness::online(ScriptedGenerator::always(sample_story_response(150)));
    let orch = &harness.orchestrator;
    let request = StoryRequest::fresh(vec!["loops".to_string()], SkillLevel::Beginner);

    orch.generate_story(request.clone()).await;
    orch.generate_story(request.clone()).await;
    assert_eq!(harness.generation_calls(), 1);

    orch.clear_cache().await;
    orch.generate_story(request).await;
    assert_eq!(harness.generation_calls(), 2);
}

#[tokio::test]
async fn purging_through_the_orchestrator_reports_removed_entries() {
    let harness =
        PipelineHarness::online(ScriptedGenerator::always(sample_story_response(150)));
    let orch = &harness.orchestrator;

    orch.generate_story(StoryRequest::fresh(vec!["loops".to_string()], SkillLevel::Beginner))
        .await;
    orch.generate_story(StoryRequest::fresh(vec!["variables".to_string()], SkillLevel::Beginner))
        .await;

    let removed = orch
        .purge_cache_older_than(Utc::now() + ChronoDuration::minutes(1))
        .await;
    assert_eq!(removed, 2);

    let stats = orch.cache_stats().await;
    assert!(stats.misses >= 2);
}
