//! Walk the full learner journey against the live generation service.
//!
//! Run with: `cargo run -p griot-core --example tell_story`

use griot_core::{NarrativeOrchestrator, OnlineProbe, SkillLevel, StoryRequest};
use std::sync::Arc;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let _ = dotenvy::dotenv();
    println!("=== Griot Story Pipeline ===\n");

    // Step 1: Build the orchestrator
    println!("1. Building the orchestrator...");
    let client = textgen::Client::from_env()?;
    let orch = NarrativeOrchestrator::new(Arc::new(client), Arc::new(OnlineProbe));
    println!("   Ready");

    // Step 2: A fresh story
    println!("\n2. Generating a fresh story (this calls the generation API)...");
    let request = StoryRequest::fresh(vec!["loops".to_string()], SkillLevel::Beginner)
        .with_cultural_context("west-african");
    let story = orch.generate_story(request).await;
    println!("   Source: {}", story.source.as_str());
    println!("   Title: {}", story.artifact.title);
    println!("   Region: {}", story.artifact.region);
    for warning in &story.warnings {
        println!("   Warning: {warning}");
    }

    println!("\n3. Story text (first 500 chars):");
    println!("   ---");
    let text = story.artifact.full_text();
    let snippet: String = text.chars().take(500).collect();
    for line in snippet.lines() {
        println!("   {line}");
    }
    if text.len() > 500 {
        println!("   ...[truncated]");
    }
    println!("   ---");

    // Step 4: Branch choices
    println!("\n4. Generating branch choices...");
    let branches = orch
        .generate_branches(StoryRequest::branch_set(
            story.artifact.id,
            vec!["loops".to_string()],
            SkillLevel::Beginner,
            3,
        ))
        .await;
    println!("   Source: {}", branches.source.as_str());
    for (i, branch) in branches.branches.iter().enumerate() {
        println!("   {}. {} ({:?})", i + 1, branch.choice_text, branch.tone);
    }

    // Step 5: Continue down the first branch
    let chosen = &branches.branches[0];
    println!("\n5. Continuing down: {}", chosen.choice_text);
    let continuation = orch
        .continue_from_branch(
            StoryRequest::continuation(
                story.artifact.id,
                chosen.id,
                vec!["loops".to_string()],
                SkillLevel::Beginner,
            )
            .with_tone(chosen.tone)
            .with_history(text),
        )
        .await;
    println!("   Source: {}", continuation.source.as_str());
    println!("   Title: {}", continuation.artifact.title);

    let stats = orch.cache_stats().await;
    println!(
        "\n=== Done ({} cache hits, {} misses) ===",
        stats.hits, stats.misses
    );
    Ok(())
}
