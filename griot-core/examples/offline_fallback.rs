//! Show the degradation path: no connectivity, pre-authored stories.
//!
//! Run with: `cargo run -p griot-core --example offline_fallback`

use griot_core::testing::{FixedProbe, ScriptedGenerator};
use griot_core::{NarrativeOrchestrator, SkillLevel, StoryRequest};
use std::sync::Arc;

#[tokio::main]
async fn main() {
    println!("=== Offline Degradation ===\n");

    let orch = NarrativeOrchestrator::new(
        Arc::new(ScriptedGenerator::always("never called")),
        Arc::new(FixedProbe::offline()),
    );

    for tag in ["west-african", "east-asian", "latin-american", "somewhere-else"] {
        let request = StoryRequest::fresh(vec!["loops".to_string()], SkillLevel::Beginner)
            .with_cultural_context(tag);
        let outcome = orch.generate_story(request).await;

        println!("[{tag}]");
        println!("  Source: {}", outcome.source.as_str());
        println!("  Title: {}", outcome.artifact.title);
        println!("  Region: {}", outcome.artifact.region);
        for warning in &outcome.warnings {
            println!("  Warning: {warning}");
        }
        println!();
    }

    println!("=== Every request was answered without the network ===");
}
