//! Learning-concept vocabulary.
//!
//! Coverage checking needs to know which kid-level phrasings count as
//! teaching a concept: a story about a drummer repeating a rhythm teaches
//! loops without ever saying "loop". The lookup is a capability so tests and
//! alternative taxonomies can substitute their own tables.

use std::collections::HashMap;

/// Related-terms lookup for learning concepts.
pub trait ConceptVocabulary: Send + Sync {
    /// Terms that count as covering `concept_id` when they appear in
    /// narrative text. The concept's own name always counts and is not
    /// required to be listed here.
    fn related_terms(&self, concept_id: &str) -> Vec<String>;
}

lazy_static::lazy_static! {
    /// Kid-level related terms for the coding concepts the product teaches.
    static ref RELATED_TERMS: HashMap<&'static str, &'static [&'static str]> = {
        let mut table: HashMap<&'static str, &'static [&'static str]> = HashMap::new();
        table.insert(
            "loops",
            &["repeat", "repeated", "again and again", "over and over", "one more time"],
        );
        table.insert(
            "conditionals",
            &["if", "choice", "choose", "decide", "decision", "either"],
        );
        table.insert(
            "variables",
            &["remember", "remembered", "keeps track", "stored", "a name for"],
        );
        table.insert(
            "functions",
            &["recipe", "routine", "special move", "steps with a name"],
        );
        table.insert(
            "sequences",
            &["step by step", "one after another", "in order", "first things first"],
        );
        table.insert(
            "events",
            &["when something happens", "signal", "react", "listens for"],
        );
        table.insert(
            "debugging",
            &["bug", "mistake", "fix", "went wrong", "check your work"],
        );
        table
    };
}

/// Built-in vocabulary covering the product's core concept set.
#[derive(Debug, Clone, Copy, Default)]
pub struct StaticVocabulary;

impl ConceptVocabulary for StaticVocabulary {
    fn related_terms(&self, concept_id: &str) -> Vec<String> {
        RELATED_TERMS
            .get(concept_id.to_lowercase().as_str())
            .map(|terms| terms.iter().map(|t| t.to_string()).collect())
            .unwrap_or_default()
    }
}
