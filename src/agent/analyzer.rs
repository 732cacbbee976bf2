//! Profile synthesis
//!
//! One structured-extraction pass over the whole datastore: the SQL agent
//! explores the tables under a bounded query budget and must return a JSON
//! object with exactly three single-line string fields. The parse contract
//! tolerates code fences and leading prose, nothing else.

use super::SqlAgent;
use crate::config::AnalyzerConfig;
use crate::error::{Error, Result};
use crate::llm::ChatModel;
use crate::store::Datastore;
use serde::{Deserialize, Serialize};
use tracing::info;

/// Synthesized personality profile
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProfileSummary {
    pub short_bio: String,
    pub detailed_profile: String,
    pub speak_pattern: String,
}

/// Strip fences and leading prose, then parse the analyzer's JSON reply
pub fn parse_profile_response(raw: &str) -> Result<ProfileSummary> {
    let cleaned = raw.replace("```json", "").replace("```", "");
    let cleaned = cleaned.trim();

    let start = cleaned
        .find('{')
        .ok_or_else(|| Error::Analyzer("No JSON object in analyzer response".to_string()))?;

    serde_json::from_str(&cleaned[start..])
        .map_err(|e| Error::Analyzer(format!("Malformed analyzer response: {}", e)))
}

/// Runs profile synthesis against one identity's datastore
pub struct ProfileAnalyzer<'a> {
    model: &'a dyn ChatModel,
    store: &'a Datastore,
    config: &'a AnalyzerConfig,
}

impl<'a> ProfileAnalyzer<'a> {
    pub fn new(model: &'a dyn ChatModel, store: &'a Datastore, config: &'a AnalyzerConfig) -> Self {
        Self {
            model,
            store,
            config,
        }
    }

    fn prompt(language: &str) -> String {
        format!(
            "The database holds my personal social-media archive: posts, stories, captions, \
             profile info, inbox messages, media descriptions and other metadata. Imagine you \
             are me, reflecting on who you are based on everything in it.\n\n\
             Return ONLY a valid JSON object with exactly three fields:\n\
             - \"short_bio\": a concise first-person bio focused on how I typically describe \
             myself; my key personality traits, main interests and unique qualities. Under 500 \
             characters, engaging and personal.\n\
             - \"detailed_profile\": a deep first-person narrative about my personality, daily \
             life, interests, social interactions and online presence; emotions, motivations, \
             notable experiences. Do not mention the data source; you are me talking about \
             myself. At least 3000 characters.\n\
             - \"speak_pattern\": from the inbox tables, how I actually write: slang, emojis, \
             formality, how technical my language is, with a few literal examples of things I \
             say. At least 1000 characters; this will drive a voice for me, so details matter.\n\n\
             Every field MUST be a single line with no line breaks, and MUST be written in the \
             '{}' language. Be careful with characters that would break the JSON format.",
            language
        )
    }

    /// Read the datastore and produce the profile
    pub async fn analyze(&self, language: &str) -> Result<ProfileSummary> {
        info!("Starting profile synthesis in language '{}'", language);

        let agent = SqlAgent::new(
            self.model,
            self.store,
            self.config.max_queries,
            self.config.max_result_rows,
        );
        let response = agent.run(&Self::prompt(language)).await?;

        let profile = parse_profile_response(&response)?;
        info!("Profile synthesis completed");
        Ok(profile)
    }
}
