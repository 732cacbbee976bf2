//! Contextual retrieval and synthesis workflow
//!
//! One conversational turn is a small DAG over an immutable context value:
//! similarity search and the structured-query agent run concurrently, a
//! merge node joins their outputs with fixed labels, and a single
//! generation call answers as the persona. Context nodes degrade to
//! explicit error strings; only the generation node is terminal for the
//! turn, and even it falls back to a fixed apology.

use crate::agent::SqlAgent;
use crate::config::TurnConfig;
use crate::embed::Embedder;
use crate::error::Result;
use crate::llm::{ChatMessage, ChatModel};
use crate::registry::{Identity, TurnRecord};
use crate::store::Datastore;
use crate::vector::{PassageHit, PassageSearch};
use std::collections::HashSet;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Literal output of the similarity node when nothing is found
pub const NO_MATCHES_MARKER: &str = "No relevant documents found";

/// Fixed answer when the generation call fails or times out
pub const FALLBACK_ANSWER: &str =
    "I apologize, but I'm having trouble generating a response right now. Please try again later.";

/// Persona attributes fed to the generation node
#[derive(Debug, Clone)]
pub struct Persona {
    pub name: String,
    pub bio: String,
    pub description: String,
    pub speak_pattern: String,
}

impl From<&Identity> for Persona {
    fn from(identity: &Identity) -> Self {
        Self {
            name: identity.full_name.clone(),
            bio: identity.short_bio.clone().unwrap_or_default(),
            description: identity.detailed_profile.clone().unwrap_or_default(),
            speak_pattern: identity.speak_pattern.clone().unwrap_or_default(),
        }
    }
}

/// Fully resolved state of one turn
#[derive(Debug, Clone)]
pub struct TurnContext {
    pub query: String,
    pub db_context: String,
    pub vector_context: String,
    pub merged_context: String,
    pub answer: String,
}

/// Dependencies of the turn workflow
pub struct TurnWorkflow<'a> {
    pub embedder: &'a dyn Embedder,
    pub passages: &'a dyn PassageSearch,
    pub model: &'a dyn ChatModel,
    pub store: &'a Datastore,
    pub config: &'a TurnConfig,
}

impl<'a> TurnWorkflow<'a> {
    /// Execute the 4-node DAG for one question
    pub async fn run(
        &self,
        persona: &Persona,
        history: &[TurnRecord],
        query: &str,
    ) -> TurnContext {
        info!("Running turn for query: {}", query);

        // Nodes 1 and 2 have no data dependency on each other
        let (vector_context, db_context) = tokio::join!(
            self.vector_context_node(query),
            self.database_context_node(query),
        );

        let merged_context = merge_contexts(&db_context, &vector_context);
        debug!("Merged context is {} chars", merged_context.len());

        let answer = self
            .generation_node(persona, history, &merged_context, query)
            .await;

        TurnContext {
            query: query.to_string(),
            db_context,
            vector_context,
            merged_context,
            answer,
        }
    }

    /// Node 1: embed the query and gather nearest passages
    async fn vector_context_node(&self, query: &str) -> String {
        match self.similarity_search(query).await {
            Ok(hits) => assemble_vector_context(hits),
            Err(e) => {
                warn!("Similarity search failed: {}", e);
                format!("Vector search failed: {}", e)
            }
        }
    }

    async fn similarity_search(&self, query: &str) -> Result<Vec<PassageHit>> {
        let mut embeddings = self.embedder.embed(vec![query.to_string()]).await?;
        let vector = embeddings
            .pop()
            .ok_or_else(|| crate::error::Error::Embedding("No embedding returned".to_string()))?;
        self.passages.search(vector, self.config.top_k).await
    }

    /// Node 2: translate the question into bounded SQL and answer from rows
    async fn database_context_node(&self, query: &str) -> String {
        let agent = SqlAgent::new(
            self.model,
            self.store,
            self.config.max_queries,
            self.config.max_result_rows,
        );
        match agent.run(query).await {
            Ok(answer) => answer,
            Err(e) => {
                warn!("Structured query failed: {}", e);
                format!("Database query failed: {}", e)
            }
        }
    }

    /// Node 4: one generation call as the persona, with a hard timeout
    async fn generation_node(
        &self,
        persona: &Persona,
        history: &[TurnRecord],
        merged_context: &str,
        query: &str,
    ) -> String {
        let formatted_history = if history.is_empty() {
            "No previous messages".to_string()
        } else {
            history
                .iter()
                .map(|turn| format!("User: {}\nYou: {}", turn.question, turn.answer))
                .collect::<Vec<_>>()
                .join("\n")
        };

        let system = format!(
            "You are {name}. Answer every message as {name} would, never as an assistant.\n\n\
             Your biography:\n{bio}\n\n\
             Your description:\n{description}\n\n\
             Your way of speaking:\n{speak_pattern}\n\n\
             Previous conversation with this person:\n{history}\n\n\
             Background gathered from your personal archive:\n{context}\n\n\
             Use the background only as support; be natural and creative. Stay consistent with \
             your biography, description and way of speaking. Answer in the same language as \
             the user's question. Respond ONLY with the answer, nothing else. Never mention the \
             archive, the database or how the background was gathered.",
            name = persona.name,
            bio = persona.bio,
            description = persona.description,
            speak_pattern = persona.speak_pattern,
            history = formatted_history,
            context = merged_context,
        );

        let messages = [ChatMessage::system(system), ChatMessage::user(query)];
        let timeout = Duration::from_secs(self.config.generation_timeout_secs);

        match tokio::time::timeout(timeout, self.model.complete(&messages)).await {
            Ok(Ok(answer)) => answer.trim().to_string(),
            Ok(Err(e)) => {
                warn!("Generation failed: {}", e);
                FALLBACK_ANSWER.to_string()
            }
            Err(_) => {
                warn!("Generation timed out after {:?}", timeout);
                FALLBACK_ANSWER.to_string()
            }
        }
    }
}

/// Node 3: fixed-order merge with literal labels
pub fn merge_contexts(db_context: &str, vector_context: &str) -> String {
    format!(
        "Context from database: {}\n\nContext from vector search: {}",
        db_context, vector_context
    )
}

/// Deduplicate and concatenate similarity hits; explicit marker when empty
fn assemble_vector_context(hits: Vec<PassageHit>) -> String {
    let mut seen = HashSet::new();
    let unique: Vec<String> = hits
        .into_iter()
        .filter(|hit| !hit.text.is_empty() && seen.insert(hit.text.clone()))
        .map(|hit| hit.text)
        .collect();

    if unique.is_empty() {
        NO_MATCHES_MARKER.to_string()
    } else {
        unique.join("\n\n")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use async_trait::async_trait;
    use std::sync::Mutex;
    use tempfile::TempDir;

    struct StubEmbedder;

    #[async_trait]
    impl Embedder for StubEmbedder {
        async fn embed(&self, texts: Vec<String>) -> Result<Vec<Vec<f32>>> {
            Ok(texts.iter().map(|_| vec![0.5; 4]).collect())
        }

        fn dimension(&self) -> usize {
            4
        }

        fn model_name(&self) -> &str {
            "stub"
        }
    }

    struct StubSearch {
        hits: Vec<PassageHit>,
    }

    #[async_trait]
    impl PassageSearch for StubSearch {
        async fn search(&self, _vector: Vec<f32>, _limit: usize) -> Result<Vec<PassageHit>> {
            Ok(self.hits.clone())
        }
    }

    struct SlowModel {
        delay: Duration,
    }

    #[async_trait]
    impl ChatModel for SlowModel {
        async fn complete(&self, _messages: &[ChatMessage]) -> Result<String> {
            tokio::time::sleep(self.delay).await;
            Ok("too late".to_string())
        }

        fn model_name(&self) -> &str {
            "slow"
        }
    }

    /// Replies "ANSWER: ..." to agent calls and a persona answer otherwise
    struct TwoPhaseModel {
        agent_reply: String,
        generation_reply: Result<String>,
        calls: Mutex<usize>,
    }

    impl TwoPhaseModel {
        fn new(agent_reply: &str, generation_reply: Result<String>) -> Self {
            Self {
                agent_reply: agent_reply.to_string(),
                generation_reply,
                calls: Mutex::new(0),
            }
        }
    }

    #[async_trait]
    impl ChatModel for TwoPhaseModel {
        async fn complete(&self, messages: &[ChatMessage]) -> Result<String> {
            *self.calls.lock().unwrap() += 1;
            let system = &messages[0].content;
            if system.contains("SELECT") || system.contains("Tables and columns") {
                Ok(self.agent_reply.clone())
            } else {
                match &self.generation_reply {
                    Ok(answer) => Ok(answer.clone()),
                    Err(_) => Err(Error::ModelBackend("generation down".to_string())),
                }
            }
        }

        fn model_name(&self) -> &str {
            "two-phase"
        }
    }

    fn hit(text: &str) -> PassageHit {
        PassageHit {
            score: 0.9,
            text: text.to_string(),
            source: "t".to_string(),
        }
    }

    fn persona() -> Persona {
        Persona {
            name: "Ana".to_string(),
            bio: "bio".to_string(),
            description: "description".to_string(),
            speak_pattern: "casual".to_string(),
        }
    }

    async fn empty_store() -> (TempDir, Datastore) {
        let dir = TempDir::new().unwrap();
        let store = Datastore::open(&dir.path().join("archive.db")).await.unwrap();
        (dir, store)
    }

    #[test]
    fn test_merge_format_is_exact() {
        assert_eq!(
            merge_contexts("db text", "vector text"),
            "Context from database: db text\n\nContext from vector search: vector text"
        );
    }

    #[test]
    fn test_assemble_dedupes_and_marks_empty() {
        assert_eq!(assemble_vector_context(vec![]), NO_MATCHES_MARKER);

        let merged =
            assemble_vector_context(vec![hit("one"), hit("one"), hit("two")]);
        assert_eq!(merged, "one\n\ntwo");
    }

    #[tokio::test]
    async fn test_turn_with_no_hits_and_sql_error_still_answers() {
        let (_dir, store) = empty_store().await;
        let config = TurnConfig::default();

        // Agent's only reply requests a broken query, then answers next round;
        // generation succeeds, so the fallback must NOT fire.
        let model = TwoPhaseModel::new(
            "ANSWER: Database query failed: nothing ingested yet",
            Ok("I love grilled fish, always have.".to_string()),
        );

        let workflow = TurnWorkflow {
            embedder: &StubEmbedder,
            passages: &StubSearch { hits: vec![] },
            model: &model,
            store: &store,
            config: &config,
        };

        let turn = workflow
            .run(&persona(), &[], "What is your favorite food?")
            .await;

        assert_eq!(turn.vector_context, NO_MATCHES_MARKER);
        assert!(turn.merged_context.contains(NO_MATCHES_MARKER));
        assert!(turn.merged_context.contains("Database query failed"));
        assert_eq!(turn.answer, "I love grilled fish, always have.");
        assert_ne!(turn.answer, FALLBACK_ANSWER);
    }

    #[tokio::test]
    async fn test_generation_failure_yields_fixed_apology() {
        let (_dir, store) = empty_store().await;
        let config = TurnConfig::default();

        let model = TwoPhaseModel::new(
            "ANSWER: some db context",
            Err(Error::ModelBackend("down".to_string())),
        );

        let workflow = TurnWorkflow {
            embedder: &StubEmbedder,
            passages: &StubSearch { hits: vec![hit("a passage")] },
            model: &model,
            store: &store,
            config: &config,
        };

        let turn = workflow.run(&persona(), &[], "hello?").await;
        assert_eq!(turn.answer, FALLBACK_ANSWER);
        // Context gathering still happened
        assert_eq!(turn.vector_context, "a passage");
    }

    #[tokio::test(start_paused = true)]
    async fn test_generation_timeout_yields_fixed_apology() {
        let (_dir, store) = empty_store().await;
        let mut config = TurnConfig::default();
        config.generation_timeout_secs = 1;

        let model = SlowModel {
            delay: Duration::from_secs(10),
        };

        let workflow = TurnWorkflow {
            embedder: &StubEmbedder,
            passages: &StubSearch { hits: vec![] },
            model: &model,
            store: &store,
            config: &config,
        };

        let turn = workflow.run(&persona(), &[], "hi").await;
        assert_eq!(turn.answer, FALLBACK_ANSWER);
    }

    #[tokio::test]
    async fn test_history_window_appears_in_generation_prompt() {
        let (_dir, store) = empty_store().await;
        let config = TurnConfig::default();

        struct CapturingModel {
            seen_systems: Mutex<Vec<String>>,
        }

        #[async_trait]
        impl ChatModel for CapturingModel {
            async fn complete(&self, messages: &[ChatMessage]) -> Result<String> {
                self.seen_systems
                    .lock()
                    .unwrap()
                    .push(messages[0].content.clone());
                Ok("ANSWER: fine".to_string())
            }

            fn model_name(&self) -> &str {
                "capturing"
            }
        }

        let model = CapturingModel {
            seen_systems: Mutex::new(Vec::new()),
        };

        let history = vec![TurnRecord {
            id: "1".to_string(),
            identity_id: 1,
            question: "earlier question".to_string(),
            answer: "earlier answer".to_string(),
            created_at: "2024-01-01T00:00:00Z".to_string(),
        }];

        let workflow = TurnWorkflow {
            embedder: &StubEmbedder,
            passages: &StubSearch { hits: vec![] },
            model: &model,
            store: &store,
            config: &config,
        };

        workflow.run(&persona(), &history, "next question").await;

        let systems = model.seen_systems.lock().unwrap();
        let generation_system = systems.last().unwrap();
        assert!(generation_system.contains("earlier question"));
        assert!(generation_system.contains("earlier answer"));
        assert!(generation_system.contains("Context from database:"));
    }
}
