//! Natural-language-to-query agent
//!
//! A bounded loop between the chat model and one identity's datastore: the
//! model sees the schema, asks for SELECT statements one at a time, gets
//! truncated result rows back, and finishes with a textual answer. The
//! query budget caps worst-case latency and cost per invocation.

mod analyzer;

pub use analyzer::{parse_profile_response, ProfileAnalyzer, ProfileSummary};

use crate::error::Result;
use crate::llm::{ChatMessage, ChatModel};
use crate::store::Datastore;
use tracing::{debug, warn};

/// Prefix the model uses to request a query
const SQL_PREFIX: &str = "SQL:";
/// Prefix the model uses to deliver its final answer
const ANSWER_PREFIX: &str = "ANSWER:";

/// Bounded SQL agent over one datastore
pub struct SqlAgent<'a> {
    model: &'a dyn ChatModel,
    store: &'a Datastore,
    max_queries: usize,
    max_result_rows: usize,
}

impl<'a> SqlAgent<'a> {
    pub fn new(
        model: &'a dyn ChatModel,
        store: &'a Datastore,
        max_queries: usize,
        max_result_rows: usize,
    ) -> Self {
        Self {
            model,
            store,
            max_queries,
            max_result_rows,
        }
    }

    fn system_prompt(&self, schema: &str) -> String {
        format!(
            "You answer questions about a personal social-media archive stored in SQLite.\n\
             Tables and columns:\n{}\n\n\
             To consult the database, reply with a single line starting with `{}` followed by one SQLite SELECT statement.\n\
             You may run at most {} queries. When you have enough information, reply with `{}` followed by your answer.\n\
             Reply with nothing besides one `{}` or `{}` message.",
            schema, SQL_PREFIX, self.max_queries, ANSWER_PREFIX, SQL_PREFIX, ANSWER_PREFIX
        )
    }

    /// Run the agent loop for one task
    ///
    /// Errors from individual queries are fed back to the model and never
    /// escape; only a chat transport failure is returned as `Err`.
    pub async fn run(&self, task: &str) -> Result<String> {
        let schema = self.store.schema_summary().await?;
        let mut messages = vec![
            ChatMessage::system(self.system_prompt(&schema)),
            ChatMessage::user(task.to_string()),
        ];

        let mut queries_run = 0;
        loop {
            let reply = self.model.complete(&messages).await?;
            let trimmed = reply.trim();

            if let Some(answer) = strip_prefix_ci(trimmed, ANSWER_PREFIX) {
                return Ok(answer.trim().to_string());
            }

            let Some(sql) = strip_prefix_ci(trimmed, SQL_PREFIX) else {
                // No protocol prefix: treat the whole reply as the answer
                debug!("Agent reply without prefix, taking it as the answer");
                return Ok(trimmed.to_string());
            };

            if queries_run >= self.max_queries {
                warn!("Query budget ({}) exhausted", self.max_queries);
                messages.push(ChatMessage::assistant(reply.clone()));
                messages.push(ChatMessage::user(format!(
                    "Query budget exhausted. Reply now with `{}` and your best answer from what you have seen.",
                    ANSWER_PREFIX
                )));
                let last = self.model.complete(&messages).await?;
                let last = last.trim();
                let answer = strip_prefix_ci(last, ANSWER_PREFIX).unwrap_or(last);
                return Ok(answer.trim().to_string());
            }

            let sql = unfence(sql);
            queries_run += 1;
            debug!("Agent query {}/{}: {}", queries_run, self.max_queries, sql);

            let feedback = match self.store.query_rows(&sql).await {
                Ok(data) if data.rows.is_empty() => "Result: no rows".to_string(),
                Ok(data) => format!("Result:\n{}", data.render(self.max_result_rows)),
                Err(e) => format!("Error: {}", e),
            };

            messages.push(ChatMessage::assistant(reply));
            messages.push(ChatMessage::user(feedback));
        }
    }
}

/// Case-insensitive prefix strip
fn strip_prefix_ci<'t>(text: &'t str, prefix: &str) -> Option<&'t str> {
    let head = text.get(..prefix.len())?;
    if head.eq_ignore_ascii_case(prefix) {
        Some(&text[prefix.len()..])
    } else {
        None
    }
}

/// Remove surrounding code fences from a model-supplied query
fn unfence(sql: &str) -> String {
    sql.trim()
        .trim_start_matches("```sql")
        .trim_start_matches("```")
        .trim_end_matches("```")
        .trim()
        .to_string()
}
