use std::sync::Arc;
use std::sync::Mutex;

use rusqlite::{params, Connection, OptionalExtension};
use tracing::{debug, warn};

use cortex_core::types::{
    Conversation, ConversationSummary, Fact, FactCategory, IntentCategory, Message, MessageRole,
    SuccessPattern, UserProfile, Verbosity,
};
use cortex_embedding::{cosine_similarity, EmbeddingService};
use cortex_gateway::ModelGateway;
use cortex_gateway::backend::{Message as BackendMessage, Role as BackendRole};

use crate::db::embedding_codec;
use crate::error::{MemoryError, Result};
use crate::privacy::PrivacyLock;

/// Conversations are compacted at most this many times before the Memory
/// Store gives up and leaves the remaining history untouched (spec §4.6
/// "bounded retries").
const MAX_COMPRESS_RETRIES: i64 = 3;

/// Approximate characters per token used to budget `get_smart_context`
/// (no tokenizer is bundled; good enough for a soft 70/20/10 split).
const CHARS_PER_TOKEN: usize = 4;

/// Caps how many facts one `extract_facts` call accepts from a single
/// message, so a misbehaving model can't flood the facts table in one turn.
const MAX_EXTRACTED_FACTS: usize = 5;

/// Confidence assigned to LLM-extracted facts — lower than a user-supplied
/// `add_document` fact (1.0), since the small model can misread intent.
const EXTRACTED_FACT_CONFIDENCE: f32 = 0.6;

/// Owns conversations, messages, summaries, and facts; the sole writer of
/// the tables created by [`crate::db::init_db`] (spec C6 Memory Store).
/// Folds in the Privacy Lock (C7): every read or write that touches a
/// `Shadow`/`Vault` fact is checked against it first.
pub struct MemoryStore {
    db: Mutex<Connection>,
    gateway: Arc<ModelGateway>,
    embedding: Arc<EmbeddingService>,
    privacy: Arc<PrivacyLock>,
}

impl MemoryStore {
    pub fn new(
        conn: Connection,
        gateway: Arc<ModelGateway>,
        embedding: Arc<EmbeddingService>,
        privacy: Arc<PrivacyLock>,
    ) -> Self {
        Self {
            db: Mutex::new(conn),
            gateway,
            embedding,
            privacy,
        }
    }

    pub fn privacy(&self) -> &Arc<PrivacyLock> {
        &self.privacy
    }

    pub async fn create_conversation(&self, title: &str) -> Result<Conversation> {
        let db = self.db.lock().unwrap();
        let now = chrono::Utc::now().to_rfc3339();
        db.execute(
            "INSERT INTO conversations (title, message_count, compress_retries, created_at)
             VALUES (?1, 0, 0, ?2)",
            params![title, now],
        )?;
        let id = db.last_insert_rowid();
        Ok(Conversation {
            id,
            created_at: now,
            title: title.to_string(),
            message_count: 0,
        })
    }

    pub async fn list_conversations(&self, limit: usize) -> Result<Vec<Conversation>> {
        let db = self.db.lock().unwrap();
        let mut stmt = db.prepare(
            "SELECT id, title, message_count, created_at
             FROM conversations ORDER BY created_at DESC LIMIT ?1",
        )?;
        let rows = stmt.query_map(params![limit], |row| {
            Ok(Conversation {
                id: row.get(0)?,
                title: row.get(1)?,
                message_count: row.get(2)?,
                created_at: row.get(3)?,
            })
        })?;
        Ok(rows.filter_map(|r| r.ok()).collect())
    }

    /// Cascades to messages, summaries, and un-links facts (spec §3,
    /// "Deleting a Conversation cascades to its Messages and
    /// ConversationSummary but facts survive, orphaned").
    pub async fn delete_conversation(&self, conversation_id: i64) -> Result<()> {
        let db = self.db.lock().unwrap();
        let affected = db.execute(
            "DELETE FROM conversations WHERE id = ?1",
            params![conversation_id],
        )?;
        if affected == 0 {
            return Err(MemoryError::ConversationNotFound(conversation_id));
        }
        Ok(())
    }

    pub async fn get_messages(&self, conversation_id: i64) -> Result<Vec<Message>> {
        let db = self.db.lock().unwrap();
        let mut stmt = db.prepare(
            "SELECT id, conversation_id, role, content, created_at, model_used, token_count
             FROM messages WHERE conversation_id = ?1 ORDER BY id ASC",
        )?;
        let rows = stmt.query_map(params![conversation_id], row_to_message)?;
        Ok(rows.filter_map(|r| r.ok()).collect())
    }

    pub async fn add_message(
        &self,
        conversation_id: i64,
        role: MessageRole,
        content: &str,
        model_used: Option<&str>,
        token_count: Option<u32>,
    ) -> Result<Message> {
        let now = chrono::Utc::now().to_rfc3339();
        let id = {
            let db = self.db.lock().unwrap();
            db.execute(
                "INSERT INTO messages (conversation_id, role, content, model_used, token_count, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![conversation_id, role.to_string(), content, model_used, token_count, now],
            )?;
            let id = db.last_insert_rowid();
            db.execute(
                "UPDATE conversations SET message_count = message_count + 1 WHERE id = ?1",
                params![conversation_id],
            )?;
            id
        };
        Ok(Message {
            id,
            conversation_id,
            role,
            content: content.to_string(),
            created_at: now,
            model_used: model_used.map(str::to_string),
            token_count,
        })
    }

    /// Assembles the bounded prompt context for a conversation: roughly 70%
    /// of `token_budget` to the most recent messages, 20% to the latest
    /// summary (if any), 10% to relevant facts (spec §4.6).
    pub async fn get_smart_context(&self, conversation_id: i64, token_budget: usize) -> Result<String> {
        let char_budget = token_budget * CHARS_PER_TOKEN;
        let recent_budget = char_budget * 70 / 100;
        let summary_budget = char_budget * 20 / 100;
        let facts_budget = char_budget - recent_budget - summary_budget;

        let messages = self.get_messages(conversation_id).await?;
        let mut recent = String::new();
        for msg in messages.iter().rev() {
            let line = format!("{}: {}\n", msg.role, msg.content);
            if recent.len() + line.len() > recent_budget {
                break;
            }
            recent.insert_str(0, &line);
        }

        let summary = self.latest_summary(conversation_id)?;
        let summary_text = summary
            .map(|s| truncate(&s.summary_text, summary_budget))
            .unwrap_or_default();

        let facts = self.get_relevant_facts(&recent, 5).await.unwrap_or_default();
        let mut facts_text = String::new();
        for fact in &facts {
            let line = format!("- {}\n", fact.content);
            if facts_text.len() + line.len() > facts_budget {
                break;
            }
            facts_text.push_str(&line);
        }

        let mut out = String::new();
        if !summary_text.is_empty() {
            out.push_str("## Earlier summary\n");
            out.push_str(&summary_text);
            out.push('\n');
        }
        if !facts_text.is_empty() {
            out.push_str("## Relevant facts\n");
            out.push_str(&facts_text);
        }
        out.push_str("## Recent messages\n");
        out.push_str(&recent);
        Ok(out)
    }

    fn latest_summary(&self, conversation_id: i64) -> Result<Option<ConversationSummary>> {
        let db = self.db.lock().unwrap();
        let row = db
            .query_row(
                "SELECT conversation_id, summary_text, messages_covered_from, messages_covered_to, created_at
                 FROM conversation_summaries WHERE conversation_id = ?1
                 ORDER BY messages_covered_to DESC LIMIT 1",
                params![conversation_id],
                |row| {
                    Ok(ConversationSummary {
                        conversation_id: row.get(0)?,
                        summary_text: row.get(1)?,
                        messages_covered_from: row.get(2)?,
                        messages_covered_to: row.get(3)?,
                        created_at: row.get(4)?,
                    })
                },
            )
            .optional()?;
        Ok(row)
    }

    /// Summarizes the oldest half of a conversation's uncompressed messages
    /// into a new [`ConversationSummary`] via the small model role. Bounded
    /// by [`MAX_COMPRESS_RETRIES`]; a failure increments the retry counter
    /// and the conversation is left as-is until the next attempt.
    pub async fn compress_history(&self, conversation_id: i64) -> Result<()> {
        let retries = self.compress_retries(conversation_id)?;
        if retries >= MAX_COMPRESS_RETRIES {
            warn!(conversation_id, retries, "compress_history retry budget exhausted, skipping");
            return Ok(());
        }

        let messages = self.get_messages(conversation_id).await?;
        if messages.len() < 4 {
            return Ok(());
        }
        let split = messages.len() / 2;
        let (to_compress, _rest) = messages.split_at(split);

        let transcript: String = to_compress
            .iter()
            .map(|m| format!("{}: {}\n", m.role, m.content))
            .collect();

        let req_messages = vec![BackendMessage {
            role: BackendRole::User,
            content: format!(
                "Summarize this conversation excerpt in a few sentences, preserving names, \
                 decisions, and open questions:\n\n{transcript}"
            ),
        }];

        let result = self
            .gateway
            .chat(
                cortex_core::types::ModelRole::Small,
                req_messages,
                "You compress conversation history into short factual summaries.".to_string(),
                512,
            )
            .await;

        match result {
            Ok(resp) => {
                let now = chrono::Utc::now().to_rfc3339();
                let from_id = to_compress.first().map(|m| m.id).unwrap_or(0);
                let to_id = to_compress.last().map(|m| m.id).unwrap_or(0);
                let db = self.db.lock().unwrap();
                db.execute(
                    "INSERT INTO conversation_summaries
                     (conversation_id, summary_text, messages_covered_from, messages_covered_to, created_at)
                     VALUES (?1, ?2, ?3, ?4, ?5)",
                    params![conversation_id, resp.content, from_id, to_id, now],
                )?;
                debug!(conversation_id, from_id, to_id, "compressed conversation history");
                Ok(())
            }
            Err(e) => {
                warn!(conversation_id, err = %e, "compress_history failed, incrementing retry counter");
                let db = self.db.lock().unwrap();
                db.execute(
                    "UPDATE conversations SET compress_retries = compress_retries + 1 WHERE id = ?1",
                    params![conversation_id],
                )?;
                Ok(())
            }
        }
    }

    fn compress_retries(&self, conversation_id: i64) -> Result<i64> {
        let db = self.db.lock().unwrap();
        let retries: i64 = db.query_row(
            "SELECT compress_retries FROM conversations WHERE id = ?1",
            params![conversation_id],
            |row| row.get(0),
        )?;
        Ok(retries)
    }

    /// Stores a fact and its embedding. Writes to `Shadow`/`Vault` are
    /// rejected while the Privacy Lock is locked.
    pub async fn add_fact(
        &self,
        conversation_id: Option<i64>,
        content: &str,
        category: FactCategory,
        confidence: f32,
    ) -> Result<Fact> {
        if !self.privacy.is_accessible(category) {
            return Err(MemoryError::PrivacyDenied {
                category: category.to_string(),
            });
        }
        let embedding = self.embedding.embed(content).await?;
        let now = chrono::Utc::now().to_rfc3339();
        let blob = embedding_codec::encode(&embedding);

        let db = self.db.lock().unwrap();
        db.execute(
            "INSERT INTO facts
             (conversation_id, content, category, embedding, confidence, created_at,
              last_used, usage_count, positive_outcomes, negative_outcomes)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, NULL, 0, 0, 0)",
            params![conversation_id, content, category.to_string(), blob, confidence, now],
        )?;
        let id = db.last_insert_rowid();
        db.execute(
            "INSERT INTO facts_fts(rowid, content) VALUES (?1, ?2)",
            params![id, content],
        )?;

        Ok(Fact {
            id,
            conversation_id,
            content: content.to_string(),
            category,
            embedding,
            confidence,
            created_at: now,
            last_used: None,
            usage_count: 0,
            positive_outcomes: 0,
            negative_outcomes: 0,
        })
    }

    /// Asks the small model to pull durable facts out of a message's content
    /// and stores each as a `General`-category fact (spec §4.6 "extracts
    /// facts via LLM in the background"). A backend failure or an
    /// unparseable/empty response yields no facts rather than an error —
    /// this runs off the request's hot path and must never surface to the
    /// caller (spec §4.6 "fact-extraction failures are logged but never
    /// propagated as request failures").
    pub async fn extract_facts(&self, conversation_id: i64, content: &str) -> Result<Vec<Fact>> {
        if content.trim().is_empty() {
            return Ok(Vec::new());
        }

        let req_messages = vec![BackendMessage {
            role: BackendRole::User,
            content: format!(
                "Extract any durable facts worth remembering about the user or their \
                 project from this message (preferences, names, decisions, constraints). \
                 Reply with a JSON array of short fact strings, or [] if there are none.\n\n\
                 Message:\n{content}"
            ),
        }];

        let result = self
            .gateway
            .chat(
                cortex_core::types::ModelRole::Small,
                req_messages,
                "You extract concise, durable facts from conversation messages.".to_string(),
                256,
            )
            .await;

        let raw = match result {
            Ok(resp) => resp.content,
            Err(e) => {
                warn!(conversation_id, err = %e, "fact extraction backend call failed, skipping");
                return Ok(Vec::new());
            }
        };

        let mut facts = Vec::new();
        for text in parse_fact_candidates(&raw).into_iter().take(MAX_EXTRACTED_FACTS) {
            match self
                .add_fact(Some(conversation_id), &text, FactCategory::General, EXTRACTED_FACT_CONFIDENCE)
                .await
            {
                Ok(fact) => facts.push(fact),
                Err(e) => warn!(conversation_id, err = %e, "failed to store extracted fact, skipping"),
            }
        }
        debug!(conversation_id, count = facts.len(), "extracted facts from message");
        Ok(facts)
    }

    /// Cosine-ranks stored facts against `query`'s embedding, filtering out
    /// any `Shadow`/`Vault` fact the Privacy Lock currently denies.
    pub async fn get_relevant_facts(&self, query: &str, limit: usize) -> Result<Vec<Fact>> {
        let query_embedding = self.embedding.embed(query).await?;
        self.get_relevant_facts_by_embedding(&query_embedding, limit)
    }

    /// Same ranking as [`Self::get_relevant_facts`] but takes an
    /// already-computed embedding, so a caller that routed or primed off the
    /// same query text (spec §4.4, §4.5) doesn't pay for a second embedding
    /// call.
    pub fn get_relevant_facts_by_embedding(&self, query_embedding: &[f32], limit: usize) -> Result<Vec<Fact>> {
        let all = self.all_facts()?;

        let mut scored: Vec<(f32, Fact)> = all
            .into_iter()
            .filter(|f| self.privacy.is_accessible(f.category))
            .map(|f| {
                let sim = cosine_similarity(query_embedding, &f.embedding);
                (sim, f)
            })
            .collect();

        scored.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(std::cmp::Ordering::Equal));
        scored.truncate(limit);
        Ok(scored.into_iter().map(|(_, f)| f).collect())
    }

    /// Marks a fact as having been used in a response: bumps `usage_count`
    /// and `last_used` (spec §4.5 "priming increments usage").
    pub fn mark_fact_used(&self, fact_id: i64) -> Result<()> {
        let now = chrono::Utc::now().to_rfc3339();
        let db = self.db.lock().unwrap();
        db.execute(
            "UPDATE facts SET usage_count = usage_count + 1, last_used = ?1 WHERE id = ?2",
            params![now, fact_id],
        )?;
        Ok(())
    }

    /// Records the user's reaction to a fact having been surfaced: logs an
    /// event row in `fact_effectiveness` and bumps the matching aggregate
    /// counter on `facts` (spec §4.12 feedback loop).
    pub fn record_fact_outcome(&self, fact_id: i64, message_id: Option<i64>, was_positive: bool) -> Result<()> {
        let now = chrono::Utc::now().to_rfc3339();
        let db = self.db.lock().unwrap();
        db.execute(
            "INSERT INTO fact_effectiveness (fact_id, message_id, was_positive, created_at)
             VALUES (?1, ?2, ?3, ?4)",
            params![fact_id, message_id, was_positive as i64, now],
        )?;
        let column = if was_positive { "positive_outcomes" } else { "negative_outcomes" };
        db.execute(
            &format!("UPDATE facts SET {column} = {column} + 1 WHERE id = ?1"),
            params![fact_id],
        )?;
        Ok(())
    }

    /// Returns the highest-scoring [`SuccessPattern`]s for `category`,
    /// prefetched by the Context Primer (spec §4.5, §4.8).
    pub fn get_success_patterns(&self, category: IntentCategory, limit: usize) -> Result<Vec<SuccessPattern>> {
        let db = self.db.lock().unwrap();
        let mut stmt = db.prepare(
            "SELECT id, category, pattern_text, effectiveness_score, usage_count, created_at
             FROM success_patterns WHERE category = ?1
             ORDER BY effectiveness_score DESC, usage_count DESC LIMIT ?2",
        )?;
        let rows = stmt.query_map(params![category.to_string(), limit], row_to_success_pattern)?;
        Ok(rows.filter_map(|r| r.ok()).collect())
    }

    /// Stores a newly-distilled success pattern (spec §4.8, built from a
    /// positive-outcome trend).
    pub fn add_success_pattern(&self, category: IntentCategory, pattern_text: &str, effectiveness_score: f32) -> Result<SuccessPattern> {
        let now = chrono::Utc::now().to_rfc3339();
        let db = self.db.lock().unwrap();
        db.execute(
            "INSERT INTO success_patterns (category, pattern_text, effectiveness_score, usage_count, created_at)
             VALUES (?1, ?2, ?3, 0, ?4)",
            params![category.to_string(), pattern_text, effectiveness_score, now],
        )?;
        let id = db.last_insert_rowid();
        Ok(SuccessPattern {
            id,
            category,
            pattern_text: pattern_text.to_string(),
            effectiveness_score,
            usage_count: 0,
            created_at: now,
        })
    }

    /// Cross-category leaderboard of success patterns, for the Self-Reflection
    /// Builder's "top 2 success patterns" block (spec §4.8), which has no
    /// category of its own to filter by.
    pub fn get_top_success_patterns(&self, limit: usize) -> Result<Vec<SuccessPattern>> {
        let db = self.db.lock().unwrap();
        let mut stmt = db.prepare(
            "SELECT id, category, pattern_text, effectiveness_score, usage_count, created_at
             FROM success_patterns ORDER BY effectiveness_score DESC, usage_count DESC LIMIT ?1",
        )?;
        let rows = stmt.query_map(params![limit], row_to_success_pattern)?;
        Ok(rows.filter_map(|r| r.ok()).collect())
    }

    fn all_facts(&self) -> Result<Vec<Fact>> {
        let db = self.db.lock().unwrap();
        let mut stmt = db.prepare(
            "SELECT id, conversation_id, content, category, embedding, confidence,
                    created_at, last_used, usage_count, positive_outcomes, negative_outcomes
             FROM facts",
        )?;
        let rows = stmt.query_map([], row_to_fact)?;
        Ok(rows.filter_map(|r| r.ok()).collect())
    }

    /// Deletes a fact and its FTS shadow row. Used by the facade's
    /// `delete_document` boundary operation; unrelated to conversation
    /// deletion, which orphans facts rather than removing them.
    pub fn delete_fact(&self, fact_id: i64) -> Result<()> {
        let db = self.db.lock().unwrap();
        let affected = db.execute("DELETE FROM facts WHERE id = ?1", params![fact_id])?;
        db.execute("DELETE FROM facts_fts WHERE rowid = ?1", params![fact_id])?;
        if affected == 0 {
            return Err(MemoryError::FactNotFound(fact_id));
        }
        Ok(())
    }

    pub async fn get_user_profile(&self) -> Result<UserProfile> {
        let db = self.db.lock().unwrap();
        let row = db
            .query_row(
                "SELECT display_name, verbosity, created_at FROM user_profile WHERE id = 1",
                [],
                |row| {
                    let verbosity: String = row.get(1)?;
                    Ok(UserProfile {
                        display_name: row.get(0)?,
                        verbosity: verbosity.parse::<Verbosity>().unwrap_or(Verbosity::Normal),
                        created_at: row.get(2)?,
                    })
                },
            )
            .optional()?;
        Ok(row.unwrap_or_default())
    }

    pub async fn save_user_profile(&self, profile: &UserProfile) -> Result<()> {
        let db = self.db.lock().unwrap();
        db.execute(
            "INSERT INTO user_profile (id, display_name, verbosity, created_at)
             VALUES (1, ?1, ?2, ?3)
             ON CONFLICT(id) DO UPDATE SET display_name = excluded.display_name, verbosity = excluded.verbosity",
            params![profile.display_name, profile.verbosity.to_string(), profile.created_at],
        )?;
        Ok(())
    }
}

/// Parses the small model's fact-extraction reply: strict JSON array first,
/// falling back to one fact per non-empty line (stripping a leading `-`/`*`
/// bullet) when the model ignores the JSON instruction — the same
/// tolerant-then-fallback shape `cortex-conductor`'s verdict parser uses.
fn parse_fact_candidates(raw: &str) -> Vec<String> {
    if let Some(facts) = parse_json_fact_array(raw) {
        return facts;
    }
    raw.lines()
        .map(|l| l.trim().trim_start_matches(['-', '*']).trim())
        .filter(|l| !l.is_empty())
        .map(str::to_string)
        .collect()
}

fn parse_json_fact_array(raw: &str) -> Option<Vec<String>> {
    let start = raw.find('[')?;
    let end = raw.rfind(']')?;
    if end <= start {
        return None;
    }
    let candidate = &raw[start..=end];
    let value: serde_json::Value = serde_json::from_str(candidate).ok()?;
    let arr = value.as_array()?;
    Some(
        arr.iter()
            .filter_map(|v| v.as_str())
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect(),
    )
}

fn truncate(s: &str, max_chars: usize) -> String {
    if s.len() <= max_chars {
        s.to_string()
    } else {
        s.chars().take(max_chars).collect()
    }
}

fn row_to_message(row: &rusqlite::Row<'_>) -> rusqlite::Result<Message> {
    let role_str: String = row.get(2)?;
    Ok(Message {
        id: row.get(0)?,
        conversation_id: row.get(1)?,
        role: role_str.parse().unwrap_or(MessageRole::User),
        content: row.get(3)?,
        created_at: row.get(4)?,
        model_used: row.get(5)?,
        token_count: row.get(6)?,
    })
}

fn row_to_success_pattern(row: &rusqlite::Row<'_>) -> rusqlite::Result<SuccessPattern> {
    let category_str: String = row.get(1)?;
    Ok(SuccessPattern {
        id: row.get(0)?,
        category: category_str.parse().unwrap_or(IntentCategory::Quick),
        pattern_text: row.get(2)?,
        effectiveness_score: row.get(3)?,
        usage_count: row.get(4)?,
        created_at: row.get(5)?,
    })
}

fn row_to_fact(row: &rusqlite::Row<'_>) -> rusqlite::Result<Fact> {
    let category_str: String = row.get(3)?;
    let blob: Vec<u8> = row.get(4)?;
    Ok(Fact {
        id: row.get(0)?,
        conversation_id: row.get(1)?,
        content: row.get(2)?,
        category: category_str.parse().unwrap_or(FactCategory::General),
        embedding: embedding_codec::decode(&blob),
        confidence: row.get(5)?,
        created_at: row.get(6)?,
        last_used: row.get(7)?,
        usage_count: row.get(8)?,
        positive_outcomes: row.get(9)?,
        negative_outcomes: row.get(10)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use cortex_core::config::EmbeddingConfig;
    use cortex_gateway::{BackendError, ChatRequest, ChatResponse, LlmBackend};
    use std::collections::HashMap;

    struct FakeBackend;

    #[async_trait]
    impl LlmBackend for FakeBackend {
        fn name(&self) -> &str {
            "fake"
        }
        async fn chat(&self, req: &ChatRequest) -> std::result::Result<ChatResponse, BackendError> {
            Ok(ChatResponse {
                content: format!("summary of {} chars", req.messages[0].content.len()),
                model: req.model.clone(),
                tokens_in: 10,
                tokens_out: 5,
                stop_reason: "stop".to_string(),
            })
        }
        async fn embed(&self, text: &str, _model: &str) -> std::result::Result<Vec<f32>, BackendError> {
            let mut v = vec![0.0f32; 8];
            for (i, w) in text.to_lowercase().split_whitespace().enumerate() {
                v[(w.len() + i) % v.len()] += 1.0;
            }
            if v.iter().all(|x| *x == 0.0) {
                v[0] = 1.0;
            }
            Ok(v)
        }
        async fn list_loaded_models(&self) -> std::result::Result<Vec<String>, BackendError> {
            Ok(vec![])
        }
    }

    fn test_store() -> MemoryStore {
        let conn = Connection::open_in_memory().unwrap();
        crate::db::init_db(&conn).unwrap();

        let mut backends: HashMap<_, std::sync::Arc<dyn LlmBackend>> = HashMap::new();
        backends.insert(cortex_core::types::ModelRole::Small, std::sync::Arc::new(FakeBackend));
        backends.insert(cortex_core::types::ModelRole::Embedding, std::sync::Arc::new(FakeBackend));
        let gateway = Arc::new(ModelGateway::new(
            backends,
            HashMap::from([
                (cortex_core::types::ModelRole::Small, "fake-small".to_string()),
                (cortex_core::types::ModelRole::Embedding, "fake-embed".to_string()),
            ]),
            cortex_core::config::ModelsConfig::default(),
        ));
        let embedding = Arc::new(EmbeddingService::new(
            gateway.clone(),
            &EmbeddingConfig {
                dim: 8,
                ..EmbeddingConfig::default()
            },
        ));
        let privacy = PrivacyLock::new(1800);
        MemoryStore::new(conn, gateway, embedding, privacy)
    }

    #[tokio::test]
    async fn add_message_bumps_conversation_count() {
        let store = test_store();
        let conv = store.create_conversation("test").await.unwrap();
        store
            .add_message(conv.id, MessageRole::User, "hi there", None, None)
            .await
            .unwrap();
        let messages = store.get_messages(conv.id).await.unwrap();
        assert_eq!(messages.len(), 1);
    }

    #[tokio::test]
    async fn delete_conversation_cascades_to_messages() {
        let store = test_store();
        let conv = store.create_conversation("test").await.unwrap();
        store
            .add_message(conv.id, MessageRole::User, "hi", None, None)
            .await
            .unwrap();
        store.delete_conversation(conv.id).await.unwrap();
        let messages = store.get_messages(conv.id).await.unwrap();
        assert!(messages.is_empty());
    }

    #[tokio::test]
    async fn protected_facts_are_denied_while_locked() {
        let store = test_store();
        let err = store
            .add_fact(None, "secret thing", FactCategory::Vault, 0.9)
            .await
            .unwrap_err();
        assert_eq!(err.code(), "PRIVACY_DENIED");

        store.privacy().unlock();
        let fact = store
            .add_fact(None, "secret thing", FactCategory::Vault, 0.9)
            .await
            .unwrap();
        assert_eq!(fact.category, FactCategory::Vault);
    }

    #[tokio::test]
    async fn get_relevant_facts_ranks_by_similarity() {
        let store = test_store();
        store
            .add_fact(None, "likes rust programming", FactCategory::General, 0.8)
            .await
            .unwrap();
        store
            .add_fact(None, "prefers tea over coffee", FactCategory::General, 0.8)
            .await
            .unwrap();
        let results = store.get_relevant_facts("rust programming", 5).await.unwrap();
        assert!(!results.is_empty());
    }

    #[test]
    fn parses_json_fact_array() {
        let facts = parse_fact_candidates(r#"Sure thing:\n["likes rust", "works at a startup"]"#);
        assert_eq!(facts, vec!["likes rust".to_string(), "works at a startup".to_string()]);
    }

    #[test]
    fn falls_back_to_one_fact_per_line() {
        let facts = parse_fact_candidates("- likes rust\n* works at a startup\n");
        assert_eq!(facts, vec!["likes rust".to_string(), "works at a startup".to_string()]);
    }

    #[test]
    fn empty_json_array_yields_no_facts() {
        assert!(parse_fact_candidates("[]").is_empty());
    }

    #[tokio::test]
    async fn extract_facts_stores_parsed_facts_from_backend_reply() {
        let store = test_store();
        let conv = store.create_conversation("test").await.unwrap();
        let facts = store.extract_facts(conv.id, "I work at Acme and love Rust").await.unwrap();
        assert_eq!(facts.len(), 1);
        assert_eq!(facts[0].category, FactCategory::General);
        assert_eq!(facts[0].conversation_id, Some(conv.id));
    }

    #[tokio::test]
    async fn extract_facts_on_blank_message_is_a_no_op() {
        let store = test_store();
        let conv = store.create_conversation("test").await.unwrap();
        let facts = store.extract_facts(conv.id, "   ").await.unwrap();
        assert!(facts.is_empty());
    }

    #[tokio::test]
    async fn fact_outcome_updates_aggregate_and_event_log() {
        let store = test_store();
        let fact = store
            .add_fact(None, "likes rust programming", FactCategory::General, 0.8)
            .await
            .unwrap();
        store.mark_fact_used(fact.id).unwrap();
        store.record_fact_outcome(fact.id, None, true).unwrap();
        store.record_fact_outcome(fact.id, None, false).unwrap();
        let facts = store.all_facts().unwrap();
        let updated = facts.iter().find(|f| f.id == fact.id).unwrap();
        assert_eq!(updated.usage_count, 1);
        assert_eq!(updated.positive_outcomes, 1);
        assert_eq!(updated.negative_outcomes, 1);
    }

    #[tokio::test]
    async fn success_patterns_round_trip_ranked_by_effectiveness() {
        let store = test_store();
        store
            .add_success_pattern(IntentCategory::Code, "show a minimal repro first", 0.6)
            .unwrap();
        store
            .add_success_pattern(IntentCategory::Code, "ask clarifying question before coding", 0.9)
            .unwrap();
        let patterns = store.get_success_patterns(IntentCategory::Code, 5).unwrap();
        assert_eq!(patterns.len(), 2);
        assert!(patterns[0].effectiveness_score >= patterns[1].effectiveness_score);
    }

    #[tokio::test]
    async fn top_success_patterns_ignore_category_boundaries() {
        let store = test_store();
        store.add_success_pattern(IntentCategory::Code, "minimal repro", 0.9).unwrap();
        store.add_success_pattern(IntentCategory::Creative, "vivid opening line", 0.95).unwrap();
        let top = store.get_top_success_patterns(1).unwrap();
        assert_eq!(top.len(), 1);
        assert_eq!(top[0].category, IntentCategory::Creative);
    }

    #[tokio::test]
    async fn compress_history_inserts_summary_for_long_conversations() {
        let store = test_store();
        let conv = store.create_conversation("test").await.unwrap();
        for i in 0..6 {
            store
                .add_message(conv.id, MessageRole::User, &format!("message {i}"), None, None)
                .await
                .unwrap();
        }
        store.compress_history(conv.id).await.unwrap();
        let summary = store.latest_summary(conv.id).unwrap();
        assert!(summary.is_some());
    }
}
