pub mod db;
pub mod error;

use std::sync::{Arc, Mutex};

use chrono::{Duration, Utc};
use rusqlite::{params, Connection};
use tracing::{debug, info};

use cortex_core::types::{CorrectionCategory, CorrectionEntry};
use cortex_embedding::{cosine_similarity, EmbeddingService};

pub use error::{ErrorMemoryError, Result};

/// Cosine similarity above which a new correction is treated as a repeat of
/// an existing [`CorrectionEntry`] rather than a new one.
const DUPLICATE_THRESHOLD: f32 = 0.85;
/// `get_warning` only looks at corrections logged within this window.
const WARNING_WINDOW_DAYS: i64 = 30;
/// Hard cap on candidates scored per `get_warning` call.
const MAX_CANDIDATES: usize = 100;
/// Minimum similarity for a correction to surface as a warning.
const WARNING_THRESHOLD: f32 = 0.7;
const WARNING_TOP_K: usize = 5;

/// Remembers past user corrections so the Cognitive Conductor can steer away
/// from repeating them (spec C9 Error Memory).
pub struct ErrorMemory {
    conn: Mutex<Connection>,
    embedding: Arc<EmbeddingService>,
}

impl ErrorMemory {
    pub fn new(conn: Connection, embedding: Arc<EmbeddingService>) -> Self {
        Self {
            conn: Mutex::new(conn),
            embedding,
        }
    }

    /// Rule-based correction detector: looks for the user directly disputing
    /// or redirecting the assistant's prior turn. Intentionally coarse —
    /// false negatives just mean a correction goes unlogged, not a crash.
    pub fn detect_correction(&self, user_message: &str) -> Option<CorrectionCategory> {
        let m = user_message.to_lowercase();

        const MISUNDERSTANDING: &[&str] = &["that's not what i", "i meant", "no, i asked", "you misunderstood"];
        const CONTENT: &[&str] = &["that's wrong", "incorrect", "that's not right", "actually no"];
        const STYLE: &[&str] = &["too long", "too verbose", "be more concise", "stop using"];

        if MISUNDERSTANDING.iter().any(|p| m.contains(p)) {
            Some(CorrectionCategory::Misunderstanding)
        } else if CONTENT.iter().any(|p| m.contains(p)) {
            Some(CorrectionCategory::Content)
        } else if STYLE.iter().any(|p| m.contains(p)) {
            Some(CorrectionCategory::Style)
        } else if m.starts_with("no") || m.starts_with("actually") {
            Some(CorrectionCategory::Other)
        } else {
            None
        }
    }

    /// Logs a correction. Embeds `category + original_response[:200]`; if an
    /// existing entry is a near-duplicate (cosine >= [`DUPLICATE_THRESHOLD`])
    /// its occurrence count is bumped instead of inserting a new row.
    pub async fn record_correction(
        &self,
        original_message_id: i64,
        correction_message_id: i64,
        original_response: &str,
        user_correction: &str,
        category: CorrectionCategory,
    ) -> Result<CorrectionEntry> {
        let snippet: String = original_response.chars().take(200).collect();
        let embed_input = format!("{category}: {snippet}");
        let embedding = self.embedding.embed(&embed_input).await?;

        if let Some(existing_id) = self.find_duplicate(&embedding, category)? {
            return self.bump_occurrence(existing_id);
        }

        let now = Utc::now().to_rfc3339();
        let blob = db::embedding_codec::encode(&embedding);
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO corrections
             (original_message_id, correction_message_id, original_response, user_correction,
              category, embedding, occurrences, created_at, last_used)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, 1, ?7, ?7)",
            params![
                original_message_id,
                correction_message_id,
                original_response,
                user_correction,
                category.to_string(),
                blob,
                now,
            ],
        )?;
        let id = conn.last_insert_rowid();
        info!(id, %category, "logged new correction");

        Ok(CorrectionEntry {
            id,
            original_message_id,
            correction_message_id,
            original_response: original_response.to_string(),
            user_correction: user_correction.to_string(),
            category,
            embedding,
            occurrences: 1,
            created_at: now.clone(),
            last_used: Some(now),
        })
    }

    fn find_duplicate(&self, embedding: &[f32], category: CorrectionCategory) -> Result<Option<i64>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT id, embedding FROM corrections WHERE category = ?1 ORDER BY created_at DESC LIMIT ?2",
        )?;
        let rows: Vec<(i64, Vec<u8>)> = stmt
            .query_map(params![category.to_string(), MAX_CANDIDATES], |row| {
                Ok((row.get(0)?, row.get(1)?))
            })?
            .filter_map(|r| r.ok())
            .collect();

        for (id, blob) in rows {
            let candidate = db::embedding_codec::decode(&blob);
            if cosine_similarity(embedding, &candidate) >= DUPLICATE_THRESHOLD {
                return Ok(Some(id));
            }
        }
        Ok(None)
    }

    fn bump_occurrence(&self, id: i64) -> Result<CorrectionEntry> {
        let now = Utc::now().to_rfc3339();
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "UPDATE corrections SET occurrences = occurrences + 1, last_used = ?1 WHERE id = ?2",
            params![now, id],
        )?;
        let entry = conn.query_row(
            "SELECT id, original_message_id, correction_message_id, original_response, user_correction,
                    category, embedding, occurrences, created_at, last_used
             FROM corrections WHERE id = ?1",
            params![id],
            row_to_entry,
        )?;
        debug!(id, occurrences = entry.occurrences, "bumped correction occurrence");
        Ok(entry)
    }

    /// Returns up to [`WARNING_TOP_K`] past corrections whose embedding is
    /// similar to `candidate_response`, restricted to the last
    /// [`WARNING_WINDOW_DAYS`] days and at most [`MAX_CANDIDATES`] rows
    /// scored (spec §4.9).
    pub async fn get_warning(&self, candidate_response: &str) -> Result<Vec<CorrectionEntry>> {
        let query_embedding = self.embedding.embed(candidate_response).await?;
        self.get_warning_for_embedding(&query_embedding)
    }

    /// Same lookup as [`Self::get_warning`] but takes an already-computed
    /// embedding, so a caller that already embedded the candidate response
    /// for another purpose (e.g. the Conductor's CHECK stage scoring it
    /// against primed context) doesn't pay for a second embedding call.
    pub fn get_warning_for_embedding(&self, query_embedding: &[f32]) -> Result<Vec<CorrectionEntry>> {
        let cutoff = (Utc::now() - Duration::days(WARNING_WINDOW_DAYS)).to_rfc3339();

        let rows: Vec<CorrectionEntry> = {
            let conn = self.conn.lock().unwrap();
            let mut stmt = conn.prepare(
                "SELECT id, original_message_id, correction_message_id, original_response, user_correction,
                        category, embedding, occurrences, created_at, last_used
                 FROM corrections WHERE created_at >= ?1 ORDER BY created_at DESC LIMIT ?2",
            )?;
            stmt.query_map(params![cutoff, MAX_CANDIDATES], row_to_entry)?
                .filter_map(|r| r.ok())
                .collect()
        };

        let mut scored: Vec<(f32, CorrectionEntry)> = rows
            .into_iter()
            .map(|e| {
                let sim = cosine_similarity(&query_embedding, &e.embedding);
                (sim, e)
            })
            .filter(|(sim, _)| *sim >= WARNING_THRESHOLD)
            .collect();

        scored.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(std::cmp::Ordering::Equal));
        scored.truncate(WARNING_TOP_K);
        Ok(scored.into_iter().map(|(_, e)| e).collect())
    }
}

/// Renders the top warning as the short steering note the Conductor injects
/// into its CHECK/STEER prompts (spec §4.9 "In the past, X failed — prefer
/// Y."). Returns `None` when there is nothing to warn about.
pub fn format_warning(entries: &[CorrectionEntry]) -> Option<String> {
    let top = entries.first()?;
    Some(format!(
        "In the past, a similar response led to a {} correction: \"{}\" — the user preferred: \"{}\".",
        top.category,
        truncate(&top.original_response, 160),
        truncate(&top.user_correction, 160),
    ))
}

fn truncate(s: &str, max_chars: usize) -> String {
    if s.chars().count() <= max_chars {
        s.to_string()
    } else {
        s.chars().take(max_chars).collect::<String>() + "…"
    }
}

impl ErrorMemory {
    /// Most recent corrections regardless of similarity, for the
    /// Self-Reflection Builder's "last 3 correction entries" block (spec
    /// §4.8) — unlike [`Self::get_warning`], this isn't a similarity search.
    pub fn recent_corrections(&self, limit: usize) -> Result<Vec<CorrectionEntry>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT id, original_message_id, correction_message_id, original_response, user_correction,
                    category, embedding, occurrences, created_at, last_used
             FROM corrections ORDER BY created_at DESC LIMIT ?1",
        )?;
        let rows = stmt.query_map(params![limit], row_to_entry)?;
        Ok(rows.filter_map(|r| r.ok()).collect())
    }
}

fn row_to_entry(row: &rusqlite::Row<'_>) -> rusqlite::Result<CorrectionEntry> {
    let category_str: String = row.get(5)?;
    let blob: Vec<u8> = row.get(6)?;
    Ok(CorrectionEntry {
        id: row.get(0)?,
        original_message_id: row.get(1)?,
        correction_message_id: row.get(2)?,
        original_response: row.get(3)?,
        user_correction: row.get(4)?,
        category: category_str.parse().unwrap_or(CorrectionCategory::Other),
        embedding: db::embedding_codec::decode(&blob),
        occurrences: row.get(7)?,
        created_at: row.get(8)?,
        last_used: row.get(9)?,
    })
}
