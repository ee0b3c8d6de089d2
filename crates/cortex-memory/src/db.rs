use rusqlite::{Connection, Result};

/// Initialise memory tables. Safe to call on every startup (idempotent).
pub fn init_db(conn: &Connection) -> Result<()> {
    create_conversations_table(conn)?;
    create_messages_table(conn)?;
    create_summaries_table(conn)?;
    create_facts_table(conn)?;
    create_facts_fts_index(conn)?;
    create_user_profile_table(conn)?;
    create_success_patterns_table(conn)?;
    create_fact_effectiveness_table(conn)?;
    Ok(())
}

fn create_conversations_table(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS conversations (
            id                  INTEGER PRIMARY KEY AUTOINCREMENT,
            title               TEXT NOT NULL DEFAULT '',
            message_count       INTEGER NOT NULL DEFAULT 0,
            compress_retries    INTEGER NOT NULL DEFAULT 0,
            created_at          TEXT NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_conversations_created
            ON conversations(created_at DESC);",
    )
}

fn create_messages_table(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS messages (
            id              INTEGER PRIMARY KEY AUTOINCREMENT,
            conversation_id INTEGER NOT NULL REFERENCES conversations(id) ON DELETE CASCADE,
            role            TEXT NOT NULL,
            content         TEXT NOT NULL,
            model_used      TEXT,
            token_count     INTEGER,
            created_at      TEXT NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_messages_conversation
            ON messages(conversation_id, id);",
    )
}

/// One row per compacted prefix. A conversation may accumulate more than one
/// summary as it grows; `get_smart_context` always reads the most recent.
fn create_summaries_table(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS conversation_summaries (
            id                      INTEGER PRIMARY KEY AUTOINCREMENT,
            conversation_id         INTEGER NOT NULL REFERENCES conversations(id) ON DELETE CASCADE,
            summary_text            TEXT NOT NULL,
            messages_covered_from   INTEGER NOT NULL,
            messages_covered_to     INTEGER NOT NULL,
            created_at              TEXT NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_summaries_conversation
            ON conversation_summaries(conversation_id, messages_covered_to DESC);",
    )
}

/// Embeddings are stored as little-endian f32 blobs of fixed length (the
/// Embedding Service's configured dimensionality); see `embedding_codec`.
fn create_facts_table(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS facts (
            id                  INTEGER PRIMARY KEY AUTOINCREMENT,
            conversation_id     INTEGER REFERENCES conversations(id) ON DELETE SET NULL,
            content             TEXT NOT NULL,
            category            TEXT NOT NULL,
            embedding           BLOB NOT NULL,
            confidence          REAL NOT NULL DEFAULT 0.7,
            created_at          TEXT NOT NULL,
            last_used           TEXT,
            usage_count         INTEGER NOT NULL DEFAULT 0,
            positive_outcomes   INTEGER NOT NULL DEFAULT 0,
            negative_outcomes   INTEGER NOT NULL DEFAULT 0
        );
        CREATE INDEX IF NOT EXISTS idx_facts_category
            ON facts(category);",
    )
}

/// Keyword fallback search over fact content when embeddings are unavailable
/// (same external-content pattern used for the rest of the corpus's FTS5
/// tables: synced manually on write rather than via triggers).
fn create_facts_fts_index(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE VIRTUAL TABLE IF NOT EXISTS facts_fts
            USING fts5(content, content='facts', content_rowid='id');",
    )
}

/// Single-row table: multi-tenant user accounts are a non-goal, there is
/// exactly one local user.
fn create_user_profile_table(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS user_profile (
            id              INTEGER PRIMARY KEY CHECK (id = 1),
            display_name    TEXT NOT NULL DEFAULT 'user',
            verbosity       TEXT NOT NULL DEFAULT 'normal',
            created_at      TEXT NOT NULL
        );",
    )
}

/// A working pattern distilled from past successful interactions, prefetched
/// by the Context Primer (spec §4.5, §4.8).
fn create_success_patterns_table(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS success_patterns (
            id                      INTEGER PRIMARY KEY AUTOINCREMENT,
            category                TEXT NOT NULL,
            pattern_text            TEXT NOT NULL,
            effectiveness_score     REAL NOT NULL DEFAULT 0.5,
            usage_count             INTEGER NOT NULL DEFAULT 0,
            created_at              TEXT NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_success_patterns_category
            ON success_patterns(category, effectiveness_score DESC);",
    )
}

/// Per-interaction event log backing `facts.positive_outcomes` /
/// `negative_outcomes`: one row per time a fact was used and the
/// user's reaction to it was later classified. Kept separate from the
/// aggregate counters on `facts` so the counters can be recomputed or
/// audited without replaying conversation history.
fn create_fact_effectiveness_table(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS fact_effectiveness (
            id              INTEGER PRIMARY KEY AUTOINCREMENT,
            fact_id         INTEGER NOT NULL REFERENCES facts(id) ON DELETE CASCADE,
            message_id      INTEGER REFERENCES messages(id) ON DELETE SET NULL,
            was_positive    INTEGER NOT NULL,
            created_at      TEXT NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_fact_effectiveness_fact
            ON fact_effectiveness(fact_id);",
    )
}

/// Encode/decode `Vec<f32>` as a little-endian byte blob for the `BLOB`
/// embedding columns above.
pub mod embedding_codec {
    pub fn encode(v: &[f32]) -> Vec<u8> {
        let mut out = Vec::with_capacity(v.len() * 4);
        for x in v {
            out.extend_from_slice(&x.to_le_bytes());
        }
        out
    }

    pub fn decode(bytes: &[u8]) -> Vec<f32> {
        bytes
            .chunks_exact(4)
            .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
            .collect()
    }
}
