use rusqlite::{Connection, Result};

/// Initialise reflection tables. Safe to call on every startup (idempotent).
pub fn init_db(conn: &Connection) -> Result<()> {
    create_interaction_outcomes_table(conn)?;
    create_daily_metrics_table(conn)?;
    create_achievements_table(conn)?;
    create_verification_logs_table(conn)?;
    Ok(())
}

/// Append-only log backing the IQ/Empathy rolling-window aggregates (spec
/// §4.12, §3 InteractionOutcome).
fn create_interaction_outcomes_table(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS interaction_outcomes (
            id                      INTEGER PRIMARY KEY AUTOINCREMENT,
            message_id              INTEGER NOT NULL,
            category                TEXT NOT NULL DEFAULT 'QUICK',
            was_correction          INTEGER NOT NULL,
            implicit_positive       INTEGER NOT NULL,
            implicit_negative       INTEGER NOT NULL,
            facts_in_context        INTEGER NOT NULL,
            style_prompt_length     INTEGER NOT NULL,
            confidence_score        REAL NOT NULL,
            latency_ms              INTEGER NOT NULL,
            tokens_generated        INTEGER NOT NULL,
            created_at              TEXT NOT NULL
        );
        CREATE UNIQUE INDEX IF NOT EXISTS idx_interaction_outcomes_message
            ON interaction_outcomes(message_id);
        CREATE INDEX IF NOT EXISTS idx_interaction_outcomes_created
            ON interaction_outcomes(created_at DESC);",
    )
}

/// One row per calendar day; `record()` upserts today's row whenever the
/// recomputed rolling window changes its aggregate (spec §4.12).
fn create_daily_metrics_table(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS daily_metrics (
            date                TEXT PRIMARY KEY,
            iq_score            REAL NOT NULL,
            iq_breakdown        TEXT NOT NULL,
            empathy_score       REAL NOT NULL,
            empathy_breakdown   TEXT NOT NULL,
            updated_at          TEXT NOT NULL
        );",
    )
}

/// Positive-streak milestone unlocks, derived from the same streak length
/// `build_prompt` reports in its motivational sentence (spec §4.8).
fn create_achievements_table(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS achievements (
            id              INTEGER PRIMARY KEY AUTOINCREMENT,
            name            TEXT NOT NULL UNIQUE,
            streak_length   INTEGER NOT NULL,
            unlocked_at     TEXT NOT NULL
        );",
    )
}

/// One row per CHECK-stage verdict emitted by the Cognitive Conductor
/// (spec §4.10 verdict protocol, §8 testable property 6).
fn create_verification_logs_table(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS verification_logs (
            id              INTEGER PRIMARY KEY AUTOINCREMENT,
            message_id      INTEGER NOT NULL,
            window_index    INTEGER NOT NULL,
            action          TEXT NOT NULL,
            reason          TEXT NOT NULL,
            created_at      TEXT NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_verification_logs_message
            ON verification_logs(message_id, window_index);",
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn init_db_is_idempotent() {
        let conn = Connection::open_in_memory().unwrap();
        init_db(&conn).unwrap();
        init_db(&conn).unwrap();
    }
}
