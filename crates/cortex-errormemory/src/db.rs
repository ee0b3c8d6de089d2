use rusqlite::{Connection, Result};

/// Initialise the corrections table. Safe to call on every startup.
pub fn init_db(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS corrections (
            id                      INTEGER PRIMARY KEY AUTOINCREMENT,
            original_message_id    INTEGER NOT NULL,
            correction_message_id  INTEGER NOT NULL,
            original_response      TEXT NOT NULL,
            user_correction        TEXT NOT NULL,
            category                TEXT NOT NULL,
            embedding               BLOB NOT NULL,
            occurrences             INTEGER NOT NULL DEFAULT 1,
            created_at              TEXT NOT NULL,
            last_used               TEXT
        );
        CREATE INDEX IF NOT EXISTS idx_corrections_created
            ON corrections(created_at DESC);",
    )
}

/// Encode/decode `Vec<f32>` as a little-endian byte blob — kept local to
/// this crate so Error Memory never needs to reach into the Memory Store's
/// schema to read or write the vectors it exclusively owns.
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
