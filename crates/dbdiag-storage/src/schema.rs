//! Database schema for the knowledge store and the session store.
//!
//! Raw tables are append-only via import; standardized tables are rebuilt
//! destructively by the index builder. Embeddings are little-endian f32
//! blobs; list-valued columns are serialized JSON.

pub const SCHEMA_SQL: &str = r#"
-- Raw (author-curated) tickets
CREATE TABLE IF NOT EXISTS raw_tickets (
    ticket_id TEXT PRIMARY KEY,
    description TEXT NOT NULL,
    root_cause TEXT NOT NULL,
    solution TEXT NOT NULL DEFAULT '',
    metadata TEXT NOT NULL DEFAULT '{}',   -- opaque JSON
    created_at TIMESTAMP DEFAULT CURRENT_TIMESTAMP
);

-- Raw anomalies, zero-or-more per ticket
CREATE TABLE IF NOT EXISTS raw_anomalies (
    id TEXT PRIMARY KEY,                   -- "{ticket_id}_anomaly_{index}"
    ticket_id TEXT NOT NULL,
    idx INTEGER NOT NULL,
    description TEXT NOT NULL,
    observation_method TEXT NOT NULL DEFAULT '',
    why_relevant TEXT NOT NULL DEFAULT '',
    FOREIGN KEY(ticket_id) REFERENCES raw_tickets(ticket_id)
);

CREATE INDEX IF NOT EXISTS idx_raw_anomalies_ticket ON raw_anomalies(ticket_id, idx);

-- Standardized phenomena (clustered anomalies)
CREATE TABLE IF NOT EXISTS phenomena (
    phenomenon_id TEXT PRIMARY KEY,        -- "P-0001"
    description TEXT NOT NULL,
    observation_method TEXT NOT NULL DEFAULT '',
    source_anomaly_ids TEXT NOT NULL,      -- JSON array
    cluster_size INTEGER NOT NULL,
    embedding BLOB                         -- f32 little-endian
);

-- Deduplicated raw root-cause texts prior to clustering
CREATE TABLE IF NOT EXISTS raw_root_causes (
    raw_root_cause_id TEXT PRIMARY KEY,    -- "RRC-0001"
    description TEXT NOT NULL,
    solution TEXT NOT NULL DEFAULT '',
    source_ticket_ids TEXT NOT NULL,       -- JSON array
    ticket_count INTEGER NOT NULL
);

-- Standardized root causes (clustered raw root causes)
CREATE TABLE IF NOT EXISTS root_causes (
    root_cause_id TEXT PRIMARY KEY,        -- "RC-0001"
    description TEXT NOT NULL,
    solution TEXT NOT NULL DEFAULT '',
    source_raw_root_cause_ids TEXT NOT NULL, -- JSON array
    cluster_size INTEGER NOT NULL,
    ticket_count INTEGER NOT NULL,
    embedding BLOB
);

-- Processed tickets linked to their standardized root cause
CREATE TABLE IF NOT EXISTS tickets (
    ticket_id TEXT PRIMARY KEY,
    description TEXT NOT NULL,
    root_cause_id TEXT NOT NULL,
    solution TEXT NOT NULL DEFAULT '',
    FOREIGN KEY(root_cause_id) REFERENCES root_causes(root_cause_id)
);

CREATE INDEX IF NOT EXISTS idx_tickets_root_cause ON tickets(root_cause_id);

-- N:M ticket <-> phenomenon
CREATE TABLE IF NOT EXISTS ticket_phenomena (
    ticket_id TEXT NOT NULL,
    phenomenon_id TEXT NOT NULL,
    why_relevant TEXT NOT NULL DEFAULT '',
    raw_anomaly_id TEXT NOT NULL,
    PRIMARY KEY(ticket_id, phenomenon_id, raw_anomaly_id)
);

CREATE INDEX IF NOT EXISTS idx_ticket_phenomena_phenomenon ON ticket_phenomena(phenomenon_id);

-- N:M phenomenon <-> root cause with co-occurrence ticket counts
CREATE TABLE IF NOT EXISTS phenomenon_root_causes (
    phenomenon_id TEXT NOT NULL,
    root_cause_id TEXT NOT NULL,
    ticket_count INTEGER NOT NULL,
    PRIMARY KEY(phenomenon_id, root_cause_id)
);

CREATE INDEX IF NOT EXISTS idx_prc_root_cause ON phenomenon_root_causes(root_cause_id);

-- Raw-ticket semantic index (Hyb ticket search, RAR)
CREATE TABLE IF NOT EXISTS ticket_index (
    ticket_id TEXT PRIMARY KEY,
    description TEXT NOT NULL,
    root_cause TEXT NOT NULL,
    solution TEXT NOT NULL DEFAULT '',
    combined_text TEXT NOT NULL,
    embedding BLOB
);

-- Session store: one opaque JSON blob per session
CREATE TABLE IF NOT EXISTS sessions (
    session_id TEXT PRIMARY KEY,
    state TEXT NOT NULL,                   -- SessionState JSON
    updated_at TIMESTAMP DEFAULT CURRENT_TIMESTAMP
);
"#;

/// Standardized tables cleared at the start of every rebuild transaction.
pub const STANDARDIZED_TABLES: &[&str] = &[
    "phenomena",
    "raw_root_causes",
    "tickets",
    "root_causes",
    "ticket_phenomena",
    "phenomenon_root_causes",
    "ticket_index",
];

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_schema_applies_cleanly() {
        let conn = rusqlite::Connection::open_in_memory().unwrap();
        conn.execute_batch(SCHEMA_SQL).unwrap();
        // Re-applying must be a no-op.
        conn.execute_batch(SCHEMA_SQL).unwrap();
    }

    #[test]
    fn test_standardized_tables_exist_in_schema() {
        for table in STANDARDIZED_TABLES {
            assert!(
                SCHEMA_SQL.contains(&format!("CREATE TABLE IF NOT EXISTS {table}")),
                "missing table {table}"
            );
        }
    }
}
