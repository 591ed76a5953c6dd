//! Knowledge store: raw tickets/anomalies and the standardized
//! phenomenon/root-cause graph.
//!
//! Reads treat missing rows as empty sets, never as errors. The full
//! rebuild replaces every standardized table inside one transaction, so
//! concurrent readers only ever observe the previous complete graph or the
//! new one.

use crate::schema::{SCHEMA_SQL, STANDARDIZED_TABLES};
use dbdiag_core::knowledge::{
    Phenomenon, PhenomenonRootCause, RawAnomaly, RawRootCause, RawTicket, RootCause, Ticket,
    TicketImport, TicketIndexEntry,
};
use dbdiag_core::vector::{deserialize_f32, serialize_f32};
use dbdiag_core::{Error, Result};
use rusqlite::{params, Connection};
use std::collections::HashSet;
use std::path::Path;
use std::sync::Mutex;
use tracing::{debug, info};

fn storage_err(e: rusqlite::Error) -> Error {
    Error::storage(e.to_string())
}

/// Outcome of one raw-ticket import.
#[derive(Debug, Clone, Copy, Default)]
pub struct ImportStats {
    pub imported: usize,
    pub skipped: usize,
    pub anomalies: usize,
}

/// Everything the index builder produces for one rebuild.
#[derive(Debug, Default)]
pub struct RebuildArtifacts {
    pub phenomena: Vec<Phenomenon>,
    pub raw_root_causes: Vec<RawRootCause>,
    pub root_causes: Vec<RootCause>,
    pub tickets: Vec<Ticket>,
    pub ticket_phenomena: Vec<dbdiag_core::knowledge::TicketPhenomenon>,
    pub phenomenon_root_causes: Vec<PhenomenonRootCause>,
    pub ticket_index: Vec<TicketIndexEntry>,
}

/// Row counts written by one rebuild.
#[derive(Debug, Clone, Copy, Default)]
pub struct RebuildStats {
    pub phenomena: usize,
    pub raw_root_causes: usize,
    pub root_causes: usize,
    pub tickets: usize,
    pub ticket_phenomena: usize,
    pub phenomenon_root_causes: usize,
    pub ticket_index: usize,
}

/// SQLite-backed knowledge store.
pub struct KnowledgeStore {
    conn: Mutex<Connection>,
}

impl std::fmt::Debug for KnowledgeStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KnowledgeStore").finish()
    }
}

impl KnowledgeStore {
    /// Open (or create) the store at the given path and apply the schema.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)
                    .map_err(|e| Error::storage(format!("cannot create {}: {e}", parent.display())))?;
            }
        }
        let conn = Connection::open(path).map_err(storage_err)?;
        Self::from_connection(conn)
    }

    /// In-memory store for tests.
    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().map_err(storage_err)?;
        Self::from_connection(conn)
    }

    fn from_connection(conn: Connection) -> Result<Self> {
        conn.pragma_update(None, "journal_mode", "WAL").ok();
        conn.pragma_update(None, "busy_timeout", 5000)
            .map_err(storage_err)?;
        conn.execute_batch(SCHEMA_SQL).map_err(storage_err)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Connection> {
        // A poisoned lock means a panic mid-statement; propagating the
        // poison here would mask the original panic.
        self.conn.lock().unwrap_or_else(|e| e.into_inner())
    }

    // =========================================================================
    // Raw tables (append-only)
    // =========================================================================

    /// Append tickets and their anomalies to the raw tables. Tickets whose
    /// id already exists are skipped.
    pub fn import_tickets(&self, tickets: &[TicketImport]) -> Result<ImportStats> {
        let mut conn = self.lock();
        let tx = conn.transaction().map_err(storage_err)?;
        let mut stats = ImportStats::default();

        for ticket in tickets {
            let inserted = tx
                .execute(
                    "INSERT OR IGNORE INTO raw_tickets
                     (ticket_id, description, root_cause, solution, metadata)
                     VALUES (?1, ?2, ?3, ?4, ?5)",
                    params![
                        ticket.ticket_id,
                        ticket.description,
                        ticket.root_cause,
                        ticket.solution,
                        serde_json::to_string(&ticket.metadata)?,
                    ],
                )
                .map_err(storage_err)?;

            if inserted == 0 {
                stats.skipped += 1;
                continue;
            }
            stats.imported += 1;

            for (index, anomaly) in ticket.anomalies.iter().enumerate() {
                let index = index as u32;
                tx.execute(
                    "INSERT INTO raw_anomalies
                     (id, ticket_id, idx, description, observation_method, why_relevant)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                    params![
                        RawAnomaly::derive_id(&ticket.ticket_id, index),
                        ticket.ticket_id,
                        index,
                        anomaly.description,
                        anomaly.observation_method,
                        anomaly.why_relevant,
                    ],
                )
                .map_err(storage_err)?;
                stats.anomalies += 1;
            }
        }

        tx.commit().map_err(storage_err)?;
        info!(
            imported = stats.imported,
            skipped = stats.skipped,
            anomalies = stats.anomalies,
            "raw ticket import finished"
        );
        Ok(stats)
    }

    /// All raw anomalies in `(ticket_id, index)` lexicographic order - the
    /// mandatory clustering iteration order.
    pub fn raw_anomalies_ordered(&self) -> Result<Vec<RawAnomaly>> {
        let conn = self.lock();
        let mut stmt = conn
            .prepare(
                "SELECT id, ticket_id, idx, description, observation_method, why_relevant
                 FROM raw_anomalies ORDER BY ticket_id, idx",
            )
            .map_err(storage_err)?;
        let rows = stmt
            .query_map([], |row| {
                Ok(RawAnomaly {
                    id: row.get(0)?,
                    ticket_id: row.get(1)?,
                    index: row.get(2)?,
                    description: row.get(3)?,
                    observation_method: row.get(4)?,
                    why_relevant: row.get(5)?,
                })
            })
            .map_err(storage_err)?;
        rows.collect::<rusqlite::Result<Vec<_>>>().map_err(storage_err)
    }

    /// All raw tickets ordered by ticket id (stable root-cause dedup order).
    pub fn raw_tickets_ordered(&self) -> Result<Vec<RawTicket>> {
        let conn = self.lock();
        let mut stmt = conn
            .prepare(
                "SELECT ticket_id, description, root_cause, solution, metadata
                 FROM raw_tickets ORDER BY ticket_id",
            )
            .map_err(storage_err)?;
        let rows = stmt
            .query_map([], |row| {
                let metadata: String = row.get(4)?;
                Ok(RawTicket {
                    ticket_id: row.get(0)?,
                    description: row.get(1)?,
                    root_cause_text: row.get(2)?,
                    solution: row.get(3)?,
                    metadata: serde_json::from_str(&metadata).unwrap_or(serde_json::Value::Null),
                })
            })
            .map_err(storage_err)?;
        rows.collect::<rusqlite::Result<Vec<_>>>().map_err(storage_err)
    }

    // =========================================================================
    // Rebuild (destructive, single transaction)
    // =========================================================================

    /// Replace every standardized table with the given artifacts. All-or-
    /// nothing: on failure the previous graph remains intact.
    pub fn rebuild(&self, artifacts: &RebuildArtifacts) -> Result<RebuildStats> {
        let mut conn = self.lock();
        let tx = conn.transaction().map_err(storage_err)?;

        for table in STANDARDIZED_TABLES {
            tx.execute(&format!("DELETE FROM {table}"), [])
                .map_err(storage_err)?;
        }

        for p in &artifacts.phenomena {
            tx.execute(
                "INSERT INTO phenomena
                 (phenomenon_id, description, observation_method, source_anomaly_ids,
                  cluster_size, embedding)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    p.id,
                    p.description,
                    p.observation_method,
                    serde_json::to_string(&p.source_anomaly_ids)?,
                    p.cluster_size,
                    serialize_f32(&p.embedding),
                ],
            )
            .map_err(storage_err)?;
        }

        for rrc in &artifacts.raw_root_causes {
            tx.execute(
                "INSERT INTO raw_root_causes
                 (raw_root_cause_id, description, solution, source_ticket_ids, ticket_count)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    rrc.id,
                    rrc.description,
                    rrc.solution,
                    serde_json::to_string(&rrc.source_ticket_ids)?,
                    rrc.ticket_count,
                ],
            )
            .map_err(storage_err)?;
        }

        for rc in &artifacts.root_causes {
            tx.execute(
                "INSERT INTO root_causes
                 (root_cause_id, description, solution, source_raw_root_cause_ids,
                  cluster_size, ticket_count, embedding)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                params![
                    rc.id,
                    rc.description,
                    rc.solution,
                    serde_json::to_string(&rc.source_raw_root_cause_ids)?,
                    rc.cluster_size,
                    rc.ticket_count,
                    serialize_f32(&rc.embedding),
                ],
            )
            .map_err(storage_err)?;
        }

        for t in &artifacts.tickets {
            tx.execute(
                "INSERT OR REPLACE INTO tickets (ticket_id, description, root_cause_id, solution)
                 VALUES (?1, ?2, ?3, ?4)",
                params![t.ticket_id, t.description, t.root_cause_id, t.solution],
            )
            .map_err(storage_err)?;
        }

        for tp in &artifacts.ticket_phenomena {
            tx.execute(
                "INSERT OR IGNORE INTO ticket_phenomena
                 (ticket_id, phenomenon_id, why_relevant, raw_anomaly_id)
                 VALUES (?1, ?2, ?3, ?4)",
                params![tp.ticket_id, tp.phenomenon_id, tp.why_relevant, tp.raw_anomaly_id],
            )
            .map_err(storage_err)?;
        }

        for prc in &artifacts.phenomenon_root_causes {
            tx.execute(
                "INSERT INTO phenomenon_root_causes (phenomenon_id, root_cause_id, ticket_count)
                 VALUES (?1, ?2, ?3)",
                params![prc.phenomenon_id, prc.root_cause_id, prc.ticket_count],
            )
            .map_err(storage_err)?;
        }

        for entry in &artifacts.ticket_index {
            tx.execute(
                "INSERT INTO ticket_index
                 (ticket_id, description, root_cause, solution, combined_text, embedding)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    entry.ticket_id,
                    entry.description,
                    entry.root_cause_text,
                    entry.solution,
                    entry.combined_text,
                    serialize_f32(&entry.embedding),
                ],
            )
            .map_err(storage_err)?;
        }

        tx.commit().map_err(storage_err)?;

        let stats = RebuildStats {
            phenomena: artifacts.phenomena.len(),
            raw_root_causes: artifacts.raw_root_causes.len(),
            root_causes: artifacts.root_causes.len(),
            tickets: artifacts.tickets.len(),
            ticket_phenomena: artifacts.ticket_phenomena.len(),
            phenomenon_root_causes: artifacts.phenomenon_root_causes.len(),
            ticket_index: artifacts.ticket_index.len(),
        };
        info!(
            phenomena = stats.phenomena,
            root_causes = stats.root_causes,
            tickets = stats.tickets,
            "standardized tables rebuilt"
        );
        Ok(stats)
    }

    // =========================================================================
    // Standardized readers
    // =========================================================================

    fn phenomenon_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Phenomenon> {
        let source_ids: String = row.get(3)?;
        let embedding: Option<Vec<u8>> = row.get(5)?;
        Ok(Phenomenon {
            id: row.get(0)?,
            description: row.get(1)?,
            observation_method: row.get(2)?,
            source_anomaly_ids: serde_json::from_str(&source_ids).unwrap_or_default(),
            cluster_size: row.get(4)?,
            embedding: embedding.map(|b| deserialize_f32(&b)).unwrap_or_default(),
        })
    }

    const PHENOMENON_COLS: &'static str =
        "phenomenon_id, description, observation_method, source_anomaly_ids, cluster_size, embedding";

    /// All phenomena that carry an embedding.
    pub fn phenomena_with_embeddings(&self) -> Result<Vec<Phenomenon>> {
        let conn = self.lock();
        let mut stmt = conn
            .prepare(&format!(
                "SELECT {} FROM phenomena WHERE embedding IS NOT NULL ORDER BY phenomenon_id",
                Self::PHENOMENON_COLS
            ))
            .map_err(storage_err)?;
        let rows = stmt
            .query_map([], Self::phenomenon_from_row)
            .map_err(storage_err)?;
        rows.collect::<rusqlite::Result<Vec<_>>>().map_err(storage_err)
    }

    pub fn phenomenon_by_id(&self, phenomenon_id: &str) -> Result<Option<Phenomenon>> {
        let conn = self.lock();
        let mut stmt = conn
            .prepare(&format!(
                "SELECT {} FROM phenomena WHERE phenomenon_id = ?1",
                Self::PHENOMENON_COLS
            ))
            .map_err(storage_err)?;
        let mut rows = stmt
            .query_map(params![phenomenon_id], Self::phenomenon_from_row)
            .map_err(storage_err)?;
        match rows.next() {
            Some(row) => Ok(Some(row.map_err(storage_err)?)),
            None => Ok(None),
        }
    }

    /// Phenomena by id, preserving input order; unknown ids are skipped.
    pub fn phenomena_by_ids(&self, ids: &[String]) -> Result<Vec<Phenomenon>> {
        let mut out = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(p) = self.phenomenon_by_id(id)? {
                out.push(p);
            }
        }
        Ok(out)
    }

    /// Deduplicated union of phenomena observed by any of the given tickets.
    pub fn phenomena_by_ticket_ids(&self, ticket_ids: &[String]) -> Result<Vec<Phenomenon>> {
        if ticket_ids.is_empty() {
            return Ok(Vec::new());
        }
        let mut seen = HashSet::new();
        let mut out = Vec::new();
        let conn = self.lock();
        let mut stmt = conn
            .prepare(&format!(
                "SELECT DISTINCT {} FROM phenomena p
                 JOIN ticket_phenomena tp ON p.phenomenon_id = tp.phenomenon_id
                 WHERE tp.ticket_id = ?1",
                "p.phenomenon_id, p.description, p.observation_method, p.source_anomaly_ids, p.cluster_size, p.embedding"
            ))
            .map_err(storage_err)?;
        for ticket_id in ticket_ids {
            let rows = stmt
                .query_map(params![ticket_id], Self::phenomenon_from_row)
                .map_err(storage_err)?;
            for row in rows {
                let p = row.map_err(storage_err)?;
                if seen.insert(p.id.clone()) {
                    out.push(p);
                }
            }
        }
        Ok(out)
    }

    /// `(ticket_id, root_cause_id)` pairs for tickets observing a phenomenon.
    pub fn tickets_for_phenomenon(&self, phenomenon_id: &str) -> Result<Vec<(String, String)>> {
        let conn = self.lock();
        let mut stmt = conn
            .prepare(
                "SELECT DISTINCT tp.ticket_id, t.root_cause_id
                 FROM ticket_phenomena tp
                 JOIN tickets t ON tp.ticket_id = t.ticket_id
                 WHERE tp.phenomenon_id = ?1
                 ORDER BY tp.ticket_id",
            )
            .map_err(storage_err)?;
        let rows = stmt
            .query_map(params![phenomenon_id], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
            })
            .map_err(storage_err)?;
        rows.collect::<rusqlite::Result<Vec<_>>>().map_err(storage_err)
    }

    /// Every phenomenon id associated with a root cause.
    pub fn phenomena_for_root_cause(&self, root_cause_id: &str) -> Result<HashSet<String>> {
        let conn = self.lock();
        let mut stmt = conn
            .prepare(
                "SELECT phenomenon_id FROM phenomenon_root_causes WHERE root_cause_id = ?1",
            )
            .map_err(storage_err)?;
        let rows = stmt
            .query_map(params![root_cause_id], |row| row.get::<_, String>(0))
            .map_err(storage_err)?;
        rows.collect::<rusqlite::Result<HashSet<_>>>().map_err(storage_err)
    }

    /// Association rows for one phenomenon.
    pub fn root_causes_for_phenomenon(&self, phenomenon_id: &str) -> Result<Vec<PhenomenonRootCause>> {
        let conn = self.lock();
        let mut stmt = conn
            .prepare(
                "SELECT phenomenon_id, root_cause_id, ticket_count
                 FROM phenomenon_root_causes WHERE phenomenon_id = ?1 ORDER BY root_cause_id",
            )
            .map_err(storage_err)?;
        let rows = stmt
            .query_map(params![phenomenon_id], |row| {
                Ok(PhenomenonRootCause {
                    phenomenon_id: row.get(0)?,
                    root_cause_id: row.get(1)?,
                    ticket_count: row.get(2)?,
                })
            })
            .map_err(storage_err)?;
        rows.collect::<rusqlite::Result<Vec<_>>>().map_err(storage_err)
    }

    /// The largest co-occurrence ticket count across the whole corpus.
    pub fn max_association_ticket_count(&self) -> Result<usize> {
        let conn = self.lock();
        conn.query_row(
            "SELECT COALESCE(MAX(ticket_count), 0) FROM phenomenon_root_causes",
            [],
            |row| row.get::<_, i64>(0),
        )
        .map(|n| n as usize)
        .map_err(storage_err)
    }

    pub fn root_cause_by_id(&self, root_cause_id: &str) -> Result<Option<RootCause>> {
        let conn = self.lock();
        let mut stmt = conn
            .prepare(
                "SELECT root_cause_id, description, solution, source_raw_root_cause_ids,
                        cluster_size, ticket_count, embedding
                 FROM root_causes WHERE root_cause_id = ?1",
            )
            .map_err(storage_err)?;
        let mut rows = stmt
            .query_map(params![root_cause_id], |row| {
                let source_ids: String = row.get(3)?;
                let embedding: Option<Vec<u8>> = row.get(6)?;
                Ok(RootCause {
                    id: row.get(0)?,
                    description: row.get(1)?,
                    solution: row.get(2)?,
                    source_raw_root_cause_ids: serde_json::from_str(&source_ids).unwrap_or_default(),
                    cluster_size: row.get(4)?,
                    ticket_count: row.get(5)?,
                    embedding: embedding.map(|b| deserialize_f32(&b)).unwrap_or_default(),
                })
            })
            .map_err(storage_err)?;
        match rows.next() {
            Some(row) => Ok(Some(row.map_err(storage_err)?)),
            None => Ok(None),
        }
    }

    /// Processed tickets attributed to a root cause, for citations.
    pub fn tickets_by_root_cause(&self, root_cause_id: &str, limit: usize) -> Result<Vec<Ticket>> {
        let conn = self.lock();
        let mut stmt = conn
            .prepare(
                "SELECT ticket_id, description, root_cause_id, solution
                 FROM tickets WHERE root_cause_id = ?1 ORDER BY ticket_id LIMIT ?2",
            )
            .map_err(storage_err)?;
        let rows = stmt
            .query_map(params![root_cause_id, limit as i64], |row| {
                Ok(Ticket {
                    ticket_id: row.get(0)?,
                    description: row.get(1)?,
                    root_cause_id: row.get(2)?,
                    solution: row.get(3)?,
                })
            })
            .map_err(storage_err)?;
        rows.collect::<rusqlite::Result<Vec<_>>>().map_err(storage_err)
    }

    /// All raw-ticket index entries with embeddings.
    pub fn ticket_index_entries(&self) -> Result<Vec<TicketIndexEntry>> {
        let conn = self.lock();
        let mut stmt = conn
            .prepare(
                "SELECT ticket_id, description, root_cause, solution, combined_text, embedding
                 FROM ticket_index WHERE embedding IS NOT NULL ORDER BY ticket_id",
            )
            .map_err(storage_err)?;
        let rows = stmt
            .query_map([], |row| {
                let embedding: Option<Vec<u8>> = row.get(5)?;
                Ok(TicketIndexEntry {
                    ticket_id: row.get(0)?,
                    description: row.get(1)?,
                    root_cause_text: row.get(2)?,
                    solution: row.get(3)?,
                    combined_text: row.get(4)?,
                    embedding: embedding.map(|b| deserialize_f32(&b)).unwrap_or_default(),
                })
            })
            .map_err(storage_err)?;
        rows.collect::<rusqlite::Result<Vec<_>>>().map_err(storage_err)
    }

    /// All phenomena (no embedding requirement), for graph export.
    pub fn all_phenomena(&self) -> Result<Vec<Phenomenon>> {
        let conn = self.lock();
        let mut stmt = conn
            .prepare(&format!(
                "SELECT {} FROM phenomena ORDER BY phenomenon_id",
                Self::PHENOMENON_COLS
            ))
            .map_err(storage_err)?;
        let rows = stmt
            .query_map([], Self::phenomenon_from_row)
            .map_err(storage_err)?;
        rows.collect::<rusqlite::Result<Vec<_>>>().map_err(storage_err)
    }

    /// All root causes, for graph export.
    pub fn all_root_causes(&self) -> Result<Vec<RootCause>> {
        let conn = self.lock();
        let mut stmt = conn
            .prepare(
                "SELECT root_cause_id, description, solution, source_raw_root_cause_ids,
                        cluster_size, ticket_count, embedding
                 FROM root_causes ORDER BY root_cause_id",
            )
            .map_err(storage_err)?;
        let rows = stmt
            .query_map([], |row| {
                let source_ids: String = row.get(3)?;
                let embedding: Option<Vec<u8>> = row.get(6)?;
                Ok(RootCause {
                    id: row.get(0)?,
                    description: row.get(1)?,
                    solution: row.get(2)?,
                    source_raw_root_cause_ids: serde_json::from_str(&source_ids).unwrap_or_default(),
                    cluster_size: row.get(4)?,
                    ticket_count: row.get(5)?,
                    embedding: embedding.map(|b| deserialize_f32(&b)).unwrap_or_default(),
                })
            })
            .map_err(storage_err)?;
        rows.collect::<rusqlite::Result<Vec<_>>>().map_err(storage_err)
    }

    /// All association rows, for graph export and recommendation scoring.
    pub fn all_phenomenon_root_causes(&self) -> Result<Vec<PhenomenonRootCause>> {
        let conn = self.lock();
        let mut stmt = conn
            .prepare(
                "SELECT phenomenon_id, root_cause_id, ticket_count
                 FROM phenomenon_root_causes ORDER BY phenomenon_id, root_cause_id",
            )
            .map_err(storage_err)?;
        let rows = stmt
            .query_map([], |row| {
                Ok(PhenomenonRootCause {
                    phenomenon_id: row.get(0)?,
                    root_cause_id: row.get(1)?,
                    ticket_count: row.get(2)?,
                })
            })
            .map_err(storage_err)?;
        rows.collect::<rusqlite::Result<Vec<_>>>().map_err(storage_err)
    }

    /// Row counts per table, for `/status` and the CLI.
    pub fn table_counts(&self) -> Result<Vec<(String, usize)>> {
        let conn = self.lock();
        let mut out = Vec::new();
        for table in [
            "raw_tickets",
            "raw_anomalies",
            "phenomena",
            "root_causes",
            "tickets",
            "ticket_phenomena",
            "phenomenon_root_causes",
            "ticket_index",
        ] {
            let count: i64 = conn
                .query_row(&format!("SELECT COUNT(*) FROM {table}"), [], |row| row.get(0))
                .map_err(storage_err)?;
            out.push((table.to_string(), count as usize));
        }
        debug!(tables = out.len(), "collected table counts");
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dbdiag_core::knowledge::{AnomalyImport, TicketPhenomenon};

    fn sample_import() -> Vec<TicketImport> {
        vec![
            TicketImport {
                ticket_id: "T-0001".into(),
                metadata: serde_json::json!({"source": "unit"}),
                description: "queries slowed down".into(),
                root_cause: "missing index".into(),
                solution: "recreate index".into(),
                anomalies: vec![
                    AnomalyImport {
                        description: "slow query count high".into(),
                        observation_method: "check slow log".into(),
                        why_relevant: "direct symptom".into(),
                    },
                    AnomalyImport {
                        description: "cpu usage high".into(),
                        observation_method: "top".into(),
                        why_relevant: "secondary".into(),
                    },
                ],
            },
            TicketImport {
                ticket_id: "T-0002".into(),
                metadata: serde_json::Value::Null,
                description: "disk filled up".into(),
                root_cause: "log retention misconfigured".into(),
                solution: "rotate logs".into(),
                anomalies: vec![AnomalyImport {
                    description: "disk usage growing".into(),
                    observation_method: "df -h".into(),
                    why_relevant: "direct".into(),
                }],
            },
        ]
    }

    fn minimal_artifacts() -> RebuildArtifacts {
        RebuildArtifacts {
            phenomena: vec![Phenomenon {
                id: "P-0001".into(),
                description: "slow query count exceeds threshold".into(),
                observation_method: "check slow log".into(),
                source_anomaly_ids: vec!["T-0001_anomaly_0".into()],
                cluster_size: 1,
                embedding: vec![1.0, 0.0],
            }],
            raw_root_causes: vec![RawRootCause {
                id: "RRC-0001".into(),
                description: "missing index".into(),
                solution: "recreate index".into(),
                source_ticket_ids: vec!["T-0001".into()],
                ticket_count: 1,
                embedding: vec![1.0, 0.0],
            }],
            root_causes: vec![RootCause {
                id: "RC-0001".into(),
                description: "missing index".into(),
                solution: "recreate index".into(),
                source_raw_root_cause_ids: vec!["RRC-0001".into()],
                cluster_size: 1,
                ticket_count: 1,
                embedding: vec![1.0, 0.0],
            }],
            tickets: vec![Ticket {
                ticket_id: "T-0001".into(),
                description: "queries slowed down".into(),
                root_cause_id: "RC-0001".into(),
                solution: "recreate index".into(),
            }],
            ticket_phenomena: vec![TicketPhenomenon {
                ticket_id: "T-0001".into(),
                phenomenon_id: "P-0001".into(),
                why_relevant: "direct symptom".into(),
                raw_anomaly_id: "T-0001_anomaly_0".into(),
            }],
            phenomenon_root_causes: vec![PhenomenonRootCause {
                phenomenon_id: "P-0001".into(),
                root_cause_id: "RC-0001".into(),
                ticket_count: 1,
            }],
            ticket_index: vec![TicketIndexEntry {
                ticket_id: "T-0001".into(),
                description: "queries slowed down".into(),
                root_cause_text: "missing index".into(),
                solution: "recreate index".into(),
                combined_text: "combined".into(),
                embedding: vec![1.0, 0.0],
            }],
        }
    }

    #[test]
    fn test_import_skips_duplicates() {
        let store = KnowledgeStore::in_memory().unwrap();
        let stats = store.import_tickets(&sample_import()).unwrap();
        assert_eq!(stats.imported, 2);
        assert_eq!(stats.anomalies, 3);

        let again = store.import_tickets(&sample_import()).unwrap();
        assert_eq!(again.imported, 0);
        assert_eq!(again.skipped, 2);
        assert_eq!(again.anomalies, 0);
    }

    #[test]
    fn test_anomalies_ordered_by_ticket_and_index() {
        let store = KnowledgeStore::in_memory().unwrap();
        store.import_tickets(&sample_import()).unwrap();
        let anomalies = store.raw_anomalies_ordered().unwrap();
        let ids: Vec<_> = anomalies.iter().map(|a| a.id.as_str()).collect();
        assert_eq!(
            ids,
            vec!["T-0001_anomaly_0", "T-0001_anomaly_1", "T-0002_anomaly_0"]
        );
    }

    #[test]
    fn test_rebuild_round_trip() {
        let store = KnowledgeStore::in_memory().unwrap();
        store.import_tickets(&sample_import()).unwrap();
        let stats = store.rebuild(&minimal_artifacts()).unwrap();
        assert_eq!(stats.phenomena, 1);

        let phenomena = store.phenomena_with_embeddings().unwrap();
        assert_eq!(phenomena.len(), 1);
        assert_eq!(phenomena[0].embedding, vec![1.0, 0.0]);

        let related = store.phenomena_for_root_cause("RC-0001").unwrap();
        assert!(related.contains("P-0001"));

        let tickets = store.tickets_for_phenomenon("P-0001").unwrap();
        assert_eq!(tickets, vec![("T-0001".to_string(), "RC-0001".to_string())]);

        assert_eq!(store.max_association_ticket_count().unwrap(), 1);
    }

    #[test]
    fn test_rebuild_is_destructive() {
        let store = KnowledgeStore::in_memory().unwrap();
        store.rebuild(&minimal_artifacts()).unwrap();

        // Rebuild with empty artifacts wipes the previous graph.
        store.rebuild(&RebuildArtifacts::default()).unwrap();
        assert!(store.phenomena_with_embeddings().unwrap().is_empty());
        assert!(store.all_root_causes().unwrap().is_empty());
    }

    #[test]
    fn test_missing_rows_read_as_empty() {
        let store = KnowledgeStore::in_memory().unwrap();
        assert!(store.phenomenon_by_id("P-9999").unwrap().is_none());
        assert!(store.phenomena_for_root_cause("RC-9999").unwrap().is_empty());
        assert!(store.tickets_for_phenomenon("P-9999").unwrap().is_empty());
        assert_eq!(store.max_association_ticket_count().unwrap(), 0);
    }

    #[test]
    fn test_reopen_preserves_data() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("dbdiag.db");
        {
            let store = KnowledgeStore::open(&path).unwrap();
            store.import_tickets(&sample_import()).unwrap();
            store.rebuild(&minimal_artifacts()).unwrap();
        }
        let reopened = KnowledgeStore::open(&path).unwrap();
        assert_eq!(reopened.raw_anomalies_ordered().unwrap().len(), 3);
        assert_eq!(reopened.phenomena_with_embeddings().unwrap().len(), 1);
    }

    #[test]
    fn test_phenomena_by_ticket_ids_dedups() {
        let store = KnowledgeStore::in_memory().unwrap();
        store.rebuild(&minimal_artifacts()).unwrap();
        let phenomena = store
            .phenomena_by_ticket_ids(&["T-0001".into(), "T-0001".into()])
            .unwrap();
        assert_eq!(phenomena.len(), 1);
    }
}
