//! Knowledge-store data models.
//!
//! Raw entities are append-only and populated by `import`; standardized
//! entities are rebuilt destructively by `rebuild-index`. Embeddings carry a
//! fixed dimension agreed at build time.

use serde::{Deserialize, Serialize};

/// One historical incident ticket as curated by the corpus authors.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawTicket {
    pub ticket_id: String,
    pub description: String,
    pub root_cause_text: String,
    pub solution: String,
    /// Opaque author-supplied metadata.
    #[serde(default)]
    pub metadata: serde_json::Value,
}

/// One observable anomaly recorded against a raw ticket.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawAnomaly {
    /// Derived id: `{ticket_id}_anomaly_{index}`.
    pub id: String,
    pub ticket_id: String,
    pub index: u32,
    pub description: String,
    pub observation_method: String,
    pub why_relevant: String,
}

impl RawAnomaly {
    /// The derived identifier for an anomaly at `index` within a ticket.
    pub fn derive_id(ticket_id: &str, index: u32) -> String {
        format!("{ticket_id}_anomaly_{index}")
    }
}

/// A canonical, clustered description of a directly observable condition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Phenomenon {
    /// `P-{n:04}` in cluster-assignment order.
    pub id: String,
    pub description: String,
    pub observation_method: String,
    pub source_anomaly_ids: Vec<String>,
    pub cluster_size: usize,
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub embedding: Vec<f32>,
}

/// A deduplicated raw root-cause text prior to clustering.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawRootCause {
    /// `RRC-{n:04}` in first-seen order.
    pub id: String,
    pub description: String,
    pub solution: String,
    pub source_ticket_ids: Vec<String>,
    pub ticket_count: usize,
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub embedding: Vec<f32>,
}

/// A canonical explanation supported by a set of phenomena.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RootCause {
    /// `RC-{n:04}` in cluster-assignment order.
    pub id: String,
    pub description: String,
    pub solution: String,
    pub source_raw_root_cause_ids: Vec<String>,
    pub cluster_size: usize,
    pub ticket_count: usize,
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub embedding: Vec<f32>,
}

/// A processed ticket linked to its standardized root cause.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Ticket {
    pub ticket_id: String,
    pub description: String,
    pub root_cause_id: String,
    pub solution: String,
}

/// N:M association: a ticket observes a phenomenon.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TicketPhenomenon {
    pub ticket_id: String,
    pub phenomenon_id: String,
    pub why_relevant: String,
    pub raw_anomaly_id: String,
}

/// N:M association: a phenomenon supports a root cause, with the number of
/// tickets exhibiting that phenomenon for that root cause.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PhenomenonRootCause {
    pub phenomenon_id: String,
    pub root_cause_id: String,
    pub ticket_count: usize,
}

/// Semantic-search index entry over raw ticket text (Hyb and RAR paths).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TicketIndexEntry {
    pub ticket_id: String,
    pub description: String,
    pub root_cause_text: String,
    pub solution: String,
    pub combined_text: String,
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub embedding: Vec<f32>,
}

impl TicketIndexEntry {
    /// The text that gets embedded for ticket-level semantic search.
    pub fn combine(description: &str, root_cause: &str, solution: &str) -> String {
        format!("问题描述: {description}\n根因: {root_cause}\n解决方案: {solution}")
    }
}

/// A ticket returned by semantic ticket search.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TicketMatch {
    pub ticket_id: String,
    pub description: String,
    pub root_cause_text: String,
    pub similarity: f32,
}

// =============================================================================
// IMPORT FORMAT (§ external interfaces)
// =============================================================================

/// One anomaly in the raw ticket import file.
#[derive(Debug, Clone, Deserialize)]
pub struct AnomalyImport {
    pub description: String,
    #[serde(default)]
    pub observation_method: String,
    #[serde(default)]
    pub why_relevant: String,
}

/// One ticket in the raw ticket import file (JSON array of these).
#[derive(Debug, Clone, Deserialize)]
pub struct TicketImport {
    pub ticket_id: String,
    #[serde(default)]
    pub metadata: serde_json::Value,
    pub description: String,
    pub root_cause: String,
    #[serde(default)]
    pub solution: String,
    #[serde(default)]
    pub anomalies: Vec<AnomalyImport>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_anomaly_id_derivation() {
        assert_eq!(RawAnomaly::derive_id("T-0001", 0), "T-0001_anomaly_0");
        assert_eq!(RawAnomaly::derive_id("T-0042", 3), "T-0042_anomaly_3");
    }

    #[test]
    fn test_import_format_parses_spec_example() {
        let raw = r#"[
          {
            "ticket_id": "T-0001",
            "metadata": {"severity": "high"},
            "description": "queries slowed down",
            "root_cause": "missing index after schema change",
            "solution": "recreate the index",
            "anomalies": [
              {"description": "slow query count increased",
               "observation_method": "SELECT * FROM slow_log",
               "why_relevant": "direct symptom"}
            ]
          }
        ]"#;
        let tickets: Vec<TicketImport> = serde_json::from_str(raw).unwrap();
        assert_eq!(tickets.len(), 1);
        assert_eq!(tickets[0].anomalies.len(), 1);
        assert_eq!(tickets[0].root_cause, "missing index after schema change");
    }

    #[test]
    fn test_import_format_tolerates_missing_optionals() {
        let raw = r#"[{"ticket_id": "T-0002", "description": "d", "root_cause": "rc"}]"#;
        let tickets: Vec<TicketImport> = serde_json::from_str(raw).unwrap();
        assert!(tickets[0].anomalies.is_empty());
        assert!(tickets[0].solution.is_empty());
    }
}
