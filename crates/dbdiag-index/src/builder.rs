//! Offline index-build pipeline.
//!
//! Converts the raw tables into the standardized phenomenon/root-cause
//! graph: embed anomalies, greedy-cluster, LLM-canonicalize each
//! multi-member cluster, repeat for deduplicated root-cause texts, then
//! derive the association tables and the raw-ticket semantic index. The
//! final write is a single destructive transaction; any upstream failure
//! after retries leaves the previous graph untouched.

use crate::cluster::greedy_cluster;
use crate::prompts;
use dbdiag_core::knowledge::{
    Phenomenon, PhenomenonRootCause, RawAnomaly, RawRootCause, RawTicket, RootCause, Ticket,
    TicketIndexEntry, TicketPhenomenon,
};
use dbdiag_core::Result;
use dbdiag_services::{ChatModel, Embedder};
use dbdiag_storage::{KnowledgeStore, RebuildArtifacts, RebuildStats};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info};

/// Index builder over a knowledge store and the AI service seams.
pub struct IndexBuilder {
    store: Arc<KnowledgeStore>,
    embedder: Arc<dyn Embedder>,
    chat: Arc<dyn ChatModel>,
    similarity_threshold: f32,
}

impl std::fmt::Debug for IndexBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IndexBuilder")
            .field("similarity_threshold", &self.similarity_threshold)
            .finish()
    }
}

impl IndexBuilder {
    pub fn new(
        store: Arc<KnowledgeStore>,
        embedder: Arc<dyn Embedder>,
        chat: Arc<dyn ChatModel>,
        similarity_threshold: f32,
    ) -> Self {
        Self {
            store,
            embedder,
            chat,
            similarity_threshold,
        }
    }

    /// Run the full pipeline and swap the standardized tables.
    pub async fn rebuild(&self) -> Result<RebuildStats> {
        let start = Instant::now();
        ::metrics::counter!("dbdiag_rebuild_runs_total").increment(1);

        let anomalies = self.store.raw_anomalies_ordered()?;
        let raw_tickets = self.store.raw_tickets_ordered()?;
        info!(
            anomalies = anomalies.len(),
            tickets = raw_tickets.len(),
            threshold = self.similarity_threshold,
            "index rebuild started"
        );

        let (phenomena, anomaly_to_phenomenon) = self.build_phenomena(&anomalies).await?;

        let raw_root_causes = Self::extract_raw_root_causes(&raw_tickets);
        let (root_causes, raw_rc_to_standard) =
            self.build_root_causes(&raw_root_causes).await?;

        // Map each ticket to its standardized root cause via the raw text.
        let mut text_to_rc: HashMap<&str, &str> = HashMap::new();
        for rrc in &raw_root_causes {
            if let Some(rc_id) = raw_rc_to_standard.get(&rrc.id) {
                text_to_rc.insert(rrc.description.as_str(), rc_id.as_str());
            }
        }

        let tickets: Vec<Ticket> = raw_tickets
            .iter()
            .filter_map(|t| {
                text_to_rc.get(t.root_cause_text.as_str()).map(|rc_id| Ticket {
                    ticket_id: t.ticket_id.clone(),
                    description: t.description.clone(),
                    root_cause_id: (*rc_id).to_string(),
                    solution: t.solution.clone(),
                })
            })
            .collect();

        let ticket_phenomena: Vec<TicketPhenomenon> = anomalies
            .iter()
            .filter_map(|a| {
                anomaly_to_phenomenon.get(&a.id).map(|pid| TicketPhenomenon {
                    ticket_id: a.ticket_id.clone(),
                    phenomenon_id: pid.clone(),
                    why_relevant: a.why_relevant.clone(),
                    raw_anomaly_id: a.id.clone(),
                })
            })
            .collect();

        let phenomenon_root_causes =
            Self::build_associations(&tickets, &ticket_phenomena);

        let ticket_index = self.build_ticket_index(&raw_tickets).await?;

        let artifacts = RebuildArtifacts {
            phenomena,
            raw_root_causes,
            root_causes,
            tickets,
            ticket_phenomena,
            phenomenon_root_causes,
            ticket_index,
        };
        let stats = self.store.rebuild(&artifacts)?;

        info!(
            elapsed_ms = start.elapsed().as_millis() as u64,
            phenomena = stats.phenomena,
            root_causes = stats.root_causes,
            associations = stats.phenomenon_root_causes,
            "index rebuild finished"
        );
        Ok(stats)
    }

    // =========================================================================
    // Phase 1: phenomena
    // =========================================================================

    async fn build_phenomena(
        &self,
        anomalies: &[RawAnomaly],
    ) -> Result<(Vec<Phenomenon>, HashMap<String, String>)> {
        if anomalies.is_empty() {
            return Ok((Vec::new(), HashMap::new()));
        }

        let descriptions: Vec<String> = anomalies.iter().map(|a| a.description.clone()).collect();
        let embeddings = self.embedder.embed_batch(&descriptions).await?;
        let clusters = greedy_cluster(&embeddings, self.similarity_threshold);
        info!(
            anomalies = anomalies.len(),
            clusters = clusters.len(),
            "anomaly clustering finished"
        );

        let mut phenomena = Vec::with_capacity(clusters.len());
        let mut anomaly_to_phenomenon = HashMap::new();

        for (cluster_idx, cluster) in clusters.iter().enumerate() {
            let phenomenon_id = format!("P-{:04}", cluster_idx + 1);
            let members: Vec<&RawAnomaly> = cluster.members.iter().map(|&i| &anomalies[i]).collect();

            let description = if members.len() == 1 {
                members[0].description.clone()
            } else {
                let member_descriptions: Vec<String> =
                    members.iter().map(|a| a.description.clone()).collect();
                debug!(%phenomenon_id, members = members.len(), "canonicalizing phenomenon cluster");
                self.chat
                    .chat(&prompts::merge_phenomenon(&member_descriptions))
                    .await?
                    .trim()
                    .to_string()
            };

            let observation_method = members
                .iter()
                .map(|a| a.observation_method.as_str())
                .filter(|m| !m.is_empty())
                .max_by_key(|m| m.chars().count())
                .unwrap_or("")
                .to_string();

            for member in &members {
                anomaly_to_phenomenon.insert(member.id.clone(), phenomenon_id.clone());
            }

            phenomena.push(Phenomenon {
                id: phenomenon_id,
                description,
                observation_method,
                source_anomaly_ids: members.iter().map(|a| a.id.clone()).collect(),
                cluster_size: members.len(),
                embedding: cluster.centroid.clone(),
            });
        }

        Ok((phenomena, anomaly_to_phenomenon))
    }

    // =========================================================================
    // Phase 2: root causes
    // =========================================================================

    /// Deduplicate raw root-cause texts by exact match, first-seen order.
    /// Within a duplicate group the longest solution wins.
    fn extract_raw_root_causes(raw_tickets: &[RawTicket]) -> Vec<RawRootCause> {
        let mut order: Vec<String> = Vec::new();
        let mut grouped: HashMap<String, (String, Vec<String>)> = HashMap::new();

        for ticket in raw_tickets {
            let entry = grouped
                .entry(ticket.root_cause_text.clone())
                .or_insert_with(|| {
                    order.push(ticket.root_cause_text.clone());
                    (ticket.solution.clone(), Vec::new())
                });
            if ticket.solution.len() > entry.0.len() {
                entry.0 = ticket.solution.clone();
            }
            entry.1.push(ticket.ticket_id.clone());
        }

        order
            .into_iter()
            .enumerate()
            .map(|(idx, text)| {
                let (solution, source_ticket_ids) = grouped.remove(&text).unwrap_or_default();
                RawRootCause {
                    id: format!("RRC-{:04}", idx + 1),
                    description: text,
                    solution,
                    ticket_count: source_ticket_ids.len(),
                    source_ticket_ids,
                    embedding: Vec::new(),
                }
            })
            .collect()
    }

    async fn build_root_causes(
        &self,
        raw_root_causes: &[RawRootCause],
    ) -> Result<(Vec<RootCause>, HashMap<String, String>)> {
        if raw_root_causes.is_empty() {
            return Ok((Vec::new(), HashMap::new()));
        }

        let descriptions: Vec<String> = raw_root_causes
            .iter()
            .map(|rc| rc.description.clone())
            .collect();
        let embeddings = self.embedder.embed_batch(&descriptions).await?;
        let clusters = greedy_cluster(&embeddings, self.similarity_threshold);
        info!(
            raw_root_causes = raw_root_causes.len(),
            clusters = clusters.len(),
            "root-cause clustering finished"
        );

        let mut root_causes = Vec::with_capacity(clusters.len());
        let mut raw_rc_to_standard = HashMap::new();

        for (cluster_idx, cluster) in clusters.iter().enumerate() {
            let root_cause_id = format!("RC-{:04}", cluster_idx + 1);
            let members: Vec<&RawRootCause> = cluster
                .members
                .iter()
                .map(|&i| &raw_root_causes[i])
                .collect();

            let (description, solution) = if members.len() == 1 {
                (members[0].description.clone(), members[0].solution.clone())
            } else {
                let member_descriptions: Vec<String> =
                    members.iter().map(|m| m.description.clone()).collect();
                let member_solutions: Vec<String> =
                    members.iter().map(|m| m.solution.clone()).collect();
                debug!(%root_cause_id, members = members.len(), "canonicalizing root-cause cluster");
                let description = self
                    .chat
                    .chat(&prompts::merge_root_cause(&member_descriptions))
                    .await?
                    .trim()
                    .to_string();
                let solution = self
                    .chat
                    .chat(&prompts::merge_solution(&member_solutions))
                    .await?
                    .trim()
                    .to_string();
                (description, solution)
            };

            for member in &members {
                raw_rc_to_standard.insert(member.id.clone(), root_cause_id.clone());
            }

            root_causes.push(RootCause {
                id: root_cause_id,
                description,
                solution,
                source_raw_root_cause_ids: members.iter().map(|m| m.id.clone()).collect(),
                cluster_size: members.len(),
                ticket_count: members.iter().map(|m| m.ticket_count).sum(),
                embedding: cluster.centroid.clone(),
            });
        }

        Ok((root_causes, raw_rc_to_standard))
    }

    // =========================================================================
    // Phase 3: associations
    // =========================================================================

    /// `PhenomenonRootCause` rows with exact co-occurrence ticket counts.
    fn build_associations(
        tickets: &[Ticket],
        ticket_phenomena: &[TicketPhenomenon],
    ) -> Vec<PhenomenonRootCause> {
        let ticket_rc: HashMap<&str, &str> = tickets
            .iter()
            .map(|t| (t.ticket_id.as_str(), t.root_cause_id.as_str()))
            .collect();

        // BTreeMap keeps the output order stable across rebuilds.
        let mut pair_tickets: BTreeMap<(String, String), BTreeSet<String>> = BTreeMap::new();
        for tp in ticket_phenomena {
            let Some(rc_id) = ticket_rc.get(tp.ticket_id.as_str()) else {
                continue;
            };
            pair_tickets
                .entry((tp.phenomenon_id.clone(), (*rc_id).to_string()))
                .or_default()
                .insert(tp.ticket_id.clone());
        }

        pair_tickets
            .into_iter()
            .map(|((phenomenon_id, root_cause_id), tickets)| PhenomenonRootCause {
                phenomenon_id,
                root_cause_id,
                ticket_count: tickets.len(),
            })
            .collect()
    }

    // =========================================================================
    // Phase 4: raw-ticket semantic index
    // =========================================================================

    async fn build_ticket_index(&self, raw_tickets: &[RawTicket]) -> Result<Vec<TicketIndexEntry>> {
        if raw_tickets.is_empty() {
            return Ok(Vec::new());
        }

        let combined: Vec<String> = raw_tickets
            .iter()
            .map(|t| TicketIndexEntry::combine(&t.description, &t.root_cause_text, &t.solution))
            .collect();
        let embeddings = self.embedder.embed_batch(&combined).await?;

        Ok(raw_tickets
            .iter()
            .zip(combined)
            .zip(embeddings)
            .map(|((t, combined_text), embedding)| TicketIndexEntry {
                ticket_id: t.ticket_id.clone(),
                description: t.description.clone(),
                root_cause_text: t.root_cause_text.clone(),
                solution: t.solution.clone(),
                combined_text,
                embedding,
            })
            .collect())
    }
}
