//! Hybrid phenomenon retrieval: vector recall, keyword filter, rerank.
//!
//! Also provides raw-ticket semantic search for the Hyb and RAR paths.

use dbdiag_core::knowledge::{Phenomenon, TicketMatch};
use dbdiag_core::text::{count_hits, tokenize};
use dbdiag_core::vector::cosine_similarity;
use dbdiag_core::Result;
use dbdiag_services::Embedder;
use dbdiag_storage::KnowledgeStore;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::debug;

const FACT_COVERAGE_WEIGHT: f32 = 0.5;
const VECTOR_SIM_WEIGHT: f32 = 0.3;
const NOVELTY_WEIGHT: f32 = 0.2;
const NOVELTY_EXCLUDED: f32 = 0.3;

/// Phenomenon retriever over the standardized graph.
pub struct Retriever {
    store: Arc<KnowledgeStore>,
    embedder: Arc<dyn Embedder>,
    /// Vector-stage candidate pool size before keyword filtering.
    vector_candidates: usize,
}

impl std::fmt::Debug for Retriever {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Retriever")
            .field("vector_candidates", &self.vector_candidates)
            .finish()
    }
}

impl Retriever {
    pub fn new(store: Arc<KnowledgeStore>, embedder: Arc<dyn Embedder>, vector_candidates: usize) -> Self {
        Self {
            store,
            embedder,
            vector_candidates,
        }
    }

    /// Retrieve the `top_k` phenomena most relevant to a free-text query.
    ///
    /// Phenomena in `excluded` keep competing but at reduced novelty, so an
    /// already-confirmed phenomenon does not crowd out fresh candidates.
    pub async fn retrieve(
        &self,
        query: &str,
        top_k: usize,
        excluded: &HashSet<String>,
    ) -> Result<Vec<(Phenomenon, f32)>> {
        let phenomena = self.store.phenomena_with_embeddings()?;
        if phenomena.is_empty() {
            return Ok(Vec::new());
        }

        let query_embedding = self.embedder.embed(query).await?;

        // 1. Vector recall.
        let mut candidates: Vec<(Phenomenon, f32)> = phenomena
            .into_iter()
            .map(|p| {
                let similarity = cosine_similarity(&query_embedding, &p.embedding);
                (p, similarity)
            })
            .collect();
        candidates.sort_by(|a, b| {
            b.1.partial_cmp(&a.1)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.0.id.cmp(&b.0.id))
        });
        candidates.truncate(self.vector_candidates);

        // 2. Keyword filter.
        let tokens = tokenize(query);
        let with_hits: Vec<(Phenomenon, f32, usize)> = candidates
            .into_iter()
            .map(|(p, sim)| {
                let text = format!("{} {}", p.description, p.observation_method);
                let hits = count_hits(&tokens, &text);
                (p, sim, hits)
            })
            .collect();

        let surviving: Vec<&(Phenomenon, f32, usize)> =
            with_hits.iter().filter(|(_, _, hits)| *hits >= 1).collect();
        let pool: Vec<(Phenomenon, f32, usize)> = if surviving.len() >= top_k {
            surviving.into_iter().cloned().collect()
        } else {
            with_hits
        };

        // 3. Rerank.
        let token_count = tokens.len();
        let mut scored: Vec<(Phenomenon, f32)> = pool
            .into_iter()
            .map(|(p, vector_sim, hits)| {
                let fact_coverage = if token_count == 0 {
                    0.0
                } else {
                    hits as f32 / token_count as f32
                };
                let novelty = if excluded.contains(&p.id) {
                    NOVELTY_EXCLUDED
                } else {
                    1.0
                };
                let score = FACT_COVERAGE_WEIGHT * fact_coverage
                    + VECTOR_SIM_WEIGHT * vector_sim
                    + NOVELTY_WEIGHT * novelty;
                (p, score)
            })
            .collect();

        scored.sort_by(|a, b| {
            b.1.partial_cmp(&a.1)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.0.id.cmp(&b.0.id))
        });
        scored.truncate(top_k);

        debug!(
            query_tokens = token_count,
            results = scored.len(),
            "phenomenon retrieval finished"
        );
        Ok(scored)
    }

    /// Semantic search over raw-ticket descriptions (Hyb candidate
    /// expansion and RAR).
    pub async fn search_by_ticket_description(
        &self,
        query: &str,
        top_k: usize,
    ) -> Result<Vec<TicketMatch>> {
        let entries = self.store.ticket_index_entries()?;
        if entries.is_empty() {
            return Ok(Vec::new());
        }

        let query_embedding = self.embedder.embed(query).await?;
        let mut matches: Vec<TicketMatch> = entries
            .into_iter()
            .map(|entry| {
                let similarity = cosine_similarity(&query_embedding, &entry.embedding);
                TicketMatch {
                    ticket_id: entry.ticket_id,
                    description: entry.description,
                    root_cause_text: entry.root_cause_text,
                    similarity,
                }
            })
            .collect();
        matches.sort_by(|a, b| {
            b.similarity
                .partial_cmp(&a.similarity)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.ticket_id.cmp(&b.ticket_id))
        });
        matches.truncate(top_k);
        Ok(matches)
    }

    /// Deduplicated union of phenomena observed by any of the given tickets.
    pub fn phenomena_by_ticket_ids(&self, ticket_ids: &[String]) -> Result<Vec<Phenomenon>> {
        self.store.phenomena_by_ticket_ids(ticket_ids)
    }
}
