//! Multi-hypothesis tracking.
//!
//! The tracker is pure: it reads the session and the knowledge graph and
//! returns a fresh ranked hypothesis list. It never mutates the session;
//! only the dialogue manager writes session state.

use crate::retriever::Retriever;
use dbdiag_core::session::{Hypothesis, SessionState};
use dbdiag_core::Result;
use dbdiag_storage::KnowledgeStore;
use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::sync::Arc;
use tracing::debug;

const PROGRESS_WEIGHT: f64 = 0.6;
const FREQUENCY_WEIGHT: f64 = 0.2;
const RELEVANCE_WEIGHT: f64 = 0.2;
const FREQUENCY_SATURATION: f64 = 5.0;
const MAX_DENIAL_PENALTY: f64 = 0.9;

/// Per-candidate evidence gathered while scanning the session path.
#[derive(Debug, Default)]
struct CandidateEvidence {
    /// Phenomena of this root cause seen along the session path
    /// (retrieved, confirmed, or Hyb-expanded).
    supporting_phenomena: BTreeSet<String>,
    /// Tickets behind those phenomena for this root cause.
    ticket_ids: BTreeSet<String>,
}

/// Stateless hypothesis tracker.
pub struct HypothesisTracker {
    store: Arc<KnowledgeStore>,
    retriever: Arc<Retriever>,
    retrieve_top_k: usize,
    hypothesis_top_k: usize,
    denial_penalty: f64,
}

impl std::fmt::Debug for HypothesisTracker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HypothesisTracker")
            .field("retrieve_top_k", &self.retrieve_top_k)
            .field("hypothesis_top_k", &self.hypothesis_top_k)
            .finish()
    }
}

impl HypothesisTracker {
    pub fn new(
        store: Arc<KnowledgeStore>,
        retriever: Arc<Retriever>,
        retrieve_top_k: usize,
        hypothesis_top_k: usize,
        denial_penalty: f64,
    ) -> Self {
        Self {
            store,
            retriever,
            retrieve_top_k,
            hypothesis_top_k,
            denial_penalty,
        }
    }

    /// Derive the current top-K hypotheses from the session.
    pub async fn update(&self, session: &SessionState) -> Result<Vec<Hypothesis>> {
        let candidates = self.gather_candidates(session).await?;
        if candidates.is_empty() {
            return Ok(Vec::new());
        }

        let confirmed: HashSet<String> = session.confirmed_ids().into_iter().collect();
        let denied: HashSet<String> = session.denied_ids().into_iter().collect();

        let mut hypotheses = Vec::with_capacity(candidates.len());
        for (root_cause_id, evidence) in &candidates {
            let related = self.store.phenomena_for_root_cause(root_cause_id)?;

            let confirmed_relevant = related.iter().filter(|id| confirmed.contains(*id)).count();
            let denied_relevant = related.iter().filter(|id| denied.contains(*id)).count();

            let progress = confirmed_relevant as f64 / related.len().max(1) as f64;
            let frequency =
                (evidence.supporting_phenomena.len() as f64 / FREQUENCY_SATURATION).min(1.0);
            let relevance = if confirmed_relevant > 0 { 1.0 } else { 0.5 };

            let base = PROGRESS_WEIGHT * progress
                + FREQUENCY_WEIGHT * frequency
                + RELEVANCE_WEIGHT * relevance;
            let penalty = (denied_relevant as f64 * self.denial_penalty).min(MAX_DENIAL_PENALTY);
            let confidence = (base * (1.0 - penalty)).clamp(0.0, 1.0);

            let mut supporting_phenomenon_ids: Vec<String> = related
                .iter()
                .filter(|id| confirmed.contains(*id))
                .cloned()
                .collect();
            supporting_phenomenon_ids.sort();

            let mut missing_phenomena: Vec<String> = related
                .iter()
                .filter(|id| !confirmed.contains(*id) && !denied.contains(*id))
                .cloned()
                .collect();
            missing_phenomena.sort();

            let root_cause_description = self
                .store
                .root_cause_by_id(root_cause_id)?
                .map(|rc| rc.description)
                .unwrap_or_default();

            hypotheses.push(Hypothesis {
                root_cause_id: root_cause_id.clone(),
                root_cause_description,
                confidence,
                supporting_phenomenon_ids,
                supporting_ticket_ids: evidence.ticket_ids.iter().cloned().collect(),
                missing_phenomena,
            });
        }

        hypotheses.sort_by(|a, b| {
            b.confidence
                .partial_cmp(&a.confidence)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.root_cause_id.cmp(&b.root_cause_id))
        });
        hypotheses.truncate(self.hypothesis_top_k);

        debug!(
            candidates = candidates.len(),
            kept = hypotheses.len(),
            top_confidence = hypotheses.first().map(|h| h.confidence).unwrap_or(0.0),
            "hypotheses recomputed"
        );
        Ok(hypotheses)
    }

    /// Candidate root causes: associations of phenomena retrieved for the
    /// user problem, of confirmed phenomena, and of the Hyb candidate pool.
    async fn gather_candidates(
        &self,
        session: &SessionState,
    ) -> Result<BTreeMap<String, CandidateEvidence>> {
        let retrieved = self
            .retriever
            .retrieve(&session.user_problem, self.retrieve_top_k, &HashSet::new())
            .await?;

        let mut path_phenomena: Vec<String> = Vec::new();
        let mut seen = HashSet::new();
        for (p, _) in &retrieved {
            if seen.insert(p.id.clone()) {
                path_phenomena.push(p.id.clone());
            }
        }
        for id in session.confirmed_ids() {
            if seen.insert(id.clone()) {
                path_phenomena.push(id);
            }
        }
        for id in &session.hybrid_candidate_phenomenon_ids {
            if seen.insert(id.clone()) {
                path_phenomena.push(id.clone());
            }
        }

        let mut candidates: BTreeMap<String, CandidateEvidence> = BTreeMap::new();
        for phenomenon_id in &path_phenomena {
            for (ticket_id, root_cause_id) in self.store.tickets_for_phenomenon(phenomenon_id)? {
                let evidence = candidates.entry(root_cause_id).or_default();
                evidence.supporting_phenomena.insert(phenomenon_id.clone());
                evidence.ticket_ids.insert(ticket_id);
            }
        }
        Ok(candidates)
    }
}
