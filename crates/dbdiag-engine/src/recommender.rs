//! Next-observation recommendation.
//!
//! Scores every unresolved phenomenon associated with the active
//! hypotheses on four factors (popularity, specificity, hypothesis
//! priority, information gain) and decides whether to keep asking or to
//! terminate with a diagnosis.

use dbdiag_core::knowledge::Phenomenon;
use dbdiag_core::session::{Hypothesis, SessionState};
use dbdiag_core::Result;
use dbdiag_storage::KnowledgeStore;
use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::Arc;
use tracing::debug;

const POPULARITY_WEIGHT: f64 = 0.15;
const SPECIFICITY_WEIGHT: f64 = 0.20;
const HYPOTHESIS_PRIORITY_WEIGHT: f64 = 0.40;
const INFORMATION_GAIN_WEIGHT: f64 = 0.25;
const CONFIRMATION_GAIN_WEIGHT: f64 = 0.6;
const DISCRIMINATION_WEIGHT: f64 = 0.4;

/// A phenomenon the engine wants the user to check, with the hypothesis it
/// most supports.
#[derive(Debug, Clone)]
pub struct ScoredPhenomenon {
    pub phenomenon: Phenomenon,
    pub score: f64,
    /// Human-readable reason naming the best-supported hypothesis.
    pub reason: String,
    pub best_root_cause_id: String,
}

/// What the engine should do next.
#[derive(Debug, Clone)]
pub enum Action {
    /// No hypotheses at all: ask the user to describe the problem.
    AskInitialInfo,
    /// Terminate with the top hypothesis.
    Diagnose(Hypothesis),
    /// Ask the user to check these phenomena.
    Recommend(Vec<ScoredPhenomenon>),
    /// Nothing left to ask and confidence too low to terminate.
    AskMoreInfo,
}

/// Recommendation engine over the knowledge graph.
pub struct Recommender {
    store: Arc<KnowledgeStore>,
    recommend_count: usize,
    diagnosis_threshold: f64,
    moderate_threshold: f64,
}

impl std::fmt::Debug for Recommender {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Recommender")
            .field("recommend_count", &self.recommend_count)
            .field("diagnosis_threshold", &self.diagnosis_threshold)
            .finish()
    }
}

impl Recommender {
    pub fn new(
        store: Arc<KnowledgeStore>,
        recommend_count: usize,
        diagnosis_threshold: f64,
        moderate_threshold: f64,
    ) -> Self {
        Self {
            store,
            recommend_count,
            diagnosis_threshold,
            moderate_threshold,
        }
    }

    /// Decide the next action for a session whose hypotheses are current.
    pub fn decide(&self, session: &SessionState) -> Result<Action> {
        let Some(top) = session.active_hypotheses.first() else {
            return Ok(Action::AskInitialInfo);
        };

        if top.confidence >= self.diagnosis_threshold {
            debug!(
                root_cause_id = %top.root_cause_id,
                confidence = top.confidence,
                "confidence above diagnosis threshold, terminating"
            );
            return Ok(Action::Diagnose(top.clone()));
        }

        let recommended = self.score_candidates(session)?;
        if !recommended.is_empty() {
            return Ok(Action::Recommend(recommended));
        }

        if top.confidence >= self.moderate_threshold {
            debug!(
                root_cause_id = %top.root_cause_id,
                confidence = top.confidence,
                "no phenomena left to ask, terminating at moderate confidence"
            );
            return Ok(Action::Diagnose(top.clone()));
        }

        Ok(Action::AskMoreInfo)
    }

    /// Four-factor scoring over the unresolved phenomena of the active
    /// hypotheses.
    fn score_candidates(&self, session: &SessionState) -> Result<Vec<ScoredPhenomenon>> {
        let hypotheses = &session.active_hypotheses;
        let confirmed: HashSet<String> = session.confirmed_ids().into_iter().collect();
        let denied: HashSet<String> = session.denied_ids().into_iter().collect();

        // Phenomena of each hypothesis, in hypothesis rank order.
        let mut per_hypothesis: Vec<HashSet<String>> = Vec::with_capacity(hypotheses.len());
        let mut candidates: BTreeSet<String> = BTreeSet::new();
        for hypothesis in hypotheses {
            let related = self.store.phenomena_for_root_cause(&hypothesis.root_cause_id)?;
            for id in &related {
                if !confirmed.contains(id) && !denied.contains(id) {
                    candidates.insert(id.clone());
                }
            }
            per_hypothesis.push(related);
        }
        if candidates.is_empty() {
            return Ok(Vec::new());
        }

        let max_ticket_count = self.store.max_association_ticket_count()?.max(1) as f64;

        let top = &hypotheses[0];
        let top_related = &per_hypothesis[0];
        let top_confirmed = top_related.iter().filter(|id| confirmed.contains(*id)).count();

        let mut scored: Vec<ScoredPhenomenon> = Vec::new();
        for candidate in &candidates {
            let association_rows = self.store.root_causes_for_phenomenon(candidate)?;
            let row_counts: HashMap<&str, usize> = association_rows
                .iter()
                .map(|r| (r.root_cause_id.as_str(), r.ticket_count))
                .collect();

            // Hypotheses this candidate belongs to, in rank order.
            let member_of: Vec<usize> = per_hypothesis
                .iter()
                .enumerate()
                .filter(|(_, related)| related.contains(candidate))
                .map(|(i, _)| i)
                .collect();
            if member_of.is_empty() {
                continue;
            }

            let popularity = association_rows
                .iter()
                .map(|r| r.ticket_count as f64 / max_ticket_count)
                .fold(0.0f64, f64::max);

            let specificity = 1.0 / member_of.len() as f64;

            let (hypothesis_priority, best_idx) = member_of
                .iter()
                .map(|&i| {
                    let hypothesis = &hypotheses[i];
                    let ticket_count = row_counts
                        .get(hypothesis.root_cause_id.as_str())
                        .copied()
                        .unwrap_or(0) as f64;
                    let priority = hypothesis.confidence
                        * (0.7 + 0.3 * (ticket_count / max_ticket_count).sqrt());
                    (priority, i)
                })
                .fold((0.0f64, member_of[0]), |acc, (priority, i)| {
                    if priority > acc.0 {
                        (priority, i)
                    } else {
                        acc
                    }
                });

            let confirmation_gain = if member_of.contains(&0) {
                1.0 - top_confirmed as f64 / top_related.len().max(1) as f64
            } else {
                0.0
            };
            let discrimination = if hypotheses.len() < 2 {
                0.0
            } else {
                let in_top1 = member_of.contains(&0);
                let in_top2 = member_of.contains(&1);
                match (in_top1, in_top2) {
                    (true, false) => 1.0,
                    (false, true) => 0.8,
                    (true, true) => 0.2,
                    (false, false) => 0.1,
                }
            };
            let information_gain = CONFIRMATION_GAIN_WEIGHT * confirmation_gain
                + DISCRIMINATION_WEIGHT * discrimination;

            let score = POPULARITY_WEIGHT * popularity
                + SPECIFICITY_WEIGHT * specificity
                + HYPOTHESIS_PRIORITY_WEIGHT * hypothesis_priority
                + INFORMATION_GAIN_WEIGHT * information_gain;

            let best = &hypotheses[best_idx];
            let reason = format!(
                "最能支持假设「{}」(置信度 {:.0}%)",
                best.root_cause_description,
                best.confidence * 100.0
            );

            let Some(phenomenon) = self.store.phenomenon_by_id(candidate)? else {
                continue;
            };
            scored.push(ScoredPhenomenon {
                phenomenon,
                score,
                reason,
                best_root_cause_id: best.root_cause_id.clone(),
            });
        }

        scored.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.phenomenon.id.cmp(&b.phenomenon.id))
        });
        scored.truncate(self.recommend_count);
        Ok(scored)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::GraphFixture;

    fn hypothesis(rc: &str, desc: &str, confidence: f64) -> Hypothesis {
        Hypothesis {
            root_cause_id: rc.into(),
            root_cause_description: desc.into(),
            confidence,
            supporting_phenomenon_ids: Vec::new(),
            supporting_ticket_ids: Vec::new(),
            missing_phenomena: Vec::new(),
        }
    }

    fn recommender_for(fixture: &GraphFixture) -> Recommender {
        Recommender::new(fixture.store.clone(), 3, 0.80, 0.50)
    }

    #[test]
    fn test_no_hypotheses_asks_initial_info() {
        let fixture = GraphFixture::slow_query_corpus();
        let session = SessionState::new("problem");
        let action = recommender_for(&fixture).decide(&session).unwrap();
        assert!(matches!(action, Action::AskInitialInfo));
    }

    #[test]
    fn test_high_confidence_terminates() {
        let fixture = GraphFixture::slow_query_corpus();
        let mut session = SessionState::new("查询变慢");
        session
            .active_hypotheses
            .push(hypothesis("RC-0001", "索引膨胀", 0.85));

        let action = recommender_for(&fixture).decide(&session).unwrap();
        match action {
            Action::Diagnose(h) => assert_eq!(h.root_cause_id, "RC-0001"),
            other => panic!("expected Diagnose, got {other:?}"),
        }
    }

    #[test]
    fn test_mid_confidence_recommends_unresolved_phenomena() {
        let fixture = GraphFixture::slow_query_corpus();
        let mut session = SessionState::new("查询变慢");
        session
            .active_hypotheses
            .push(hypothesis("RC-0001", "索引膨胀", 0.45));
        session.confirm("P-0001", "确认").unwrap();

        let action = recommender_for(&fixture).decide(&session).unwrap();
        match action {
            Action::Recommend(items) => {
                let ids: Vec<&str> = items.iter().map(|i| i.phenomenon.id.as_str()).collect();
                assert!(ids.contains(&"P-0002"));
                assert!(ids.contains(&"P-0003"));
                // Confirmed phenomena never reappear.
                assert!(!ids.contains(&"P-0001"));
                for item in &items {
                    assert!(item.reason.contains("索引膨胀"));
                }
            }
            other => panic!("expected Recommend, got {other:?}"),
        }
    }

    #[test]
    fn test_exhausted_candidates_with_moderate_confidence_terminates() {
        let fixture = GraphFixture::slow_query_corpus();
        let mut session = SessionState::new("查询变慢");
        session
            .active_hypotheses
            .push(hypothesis("RC-0001", "索引膨胀", 0.6));
        session.confirm("P-0001", "确认").unwrap();
        session.confirm("P-0002", "确认").unwrap();
        session.deny("P-0003").unwrap();

        let action = recommender_for(&fixture).decide(&session).unwrap();
        assert!(matches!(action, Action::Diagnose(_)));
    }

    #[test]
    fn test_exhausted_candidates_with_low_confidence_asks_more() {
        let fixture = GraphFixture::slow_query_corpus();
        let mut session = SessionState::new("查询变慢");
        session
            .active_hypotheses
            .push(hypothesis("RC-0001", "索引膨胀", 0.3));
        session.confirm("P-0001", "确认").unwrap();
        session.confirm("P-0002", "确认").unwrap();
        session.deny("P-0003").unwrap();

        let action = recommender_for(&fixture).decide(&session).unwrap();
        assert!(matches!(action, Action::AskMoreInfo));
    }

    #[test]
    fn test_discriminating_phenomenon_outranks_shared_one() {
        let fixture = GraphFixture::slow_query_corpus();
        let mut session = SessionState::new("查询变慢");
        session
            .active_hypotheses
            .push(hypothesis("RC-0001", "索引膨胀", 0.5));
        session
            .active_hypotheses
            .push(hypothesis("RC-0002", "日志保留策略", 0.45));

        let action = recommender_for(&fixture).decide(&session).unwrap();
        let Action::Recommend(items) = action else {
            panic!("expected Recommend");
        };
        // All of RC-0001's phenomena discriminate (top1-only); RC-0002's
        // P-0004 is top2-only. The leader's phenomena come first.
        assert_eq!(items.len(), 3);
        assert!(items[0].best_root_cause_id == "RC-0001");
    }
}
