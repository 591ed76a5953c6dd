//! Per-conversation session state.
//!
//! A `SessionState` is the entire working memory of one diagnosis dialogue,
//! persisted as a single JSON blob keyed by session id. Confirmed, denied
//! and recommended phenomena behave as sets keyed by phenomenon id; a
//! phenomenon can never be both confirmed and denied.

use crate::error::{Error, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Who produced a dialogue message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

/// One turn of dialogue history.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DialogueMessage {
    pub role: Role,
    pub content: String,
    pub timestamp: DateTime<Utc>,
}

impl DialogueMessage {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
            timestamp: Utc::now(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
            timestamp: Utc::now(),
        }
    }
}

/// A phenomenon the user confirmed observing, with their feedback.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfirmedPhenomenon {
    pub phenomenon_id: String,
    pub result_summary: String,
    pub timestamp: DateTime<Utc>,
}

/// A phenomenon the user denied observing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeniedPhenomenon {
    pub phenomenon_id: String,
    pub timestamp: DateTime<Utc>,
}

/// History entry: a phenomenon the engine suggested, and on which turn.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecommendedPhenomenon {
    pub phenomenon_id: String,
    pub turn: u32,
    pub timestamp: DateTime<Utc>,
}

/// A candidate root cause with quantified confidence, recomputed each turn.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Hypothesis {
    pub root_cause_id: String,
    pub root_cause_description: String,
    /// Confidence in [0, 1].
    pub confidence: f64,
    /// Phenomena of this root cause that the user confirmed.
    pub supporting_phenomenon_ids: Vec<String>,
    /// Tickets behind those phenomena for this root cause.
    pub supporting_ticket_ids: Vec<String>,
    /// Phenomena of this root cause not yet confirmed or denied.
    pub missing_phenomena: Vec<String>,
}

/// The entire per-conversation working memory.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionState {
    pub session_id: String,
    pub user_problem: String,
    pub created_at: DateTime<Utc>,

    #[serde(default)]
    pub confirmed_phenomena: Vec<ConfirmedPhenomenon>,
    #[serde(default)]
    pub denied_phenomena: Vec<DeniedPhenomenon>,
    #[serde(default)]
    pub recommended_phenomena: Vec<RecommendedPhenomenon>,
    #[serde(default)]
    pub active_hypotheses: Vec<Hypothesis>,
    #[serde(default)]
    pub dialogue_history: Vec<DialogueMessage>,

    /// Hyb only: candidate phenomena gathered via ticket-description search.
    #[serde(default)]
    pub hybrid_candidate_phenomenon_ids: Vec<String>,
    /// Hyb only: free-form observations the user volunteered.
    #[serde(default)]
    pub new_observations: Vec<String>,
}

impl SessionState {
    /// Create a fresh session for a user problem description.
    pub fn new(user_problem: impl Into<String>) -> Self {
        Self {
            session_id: Uuid::new_v4().to_string(),
            user_problem: user_problem.into(),
            created_at: Utc::now(),
            confirmed_phenomena: Vec::new(),
            denied_phenomena: Vec::new(),
            recommended_phenomena: Vec::new(),
            active_hypotheses: Vec::new(),
            dialogue_history: Vec::new(),
            hybrid_candidate_phenomenon_ids: Vec::new(),
            new_observations: Vec::new(),
        }
    }

    pub fn confirmed_ids(&self) -> Vec<String> {
        self.confirmed_phenomena
            .iter()
            .map(|p| p.phenomenon_id.clone())
            .collect()
    }

    pub fn denied_ids(&self) -> Vec<String> {
        self.denied_phenomena
            .iter()
            .map(|p| p.phenomenon_id.clone())
            .collect()
    }

    pub fn is_confirmed(&self, phenomenon_id: &str) -> bool {
        self.confirmed_phenomena
            .iter()
            .any(|p| p.phenomenon_id == phenomenon_id)
    }

    pub fn is_denied(&self, phenomenon_id: &str) -> bool {
        self.denied_phenomena
            .iter()
            .any(|p| p.phenomenon_id == phenomenon_id)
    }

    /// The turn number a recommendation made now would carry.
    pub fn current_turn(&self) -> u32 {
        (self.dialogue_history.len() as u32) / 2 + 1
    }

    /// The phenomenon ids of the most recent recommendation, in the order
    /// they were presented to the user.
    pub fn latest_recommended_ids(&self) -> Vec<String> {
        let Some(last_turn) = self.recommended_phenomena.iter().map(|r| r.turn).max() else {
            return Vec::new();
        };
        self.recommended_phenomena
            .iter()
            .filter(|r| r.turn == last_turn)
            .map(|r| r.phenomenon_id.clone())
            .collect()
    }

    /// Phenomena from the most recent recommendation that the user has not
    /// yet confirmed or denied. Numeric feedback indices resolve into this
    /// list.
    pub fn pending_phenomenon_ids(&self) -> Vec<String> {
        self.latest_recommended_ids()
            .into_iter()
            .filter(|id| !self.is_confirmed(id) && !self.is_denied(id))
            .collect()
    }

    /// Record a confirmation. Confirming a denied phenomenon violates the
    /// session invariant and is rejected; re-confirming is a no-op.
    pub fn confirm(&mut self, phenomenon_id: &str, result_summary: impl Into<String>) -> Result<()> {
        if self.is_denied(phenomenon_id) {
            return Err(Error::integrity(format!(
                "phenomenon {phenomenon_id} is already denied in this session"
            )));
        }
        if self.is_confirmed(phenomenon_id) {
            return Ok(());
        }
        self.confirmed_phenomena.push(ConfirmedPhenomenon {
            phenomenon_id: phenomenon_id.to_string(),
            result_summary: result_summary.into(),
            timestamp: Utc::now(),
        });
        Ok(())
    }

    /// Record a denial. A confirmed phenomenon cannot later be denied
    /// without an explicit session reset; re-denying is a no-op.
    pub fn deny(&mut self, phenomenon_id: &str) -> Result<()> {
        if self.is_confirmed(phenomenon_id) {
            return Err(Error::integrity(format!(
                "phenomenon {phenomenon_id} is already confirmed in this session"
            )));
        }
        if self.is_denied(phenomenon_id) {
            return Ok(());
        }
        self.denied_phenomena.push(DeniedPhenomenon {
            phenomenon_id: phenomenon_id.to_string(),
            timestamp: Utc::now(),
        });
        Ok(())
    }

    /// Record a recommendation for the given turn. The history stays a set
    /// keyed by phenomenon id; a re-recommended phenomenon moves to this
    /// turn so that `latest_recommended_ids` reproduces the list the user
    /// saw, in presentation order.
    pub fn record_recommendation(&mut self, phenomenon_ids: &[String], turn: u32) {
        for id in phenomenon_ids {
            if let Some(pos) = self
                .recommended_phenomena
                .iter()
                .position(|r| &r.phenomenon_id == id)
            {
                let mut entry = self.recommended_phenomena.remove(pos);
                entry.turn = turn;
                self.recommended_phenomena.push(entry);
            } else {
                self.recommended_phenomena.push(RecommendedPhenomenon {
                    phenomenon_id: id.clone(),
                    turn,
                    timestamp: Utc::now(),
                });
            }
        }
    }
}
