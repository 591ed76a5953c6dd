//! # dbdiag-engine
//!
//! The online diagnosis engine.
//!
//! One dialogue manager runs the shared turn loop for both graph-only
//! reasoning (GAR) and the hybrid variant (Hyb); RAR is a separate,
//! deliberately small loop over raw-ticket retrieval. The hypothesis
//! tracker is pure, the recommender is deterministic, and a turn that
//! fails never advances the stored session.

#![warn(missing_debug_implementations, rust_2018_idioms, unreachable_pub)]

pub mod dialogue;
pub mod feedback;
pub mod rar;
pub mod recommender;
pub mod response;
pub mod retriever;
pub mod tracker;

#[cfg(test)]
pub(crate) mod testutil;

pub use dialogue::{DiagnosisMode, DialogueManager, RecommendedItem, ResponseKind, TurnResponse};
pub use rar::{RarDialogueManager, RarResponse};

/// Re-export of commonly used types.
pub mod prelude {
    pub use crate::dialogue::{
        DiagnosisMode, DialogueManager, RecommendedItem, ResponseKind, TurnResponse,
    };
    pub use crate::rar::{RarDialogueManager, RarResponse};
    pub use crate::recommender::{Action, Recommender, ScoredPhenomenon};
    pub use crate::response::{Diagnosis, ResponseGenerator};
    pub use crate::retriever::Retriever;
    pub use crate::tracker::HypothesisTracker;
}
