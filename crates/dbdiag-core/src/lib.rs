//! # dbdiag-core
//!
//! Shared foundation for the dbdiag incident-diagnosis engine.
//!
//! This crate provides:
//! - Immutable configuration loaded from YAML (`config`)
//! - The workspace-wide error taxonomy (`error`)
//! - Knowledge-graph and session data models (`knowledge`, `session`)
//! - Vector math and the f32 blob codec (`vector`)
//! - Keyword tokenization for hybrid retrieval (`text`)

#![warn(missing_debug_implementations, rust_2018_idioms, unreachable_pub)]

pub mod config;
pub mod error;
pub mod knowledge;
pub mod session;
pub mod text;
pub mod vector;

pub use error::{Error, Result};

/// Re-export of commonly used types.
pub mod prelude {
    pub use crate::config::{Config, EngineConfig, RetryConfig};
    pub use crate::error::{Error, Result};
    pub use crate::knowledge::{
        Phenomenon, PhenomenonRootCause, RawAnomaly, RawRootCause, RawTicket, RootCause, Ticket,
        TicketIndexEntry, TicketMatch, TicketPhenomenon,
    };
    pub use crate::session::{
        ConfirmedPhenomenon, DeniedPhenomenon, DialogueMessage, Hypothesis, RecommendedPhenomenon,
        Role, SessionState,
    };
}
