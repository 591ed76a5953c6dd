//! # dbdiag-storage
//!
//! Persistence layer for dbdiag.
//!
//! This crate provides:
//! - The knowledge store: raw tickets/anomalies plus the standardized
//!   phenomenon/root-cause graph, with a single-transaction destructive
//!   rebuild (readers never observe a partially rebuilt graph)
//! - The session store: one opaque JSON blob per session id

#![warn(missing_debug_implementations, rust_2018_idioms, unreachable_pub)]

pub mod knowledge;
pub mod schema;
pub mod session;

pub use knowledge::{ImportStats, KnowledgeStore, RebuildArtifacts, RebuildStats};
pub use session::{SessionStore, SessionSummary};

/// Re-export of commonly used types.
pub mod prelude {
    pub use crate::knowledge::{ImportStats, KnowledgeStore, RebuildArtifacts, RebuildStats};
    pub use crate::session::{SessionStore, SessionSummary};
}
