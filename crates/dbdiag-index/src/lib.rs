//! # dbdiag-index
//!
//! Offline index-build pipeline: raw tickets and anomalies in, standardized
//! phenomenon/root-cause knowledge graph out. Clustering is greedy and
//! order-dependent; inputs are iterated in `(ticket_id, index)` order so
//! rebuilds are reproducible given fixed embeddings.

#![warn(missing_debug_implementations, rust_2018_idioms, unreachable_pub)]

pub mod builder;
pub mod cluster;
mod prompts;

pub use builder::IndexBuilder;
pub use cluster::{greedy_cluster, Cluster};
