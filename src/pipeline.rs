//! Comment analysis pipeline: fetch, clean, embed, cluster, describe, persist.

pub mod analysis;
pub mod cache_gate;
pub mod cluster_count;
pub mod embedding;
pub mod fetch;
pub mod orchestrator;
pub mod partition;
pub mod preprocess;
pub mod projection;
pub mod representatives;
pub mod summarizer;
