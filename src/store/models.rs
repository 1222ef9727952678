use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::types::{RunStatus, Stance};

/// The media item whose comments are analyzed.
#[derive(Debug, Clone, PartialEq)]
pub struct AnalysisItem {
    pub id: i64,
    pub external_id: String,
    pub title: Option<String>,
    pub status: RunStatus,
    /// Note on success, error message on failure.
    pub status_message: Option<String>,
    pub content_hash: Option<String>,
    pub overall_summary: Option<String>,
}

/// A claimed unit of work.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueuedRun {
    pub run_id: Uuid,
    pub item_id: i64,
    pub external_id: String,
    pub requested_k: Option<usize>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewComment {
    pub comment_id: String,
    pub text: String,
    pub like_count: i64,
    pub author: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepresentativeComment {
    pub author: String,
    pub text: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ClusterRecord {
    pub ordinal: usize,
    pub label: String,
    pub summary: String,
    pub stance: Option<Stance>,
    pub size: usize,
    pub ord_x: f32,
    pub ord_y: f32,
    pub representatives: Vec<RepresentativeComment>,
}

/// What a previous run left behind for an item; input to the cache gate.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StoredAnalysis {
    pub content_hash: Option<String>,
    pub overall_summary: Option<String>,
    pub clusters: Vec<ClusterRecord>,
}
