use sha2::{Digest, Sha256};

use crate::store::models::StoredAnalysis;

/// How much of a prior analysis must be present before it may be served again.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CompletenessPolicy {
    /// At least one cluster, each with a non-blank label and summary.
    #[default]
    Basic,
    /// `Basic`, plus a stance on every cluster and a non-blank overall summary.
    Strict,
}

impl CompletenessPolicy {
    #[must_use]
    pub fn from_keyword(raw: &str) -> Option<Self> {
        match raw.to_ascii_lowercase().as_str() {
            "basic" => Some(Self::Basic),
            "strict" => Some(Self::Strict),
            _ => None,
        }
    }

    #[must_use]
    pub fn is_complete(self, prior: &StoredAnalysis) -> bool {
        if prior.clusters.is_empty() {
            return false;
        }
        let basic = prior
            .clusters
            .iter()
            .all(|c| !c.label.trim().is_empty() && !c.summary.trim().is_empty());
        match self {
            Self::Basic => basic,
            Self::Strict => {
                basic
                    && prior.clusters.iter().all(|c| c.stance.is_some())
                    && prior
                        .overall_summary
                        .as_deref()
                        .is_some_and(|s| !s.trim().is_empty())
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MissReason {
    /// No hash stored yet.
    FirstRun,
    HashChanged,
    /// Same comments, but the stored results do not satisfy the policy.
    Incomplete,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CacheDecision {
    Hit,
    Miss(MissReason),
}

/// Snapshot of the current input compared against what was stored.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AnalysisSnapshot {
    pub content_hash: String,
    pub decision: CacheDecision,
}

impl AnalysisSnapshot {
    #[must_use]
    pub fn is_hit(&self) -> bool {
        self.decision == CacheDecision::Hit
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct CacheGate {
    policy: CompletenessPolicy,
}

impl CacheGate {
    #[must_use]
    pub fn new(policy: CompletenessPolicy) -> Self {
        Self { policy }
    }

    #[must_use]
    pub fn evaluate<S: AsRef<str>>(
        &self,
        comment_ids: &[S],
        prior: &StoredAnalysis,
    ) -> AnalysisSnapshot {
        let content_hash = content_hash(comment_ids);
        let decision = match prior.content_hash.as_deref() {
            None => CacheDecision::Miss(MissReason::FirstRun),
            Some(stored) if stored != content_hash => CacheDecision::Miss(MissReason::HashChanged),
            Some(_) if !self.policy.is_complete(prior) => {
                CacheDecision::Miss(MissReason::Incomplete)
            }
            Some(_) => CacheDecision::Hit,
        };
        AnalysisSnapshot {
            content_hash,
            decision,
        }
    }
}

/// Hex SHA-256 of the comment ids, sorted and joined with `\n`.
#[must_use]
pub fn content_hash<S: AsRef<str>>(comment_ids: &[S]) -> String {
    let mut ids: Vec<&str> = comment_ids.iter().map(AsRef::as_ref).collect();
    ids.sort_unstable();
    let digest = Sha256::digest(ids.join("\n").as_bytes());
    format!("{digest:x}")
}
