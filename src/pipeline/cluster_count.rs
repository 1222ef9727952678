//! Silhouette-driven search for the number of clusters.

use rayon::prelude::*;
use rustc_hash::FxHashMap;
use tracing::debug;

use crate::config::ClusteringSettings;
use crate::util::kmeans::{ClusteringError, KMeans};

#[derive(Debug, Clone, PartialEq)]
pub enum RejectionReason {
    /// The smallest cluster fell below the configured minimum size.
    UndersizedCluster { smallest: usize, required: usize },
    /// Partitioning or scoring failed for this k.
    Degenerate(ClusteringError),
}

#[derive(Debug, Clone, PartialEq)]
pub enum CandidateOutcome {
    Scored(f32),
    Rejected(RejectionReason),
}

#[derive(Debug, Clone, PartialEq)]
pub struct CandidateReport {
    pub k: usize,
    pub outcome: CandidateOutcome,
}

/// How the chosen k came about.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KSource {
    Explicit,
    Searched,
    /// `[max(2, k_min), min(k_max, n - 1)]` was empty.
    EmptyRange,
    /// Every candidate was rejected.
    NoViableCandidate,
}

#[derive(Debug, Clone, PartialEq)]
pub struct KSelection {
    pub k: usize,
    pub source: KSource,
    /// One report per searched candidate, ascending k.
    pub candidates: Vec<CandidateReport>,
}

impl KSelection {
    #[must_use]
    pub fn rejected_count(&self) -> usize {
        self.candidates
            .iter()
            .filter(|c| matches!(c.outcome, CandidateOutcome::Rejected(_)))
            .count()
    }
}

#[derive(Debug, Clone, Copy)]
pub struct ClusterCountSelector {
    k_min: usize,
    k_max: usize,
    min_cluster_size: usize,
    seed: u64,
    max_iterations: usize,
}

impl ClusterCountSelector {
    #[must_use]
    pub fn new(settings: &ClusteringSettings) -> Self {
        Self {
            k_min: settings.k_min,
            k_max: settings.k_max,
            min_cluster_size: settings.min_cluster_size,
            seed: settings.seed,
            max_iterations: settings.max_iterations,
        }
    }

    /// Picks k for `embeddings`, or takes `explicit_k` clamped to `1..=n` when given.
    ///
    /// Candidates are tried in ascending order and only a strictly higher silhouette replaces
    /// the current best, so the smallest k wins ties.
    #[must_use]
    pub fn select(&self, embeddings: &[Vec<f32>], explicit_k: Option<usize>) -> KSelection {
        if let Some(k) = explicit_k {
            return KSelection {
                k: k.min(embeddings.len()).max(1),
                source: KSource::Explicit,
                candidates: Vec::new(),
            };
        }

        let floor = self.k_min.max(2);
        let upper = self.k_max.min(embeddings.len().saturating_sub(1));
        if floor > upper {
            return KSelection {
                k: floor,
                source: KSource::EmptyRange,
                candidates: Vec::new(),
            };
        }

        let mut candidates = Vec::with_capacity(upper - floor + 1);
        let mut best: Option<(usize, f32)> = None;

        for k in floor..=upper {
            let outcome = self.evaluate(embeddings, k);
            debug!(k, ?outcome, "evaluated cluster count candidate");
            if let CandidateOutcome::Scored(score) = outcome {
                if best.is_none_or(|(_, best_score)| score > best_score) {
                    best = Some((k, score));
                }
            }
            candidates.push(CandidateReport { k, outcome });
        }

        match best {
            Some((k, _)) => KSelection {
                k,
                source: KSource::Searched,
                candidates,
            },
            None => KSelection {
                k: floor,
                source: KSource::NoViableCandidate,
                candidates,
            },
        }
    }

    fn evaluate(&self, embeddings: &[Vec<f32>], k: usize) -> CandidateOutcome {
        let model = match KMeans::fit(embeddings, k, self.max_iterations, self.seed) {
            Ok(model) => model,
            Err(error) => return CandidateOutcome::Rejected(RejectionReason::Degenerate(error)),
        };

        let smallest = model.cluster_sizes().into_iter().min().unwrap_or(0);
        if smallest < self.min_cluster_size {
            return CandidateOutcome::Rejected(RejectionReason::UndersizedCluster {
                smallest,
                required: self.min_cluster_size,
            });
        }

        match silhouette_score(embeddings, &model.assignments) {
            Ok(score) if score.is_finite() => CandidateOutcome::Scored(score),
            Ok(_) => CandidateOutcome::Rejected(RejectionReason::Degenerate(
                ClusteringError::NonFiniteValue { index: 0 },
            )),
            Err(error) => CandidateOutcome::Rejected(RejectionReason::Degenerate(error)),
        }
    }
}

/// Mean silhouette coefficient over all points, with Euclidean distance.
///
/// A point alone in its cluster scores 0.
///
/// # Errors
/// [`ClusteringError::TooFewLabels`] unless the number of distinct labels is in `2..=n-1`.
pub fn silhouette_score(data: &[Vec<f32>], labels: &[usize]) -> Result<f32, ClusteringError> {
    let n = data.len();
    if n == 0 {
        return Err(ClusteringError::EmptyInput);
    }

    let mut sizes: FxHashMap<usize, usize> = FxHashMap::default();
    for &label in labels {
        *sizes.entry(label).or_insert(0) += 1;
    }
    let distinct = sizes.len();
    if distinct < 2 || distinct > n - 1 {
        return Err(ClusteringError::TooFewLabels {
            labels: distinct,
            n,
        });
    }

    let total: f64 = (0..n)
        .into_par_iter()
        .map(|i| {
            let own = labels[i];
            if sizes[&own] == 1 {
                return 0.0;
            }

            let mut sums: FxHashMap<usize, f64> = FxHashMap::default();
            for j in 0..n {
                if i == j {
                    continue;
                }
                *sums.entry(labels[j]).or_insert(0.0) += euclidean(&data[i], &data[j]);
            }

            #[allow(clippy::cast_precision_loss)]
            let a = sums.get(&own).copied().unwrap_or(0.0) / (sizes[&own] - 1) as f64;
            #[allow(clippy::cast_precision_loss)]
            let b = sums
                .iter()
                .filter(|(label, _)| **label != own)
                .map(|(label, sum)| sum / sizes[label] as f64)
                .fold(f64::INFINITY, f64::min);

            let denom = a.max(b);
            if denom > 0.0 { (b - a) / denom } else { 0.0 }
        })
        .sum();

    #[allow(clippy::cast_precision_loss, clippy::cast_possible_truncation)]
    Ok((total / n as f64) as f32)
}

fn euclidean(a: &[f32], b: &[f32]) -> f64 {
    a.iter()
        .zip(b)
        .map(|(x, y)| f64::from(x - y).powi(2))
        .sum::<f64>()
        .sqrt()
}
