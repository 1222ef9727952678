use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use thiserror::Error;

/// Failures of the clustering numerics. A k-search treats these as "this k scored nothing".
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ClusteringError {
    #[error("no data points to cluster")]
    EmptyInput,
    #[error("invalid cluster count {k} for {n} points")]
    InvalidClusterCount { k: usize, n: usize },
    #[error("point {index} has dimension {found}, expected {expected}")]
    DimensionMismatch {
        index: usize,
        expected: usize,
        found: usize,
    },
    #[error("point {index} contains a non-finite value")]
    NonFiniteValue { index: usize },
    #[error("silhouette needs 2..=n-1 distinct labels, got {labels} for {n} points")]
    TooFewLabels { labels: usize, n: usize },
}

/// Seeded K-Means (k-means++ seeding, Lloyd iterations) over dense embedding vectors.
///
/// Centroids are the plain mean of their assigned vectors and are not renormalized.
#[derive(Debug, Clone)]
pub struct KMeans {
    pub centroids: Vec<Vec<f32>>,
    pub assignments: Vec<usize>,
    pub inertia: f32,
    pub iterations: usize,
}

impl KMeans {
    /// Runs K-Means clustering.
    ///
    /// # Arguments
    /// * `data` - Data points, all of the same dimension.
    /// * `k` - Number of clusters, `1..=data.len()`.
    /// * `max_iterations` - Upper bound on Lloyd iterations.
    /// * `seed` - Seed for centroid initialization; identical input and seed give identical output.
    ///
    /// # Errors
    /// Returns [`ClusteringError`] for empty input, an out-of-range `k`, ragged or non-finite data.
    pub fn fit(
        data: &[Vec<f32>],
        k: usize,
        max_iterations: usize,
        seed: u64,
    ) -> Result<Self, ClusteringError> {
        validate(data)?;
        let n = data.len();
        if k == 0 || k > n {
            return Err(ClusteringError::InvalidClusterCount { k, n });
        }

        let dim = data[0].len();
        let mut rng = StdRng::seed_from_u64(seed);
        let mut centroids = plus_plus_init(data, k, &mut rng);

        let mut assignments = vec![usize::MAX; n];
        let mut iterations = 0;

        while iterations < max_iterations.max(1) {
            iterations += 1;

            // E-step: assign points to nearest centroid
            let new_assignments: Vec<usize> = data
                .iter()
                .map(|point| nearest(point, &centroids).0)
                .collect();

            let changed = new_assignments != assignments;
            assignments = new_assignments;

            // M-step: update centroids
            let mut sums = vec![vec![0.0_f32; dim]; k];
            let mut counts = vec![0_usize; k];
            for (i, &cluster) in assignments.iter().enumerate() {
                for (sum, val) in sums[cluster].iter_mut().zip(&data[i]) {
                    *sum += val;
                }
                counts[cluster] += 1;
            }

            let mut relocated = false;
            for j in 0..k {
                if counts[j] > 0 {
                    #[allow(clippy::cast_precision_loss)]
                    let count = counts[j] as f32;
                    for (c, s) in centroids[j].iter_mut().zip(&sums[j]) {
                        *c = s / count;
                    }
                } else if let Some(far) = farthest_point(data, &assignments, &centroids, &counts) {
                    // Empty cluster: steal the point worst served by its own centroid.
                    counts[assignments[far]] -= 1;
                    assignments[far] = j;
                    counts[j] = 1;
                    centroids[j].clone_from(&data[far]);
                    relocated = true;
                }
            }

            if !changed && !relocated {
                break;
            }
        }

        // Final pass keeps assignments and centroid means consistent after the last update.
        assignments = data
            .iter()
            .map(|point| nearest(point, &centroids).0)
            .collect();
        centroids = recompute_centroids(data, &assignments, &centroids);
        let inertia = data
            .iter()
            .zip(&assignments)
            .map(|(point, &c)| distance_sq(point, &centroids[c]))
            .sum();

        Ok(Self {
            centroids,
            assignments,
            inertia,
            iterations,
        })
    }

    /// Number of points assigned to each cluster.
    #[must_use]
    pub fn cluster_sizes(&self) -> Vec<usize> {
        let mut sizes = vec![0; self.centroids.len()];
        for &cluster in &self.assignments {
            sizes[cluster] += 1;
        }
        sizes
    }
}

fn validate(data: &[Vec<f32>]) -> Result<(), ClusteringError> {
    let Some(first) = data.first() else {
        return Err(ClusteringError::EmptyInput);
    };
    let expected = first.len();
    for (index, point) in data.iter().enumerate() {
        if point.len() != expected {
            return Err(ClusteringError::DimensionMismatch {
                index,
                expected,
                found: point.len(),
            });
        }
        if point.iter().any(|v| !v.is_finite()) {
            return Err(ClusteringError::NonFiniteValue { index });
        }
    }
    Ok(())
}

fn plus_plus_init(data: &[Vec<f32>], k: usize, rng: &mut StdRng) -> Vec<Vec<f32>> {
    let n = data.len();
    let mut centroids = Vec::with_capacity(k);
    centroids.push(data[rng.random_range(0..n)].clone());

    let mut min_dist: Vec<f32> = data
        .iter()
        .map(|point| distance_sq(point, &centroids[0]))
        .collect();

    while centroids.len() < k {
        let total: f32 = min_dist.iter().sum();
        let next = if total > 0.0 {
            let mut target = rng.random_range(0.0..total);
            let mut chosen = n - 1;
            for (i, d) in min_dist.iter().enumerate() {
                if target < *d {
                    chosen = i;
                    break;
                }
                target -= d;
            }
            chosen
        } else {
            // All remaining points coincide with a centroid.
            rng.random_range(0..n)
        };

        centroids.push(data[next].clone());
        let latest = centroids.len() - 1;
        for (d, point) in min_dist.iter_mut().zip(data) {
            *d = d.min(distance_sq(point, &centroids[latest]));
        }
    }

    centroids
}

fn nearest(point: &[f32], centroids: &[Vec<f32>]) -> (usize, f32) {
    let mut best_cluster = 0;
    let mut min_dist_sq = f32::MAX;
    for (j, centroid) in centroids.iter().enumerate() {
        let dist_sq = distance_sq(point, centroid);
        if dist_sq < min_dist_sq {
            min_dist_sq = dist_sq;
            best_cluster = j;
        }
    }
    (best_cluster, min_dist_sq)
}

fn farthest_point(
    data: &[Vec<f32>],
    assignments: &[usize],
    centroids: &[Vec<f32>],
    counts: &[usize],
) -> Option<usize> {
    data.iter()
        .enumerate()
        .filter(|(i, _)| counts[assignments[*i]] > 1)
        .map(|(i, point)| (i, distance_sq(point, &centroids[assignments[i]])))
        .max_by(|a, b| a.1.total_cmp(&b.1).then_with(|| b.0.cmp(&a.0)))
        .map(|(i, _)| i)
}

fn recompute_centroids(
    data: &[Vec<f32>],
    assignments: &[usize],
    previous: &[Vec<f32>],
) -> Vec<Vec<f32>> {
    let dim = previous.first().map_or(0, Vec::len);
    let mut sums = vec![vec![0.0_f32; dim]; previous.len()];
    let mut counts = vec![0_usize; previous.len()];
    for (point, &cluster) in data.iter().zip(assignments) {
        for (sum, val) in sums[cluster].iter_mut().zip(point) {
            *sum += val;
        }
        counts[cluster] += 1;
    }
    sums.into_iter()
        .zip(counts)
        .zip(previous)
        .map(|((sum, count), prev)| {
            if count == 0 {
                prev.clone()
            } else {
                #[allow(clippy::cast_precision_loss)]
                let count = count as f32;
                sum.into_iter().map(|s| s / count).collect()
            }
        })
        .collect()
}

pub(crate) fn distance_sq(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b.iter()).map(|(x, y)| (x - y).powi(2)).sum()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn blobs() -> Vec<Vec<f32>> {
        vec![
            vec![1.0, 0.0],
            vec![0.98, 0.05],
            vec![0.97, -0.04],
            vec![0.0, 1.0],
            vec![0.04, 0.99],
            vec![-0.03, 0.98],
        ]
    }

    #[test]
    fn separates_two_blobs() {
        let result = KMeans::fit(&blobs(), 2, 50, 42).expect("fit succeeds");

        assert_eq!(result.assignments.len(), 6);
        assert_eq!(result.assignments[0], result.assignments[1]);
        assert_eq!(result.assignments[1], result.assignments[2]);
        assert_eq!(result.assignments[3], result.assignments[4]);
        assert_ne!(result.assignments[0], result.assignments[3]);
        assert_eq!(result.cluster_sizes(), vec![3, 3]);
    }

    #[test]
    fn same_seed_is_deterministic() {
        let first = KMeans::fit(&blobs(), 3, 50, 7).expect("fit succeeds");
        let second = KMeans::fit(&blobs(), 3, 50, 7).expect("fit succeeds");

        assert_eq!(first.assignments, second.assignments);
        assert_eq!(first.centroids, second.centroids);
    }

    #[test]
    fn centroids_are_member_means() {
        let data = blobs();
        let result = KMeans::fit(&data, 2, 50, 1).expect("fit succeeds");
        let cluster = result.assignments[0];
        let members: Vec<&Vec<f32>> = data
            .iter()
            .zip(&result.assignments)
            .filter(|(_, c)| **c == cluster)
            .map(|(p, _)| p)
            .collect();
        #[allow(clippy::cast_precision_loss)]
        let mean_x = members.iter().map(|p| p[0]).sum::<f32>() / members.len() as f32;

        assert!((result.centroids[cluster][0] - mean_x).abs() < 1e-6);
    }

    #[test]
    fn every_cluster_is_populated_when_points_are_distinct() {
        let result = KMeans::fit(&blobs(), 6, 50, 3).expect("fit succeeds");
        assert!(result.cluster_sizes().iter().all(|&size| size == 1));
    }

    #[test]
    fn rejects_invalid_input() {
        assert_eq!(
            KMeans::fit(&[], 2, 10, 0).unwrap_err(),
            ClusteringError::EmptyInput
        );
        assert_eq!(
            KMeans::fit(&blobs(), 7, 10, 0).unwrap_err(),
            ClusteringError::InvalidClusterCount { k: 7, n: 6 }
        );
        let ragged = vec![vec![1.0, 0.0], vec![1.0]];
        assert!(matches!(
            KMeans::fit(&ragged, 1, 10, 0),
            Err(ClusteringError::DimensionMismatch { index: 1, .. })
        ));
        let nan = vec![vec![1.0, f32::NAN], vec![0.0, 1.0]];
        assert!(matches!(
            KMeans::fit(&nan, 1, 10, 0),
            Err(ClusteringError::NonFiniteValue { index: 0 })
        ));
    }
}
