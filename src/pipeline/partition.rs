use crate::util::kmeans::{ClusteringError, KMeans};

/// Cluster membership of every clean comment plus one centroid per cluster.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Partition {
    /// `assignments[i]` is the cluster of clean comment `i`, in `0..k`.
    pub assignments: Vec<usize>,
    /// Mean of the member vectors, not renormalized.
    pub centroids: Vec<Vec<f32>>,
}

impl Partition {
    #[must_use]
    pub fn k(&self) -> usize {
        self.centroids.len()
    }

    /// Member indices per cluster, ascending.
    #[must_use]
    pub fn members(&self) -> Vec<Vec<usize>> {
        let mut members = vec![Vec::new(); self.k()];
        for (index, &cluster) in self.assignments.iter().enumerate() {
            members[cluster].push(index);
        }
        members
    }

    #[must_use]
    pub fn sizes(&self) -> Vec<usize> {
        self.members().iter().map(Vec::len).collect()
    }
}

/// Seeded K-Means partitioning.
#[derive(Debug, Clone, Copy)]
pub struct Partitioner {
    seed: u64,
    max_iterations: usize,
}

impl Partitioner {
    #[must_use]
    pub fn new(seed: u64, max_iterations: usize) -> Self {
        Self {
            seed,
            max_iterations,
        }
    }

    /// Splits `embeddings` into `k` clusters; `k` is clamped to `1..=n`.
    ///
    /// # Errors
    /// Propagates [`ClusteringError`] for ragged or non-finite input.
    pub fn partition(&self, embeddings: &[Vec<f32>], k: usize) -> Result<Partition, ClusteringError> {
        if embeddings.is_empty() {
            return Ok(Partition::default());
        }
        let k = k.clamp(1, embeddings.len());
        let model = KMeans::fit(embeddings, k, self.max_iterations, self.seed)?;
        Ok(Partition {
            assignments: model.assignments,
            centroids: model.centroids,
        })
    }
}
