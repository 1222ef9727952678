//! The synchronous clustering core: k search, partitioning, projection, representatives.

use tracing::debug;

use crate::config::ClusteringSettings;
use crate::util::kmeans::ClusteringError;

use super::cluster_count::{ClusterCountSelector, KSelection};
use super::partition::Partitioner;
use super::projection::Projector;
use super::representatives::RepresentativeSelector;

#[derive(Debug, Clone, PartialEq)]
pub struct ClusterSummary {
    pub id: usize,
    pub size: usize,
    pub centroid: Vec<f32>,
    /// Clean-comment indices assigned to this cluster, ascending.
    pub members: Vec<usize>,
    /// Best first, at most `top_k`, a subset of `members`.
    pub representative_indices: Vec<usize>,
    /// Mean of the members' projected coordinates.
    pub coord: [f32; 2],
}

#[derive(Debug, Clone, PartialEq)]
pub struct Analysis {
    pub selection: KSelection,
    pub assignments: Vec<usize>,
    pub coords: Vec<[f32; 2]>,
    pub clusters: Vec<ClusterSummary>,
}

#[derive(Debug, Clone, Copy)]
pub struct ClusteringCore {
    selector: ClusterCountSelector,
    partitioner: Partitioner,
    projector: Projector,
    representatives: RepresentativeSelector,
}

impl ClusteringCore {
    #[must_use]
    pub fn new(settings: &ClusteringSettings) -> Self {
        Self {
            selector: ClusterCountSelector::new(settings),
            partitioner: Partitioner::new(settings.seed, settings.max_iterations),
            projector: Projector::new(settings.seed),
            representatives: RepresentativeSelector::new(
                settings.representative_top_k,
                settings.representative_min_length,
                settings.similarity_threshold,
            ),
        }
    }

    /// Clusters `embeddings` (one per entry of `texts`, same order).
    ///
    /// # Errors
    /// Returns [`ClusteringError`] when the final partitioning fails; failures of individual k
    /// candidates are recorded in the selection instead.
    pub fn analyze(
        &self,
        texts: &[String],
        embeddings: &[Vec<f32>],
        explicit_k: Option<usize>,
    ) -> Result<Analysis, ClusteringError> {
        let selection = self.selector.select(embeddings, explicit_k);
        debug!(
            k = selection.k,
            source = ?selection.source,
            rejected = selection.rejected_count(),
            "selected cluster count"
        );

        let partition = self.partitioner.partition(embeddings, selection.k)?;
        let coords = self.projector.project(embeddings);

        let clusters = partition
            .members()
            .into_iter()
            .zip(&partition.centroids)
            .enumerate()
            .map(|(id, (members, centroid))| {
                let representative_indices =
                    self.representatives.select(texts, embeddings, &members, centroid);
                ClusterSummary {
                    id,
                    size: members.len(),
                    centroid: centroid.clone(),
                    coord: mean_coord(&coords, &members),
                    representative_indices,
                    members,
                }
            })
            .collect();

        Ok(Analysis {
            selection,
            assignments: partition.assignments,
            coords,
            clusters,
        })
    }
}

fn mean_coord(coords: &[[f32; 2]], members: &[usize]) -> [f32; 2] {
    if members.is_empty() {
        return [0.0, 0.0];
    }
    let (sx, sy) = members
        .iter()
        .fold((0.0_f32, 0.0_f32), |(sx, sy), &i| (sx + coords[i][0], sy + coords[i][1]));
    #[allow(clippy::cast_precision_loss)]
    let n = members.len() as f32;
    [sx / n, sy / n]
}
