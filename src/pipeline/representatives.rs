use super::embedding::dot;

const BOOST_FLOOR: f32 = 0.5;
const BOOST_CEIL: f32 = 1.5;

/// Picks up to `top_k` centroid-near, mutually dissimilar members of a cluster.
///
/// Members are ranked by `dot(embedding, centroid) * boost`, where
/// `boost = clip(1 + 0.1 * ln(max(chars, 1) / min_length), 0.5, 1.5)` discounts very short
/// comments. The ranking is walked greedily: a member is accepted only when its dot product
/// with every member accepted so far is at most `similarity_threshold`. A member skipped as a
/// near-duplicate is never revisited.
#[derive(Debug, Clone, Copy)]
pub struct RepresentativeSelector {
    top_k: usize,
    min_length: usize,
    similarity_threshold: f32,
}

impl RepresentativeSelector {
    #[must_use]
    pub fn new(top_k: usize, min_length: usize, similarity_threshold: f32) -> Self {
        Self {
            top_k,
            min_length: min_length.max(1),
            similarity_threshold,
        }
    }

    /// Representatives of one cluster as indices into `texts`/`embeddings`, best first.
    ///
    /// `members` are the indices assigned to the cluster; `centroid` is its raw mean vector.
    #[must_use]
    pub fn select(
        &self,
        texts: &[String],
        embeddings: &[Vec<f32>],
        members: &[usize],
        centroid: &[f32],
    ) -> Vec<usize> {
        let mut ranked: Vec<(usize, f32)> = members
            .iter()
            .map(|&index| {
                let similarity = dot(&embeddings[index], centroid);
                (index, similarity * self.length_boost(&texts[index]))
            })
            .collect();
        ranked.sort_by(|a, b| b.1.total_cmp(&a.1).then_with(|| a.0.cmp(&b.0)));

        let mut accepted: Vec<usize> = Vec::with_capacity(self.top_k.min(members.len()));
        for (index, _) in ranked {
            if accepted.len() >= self.top_k {
                break;
            }
            let distinct = accepted
                .iter()
                .all(|&chosen| dot(&embeddings[index], &embeddings[chosen]) <= self.similarity_threshold);
            if distinct {
                accepted.push(index);
            }
        }
        accepted
    }

    fn length_boost(&self, text: &str) -> f32 {
        #[allow(clippy::cast_precision_loss)]
        let ratio = text.chars().count().max(1) as f32 / self.min_length as f32;
        (1.0 + 0.1 * ratio.ln()).clamp(BOOST_FLOOR, BOOST_CEIL)
    }
}
