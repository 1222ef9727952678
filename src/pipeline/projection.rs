use ndarray::{Array1, Array2, Axis};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

const POWER_ITERATIONS: usize = 200;
const CONVERGENCE_EPS: f64 = 1e-10;

/// Two-component PCA for the scatter view, each axis rescaled to `[-1, 1]` independently.
///
/// Fewer than two points give all-zero coordinates. An axis on which every point has the same
/// value is left as the raw projection, so it may fall outside `[-1, 1]`.
#[derive(Debug, Clone, Copy)]
pub struct Projector {
    seed: u64,
}

impl Projector {
    #[must_use]
    pub fn new(seed: u64) -> Self {
        Self { seed }
    }

    #[must_use]
    pub fn project(&self, embeddings: &[Vec<f32>]) -> Vec<[f32; 2]> {
        let n = embeddings.len();
        if n < 2 {
            return vec![[0.0, 0.0]; n];
        }

        let dim = embeddings[0].len();
        let mut data = Array2::<f64>::zeros((n, dim));
        for (mut row, vector) in data.axis_iter_mut(Axis(0)).zip(embeddings) {
            for (cell, value) in row.iter_mut().zip(vector) {
                *cell = f64::from(*value);
            }
        }
        if let Some(mean) = data.mean_axis(Axis(0)) {
            data -= &mean;
        }

        #[allow(clippy::cast_precision_loss)]
        let covariance = data.t().dot(&data) / n as f64;

        let mut rng = StdRng::seed_from_u64(self.seed);
        let first = principal_component(&covariance, &mut rng);
        let deflated = deflate(&covariance, &first);
        let second = principal_component(&deflated, &mut rng);

        let xs = data.dot(&first);
        let ys = data.dot(&second);
        let xs = rescale_axis(&xs.to_vec());
        let ys = rescale_axis(&ys.to_vec());

        xs.into_iter().zip(ys).map(|(x, y)| [x, y]).collect()
    }
}

fn principal_component(matrix: &Array2<f64>, rng: &mut StdRng) -> Array1<f64> {
    let dim = matrix.nrows();
    let mut v: Array1<f64> = (0..dim).map(|_| rng.random_range(-1.0..1.0)).collect();
    normalize(&mut v);

    for _ in 0..POWER_ITERATIONS {
        let mut next = matrix.dot(&v);
        if !normalize(&mut next) {
            // Null space: nothing left to explain on this axis.
            return Array1::zeros(dim);
        }
        let delta = (&next - &v).mapv(f64::abs).sum();
        v = next;
        if delta < CONVERGENCE_EPS {
            break;
        }
    }

    // Eigenvectors are sign-ambiguous; make the largest coordinate positive.
    let pivot = v
        .iter()
        .copied()
        .max_by(|a, b| a.abs().total_cmp(&b.abs()))
        .unwrap_or(0.0);
    if pivot < 0.0 {
        v.mapv_inplace(|x| -x);
    }
    v
}

fn normalize(v: &mut Array1<f64>) -> bool {
    let norm = v.dot(v).sqrt();
    if norm > CONVERGENCE_EPS {
        *v /= norm;
        true
    } else {
        false
    }
}

fn deflate(matrix: &Array2<f64>, v: &Array1<f64>) -> Array2<f64> {
    let lambda = v.dot(&matrix.dot(v));
    let outer = v
        .view()
        .insert_axis(Axis(1))
        .dot(&v.view().insert_axis(Axis(0)));
    matrix - &(outer * lambda)
}

#[allow(clippy::cast_possible_truncation)]
fn rescale_axis(values: &[f64]) -> Vec<f32> {
    let min = values.iter().copied().fold(f64::INFINITY, f64::min);
    let max = values.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    if max > min {
        values
            .iter()
            .map(|v| (2.0 * (v - min) / (max - min) - 1.0) as f32)
            .collect()
    } else {
        values.iter().map(|v| *v as f32).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fewer_than_two_points_are_zero() {
        let projector = Projector::new(42);
        assert!(projector.project(&[]).is_empty());
        assert_eq!(projector.project(&[vec![0.3, 0.7]]), vec![[0.0, 0.0]]);
    }

    #[test]
    fn axes_span_minus_one_to_one() {
        let points = vec![
            vec![1.0, 0.0, 0.0],
            vec![0.0, 1.0, 0.0],
            vec![0.0, 0.0, 1.0],
            vec![0.7, 0.7, 0.0],
            vec![0.1, 0.2, 0.9],
        ];
        let coords = Projector::new(42).project(&points);

        assert_eq!(coords.len(), 5);
        for axis in 0..2 {
            let values: Vec<f32> = coords.iter().map(|c| c[axis]).collect();
            let min = values.iter().copied().fold(f32::INFINITY, f32::min);
            let max = values.iter().copied().fold(f32::NEG_INFINITY, f32::max);
            assert!((min + 1.0).abs() < 1e-5);
            assert!((max - 1.0).abs() < 1e-5);
        }
    }

    #[test]
    fn identical_points_keep_raw_values() {
        let points = vec![vec![0.6_f32, 0.8]; 4];
        let coords = Projector::new(42).project(&points);

        assert_eq!(coords.len(), 4);
        for c in coords {
            assert!(c[0].is_finite() && c[1].is_finite());
            assert!(c[0].abs() < 1e-6 && c[1].abs() < 1e-6);
        }
    }

    #[test]
    fn collinear_points_leave_second_axis_unscaled() {
        let points = vec![vec![0.0, 0.0], vec![1.0, 1.0], vec![2.0, 2.0]];
        let coords = Projector::new(42).project(&points);

        let xs: Vec<f32> = coords.iter().map(|c| c[0]).collect();
        assert!((xs[0] + xs[2]).abs() < 1e-5);
        assert!((xs[0].abs() - 1.0).abs() < 1e-5);
        assert!(coords.iter().all(|c| c[1].abs() < 1e-5));
    }

    #[test]
    fn projection_is_deterministic() {
        let points = vec![
            vec![0.2, 0.1, 0.9],
            vec![0.8, 0.3, 0.1],
            vec![0.4, 0.9, 0.2],
        ];
        let projector = Projector::new(3);
        assert_eq!(projector.project(&points), projector.project(&points));
    }
}
