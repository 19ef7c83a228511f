//! Seeded k-means over embedding vectors

use crate::error::{Error, Result};
use crate::vector::squared_l2;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// k-means with k-means++ seeding and Lloyd iterations
#[derive(Debug, Clone)]
pub struct KMeans {
    k: usize,
    max_iterations: usize,
    seed: u64,
}

impl KMeans {
    pub fn new(k: usize) -> Self {
        Self {
            k,
            max_iterations: 300,
            seed: 42,
        }
    }

    pub fn with_max_iterations(mut self, max_iterations: usize) -> Self {
        self.max_iterations = max_iterations.max(1);
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    /// Assign each point a label in `[0, k)`; every label is used
    pub fn fit<P: AsRef<[f32]>>(&self, points: &[P]) -> Result<Vec<usize>> {
        let n = points.len();
        if self.k == 0 || self.k > n {
            return Err(Error::InvalidParameters(format!(
                "cluster count {} must be between 1 and the number of points ({})",
                self.k, n
            )));
        }

        let points: Vec<&[f32]> = points.iter().map(|p| p.as_ref()).collect();
        let dim = points[0].len();
        if points.iter().any(|p| p.len() != dim) {
            return Err(Error::InvalidParameters(
                "points have mixed dimensions".to_string(),
            ));
        }

        let mut rng = StdRng::seed_from_u64(self.seed);
        let mut centroids = self.seed_centroids(&points, &mut rng);
        let mut labels = vec![usize::MAX; n];

        for iteration in 0..self.max_iterations {
            let mut changed = false;
            for (i, point) in points.iter().enumerate() {
                let label = closest(point, &centroids);
                if labels[i] != label {
                    labels[i] = label;
                    changed = true;
                }
            }

            changed |= reseed_empty(&points, &mut labels, &mut centroids);

            if !changed {
                tracing::debug!("[Grouping] k-means converged after {} iterations", iteration);
                break;
            }

            centroids = recompute(&points, &labels, self.k, dim);
        }

        Ok(labels)
    }

    /// k-means++: first centroid uniform, the rest weighted by squared distance
    fn seed_centroids(&self, points: &[&[f32]], rng: &mut StdRng) -> Vec<Vec<f32>> {
        let mut centroids = vec![points[rng.gen_range(0..points.len())].to_vec()];

        while centroids.len() < self.k {
            let weights: Vec<f32> = points
                .iter()
                .map(|p| {
                    centroids
                        .iter()
                        .map(|c| squared_l2(p, c))
                        .fold(f32::INFINITY, f32::min)
                })
                .collect();
            let total: f32 = weights.iter().sum();

            let next = if total > 0.0 {
                let mut target = rng.gen::<f32>() * total;
                let mut chosen = points.len() - 1;
                for (i, w) in weights.iter().enumerate() {
                    if target < *w {
                        chosen = i;
                        break;
                    }
                    target -= w;
                }
                chosen
            } else {
                rng.gen_range(0..points.len())
            };
            centroids.push(points[next].to_vec());
        }

        centroids
    }
}

fn closest(point: &[f32], centroids: &[Vec<f32>]) -> usize {
    centroids
        .iter()
        .enumerate()
        .map(|(i, c)| (i, squared_l2(point, c)))
        .min_by(|a, b| a.1.total_cmp(&b.1))
        .map(|(i, _)| i)
        .unwrap_or(0)
}

/// Give every empty cluster the point farthest from its own centroid,
/// taken from a cluster that can spare it. Returns whether labels changed.
fn reseed_empty(points: &[&[f32]], labels: &mut [usize], centroids: &mut [Vec<f32>]) -> bool {
    let k = centroids.len();
    let mut sizes = vec![0usize; k];
    for &label in labels.iter() {
        sizes[label] += 1;
    }

    let mut changed = false;
    for cluster in 0..k {
        if sizes[cluster] > 0 {
            continue;
        }

        let donor = (0..points.len())
            .filter(|&i| sizes[labels[i]] > 1)
            .max_by(|&a, &b| {
                squared_l2(points[a], &centroids[labels[a]])
                    .total_cmp(&squared_l2(points[b], &centroids[labels[b]]))
            });

        if let Some(i) = donor {
            sizes[labels[i]] -= 1;
            sizes[cluster] = 1;
            labels[i] = cluster;
            centroids[cluster] = points[i].to_vec();
            changed = true;
        }
    }

    changed
}

fn recompute(points: &[&[f32]], labels: &[usize], k: usize, dim: usize) -> Vec<Vec<f32>> {
    let mut sums = vec![vec![0.0f32; dim]; k];
    let mut counts = vec![0usize; k];

    for (point, &label) in points.iter().zip(labels) {
        counts[label] += 1;
        for (s, x) in sums[label].iter_mut().zip(point.iter()) {
            *s += x;
        }
    }

    for (sum, count) in sums.iter_mut().zip(counts) {
        if count > 0 {
            for s in sum.iter_mut() {
                *s /= count as f32;
            }
        }
    }

    sums
}

#[cfg(test)]
mod tests {
    use super::*;

    fn blobs() -> Vec<Vec<f32>> {
        vec![
            vec![0.0, 0.0],
            vec![0.1, 0.0],
            vec![0.0, 0.1],
            vec![5.0, 5.0],
            vec![5.1, 5.0],
            vec![5.0, 5.1],
        ]
    }

    #[test]
    fn test_separates_two_blobs() {
        let labels = KMeans::new(2).fit(&blobs()).unwrap();

        assert_eq!(labels[0], labels[1]);
        assert_eq!(labels[1], labels[2]);
        assert_eq!(labels[3], labels[4]);
        assert_eq!(labels[4], labels[5]);
        assert_ne!(labels[0], labels[3]);
    }

    #[test]
    fn test_same_seed_same_labels() {
        let a = KMeans::new(3).with_seed(7).fit(&blobs()).unwrap();
        let b = KMeans::new(3).with_seed(7).fit(&blobs()).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_every_label_used_even_for_duplicates() {
        let points = vec![vec![1.0, 1.0]; 4];
        let mut labels = KMeans::new(3).fit(&points).unwrap();
        labels.sort();
        labels.dedup();
        assert_eq!(labels, vec![0, 1, 2]);
    }

    #[test]
    fn test_k_out_of_range_rejected() {
        assert!(matches!(
            KMeans::new(7).fit(&blobs()),
            Err(Error::InvalidParameters(_))
        ));
        assert!(KMeans::new(0).fit(&blobs()).is_err());
        assert!(KMeans::new(6).fit(&blobs()).is_ok());
    }
}
