use rand::{rngs::StdRng, seq::index, Rng, SeedableRng};
use tracing::debug;

use crate::{config::VocabConfig, BowErr, BowResult, Desc, DESC_LEN};

/// Fraction of the largest cluster count under which a center is considered dead
/// and moved onto a random sample.
const REASSIGNMENT_RATIO: f32 = 0.01;
/// Steps between two checks for dead centers.
const REASSIGN_EVERY: usize = 10;

/// Result of a mini-batch k-means fit.
#[derive(Debug, Clone, PartialEq)]
pub struct Clustering {
    /// `k * DESC_LEN` values, center `j` at `[j * DESC_LEN..(j + 1) * DESC_LEN]`.
    pub centers: Vec<f32>,
    /// Number of pool samples closest to each center.
    pub sizes: Vec<usize>,
    /// Sum of squared distances of all pool samples to their center.
    pub inertia: f64,
    /// Mini-batch steps performed.
    pub steps: usize,
}

#[inline]
pub(crate) fn sq_dist(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b).map(|(x, y)| (x - y) * (x - y)).sum()
}

/// Index of and squared distance to the closest center. Ties go to the lower index.
#[inline]
pub(crate) fn nearest(centers: &[f32], x: &[f32]) -> (usize, f32) {
    let mut best = (0, f32::INFINITY);
    for (j, c) in centers.chunks_exact(DESC_LEN).enumerate() {
        let d = sq_dist(c, x);
        if d < best.1 {
            best = (j, d);
        }
    }
    best
}

/// Fit `config.k` centers to `pool` with mini-batch k-means (Sculley 2010).
///
/// Centers are seeded with k-means++ on a random subset of the pool. When
/// `config.n_init` is `None` a single seeding is used; otherwise the seeding with
/// the lowest inertia on its subset wins.
pub fn mini_batch(pool: &[Desc], config: &VocabConfig) -> BowResult<Clustering> {
    config.validate()?;
    let n = pool.len();
    let k = config.k;
    if n == 0 {
        return Err(BowErr::EmptyTrainingPool);
    }
    if n < k {
        return Err(BowErr::InsufficientDescriptors { k, found: n });
    }

    let mut rng = StdRng::seed_from_u64(config.seed);
    let batch_size = config.batch_size.min(n);
    let init_size = (3 * batch_size).max(3 * k).min(n);

    let mut centers = Vec::new();
    let mut best_inertia = f64::INFINITY;
    for run in 0..config.n_init.unwrap_or(1) {
        let subset: Vec<&Desc> = index::sample(&mut rng, n, init_size)
            .into_iter()
            .map(|i| &pool[i])
            .collect();
        let candidate = kmeans_plusplus(&subset, k, &mut rng);
        let inertia: f64 = subset
            .iter()
            .map(|x| nearest(&candidate, &x[..]).1 as f64)
            .sum();
        debug!("Init {}: inertia {:.3} on {} samples", run, inertia, init_size);
        if inertia < best_inertia {
            best_inertia = inertia;
            centers = candidate;
        }
    }

    let n_steps = ((config.max_iter * n) / batch_size).max(1);
    let mut counts = vec![0f64; k];
    let mut sums = vec![0f64; k * DESC_LEN];
    let mut batch_counts = vec![0usize; k];
    let mut ewa_inertia: Option<f64> = None;
    let mut ewa_min = f64::INFINITY;
    let mut no_improvement = 0;
    let alpha = (batch_size as f64 * 2. / (n as f64 + 1.)).min(1.);
    let mut steps = 0;

    for step in 0..n_steps {
        steps = step + 1;
        sums.iter_mut().for_each(|s| *s = 0.);
        batch_counts.iter_mut().for_each(|c| *c = 0);

        let mut batch_inertia = 0f64;
        for _ in 0..batch_size {
            let x = &pool[rng.gen_range(0..n)];
            let (j, d) = nearest(&centers, x);
            batch_inertia += d as f64;
            batch_counts[j] += 1;
            for (s, v) in sums[j * DESC_LEN..(j + 1) * DESC_LEN].iter_mut().zip(x) {
                *s += *v as f64;
            }
        }

        let mut shift = 0f64;
        for j in 0..k {
            let b = batch_counts[j] as f64;
            if b == 0. {
                continue;
            }
            let total = counts[j] + b;
            let center = &mut centers[j * DESC_LEN..(j + 1) * DESC_LEN];
            for (c, s) in center.iter_mut().zip(&sums[j * DESC_LEN..(j + 1) * DESC_LEN]) {
                let updated = ((*c as f64) * counts[j] + s) / total;
                shift += (updated - *c as f64).powi(2);
                *c = updated as f32;
            }
            counts[j] = total;
        }

        if (step + 1) % REASSIGN_EVERY == 0 && step + 1 < n_steps {
            reassign_dead_centers(pool, &mut centers, &mut counts, &mut rng);
        }

        if config.tol > 0. && shift / k as f64 <= config.tol as f64 {
            debug!("Converged on center shift at step {}/{}", steps, n_steps);
            break;
        }

        let mean_inertia = batch_inertia / batch_size as f64;
        let ewa = match ewa_inertia {
            Some(prev) => prev * (1. - alpha) + mean_inertia * alpha,
            None => mean_inertia,
        };
        ewa_inertia = Some(ewa);
        if ewa < ewa_min {
            ewa_min = ewa;
            no_improvement = 0;
        } else {
            no_improvement += 1;
        }
        if config.max_no_improvement > 0 && no_improvement >= config.max_no_improvement {
            debug!("No inertia improvement, stopping at step {}/{}", steps, n_steps);
            break;
        }
    }

    let mut sizes = vec![0usize; k];
    let mut inertia = 0f64;
    for x in pool {
        let (j, d) = nearest(&centers, x);
        sizes[j] += 1;
        inertia += d as f64;
    }

    Ok(Clustering {
        centers,
        sizes,
        inertia,
        steps,
    })
}

/// k-means++ seeding: each next center is drawn with probability proportional to
/// the squared distance to the closest center chosen so far.
fn kmeans_plusplus(samples: &[&Desc], k: usize, rng: &mut StdRng) -> Vec<f32> {
    let mut centers = Vec::with_capacity(k * DESC_LEN);
    let first = samples[rng.gen_range(0..samples.len())];
    centers.extend_from_slice(first);

    let mut dists: Vec<f64> = samples.iter().map(|x| sq_dist(first, &x[..]) as f64).collect();
    for _ in 1..k {
        let total: f64 = dists.iter().sum();
        let pick = if total > 0. {
            let mut r = rng.gen::<f64>() * total;
            let mut pick = dists.len() - 1;
            for (i, d) in dists.iter().enumerate() {
                if r < *d {
                    pick = i;
                    break;
                }
                r -= d;
            }
            pick
        } else {
            rng.gen_range(0..samples.len())
        };
        let chosen = samples[pick];
        centers.extend_from_slice(chosen);
        for (d, x) in dists.iter_mut().zip(samples) {
            *d = (*d).min(sq_dist(chosen, &x[..]) as f64);
        }
    }
    centers
}

/// Move centers that attracted almost no samples onto random pool samples.
fn reassign_dead_centers(pool: &[Desc], centers: &mut [f32], counts: &mut [f64], rng: &mut StdRng) {
    let max = counts.iter().cloned().fold(0., f64::max);
    let limit = max * REASSIGNMENT_RATIO as f64;
    let dead: Vec<usize> = (0..counts.len()).filter(|&j| counts[j] < limit).collect();
    if dead.is_empty() || dead.len() == counts.len() {
        return;
    }
    let alive_min = (0..counts.len())
        .filter(|j| !dead.contains(j))
        .map(|j| counts[j])
        .fold(f64::INFINITY, f64::min);
    for j in dead {
        let x = &pool[rng.gen_range(0..pool.len())];
        centers[j * DESC_LEN..(j + 1) * DESC_LEN].copy_from_slice(x);
        counts[j] = alive_min;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// `per_blob` points around each of the given centers along the first axis.
    fn blobs(positions: &[f32], per_blob: usize) -> Vec<Desc> {
        let mut rng = StdRng::seed_from_u64(7);
        let mut pool = Vec::new();
        for &p in positions {
            for _ in 0..per_blob {
                let mut d = [0f32; DESC_LEN];
                d[0] = p + rng.gen_range(-1.0..1.0);
                d[1] = rng.gen_range(-1.0..1.0);
                pool.push(d);
            }
        }
        pool
    }

    #[test]
    fn empty_pool_is_fatal() {
        let err = mini_batch(&[], &VocabConfig::with_k(4)).unwrap_err();
        assert!(matches!(err, BowErr::EmptyTrainingPool));
    }

    #[test]
    fn pool_smaller_than_k_is_fatal() {
        let pool = blobs(&[0.], 3);
        let err = mini_batch(&pool, &VocabConfig::with_k(4)).unwrap_err();
        assert!(matches!(err, BowErr::InsufficientDescriptors { k: 4, found: 3 }));
    }

    #[test]
    fn separates_well_spaced_blobs() {
        let pool = blobs(&[0., 100., 200.], 50);
        let fit = mini_batch(&pool, &VocabConfig::with_k(3)).unwrap();
        assert_eq!(fit.centers.len(), 3 * DESC_LEN);
        let mut firsts: Vec<f32> = fit.centers.chunks_exact(DESC_LEN).map(|c| c[0]).collect();
        firsts.sort_by(|a, b| a.partial_cmp(b).unwrap());
        for (got, want) in firsts.iter().zip(&[0., 100., 200.]) {
            assert!((got - want).abs() < 5., "{} vs {}", got, want);
        }
        assert_eq!(fit.sizes.iter().sum::<usize>(), pool.len());
        assert!(fit.sizes.iter().all(|&s| s == 50));
    }

    #[test]
    fn same_seed_same_centers() {
        let pool = blobs(&[0., 10., 20., 30.], 40);
        let cfg = VocabConfig {
            batch_size: 16,
            ..VocabConfig::with_k(4)
        };
        let a = mini_batch(&pool, &cfg).unwrap();
        let b = mini_batch(&pool, &cfg).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn several_inits_are_supported() {
        let pool = blobs(&[0., 50.], 30);
        let cfg = VocabConfig {
            n_init: Some(3),
            ..VocabConfig::with_k(2)
        };
        let fit = mini_batch(&pool, &cfg).unwrap();
        assert_eq!(fit.sizes.len(), 2);
        assert!(fit.steps >= 1);
    }

    #[test]
    fn duplicate_points_still_give_k_centers() {
        let pool = vec![[1f32; DESC_LEN]; 10];
        let fit = mini_batch(&pool, &VocabConfig::with_k(3)).unwrap();
        assert_eq!(fit.centers.len(), 3 * DESC_LEN);
        assert_eq!(fit.inertia, 0.);
    }

    #[test]
    fn nearest_prefers_lower_index_on_ties() {
        let centers = vec![0f32; 2 * DESC_LEN];
        assert_eq!(nearest(&centers, &[0f32; DESC_LEN]).0, 0);
    }
}
