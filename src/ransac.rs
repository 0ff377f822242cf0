//! Model-agnostic consensus search.
//!
//! Implement [`Estimator`] for a geometric model and call [`ransac`] with the
//! data and some [`RansacOptions`]. The loop never panics: when no consensus
//! is found the returned [`RansacResult`] has `success == false`.

use rand::SeedableRng;
use rand::seq::IndexedRandom;
use rand_chacha::ChaCha8Rng;

/// Configuration for the consensus loop.
#[derive(Clone, Debug, serde::Deserialize)]
#[serde(default)]
pub struct RansacOptions {
    /// Maximum number of sampling iterations.
    pub max_iters: usize,
    /// Inlier residual threshold, in the residual's own units (pixels here).
    pub thresh: f64,
    /// Minimum number of inliers required to accept a model.
    pub min_inliers: usize,
    /// Desired confidence in `[0, 1]` for the adaptive iteration bound.
    pub confidence: f64,
    /// Seed for the sampling rng; fixed seed makes runs reproducible.
    pub seed: u64,
    /// Refit the model on the full inlier set before scoring.
    pub refit_on_inliers: bool,
}

impl Default for RansacOptions {
    fn default() -> Self {
        Self {
            max_iters: 200,
            thresh: 4.0,
            min_inliers: 6,
            confidence: 0.99,
            seed: 7,
            refit_on_inliers: true,
        }
    }
}

/// Output of a [`ransac`] run.
#[derive(Debug, Clone)]
pub struct RansacResult<M> {
    pub success: bool,
    pub model: Option<M>,
    /// Indices of inlier data points, ascending.
    pub inliers: Vec<usize>,
    /// Root-mean-square residual over the inliers.
    pub inlier_rms: f64,
    pub iters: usize,
}

impl<M> Default for RansacResult<M> {
    fn default() -> Self {
        Self {
            success: false,
            model: None,
            inliers: Vec::new(),
            inlier_rms: f64::INFINITY,
            iters: 0,
        }
    }
}

/// A minimal-sample model estimator driven by [`ransac`].
///
/// Methods take `&self` so an estimator can close over context such as the
/// camera intrinsics it projects through.
pub trait Estimator {
    type Datum;
    type Model;

    /// Smallest sample the fit accepts.
    const MIN_SAMPLES: usize;

    /// Fit a model from the data at `sample_indices`; `None` when the sample
    /// is degenerate or the fit fails.
    fn fit(&self, data: &[Self::Datum], sample_indices: &[usize]) -> Option<Self::Model>;

    /// Non-negative residual of one datum under the model, same units as
    /// `RansacOptions::thresh`.
    fn residual(&self, model: &Self::Model, datum: &Self::Datum) -> f64;

    /// Refit over the full inlier set. Default keeps the sampled model.
    fn refit(&self, _data: &[Self::Datum], _inliers: &[usize]) -> Option<Self::Model> {
        None
    }
}

fn rms(vals: &[f64]) -> f64 {
    if vals.is_empty() {
        return f64::INFINITY;
    }
    let ss: f64 = vals.iter().map(|&v| v * v).sum();
    (ss / vals.len() as f64).sqrt()
}

/// Standard adaptive bound: iterations needed to draw one all-inlier sample
/// with the requested confidence, given the best inlier ratio seen so far.
fn required_iterations(
    confidence: f64,
    inlier_ratio: f64,
    min_samples: usize,
    iters_so_far: usize,
    max_iters: usize,
) -> usize {
    if confidence <= 0.0 || inlier_ratio <= 0.0 {
        return max_iters;
    }
    let denom = (1.0 - inlier_ratio.powf(min_samples as f64)).max(1e-12).ln();
    if denom >= 0.0 {
        return max_iters;
    }
    let n_iter = ((1.0 - confidence).ln() / denom).ceil() as usize;
    n_iter.clamp(iters_so_far, max_iters)
}

fn is_better(
    has_best: bool,
    new_count: usize,
    new_rms: f64,
    best_count: usize,
    best_rms: f64,
) -> bool {
    !has_best || new_count > best_count || (new_count == best_count && new_rms < best_rms)
}

/// Run the consensus loop for `estimator` over `data`.
pub fn ransac<E: Estimator>(
    estimator: &E,
    data: &[E::Datum],
    opts: &RansacOptions,
) -> RansacResult<E::Model> {
    let mut best: RansacResult<E::Model> = RansacResult::default();
    if data.len() < E::MIN_SAMPLES {
        return best;
    }

    let all_indices: Vec<usize> = (0..data.len()).collect();
    let mut sample_idxs = vec![0usize; E::MIN_SAMPLES];
    let mut rng = ChaCha8Rng::seed_from_u64(opts.seed);
    let mut dynamic_max_iters = opts.max_iters;

    let mut inliers = Vec::<usize>::new();
    let mut residuals = Vec::<f64>::new();

    let mut num_iters = 0;
    while num_iters < dynamic_max_iters {
        num_iters += 1;
        all_indices
            .as_slice()
            .choose_multiple(&mut rng, E::MIN_SAMPLES)
            .enumerate()
            .for_each(|(k, &idx)| sample_idxs[k] = idx);

        let Some(model) = estimator.fit(data, &sample_idxs) else {
            continue;
        };

        inliers.clear();
        residuals.clear();
        for (i, datum) in data.iter().enumerate() {
            let r = estimator.residual(&model, datum);
            if r <= opts.thresh {
                inliers.push(i);
                residuals.push(r);
            }
        }
        if inliers.len() < opts.min_inliers {
            continue;
        }

        let mut model = model;
        if opts.refit_on_inliers {
            if let Some(refit) = estimator.refit(data, &inliers) {
                inliers.clear();
                residuals.clear();
                for (i, datum) in data.iter().enumerate() {
                    let r = estimator.residual(&refit, datum);
                    if r <= opts.thresh {
                        inliers.push(i);
                        residuals.push(r);
                    }
                }
                model = refit;
                if inliers.len() < opts.min_inliers {
                    continue;
                }
            }
        }

        let inlier_rms = rms(&residuals);
        if is_better(
            best.success,
            inliers.len(),
            inlier_rms,
            best.inliers.len(),
            best.inlier_rms,
        ) {
            best.success = true;
            best.model = Some(model);
            best.inliers = inliers.clone();
            best.inlier_rms = inlier_rms;
            best.iters = num_iters;
        }

        let inlier_ratio = inliers.len() as f64 / data.len() as f64;
        dynamic_max_iters = required_iterations(
            opts.confidence,
            inlier_ratio,
            E::MIN_SAMPLES,
            num_iters,
            opts.max_iters,
        );
    }

    best
}
