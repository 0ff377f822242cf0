//! Maps a camera's local 2D features onto map landmarks.
//!
//! Two stages: descriptor nearest-neighbor matching with a distance-ratio
//! test, then geometric verification with a SQPnP consensus loop. The finder
//! is stateless between calls; it only reads the graph.

use std::collections::{BTreeSet, HashMap};

use log::debug;
use nalgebra as na;
use serde::Deserialize;

use crate::camera_model::GenericModel;
use crate::errors::{CalibrationError, Result};
use crate::ransac::{self, Estimator, RansacOptions};
use crate::sparse_graph::{Keyframe, SparseGraph};
use crate::types::{LandmarkId, Pose, RvecTvec};

/// One 2D feature extracted from the camera to be calibrated.
#[derive(Clone, Debug)]
pub struct FeatureObservation {
    pub pixel: glam::Vec2,
    pub descriptor: Vec<f32>,
}

/// A candidate observation-to-landmark association.
#[derive(Clone, Copy, Debug)]
pub struct Correspondence {
    pub observation_index: usize,
    pub landmark_id: LandmarkId,
    /// Descriptor distance of the winning match; lower is better.
    pub distance: f32,
}

/// Matching and verification policy.
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct CorrespondenceOptions {
    /// Best match must be closer than `ratio_test` times the second best.
    pub ratio_test: f32,
    /// Minimum verified correspondences to accept a coarse pose. PnP needs 3
    /// points; anything below 6 is fragile in practice.
    pub min_correspondences: usize,
    pub ransac: RansacOptions,
}

impl Default for CorrespondenceOptions {
    fn default() -> Self {
        Self {
            ratio_test: 0.8,
            min_correspondences: 6,
            ransac: RansacOptions::default(),
        }
    }
}

/// A verified set of correspondences together with the consensus pose.
#[derive(Debug)]
pub struct VerifiedCorrespondences {
    /// Map-to-camera transform estimated by the consensus loop.
    pub pose_c_w: Pose,
    /// Surviving correspondences, ascending by observation index.
    pub inliers: Vec<Correspondence>,
    /// RMS reprojection error over the inliers, pixels.
    pub inlier_rms: f64,
}

pub struct CorrespondenceFinder<'a> {
    graph: &'a SparseGraph,
    options: CorrespondenceOptions,
}

fn descriptor_distance(a: &[f32], b: &[f32]) -> f32 {
    a.iter()
        .zip(b.iter())
        .map(|(x, y)| (x - y) * (x - y))
        .sum::<f32>()
        .sqrt()
}

impl<'a> CorrespondenceFinder<'a> {
    pub fn new(graph: &'a SparseGraph, options: CorrespondenceOptions) -> Self {
        CorrespondenceFinder { graph, options }
    }

    /// Ratio-test nearest-neighbor matching of `observations` against the
    /// landmarks observed by `candidates`.
    ///
    /// Deterministic by construction: candidate landmarks are visited in
    /// ascending id order, so equal distances resolve to the lower id, and
    /// when two observations claim the same landmark the closer one (then the
    /// lower observation index) wins.
    pub fn find_correspondences(
        &self,
        observations: &[FeatureObservation],
        candidates: impl IntoIterator<Item = &'a Keyframe>,
    ) -> Vec<Correspondence> {
        let candidate_ids: BTreeSet<LandmarkId> = candidates
            .into_iter()
            .flat_map(|kf| kf.observations.iter().map(|obs| obs.landmark_id))
            .collect();
        let landmarks: Vec<(LandmarkId, &[f32])> = candidate_ids
            .iter()
            .filter_map(|&id| {
                let lm = self.graph.landmark(id).ok()?;
                lm.descriptor.as_deref().map(|d| (id, d))
            })
            .collect();
        if landmarks.len() < 2 {
            debug!("not enough described landmarks for a ratio test");
            return Vec::new();
        }

        // landmark -> (distance, observation index) winner
        let mut claimed: HashMap<LandmarkId, (f32, usize)> = HashMap::new();
        for (obs_idx, obs) in observations.iter().enumerate() {
            let mut best: Option<(f32, LandmarkId)> = None;
            let mut second_best = f32::INFINITY;
            for &(id, descriptor) in &landmarks {
                let d = descriptor_distance(&obs.descriptor, descriptor);
                match best {
                    None => best = Some((d, id)),
                    Some((best_d, _)) if d < best_d => {
                        second_best = best_d;
                        best = Some((d, id));
                    }
                    Some(_) => second_best = second_best.min(d),
                }
            }
            let Some((best_d, landmark_id)) = best else {
                continue;
            };
            if best_d >= self.options.ratio_test * second_best {
                continue;
            }
            match claimed.get(&landmark_id) {
                Some(&(d, idx)) if (d, idx) <= (best_d, obs_idx) => {}
                _ => {
                    claimed.insert(landmark_id, (best_d, obs_idx));
                }
            }
        }

        let mut matches: Vec<Correspondence> = claimed
            .into_iter()
            .map(|(landmark_id, (distance, observation_index))| Correspondence {
                observation_index,
                landmark_id,
                distance,
            })
            .collect();
        matches.sort_by_key(|c| c.observation_index);
        matches
    }

    /// Prunes `matches` down to a geometrically consistent subset and
    /// estimates the consensus camera pose.
    pub fn verify(
        &self,
        camera: &str,
        model: &GenericModel,
        observations: &[FeatureObservation],
        matches: &[Correspondence],
    ) -> Result<VerifiedCorrespondences> {
        let required = self.options.min_correspondences.max(SqPnpEstimator::MIN_SAMPLES);
        let insufficient = |found: usize| CalibrationError::InsufficientCorrespondences {
            camera: camera.to_string(),
            found,
            required,
        };
        if matches.len() < required {
            return Err(insufficient(matches.len()));
        }

        let mut data = Vec::with_capacity(matches.len());
        for m in matches {
            let obs = &observations[m.observation_index];
            let pixel = na::Vector2::new(obs.pixel.x as f64, obs.pixel.y as f64);
            let Some(ray) = model.unproject_one(&pixel) else {
                continue;
            };
            let landmark = self.graph.landmark(m.landmark_id)?;
            data.push(PnpDatum {
                correspondence: *m,
                p3d: landmark.position,
                ray: glam::Vec2::new(ray[0] as f32, ray[1] as f32),
                pixel,
            });
        }
        if data.len() < required {
            return Err(insufficient(data.len()));
        }

        let estimator = SqPnpEstimator { model };
        let mut opts = self.options.ransac.clone();
        opts.min_inliers = opts.min_inliers.max(required);
        let consensus = ransac::ransac(&estimator, &data, &opts);
        let (Some(pose), true) = (consensus.model, consensus.success) else {
            return Err(insufficient(0));
        };
        if consensus.inliers.len() < required {
            return Err(insufficient(consensus.inliers.len()));
        }
        debug!(
            "camera {}: {} / {} correspondences verified in {} iterations",
            camera,
            consensus.inliers.len(),
            data.len(),
            consensus.iters
        );

        Ok(VerifiedCorrespondences {
            pose_c_w: Pose::from_isometry(&pose),
            inliers: consensus
                .inliers
                .iter()
                .map(|&i| data[i].correspondence)
                .collect(),
            inlier_rms: consensus.inlier_rms,
        })
    }
}

/// One PnP datum: a map point, its normalized ray, and the measured pixel.
struct PnpDatum {
    correspondence: Correspondence,
    p3d: na::Point3<f64>,
    ray: glam::Vec2,
    pixel: na::Vector2<f64>,
}

/// SQPnP wrapped for the consensus engine.
struct SqPnpEstimator<'m> {
    model: &'m GenericModel,
}

impl SqPnpEstimator<'_> {
    fn solve(&self, data: &[PnpDatum], indices: &[usize]) -> Option<na::Isometry3<f64>> {
        let (p3ds, rays): (Vec<glam::Vec3>, Vec<glam::Vec2>) = indices
            .iter()
            .map(|&i| {
                let d = &data[i];
                (
                    glam::Vec3::new(d.p3d.x as f32, d.p3d.y as f32, d.p3d.z as f32),
                    d.ray,
                )
            })
            .unzip();
        let (r, t) = sqpnp_simple::sqpnp_solve_glam(&p3ds, &rays)?;
        let rt = RvecTvec::new(
            na::Vector3::new(r.0, r.1, r.2),
            na::Vector3::new(t.0, t.1, t.2),
        );
        rt.is_finite().then(|| rt.to_isometry())
    }
}

impl Estimator for SqPnpEstimator<'_> {
    type Datum = PnpDatum;
    type Model = na::Isometry3<f64>;

    const MIN_SAMPLES: usize = 6;

    fn fit(&self, data: &[Self::Datum], sample_indices: &[usize]) -> Option<Self::Model> {
        self.solve(data, sample_indices)
    }

    fn residual(&self, model: &Self::Model, datum: &Self::Datum) -> f64 {
        let pc = model * datum.p3d;
        match self.model.project_one(&pc.coords) {
            Some(projected) => (projected - datum.pixel).norm(),
            None => f64::INFINITY,
        }
    }

    fn refit(&self, data: &[Self::Datum], inliers: &[usize]) -> Option<Self::Model> {
        self.solve(data, inliers)
    }
}
