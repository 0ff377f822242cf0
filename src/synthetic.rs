//! Seeded synthetic scenes for tests, benchmarks, and the dataset generator.
//!
//! Geometry: landmarks fill a box in front of the keyframes, which sit near
//! the map origin looking down +z. Descriptors are random unit vectors,
//! pairwise distant at this dimensionality.

use nalgebra as na;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

use crate::camera_model::{GenericModel, Pinhole};
use crate::correspondence::FeatureObservation;
use crate::io::{KeyframeRecord, LandmarkRecord, MapFile, ObservationRecord};
use crate::sparse_graph::SparseGraph;
use crate::types::Pose;

pub const DESCRIPTOR_LEN: usize = 32;

pub fn default_model() -> GenericModel {
    GenericModel::Pinhole(Pinhole::new(500.0, 500.0, 320.0, 240.0, 640, 480))
}

fn random_descriptor(rng: &mut ChaCha8Rng) -> Vec<f32> {
    let mut d: Vec<f32> = (0..DESCRIPTOR_LEN).map(|_| rng.random_range(-1.0..1.0)).collect();
    let norm = d.iter().map(|v| v * v).sum::<f32>().sqrt().max(1e-6);
    d.iter_mut().for_each(|v| *v /= norm);
    d
}

/// Generates map records: `num_landmarks` points in a box `z in [4, 8]`,
/// observed by `num_keyframes` keyframes strung along the x axis at `z = 0`.
pub fn build_map(
    seed: u64,
    num_keyframes: usize,
    num_landmarks: usize,
    model: &GenericModel,
) -> MapFile {
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    let landmarks: Vec<LandmarkRecord> = (0..num_landmarks)
        .map(|i| LandmarkRecord {
            id: i as u64,
            position: [
                rng.random_range(-2.0..2.0),
                rng.random_range(-1.5..1.5),
                rng.random_range(4.0..8.0),
            ],
            descriptor: Some(random_descriptor(&mut rng)),
        })
        .collect();

    let keyframes = (0..num_keyframes)
        .map(|k| {
            let spread = if num_keyframes > 1 {
                -0.8 + 1.6 * k as f64 / (num_keyframes - 1) as f64
            } else {
                0.0
            };
            let pose = Pose::new(
                na::UnitQuaternion::identity(),
                na::Vector3::new(spread, 0.0, 0.0),
            );
            let t_c_w = pose.inverse();
            let observations = landmarks
                .iter()
                .filter_map(|lm| {
                    let p = na::Point3::new(lm.position[0], lm.position[1], lm.position[2]);
                    let pc = t_c_w.transform_point(&p);
                    let pixel = model.project_one(&pc.coords)?;
                    Some(ObservationRecord {
                        landmark_id: lm.id,
                        pixel: [pixel[0] as f32, pixel[1] as f32],
                        descriptor: None,
                    })
                })
                .collect();
            let q = pose.rotation();
            KeyframeRecord {
                id: k as u64,
                rotation: [q.w, q.i, q.j, q.k],
                translation: [spread, 0.0, 0.0],
                observations,
            }
        })
        .collect();

    MapFile {
        keyframes,
        landmarks,
    }
}

/// Convenience wrapper: build and validate a graph in one step.
pub fn build_graph(
    seed: u64,
    num_keyframes: usize,
    num_landmarks: usize,
    model: &GenericModel,
) -> SparseGraph {
    SparseGraph::from_records(build_map(seed, num_keyframes, num_landmarks, model))
        .expect("synthetic map is valid by construction")
}

/// Projects up to `max_count` landmarks into a camera at the ground-truth
/// pose `pose_cam_to_map`, with uniform pixel noise of amplitude `noise_px`.
/// Observation descriptors are exact copies of the landmark descriptors.
pub fn camera_observations(
    graph: &SparseGraph,
    model: &GenericModel,
    pose_cam_to_map: &Pose,
    max_count: usize,
    noise_px: f64,
    seed: u64,
) -> Vec<FeatureObservation> {
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    let t_c_w = pose_cam_to_map.inverse();
    let mut landmark_ids: Vec<_> = graph.keyframes().flat_map(|kf| {
        kf.observations.iter().map(|obs| obs.landmark_id)
    }).collect();
    landmark_ids.sort();
    landmark_ids.dedup();

    let mut observations = Vec::new();
    for id in landmark_ids {
        if observations.len() >= max_count {
            break;
        }
        let Ok(landmark) = graph.landmark(id) else {
            continue;
        };
        let Some(descriptor) = landmark.descriptor.clone() else {
            continue;
        };
        let pc = t_c_w.transform_point(&landmark.position);
        let Some(pixel) = model.project_one(&pc.coords) else {
            continue;
        };
        let noisy = [
            pixel[0] + rng.random_range(-1.0..1.0) * noise_px,
            pixel[1] + rng.random_range(-1.0..1.0) * noise_px,
        ];
        observations.push(FeatureObservation {
            pixel: glam::Vec2::new(noisy[0] as f32, noisy[1] as f32),
            descriptor,
        });
    }
    observations
}

/// Replaces the pixel of the first `fraction` of observations with a random
/// in-image location, turning them into geometric outliers while leaving the
/// descriptors (and hence the matching stage) intact.
pub fn corrupt_observations(
    observations: &mut [FeatureObservation],
    fraction: f64,
    model: &GenericModel,
    seed: u64,
) -> usize {
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    let count = ((observations.len() as f64) * fraction).round() as usize;
    let (w, h) = (model.width() as f32, model.height() as f32);
    for obs in observations.iter_mut().take(count) {
        // Push the pixel far from its true location.
        let dx: f32 = rng.random_range(60.0..200.0) * if rng.random_bool(0.5) { 1.0 } else { -1.0 };
        let dy: f32 = rng.random_range(60.0..200.0) * if rng.random_bool(0.5) { 1.0 } else { -1.0 };
        obs.pixel = glam::Vec2::new(
            (obs.pixel.x + dx).clamp(1.0, w - 1.0),
            (obs.pixel.y + dy).clamp(1.0, h - 1.0),
        );
    }
    count
}
