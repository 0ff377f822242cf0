//! Top-level orchestration: camera registry, per-camera state machine, and
//! the batch runner.

use std::collections::BTreeMap;
use std::collections::BTreeSet;
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use log::{info, warn};
use nalgebra as na;
use rayon::prelude::*;
use serde::Deserialize;

use crate::camera_model::GenericModel;
use crate::correspondence::{CorrespondenceFinder, CorrespondenceOptions, FeatureObservation};
use crate::errors::{CalibrationError, Result};
use crate::optimization::{RefineOptions, RefinePoint, refine_pose};
use crate::sparse_graph::{Keyframe, SparseGraph};
use crate::types::Pose;

/// Policy knobs for a calibration run. Defaults are the documented baseline;
/// deployments tune them via the config file.
#[derive(Clone, Debug, Default, Deserialize)]
#[serde(default)]
pub struct CalibrationOptions {
    pub matching: CorrespondenceOptions,
    pub refine: RefineOptions,
    /// Restrict correspondence search to keyframes within this radius (in
    /// meters) of the camera's previous estimate. `0` searches the whole map
    /// and is the right choice for a camera with no prior.
    pub search_radius: f64,
}

/// Per-camera progress through the calibration pipeline.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CameraState {
    Registered,
    CorrespondencesFound,
    CoarsePoseEstimated,
    Refining,
    Converged,
    Diverged,
    InsufficientData,
}

/// Terminal outcome recorded in a [`CalibrationResult`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CalibrationStatus {
    Converged,
    Diverged,
    InsufficientData,
}

/// The per-camera output of a calibration run.
#[derive(Clone, Debug)]
pub struct CalibrationResult {
    pub camera_id: String,
    /// Camera-to-map transform; `None` unless converged.
    pub pose: Option<Pose>,
    pub inlier_count: usize,
    pub mean_reprojection_error: f64,
    pub median_reprojection_error: f64,
    pub max_reprojection_error: f64,
    pub status: CalibrationStatus,
    /// Failure detail for non-converged cameras.
    pub failure: Option<String>,
}

/// Cooperative cancellation for an in-flight `calibrate` call. Cancelling
/// one camera does not disturb the others.
#[derive(Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> CancelToken {
        CancelToken::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

struct CameraEntry {
    model: GenericModel,
    state: CameraState,
    /// Last converged camera-to-map pose, used as a spatial search hint.
    last_pose: Option<Pose>,
}

/// Owns the loaded map and the registered camera set for the duration of a
/// calibration run. Explicitly constructed and passed by reference; there is
/// no process-wide instance.
pub struct InfrastructureCalibration {
    graph: Option<SparseGraph>,
    cameras: BTreeMap<String, CameraEntry>,
    options: CalibrationOptions,
}

impl InfrastructureCalibration {
    pub fn new(options: CalibrationOptions) -> InfrastructureCalibration {
        InfrastructureCalibration {
            graph: None,
            cameras: BTreeMap::new(),
            options,
        }
    }

    /// Loads (or replaces) the map. Replacing a map invalidates every
    /// camera's progress: correspondence search must be re-run against the
    /// new map, so all states drop back to `Registered`.
    pub fn load_map<P: AsRef<Path>>(&mut self, path: P) -> Result<()> {
        let graph = SparseGraph::load(path)?;
        self.set_map(graph);
        Ok(())
    }

    /// Installs an already-built map; same invalidation rules as
    /// [`Self::load_map`].
    pub fn set_map(&mut self, graph: SparseGraph) {
        self.graph = Some(graph);
        for entry in self.cameras.values_mut() {
            entry.state = CameraState::Registered;
            entry.last_pose = None;
        }
    }

    pub fn graph(&self) -> Option<&SparseGraph> {
        self.graph.as_ref()
    }

    /// Registers a camera to be calibrated.
    pub fn add_camera(&mut self, camera_id: &str, intrinsics: GenericModel) -> Result<()> {
        if self.cameras.contains_key(camera_id) {
            return Err(CalibrationError::DuplicateCamera(camera_id.to_string()));
        }
        self.cameras.insert(
            camera_id.to_string(),
            CameraEntry {
                model: intrinsics,
                state: CameraState::Registered,
                last_pose: None,
            },
        );
        Ok(())
    }

    pub fn camera_state(&self, camera_id: &str) -> Result<CameraState> {
        self.cameras
            .get(camera_id)
            .map(|entry| entry.state)
            .ok_or_else(|| CalibrationError::UnknownCamera(camera_id.to_string()))
    }

    /// Calibrates one camera against the loaded map.
    pub fn calibrate(
        &mut self,
        camera_id: &str,
        observations: &[FeatureObservation],
    ) -> Result<CalibrationResult> {
        self.calibrate_cancellable(camera_id, observations, &CancelToken::default())
    }

    /// Like [`Self::calibrate`], but checks `cancel` between pipeline
    /// stages. A cancelled camera reverts to `Registered` and publishes no
    /// partial pose.
    pub fn calibrate_cancellable(
        &mut self,
        camera_id: &str,
        observations: &[FeatureObservation],
        cancel: &CancelToken,
    ) -> Result<CalibrationResult> {
        let graph = self.graph.as_ref().ok_or(CalibrationError::MapNotLoaded)?;
        let entry = self
            .cameras
            .get_mut(camera_id)
            .ok_or_else(|| CalibrationError::UnknownCamera(camera_id.to_string()))?;

        let model = entry.model.clone();
        let hint = entry.last_pose.clone();
        let outcome = calibrate_camera(
            graph,
            camera_id,
            &model,
            hint.as_ref(),
            observations,
            &self.options,
            cancel,
            |state| entry.state = state,
        );
        match &outcome {
            Ok(result) => {
                entry.state = CameraState::Converged;
                entry.last_pose = result.pose.clone();
            }
            Err(CalibrationError::Cancelled(_)) => entry.state = CameraState::Registered,
            Err(err) => entry.state = terminal_state_for(err),
        }
        outcome
    }

    /// Calibrates every registered camera, in parallel, continuing past
    /// individual failures. A camera's failure is recorded in its result
    /// entry; only a missing map aborts the batch.
    pub fn run(
        &mut self,
        observation_sets: &BTreeMap<String, Vec<FeatureObservation>>,
    ) -> Result<BTreeMap<String, CalibrationResult>> {
        let graph = self.graph.as_ref().ok_or(CalibrationError::MapNotLoaded)?;
        for camera_id in observation_sets.keys() {
            if !self.cameras.contains_key(camera_id) {
                return Err(CalibrationError::UnknownCamera(camera_id.clone()));
            }
        }

        let options = &self.options;
        let outcomes: Vec<(String, Result<CalibrationResult>)> = self
            .cameras
            .par_iter()
            .map(|(camera_id, entry)| {
                let outcome = match observation_sets.get(camera_id) {
                    Some(observations) => calibrate_camera(
                        graph,
                        camera_id,
                        &entry.model,
                        entry.last_pose.as_ref(),
                        observations,
                        options,
                        &CancelToken::default(),
                        |_| {},
                    ),
                    None => Err(CalibrationError::InsufficientCorrespondences {
                        camera: camera_id.clone(),
                        found: 0,
                        required: options.matching.min_correspondences,
                    }),
                };
                (camera_id.clone(), outcome)
            })
            .collect();

        let mut results = BTreeMap::new();
        for (camera_id, outcome) in outcomes {
            let entry = self
                .cameras
                .get_mut(&camera_id)
                .expect("registered above");
            let result = match outcome {
                Ok(result) => {
                    entry.state = CameraState::Converged;
                    entry.last_pose = result.pose.clone();
                    result
                }
                Err(err) => {
                    warn!("camera {} failed: {}", camera_id, err);
                    entry.state = terminal_state_for(&err);
                    failure_result(&camera_id, &err)
                }
            };
            results.insert(camera_id, result);
        }
        let converged = results
            .values()
            .filter(|r| r.status == CalibrationStatus::Converged)
            .count();
        info!("batch finished: {}/{} cameras converged", converged, results.len());
        Ok(results)
    }
}

fn terminal_state_for(err: &CalibrationError) -> CameraState {
    match err {
        CalibrationError::OptimizationDiverged { .. } => CameraState::Diverged,
        _ => CameraState::InsufficientData,
    }
}

fn failure_result(camera_id: &str, err: &CalibrationError) -> CalibrationResult {
    let status = match err {
        CalibrationError::OptimizationDiverged { .. } => CalibrationStatus::Diverged,
        _ => CalibrationStatus::InsufficientData,
    };
    CalibrationResult {
        camera_id: camera_id.to_string(),
        pose: None,
        inlier_count: 0,
        mean_reprojection_error: 0.0,
        median_reprojection_error: 0.0,
        max_reprojection_error: 0.0,
        status,
        failure: Some(err.to_string()),
    }
}

/// The per-camera pipeline: correspondence search, coarse pose, refinement,
/// statistics. Free of registry state so the batch runner can parallelize
/// it; `on_state` reports stage transitions back to the owner.
#[allow(clippy::too_many_arguments)]
fn calibrate_camera(
    graph: &SparseGraph,
    camera_id: &str,
    model: &GenericModel,
    pose_hint: Option<&Pose>,
    observations: &[FeatureObservation],
    options: &CalibrationOptions,
    cancel: &CancelToken,
    mut on_state: impl FnMut(CameraState),
) -> Result<CalibrationResult> {
    let cancelled = || CalibrationError::Cancelled(camera_id.to_string());
    let finder = CorrespondenceFinder::new(graph, options.matching.clone());

    // Stage 1: correspondence search, restricted to a neighborhood when a
    // prior pose is available.
    let candidates: Vec<&Keyframe> = match pose_hint {
        Some(hint) if options.search_radius > 0.0 => {
            graph.keyframes_near(hint, options.search_radius).collect()
        }
        _ => graph.keyframes().collect(),
    };
    let matches = finder.find_correspondences(observations, candidates);
    on_state(CameraState::CorrespondencesFound);
    if cancel.is_cancelled() {
        return Err(cancelled());
    }

    // Stage 2: robust coarse pose. Refinement never starts without it.
    let verified = finder.verify(camera_id, model, observations, &matches)?;
    on_state(CameraState::CoarsePoseEstimated);
    if cancel.is_cancelled() {
        return Err(cancelled());
    }

    // Stage 3: nonlinear refinement.
    on_state(CameraState::Refining);
    let refine_budget: BTreeSet<_> = if options.refine.refine_landmarks {
        verified
            .inliers
            .iter()
            .map(|c| c.landmark_id)
            .filter(|&id| {
                graph
                    .landmark(id)
                    .map(|lm| lm.is_refinement_eligible())
                    .unwrap_or(false)
            })
            .take(options.refine.max_refined_landmarks)
            .collect()
    } else {
        BTreeSet::new()
    };
    let mut points = Vec::with_capacity(verified.inliers.len());
    for c in &verified.inliers {
        let landmark = graph.landmark(c.landmark_id)?;
        let pixel = observations[c.observation_index].pixel;
        points.push(RefinePoint {
            landmark_id: c.landmark_id,
            p3d: landmark.position,
            p2d: na::Vector2::new(pixel.x as f64, pixel.y as f64),
            refine_landmark: refine_budget.contains(&c.landmark_id),
        });
    }
    let initial = verified.pose_c_w.to_rvec_tvec();
    let outcome = refine_pose(camera_id, model, &initial, &points, &options.refine)?;
    if cancel.is_cancelled() {
        return Err(cancelled());
    }

    // Residual statistics under the refined pose.
    let refined: std::collections::HashMap<_, _> =
        outcome.refined_landmarks.iter().cloned().collect();
    let iso = outcome.pose_c_w.to_isometry();
    let mut errors: Vec<f64> = points
        .iter()
        .map(|pt| {
            let p3d = refined.get(&pt.landmark_id).copied().unwrap_or(pt.p3d);
            let pc = iso * p3d;
            match model.project_one(&pc.coords) {
                Some(projected) => (projected - pt.p2d).norm(),
                None => f64::INFINITY,
            }
        })
        .collect();
    errors.sort_by(f64::total_cmp);
    let mean = errors.iter().sum::<f64>() / errors.len().max(1) as f64;
    let median = errors.get(errors.len() / 2).copied().unwrap_or(0.0);
    let max = errors.last().copied().unwrap_or(0.0);
    if !mean.is_finite() {
        return Err(CalibrationError::OptimizationDiverged {
            camera: camera_id.to_string(),
            detail: "non-finite reprojection statistics".to_string(),
        });
    }

    let pose_c_w = Pose::from_rvec_tvec(&outcome.pose_c_w);
    info!(
        "camera {}: converged with {} inliers, mean reprojection error {:.4} px",
        camera_id,
        points.len(),
        mean
    );
    Ok(CalibrationResult {
        camera_id: camera_id.to_string(),
        pose: Some(pose_c_w.inverse()),
        inlier_count: points.len(),
        mean_reprojection_error: mean,
        median_reprojection_error: median,
        max_reprojection_error: max,
        status: CalibrationStatus::Converged,
        failure: None,
    })
}
