//! Nonlinear pose refinement over the verified correspondences.

use std::collections::HashMap;

use log::debug;
use nalgebra as na;
use serde::Deserialize;
use tiny_solver::LevenbergMarquardtOptimizer;
use tiny_solver::loss_functions::HuberLoss;
use tiny_solver::optimizer::{Optimizer, OptimizerOptions};
use tiny_solver::problem::Problem;

use super::factors::{
    LandmarkAnchorFactor, PoseLandmarkReprojectionFactor, PoseReprojectionFactor, rotate_point,
};
use crate::camera_model::GenericModel;
use crate::errors::{CalibrationError, Result};
use crate::types::{LandmarkId, RvecTvec};

/// Refinement policy. All values are deployment-tunable; the defaults are
/// the documented baseline.
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct RefineOptions {
    /// Hard bound on solver iterations; keeps every calibrate call finite.
    pub max_iterations: usize,
    /// Stop once the relative cost decrease falls below this.
    pub rel_decrease_tol: f64,
    /// Huber loss scale in pixels for down-weighting residual outliers.
    pub huber_delta: f64,
    /// Jointly refine well-observed landmark positions.
    pub refine_landmarks: bool,
    /// Upper bound on the number of landmarks allowed to move.
    pub max_refined_landmarks: usize,
    /// Anchor sigma in meters for refined landmarks.
    pub landmark_anchor_sigma: f64,
}

impl Default for RefineOptions {
    fn default() -> Self {
        Self {
            max_iterations: 50,
            rel_decrease_tol: 1e-10,
            huber_delta: 1.0,
            refine_landmarks: false,
            max_refined_landmarks: 100,
            landmark_anchor_sigma: 0.05,
        }
    }
}

/// One verified correspondence entering the problem.
pub struct RefinePoint {
    pub landmark_id: LandmarkId,
    pub p3d: na::Point3<f64>,
    pub p2d: na::Vector2<f64>,
    /// Whether this landmark's position is a decision variable.
    pub refine_landmark: bool,
}

pub struct RefineOutcome {
    /// Refined map-to-camera transform.
    pub pose_c_w: RvecTvec,
    /// Updated positions for jointly refined landmarks.
    pub refined_landmarks: Vec<(LandmarkId, na::Point3<f64>)>,
    pub initial_cost: f64,
    pub final_cost: f64,
}

/// Total squared reprojection error of `points` under `pose`. Points behind
/// the camera contribute a fixed penalty.
fn reprojection_cost(model: &GenericModel, pose: &RvecTvec, points: &[RefinePoint]) -> f64 {
    points
        .iter()
        .map(|pt| {
            let pc = rotate_point(&pose.rvec, &pt.p3d.coords) + pose.tvec;
            if pc[2] <= 1e-9 {
                return 1e8;
            }
            let projected = model.project_generic(&pc);
            (projected - pt.p2d).norm_squared()
        })
        .sum()
}

fn landmark_key(id: LandmarkId) -> String {
    format!("lm_{}", id.0)
}

/// Assembles and solves the least-squares problem for one camera.
///
/// Divergence is an explicit signal: a solver that fails to produce a
/// solution, a non-finite parameter vector, or a final cost above the
/// initial one all map to `OptimizationDivergedError`.
pub fn refine_pose(
    camera: &str,
    model: &GenericModel,
    initial: &RvecTvec,
    points: &[RefinePoint],
    opts: &RefineOptions,
) -> Result<RefineOutcome> {
    let diverged = |detail: &str| CalibrationError::OptimizationDiverged {
        camera: camera.to_string(),
        detail: detail.to_string(),
    };

    let mut problem = Problem::new();
    let mut initial_values = HashMap::<String, na::DVector<f64>>::new();
    initial_values.insert(
        "rvec".to_string(),
        na::dvector![initial.rvec[0], initial.rvec[1], initial.rvec[2]],
    );
    initial_values.insert(
        "tvec".to_string(),
        na::dvector![initial.tvec[0], initial.tvec[1], initial.tvec[2]],
    );

    for pt in points {
        if pt.refine_landmark {
            let key = landmark_key(pt.landmark_id);
            if !initial_values.contains_key(&key) {
                initial_values.insert(
                    key.clone(),
                    na::dvector![pt.p3d.x, pt.p3d.y, pt.p3d.z],
                );
                problem.add_residual_block(
                    3,
                    &[key.as_str()],
                    Box::new(LandmarkAnchorFactor::new(&pt.p3d, opts.landmark_anchor_sigma)),
                    None,
                );
            }
            problem.add_residual_block(
                2,
                &["rvec", "tvec", key.as_str()],
                Box::new(PoseLandmarkReprojectionFactor::new(model, &pt.p2d)),
                Some(Box::new(HuberLoss::new(opts.huber_delta))),
            );
        } else {
            problem.add_residual_block(
                2,
                &["rvec", "tvec"],
                Box::new(PoseReprojectionFactor::new(model, &pt.p3d, &pt.p2d)),
                Some(Box::new(HuberLoss::new(opts.huber_delta))),
            );
        }
    }

    let initial_cost = reprojection_cost(model, initial, points);

    let optimizer = LevenbergMarquardtOptimizer::default();
    let options = OptimizerOptions {
        max_iteration: opts.max_iterations,
        verbosity_level: 0,
        min_rel_error_decrease_threshold: opts.rel_decrease_tol,
        ..OptimizerOptions::default()
    };
    let solution = optimizer
        .optimize(&problem, &initial_values, Some(options))
        .ok_or_else(|| diverged("solver failed to produce a solution"))?;

    let rvec = &solution["rvec"];
    let tvec = &solution["tvec"];
    let pose_c_w = RvecTvec::new(
        na::Vector3::new(rvec[0], rvec[1], rvec[2]),
        na::Vector3::new(tvec[0], tvec[1], tvec[2]),
    );
    if !pose_c_w.is_finite() {
        return Err(diverged("non-finite pose parameters"));
    }

    let final_cost = reprojection_cost(model, &pose_c_w, points);
    if !final_cost.is_finite() {
        return Err(diverged("non-finite residual"));
    }
    if final_cost > initial_cost * (1.0 + 1e-9) + 1e-12 {
        return Err(diverged("residual increased during refinement"));
    }
    debug!(
        "camera {}: cost {:.6e} -> {:.6e} over {} points",
        camera,
        initial_cost,
        final_cost,
        points.len()
    );

    let refined_landmarks = points
        .iter()
        .filter(|pt| pt.refine_landmark)
        .filter_map(|pt| {
            let p = solution.get(&landmark_key(pt.landmark_id))?;
            Some((pt.landmark_id, na::Point3::new(p[0], p[1], p[2])))
        })
        .collect();

    Ok(RefineOutcome {
        pose_c_w,
        refined_landmarks,
        initial_cost,
        final_cost,
    })
}
