use std::collections::BTreeMap;

use infra_camera_calibration::calibration::{
    CalibrationOptions, CalibrationStatus, CameraState, CancelToken, InfrastructureCalibration,
};
use infra_camera_calibration::errors::CalibrationError;
use infra_camera_calibration::synthetic;
use infra_camera_calibration::types::Pose;
use nalgebra as na;

fn gt_pose() -> Pose {
    Pose::new(
        na::UnitQuaternion::from_axis_angle(&na::Vector3::y_axis(), 0.05),
        na::Vector3::new(0.2, -0.1, -0.3),
    )
}

fn setup(seed: u64, landmarks: usize) -> InfrastructureCalibration {
    let model = synthetic::default_model();
    let mut calib = InfrastructureCalibration::new(CalibrationOptions::default());
    calib.set_map(synthetic::build_graph(seed, 3, landmarks, &model));
    calib.add_camera("cam0", model).unwrap();
    calib
}

#[test]
fn noise_free_scene_converges_to_ground_truth() {
    let mut calib = setup(21, 60);
    let model = synthetic::default_model();
    let observations = synthetic::camera_observations(
        calib.graph().unwrap(),
        &model,
        &gt_pose(),
        50,
        0.0,
        3,
    );

    let result = calib.calibrate("cam0", &observations).unwrap();
    assert_eq!(result.status, CalibrationStatus::Converged);
    assert_eq!(calib.camera_state("cam0").unwrap(), CameraState::Converged);

    let pose = result.pose.as_ref().unwrap();
    assert!(pose.translation_distance_to(&gt_pose()) < 1e-3);
    assert!(pose.rotation_angle_to(&gt_pose()) < 1e-4);
    assert!(result.mean_reprojection_error < 1e-2);
    assert!(result.max_reprojection_error < 0.1);
}

#[test]
fn calibrate_is_idempotent() {
    let mut calib = setup(22, 60);
    let model = synthetic::default_model();
    let observations = synthetic::camera_observations(
        calib.graph().unwrap(),
        &model,
        &gt_pose(),
        45,
        0.2,
        4,
    );

    let first = calib.calibrate("cam0", &observations).unwrap();
    let second = calib.calibrate("cam0", &observations).unwrap();
    let (a, b) = (first.pose.unwrap(), second.pose.unwrap());
    assert!(a.translation_distance_to(&b) < 1e-9);
    assert!(a.rotation_angle_to(&b) < 1e-9);
    assert_eq!(first.inlier_count, second.inlier_count);
}

#[test]
fn thirty_percent_outliers_are_rejected() {
    let mut calib = setup(23, 60);
    let model = synthetic::default_model();
    let mut observations = synthetic::camera_observations(
        calib.graph().unwrap(),
        &model,
        &gt_pose(),
        40,
        0.0,
        5,
    );
    let corrupted = synthetic::corrupt_observations(&mut observations, 0.3, &model, 17);
    assert_eq!(corrupted, 12);

    let result = calib.calibrate("cam0", &observations).unwrap();
    assert_eq!(result.status, CalibrationStatus::Converged);
    assert!(result.inlier_count >= 26);
    let pose = result.pose.as_ref().unwrap();
    assert!(pose.translation_distance_to(&gt_pose()) < 1e-2);
    assert!(pose.rotation_angle_to(&gt_pose()) < 1e-3);
}

#[test]
fn beyond_breakdown_point_never_reports_a_wrong_pose() {
    let mut calib = setup(24, 60);
    let model = synthetic::default_model();
    let mut observations = synthetic::camera_observations(
        calib.graph().unwrap(),
        &model,
        &gt_pose(),
        40,
        0.0,
        6,
    );
    synthetic::corrupt_observations(&mut observations, 0.85, &model, 18);

    match calib.calibrate("cam0", &observations) {
        // Acceptable: the estimator reports failure...
        Err(
            CalibrationError::InsufficientCorrespondences { .. }
            | CalibrationError::OptimizationDiverged { .. },
        ) => {}
        Err(other) => panic!("unexpected error kind: {other}"),
        // ...or it found the (tiny) true consensus set; silently wrong
        // poses are the one forbidden outcome.
        Ok(result) => {
            let pose = result.pose.as_ref().unwrap();
            assert!(pose.translation_distance_to(&gt_pose()) < 5e-2);
        }
    }
}

#[test]
fn scenario_three_keyframes_fifty_landmarks() {
    // 3 keyframes, 50 shared landmarks, 40 correspondences of which 35 are
    // correct: expect convergence, >= 30 inliers, sub-pixel mean error.
    let mut calib = setup(25, 50);
    let model = synthetic::default_model();
    let mut observations = synthetic::camera_observations(
        calib.graph().unwrap(),
        &model,
        &gt_pose(),
        40,
        0.0,
        7,
    );
    assert_eq!(observations.len(), 40);
    let corrupted = synthetic::corrupt_observations(&mut observations, 0.125, &model, 19);
    assert_eq!(corrupted, 5);

    let result = calib.calibrate("cam0", &observations).unwrap();
    assert_eq!(result.status, CalibrationStatus::Converged);
    assert!(result.inlier_count >= 30);
    assert!(result.mean_reprojection_error < 1.0);
}

#[test]
fn two_correspondences_is_insufficient() {
    let mut calib = setup(26, 40);
    let model = synthetic::default_model();
    let observations = synthetic::camera_observations(
        calib.graph().unwrap(),
        &model,
        &gt_pose(),
        2,
        0.0,
        8,
    );

    let err = calib.calibrate("cam0", &observations).unwrap_err();
    assert!(matches!(
        err,
        CalibrationError::InsufficientCorrespondences { .. }
    ));
    assert_eq!(
        calib.camera_state("cam0").unwrap(),
        CameraState::InsufficientData
    );
}

#[test]
fn batch_continues_past_a_failing_camera() {
    let model = synthetic::default_model();
    let mut calib = InfrastructureCalibration::new(CalibrationOptions::default());
    calib.set_map(synthetic::build_graph(27, 3, 60, &model));
    for camera_id in ["cam0", "cam1", "cam2"] {
        calib.add_camera(camera_id, model.clone()).unwrap();
    }

    let graph = calib.graph().unwrap();
    let good0 = synthetic::camera_observations(graph, &model, &gt_pose(), 40, 0.0, 9);
    let starved = synthetic::camera_observations(graph, &model, &gt_pose(), 2, 0.0, 10);
    let good2 = synthetic::camera_observations(graph, &model, &gt_pose(), 40, 0.0, 11);

    let mut sets = BTreeMap::new();
    sets.insert("cam0".to_string(), good0);
    sets.insert("cam1".to_string(), starved);
    sets.insert("cam2".to_string(), good2);

    let results = calib.run(&sets).unwrap();
    assert_eq!(results.len(), 3);
    assert_eq!(results["cam0"].status, CalibrationStatus::Converged);
    assert_eq!(results["cam2"].status, CalibrationStatus::Converged);
    let failed = &results["cam1"];
    assert_eq!(failed.status, CalibrationStatus::InsufficientData);
    assert!(failed.pose.is_none());
    assert!(failed.failure.as_ref().unwrap().contains("cam1"));
}

#[test]
fn reloading_the_map_invalidates_camera_state() {
    let mut calib = setup(28, 60);
    let model = synthetic::default_model();
    let observations = synthetic::camera_observations(
        calib.graph().unwrap(),
        &model,
        &gt_pose(),
        40,
        0.0,
        12,
    );
    calib.calibrate("cam0", &observations).unwrap();
    assert_eq!(calib.camera_state("cam0").unwrap(), CameraState::Converged);

    // A new map drops every camera back to Registered; correspondence
    // search must run again against the new landmarks.
    calib.set_map(synthetic::build_graph(29, 3, 60, &model));
    assert_eq!(calib.camera_state("cam0").unwrap(), CameraState::Registered);

    let observations = synthetic::camera_observations(
        calib.graph().unwrap(),
        &model,
        &gt_pose(),
        40,
        0.0,
        13,
    );
    let result = calib.calibrate("cam0", &observations).unwrap();
    assert_eq!(result.status, CalibrationStatus::Converged);
}

#[test]
fn duplicate_camera_registration_fails() {
    let model = synthetic::default_model();
    let mut calib = InfrastructureCalibration::new(CalibrationOptions::default());
    calib.add_camera("cam0", model.clone()).unwrap();
    let err = calib.add_camera("cam0", model).unwrap_err();
    assert!(matches!(err, CalibrationError::DuplicateCamera(id) if id == "cam0"));
}

#[test]
fn cancellation_reverts_to_registered() {
    let mut calib = setup(30, 60);
    let model = synthetic::default_model();
    let observations = synthetic::camera_observations(
        calib.graph().unwrap(),
        &model,
        &gt_pose(),
        40,
        0.0,
        14,
    );

    let token = CancelToken::new();
    token.cancel();
    let err = calib
        .calibrate_cancellable("cam0", &observations, &token)
        .unwrap_err();
    assert!(matches!(err, CalibrationError::Cancelled(_)));
    assert_eq!(calib.camera_state("cam0").unwrap(), CameraState::Registered);

    // A fresh call without the token succeeds; no partial state leaked.
    let result = calib.calibrate("cam0", &observations).unwrap();
    assert_eq!(result.status, CalibrationStatus::Converged);
}
