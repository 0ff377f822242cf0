use std::collections::BTreeMap;

use infra_camera_calibration::calibration::{
    CalibrationOptions, CalibrationStatus, InfrastructureCalibration,
};
use infra_camera_calibration::camera_model::{GenericModel, RadTan};
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

#[test]
fn calibrate_without_map_fails() {
    let model = synthetic::default_model();
    let mut calib = InfrastructureCalibration::new(CalibrationOptions::default());
    calib.add_camera("cam0", model).unwrap();
    let err = calib.calibrate("cam0", &[]).unwrap_err();
    assert!(matches!(err, CalibrationError::MapNotLoaded));
}

#[test]
fn unknown_camera_fails() {
    let model = synthetic::default_model();
    let mut calib = InfrastructureCalibration::new(CalibrationOptions::default());
    calib.set_map(synthetic::build_graph(40, 3, 40, &model));
    let err = calib.calibrate("nope", &[]).unwrap_err();
    assert!(matches!(err, CalibrationError::UnknownCamera(id) if id == "nope"));
}

#[test]
fn empty_observations_are_insufficient() {
    let model = synthetic::default_model();
    let mut calib = InfrastructureCalibration::new(CalibrationOptions::default());
    calib.set_map(synthetic::build_graph(41, 3, 40, &model));
    calib.add_camera("cam0", model).unwrap();
    let err = calib.calibrate("cam0", &[]).unwrap_err();
    assert!(matches!(
        err,
        CalibrationError::InsufficientCorrespondences { found: 0, .. }
    ));
}

#[test]
fn batch_records_cameras_without_observations() {
    let model = synthetic::default_model();
    let mut calib = InfrastructureCalibration::new(CalibrationOptions::default());
    calib.set_map(synthetic::build_graph(42, 3, 60, &model));
    calib.add_camera("cam0", model.clone()).unwrap();
    calib.add_camera("cam1", model.clone()).unwrap();

    let graph = calib.graph().unwrap();
    let observations = synthetic::camera_observations(graph, &model, &gt_pose(), 40, 0.0, 21);
    let mut sets = BTreeMap::new();
    sets.insert("cam0".to_string(), observations);

    let results = calib.run(&sets).unwrap();
    assert_eq!(results["cam0"].status, CalibrationStatus::Converged);
    assert_eq!(results["cam1"].status, CalibrationStatus::InsufficientData);
    assert!(results["cam1"].failure.is_some());
}

#[test]
fn joint_landmark_refinement_stays_anchored() {
    let mut options = CalibrationOptions::default();
    options.refine.refine_landmarks = true;
    options.refine.max_refined_landmarks = 20;

    let model = synthetic::default_model();
    let mut calib = InfrastructureCalibration::new(options);
    calib.set_map(synthetic::build_graph(43, 3, 60, &model));
    calib.add_camera("cam0", model.clone()).unwrap();

    let observations = synthetic::camera_observations(
        calib.graph().unwrap(),
        &model,
        &gt_pose(),
        45,
        0.1,
        22,
    );
    let result = calib.calibrate("cam0", &observations).unwrap();
    assert_eq!(result.status, CalibrationStatus::Converged);
    let pose = result.pose.as_ref().unwrap();
    // The anchors keep the jointly refined problem from drifting.
    assert!(pose.translation_distance_to(&gt_pose()) < 5e-3);
    assert!(result.mean_reprojection_error < 0.5);
}

#[test]
fn load_map_from_disk_end_to_end() {
    let path = std::env::temp_dir().join(format!("icrs_{}_e2e_map.json", std::process::id()));
    let model = synthetic::default_model();
    let map = synthetic::build_map(45, 3, 60, &model);
    infra_camera_calibration::io::object_to_json(&path, &map).unwrap();

    let mut calib = InfrastructureCalibration::new(CalibrationOptions::default());
    calib.load_map(&path).unwrap();
    calib.add_camera("cam0", model.clone()).unwrap();

    let observations = synthetic::camera_observations(
        calib.graph().unwrap(),
        &model,
        &gt_pose(),
        40,
        0.0,
        24,
    );
    let result = calib.calibrate("cam0", &observations).unwrap();
    assert_eq!(result.status, CalibrationStatus::Converged);
    std::fs::remove_file(&path).ok();
}

#[test]
fn distorted_model_end_to_end() {
    let model = GenericModel::RadTan(RadTan::new(
        460.0, 458.0, 320.0, 240.0, -0.05, 0.01, 1.0e-4, -8.0e-5, 640, 480,
    ));
    let mut calib = InfrastructureCalibration::new(CalibrationOptions::default());
    calib.set_map(synthetic::build_graph(44, 3, 60, &model));
    calib.add_camera("cam0", model.clone()).unwrap();

    let observations = synthetic::camera_observations(
        calib.graph().unwrap(),
        &model,
        &gt_pose(),
        40,
        0.0,
        23,
    );
    let result = calib.calibrate("cam0", &observations).unwrap();
    assert_eq!(result.status, CalibrationStatus::Converged);
    let pose = result.pose.as_ref().unwrap();
    assert!(pose.translation_distance_to(&gt_pose()) < 5e-3);
    assert!(pose.rotation_angle_to(&gt_pose()) < 5e-4);
}
