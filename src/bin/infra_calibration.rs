use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Instant;

use clap::Parser;
use infra_camera_calibration::calibration::{CalibrationOptions, InfrastructureCalibration};
use infra_camera_calibration::correspondence::FeatureObservation;
use infra_camera_calibration::io::{self, CameraRegistry, ObservationSetFile};

#[derive(Parser)]
#[command(version, about, author)]
struct ICRSCli {
    /// path to the sparse map json
    map: PathBuf,

    /// path to the camera registry json
    cameras: PathBuf,

    /// path to the per-camera observation sets json
    observations: PathBuf,

    /// calibration options json; defaults are used when omitted
    #[arg(long)]
    config: Option<PathBuf>,

    /// text report output path
    #[arg(long, default_value = "calibration_report.txt")]
    report: PathBuf,

    /// json results output path
    #[arg(long, default_value = "calibration_results.json")]
    results: PathBuf,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();
    let cli = ICRSCli::parse();

    let options: CalibrationOptions = match &cli.config {
        Some(path) => io::object_from_json(path)?,
        None => CalibrationOptions::default(),
    };

    let mut calib = InfrastructureCalibration::new(options);
    let now = Instant::now();
    calib.load_map(&cli.map)?;
    println!("loading map took {:.6} sec", now.elapsed().as_secs_f64());

    let registry: CameraRegistry = io::object_from_json(&cli.cameras)?;
    for camera in registry.cameras {
        calib.add_camera(&camera.id, camera.intrinsics)?;
    }

    let sets: ObservationSetFile = io::object_from_json(&cli.observations)?;
    let observation_sets: BTreeMap<String, Vec<FeatureObservation>> = sets
        .observations
        .into_iter()
        .map(|(camera_id, features)| {
            let observations = features
                .into_iter()
                .map(|f| FeatureObservation {
                    pixel: glam::Vec2::new(f.pixel[0], f.pixel[1]),
                    descriptor: f.descriptor,
                })
                .collect();
            (camera_id, observations)
        })
        .collect();

    let now = Instant::now();
    let results = calib.run(&observation_sets)?;
    let duration_sec = now.elapsed().as_secs_f64();
    println!("calibrating {} cameras took {:.6} sec", results.len(), duration_sec);

    io::write_report(&cli.report, &results)?;
    io::write_results_json(&cli.results, &results)?;
    for (camera_id, result) in &results {
        println!(
            "{}: {:?}, {} inliers, mean reprojection error {:.4} px",
            camera_id, result.status, result.inlier_count, result.mean_reprojection_error
        );
    }
    Ok(())
}
