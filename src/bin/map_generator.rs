use std::path::{Path, PathBuf};

use clap::{Parser, Subcommand};
use infra_camera_calibration::io::{
    self, CameraRecord, CameraRegistry, FeatureRecord, ObservationSetFile,
};
use infra_camera_calibration::sparse_graph::SparseGraph;
use infra_camera_calibration::synthetic;
use infra_camera_calibration::types::Pose;
use nalgebra as na;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Args {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Generate a synthetic map plus camera observation sets
    Generate {
        /// Output directory
        #[arg(short, long)]
        output: PathBuf,

        /// Rng seed
        #[arg(long, default_value = "7")]
        seed: u64,

        /// Number of map keyframes
        #[arg(long, default_value = "5")]
        keyframes: usize,

        /// Number of landmarks
        #[arg(long, default_value = "200")]
        landmarks: usize,

        /// Number of cameras to synthesize
        #[arg(long, default_value = "3")]
        cameras: usize,

        /// Uniform pixel noise amplitude
        #[arg(long, default_value = "0.2")]
        noise_px: f64,

        /// Fraction of observations turned into outliers
        #[arg(long, default_value = "0.0")]
        outlier_fraction: f64,
    },
}

fn generate(
    output: &Path,
    seed: u64,
    keyframes: usize,
    landmarks: usize,
    cameras: usize,
    noise_px: f64,
    outlier_fraction: f64,
) -> Result<(), Box<dyn std::error::Error>> {
    std::fs::create_dir_all(output)?;
    let model = synthetic::default_model();
    let map = synthetic::build_map(seed, keyframes, landmarks, &model);
    io::object_to_json(&output.join("map.json"), &map)?;
    let graph = SparseGraph::from_records(map)?;

    let mut registry = CameraRegistry { cameras: vec![] };
    let mut sets = ObservationSetFile {
        observations: Default::default(),
    };
    let mut gt = Vec::new();
    for i in 0..cameras {
        let camera_id = format!("cam{}", i);
        let angle = 0.04 * i as f64;
        let pose = Pose::new(
            na::UnitQuaternion::from_axis_angle(&na::Vector3::y_axis(), angle),
            na::Vector3::new(-0.5 + 0.5 * i as f64, 0.1, -0.2),
        );
        let mut observations = synthetic::camera_observations(
            &graph,
            &model,
            &pose,
            usize::MAX,
            noise_px,
            seed + 100 + i as u64,
        );
        if outlier_fraction > 0.0 {
            synthetic::corrupt_observations(
                &mut observations,
                outlier_fraction,
                &model,
                seed + 200 + i as u64,
            );
        }
        sets.observations.insert(
            camera_id.clone(),
            observations
                .iter()
                .map(|obs| FeatureRecord {
                    pixel: [obs.pixel.x, obs.pixel.y],
                    descriptor: obs.descriptor.clone(),
                })
                .collect(),
        );
        let q = pose.rotation();
        let t = pose.translation();
        gt.push(serde_json::json!({
            "camera_id": camera_id,
            "rotation": [q.w, q.i, q.j, q.k],
            "translation": [t[0], t[1], t[2]],
        }));
        registry.cameras.push(CameraRecord {
            id: camera_id,
            intrinsics: model.clone(),
        });
    }

    io::object_to_json(&output.join("cameras.json"), &registry)?;
    io::object_to_json(&output.join("observations.json"), &sets)?;
    io::object_to_json(&output.join("ground_truth.json"), &gt)?;
    println!(
        "wrote map ({} keyframes, {} landmarks) and {} observation sets to {}",
        keyframes,
        landmarks,
        cameras,
        output.display()
    );
    Ok(())
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();
    let args = Args::parse();
    match args.command {
        Commands::Generate {
            output,
            seed,
            keyframes,
            landmarks,
            cameras,
            noise_px,
            outlier_fraction,
        } => generate(
            &output,
            seed,
            keyframes,
            landmarks,
            cameras,
            noise_px,
            outlier_fraction,
        ),
    }
}
