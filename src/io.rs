//! JSON schemas for maps, camera registries, observation sets, and the
//! calibration report writer.
//!
//! The on-disk byte layout is the storage layer's concern; what this module
//! pins down is the logical contract: required fields and referential
//! integrity, which `SparseGraph::from_records` enforces after parsing.

use std::collections::BTreeMap;
use std::io::Write;
use std::path::Path;

use serde::{Serialize, de::DeserializeOwned};

use crate::calibration::{CalibrationResult, CalibrationStatus};
use crate::camera_model::GenericModel;
use crate::errors::{CalibrationError, CorruptMapError, Result};

/// Persisted form of a [`crate::sparse_graph::SparseGraph`].
#[derive(Clone, Debug, Serialize, serde::Deserialize)]
pub struct MapFile {
    pub keyframes: Vec<KeyframeRecord>,
    pub landmarks: Vec<LandmarkRecord>,
}

#[derive(Clone, Debug, Serialize, serde::Deserialize)]
pub struct KeyframeRecord {
    pub id: u64,
    /// Unit quaternion `[w, x, y, z]`, map-frame.
    pub rotation: [f64; 4],
    pub translation: [f64; 3],
    pub observations: Vec<ObservationRecord>,
}

#[derive(Clone, Debug, Serialize, serde::Deserialize)]
pub struct ObservationRecord {
    pub landmark_id: u64,
    pub pixel: [f32; 2],
    #[serde(default)]
    pub descriptor: Option<Vec<f32>>,
}

#[derive(Clone, Debug, Serialize, serde::Deserialize)]
pub struct LandmarkRecord {
    pub id: u64,
    pub position: [f64; 3],
    #[serde(default)]
    pub descriptor: Option<Vec<f32>>,
}

/// Camera registry file: id -> intrinsics model.
#[derive(Clone, Debug, Serialize, serde::Deserialize)]
pub struct CameraRegistry {
    pub cameras: Vec<CameraRecord>,
}

#[derive(Clone, Debug, Serialize, serde::Deserialize)]
pub struct CameraRecord {
    pub id: String,
    #[serde(flatten)]
    pub intrinsics: GenericModel,
}

/// Per-camera feature observations, as produced by an external extraction
/// pipeline.
#[derive(Clone, Debug, Serialize, serde::Deserialize)]
pub struct ObservationSetFile {
    pub observations: BTreeMap<String, Vec<FeatureRecord>>,
}

#[derive(Clone, Debug, Serialize, serde::Deserialize)]
pub struct FeatureRecord {
    pub pixel: [f32; 2],
    pub descriptor: Vec<f32>,
}

/// Serializes an object to a JSON file.
pub fn object_to_json<T: Serialize>(output_path: &Path, object: &T) -> Result<()> {
    let j = serde_json::to_string_pretty(object).map_err(|e| CalibrationError::Io {
        path: output_path.to_path_buf(),
        source: e.into(),
    })?;
    let mut file = std::fs::File::create(output_path).map_err(|e| CalibrationError::Io {
        path: output_path.to_path_buf(),
        source: e,
    })?;
    file.write_all(j.as_bytes()).map_err(|e| CalibrationError::Io {
        path: output_path.to_path_buf(),
        source: e,
    })
}

/// Deserializes an object from a JSON file. Parse failures count as corrupt
/// input: the file exists but does not satisfy the schema.
pub fn object_from_json<T: DeserializeOwned>(file_path: &Path) -> Result<T> {
    let contents = std::fs::read_to_string(file_path).map_err(|e| CalibrationError::Io {
        path: file_path.to_path_buf(),
        source: e,
    })?;
    serde_json::from_str(&contents).map_err(|e| {
        CorruptMapError::Malformed {
            path: file_path.to_path_buf(),
            detail: e.to_string(),
        }
        .into()
    })
}

/// Writes a per-camera calibration report to a text file.
pub fn write_report(
    output_path: &Path,
    results: &BTreeMap<String, CalibrationResult>,
) -> Result<()> {
    let mut s = String::new();
    let converged = results
        .values()
        .filter(|r| r.status == CalibrationStatus::Converged)
        .count();
    s += format!("calibrated {}/{} cameras\n\n", converged, results.len()).as_str();
    for (camera_id, result) in results {
        s += format!("{}:\n", camera_id).as_str();
        s += format!("    status: {:?}\n", result.status).as_str();
        if let Some(pose) = &result.pose {
            let t = pose.translation();
            s += format!("    position: [{:.4}, {:.4}, {:.4}] m\n", t[0], t[1], t[2]).as_str();
        }
        s += format!("    inliers: {}\n", result.inlier_count).as_str();
        if result.status == CalibrationStatus::Converged {
            s += format!(
                "    mean reprojection error: {:.5} px\n",
                result.mean_reprojection_error
            )
            .as_str();
            s += format!(
                "    median reprojection error: {:.5} px\n",
                result.median_reprojection_error
            )
            .as_str();
            s += format!(
                "    max reprojection error: {:.5} px\n",
                result.max_reprojection_error
            )
            .as_str();
        }
        if let Some(failure) = &result.failure {
            s += format!("    failure: {}\n", failure).as_str();
        }
        s += "\n";
    }
    let mut file = std::fs::File::create(output_path).map_err(|e| CalibrationError::Io {
        path: output_path.to_path_buf(),
        source: e,
    })?;
    file.write_all(s.as_bytes()).map_err(|e| CalibrationError::Io {
        path: output_path.to_path_buf(),
        source: e,
    })
}

/// Serializes calibration results (poses as quaternion + translation) for
/// downstream consumers.
pub fn write_results_json(
    output_path: &Path,
    results: &BTreeMap<String, CalibrationResult>,
) -> Result<()> {
    let entries: Vec<serde_json::Value> = results
        .iter()
        .map(|(camera_id, r)| {
            let pose = r.pose.as_ref().map(|p| {
                let q = p.rotation();
                let t = p.translation();
                serde_json::json!({
                    "rotation": [q.w, q.i, q.j, q.k],
                    "translation": [t[0], t[1], t[2]],
                })
            });
            serde_json::json!({
                "camera_id": camera_id,
                "status": format!("{:?}", r.status),
                "pose": pose,
                "inliers": r.inlier_count,
                "mean_reprojection_error": r.mean_reprojection_error,
                "median_reprojection_error": r.median_reprojection_error,
                "max_reprojection_error": r.max_reprojection_error,
                "failure": r.failure,
            })
        })
        .collect();
    object_to_json(output_path, &entries)
}
