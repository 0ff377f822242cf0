use std::path::PathBuf;

use thiserror::Error;

/// Structural or referential invariant violations detected while loading a map.
///
/// Each variant names the offending entity so the broken record can be fixed
/// or re-exported without guessing.
#[derive(Debug, Error)]
pub enum CorruptMapError {
    #[error("map file {path} is not a valid map: {detail}")]
    Malformed { path: PathBuf, detail: String },
    #[error("duplicate keyframe id {0}")]
    DuplicateKeyframeId(u64),
    #[error("duplicate landmark id {0}")]
    DuplicateLandmarkId(u64),
    #[error("keyframe {keyframe} observes unknown landmark {landmark}")]
    DanglingLandmarkRef { keyframe: u64, landmark: u64 },
    #[error("keyframe {0} has no landmark observations")]
    DisconnectedKeyframe(u64),
    #[error("keyframe {0} pose has non-finite components")]
    NonFinitePose(u64),
    #[error("landmark {0} position has non-finite components")]
    NonFinitePosition(u64),
    #[error(
        "landmark {landmark} descriptor length {found} does not match map descriptor length {expected}"
    )]
    DescriptorLengthMismatch {
        landmark: u64,
        expected: usize,
        found: usize,
    },
}

/// All failure modes of the calibration core.
#[derive(Debug, Error)]
pub enum CalibrationError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error(transparent)]
    CorruptMap(#[from] CorruptMapError),
    #[error("{kind} {id} not found")]
    NotFound { kind: &'static str, id: u64 },
    #[error("camera {0} is already registered")]
    DuplicateCamera(String),
    #[error("camera {0} is not registered")]
    UnknownCamera(String),
    #[error("no map loaded; call load_map first")]
    MapNotLoaded,
    #[error(
        "camera {camera}: only {found} verified correspondences, need at least {required}"
    )]
    InsufficientCorrespondences {
        camera: String,
        found: usize,
        required: usize,
    },
    #[error("camera {camera}: optimization diverged: {detail}")]
    OptimizationDiverged { camera: String, detail: String },
    #[error("camera {0}: calibration cancelled")]
    Cancelled(String),
}

pub type Result<T> = std::result::Result<T, CalibrationError>;
