use nalgebra as na;

/// Identifier of a keyframe inside a [`crate::sparse_graph::SparseGraph`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct KeyframeId(pub u64);

/// Identifier of a landmark inside a [`crate::sparse_graph::SparseGraph`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct LandmarkId(pub u64);

impl std::fmt::Display for KeyframeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "kf{}", self.0)
    }
}

impl std::fmt::Display for LandmarkId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "lm{}", self.0)
    }
}

/// Axis-angle + translation pair, the exchange format between the PnP
/// initializer and the nonlinear refinement blocks.
///
/// Transforms map-frame points into the camera frame: `p_cam = R * p_map + t`.
#[derive(Clone, Debug)]
pub struct RvecTvec {
    pub rvec: na::Vector3<f64>,
    pub tvec: na::Vector3<f64>,
}

impl RvecTvec {
    pub fn new(rvec: na::Vector3<f64>, tvec: na::Vector3<f64>) -> RvecTvec {
        RvecTvec { rvec, tvec }
    }

    pub fn to_isometry(&self) -> na::Isometry3<f64> {
        na::Isometry3::new(self.tvec, self.rvec)
    }

    pub fn is_finite(&self) -> bool {
        self.rvec.iter().chain(self.tvec.iter()).all(|v| v.is_finite())
    }
}

/// A rigid transform with an optional 6x6 covariance (rotation block first).
///
/// The rotation is a unit quaternion by construction; every way of building a
/// `Pose` goes through nalgebra's normalizing constructors, so a pose read
/// back after optimization is already renormalized. Fields are private and
/// the type has no mutators: calibration replaces poses, it never edits them.
#[derive(Clone, Debug)]
pub struct Pose {
    rotation: na::UnitQuaternion<f64>,
    translation: na::Vector3<f64>,
    covariance: Option<na::Matrix6<f64>>,
}

impl Pose {
    pub fn new(rotation: na::UnitQuaternion<f64>, translation: na::Vector3<f64>) -> Pose {
        Pose {
            rotation,
            translation,
            covariance: None,
        }
    }

    pub fn identity() -> Pose {
        Pose::new(na::UnitQuaternion::identity(), na::Vector3::zeros())
    }

    pub fn from_isometry(iso: &na::Isometry3<f64>) -> Pose {
        Pose::new(iso.rotation, iso.translation.vector)
    }

    /// Builds a pose from axis-angle and translation vectors. The quaternion
    /// comes out normalized regardless of the axis-angle magnitude.
    pub fn from_rvec_tvec(rt: &RvecTvec) -> Pose {
        Pose::from_isometry(&rt.to_isometry())
    }

    pub fn with_covariance(mut self, covariance: na::Matrix6<f64>) -> Pose {
        self.covariance = Some(covariance);
        self
    }

    pub fn rotation(&self) -> &na::UnitQuaternion<f64> {
        &self.rotation
    }

    pub fn translation(&self) -> &na::Vector3<f64> {
        &self.translation
    }

    pub fn covariance(&self) -> Option<&na::Matrix6<f64>> {
        self.covariance.as_ref()
    }

    pub fn to_isometry(&self) -> na::Isometry3<f64> {
        na::Isometry3::from_parts(na::Translation3::from(self.translation), self.rotation)
    }

    pub fn to_rvec_tvec(&self) -> RvecTvec {
        RvecTvec::new(self.rotation.scaled_axis(), self.translation)
    }

    pub fn inverse(&self) -> Pose {
        Pose::from_isometry(&self.to_isometry().inverse())
    }

    pub fn transform_point(&self, pt: &na::Point3<f64>) -> na::Point3<f64> {
        self.to_isometry() * pt
    }

    pub fn is_finite(&self) -> bool {
        self.rotation.coords.iter().all(|v| v.is_finite())
            && self.translation.iter().all(|v| v.is_finite())
    }

    /// Euclidean distance between the two translation components.
    pub fn translation_distance_to(&self, other: &Pose) -> f64 {
        (self.translation - other.translation).norm()
    }

    /// Relative rotation angle in radians.
    pub fn rotation_angle_to(&self, other: &Pose) -> f64 {
        self.rotation.angle_to(&other.rotation)
    }
}
