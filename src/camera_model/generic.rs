use nalgebra as na;
use serde::{Deserialize, Serialize};

use super::kb4::KannalaBrandt4;
use super::pinhole::Pinhole;
use super::radtan::RadTan;

/// The closed set of intrinsics models a registered camera may use.
///
/// Dispatch is by enum variant; the projection math itself is generic over
/// `RealField` so dual numbers differentiate through it during refinement.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "model")]
pub enum GenericModel {
    Pinhole(Pinhole),
    RadTan(RadTan),
    KannalaBrandt4(KannalaBrandt4),
}

impl GenericModel {
    pub fn params(&self) -> na::DVector<f64> {
        match self {
            GenericModel::Pinhole(m) => m.params(),
            GenericModel::RadTan(m) => m.params(),
            GenericModel::KannalaBrandt4(m) => m.params(),
        }
    }

    pub fn width(&self) -> u32 {
        match self {
            GenericModel::Pinhole(m) => m.width,
            GenericModel::RadTan(m) => m.width,
            GenericModel::KannalaBrandt4(m) => m.width,
        }
    }

    pub fn height(&self) -> u32 {
        match self {
            GenericModel::Pinhole(m) => m.height,
            GenericModel::RadTan(m) => m.height,
            GenericModel::KannalaBrandt4(m) => m.height,
        }
    }

    fn params_as<T: na::RealField>(&self) -> na::DVector<T> {
        let params = self.params();
        na::DVector::from_iterator(
            params.len(),
            params.iter().map(|v| T::from_f64(*v).unwrap()),
        )
    }

    /// Projects a camera-frame point, generic over the scalar type.
    ///
    /// No visibility checks happen here; callers feeding the optimizer are
    /// expected to pass points already verified to lie in front of the
    /// camera.
    pub fn project_generic<T: na::RealField>(&self, pt: &na::Vector3<T>) -> na::Vector2<T> {
        let params = self.params_as::<T>();
        match self {
            GenericModel::Pinhole(_) => Pinhole::project_one_impl(&params, pt),
            GenericModel::RadTan(_) => RadTan::project_one_impl(&params, pt),
            GenericModel::KannalaBrandt4(_) => KannalaBrandt4::project_one_impl(&params, pt),
        }
    }

    /// Projects a camera-frame point to pixels, `None` if it falls behind the
    /// camera or outside the image.
    pub fn project_one(&self, pt: &na::Vector3<f64>) -> Option<na::Vector2<f64>> {
        if pt[2] <= 1e-6 {
            return None;
        }
        let params = self.params();
        let p2d = match self {
            GenericModel::Pinhole(_) => Pinhole::project_one_impl(&params, pt),
            GenericModel::RadTan(_) => RadTan::project_one_impl(&params, pt),
            GenericModel::KannalaBrandt4(_) => KannalaBrandt4::project_one_impl(&params, pt),
        };
        let (w, h) = (self.width() as f64, self.height() as f64);
        if p2d[0] < 0.0 || p2d[0] > w || p2d[1] < 0.0 || p2d[1] > h {
            None
        } else {
            Some(p2d)
        }
    }

    /// Back-projects a pixel to a normalized ray (`z = 1`), `None` for pixels
    /// outside the image.
    pub fn unproject_one(&self, p2d: &na::Vector2<f64>) -> Option<na::Vector3<f64>> {
        let (w, h) = (self.width() as f64, self.height() as f64);
        if p2d[0] < 0.0 || p2d[0] >= w || p2d[1] < 0.0 || p2d[1] >= h {
            return None;
        }
        let ray = match self {
            GenericModel::Pinhole(m) => m.unproject_one_impl(p2d),
            GenericModel::RadTan(m) => m.unproject_one_impl(p2d),
            GenericModel::KannalaBrandt4(m) => m.unproject_one_impl(p2d),
        };
        Some(ray)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pinhole_project_unproject() {
        let model = GenericModel::Pinhole(Pinhole::new(500.0, 500.0, 320.0, 240.0, 640, 480));
        let pt = na::Vector3::new(0.5, -0.25, 2.0);
        let p2d = model.project_one(&pt).unwrap();
        let ray = model.unproject_one(&p2d).unwrap();
        assert!((ray[0] - pt[0] / pt[2]).abs() < 1e-12);
        assert!((ray[1] - pt[1] / pt[2]).abs() < 1e-12);
    }

    #[test]
    fn behind_camera_rejected() {
        let model = GenericModel::Pinhole(Pinhole::new(500.0, 500.0, 320.0, 240.0, 640, 480));
        assert!(model.project_one(&na::Vector3::new(0.0, 0.0, -1.0)).is_none());
    }
}
