use nalgebra as na;
use tiny_solver::factors::Factor;

use crate::camera_model::GenericModel;

/// Rodrigues rotation of `pt` by the axis-angle vector `rvec`, generic over
/// the scalar so dual numbers differentiate through it.
pub(crate) fn rotate_point<T: na::RealField>(
    rvec: &na::Vector3<T>,
    pt: &na::Vector3<T>,
) -> na::Vector3<T> {
    let theta2 = rvec.dot(rvec);
    if theta2 < T::from_f64(1e-14).unwrap() {
        // First-order expansion near the identity.
        return pt + rvec.cross(pt);
    }
    let theta = theta2.sqrt();
    let axis = rvec / theta.clone();
    let cos_t = theta.clone().cos();
    let sin_t = theta.sin();
    let ax_pt = axis.cross(pt);
    let ax_dot = axis.dot(pt);
    pt * cos_t.clone() + ax_pt * sin_t + axis * (ax_dot * (T::one() - cos_t))
}

fn lift_point<T: na::RealField>(pt: &na::Point3<f64>) -> na::Vector3<T> {
    na::Vector3::new(
        T::from_f64(pt.x).unwrap(),
        T::from_f64(pt.y).unwrap(),
        T::from_f64(pt.z).unwrap(),
    )
}

fn rvec_tvec_from<T: na::RealField>(
    rvec: &na::DVector<T>,
    tvec: &na::DVector<T>,
) -> (na::Vector3<T>, na::Vector3<T>) {
    (
        na::Vector3::new(rvec[0].clone(), rvec[1].clone(), rvec[2].clone()),
        na::Vector3::new(tvec[0].clone(), tvec[1].clone(), tvec[2].clone()),
    )
}

/// Reprojection residual for a fixed landmark observed by the camera being
/// calibrated. Parameter blocks: `[rvec, tvec]`.
#[derive(Clone)]
pub struct PoseReprojectionFactor {
    model: GenericModel,
    p3d: na::Point3<f64>,
    p2d: na::Vector2<f64>,
}

impl PoseReprojectionFactor {
    pub fn new(
        model: &GenericModel,
        p3d: &na::Point3<f64>,
        p2d: &na::Vector2<f64>,
    ) -> PoseReprojectionFactor {
        PoseReprojectionFactor {
            model: model.clone(),
            p3d: *p3d,
            p2d: *p2d,
        }
    }
}

impl<T: na::RealField> Factor<T> for PoseReprojectionFactor {
    fn residual_func(&self, params: &[na::DVector<T>]) -> na::DVector<T> {
        // params [rvec, tvec]
        let (rvec, tvec) = rvec_tvec_from(&params[0], &params[1]);
        let pc = rotate_point(&rvec, &lift_point(&self.p3d)) + tvec;
        let p2d_p = self.model.project_generic(&pc);
        na::dvector![
            p2d_p[0].clone() - T::from_f64(self.p2d[0]).unwrap(),
            p2d_p[1].clone() - T::from_f64(self.p2d[1]).unwrap()
        ]
    }
}

/// Reprojection residual with the landmark position as a third parameter
/// block, used when joint landmark refinement is enabled.
/// Parameter blocks: `[rvec, tvec, landmark]`.
#[derive(Clone)]
pub struct PoseLandmarkReprojectionFactor {
    model: GenericModel,
    p2d: na::Vector2<f64>,
}

impl PoseLandmarkReprojectionFactor {
    pub fn new(model: &GenericModel, p2d: &na::Vector2<f64>) -> PoseLandmarkReprojectionFactor {
        PoseLandmarkReprojectionFactor {
            model: model.clone(),
            p2d: *p2d,
        }
    }
}

impl<T: na::RealField> Factor<T> for PoseLandmarkReprojectionFactor {
    fn residual_func(&self, params: &[na::DVector<T>]) -> na::DVector<T> {
        // params [rvec, tvec, landmark]
        let (rvec, tvec) = rvec_tvec_from(&params[0], &params[1]);
        let p3d = na::Vector3::new(
            params[2][0].clone(),
            params[2][1].clone(),
            params[2][2].clone(),
        );
        let pc = rotate_point(&rvec, &p3d) + tvec;
        let p2d_p = self.model.project_generic(&pc);
        na::dvector![
            p2d_p[0].clone() - T::from_f64(self.p2d[0]).unwrap(),
            p2d_p[1].clone() - T::from_f64(self.p2d[1]).unwrap()
        ]
    }
}

/// Soft anchor tying a refined landmark to its mapped position. The mapped
/// keyframe poses are never decision variables, so this keeps the problem
/// gauge-fixed while still letting well-observed landmarks move a little.
/// Parameter blocks: `[landmark]`.
#[derive(Clone)]
pub struct LandmarkAnchorFactor {
    anchor: na::Point3<f64>,
    weight: f64,
}

impl LandmarkAnchorFactor {
    pub fn new(anchor: &na::Point3<f64>, sigma: f64) -> LandmarkAnchorFactor {
        LandmarkAnchorFactor {
            anchor: *anchor,
            weight: 1.0 / sigma.max(1e-9),
        }
    }
}

impl<T: na::RealField> Factor<T> for LandmarkAnchorFactor {
    fn residual_func(&self, params: &[na::DVector<T>]) -> na::DVector<T> {
        let w = T::from_f64(self.weight).unwrap();
        na::dvector![
            (params[0][0].clone() - T::from_f64(self.anchor.x).unwrap()) * w.clone(),
            (params[0][1].clone() - T::from_f64(self.anchor.y).unwrap()) * w.clone(),
            (params[0][2].clone() - T::from_f64(self.anchor.z).unwrap()) * w
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::camera_model::Pinhole;

    #[test]
    fn rodrigues_matches_nalgebra() {
        let rvec = na::Vector3::new(0.3, -0.5, 0.2);
        let pt = na::Vector3::new(1.0, 2.0, 3.0);
        let expected = na::Rotation3::new(rvec) * pt;
        let got = rotate_point(&rvec, &pt);
        assert!((expected - got).norm() < 1e-12);
    }

    #[test]
    fn residual_zero_at_ground_truth() {
        let model = GenericModel::Pinhole(Pinhole::new(500.0, 500.0, 320.0, 240.0, 640, 480));
        let p3d = na::Point3::new(0.4, -0.2, 5.0);
        let p2d = model.project_one(&p3d.coords).unwrap();
        let factor = PoseReprojectionFactor::new(&model, &p3d, &p2d);

        let zero = na::dvector![0.0, 0.0, 0.0];
        let residual = factor.residual_func(&[zero.clone(), zero]);
        assert!(residual.norm() < 1e-10);

        let shifted = na::dvector![0.1, 0.0, 0.0];
        let residual = factor.residual_func(&[na::dvector![0.0, 0.0, 0.0], shifted]);
        assert!(residual.norm() > 1e-3);
    }
}
