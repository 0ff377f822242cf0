use nalgebra as na;
use serde::{Deserialize, Serialize};

/// Distortion-free projective model. Params: `[fx, fy, cx, cy]`.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Pinhole {
    pub fx: f64,
    pub fy: f64,
    pub cx: f64,
    pub cy: f64,
    pub width: u32,
    pub height: u32,
}

impl Pinhole {
    pub fn new(fx: f64, fy: f64, cx: f64, cy: f64, width: u32, height: u32) -> Pinhole {
        Pinhole {
            fx,
            fy,
            cx,
            cy,
            width,
            height,
        }
    }

    pub fn params(&self) -> na::DVector<f64> {
        na::dvector![self.fx, self.fy, self.cx, self.cy]
    }

    pub(crate) fn project_one_impl<T: na::RealField>(
        params: &na::DVector<T>,
        pt: &na::Vector3<T>,
    ) -> na::Vector2<T> {
        let xn = pt[0].clone() / pt[2].clone();
        let yn = pt[1].clone() / pt[2].clone();
        let px = params[0].clone() * xn + params[2].clone();
        let py = params[1].clone() * yn + params[3].clone();
        na::Vector2::new(px, py)
    }

    pub(crate) fn unproject_one_impl(&self, p2d: &na::Vector2<f64>) -> na::Vector3<f64> {
        na::Vector3::new(
            (p2d[0] - self.cx) / self.fx,
            (p2d[1] - self.cy) / self.fy,
            1.0,
        )
    }
}
