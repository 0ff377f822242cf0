use nalgebra as na;
use serde::{Deserialize, Serialize};

/// Pinhole with Brown-Conrady radial/tangential distortion.
/// Params: `[fx, fy, cx, cy, k1, k2, p1, p2]`.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RadTan {
    pub fx: f64,
    pub fy: f64,
    pub cx: f64,
    pub cy: f64,
    pub k1: f64,
    pub k2: f64,
    pub p1: f64,
    pub p2: f64,
    pub width: u32,
    pub height: u32,
}

impl RadTan {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        fx: f64,
        fy: f64,
        cx: f64,
        cy: f64,
        k1: f64,
        k2: f64,
        p1: f64,
        p2: f64,
        width: u32,
        height: u32,
    ) -> RadTan {
        RadTan {
            fx,
            fy,
            cx,
            cy,
            k1,
            k2,
            p1,
            p2,
            width,
            height,
        }
    }

    pub fn params(&self) -> na::DVector<f64> {
        na::dvector![self.fx, self.fy, self.cx, self.cy, self.k1, self.k2, self.p1, self.p2]
    }

    fn distort<T: na::RealField>(k1: &T, k2: &T, p1: &T, p2: &T, x: T, y: T) -> (T, T) {
        let two = T::from_f64(2.0).unwrap();
        let r2 = x.clone() * x.clone() + y.clone() * y.clone();
        let r4 = r2.clone() * r2.clone();
        let radial = T::one() + k1.clone() * r2.clone() + k2.clone() * r4;
        let xy = x.clone() * y.clone();
        let x_tan = two.clone() * p1.clone() * xy.clone()
            + p2.clone() * (r2.clone() + two.clone() * x.clone() * x.clone());
        let y_tan =
            p1.clone() * (r2 + two.clone() * y.clone() * y.clone()) + two * p2.clone() * xy;
        (x * radial.clone() + x_tan, y * radial + y_tan)
    }

    pub(crate) fn project_one_impl<T: na::RealField>(
        params: &na::DVector<T>,
        pt: &na::Vector3<T>,
    ) -> na::Vector2<T> {
        let xn = pt[0].clone() / pt[2].clone();
        let yn = pt[1].clone() / pt[2].clone();
        let (xd, yd) = Self::distort(&params[4], &params[5], &params[6], &params[7], xn, yn);
        let px = params[0].clone() * xd + params[2].clone();
        let py = params[1].clone() * yd + params[3].clone();
        na::Vector2::new(px, py)
    }

    /// Fixed-point undistortion, the usual companion of the forward model.
    /// Converges in a handful of iterations for moderate coefficients.
    pub(crate) fn unproject_one_impl(&self, p2d: &na::Vector2<f64>) -> na::Vector3<f64> {
        let xd = (p2d[0] - self.cx) / self.fx;
        let yd = (p2d[1] - self.cy) / self.fy;
        let mut x = xd;
        let mut y = yd;
        for _ in 0..8 {
            let r2 = x * x + y * y;
            let radial = 1.0 + self.k1 * r2 + self.k2 * r2 * r2;
            let x_tan = 2.0 * self.p1 * x * y + self.p2 * (r2 + 2.0 * x * x);
            let y_tan = self.p1 * (r2 + 2.0 * y * y) + 2.0 * self.p2 * x * y;
            x = (xd - x_tan) / radial;
            y = (yd - y_tan) / radial;
        }
        na::Vector3::new(x, y, 1.0)
    }
}
