use nalgebra as na;
use serde::{Deserialize, Serialize};

/// Kannala-Brandt fisheye model with four distortion coefficients.
/// Params: `[fx, fy, cx, cy, k1, k2, k3, k4]`.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct KannalaBrandt4 {
    pub fx: f64,
    pub fy: f64,
    pub cx: f64,
    pub cy: f64,
    pub k1: f64,
    pub k2: f64,
    pub k3: f64,
    pub k4: f64,
    pub width: u32,
    pub height: u32,
}

impl KannalaBrandt4 {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        fx: f64,
        fy: f64,
        cx: f64,
        cy: f64,
        k1: f64,
        k2: f64,
        k3: f64,
        k4: f64,
        width: u32,
        height: u32,
    ) -> KannalaBrandt4 {
        KannalaBrandt4 {
            fx,
            fy,
            cx,
            cy,
            k1,
            k2,
            k3,
            k4,
            width,
            height,
        }
    }

    pub fn params(&self) -> na::DVector<f64> {
        na::dvector![self.fx, self.fy, self.cx, self.cy, self.k1, self.k2, self.k3, self.k4]
    }

    fn f<T: na::RealField>(k1: &T, k2: &T, k3: &T, k4: &T, theta: &T) -> T {
        let theta2 = theta.clone() * theta.clone();
        let theta4 = theta2.clone() * theta2.clone();
        let theta6 = theta2.clone() * theta4.clone();
        let theta8 = theta2.clone() * theta6.clone();
        theta.clone()
            * (T::one()
                + k1.clone() * theta2
                + k2.clone() * theta4
                + k3.clone() * theta6
                + k4.clone() * theta8)
    }

    fn df_dtheta(k1: f64, k2: f64, k3: f64, k4: f64, theta: f64) -> f64 {
        let theta2 = theta * theta;
        let theta4 = theta2 * theta2;
        let theta6 = theta2 * theta4;
        let theta8 = theta2 * theta6;
        1.0 + 3.0 * k1 * theta2 + 5.0 * k2 * theta4 + 7.0 * k3 * theta6 + 9.0 * k4 * theta8
    }

    pub(crate) fn project_one_impl<T: na::RealField>(
        params: &na::DVector<T>,
        pt: &na::Vector3<T>,
    ) -> na::Vector2<T> {
        let xn = pt[0].clone() / pt[2].clone();
        let yn = pt[1].clone() / pt[2].clone();
        let r2 = xn.clone() * xn.clone() + yn.clone() * yn.clone();
        let r = r2.sqrt();
        // The theta_d / r factor tends to 1 on the optical axis.
        let d = if r < T::from_f64(1e-8).unwrap() {
            T::one()
        } else {
            let theta = r.clone().atan();
            Self::f(&params[4], &params[5], &params[6], &params[7], &theta) / r
        };
        let px = params[0].clone() * (xn * d.clone()) + params[2].clone();
        let py = params[1].clone() * (yn * d) + params[3].clone();
        na::Vector2::new(px, py)
    }

    /// Inverts the theta polynomial with Newton iterations.
    pub(crate) fn unproject_one_impl(&self, p2d: &na::Vector2<f64>) -> na::Vector3<f64> {
        let xd = (p2d[0] - self.cx) / self.fx;
        let yd = (p2d[1] - self.cy) / self.fy;
        let theta_d = (xd * xd + yd * yd).sqrt();
        if theta_d < 1e-8 {
            return na::Vector3::new(xd, yd, 1.0);
        }
        let mut theta = theta_d;
        for _ in 0..7 {
            let err = Self::f(&self.k1, &self.k2, &self.k3, &self.k4, &theta) - theta_d;
            let step = err / Self::df_dtheta(self.k1, self.k2, self.k3, self.k4, theta);
            theta -= step;
            if step.abs() < 1e-12 {
                break;
            }
        }
        let scaling = theta.tan() / theta_d;
        na::Vector3::new(xd * scaling, yd * scaling, 1.0)
    }
}
