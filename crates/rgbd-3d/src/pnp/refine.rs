//! Levenberg-Marquardt refinement of a PnP pose.

use nalgebra::{Matrix6, Rotation3, Vector2, Vector3, Vector6};

use super::ops::rmse_px;
use super::{check_lengths, PnPError, PnPResult};
use crate::camera::CameraIntrinsics;

/// Parameters controlling the LM pose refinement.
#[derive(Debug, Clone, PartialEq)]
pub struct LMParams {
    /// Maximum number of LM iterations.
    pub max_iterations: usize,
    /// Stop once an accepted step lowers the squared error by less than this.
    pub eps: f64,
    /// Initial damping factor.
    pub lambda_init: f64,
    /// Factor applied to the damping after a rejected step, and removed after an accepted one.
    pub lambda_mul: f64,
}

impl Default for LMParams {
    fn default() -> Self {
        Self {
            max_iterations: 20,
            eps: 1e-10,
            lambda_init: 1e-3,
            lambda_mul: 10.0,
        }
    }
}

/// Outcome of [`refine_pose_lm`].
#[derive(Debug, Clone, PartialEq)]
pub struct LMOutcome {
    /// The refined pose, with the RMS reprojection error over the given correspondences.
    pub pose: PnPResult,
    /// Iterations run.
    pub iterations: usize,
    /// Whether the error decrease fell below `eps`.
    pub converged: bool,
}

/// Refine a world-to-camera pose by minimizing the pixel reprojection error.
///
/// The pose is parametrized by an axis-angle rotation and a translation. The
/// Jacobian is taken by central differences. Steps that do not lower the
/// squared error are rejected, so the result is never worse than `initial`.
///
/// # Errors
///
/// Returns an error if the slices differ in length, hold fewer than 4
/// correspondences, or if `initial` places a point behind the camera.
pub fn refine_pose_lm(
    world: &[Vector3<f64>],
    image: &[Vector2<f64>],
    intrinsics: &CameraIntrinsics,
    initial: &PnPResult,
    params: &LMParams,
) -> Result<LMOutcome, PnPError> {
    check_lengths(world.len(), image.len())?;

    let n = world.len();
    let rvec = initial.rotation.scaled_axis();
    let t = initial.translation;
    let mut x = Vector6::new(rvec.x, rvec.y, rvec.z, t.x, t.y, t.z);

    let mut residuals = vec![0.0; 2 * n];
    let mut residuals_p = vec![0.0; 2 * n];
    let mut residuals_m = vec![0.0; 2 * n];
    let mut jacobian = vec![Vector6::<f64>::zeros(); 2 * n];

    let mut err_sq =
        reproject(world, image, intrinsics, &x, &mut residuals).ok_or(PnPError::PointBehindCamera)?;

    let mut lambda = params.lambda_init;
    let mut iterations = 0;
    let mut converged = false;

    while iterations < params.max_iterations {
        iterations += 1;

        const H_ROT: f64 = 1e-6;
        let h_trans = 1e-6 * x[3].abs().max(x[4].abs()).max(x[5].abs()).max(1.0);
        let mut jacobian_ok = true;
        for k in 0..6 {
            let h = if k < 3 { H_ROT } else { h_trans };
            let (mut x_plus, mut x_minus) = (x, x);
            x_plus[k] += h;
            x_minus[k] -= h;
            if reproject(world, image, intrinsics, &x_plus, &mut residuals_p).is_none()
                || reproject(world, image, intrinsics, &x_minus, &mut residuals_m).is_none()
            {
                jacobian_ok = false;
                break;
            }
            for (row, (rp, rm)) in jacobian.iter_mut().zip(residuals_p.iter().zip(&residuals_m)) {
                row[k] = (rp - rm) / (2.0 * h);
            }
        }
        if !jacobian_ok {
            log::debug!("LM stopped: a perturbed pose puts a point behind the camera");
            break;
        }

        let mut jtj = Matrix6::<f64>::zeros();
        let mut jtr = Vector6::<f64>::zeros();
        for (row, r) in jacobian.iter().zip(&residuals) {
            jtj += row * row.transpose();
            jtr += row * *r;
        }

        let damped = jtj + Matrix6::identity() * lambda;
        let Some(delta) = damped.cholesky().map(|c| c.solve(&(-jtr))) else {
            lambda *= params.lambda_mul;
            continue;
        };

        let x_new = x + delta;
        match reproject(world, image, intrinsics, &x_new, &mut residuals_p) {
            Some(err_sq_new) if err_sq_new < err_sq => {
                x = x_new;
                residuals.copy_from_slice(&residuals_p);
                let decrease = err_sq - err_sq_new;
                err_sq = err_sq_new;
                lambda = (lambda / params.lambda_mul).max(1e-12);
                if decrease < params.eps {
                    converged = true;
                    break;
                }
            }
            _ => lambda *= params.lambda_mul,
        }
    }

    let (rotation, translation) = unpack(&x);
    let reproj_rmse = rmse_px(world, image, &rotation, &translation, intrinsics);

    Ok(LMOutcome {
        pose: PnPResult {
            rotation,
            translation,
            reproj_rmse,
        },
        iterations,
        converged,
    })
}

fn unpack(x: &Vector6<f64>) -> (Rotation3<f64>, Vector3<f64>) {
    (
        Rotation3::new(Vector3::new(x[0], x[1], x[2])),
        Vector3::new(x[3], x[4], x[5]),
    )
}

/// Write the pixel residuals of the pose `x` into `out` and return their squared norm.
fn reproject(
    world: &[Vector3<f64>],
    image: &[Vector2<f64>],
    intrinsics: &CameraIntrinsics,
    x: &Vector6<f64>,
    out: &mut [f64],
) -> Option<f64> {
    let (rotation, translation) = unpack(x);
    let mut err_sq = 0.0;
    for ((pw, uv), r) in world.iter().zip(image).zip(out.chunks_exact_mut(2)) {
        let d = intrinsics.project(&(rotation * pw + translation))? - uv;
        r[0] = d.x;
        r[1] = d.y;
        err_sq += d.norm_squared();
    }
    Some(err_sq)
}
