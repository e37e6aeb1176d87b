use nalgebra::{Matrix3, Rotation3, Vector2, Vector3, SVD};

use super::PnPError;
use crate::camera::CameraIntrinsics;

/// Compute the centroid of a set of points.
pub(crate) fn compute_centroid(pts: &[Vector3<f64>]) -> Vector3<f64> {
    let n = pts.len().max(1) as f64;
    pts.iter().fold(Vector3::zeros(), |acc, p| acc + p) / n
}

/// Squared reprojection error of a single correspondence.
///
/// Returns `None` for points with non-positive depth in the camera frame.
pub(crate) fn project_sq_error(
    world_point: &Vector3<f64>,
    image_point: &Vector2<f64>,
    rotation: &Rotation3<f64>,
    translation: &Vector3<f64>,
    intrinsics: &CameraIntrinsics,
) -> Option<f64> {
    let pc = rotation * world_point + translation;
    let uv = intrinsics.project(&pc)?;
    Some((uv - image_point).norm_squared())
}

/// Root-mean-square reprojection error in pixels.
///
/// Points behind the camera count with an infinite error.
pub(crate) fn rmse_px(
    world: &[Vector3<f64>],
    image: &[Vector2<f64>],
    rotation: &Rotation3<f64>,
    translation: &Vector3<f64>,
    intrinsics: &CameraIntrinsics,
) -> f64 {
    let sum_sq: f64 = world
        .iter()
        .zip(image)
        .map(|(pw, uv)| {
            project_sq_error(pw, uv, rotation, translation, intrinsics).unwrap_or(f64::INFINITY)
        })
        .sum();
    (sum_sq / world.len().max(1) as f64).sqrt()
}

/// Rigid alignment (Kabsch) of `src` onto `dst` without scale.
///
/// Returns `(R, t)` minimizing `Σ ‖R·src_i + t − dst_i‖²`.
pub(crate) fn kabsch(
    src: &[Vector3<f64>],
    dst: &[Vector3<f64>],
) -> Result<(Rotation3<f64>, Vector3<f64>), PnPError> {
    if src.len() != dst.len() {
        return Err(PnPError::MismatchedArrayLengths {
            left_name: "source points",
            left_len: src.len(),
            right_name: "destination points",
            right_len: dst.len(),
        });
    }
    let mu_s = compute_centroid(src);
    let mu_d = compute_centroid(dst);

    // cross-covariance H = Σ (dst - mu_d)(src - mu_s)ᵀ
    let h = src
        .iter()
        .zip(dst)
        .fold(Matrix3::zeros(), |acc, (s, d)| {
            acc + (d - mu_d) * (s - mu_s).transpose()
        });

    let svd = SVD::new(h, true, true);
    let u = svd
        .u
        .ok_or_else(|| PnPError::SvdFailed("U not computed".to_string()))?;
    let v_t = svd
        .v_t
        .ok_or_else(|| PnPError::SvdFailed("V^T not computed".to_string()))?;

    let mut correction = Matrix3::identity();
    if (u * v_t).determinant() < 0.0 {
        correction[(2, 2)] = -1.0;
    }
    let r = u * correction * v_t;
    let t = mu_d - r * mu_s;

    Ok((Rotation3::from_matrix_unchecked(r), t))
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_compute_centroid() {
        let pts = [
            Vector3::new(1.0, 2.0, 3.0),
            Vector3::new(4.0, 5.0, 6.0),
            Vector3::new(7.0, 8.0, 9.0),
        ];
        assert_eq!(compute_centroid(&pts), Vector3::new(4.0, 5.0, 6.0));
    }

    #[test]
    fn test_kabsch_z90() -> Result<(), PnPError> {
        let src = [
            Vector3::new(0.0, 0.0, 0.0),
            Vector3::new(1.0, 0.0, 0.0),
            Vector3::new(1.0, 1.0, 0.0),
            Vector3::new(0.0, 1.0, 0.5),
        ];
        let r = Rotation3::from_euler_angles(0.0, 0.0, std::f64::consts::FRAC_PI_2);
        let t = Vector3::new(0.5, -0.3, 2.0);
        let dst: Vec<_> = src.iter().map(|p| r * p + t).collect();

        let (r_est, t_est) = kabsch(&src, &dst)?;
        assert_relative_eq!(*r_est.matrix(), *r.matrix(), epsilon = 1e-9);
        assert_relative_eq!(t_est, t, epsilon = 1e-9);
        Ok(())
    }

    #[test]
    fn test_project_sq_error_behind_camera() {
        let intrinsics = CameraIntrinsics {
            fx: 100.0,
            fy: 100.0,
            cx: 50.0,
            cy: 50.0,
        };
        let r = Rotation3::identity();
        let t = Vector3::zeros();
        let uv = Vector2::new(50.0, 50.0);
        assert_eq!(
            project_sq_error(&Vector3::new(0.0, 0.0, 2.0), &uv, &r, &t, &intrinsics),
            Some(0.0)
        );
        assert_eq!(
            project_sq_error(&Vector3::new(0.0, 0.0, -2.0), &uv, &r, &t, &intrinsics),
            None
        );
    }
}
