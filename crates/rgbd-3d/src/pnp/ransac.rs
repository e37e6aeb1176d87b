//! RANSAC-based robust wrapper for the EPnP solver.

use nalgebra::{Rotation3, Vector2, Vector3};
use rand::seq::SliceRandom;
use rand::{rngs::StdRng, SeedableRng};

use super::epnp::{solve_epnp, EPnPParams};
use super::ops::{project_sq_error, rmse_px};
use super::refine::{refine_pose_lm, LMParams};
use super::{check_lengths, PnPError, PnPResult};
use crate::camera::CameraIntrinsics;

/// Inliers the best hypothesis needs for the solve to succeed.
pub const MIN_POSE_INLIERS: usize = 4;

/// Parameters for RANSAC over PnP.
#[derive(Debug, Clone, PartialEq)]
pub struct RansacParams {
    /// Maximum number of RANSAC iterations.
    pub max_iterations: usize,
    /// Pixel error below which an observation is an inlier.
    pub reproj_threshold_px: f64,
    /// Inlier count that ends the search early, clamped to the number of correspondences.
    pub min_inliers: usize,
    /// Optional fixed seed for reproducible sampling.
    pub random_seed: Option<u64>,
    /// Whether to refit on all inliers of the best hypothesis.
    pub refine: bool,
    /// Parameters of the minimal and refit solves.
    pub epnp: EPnPParams,
    /// Levenberg-Marquardt polish of the refit pose, when `refine` is set.
    pub lm: Option<LMParams>,
}

impl Default for RansacParams {
    fn default() -> Self {
        Self {
            max_iterations: 100,
            reproj_threshold_px: 8.0,
            min_inliers: 100,
            random_seed: None,
            refine: true,
            epnp: EPnPParams::default(),
            lm: Some(LMParams::default()),
        }
    }
}

/// RANSAC result for PnP.
#[derive(Debug, Clone, PartialEq)]
pub struct PnPRansacResult {
    /// Best pose found by RANSAC. The RMSE is computed over the inliers.
    pub pose: PnPResult,
    /// Indices of inlier correspondences, ascending.
    pub inliers: Vec<usize>,
    /// Number of iterations run.
    pub iterations: usize,
}

/// Solve PnP robustly with RANSAC around EPnP.
///
/// - The minimal sample has 5 correspondences, 4 when only 4 are available.
/// - Hypotheses placing a sample point behind the camera are discarded.
/// - A correspondence is an inlier if its reprojection error is strictly
///   below `reproj_threshold_px`.
/// - A hypothesis replaces the best one only if it has strictly more inliers.
/// - The loop stops early once the best hypothesis has `min(min_inliers, N)`
///   inliers, so always once every correspondence is an inlier.
/// - With `refine`, the pose is refit on the inliers with EPnP, then polished
///   with Levenberg-Marquardt when `lm` is set. The inliers are classified again
///   after each step. A failed step keeps the previous pose.
///
/// # Errors
///
/// Returns [`PnPError::InsufficientInliers`] if no hypothesis explains at
/// least [`MIN_POSE_INLIERS`] correspondences.
pub fn solve_pnp_ransac(
    world: &[Vector3<f64>],
    image: &[Vector2<f64>],
    intrinsics: &CameraIntrinsics,
    params: &RansacParams,
) -> Result<PnPRansacResult, PnPError> {
    let n = world.len();
    check_lengths(n, image.len())?;

    let sample_size = if n == 4 { 4 } else { 5 };
    let min_inliers = params.min_inliers.min(n);

    let mut rng = match params.random_seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_os_rng(),
    };

    let mut indices: Vec<usize> = (0..n).collect();
    let mut w_min: Vec<Vector3<f64>> = Vec::with_capacity(sample_size);
    let mut i_min: Vec<Vector2<f64>> = Vec::with_capacity(sample_size);

    let mut best: Option<(PnPResult, Vec<usize>)> = None;
    let mut iterations = 0;

    while iterations < params.max_iterations {
        iterations += 1;

        let (sample, _) = indices.partial_shuffle(&mut rng, sample_size);
        w_min.clear();
        i_min.clear();
        for &idx in sample.iter() {
            w_min.push(world[idx]);
            i_min.push(image[idx]);
        }

        let Ok(hypothesis) = solve_epnp(&w_min, &i_min, intrinsics, &params.epnp) else {
            continue;
        };

        if !all_positive_depths(&hypothesis.rotation, &hypothesis.translation, &w_min) {
            continue;
        }

        let inliers = classify_inliers(
            world,
            image,
            &hypothesis.rotation,
            &hypothesis.translation,
            intrinsics,
            params.reproj_threshold_px,
        );

        let best_len = best.as_ref().map_or(0, |(_, b)| b.len());
        if inliers.len() > best_len {
            let done = inliers.len() >= min_inliers;
            best = Some((hypothesis, inliers));
            if done {
                break;
            }
        }
    }

    let (mut pose, mut inliers) = match best {
        Some((pose, inliers)) if inliers.len() >= MIN_POSE_INLIERS => (pose, inliers),
        other => {
            return Err(PnPError::InsufficientInliers {
                required: MIN_POSE_INLIERS,
                actual: other.map_or(0, |(_, inliers)| inliers.len()),
            })
        }
    };

    if params.refine {
        let w_in: Vec<_> = inliers.iter().map(|&i| world[i]).collect();
        let i_in: Vec<_> = inliers.iter().map(|&i| image[i]).collect();
        match solve_epnp(&w_in, &i_in, intrinsics, &params.epnp) {
            Ok(refit) => {
                pose = refit;
                inliers = classify_inliers(
                    world,
                    image,
                    &pose.rotation,
                    &pose.translation,
                    intrinsics,
                    params.reproj_threshold_px,
                );
            }
            Err(e) => log::debug!("PnP refit on {} inliers failed: {e}", inliers.len()),
        }

        if let Some(lm) = &params.lm {
            let w_in: Vec<_> = inliers.iter().map(|&i| world[i]).collect();
            let i_in: Vec<_> = inliers.iter().map(|&i| image[i]).collect();
            match refine_pose_lm(&w_in, &i_in, intrinsics, &pose, lm) {
                Ok(outcome) => {
                    let polished = classify_inliers(
                        world,
                        image,
                        &outcome.pose.rotation,
                        &outcome.pose.translation,
                        intrinsics,
                        params.reproj_threshold_px,
                    );
                    if polished.len() >= MIN_POSE_INLIERS {
                        pose = outcome.pose;
                        inliers = polished;
                    }
                }
                Err(e) => log::debug!("LM refinement on {} inliers failed: {e}", inliers.len()),
            }
        }
    }

    let w_in: Vec<_> = inliers.iter().map(|&i| world[i]).collect();
    let i_in: Vec<_> = inliers.iter().map(|&i| image[i]).collect();
    pose.reproj_rmse = rmse_px(&w_in, &i_in, &pose.rotation, &pose.translation, intrinsics);

    Ok(PnPRansacResult {
        pose,
        inliers,
        iterations,
    })
}

fn all_positive_depths(r: &Rotation3<f64>, t: &Vector3<f64>, world: &[Vector3<f64>]) -> bool {
    world.iter().all(|pw| (r * pw + t).z > 0.0)
}

fn classify_inliers(
    world: &[Vector3<f64>],
    image: &[Vector2<f64>],
    r: &Rotation3<f64>,
    t: &Vector3<f64>,
    intrinsics: &CameraIntrinsics,
    thresh_px: f64,
) -> Vec<usize> {
    let thresh_sq = thresh_px * thresh_px;
    world
        .iter()
        .zip(image)
        .enumerate()
        .filter_map(|(idx, (pw, uv))| {
            let err_sq = project_sq_error(pw, uv, r, t, intrinsics)?;
            (err_sq < thresh_sq).then_some(idx)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn camera() -> CameraIntrinsics {
        CameraIntrinsics {
            fx: 500.0,
            fy: 500.0,
            cx: 320.0,
            cy: 240.0,
        }
    }

    /// Points spread in front of the camera and their exact projections.
    fn correspondences(
        r: &Rotation3<f64>,
        t: &Vector3<f64>,
        n: usize,
    ) -> (Vec<Vector3<f64>>, Vec<Vector2<f64>>) {
        let world: Vec<_> = (0..n)
            .map(|i| {
                Vector3::new(
                    ((i * 7) % 11) as f64 * 0.1 - 0.5,
                    ((i * 5) % 9) as f64 * 0.1 - 0.4,
                    ((i * 3) % 7) as f64 * 0.15,
                )
            })
            .collect();
        let image = world
            .iter()
            .map(|p| camera().project(&(r * p + t)).expect("in front"))
            .collect();
        (world, image)
    }

    #[test]
    fn test_ransac_rejects_outliers() -> Result<(), PnPError> {
        let r = Rotation3::from_euler_angles(0.05, -0.1, 0.2);
        let t = Vector3::new(0.1, -0.05, 2.5);
        let (world, mut image) = correspondences(&r, &t, 40);

        // corrupt every fifth observation by far more than the threshold
        let outliers: Vec<usize> = (0..40).step_by(5).collect();
        for &i in &outliers {
            image[i] += Vector2::new(60.0, -45.0);
        }

        // unreachable early-exit target: keep the hypothesis with the most inliers
        let params = RansacParams {
            min_inliers: 40,
            random_seed: Some(7),
            ..Default::default()
        };
        let result = solve_pnp_ransac(&world, &image, &camera(), &params)?;

        assert_eq!(result.inliers.len(), 32);
        assert!(result.inliers.iter().all(|i| !outliers.contains(i)));
        assert_relative_eq!(*result.pose.rotation.matrix(), *r.matrix(), epsilon = 1e-6);
        assert_relative_eq!(result.pose.translation, t, epsilon = 1e-6);
        assert!(result.pose.reproj_rmse < 1e-4);
        Ok(())
    }

    #[test]
    fn test_ransac_early_exit_and_seed() -> Result<(), PnPError> {
        let r = Rotation3::from_euler_angles(0.0, 0.1, 0.0);
        let t = Vector3::new(0.0, 0.0, 3.0);
        let (world, image) = correspondences(&r, &t, 12);

        let params = RansacParams {
            random_seed: Some(1),
            ..Default::default()
        };
        let a = solve_pnp_ransac(&world, &image, &camera(), &params)?;
        let b = solve_pnp_ransac(&world, &image, &camera(), &params)?;

        // min_inliers is clamped to the 12 correspondences, all of them inliers
        assert_eq!(a.inliers, (0..12).collect::<Vec<_>>());
        assert!(a.iterations < params.max_iterations);
        assert_eq!(a, b);
        Ok(())
    }

    #[test]
    fn test_ransac_min_inliers_is_clamped() -> Result<(), PnPError> {
        let r = Rotation3::from_euler_angles(-0.1, 0.0, 0.05);
        let t = Vector3::new(0.2, 0.1, 2.0);
        let (world, image) = correspondences(&r, &t, 10);

        let params = RansacParams {
            min_inliers: 1000,
            random_seed: Some(3),
            ..Default::default()
        };
        let result = solve_pnp_ransac(&world, &image, &camera(), &params)?;
        assert_eq!(result.inliers.len(), 10);
        assert!(result.iterations < params.max_iterations);
        Ok(())
    }

    #[test]
    fn test_ransac_without_hypothesis() {
        let r = Rotation3::identity();
        let t = Vector3::new(0.0, 0.0, 2.0);
        let (world, image) = correspondences(&r, &t, 10);

        let params = RansacParams {
            max_iterations: 0,
            ..Default::default()
        };
        assert_eq!(
            solve_pnp_ransac(&world, &image, &camera(), &params),
            Err(PnPError::InsufficientInliers {
                required: MIN_POSE_INLIERS,
                actual: 0
            })
        );
    }

    #[test]
    fn test_ransac_lm_polish_lowers_error() -> Result<(), PnPError> {
        let r = Rotation3::from_euler_angles(0.02, -0.05, 0.1);
        let t = Vector3::new(0.05, 0.1, 2.5);
        let (world, mut image) = correspondences(&r, &t, 30);
        for (i, uv) in image.iter_mut().enumerate() {
            let s = ((i * 13) % 7) as f64 / 7.0 - 0.5;
            *uv += Vector2::new(s, -0.6 * s);
        }

        let base = RansacParams {
            min_inliers: 30,
            random_seed: Some(5),
            lm: None,
            ..Default::default()
        };
        let epnp_only = solve_pnp_ransac(&world, &image, &camera(), &base)?;
        let polished = solve_pnp_ransac(
            &world,
            &image,
            &camera(),
            &RansacParams {
                lm: Some(LMParams::default()),
                ..base.clone()
            },
        )?;

        assert_eq!(polished.inliers.len(), 30);
        assert!(polished.pose.reproj_rmse <= epnp_only.pose.reproj_rmse + 1e-9);
        assert!(polished.pose.reproj_rmse < 0.5);
        Ok(())
    }

    #[test]
    fn test_ransac_too_few_points() {
        let world = vec![Vector3::new(0.0, 0.0, 1.0); 3];
        let image = vec![Vector2::new(320.0, 240.0); 3];
        assert!(matches!(
            solve_pnp_ransac(&world, &image, &camera(), &RansacParams::default()),
            Err(PnPError::InsufficientCorrespondences {
                required: 4,
                actual: 3
            })
        ));
    }
}
