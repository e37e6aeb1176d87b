//! Camera pose from 2D-3D correspondences.
//!
//! [`solve_epnp`] fits a pose to all given correspondences, [`solve_pnp_ransac`]
//! wraps it in a hypothesize-and-verify loop that tolerates wrong matches and
//! [`refine_pose_lm`] polishes a pose by minimizing the reprojection error.

/// Closed form solver with four virtual control points.
pub mod epnp;

/// Outlier rejection around EPnP.
pub mod ransac;

/// Nonlinear refinement of a pose on its inliers.
pub mod refine;

mod ops;

pub use epnp::{solve_epnp, EPnPParams};
pub use ransac::{solve_pnp_ransac, PnPRansacResult, RansacParams, MIN_POSE_INLIERS};
pub use refine::{refine_pose_lm, LMOutcome, LMParams};

use nalgebra::{Rotation3, Vector3};
use thiserror::Error;

use crate::transforms::Transform3D;

/// Reasons a pose could not be computed.
#[derive(Debug, Error, PartialEq)]
pub enum PnPError {
    /// Fewer correspondences than the solver needs.
    #[error("Need at least {required} correspondences for a pose, got {actual}")]
    InsufficientCorrespondences {
        /// Correspondences the solver needs.
        required: usize,
        /// Correspondences given.
        actual: usize,
    },

    /// No hypothesis gathered enough inliers.
    #[error("RANSAC requires at least {required} inliers, best hypothesis had {actual}")]
    InsufficientInliers {
        /// Minimum number of inliers a hypothesis needs to be accepted.
        required: usize,
        /// Inlier count of the best hypothesis seen.
        actual: usize,
    },

    /// Two paired slices differ in length.
    #[error("{left_name} and {right_name} must pair up, got {left_len} and {right_len}")]
    MismatchedArrayLengths {
        /// What the first slice holds.
        left_name: &'static str,
        /// Length of the first slice.
        left_len: usize,
        /// What the second slice holds.
        right_name: &'static str,
        /// Length of the second slice.
        right_len: usize,
    },

    /// A pose to refine places a point behind the camera.
    #[error("The pose places a point behind the camera")]
    PointBehindCamera,

    /// A decomposition or linear solve did not produce a usable result.
    #[error("Linear algebra failure: {0}")]
    SvdFailed(String),
}

/// Tolerances of the linear algebra inside the solvers.
#[derive(Debug, Clone, PartialEq)]
pub struct NumericTol {
    /// Threshold passed to SVD solves and pseudo-inverses.
    pub svd: f64,
    /// Threshold on determinants and singular values below which a pseudo-inverse is used.
    pub eps: f64,
}

impl Default for NumericTol {
    fn default() -> Self {
        Self {
            svd: 1e-12,
            eps: 1e-12,
        }
    }
}

/// Result returned by the PnP solvers.
///
/// The rotation maps coordinates from the **world** frame to the
/// **camera** frame: `p_cam = R · p_world + t`.
#[derive(Debug, Clone, PartialEq)]
pub struct PnPResult {
    /// Estimated rotation.
    pub rotation: Rotation3<f64>,
    /// Estimated translation.
    pub translation: Vector3<f64>,
    /// RMS reprojection error in pixels.
    pub reproj_rmse: f64,
}

impl PnPResult {
    /// The world-to-camera transform.
    pub fn pose(&self) -> Transform3D {
        Transform3D::from_parts(self.rotation, self.translation)
    }
}

fn check_lengths(world_len: usize, image_len: usize) -> Result<(), PnPError> {
    if world_len != image_len {
        return Err(PnPError::MismatchedArrayLengths {
            left_name: "world points",
            left_len: world_len,
            right_name: "image points",
            right_len: image_len,
        });
    }
    if world_len < 4 {
        return Err(PnPError::InsufficientCorrespondences {
            required: 4,
            actual: world_len,
        });
    }
    Ok(())
}
