#![deny(missing_docs)]
#![doc = env!("CARGO_PKG_DESCRIPTION")]
//!
//! The [`PoseEstimator`] matches features between a reference RGB-D frame and
//! a query color frame, lifts the reference features to 3D with the depth
//! image and solves a robust Perspective-n-Point problem for the motion of the
//! query camera.

/// Estimator configuration.
pub mod config;

/// 2D-3D correspondences between the query image and the reference frame.
pub mod correspondence;

/// Optional observers of the estimation pipeline.
pub mod diagnostics;

mod error;

/// Relative pose estimation.
pub mod estimator;

pub use crate::config::EstimatorConfig;
pub use crate::error::OdometryError;
pub use crate::estimator::{PoseEstimate, PoseEstimator};
