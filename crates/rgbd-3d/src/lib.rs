#![deny(missing_docs)]
#![doc = env!("CARGO_PKG_DESCRIPTION")]

/// Pinhole camera intrinsics.
pub mod camera;

/// Hole filling of sparse depth renderings.
pub mod completion;

/// Point cloud container.
pub mod pointcloud;

/// Perspective-n-Point (PnP) solvers.
pub mod pnp;

/// Rendering of point clouds into a virtual camera.
pub mod projection;

/// Rigid transforms and the math around them.
pub mod transforms;

pub use crate::camera::{CameraError, CameraIntrinsics};
pub use crate::pointcloud::PointCloud;
pub use crate::transforms::{Transform3D, TransformError};
