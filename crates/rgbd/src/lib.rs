#![doc = env!("CARGO_PKG_DESCRIPTION")]

#[doc(inline)]
pub use rgbd_image as image;

#[doc(inline)]
pub use rgbd_imgproc as imgproc;

#[doc(inline)]
pub use rgbd_3d as k3d;

#[doc(inline)]
pub use rgbd_odometry as odometry;
