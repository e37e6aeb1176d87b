#![deny(missing_docs)]
//! Image container types for color and depth frames

/// image representation for computer vision purposes.
pub mod image;

/// Error types for the image module.
pub mod error;

pub use crate::error::ImageError;
pub use crate::image::{ColorImage, DepthImage, GrayImage, Image, ImageSize};
