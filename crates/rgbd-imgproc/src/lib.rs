#![deny(missing_docs)]
#![doc = env!("CARGO_PKG_DESCRIPTION")]

/// Color space conversions.
pub mod color;

/// Drawing primitives for diagnostic overlays.
pub mod draw;

/// Feature detection, description and matching.
pub mod features;

/// Image filters.
pub mod filter;

/// Helpers to run per-row operations in parallel.
pub mod parallel;

/// Image pyramids.
pub mod pyramid;
