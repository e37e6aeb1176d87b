use rayon::prelude::*;
use rgbd_image::{ColorImage, DepthImage, ImageError};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Error types for depth completion.
#[derive(Debug, Error, PartialEq)]
pub enum CompletionError {
    /// The color and depth images do not have the same size.
    #[error(transparent)]
    Image(#[from] ImageError),

    /// The window size is even or zero.
    #[error("Window size must be odd and positive, got {0}")]
    InvalidWindowSize(usize),
}

/// How a pixel without depth is filled from its neighborhood.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CompletionPolicy {
    /// Average depth and color over the valid neighbors.
    #[default]
    Mean,
    /// Copy depth and color of the closest valid neighbor.
    Nearest,
}

/// Fill the holes of a sparse RGB-D rendering.
///
/// Pixels with non-zero depth are copied through. Every other pixel looks at
/// the `window_size × window_size` window centred on it, reading only the
/// input images, and fills itself according to `policy`:
///
/// - [`CompletionPolicy::Mean`] takes the truncated mean of the depth and of
///   each color channel over the neighbors with non-zero depth.
/// - [`CompletionPolicy::Nearest`] takes the neighbor with the smallest depth.
///   The window is scanned column by column and ties keep the first neighbor found.
///
/// Pixels without any valid neighbor stay at depth 0 and black. Window cells
/// falling outside the image are ignored.
///
/// # Errors
///
/// Returns [`CompletionError::InvalidWindowSize`] for an even or zero window
/// and [`ImageError::InvalidImageSize`] if the images differ in size.
pub fn complete_depth(
    color: &ColorImage,
    depth: &DepthImage,
    window_size: usize,
    policy: CompletionPolicy,
) -> Result<(ColorImage, DepthImage), CompletionError> {
    if window_size % 2 == 0 {
        return Err(CompletionError::InvalidWindowSize(window_size));
    }
    color.ensure_same_size(depth)?;

    let size = depth.size();
    let mut color_out = ColorImage::from_size_val(size, 0)?;
    let mut depth_out = DepthImage::from_size_val(size, 0)?;
    if size.width == 0 || size.height == 0 {
        return Ok((color_out, depth_out));
    }

    let half = window_size / 2;
    let (cols, rows) = (size.width, size.height);
    let depth_in = depth.as_slice();
    let color_in = color.as_slice();

    color_out
        .as_slice_mut()
        .par_chunks_exact_mut(3 * cols)
        .zip(depth_out.as_slice_mut().par_chunks_exact_mut(cols))
        .enumerate()
        .for_each(|(v, (color_row, depth_row))| {
            for u in 0..cols {
                let idx = v * cols + u;
                let (rgb, d) = if depth_in[idx] != 0 {
                    (pixel_rgb(color_in, idx), depth_in[idx])
                } else {
                    // column-major scan of the clipped window
                    let window = (u.saturating_sub(half)..=(u + half).min(cols - 1)).flat_map(|uu| {
                        (v.saturating_sub(half)..=(v + half).min(rows - 1))
                            .map(move |vv| vv * cols + uu)
                    });
                    match policy {
                        CompletionPolicy::Mean => mean_fill(color_in, depth_in, window),
                        CompletionPolicy::Nearest => nearest_fill(color_in, depth_in, window),
                    }
                };
                depth_row[u] = d;
                color_row[3 * u..3 * u + 3].copy_from_slice(&rgb);
            }
        });

    Ok((color_out, depth_out))
}

#[inline]
fn pixel_rgb(color: &[u8], idx: usize) -> [u8; 3] {
    [color[3 * idx], color[3 * idx + 1], color[3 * idx + 2]]
}

fn mean_fill(
    color: &[u8],
    depth: &[u16],
    window: impl Iterator<Item = usize>,
) -> ([u8; 3], u16) {
    let mut count = 0u64;
    let mut depth_sum = 0u64;
    let mut rgb_sum = [0u64; 3];
    for idx in window.filter(|&idx| depth[idx] != 0) {
        count += 1;
        depth_sum += depth[idx] as u64;
        for (sum, c) in rgb_sum.iter_mut().zip(pixel_rgb(color, idx)) {
            *sum += c as u64;
        }
    }
    if count == 0 {
        return ([0; 3], 0);
    }
    (
        rgb_sum.map(|s| (s / count) as u8),
        (depth_sum / count) as u16,
    )
}

fn nearest_fill(
    color: &[u8],
    depth: &[u16],
    window: impl Iterator<Item = usize>,
) -> ([u8; 3], u16) {
    let mut best: Option<usize> = None;
    for idx in window.filter(|&idx| depth[idx] != 0) {
        if best.map_or(true, |b| depth[idx] < depth[b]) {
            best = Some(idx);
        }
    }
    match best {
        Some(idx) => (pixel_rgb(color, idx), depth[idx]),
        None => ([0; 3], 0),
    }
}
