use rgbd_image::{Image, ImageError, ImageSize};

use crate::{filter, parallel};

/// Downscale a grayscale image by a non-integer factor.
///
/// The image is box-smoothed first and then resampled bilinearly, so
/// `scale = 1.2` produces a new image of `round(width / 1.2) x round(height / 1.2)` pixels.
///
/// # Errors
///
/// Returns an error if `scale < 1` or the result would be empty.
pub fn pyrdown_scaled(src: &Image<u8, 1>, scale: f32) -> Result<Image<u8, 1>, ImageError> {
    let new_size = ImageSize {
        width: (src.width() as f32 / scale).round() as usize,
        height: (src.height() as f32 / scale).round() as usize,
    };
    if scale.is_nan() || scale < 1.0 || new_size.width == 0 || new_size.height == 0 {
        return Err(ImageError::EmptyImage(new_size.width, new_size.height));
    }

    let mut smoothed = Image::from_size_val(src.size(), 0u8)?;
    filter::box_blur_u8(src, &mut smoothed, 3)?;

    let (cols, rows) = (src.cols(), src.rows());
    let data = smoothed.as_slice();
    let mut dst = Image::from_size_val(new_size, 0u8)?;

    parallel::par_fill_rows(&mut dst, |y, row| {
        let sy = ((y as f32 + 0.5) * scale - 0.5).clamp(0.0, (rows - 1) as f32);
        let y0 = sy.floor() as usize;
        let y1 = (y0 + 1).min(rows - 1);
        let fy = sy - y0 as f32;
        for (x, px) in row.iter_mut().enumerate() {
            let sx = ((x as f32 + 0.5) * scale - 0.5).clamp(0.0, (cols - 1) as f32);
            let x0 = sx.floor() as usize;
            let x1 = (x0 + 1).min(cols - 1);
            let fx = sx - x0 as f32;

            let top = data[y0 * cols + x0] as f32 * (1.0 - fx) + data[y0 * cols + x1] as f32 * fx;
            let bottom =
                data[y1 * cols + x0] as f32 * (1.0 - fx) + data[y1 * cols + x1] as f32 * fx;
            *px = (top * (1.0 - fy) + bottom * fy).round().clamp(0.0, 255.0) as u8;
        }
    });

    Ok(dst)
}

/// Build an image pyramid with `levels` levels, each `scale` times smaller than the previous.
///
/// Level 0 is a copy of `src`. Construction stops early once a level would become
/// smaller than `min_side` pixels on either side.
pub fn build_pyramid(
    src: &Image<u8, 1>,
    levels: usize,
    scale: f32,
    min_side: usize,
) -> Result<Vec<Image<u8, 1>>, ImageError> {
    let mut pyramid = Vec::with_capacity(levels);
    pyramid.push(src.clone());

    for _ in 1..levels {
        let Some(last) = pyramid.last() else {
            break;
        };
        let next_w = (last.width() as f32 / scale).round() as usize;
        let next_h = (last.height() as f32 / scale).round() as usize;
        if next_w < min_side || next_h < min_side {
            break;
        }
        let next = pyrdown_scaled(last, scale)?;
        pyramid.push(next);
    }

    Ok(pyramid)
}
