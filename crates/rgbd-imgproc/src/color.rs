use rgbd_image::{Image, ImageError};

use crate::parallel;

/// Convert an RGB8 image to grayscale using the fixed-point BT.601 weights.
///
/// gray = (77 * R + 150 * G + 29 * B) >> 8
///
/// # Arguments
///
/// * `src` - The input RGB image.
/// * `dst` - The output grayscale image.
///
/// # Errors
///
/// Returns an error if the images do not have the same size.
pub fn gray_from_rgb_u8(src: &Image<u8, 3>, dst: &mut Image<u8, 1>) -> Result<(), ImageError> {
    src.ensure_same_size(dst)?;

    parallel::par_iter_rows(src, dst, |src_pixel, dst_pixel| {
        let r = src_pixel[0] as u16;
        let g = src_pixel[1] as u16;
        let b = src_pixel[2] as u16;
        dst_pixel[0] = ((77 * r + 150 * g + 29 * b) >> 8) as u8;
    });

    Ok(())
}

/// Replicate a grayscale image into the three channels of an RGB image.
///
/// # Errors
///
/// Returns an error if the images do not have the same size.
pub fn rgb_from_gray_u8(src: &Image<u8, 1>, dst: &mut Image<u8, 3>) -> Result<(), ImageError> {
    src.ensure_same_size(dst)?;

    parallel::par_iter_rows(src, dst, |src_pixel, dst_pixel| {
        dst_pixel.fill(src_pixel[0]);
    });

    Ok(())
}
