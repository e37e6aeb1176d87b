use rayon::prelude::*;

use rgbd_image::{Image, ImageError};

use crate::parallel;

/// Inclusive-prefix sums of a single channel image with a zero first row/column.
fn integral_image<T: Copy + Into<f64>>(src: &Image<T, 1>) -> Vec<f64> {
    let (cols, rows) = (src.cols(), src.rows());
    let stride = cols + 1;
    let mut sums = vec![0f64; stride * (rows + 1)];
    for y in 0..rows {
        let mut row_sum = 0f64;
        for x in 0..cols {
            row_sum += src.as_slice()[y * cols + x].into();
            sums[(y + 1) * stride + x + 1] = sums[y * stride + x + 1] + row_sum;
        }
    }
    sums
}

fn check_kernel_size(kernel_size: usize) -> Result<(), ImageError> {
    if kernel_size == 0 || kernel_size % 2 == 0 {
        return Err(ImageError::InvalidKernelSize(kernel_size));
    }
    Ok(())
}

/// Sum and pixel count of the window of half size `half` around `(x, y)`, clipped at the borders.
#[inline]
fn window_sum(sums: &[f64], cols: usize, rows: usize, x: usize, y: usize, half: usize) -> (f64, f64) {
    let stride = cols + 1;
    let x0 = x.saturating_sub(half);
    let y0 = y.saturating_sub(half);
    let x1 = (x + half + 1).min(cols);
    let y1 = (y + half + 1).min(rows);
    let total = sums[y1 * stride + x1] - sums[y0 * stride + x1] - sums[y1 * stride + x0]
        + sums[y0 * stride + x0];
    (total, ((x1 - x0) * (y1 - y0)) as f64)
}

/// Blur a grayscale image with a box filter.
///
/// Border windows are clipped to the image, so each output pixel is the rounded mean
/// of the pixels actually covered by the window.
///
/// # Arguments
///
/// * `src` - The source image.
/// * `dst` - The destination image, same size as `src`.
/// * `kernel_size` - The odd side length of the square window.
///
/// # Errors
///
/// Returns an error if the sizes differ or `kernel_size` is even or zero.
pub fn box_blur_u8(
    src: &Image<u8, 1>,
    dst: &mut Image<u8, 1>,
    kernel_size: usize,
) -> Result<(), ImageError> {
    src.ensure_same_size(dst)?;
    check_kernel_size(kernel_size)?;

    let sums = integral_image(src);
    let (cols, rows) = (src.cols(), src.rows());
    let half = kernel_size / 2;

    parallel::par_fill_rows(dst, |y, row| {
        for (x, px) in row.iter_mut().enumerate() {
            let (total, count) = window_sum(&sums, cols, rows, x, y, half);
            *px = (total / count).round() as u8;
        }
    });

    Ok(())
}

/// Sum a float image over a square window, clipped at the borders.
///
/// # Errors
///
/// Returns an error if the sizes differ or `kernel_size` is even or zero.
pub fn box_sum_f32(
    src: &Image<f32, 1>,
    dst: &mut Image<f32, 1>,
    kernel_size: usize,
) -> Result<(), ImageError> {
    src.ensure_same_size(dst)?;
    check_kernel_size(kernel_size)?;

    let sums = integral_image(src);
    let (cols, rows) = (src.cols(), src.rows());
    let half = kernel_size / 2;

    parallel::par_fill_rows(dst, |y, row| {
        for (x, px) in row.iter_mut().enumerate() {
            *px = window_sum(&sums, cols, rows, x, y, half).0 as f32;
        }
    });

    Ok(())
}

/// Compute the first order image derivative in both x and y using a 3x3 Sobel operator.
///
/// Borders are handled by replicating the edge pixels.
///
/// # Arguments
///
/// * `src` - The source grayscale image.
/// * `dx` - The destination horizontal derivative.
/// * `dy` - The destination vertical derivative.
pub fn spatial_gradient_float(
    src: &Image<u8, 1>,
    dx: &mut Image<f32, 1>,
    dy: &mut Image<f32, 1>,
) -> Result<(), ImageError> {
    src.ensure_same_size(dx)?;
    src.ensure_same_size(dy)?;

    let (cols, rows) = (src.cols(), src.rows());
    if cols == 0 || rows == 0 {
        return Ok(());
    }
    let data = src.as_slice();
    let at = |x: isize, y: isize| -> f32 {
        let xc = x.clamp(0, cols as isize - 1) as usize;
        let yc = y.clamp(0, rows as isize - 1) as usize;
        data[yc * cols + xc] as f32
    };

    dx.as_slice_mut()
        .par_chunks_exact_mut(cols)
        .zip(dy.as_slice_mut().par_chunks_exact_mut(cols))
        .enumerate()
        .for_each(|(y, (dx_row, dy_row))| {
            let y = y as isize;
            for x in 0..cols {
                let xi = x as isize;
                let (tl, tc, tr) = (at(xi - 1, y - 1), at(xi, y - 1), at(xi + 1, y - 1));
                let (ml, mr) = (at(xi - 1, y), at(xi + 1, y));
                let (bl, bc, br) = (at(xi - 1, y + 1), at(xi, y + 1), at(xi + 1, y + 1));
                dx_row[x] = (tr + 2.0 * mr + br) - (tl + 2.0 * ml + bl);
                dy_row[x] = (bl + 2.0 * bc + br) - (tl + 2.0 * tc + tr);
            }
        });

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_box_blur_constant() -> Result<(), ImageError> {
        let src = Image::<u8, 1>::from_size_val([6, 5].into(), 42)?;
        let mut dst = Image::<u8, 1>::from_size_val(src.size(), 0)?;
        box_blur_u8(&src, &mut dst, 5)?;
        assert!(dst.as_slice().iter().all(|&v| v == 42));
        Ok(())
    }

    #[test]
    fn test_box_blur_impulse() -> Result<(), ImageError> {
        let mut src = Image::<u8, 1>::from_size_val([3, 3].into(), 0)?;
        src.set_pixel(1, 1, 0, 90)?;
        let mut dst = Image::<u8, 1>::from_size_val(src.size(), 0)?;
        box_blur_u8(&src, &mut dst, 3)?;
        // the corner window covers 4 pixels, the center one 9
        assert_eq!(dst.get_pixel(0, 0, 0)?, 23);
        assert_eq!(dst.get_pixel(1, 1, 0)?, 10);
        assert!(box_blur_u8(&src, &mut dst, 4).is_err());
        Ok(())
    }

    #[test]
    fn test_box_sum() -> Result<(), ImageError> {
        let src = Image::<f32, 1>::from_size_val([4, 4].into(), 1.0)?;
        let mut dst = Image::<f32, 1>::from_size_val(src.size(), 0.0)?;
        box_sum_f32(&src, &mut dst, 3)?;
        assert_relative_eq!(dst.get_pixel(0, 0, 0)?, 4.0);
        assert_relative_eq!(dst.get_pixel(1, 1, 0)?, 9.0);
        assert_relative_eq!(dst.get_pixel(3, 1, 0)?, 6.0);
        Ok(())
    }

    #[test]
    fn test_spatial_gradient_ramp() -> Result<(), ImageError> {
        let size = [5, 4].into();
        let data = (0..4)
            .flat_map(|_| (0..5).map(|x| (x * 10) as u8))
            .collect::<Vec<_>>();
        let src = Image::<u8, 1>::new(size, data)?;
        let mut dx = Image::<f32, 1>::from_size_val(size, 0.0)?;
        let mut dy = Image::<f32, 1>::from_size_val(size, 0.0)?;
        spatial_gradient_float(&src, &mut dx, &mut dy)?;

        assert_relative_eq!(dx.get_pixel(2, 1, 0)?, 80.0);
        assert_relative_eq!(dx.get_pixel(0, 1, 0)?, 40.0);
        assert!(dy.as_slice().iter().all(|&v| v == 0.0));
        Ok(())
    }
}
