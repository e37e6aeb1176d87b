use rgbd_image::{Image, ImageError, ImageSize};

#[inline]
fn set_pixel<const C: usize>(img: &mut Image<u8, C>, x: i64, y: i64, color: [u8; C]) {
    if x < 0 || y < 0 {
        return;
    }
    if let Some(px) = img.pixel_mut(x as usize, y as usize) {
        px.copy_from_slice(&color);
    }
}

/// Draws a line on an image inplace using Bresenham's line algorithm.
///
/// Pixels falling outside the image are skipped.
///
/// # Arguments
///
/// * `img` - The image to draw on.
/// * `p0` - The start point of the line as a tuple of (x, y).
/// * `p1` - The end point of the line as a tuple of (x, y).
/// * `color` - The color of the line as an array of `C` elements.
/// * `thickness` - The thickness of the line, drawn as a square brush.
pub fn draw_line<const C: usize>(
    img: &mut Image<u8, C>,
    p0: (i64, i64),
    p1: (i64, i64),
    color: [u8; C],
    thickness: usize,
) {
    let (mut x0, mut y0) = p0;
    let (x1, y1) = p1;

    let dx = (x1 - x0).abs();
    let dy = (y1 - y0).abs();
    let sx = if x0 < x1 { 1 } else { -1 };
    let sy = if y0 < y1 { 1 } else { -1 };
    let mut err = dx - dy;

    let half = thickness.saturating_sub(1) as i64 / 2;

    loop {
        for oy in -half..=half {
            for ox in -half..=half {
                set_pixel(img, x0 + ox, y0 + oy, color);
            }
        }

        if x0 == x1 && y0 == y1 {
            break;
        }

        let e2 = 2 * err;
        if e2 > -dy {
            err -= dy;
            x0 += sx;
        }
        if e2 < dx {
            err += dx;
            y0 += sy;
        }
    }
}

/// Draws a circle outline on an image inplace using the midpoint algorithm.
///
/// # Arguments
///
/// * `img` - The image to draw on.
/// * `center` - The center of the circle as (x, y).
/// * `radius` - The radius in pixels.
/// * `color` - The color of the outline.
pub fn draw_circle<const C: usize>(
    img: &mut Image<u8, C>,
    center: (i64, i64),
    radius: i64,
    color: [u8; C],
) {
    let (cx, cy) = center;
    let mut x = radius;
    let mut y = 0;
    let mut err = 1 - radius;

    while x >= y {
        for (px, py) in [
            (x, y),
            (y, x),
            (-y, x),
            (-x, y),
            (-x, -y),
            (-y, -x),
            (y, -x),
            (x, -y),
        ] {
            set_pixel(img, cx + px, cy + py, color);
        }

        y += 1;
        if err < 0 {
            err += 2 * y + 1;
        } else {
            x -= 1;
            err += 2 * (y - x) + 1;
        }
    }
}

/// Place two images next to each other, `left` first.
///
/// The output height is the larger of the two heights; uncovered pixels are black.
///
/// # Errors
///
/// Returns an error if the output image cannot be allocated.
pub fn hconcat<const C: usize>(
    left: &Image<u8, C>,
    right: &Image<u8, C>,
) -> Result<Image<u8, C>, ImageError> {
    let size = ImageSize {
        width: left.width() + right.width(),
        height: left.height().max(right.height()),
    };
    let mut out = Image::from_size_val(size, 0u8)?;

    let out_stride = size.width * C;
    for (x_offset, src) in [(0, left), (left.width(), right)] {
        let src_stride = src.width() * C;
        if src_stride == 0 {
            continue;
        }
        for (y, row) in src.as_slice().chunks_exact(src_stride).enumerate() {
            let start = y * out_stride + x_offset * C;
            out.as_slice_mut()[start..start + src_stride].copy_from_slice(row);
        }
    }

    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_draw_line() -> Result<(), ImageError> {
        let mut img = Image::<u8, 1>::from_size_val([5, 5].into(), 0)?;
        draw_line(&mut img, (0, 0), (4, 4), [255], 1);
        #[rustfmt::skip]
        assert_eq!(
            img.as_slice(),
            &[
                255, 0, 0, 0, 0,
                0, 255, 0, 0, 0,
                0, 0, 255, 0, 0,
                0, 0, 0, 255, 0,
                0, 0, 0, 0, 255,
            ]
        );
        Ok(())
    }

    #[test]
    fn test_draw_line_clipped() -> Result<(), ImageError> {
        let mut img = Image::<u8, 3>::from_size_val([4, 2].into(), 0)?;
        draw_line(&mut img, (-3, 1), (10, 1), [1, 2, 3], 1);
        assert_eq!(img.pixel(0, 1), Some(&[1, 2, 3][..]));
        assert_eq!(img.pixel(3, 1), Some(&[1, 2, 3][..]));
        assert_eq!(img.pixel(0, 0), Some(&[0, 0, 0][..]));
        Ok(())
    }

    #[test]
    fn test_draw_circle() -> Result<(), ImageError> {
        let mut img = Image::<u8, 1>::from_size_val([7, 7].into(), 0)?;
        draw_circle(&mut img, (3, 3), 2, [9]);
        assert_eq!(img.get_pixel(5, 3, 0)?, 9);
        assert_eq!(img.get_pixel(3, 1, 0)?, 9);
        assert_eq!(img.get_pixel(3, 3, 0)?, 0);
        Ok(())
    }

    #[test]
    fn test_hconcat() -> Result<(), ImageError> {
        let left = Image::<u8, 1>::new([2, 2].into(), vec![1, 2, 3, 4])?;
        let right = Image::<u8, 1>::new([1, 1].into(), vec![9])?;
        let out = hconcat(&left, &right)?;
        assert_eq!(out.size(), ImageSize { width: 3, height: 2 });
        assert_eq!(out.as_slice(), &[1, 2, 9, 3, 4, 0]);
        Ok(())
    }
}
