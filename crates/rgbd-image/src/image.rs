use crate::error::ImageError;

/// Width and height of a frame in pixels.
///
/// # Examples
///
/// ```
/// use rgbd_image::ImageSize;
///
/// let vga: ImageSize = [640, 480].into();
/// assert_eq!(vga, ImageSize { width: 640, height: 480 });
/// assert_eq!(vga.to_string(), "640x480");
/// ```
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ImageSize {
    /// Number of columns.
    pub width: usize,
    /// Number of rows.
    pub height: usize,
}

impl std::fmt::Display for ImageSize {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

impl From<[usize; 2]> for ImageSize {
    fn from([width, height]: [usize; 2]) -> Self {
        ImageSize { width, height }
    }
}

/// An 8-bit RGB color image.
pub type ColorImage = Image<u8, 3>;

/// An 8-bit single channel image.
pub type GrayImage = Image<u8, 1>;

/// A depth image in millimeters where `0` means "no measurement".
pub type DepthImage = Image<u16, 1>;

/// An owned frame of `CHANNELS` interleaved values per pixel.
///
/// Pixels are stored row by row, so the value of channel `c` at column `x`
/// and row `y` lives at `(y * width + x) * CHANNELS + c`.
#[derive(Clone, Debug, PartialEq)]
pub struct Image<T, const CHANNELS: usize> {
    size: ImageSize,
    data: Vec<T>,
}

impl<T, const CHANNELS: usize> Image<T, CHANNELS> {
    /// Wrap interleaved pixel values.
    ///
    /// # Errors
    ///
    /// Returns [`ImageError::InvalidChannelShape`] unless `data` holds exactly
    /// `width * height * CHANNELS` values.
    ///
    /// # Examples
    ///
    /// ```
    /// use rgbd_image::ColorImage;
    ///
    /// let rgb = ColorImage::new([2, 1].into(), vec![255, 0, 0, 0, 0, 255]).unwrap();
    /// assert_eq!(rgb.pixel(1, 0), Some(&[0, 0, 255][..]));
    /// ```
    pub fn new(size: ImageSize, data: Vec<T>) -> Result<Self, ImageError> {
        let expected = size.width * size.height * CHANNELS;
        if data.len() != expected {
            return Err(ImageError::InvalidChannelShape(data.len(), expected));
        }

        Ok(Self { size, data })
    }

    /// Allocate an image with every value set to `val`.
    ///
    /// # Examples
    ///
    /// ```
    /// use rgbd_image::{DepthImage, ImageSize};
    ///
    /// let depth = DepthImage::from_size_val([4, 3].into(), 0u16).unwrap();
    ///
    /// assert_eq!(depth.width(), 4);
    /// assert_eq!(depth.height(), 3);
    /// assert!(depth.as_slice().iter().all(|&d| d == 0));
    /// ```
    pub fn from_size_val(size: ImageSize, val: T) -> Result<Self, ImageError>
    where
        T: Clone,
    {
        let data = vec![val; size.width * size.height * CHANNELS];
        Image::new(size, data)
    }

    /// Frame size.
    pub fn size(&self) -> ImageSize {
        self.size
    }

    /// Number of columns.
    pub fn width(&self) -> usize {
        self.size.width
    }

    /// Number of rows.
    pub fn height(&self) -> usize {
        self.size.height
    }

    /// Alias of [`Image::width`].
    pub fn cols(&self) -> usize {
        self.width()
    }

    /// Alias of [`Image::height`].
    pub fn rows(&self) -> usize {
        self.height()
    }

    /// Values per pixel.
    pub fn num_channels(&self) -> usize {
        CHANNELS
    }

    /// Whether the image has no pixels.
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// All values, row by row.
    pub fn as_slice(&self) -> &[T] {
        &self.data
    }

    /// All values, row by row, mutably.
    pub fn as_slice_mut(&mut self) -> &mut [T] {
        &mut self.data
    }

    /// Take the values out of the image.
    pub fn into_vec(self) -> Vec<T> {
        self.data
    }

    /// Get the channels of the pixel at `(x, y)`, or `None` when out of bounds.
    pub fn pixel(&self, x: usize, y: usize) -> Option<&[T]> {
        if x >= self.width() || y >= self.height() {
            return None;
        }
        let offset = (y * self.width() + x) * CHANNELS;
        Some(&self.data[offset..offset + CHANNELS])
    }

    /// Get a mutable view on the channels of the pixel at `(x, y)`.
    pub fn pixel_mut(&mut self, x: usize, y: usize) -> Option<&mut [T]> {
        if x >= self.width() || y >= self.height() {
            return None;
        }
        let offset = (y * self.width() + x) * CHANNELS;
        Some(&mut self.data[offset..offset + CHANNELS])
    }

    /// Read channel `ch` of the pixel at column `x`, row `y`.
    ///
    /// # Errors
    ///
    /// Returns an error if the pixel or channel index is out of bounds.
    pub fn get_pixel(&self, x: usize, y: usize, ch: usize) -> Result<T, ImageError>
    where
        T: Copy,
    {
        if ch >= CHANNELS {
            return Err(ImageError::ChannelIndexOutOfBounds(ch, CHANNELS));
        }
        self.pixel(x, y).map(|px| px[ch]).ok_or_else(|| {
            ImageError::PixelIndexOutOfBounds(x, y, self.width(), self.height())
        })
    }

    /// Write channel `ch` of the pixel at column `x`, row `y`.
    ///
    /// # Errors
    ///
    /// Returns an error if the pixel or channel index is out of bounds.
    pub fn set_pixel(&mut self, x: usize, y: usize, ch: usize, val: T) -> Result<(), ImageError> {
        if ch >= CHANNELS {
            return Err(ImageError::ChannelIndexOutOfBounds(ch, CHANNELS));
        }
        let (width, height) = (self.width(), self.height());
        let px = self
            .pixel_mut(x, y)
            .ok_or(ImageError::PixelIndexOutOfBounds(x, y, width, height))?;
        px[ch] = val;
        Ok(())
    }

    /// Copy one channel out into a single channel image.
    ///
    /// # Errors
    ///
    /// Returns [`ImageError::ChannelIndexOutOfBounds`] if `ch >= CHANNELS`.
    pub fn channel(&self, ch: usize) -> Result<Image<T, 1>, ImageError>
    where
        T: Copy,
    {
        if ch >= CHANNELS {
            return Err(ImageError::ChannelIndexOutOfBounds(ch, CHANNELS));
        }
        let plane = self.data.iter().skip(ch).step_by(CHANNELS).copied().collect();
        Image::new(self.size, plane)
    }

    /// Convert every value to another numeric type, e.g. depth in `u16` to `f32`.
    ///
    /// # Errors
    ///
    /// Returns [`ImageError::CastError`] if a value does not fit the target type.
    pub fn cast<U>(&self) -> Result<Image<U, CHANNELS>, ImageError>
    where
        U: num_traits::NumCast,
        T: num_traits::NumCast + Copy,
    {
        let values = self
            .data
            .iter()
            .map(|&v| U::from(v).ok_or(ImageError::CastError))
            .collect::<Result<Vec<_>, _>>()?;
        Image::new(self.size, values)
    }

    /// Check that another image has the same width and height.
    ///
    /// # Errors
    ///
    /// Returns [`ImageError::InvalidImageSize`] when the sizes differ.
    pub fn ensure_same_size<U, const C: usize>(
        &self,
        other: &Image<U, C>,
    ) -> Result<(), ImageError> {
        if self.size != other.size() {
            return Err(ImageError::InvalidImageSize(
                self.width(),
                self.height(),
                other.width(),
                other.height(),
            ));
        }
        Ok(())
    }
}
