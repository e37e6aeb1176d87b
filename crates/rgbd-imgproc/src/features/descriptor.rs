/// Length in bytes of a binary descriptor (256 tests).
pub const BINARY_DESCRIPTOR_BYTES: usize = 32;

/// Distance used to compare two descriptors of the same algorithm.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DistanceMetric {
    /// Number of differing bits, for binary descriptors.
    Hamming,
    /// L2 norm of the difference, for floating point descriptors.
    Euclidean,
}

/// A set of descriptors, one per keypoint.
#[derive(Debug, Clone, PartialEq)]
pub enum Descriptors {
    /// 256-bit binary descriptors.
    Binary(Vec<[u8; BINARY_DESCRIPTOR_BYTES]>),
    /// Floating point descriptors stored row-major, `dim` values each.
    Float {
        /// Number of values per descriptor.
        dim: usize,
        /// Flattened descriptor values.
        data: Vec<f32>,
    },
}

impl Descriptors {
    /// Number of descriptors in the set.
    pub fn len(&self) -> usize {
        match self {
            Descriptors::Binary(d) => d.len(),
            Descriptors::Float { dim, data } => {
                if *dim == 0 {
                    0
                } else {
                    data.len() / dim
                }
            }
        }
    }

    /// Whether the set holds no descriptor.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The metric these descriptors are compared with.
    pub fn metric(&self) -> DistanceMetric {
        match self {
            Descriptors::Binary(_) => DistanceMetric::Hamming,
            Descriptors::Float { .. } => DistanceMetric::Euclidean,
        }
    }

    /// Get the `i`-th floating point descriptor.
    pub fn float_row(&self, i: usize) -> Option<&[f32]> {
        match self {
            Descriptors::Float { dim, data } => data.get(i * dim..(i + 1) * dim),
            Descriptors::Binary(_) => None,
        }
    }
}

/// Compute the Hamming distance between two binary descriptors.
///
/// # Examples
///
/// ```
/// use rgbd_imgproc::features::hamming_distance;
///
/// let a = [0u8; 32];
/// let mut b = [0u8; 32];
/// b[0] = 0b1011;
/// assert_eq!(hamming_distance(&a, &b), 3);
/// ```
#[inline]
pub fn hamming_distance(a: &[u8; BINARY_DESCRIPTOR_BYTES], b: &[u8; BINARY_DESCRIPTOR_BYTES]) -> u32 {
    a.iter().zip(b.iter()).map(|(x, y)| (x ^ y).count_ones()).sum()
}

/// Compute the Euclidean distance between two floating point descriptors.
#[inline]
pub fn euclidean_distance(a: &[f32], b: &[f32]) -> f32 {
    a.iter()
        .zip(b.iter())
        .map(|(x, y)| (x - y) * (x - y))
        .sum::<f32>()
        .sqrt()
}
