/// An ordered point cloud with optional per-point colors.
///
/// Points are in meters. A point with any NaN coordinate marks a missing
/// measurement and is skipped by consumers.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PointCloud {
    // The points in the point cloud.
    points: Vec<[f64; 3]>,
    // The RGB colors of the points, aligned with `points` when present.
    colors: Option<Vec<[u8; 3]>>,
}

impl PointCloud {
    /// Create a new point cloud from points and optional colors.
    ///
    /// Points without a matching color entry are treated as uncolored.
    pub fn new(points: Vec<[f64; 3]>, colors: Option<Vec<[u8; 3]>>) -> Self {
        Self { points, colors }
    }

    /// Get the number of points in the point cloud.
    #[inline]
    pub fn len(&self) -> usize {
        self.points.len()
    }

    /// Check if the point cloud is empty.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    /// Get as reference the points in the point cloud.
    pub fn points(&self) -> &[[f64; 3]] {
        &self.points
    }

    /// Get as reference the colors of the points in the point cloud.
    pub fn colors(&self) -> Option<&[[u8; 3]]> {
        self.colors.as_deref()
    }

    /// The color of a point, if the cloud carries one for it.
    #[inline]
    pub fn color(&self, index: usize) -> Option<[u8; 3]> {
        self.colors.as_ref()?.get(index).copied()
    }

    /// Number of points without NaN coordinates.
    pub fn num_valid(&self) -> usize {
        self.points.iter().filter(|p| is_valid_point(p)).count()
    }
}

/// Whether no coordinate of the point is NaN.
#[inline]
pub fn is_valid_point(p: &[f64; 3]) -> bool {
    !p.iter().any(|c| c.is_nan())
}
