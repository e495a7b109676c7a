/// Point cloud coordinate bounds tracking
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PointCloudBounds {
    pub min_x: f64,
    pub max_x: f64,
    pub min_y: f64,
    pub max_y: f64,
    pub min_z: f64,
    pub max_z: f64,
}

impl Default for PointCloudBounds {
    fn default() -> Self {
        Self::new()
    }
}

impl PointCloudBounds {
    /// Create new bounds initialised to infinity values
    pub fn new() -> Self {
        Self {
            min_x: f64::INFINITY,
            max_x: f64::NEG_INFINITY,
            min_y: f64::INFINITY,
            max_y: f64::NEG_INFINITY,
            min_z: f64::INFINITY,
            max_z: f64::NEG_INFINITY,
        }
    }

    /// Bounds over an interleaved `x, y, z` position buffer.
    pub fn from_positions(positions: &[f64]) -> Self {
        let mut bounds = Self::new();
        for p in positions.chunks_exact(3) {
            bounds.update(p[0], p[1], p[2]);
        }
        bounds
    }

    /// Bounds over the listed point indices only.
    pub fn from_indices(positions: &[f64], indices: &[u32]) -> Self {
        let mut bounds = Self::new();
        for &idx in indices {
            let base = idx as usize * 3;
            if let Some(p) = positions.get(base..base + 3) {
                bounds.update(p[0], p[1], p[2]);
            }
        }
        bounds
    }

    /// Update bounds with a new point
    pub fn update(&mut self, x: f64, y: f64, z: f64) {
        self.min_x = self.min_x.min(x);
        self.max_x = self.max_x.max(x);
        self.min_y = self.min_y.min(y);
        self.max_y = self.max_y.max(y);
        self.min_z = self.min_z.min(z);
        self.max_z = self.max_z.max(z);
    }

    /// True until at least one point has been added.
    pub fn is_empty(&self) -> bool {
        self.min_x > self.max_x
    }

    /// Get world space dimensions
    pub fn dimensions(&self) -> (f64, f64, f64) {
        (
            self.max_x - self.min_x,
            self.max_y - self.min_y,
            self.max_z - self.min_z,
        )
    }

    pub fn center(&self) -> [f64; 3] {
        [
            (self.min_x + self.max_x) * 0.5,
            (self.min_y + self.max_y) * 0.5,
            (self.min_z + self.max_z) * 0.5,
        ]
    }

    /// Grow the XY extent on every side by `fraction` of the larger XY dimension.
    pub fn padded_xy(&self, fraction: f64) -> Self {
        let (dx, dy, _) = self.dimensions();
        let padding = dx.max(dy) * fraction;
        Self {
            min_x: self.min_x - padding,
            max_x: self.max_x + padding,
            min_y: self.min_y - padding,
            max_y: self.max_y + padding,
            ..*self
        }
    }

    /// Larger of the X and Y extents.
    pub fn max_xy_range(&self) -> f64 {
        let (dx, dy, _) = self.dimensions();
        dx.max(dy)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn tracks_extent_of_positions() {
        let bounds = PointCloudBounds::from_positions(&[0.0, 1.0, 2.0, 10.0, -1.0, 4.0]);
        assert_eq!(bounds.dimensions(), (10.0, 2.0, 2.0));
        assert_eq!(bounds.center(), [5.0, 0.0, 3.0]);
    }

    #[test]
    fn index_subset_ignores_out_of_range_points() {
        let positions = [0.0, 0.0, 0.0, 4.0, 4.0, 0.0, 100.0, 100.0, 0.0];
        let bounds = PointCloudBounds::from_indices(&positions, &[0, 1, 7]);
        assert_eq!(bounds.max_x, 4.0);
        assert!(PointCloudBounds::from_indices(&positions, &[]).is_empty());
    }

    #[test]
    fn pads_by_larger_extent() {
        let bounds = PointCloudBounds::from_positions(&[0.0, 0.0, 0.0, 100.0, 50.0, 0.0]);
        let padded = bounds.padded_xy(0.01);
        assert_relative_eq!(padded.min_x, -1.0);
        assert_relative_eq!(padded.max_y, 51.0);
        assert_relative_eq!(padded.max_xy_range(), 102.0);
    }
}
