/// View framing from point bounds.
use crate::bounds::PointCloudBounds;
use constants::layout::{INITIAL_ZOOM_OFFSET, MAX_ZOOM, MIN_ZOOM};
use serde::{Deserialize, Serialize};

/// Camera target and log2 zoom, where zoom 0 maps one world unit to one pixel.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ViewFraming {
    pub target: [f64; 3],
    pub zoom: f64,
}

impl Default for ViewFraming {
    fn default() -> Self {
        Self {
            target: [0.0; 3],
            zoom: 0.0,
        }
    }
}

/// Initial orbit view: centred on the cloud, X extent fitting the viewport
/// with some room to spare.
pub fn frame_point_cloud(bounds: &PointCloudBounds, viewport_width: f64) -> ViewFraming {
    if bounds.is_empty() {
        return ViewFraming::default();
    }
    let (dx, _, _) = bounds.dimensions();
    ViewFraming {
        target: bounds.center(),
        zoom: fit_zoom(viewport_width, dx, INITIAL_ZOOM_OFFSET),
    }
}

/// Top-down orthographic view fitting the padded XY extent into a square of
/// `size` pixels.
pub fn frame_orthographic(bounds: &PointCloudBounds, size: f64, padding: f64, zoom_offset: f64) -> ViewFraming {
    if bounds.is_empty() {
        return ViewFraming::default();
    }
    let padded = bounds.padded_xy(padding);
    let [cx, cy, _] = padded.center();
    ViewFraming {
        target: [cx, cy, 0.0],
        zoom: fit_zoom(size, padded.max_xy_range(), zoom_offset),
    }
}

/// `log2(pixels / extent) - offset`, clamped. Degenerate extents keep zoom 0.
fn fit_zoom(pixels: f64, extent: f64, offset: f64) -> f64 {
    if extent <= 0.0 || pixels <= 0.0 || !extent.is_finite() {
        return 0.0;
    }
    ((pixels / extent).log2() - offset).clamp(MIN_ZOOM, MAX_ZOOM)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn frames_cloud_by_x_extent() {
        let bounds = PointCloudBounds::from_positions(&[0.0, 0.0, 0.0, 256.0, 10.0, 4.0]);
        let view = frame_point_cloud(&bounds, 1024.0);
        assert_eq!(view.target, [128.0, 5.0, 2.0]);
        assert_relative_eq!(view.zoom, 0.0);
    }

    #[test]
    fn orthographic_view_pads_and_offsets() {
        let bounds = PointCloudBounds::from_positions(&[0.0, 0.0, 5.0, 100.0, 50.0, 5.0]);
        let view = frame_orthographic(&bounds, 150.0, 0.01, 0.5);
        assert_eq!(view.target, [50.0, 25.0, 0.0]);
        assert_relative_eq!(view.zoom, (150.0f64 / 102.0).log2() - 0.5, epsilon = 1e-12);
    }

    #[test]
    fn single_point_does_not_blow_up() {
        let bounds = PointCloudBounds::from_positions(&[3.0, 3.0, 3.0]);
        assert_eq!(frame_orthographic(&bounds, 150.0, 0.01, 0.5).zoom, 0.0);
        assert_eq!(frame_point_cloud(&PointCloudBounds::new(), 800.0), ViewFraming::default());
    }
}
