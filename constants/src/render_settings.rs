/// Point size used by the 3D layout and restored when leaving a 2D layout.
pub const DEFAULT_POINT_SIZE: f32 = 1.0;

/// Point size for the treemap layout.
pub const TREEMAP_POINT_SIZE: f32 = 2.0;

/// Point size for the histogram layout.
pub const HISTOGRAM_POINT_SIZE: f32 = 3.0;

pub const DEFAULT_OPACITY: f32 = 1.0;

/// Identifier of the main point cloud layer.
pub const POINT_CLOUD_LAYER_ID: &str = "laz-point-cloud-layer";

/// Identifier of the 2D section scatter layer.
pub const SCATTER_LAYER_ID: &str = "scatter-plot-layer";
