/// Alpha used for points that are filtered out but still drawn as a faint ghost.
pub const SUPPRESSED_ALPHA: u8 = 5;

/// Colour of an isolated-away or below-threshold point.
pub const SUPPRESSED_RGBA: [u8; 4] = [0, 0, 0, SUPPRESSED_ALPHA];

/// Hidden categories on the scatter (2D) path are cut out completely.
pub const HIDDEN_SCATTER_RGBA: [u8; 4] = [0, 0, 0, 0];

/// Hidden categories on the point cloud (3D) path keep the ghost alpha.
pub const HIDDEN_POINT_CLOUD_RGBA: [u8; 4] = [0, 0, 0, SUPPRESSED_ALPHA];

/// Neutral grey used when no categorical colour can be resolved.
pub const FALLBACK_RGB: [u8; 3] = [200, 200, 200];

/// Grey used for preview thumbnails when the default annotation has no colour.
pub const PREVIEW_FALLBACK_RGBA: [u8; 4] = [180, 180, 180, 255];

/// Constant green channel of the continuous ramp.
pub const RAMP_GREEN: u8 = 50;

/// Alpha reached by the continuous ramp at the top of the range.
pub const RAMP_MAX_ALPHA: f64 = 180.0;

/// Added to the continuous range so a constant field never divides by zero.
pub const RAMP_EPSILON: f64 = 1e-6;
