/// Edge length of a section thumbnail in pixels.
pub const PREVIEW_SIZE: u32 = 150;

/// Simultaneous offscreen render jobs, bounded by available render contexts.
pub const MAX_CONCURRENT_PREVIEWS: usize = 2;

/// Budget for a single preview job before it is abandoned.
pub const PREVIEW_TIMEOUT_MS: u64 = 2000;

/// Pause between chunks so the main view keeps rendering.
pub const CHUNK_DELAY_MS: u64 = 100;

/// Settle time between the render pass and the raster capture.
pub const CAPTURE_SETTLE_MS: u64 = 100;

/// Bounding box padding as a fraction of the larger extent.
pub const BOUNDS_PADDING: f64 = 0.01;

/// Zoom offset subtracted after fitting the section into the thumbnail.
pub const PREVIEW_ZOOM_OFFSET: f64 = 0.5;

/// Point radius in thumbnail pixels.
pub const PREVIEW_POINT_RADIUS: f32 = 1.0;
