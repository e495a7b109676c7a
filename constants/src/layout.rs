/// Number of value bins per category row in the histogram layout.
pub const HISTOGRAM_BINS: usize = 30;

/// Fraction of a category row a full histogram bin may occupy.
pub const HISTOGRAM_FILL: f64 = 0.8;

/// Depth jitter applied to flattened layouts so coincident points still sort.
pub const FLAT_LAYOUT_JITTER: f32 = 0.01;

/// Zoom offset subtracted when framing the whole cloud on load.
pub const INITIAL_ZOOM_OFFSET: f64 = 2.0;

/// Camera zoom limits shared by the orbit and orthographic views.
pub const MIN_ZOOM: f64 = -10.0;
pub const MAX_ZOOM: f64 = 20.0;
