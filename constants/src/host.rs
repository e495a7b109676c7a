/// Names of the properties synchronised by the embedding host.
pub const LAZ_BYTES: &str = "laz_bytes";
pub const ANNOTATION_CONFIG: &str = "annotation_config";
pub const ANNOTATION_BINS: &str = "annotation_bins";
pub const CONTINUOUS_CONFIG: &str = "continuous_config";
pub const CONTINUOUS_BINS: &str = "continuous_bins";
pub const GLOBAL_CONFIG: &str = "global_config";

/// Every property the bridge observes, in load order.
pub const OBSERVED_PROPERTIES: &[&str] = &[
    LAZ_BYTES,
    ANNOTATION_CONFIG,
    ANNOTATION_BINS,
    CONTINUOUS_CONFIG,
    CONTINUOUS_BINS,
    GLOBAL_CONFIG,
];

/// Annotation dimension used for 2D slicing when no slice key is configured.
pub const DEFAULT_SLICE_KEY: &str = "section";
