/// Errors raised while decoding host data into attribute stores.
use thiserror::Error;

pub type AttributeResult<T> = Result<T, AttributeError>;

#[derive(Error, Debug)]
pub enum AttributeError {
    #[error("unsupported dtype '{0}'")]
    UnsupportedDType(String),

    #[error("buffer of {len} bytes is not a whole number of {width}-byte elements")]
    MisalignedBuffer { len: usize, width: usize },

    #[error("'{name}' has {actual} values, expected {expected}")]
    LengthMismatch {
        name: String,
        expected: usize,
        actual: usize,
    },

    #[error("missing binary buffer for '{0}'")]
    MissingBuffer(String),

    #[error("'{0}' is categorical data and cannot be used as a continuous field")]
    NotContinuous(String),

    #[error("'{0}' holds floating point data and cannot be used as category codes")]
    NotCategorical(String),

    #[error("property '{name}' has an unexpected shape: {reason}")]
    MalformedProperty { name: String, reason: String },

    #[error("point cloud has no points")]
    EmptyPointCloud,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("LAS error: {0}")]
    Las(#[from] las::Error),
}
