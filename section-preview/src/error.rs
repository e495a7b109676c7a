/// Failures of a single preview job.
use point_cloud_attributes::{AttributeError, CategoryCode};
use thiserror::Error;

pub type PreviewResult<T> = Result<T, PreviewError>;

#[derive(Error, Debug)]
pub enum PreviewError {
    #[error("section {0} has no points")]
    NoPoints(CategoryCode),

    #[error("render target unavailable: {0}")]
    TargetUnavailable(String),

    #[error("render pass failed: {0}")]
    Render(String),

    #[error("capture requested before a render pass completed")]
    NotRendered,

    #[error("image encoding failed: {0}")]
    Encode(#[from] image::ImageError),

    #[error("attribute data error: {0}")]
    Attributes(#[from] AttributeError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
