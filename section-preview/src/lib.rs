//! Section thumbnail rendering.
//!
//! Each section of the slice annotation is framed top-down, rendered into its
//! own offscreen target and captured as a PNG. [`PreviewScheduler`] bounds how
//! many targets exist at once and gives every job a timeout.

pub mod error;
pub mod raster;
pub mod scene;
pub mod scheduler;
pub mod target;

pub use error::{PreviewError, PreviewResult};
pub use raster::CpuBackend;
pub use scene::{build_scene, PreviewPalette, PreviewScene};
pub use scheduler::{JobStatus, PreviewConfig, PreviewEvent, PreviewScheduler, SubmitSummary};
pub use target::{PreviewBackend, PreviewImage, RenderTarget, ScopedRenderTarget};
