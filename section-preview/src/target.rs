//! Offscreen render targets.
//!
//! A target is created per preview job, renders exactly one scene, is captured
//! once and then released. [`ScopedRenderTarget`] ties the release to scope
//! exit, so a job that fails, times out or is dropped mid-render still tears
//! its target down.
use crate::error::PreviewResult;
use crate::scene::PreviewScene;
use point_cloud_attributes::CategoryCode;
use std::ops::{Deref, DerefMut};

/// Encoded thumbnail of one section.
#[derive(Debug, Clone, PartialEq)]
pub struct PreviewImage {
    pub section: CategoryCode,
    pub width: u32,
    pub height: u32,
    /// PNG bytes.
    pub png: Vec<u8>,
}

pub trait RenderTarget {
    /// Draw `scene`. Resolves once the frame has been completed.
    fn render(&mut self, scene: &PreviewScene) -> impl Future<Output = PreviewResult<()>>;

    /// Encode the last completed frame.
    fn capture(&mut self) -> PreviewResult<PreviewImage>;

    /// Free the target's resources. Called exactly once.
    fn release(&mut self);
}

/// Source of offscreen render targets.
pub trait PreviewBackend {
    type Target: RenderTarget;

    fn create_target(&self, size: u32) -> PreviewResult<Self::Target>;
}

/// Owns a render target and releases it on drop.
pub struct ScopedRenderTarget<T: RenderTarget> {
    target: T,
}

impl<T: RenderTarget> ScopedRenderTarget<T> {
    pub fn new(target: T) -> Self {
        Self { target }
    }
}

impl<T: RenderTarget> Deref for ScopedRenderTarget<T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.target
    }
}

impl<T: RenderTarget> DerefMut for ScopedRenderTarget<T> {
    fn deref_mut(&mut self) -> &mut T {
        &mut self.target
    }
}

impl<T: RenderTarget> Drop for ScopedRenderTarget<T> {
    fn drop(&mut self) {
        self.target.release();
    }
}
