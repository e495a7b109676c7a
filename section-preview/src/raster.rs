/// Software rasteriser backend for section thumbnails.
use crate::error::{PreviewError, PreviewResult};
use crate::scene::PreviewScene;
use crate::target::{PreviewBackend, PreviewImage, RenderTarget};
use constants::preview::PREVIEW_POINT_RADIUS;
use image::{ImageFormat, Pixel, Rgba, RgbaImage};
use point_cloud_attributes::CategoryCode;
use std::io::Cursor;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

/// Creates CPU render targets and counts how many are alive.
#[derive(Debug, Clone, Default)]
pub struct CpuBackend {
    live: Arc<AtomicUsize>,
    /// Simulated time until the frame completes.
    frame_time: Duration,
    point_radius: Option<f32>,
}

impl CpuBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_frame_time(mut self, frame_time: Duration) -> Self {
        self.frame_time = frame_time;
        self
    }

    pub fn with_point_radius(mut self, radius: f32) -> Self {
        self.point_radius = Some(radius);
        self
    }

    /// Targets created and not yet released.
    pub fn live_targets(&self) -> usize {
        self.live.load(Ordering::SeqCst)
    }
}

impl PreviewBackend for CpuBackend {
    type Target = CpuTarget;

    fn create_target(&self, size: u32) -> PreviewResult<CpuTarget> {
        if size == 0 {
            return Err(PreviewError::TargetUnavailable("zero-sized target".into()));
        }
        self.live.fetch_add(1, Ordering::SeqCst);
        Ok(CpuTarget {
            image: RgbaImage::new(size, size),
            section: None,
            live: self.live.clone(),
            frame_time: self.frame_time,
            radius: self.point_radius.unwrap_or(PREVIEW_POINT_RADIUS),
            released: false,
        })
    }
}

pub struct CpuTarget {
    image: RgbaImage,
    /// Section of the last completed frame.
    section: Option<CategoryCode>,
    live: Arc<AtomicUsize>,
    frame_time: Duration,
    radius: f32,
    released: bool,
}

impl CpuTarget {
    /// Splat one point as a filled disc, blending over what is there.
    fn splat(&mut self, centre: [f64; 2], colour: [u8; 4]) {
        let (width, height) = self.image.dimensions();
        let r = self.radius.max(0.5) as f64;
        let r2 = r * r;
        let x0 = (centre[0] - r).floor().max(0.0) as u32;
        let y0 = (centre[1] - r).floor().max(0.0) as u32;
        let x1 = ((centre[0] + r).ceil().max(0.0) as u32).min(width);
        let y1 = ((centre[1] + r).ceil().max(0.0) as u32).min(height);

        let src = Rgba(colour);
        for y in y0..y1 {
            for x in x0..x1 {
                let dx = x as f64 + 0.5 - centre[0];
                let dy = y as f64 + 0.5 - centre[1];
                if dx * dx + dy * dy > r2 {
                    continue;
                }
                let pixel = self.image.get_pixel_mut(x, y);
                if colour[3] == u8::MAX {
                    *pixel = src;
                } else {
                    pixel.blend(&src);
                }
            }
        }
    }
}

impl RenderTarget for CpuTarget {
    async fn render(&mut self, scene: &PreviewScene) -> PreviewResult<()> {
        if self.released {
            return Err(PreviewError::Render("target already released".into()));
        }
        for pixel in self.image.pixels_mut() {
            *pixel = Rgba([0, 0, 0, 0]);
        }
        for (&point, &colour) in scene.points.iter().zip(&scene.colours) {
            let centre = scene.project(point);
            self.splat(centre, colour);
        }
        if !self.frame_time.is_zero() {
            tokio::time::sleep(self.frame_time).await;
        }
        self.section = Some(scene.section);
        Ok(())
    }

    fn capture(&mut self) -> PreviewResult<PreviewImage> {
        let section = self.section.ok_or(PreviewError::NotRendered)?;
        let mut png = Cursor::new(Vec::new());
        self.image.write_to(&mut png, ImageFormat::Png)?;
        Ok(PreviewImage {
            section,
            width: self.image.width(),
            height: self.image.height(),
            png: png.into_inner(),
        })
    }

    fn release(&mut self) {
        if !self.released {
            self.released = true;
            self.live.fetch_sub(1, Ordering::SeqCst);
        }
    }
}
