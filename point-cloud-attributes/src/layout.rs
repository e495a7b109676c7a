/// Alternate flat layouts of the point set.
///
/// Layout buffers are `3 × f32` per point, indexed like the source positions,
/// which are never touched. Z carries a small deterministic jitter so
/// coincident points do not z-fight.
use crate::annotation::{AnnotationDimension, CategoryCode};
use crate::bounds::PointCloudBounds;
use crate::continuous::ContinuousField;
use crate::snapshot::AttributeSnapshot;
use constants::layout::{FLAT_LAYOUT_JITTER, HISTOGRAM_BINS, HISTOGRAM_FILL};
use constants::render_settings::{DEFAULT_POINT_SIZE, HISTOGRAM_POINT_SIZE, TREEMAP_POINT_SIZE};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LayoutMode {
    #[default]
    #[serde(rename = "3d")]
    ThreeD,
    #[serde(rename = "2d-treemap")]
    Treemap,
    #[serde(rename = "2d-histogram")]
    Histogram,
}

impl LayoutMode {
    pub fn is_flat(self) -> bool {
        self != LayoutMode::ThreeD
    }

    pub fn point_size(self) -> f32 {
        match self {
            LayoutMode::ThreeD => DEFAULT_POINT_SIZE,
            LayoutMode::Treemap => TREEMAP_POINT_SIZE,
            LayoutMode::Histogram => HISTOGRAM_POINT_SIZE,
        }
    }
}

/// A precomputed flat layout. `generation` identifies the buffer for
/// position triggers.
#[derive(Debug, Clone, PartialEq)]
pub struct AlternateLayout {
    pub mode: LayoutMode,
    pub positions: Vec<f32>,
    pub generation: u64,
}

impl AlternateLayout {
    #[inline]
    pub fn position(&self, index: usize) -> Option<[f32; 3]> {
        let p = self.positions.get(index * 3..index * 3 + 3)?;
        Some([p[0], p[1], p[2]])
    }

    pub fn len(&self) -> usize {
        self.positions.len() / 3
    }

    pub fn is_empty(&self) -> bool {
        self.positions.is_empty()
    }
}

/// Axis-aligned rectangle allocated to one category, relative to the layout origin.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TreemapRect {
    pub code: CategoryCode,
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

/// Stable pseudo-random offset in `[-jitter/2, jitter/2)` for point `index`.
#[inline]
fn z_jitter(index: usize) -> f32 {
    let mut x = index as u32 ^ 0x9e37_79b9;
    x ^= x >> 16;
    x = x.wrapping_mul(0x7feb_352d);
    x ^= x >> 15;
    x = x.wrapping_mul(0x846c_a68b);
    x ^= x >> 16;
    (x as f32 / u32::MAX as f32 - 0.5) * FLAT_LAYOUT_JITTER
}

/// Slice-and-dice partition of a `width × height` area. `categories` must be
/// sorted largest first. Each category takes a share of the remaining area
/// proportional to its count, cutting along the longer side.
pub fn treemap_rects(categories: &[(CategoryCode, usize)], width: f64, height: f64) -> Vec<TreemapRect> {
    let total: usize = categories.iter().map(|(_, count)| count).sum();
    let mut rects = Vec::with_capacity(categories.len());
    if total == 0 {
        return rects;
    }

    let (mut x, mut y, mut w, mut h) = (0.0, 0.0, width, height);
    let mut remaining = total as f64;
    for &(code, count) in categories {
        let share = if remaining > 0.0 { count as f64 / remaining } else { 0.0 };
        if w >= h {
            let cut = w * share;
            rects.push(TreemapRect {
                code,
                x,
                y,
                width: cut,
                height: h,
            });
            x += cut;
            w -= cut;
        } else {
            let cut = h * share;
            rects.push(TreemapRect {
                code,
                x,
                y,
                width: w,
                height: cut,
            });
            y += cut;
            h -= cut;
        }
        remaining -= count as f64;
    }
    rects
}

/// Group point indices by category, largest category first.
fn points_by_category(dimension: &AnnotationDimension) -> Vec<(CategoryCode, Vec<u32>)> {
    let mut groups: Vec<(CategoryCode, Vec<u32>)> = dimension.group_indices().into_iter().collect();
    groups.sort_by(|a, b| b.1.len().cmp(&a.1.len()).then(a.0.cmp(&b.0)));
    groups
}

/// Treemap of `dimension` over the XY extent of `bounds`.
pub fn treemap_positions(dimension: &AnnotationDimension, bounds: &PointCloudBounds) -> Option<Vec<f32>> {
    if dimension.is_empty() || bounds.is_empty() {
        return None;
    }
    let (width, height, _) = bounds.dimensions();
    let groups = points_by_category(dimension);
    let counts: Vec<(CategoryCode, usize)> = groups.iter().map(|(c, p)| (*c, p.len())).collect();
    let rects = treemap_rects(&counts, width, height);

    let mut positions = vec![0.0f32; dimension.len() * 3];
    for ((_, members), rect) in groups.iter().zip(&rects) {
        let per_row = (members.len() as f64).sqrt().ceil().max(1.0) as usize;
        for (slot, &idx) in members.iter().enumerate() {
            let col = (slot % per_row) as f64;
            let row = (slot / per_row) as f64;
            let base = idx as usize * 3;
            positions[base] = (bounds.min_x + rect.x + col / per_row as f64 * rect.width) as f32;
            positions[base + 1] = (bounds.min_y + rect.y + row / per_row as f64 * rect.height) as f32;
            positions[base + 2] = z_jitter(idx as usize);
        }
    }
    Some(positions)
}

/// Per-category histograms of `field`, one row of bins per category.
/// Bar heights are relative to the fullest bin of the same category.
pub fn histogram_positions(
    dimension: &AnnotationDimension,
    field: &ContinuousField,
    bounds: &PointCloudBounds,
) -> Option<Vec<f32>> {
    let count = dimension.len();
    if count == 0 || field.len() != count || bounds.is_empty() {
        return None;
    }

    let codes = dimension.unique_codes();
    let row_of = |code: CategoryCode| codes.binary_search(&code).ok();
    let mut bins: Vec<Vec<Vec<u32>>> = vec![vec![Vec::new(); HISTOGRAM_BINS]; codes.len()];
    let range = field.max - field.min;

    for idx in 0..count {
        let (Some(code), Some(value)) = (dimension.code_at(idx), field.value_at(idx)) else {
            continue;
        };
        let Some(row) = row_of(code) else { continue };
        let value = value as f64;
        if !value.is_finite() {
            continue;
        }
        let bin = if range > 0.0 {
            (((value - field.min) / range) * HISTOGRAM_BINS as f64).floor()
        } else {
            0.0
        };
        let bin = (bin.max(0.0) as usize).min(HISTOGRAM_BINS - 1);
        bins[row][bin].push(idx as u32);
    }

    let (width, height, _) = bounds.dimensions();
    let bin_width = width / HISTOGRAM_BINS as f64;
    let row_height = height / codes.len().max(1) as f64;

    let mut positions = vec![0.0f32; count * 3];
    for (row, row_bins) in bins.iter().enumerate() {
        let base_y = bounds.min_y + row as f64 * row_height;
        let fullest = row_bins.iter().map(Vec::len).max().unwrap_or(0).max(1);
        for (bin, members) in row_bins.iter().enumerate() {
            if members.is_empty() {
                continue;
            }
            let bar_height = members.len() as f64 / fullest as f64 * row_height * HISTOGRAM_FILL;
            let bin_x = bounds.min_x + bin as f64 * bin_width;
            let per_row = (members.len() as f64).sqrt().ceil().max(1.0) as usize;
            for (slot, &idx) in members.iter().enumerate() {
                let col = (slot % per_row) as f64 / per_row as f64;
                let line = (slot / per_row) as f64 / per_row as f64;
                let base = idx as usize * 3;
                positions[base] = (bin_x + col * bin_width) as f32;
                positions[base + 1] = (base_y + line * bar_height) as f32;
                positions[base + 2] = z_jitter(idx as usize);
            }
        }
    }

    // Non-finite values keep their category row origin.
    for idx in 0..count {
        let finite = field.value_at(idx).is_some_and(f32::is_finite);
        if !finite {
            if let Some(row) = dimension.code_at(idx).and_then(row_of) {
                let base = idx * 3;
                positions[base] = bounds.min_x as f32;
                positions[base + 1] = (bounds.min_y + row as f64 * row_height) as f32;
            }
        }
    }
    Some(positions)
}

/// Current layout mode and its buffer.
#[derive(Debug, Default)]
pub struct LayoutController {
    mode: LayoutMode,
    alternate: Option<Arc<AlternateLayout>>,
    generation: u64,
}

impl LayoutController {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn mode(&self) -> LayoutMode {
        self.mode
    }

    pub fn alternate(&self) -> Option<&Arc<AlternateLayout>> {
        self.alternate.as_ref()
    }

    /// Switch between 3D and a flat layout. From 3D the histogram is chosen
    /// when a continuous field is active, the treemap otherwise; both group by
    /// `dimension`. Stays in 3D when the layout cannot be built.
    pub fn toggle(&mut self, snapshot: &AttributeSnapshot, dimension: Option<&str>) -> LayoutMode {
        if self.mode.is_flat() {
            self.mode = LayoutMode::ThreeD;
            self.alternate = None;
            log::info!("Layout switched to 3D");
            return self.mode;
        }

        let Some(dimension) = dimension.and_then(|name| snapshot.annotations.get(name)) else {
            log::warn!("Flat layout needs a loaded colouring annotation");
            return self.mode;
        };
        let bounds = &snapshot.points.bounds;

        let built = match snapshot.active_field() {
            Some(field) => histogram_positions(dimension, field, bounds)
                .map(|positions| (LayoutMode::Histogram, positions)),
            None => treemap_positions(dimension, bounds).map(|positions| (LayoutMode::Treemap, positions)),
        };

        match built {
            Some((mode, positions)) => {
                self.generation += 1;
                self.mode = mode;
                self.alternate = Some(Arc::new(AlternateLayout {
                    mode,
                    positions,
                    generation: self.generation,
                }));
                log::info!("Layout switched to {:?} by '{}'", mode, dimension.name);
            }
            None => log::warn!("Could not build a flat layout for '{}'", dimension.name),
        }
        self.mode
    }

    pub fn reset(&mut self) {
        self.mode = LayoutMode::ThreeD;
        self.alternate = None;
    }
}
