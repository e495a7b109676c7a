/// Versioned, copy-on-write attribute snapshots.
///
/// Readers pin an `Arc<AttributeSnapshot>` for the duration of one operation
/// (a redraw, a preview job). Writers never mutate a published snapshot, they
/// commit a replacement and bump the revision.
use crate::annotation::{AnnotationStore, Rgba};
use crate::bounds::PointCloudBounds;
use crate::continuous::{ContinuousField, ContinuousStore};
use parking_lot::RwLock;
use std::sync::Arc;

/// Immutable point positions plus the colours they were delivered with.
#[derive(Debug, Clone, Default)]
pub struct PointSet {
    /// Interleaved `x, y, z` per point.
    pub positions: Vec<f64>,
    pub original_colours: Option<Vec<Rgba>>,
    pub bounds: PointCloudBounds,
}

impl PointSet {
    pub fn new(positions: Vec<f64>, original_colours: Option<Vec<Rgba>>) -> Self {
        let bounds = PointCloudBounds::from_positions(&positions);
        Self {
            positions,
            original_colours,
            bounds,
        }
    }

    pub fn len(&self) -> usize {
        self.positions.len() / 3
    }

    pub fn is_empty(&self) -> bool {
        self.positions.len() < 3
    }

    #[inline]
    pub fn position(&self, index: usize) -> Option<[f64; 3]> {
        let p = self.positions.get(index * 3..index * 3 + 3)?;
        Some([p[0], p[1], p[2]])
    }

    #[inline]
    pub fn original_colour(&self, index: usize) -> Option<Rgba> {
        self.original_colours.as_ref()?.get(index).copied()
    }
}

#[derive(Debug, Clone, Default)]
pub struct AttributeSnapshot {
    /// Monotonically increasing, bumped by every commit.
    pub revision: u64,
    pub points: Arc<PointSet>,
    pub annotations: Arc<AnnotationStore>,
    pub continuous: Arc<ContinuousStore>,
}

impl AttributeSnapshot {
    pub fn point_count(&self) -> usize {
        self.points.len()
    }

    pub fn active_field(&self) -> Option<&Arc<ContinuousField>> {
        self.continuous.active()
    }

    /// Replace the point set, dropping attributes that no longer cover it.
    pub fn replace_points(&mut self, points: PointSet) {
        let count = points.len();
        self.points = Arc::new(points);

        let stale: Vec<String> = self
            .annotations
            .iter()
            .filter(|(_, dim)| dim.len() != count)
            .map(|(name, _)| name.to_string())
            .collect();
        if !stale.is_empty() {
            let annotations = Arc::make_mut(&mut self.annotations);
            for name in &stale {
                log::warn!("Dropping annotation '{}' after point set changed size", name);
                annotations.remove(name);
            }
        }

        let stale: Vec<String> = self
            .continuous
            .names()
            .filter(|name| {
                self.continuous
                    .get(name)
                    .is_some_and(|field| field.len() != count)
            })
            .map(str::to_string)
            .collect();
        if !stale.is_empty() {
            let continuous = Arc::make_mut(&mut self.continuous);
            for name in &stale {
                log::warn!("Dropping continuous field '{}' after point set changed size", name);
                continuous.remove(name);
            }
        }
    }
}

/// Owner of the current snapshot.
#[derive(Debug, Default)]
pub struct AttributeRepository {
    current: RwLock<Arc<AttributeSnapshot>>,
}

impl AttributeRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pin the current snapshot.
    pub fn snapshot(&self) -> Arc<AttributeSnapshot> {
        self.current.read().clone()
    }

    pub fn revision(&self) -> u64 {
        self.current.read().revision
    }

    /// Apply `edit` to a copy of the current snapshot and publish it.
    /// Readers holding the previous snapshot keep seeing it unchanged.
    pub fn commit<F>(&self, edit: F) -> Arc<AttributeSnapshot>
    where
        F: FnOnce(&mut AttributeSnapshot),
    {
        let mut guard = self.current.write();
        let mut draft = AttributeSnapshot::clone(&guard);
        edit(&mut draft);
        draft.revision = guard.revision + 1;
        let published = Arc::new(draft);
        *guard = published.clone();
        published
    }

    /// Discard every store, as on widget unmount.
    pub fn reset(&self) {
        self.commit(|draft| {
            draft.points = Arc::default();
            draft.annotations = Arc::default();
            draft.continuous = Arc::default();
        });
    }
}
