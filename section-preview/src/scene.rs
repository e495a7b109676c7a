/// Per-section thumbnail scenes.
use crate::error::{PreviewError, PreviewResult};
use constants::colour::PREVIEW_FALLBACK_RGBA;
use constants::preview::{BOUNDS_PADDING, PREVIEW_ZOOM_OFFSET};
use point_cloud_attributes::annotation::AnnotationDimension;
use point_cloud_attributes::bounds::PointCloudBounds;
use point_cloud_attributes::camera::{frame_orthographic, ViewFraming};
use point_cloud_attributes::section::section_points;
use point_cloud_attributes::{AttributeSnapshot, CategoryCode, ColourState, Rgb, Rgba};
use std::collections::BTreeMap;
use std::sync::Arc;

/// Thumbnail colours: the default annotation's category colours.
#[derive(Debug, Clone, Default)]
pub struct PreviewPalette {
    dimension: Option<Arc<AnnotationDimension>>,
    colours: BTreeMap<CategoryCode, Rgb>,
}

impl PreviewPalette {
    /// Colours declared for, or inferred from, the default annotation.
    pub fn from_snapshot(snapshot: &AttributeSnapshot) -> Self {
        let dimension = snapshot
            .annotations
            .default_dimension()
            .and_then(|name| snapshot.annotations.get(name))
            .cloned();
        let colours = dimension
            .as_ref()
            .map(|dim| dim.infer_colours(snapshot.points.original_colours.as_deref()))
            .unwrap_or_default();
        Self { dimension, colours }
    }

    /// Like [`from_snapshot`](Self::from_snapshot), preferring the session's
    /// category colours when it has some for the default annotation.
    pub fn from_state(snapshot: &AttributeSnapshot, state: &ColourState) -> Self {
        let mut palette = Self::from_snapshot(snapshot);
        if let Some(session) = palette
            .dimension
            .as_ref()
            .and_then(|dim| state.category_colours.get(&dim.name))
        {
            palette.colours = session.clone();
        }
        palette
    }

    #[inline]
    pub fn colour_of(&self, index: usize) -> Rgba {
        self.dimension
            .as_ref()
            .and_then(|dim| dim.code_at(index))
            .and_then(|code| self.colours.get(&code))
            .map_or(PREVIEW_FALLBACK_RGBA, |[r, g, b]| [*r, *g, *b, 255])
    }
}

/// Everything a render target needs to draw one section thumbnail.
#[derive(Debug, Clone)]
pub struct PreviewScene {
    pub section: CategoryCode,
    pub size: u32,
    pub framing: ViewFraming,
    /// XY of each member point, in world units.
    pub points: Vec<[f64; 2]>,
    pub colours: Vec<Rgba>,
}

impl PreviewScene {
    /// World XY to pixel coordinates, origin top-left.
    #[inline]
    pub fn project(&self, point: [f64; 2]) -> [f64; 2] {
        let scale = self.framing.zoom.exp2();
        let half = self.size as f64 * 0.5;
        [
            (point[0] - self.framing.target[0]) * scale + half,
            half - (point[1] - self.framing.target[1]) * scale,
        ]
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }
}

/// Collect the points of `section` and frame them top-down in a `size` square.
pub fn build_scene(
    snapshot: &AttributeSnapshot,
    palette: &PreviewPalette,
    slice_key: &str,
    section: CategoryCode,
    size: u32,
) -> PreviewResult<PreviewScene> {
    let members = section_points(snapshot, slice_key, section);
    if members.is_empty() {
        return Err(PreviewError::NoPoints(section));
    }

    let positions = &snapshot.points.positions;
    let bounds = PointCloudBounds::from_indices(positions, &members);
    let framing = frame_orthographic(&bounds, size as f64, BOUNDS_PADDING, PREVIEW_ZOOM_OFFSET);

    let mut points = Vec::with_capacity(members.len());
    let mut colours = Vec::with_capacity(members.len());
    for idx in members {
        let idx = idx as usize;
        if let Some([x, y, _]) = snapshot.points.position(idx) {
            points.push([x, y]);
            colours.push(palette.colour_of(idx));
        }
    }

    log::debug!(
        "Section {} scene: {} points, zoom {:.3}",
        section,
        points.len(),
        framing.zoom
    );
    Ok(PreviewScene {
        section,
        size,
        framing,
        points,
        colours,
    })
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use point_cloud_attributes::annotation::{AnnotationItem, CategoryCodes};
    use point_cloud_attributes::{AttributeRepository, PointSet};

    /// Two sections of three points each, plus an uncoloured region code.
    pub(crate) fn sectioned_snapshot() -> Arc<AttributeSnapshot> {
        let repo = AttributeRepository::new();
        repo.commit(|draft| {
            draft.replace_points(PointSet::new(
                vec![
                    0.0, 0.0, 0.0, //
                    100.0, 0.0, 0.0, //
                    50.0, 50.0, 0.0, //
                    500.0, 500.0, 10.0, //
                    510.0, 500.0, 10.0, //
                    505.0, 520.0, 10.0,
                ],
                None,
            ));
            let annotations = Arc::make_mut(&mut draft.annotations);
            annotations.insert(AnnotationDimension::new(
                "section",
                vec![],
                CategoryCodes::U8(vec![1, 1, 1, 2, 2, 2]),
            ));
            annotations.insert(AnnotationDimension::new(
                "region",
                vec![AnnotationItem {
                    code: 0,
                    name: "cortex".into(),
                    colour: Some([10, 200, 30]),
                }],
                CategoryCodes::U8(vec![0, 0, 3, 0, 0, 0]),
            ));
            annotations.set_default_dimension(Some("region".into()));
        });
        repo.snapshot()
    }

    #[test]
    fn palette_uses_default_annotation_colours() {
        let snapshot = sectioned_snapshot();
        let palette = PreviewPalette::from_snapshot(&snapshot);
        assert_eq!(palette.colour_of(0), [10, 200, 30, 255]);
        assert_eq!(palette.colour_of(2), PREVIEW_FALLBACK_RGBA);

        let mut state = ColourState::new();
        state.set_category_colours("region", BTreeMap::from([(0, [1, 2, 3])]));
        assert_eq!(PreviewPalette::from_state(&snapshot, &state).colour_of(0), [1, 2, 3, 255]);
    }

    #[test]
    fn palette_without_default_annotation_is_grey() {
        let palette = PreviewPalette::default();
        assert_eq!(palette.colour_of(0), [180, 180, 180, 255]);
    }

    #[test]
    fn scene_frames_section_with_padding() {
        let snapshot = sectioned_snapshot();
        let scene = build_scene(&snapshot, &PreviewPalette::default(), "section", 1, 150).unwrap();
        assert_eq!(scene.len(), 3);
        assert_eq!(scene.framing.target, [50.0, 25.0, 0.0]);
        assert_relative_eq!(scene.framing.zoom, (150.0f64 / 102.0).log2() - 0.5, epsilon = 1e-12);

        // Every point lands inside the thumbnail.
        for &point in &scene.points {
            let [px, py] = scene.project(point);
            assert!((0.0..150.0).contains(&px) && (0.0..150.0).contains(&py));
        }
    }

    #[test]
    fn empty_section_is_an_error() {
        let snapshot = sectioned_snapshot();
        assert!(matches!(
            build_scene(&snapshot, &PreviewPalette::default(), "section", 7, 150),
            Err(PreviewError::NoPoints(7))
        ));
    }
}
