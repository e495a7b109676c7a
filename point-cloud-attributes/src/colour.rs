//! Per-point colour and visibility resolution.
//!
//! Every point goes through the same cascade, first match wins:
//!
//! 1. isolation: a selected category in any dimension suppresses every point
//!    outside it;
//! 2. hide: a hidden category in any dimension removes its points;
//! 3. continuous: with an active field, values below the threshold are
//!    suppressed and the rest follow a blue to red ramp;
//! 4. categorical: custom colour, then category colour, then the fallback.
//!
//! [`resolve_colour`] is the reference implementation and performs only map
//! lookups. [`ColourResolver`] binds the same state once and is what bulk
//! evaluation uses.
use crate::annotation::{AnnotationDimension, CategoryCode, Rgb, Rgba};
use crate::continuous::ContinuousField;
use crate::snapshot::AttributeSnapshot;
use constants::colour::{
    FALLBACK_RGB, HIDDEN_POINT_CLOUD_RGBA, HIDDEN_SCATTER_RGBA, RAMP_GREEN, RAMP_MAX_ALPHA,
    SUPPRESSED_RGBA,
};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap};

/// Points per parallel work item when filling colour buffers.
const FILL_CHUNK: usize = 16_384;

/// Which renderer consumes the colours. The two differ only for hidden points.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RenderPath {
    /// 3D point cloud layer: hidden points keep a ghost alpha.
    #[default]
    PointCloud,
    /// 2D section scatter layer: hidden points are fully transparent.
    Scatter,
}

impl RenderPath {
    #[inline]
    pub fn hidden_colour(self) -> Rgba {
        match self {
            RenderPath::PointCloud => HIDDEN_POINT_CLOUD_RGBA,
            RenderPath::Scatter => HIDDEN_SCATTER_RGBA,
        }
    }
}

/// Colour used when categorical colouring has nothing to offer.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FallbackPolicy {
    /// Always `[200, 200, 200, 255]`.
    #[default]
    NeutralGrey,
    /// The colour the point was delivered with, grey when there is none.
    OriginalColour,
}

/// Decode `#rrggbb`, `rrggbb` or `#rgb`. Anything else is `None`.
pub fn hex_to_rgb(hex: &str) -> Option<Rgb> {
    let digits = hex.trim().trim_start_matches('#');
    match digits.len() {
        6 => {
            let value = u32::from_str_radix(digits, 16).ok()?;
            Some([(value >> 16) as u8, (value >> 8) as u8, value as u8])
        }
        3 => {
            let value = u16::from_str_radix(digits, 16).ok()?;
            let expand = |nibble: u16| (nibble as u8 & 0xf) * 0x11;
            Some([expand(value >> 8), expand(value >> 4), expand(value)])
        }
        _ => None,
    }
}

pub fn rgb_to_hex(rgb: Rgb) -> String {
    format!("#{:02x}{:02x}{:02x}", rgb[0], rgb[1], rgb[2])
}

/// Blue to red ramp over `t` in `[0, 1]`, alpha growing with the value.
#[inline]
pub fn continuous_ramp(t: f64) -> Rgba {
    let t = t.clamp(0.0, 1.0);
    [
        (255.0 * t).floor() as u8,
        RAMP_GREEN,
        (255.0 * (1.0 - t)).floor() as u8,
        (RAMP_MAX_ALPHA * t).floor() as u8,
    ]
}

/// Mutable colouring state of one widget session.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ColourState {
    /// Dimension driving categorical colour.
    pub colouring_annotation: Option<String>,
    /// Isolation filter, one optional code per dimension.
    pub selected_categories: BTreeMap<String, Option<CategoryCode>>,
    pub hidden_category_ids: BTreeMap<String, BTreeSet<CategoryCode>>,
    /// User overrides as hex strings.
    pub custom_colours: BTreeMap<String, BTreeMap<CategoryCode, String>>,
    /// Defaults from configuration or inferred from the source colours.
    pub category_colours: BTreeMap<String, BTreeMap<CategoryCode, Rgb>>,
    /// Continuous values below this are suppressed.
    pub threshold: f64,
    pub fallback: FallbackPolicy,
}

impl ColourState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Colour by `dimension` if it is loaded, clearing its isolation filter.
    pub fn set_annotation_for_colouring(
        &mut self,
        dimension: &str,
        snapshot: &AttributeSnapshot,
    ) -> bool {
        if !snapshot.annotations.contains(dimension) {
            log::warn!("Cannot colour by '{}': annotation not loaded", dimension);
            return false;
        }
        self.colouring_annotation = Some(dimension.to_string());
        self.selected_categories.insert(dimension.to_string(), None);
        true
    }

    /// Isolate `code` in `dimension`, or lift the isolation with `None`.
    pub fn select_category(&mut self, dimension: &str, code: Option<CategoryCode>) {
        self.selected_categories.insert(dimension.to_string(), code);
    }

    pub fn clear_selection(&mut self) {
        for selected in self.selected_categories.values_mut() {
            *selected = None;
        }
    }

    pub fn hide_category(&mut self, dimension: &str, code: CategoryCode) {
        self.hidden_category_ids
            .entry(dimension.to_string())
            .or_default()
            .insert(code);
    }

    pub fn show_category(&mut self, dimension: &str, code: CategoryCode) {
        if let Some(hidden) = self.hidden_category_ids.get_mut(dimension) {
            hidden.remove(&code);
        }
    }

    /// Flip visibility of `code`, returning whether it is now hidden.
    pub fn toggle_hidden(&mut self, dimension: &str, code: CategoryCode) -> bool {
        let hidden = self
            .hidden_category_ids
            .entry(dimension.to_string())
            .or_default();
        if hidden.remove(&code) {
            false
        } else {
            hidden.insert(code);
            true
        }
    }

    pub fn set_custom_colour(&mut self, dimension: &str, code: CategoryCode, hex: impl Into<String>) {
        self.custom_colours
            .entry(dimension.to_string())
            .or_default()
            .insert(code, hex.into());
    }

    pub fn clear_custom_colour(&mut self, dimension: &str, code: CategoryCode) {
        if let Some(colours) = self.custom_colours.get_mut(dimension) {
            colours.remove(&code);
        }
    }

    pub fn set_category_colours(&mut self, dimension: &str, colours: BTreeMap<CategoryCode, Rgb>) {
        self.category_colours.insert(dimension.to_string(), colours);
    }

    pub fn set_threshold(&mut self, threshold: f64) {
        self.threshold = threshold;
    }

    pub fn set_fallback(&mut self, fallback: FallbackPolicy) {
        self.fallback = fallback;
    }

    /// Fill in category colours for every loaded dimension that has none yet,
    /// from configuration first and the original point colours second.
    /// Returns the number of dimensions that received colours.
    pub fn adopt_category_colours(&mut self, snapshot: &AttributeSnapshot) -> usize {
        let original = snapshot.points.original_colours.as_deref();
        let mut adopted = 0;
        for (name, dimension) in snapshot.annotations.iter() {
            if self.category_colours.contains_key(name) {
                continue;
            }
            let colours = dimension.infer_colours(original);
            if !colours.is_empty() {
                self.category_colours.insert(name.to_string(), colours);
                adopted += 1;
            }
        }
        adopted
    }
}

/// Resolve the colour of point `index`.
pub fn resolve_colour(
    index: usize,
    snapshot: &AttributeSnapshot,
    state: &ColourState,
    path: RenderPath,
) -> Rgba {
    let annotations = &snapshot.annotations;

    for (dimension, selected) in &state.selected_categories {
        if let Some(code) = selected {
            if annotations.code_at(dimension, index) != Some(*code) {
                return SUPPRESSED_RGBA;
            }
        }
    }

    for (dimension, hidden) in &state.hidden_category_ids {
        if hidden.is_empty() {
            continue;
        }
        if let Some(code) = annotations.code_at(dimension, index) {
            if hidden.contains(&code) {
                return path.hidden_colour();
            }
        }
    }

    if let Some(field) = snapshot.active_field() {
        return continuous_colour(field, index, state.threshold);
    }

    let fallback = || fallback_colour(snapshot, index, state.fallback);
    let Some(name) = state.colouring_annotation.as_deref() else {
        return fallback();
    };
    let Some(code) = annotations.code_at(name, index) else {
        return fallback();
    };

    let custom = state
        .custom_colours
        .get(name)
        .and_then(|colours| colours.get(&code))
        .and_then(|hex| hex_to_rgb(hex));
    if let Some([r, g, b]) = custom {
        return [r, g, b, 255];
    }

    if let Some([r, g, b]) = state
        .category_colours
        .get(name)
        .and_then(|colours| colours.get(&code))
    {
        return [*r, *g, *b, 255];
    }

    fallback()
}

#[inline]
fn continuous_colour(field: &ContinuousField, index: usize, threshold: f64) -> Rgba {
    let Some(value) = field.value_at(index) else {
        return SUPPRESSED_RGBA;
    };
    let value = value as f64;
    if !value.is_finite() || value < threshold {
        return SUPPRESSED_RGBA;
    }
    continuous_ramp(field.normalised(value))
}

#[inline]
fn fallback_colour(snapshot: &AttributeSnapshot, index: usize, policy: FallbackPolicy) -> Rgba {
    let [r, g, b] = match policy {
        FallbackPolicy::NeutralGrey => FALLBACK_RGB,
        FallbackPolicy::OriginalColour => snapshot
            .points
            .original_colour(index)
            .map(|c| [c[0], c[1], c[2]])
            .unwrap_or(FALLBACK_RGB),
    };
    [r, g, b, 255]
}

/// Colour state bound to one snapshot for repeated evaluation.
pub struct ColourResolver<'a> {
    /// `None` when an isolated dimension is not loaded, which suppresses all.
    isolation: Option<Vec<(&'a AnnotationDimension, CategoryCode)>>,
    hidden: Vec<(&'a AnnotationDimension, &'a BTreeSet<CategoryCode>)>,
    continuous: Option<(&'a ContinuousField, f64)>,
    categories: Option<&'a AnnotationDimension>,
    /// Category colours with valid custom colours layered on top.
    palette: HashMap<CategoryCode, Rgb>,
    original: Option<&'a [Rgba]>,
    fallback: FallbackPolicy,
    path: RenderPath,
}

impl<'a> ColourResolver<'a> {
    pub fn new(snapshot: &'a AttributeSnapshot, state: &'a ColourState, path: RenderPath) -> Self {
        let annotations = &snapshot.annotations;

        let mut isolation = Some(Vec::new());
        for (name, selected) in &state.selected_categories {
            let Some(code) = selected else { continue };
            match (annotations.get(name), isolation.as_mut()) {
                (Some(dimension), Some(filters)) => filters.push((dimension.as_ref(), *code)),
                (None, _) => isolation = None,
                _ => {}
            }
        }

        let hidden = state
            .hidden_category_ids
            .iter()
            .filter(|(_, codes)| !codes.is_empty())
            .filter_map(|(name, codes)| Some((annotations.get(name)?.as_ref(), codes)))
            .collect();

        let continuous = snapshot
            .active_field()
            .map(|field| (field.as_ref(), state.threshold));

        let categories = state
            .colouring_annotation
            .as_deref()
            .and_then(|name| annotations.get(name))
            .map(|dimension| dimension.as_ref());

        let mut palette = HashMap::new();
        if let Some(name) = state.colouring_annotation.as_deref() {
            if let Some(colours) = state.category_colours.get(name) {
                palette.extend(colours.iter().map(|(&code, &rgb)| (code, rgb)));
            }
            if let Some(colours) = state.custom_colours.get(name) {
                palette.extend(
                    colours
                        .iter()
                        .filter_map(|(&code, hex)| Some((code, hex_to_rgb(hex)?))),
                );
            }
        }

        Self {
            isolation,
            hidden,
            continuous,
            categories,
            palette,
            original: snapshot.points.original_colours.as_deref(),
            fallback: state.fallback,
            path,
        }
    }

    #[inline]
    pub fn resolve(&self, index: usize) -> Rgba {
        let Some(isolation) = &self.isolation else {
            return SUPPRESSED_RGBA;
        };
        for (dimension, code) in isolation {
            if dimension.code_at(index) != Some(*code) {
                return SUPPRESSED_RGBA;
            }
        }

        for (dimension, codes) in &self.hidden {
            if let Some(code) = dimension.code_at(index) {
                if codes.contains(&code) {
                    return self.path.hidden_colour();
                }
            }
        }

        if let Some((field, threshold)) = self.continuous {
            return continuous_colour(field, index, threshold);
        }

        let colour = self
            .categories
            .and_then(|dimension| dimension.code_at(index))
            .and_then(|code| self.palette.get(&code));
        if let Some([r, g, b]) = colour {
            return [*r, *g, *b, 255];
        }

        let [r, g, b] = match self.fallback {
            FallbackPolicy::NeutralGrey => FALLBACK_RGB,
            FallbackPolicy::OriginalColour => self
                .original
                .and_then(|colours| colours.get(index))
                .map(|c| [c[0], c[1], c[2]])
                .unwrap_or(FALLBACK_RGB),
        };
        [r, g, b, 255]
    }

    /// Resolve `out.len()` consecutive points starting at index 0.
    pub fn fill(&self, out: &mut [Rgba]) {
        out.par_chunks_mut(FILL_CHUNK)
            .enumerate()
            .for_each(|(chunk_idx, chunk)| {
                let base = chunk_idx * FILL_CHUNK;
                for (offset, colour) in chunk.iter_mut().enumerate() {
                    *colour = self.resolve(base + offset);
                }
            });
    }

    /// Resolve the listed point indices, in order.
    pub fn resolve_indices(&self, indices: &[u32]) -> Vec<Rgba> {
        indices
            .par_iter()
            .map(|&idx| self.resolve(idx as usize))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::annotation::{AnnotationDimension, AnnotationItem, CategoryCodes};
    use crate::continuous::{ContinuousField, SourceKind};
    use crate::snapshot::{AttributeRepository, PointSet};
    use std::sync::Arc;

    const REGION: [u8; 10] = [0, 0, 1, 1, 0, 1, 0, 1, 0, 1];
    const CELL_TYPE: [u16; 10] = [5, 6, 5, 6, 5, 6, 5, 6, 7, 7];

    fn snapshot_with(values: Option<Vec<f32>>) -> Arc<AttributeSnapshot> {
        let repo = AttributeRepository::new();
        repo.commit(|draft| {
            let colours = (0..10u8).map(|i| [i, i, i, 255]).collect();
            draft.replace_points(PointSet::new(vec![0.0; 30], Some(colours)));

            let annotations = Arc::make_mut(&mut draft.annotations);
            annotations.insert(AnnotationDimension::new(
                "region",
                vec![
                    AnnotationItem {
                        code: 0,
                        name: "A".into(),
                        colour: Some([255, 0, 0]),
                    },
                    AnnotationItem {
                        code: 1,
                        name: "B".into(),
                        colour: Some([0, 255, 0]),
                    },
                ],
                CategoryCodes::U8(REGION.to_vec()),
            ));
            annotations.insert(AnnotationDimension::new(
                "cell-type",
                vec![],
                CategoryCodes::U16(CELL_TYPE.to_vec()),
            ));

            if let Some(values) = values {
                let continuous = Arc::make_mut(&mut draft.continuous);
                continuous
                    .insert_checked(
                        ContinuousField::new("score", values, 0.0, 10.0, SourceKind::Obs),
                        10,
                    )
                    .unwrap();
                continuous.activate("score");
            }
        });
        repo.snapshot()
    }

    fn colouring_region(snapshot: &AttributeSnapshot) -> ColourState {
        let mut state = ColourState::new();
        assert!(state.set_annotation_for_colouring("region", snapshot));
        state.adopt_category_colours(snapshot);
        state
    }

    fn both(snapshot: &AttributeSnapshot, state: &ColourState, path: RenderPath) -> Vec<Rgba> {
        let reference: Vec<Rgba> = (0..10)
            .map(|i| resolve_colour(i, snapshot, state, path))
            .collect();
        let mut bulk = vec![[1, 1, 1, 1]; 10];
        ColourResolver::new(snapshot, state, path).fill(&mut bulk);
        assert_eq!(reference, bulk, "prepared resolver disagrees with reference");
        reference
    }

    #[test]
    fn isolation_scenario_keeps_only_selected_code() {
        let snapshot = snapshot_with(None);
        let mut state = colouring_region(&snapshot);
        state.select_category("region", Some(1));

        let colours = both(&snapshot, &state, RenderPath::PointCloud);
        for (i, colour) in colours.iter().enumerate() {
            if REGION[i] == 1 {
                assert_eq!(*colour, [0, 255, 0, 255]);
            } else {
                assert_eq!(*colour, [0, 0, 0, 5]);
            }
        }
        assert_eq!(colours.iter().filter(|c| c[3] == 255).count(), 5);
    }

    #[test]
    fn isolation_beats_continuous_and_custom_colours() {
        let snapshot = snapshot_with(Some(vec![10.0; 10]));
        let mut state = colouring_region(&snapshot);
        state.set_custom_colour("region", 0, "#0000ff");
        state.select_category("cell-type", Some(5));

        let colours = both(&snapshot, &state, RenderPath::Scatter);
        for (i, colour) in colours.iter().enumerate() {
            if CELL_TYPE[i] != 5 {
                assert_eq!(*colour, SUPPRESSED_RGBA);
            }
        }
    }

    #[test]
    fn isolating_an_unloaded_dimension_suppresses_everything() {
        let snapshot = snapshot_with(None);
        let mut state = colouring_region(&snapshot);
        state.select_category("donor", Some(0));
        assert!(both(&snapshot, &state, RenderPath::PointCloud)
            .iter()
            .all(|c| *c == SUPPRESSED_RGBA));
    }

    #[test]
    fn hidden_alpha_depends_on_render_path() {
        let snapshot = snapshot_with(Some(vec![9.0; 10]));
        let mut state = colouring_region(&snapshot);
        state.hide_category("cell-type", 7);

        let cloud = both(&snapshot, &state, RenderPath::PointCloud);
        let scatter = both(&snapshot, &state, RenderPath::Scatter);
        assert_eq!(cloud[8], [0, 0, 0, 5]);
        assert_eq!(scatter[9], [0, 0, 0, 0]);
        assert_ne!(cloud[0][3], 5);
    }

    #[test]
    fn showing_a_category_again_restores_colour() {
        let snapshot = snapshot_with(None);
        let mut state = colouring_region(&snapshot);
        assert!(state.toggle_hidden("region", 0));
        assert_eq!(both(&snapshot, &state, RenderPath::Scatter)[0], [0, 0, 0, 0]);
        assert!(!state.toggle_hidden("region", 0));
        assert_eq!(both(&snapshot, &state, RenderPath::Scatter)[0], [255, 0, 0, 255]);
    }

    #[test]
    fn threshold_boundary_is_inclusive() {
        let mut values = vec![0.0; 10];
        values[0] = 4.999;
        values[1] = 5.0;
        let snapshot = snapshot_with(Some(values));
        let mut state = colouring_region(&snapshot);
        state.set_threshold(5.0);

        let colours = both(&snapshot, &state, RenderPath::PointCloud);
        assert_eq!(colours[0], [0, 0, 0, 5]);
        assert_eq!(colours[1], [127, 50, 127, 90]);
    }

    #[test]
    fn continuous_ramp_is_monotonic() {
        let values: Vec<f32> = (0..10).map(|i| i as f32 * 1.1).collect();
        let snapshot = snapshot_with(Some(values));
        let state = colouring_region(&snapshot);

        let colours = both(&snapshot, &state, RenderPath::PointCloud);
        for pair in colours.windows(2) {
            assert!(pair[0][0] <= pair[1][0]);
            assert!(pair[0][2] >= pair[1][2]);
            assert_eq!(pair[1][1], 50);
        }
    }

    #[test]
    fn out_of_range_and_non_finite_values_are_safe() {
        let mut values = vec![1.0; 10];
        values[0] = f32::NAN;
        values[1] = f32::INFINITY;
        values[2] = 1000.0;
        let snapshot = snapshot_with(Some(values));
        let state = colouring_region(&snapshot);

        let colours = both(&snapshot, &state, RenderPath::PointCloud);
        assert_eq!(colours[0], SUPPRESSED_RGBA);
        assert_eq!(colours[1], SUPPRESSED_RGBA);
        assert_eq!(colours[2], [255, 50, 0, 180]);
    }

    #[test]
    fn custom_colour_beats_category_colour_beats_fallback() {
        let snapshot = snapshot_with(None);
        let mut state = colouring_region(&snapshot);
        state.set_custom_colour("region", 1, "#102030");

        let colours = both(&snapshot, &state, RenderPath::PointCloud);
        assert_eq!(colours[2], [0x10, 0x20, 0x30, 255]);
        assert_eq!(colours[0], [255, 0, 0, 255]);

        state.category_colours.remove("region");
        state.clear_custom_colour("region", 1);
        assert_eq!(both(&snapshot, &state, RenderPath::PointCloud)[0], [200, 200, 200, 255]);
    }

    #[test]
    fn malformed_custom_colour_falls_through() {
        let snapshot = snapshot_with(None);
        let mut state = colouring_region(&snapshot);
        state.set_custom_colour("region", 0, "not-a-colour");
        assert_eq!(both(&snapshot, &state, RenderPath::PointCloud)[0], [255, 0, 0, 255]);
    }

    #[test]
    fn unknown_codes_use_the_fallback_policy() {
        let snapshot = snapshot_with(None);
        let mut state = ColourState::new();
        state.set_annotation_for_colouring("cell-type", &snapshot);

        assert_eq!(both(&snapshot, &state, RenderPath::PointCloud)[3], [200, 200, 200, 255]);

        state.set_fallback(FallbackPolicy::OriginalColour);
        assert_eq!(both(&snapshot, &state, RenderPath::PointCloud)[3], [3, 3, 3, 255]);
    }

    #[test]
    fn no_colouring_dimension_is_grey() {
        let snapshot = snapshot_with(None);
        let state = ColourState::new();
        assert!(both(&snapshot, &state, RenderPath::PointCloud)
            .iter()
            .all(|c| *c == [200, 200, 200, 255]));
    }

    #[test]
    fn resolution_is_idempotent() {
        let snapshot = snapshot_with(Some(vec![7.5; 10]));
        let state = colouring_region(&snapshot);
        let first = resolve_colour(4, &snapshot, &state, RenderPath::PointCloud);
        let second = resolve_colour(4, &snapshot, &state, RenderPath::PointCloud);
        assert_eq!(first, second);
    }

    #[test]
    fn colouring_requires_a_loaded_dimension() {
        let snapshot = snapshot_with(None);
        let mut state = ColourState::new();
        state.select_category("region", Some(1));
        assert!(!state.set_annotation_for_colouring("donor", &snapshot));
        assert!(state.set_annotation_for_colouring("region", &snapshot));
        assert_eq!(state.selected_categories.get("region"), Some(&None));
    }

    #[test]
    fn out_of_range_index_never_panics() {
        let snapshot = snapshot_with(Some(vec![1.0; 10]));
        let state = colouring_region(&snapshot);
        assert_eq!(resolve_colour(50, &snapshot, &state, RenderPath::PointCloud), SUPPRESSED_RGBA);
        assert_eq!(
            ColourResolver::new(&snapshot, &state, RenderPath::PointCloud).resolve(50),
            SUPPRESSED_RGBA
        );
    }

    #[test]
    fn parses_hex_colours() {
        assert_eq!(hex_to_rgb("#ff8000"), Some([255, 128, 0]));
        assert_eq!(hex_to_rgb("0a0b0c"), Some([10, 11, 12]));
        assert_eq!(hex_to_rgb("#fa0"), Some([255, 170, 0]));
        assert_eq!(hex_to_rgb("#12345"), None);
        assert_eq!(hex_to_rgb("#gggggg"), None);
        assert_eq!(rgb_to_hex([255, 128, 0]), "#ff8000");
    }
}
