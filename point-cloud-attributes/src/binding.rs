//! Accessors and update triggers for a retained-mode point layer.
//!
//! The renderer caches accessor results per layer and only re-evaluates an
//! accessor when one of its declared trigger values changes. Every input the
//! colour cascade reads therefore appears in [`UpdateTriggers::get_colour`].
use crate::annotation::Rgba;
use crate::colour::{resolve_colour, ColourResolver, ColourState, RenderPath};
use crate::layout::{AlternateLayout, LayoutMode};
use crate::snapshot::AttributeSnapshot;
use constants::render_settings::{DEFAULT_OPACITY, POINT_CLOUD_LAYER_ID, SCATTER_LAYER_ID};
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum TriggerKey {
    ColouringAnnotation,
    SelectedCategories,
    HiddenCategories,
    CustomColours,
    CategoryColours,
    ContinuousField,
    Threshold,
    FallbackPolicy,
    AttributeRevision,
    LayoutMode,
    AlternatePositions,
}

impl TriggerKey {
    pub const COLOUR: [TriggerKey; 9] = [
        TriggerKey::ColouringAnnotation,
        TriggerKey::SelectedCategories,
        TriggerKey::HiddenCategories,
        TriggerKey::CustomColours,
        TriggerKey::CategoryColours,
        TriggerKey::ContinuousField,
        TriggerKey::Threshold,
        TriggerKey::FallbackPolicy,
        TriggerKey::AttributeRevision,
    ];

    pub const POSITION: [TriggerKey; 2] = [TriggerKey::LayoutMode, TriggerKey::AlternatePositions];
}

/// Declared trigger values, one fingerprint per key.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UpdateTriggers {
    pub get_colour: Vec<(TriggerKey, u64)>,
    pub get_position: Vec<(TriggerKey, u64)>,
}

impl UpdateTriggers {
    pub fn colour_changed(&self, previous: &UpdateTriggers) -> bool {
        self.get_colour != previous.get_colour
    }

    pub fn position_changed(&self, previous: &UpdateTriggers) -> bool {
        self.get_position != previous.get_position
    }
}

fn fingerprint<T: Hash + ?Sized>(value: &T) -> u64 {
    let mut hasher = DefaultHasher::new();
    value.hash(&mut hasher);
    hasher.finish()
}

/// Fingerprint of the input behind `key`.
fn trigger_value(
    key: TriggerKey,
    snapshot: &AttributeSnapshot,
    state: &ColourState,
    layout: LayoutMode,
    alternate: Option<&AlternateLayout>,
) -> u64 {
    match key {
        TriggerKey::ColouringAnnotation => fingerprint(&state.colouring_annotation),
        TriggerKey::SelectedCategories => fingerprint(&state.selected_categories),
        TriggerKey::HiddenCategories => fingerprint(&state.hidden_category_ids),
        TriggerKey::CustomColours => fingerprint(&state.custom_colours),
        TriggerKey::CategoryColours => fingerprint(&state.category_colours),
        TriggerKey::ContinuousField => fingerprint(&snapshot.continuous.active_name()),
        TriggerKey::Threshold => state.threshold.to_bits(),
        TriggerKey::FallbackPolicy => fingerprint(&state.fallback),
        TriggerKey::AttributeRevision => snapshot.revision,
        TriggerKey::LayoutMode => fingerprint(&layout),
        TriggerKey::AlternatePositions => alternate.map_or(0, |a| a.generation),
    }
}

/// Props handed to the renderer when the layer is (re)declared.
#[derive(Debug, Clone, PartialEq)]
pub struct LayerProps {
    pub id: &'static str,
    pub point_count: usize,
    pub opacity: f32,
    pub point_size: f32,
    pub pickable: bool,
    pub update_triggers: UpdateTriggers,
}

/// One frame's view of a point layer: a pinned snapshot, the colouring state
/// and the layout in effect.
#[derive(Debug, Clone)]
pub struct LayerBinding {
    snapshot: Arc<AttributeSnapshot>,
    state: Arc<ColourState>,
    path: RenderPath,
    layout: LayoutMode,
    alternate: Option<Arc<AlternateLayout>>,
    /// Points drawn by a 2D section layer, all points when `None`.
    members: Option<Arc<Vec<u32>>>,
    opacity: f32,
    point_size: f32,
}

impl LayerBinding {
    /// The 3D point cloud layer.
    pub fn point_cloud(snapshot: Arc<AttributeSnapshot>, state: Arc<ColourState>) -> Self {
        Self {
            snapshot,
            state,
            path: RenderPath::PointCloud,
            layout: LayoutMode::ThreeD,
            alternate: None,
            members: None,
            opacity: DEFAULT_OPACITY,
            point_size: LayoutMode::ThreeD.point_size(),
        }
    }

    /// The 2D scatter layer of one section. Positions are flattened to `z = 0`.
    pub fn section_scatter(
        snapshot: Arc<AttributeSnapshot>,
        state: Arc<ColourState>,
        members: Arc<Vec<u32>>,
    ) -> Self {
        Self {
            path: RenderPath::Scatter,
            members: Some(members),
            ..Self::point_cloud(snapshot, state)
        }
    }

    /// Use `alternate` for positions while `mode` is a flat layout.
    pub fn with_layout(mut self, mode: LayoutMode, alternate: Option<Arc<AlternateLayout>>) -> Self {
        self.layout = mode;
        self.alternate = alternate;
        self.point_size = mode.point_size();
        self
    }

    pub fn with_appearance(mut self, opacity: f32, point_size: f32) -> Self {
        self.opacity = opacity;
        self.point_size = point_size;
        self
    }

    pub fn snapshot(&self) -> &Arc<AttributeSnapshot> {
        &self.snapshot
    }

    pub fn render_path(&self) -> RenderPath {
        self.path
    }

    /// Indices of the points this layer draws, in draw order.
    pub fn data_indices(&self) -> Vec<u32> {
        match &self.members {
            Some(members) => members.as_ref().clone(),
            None => (0..self.snapshot.point_count() as u32).collect(),
        }
    }

    pub fn point_count(&self) -> usize {
        self.members
            .as_ref()
            .map_or(self.snapshot.point_count(), |members| members.len())
    }

    #[inline]
    pub fn get_colour(&self, index: usize) -> Rgba {
        resolve_colour(index, &self.snapshot, &self.state, self.path)
    }

    /// Raw position in 3D, the alternate buffer in flat layouts.
    #[inline]
    pub fn get_position(&self, index: usize) -> [f64; 3] {
        if self.layout.is_flat() {
            if let Some(p) = self.alternate.as_ref().and_then(|a| a.position(index)) {
                return [p[0] as f64, p[1] as f64, p[2] as f64];
            }
        }
        let [x, y, z] = self.snapshot.points.position(index).unwrap_or_default();
        match self.path {
            RenderPath::PointCloud => [x, y, z],
            RenderPath::Scatter => [x, y, 0.0],
        }
    }

    pub fn update_triggers(&self) -> UpdateTriggers {
        let alternate = self.alternate.as_deref();
        let value = |key| trigger_value(key, &self.snapshot, &self.state, self.layout, alternate);
        UpdateTriggers {
            get_colour: TriggerKey::COLOUR.iter().map(|&key| (key, value(key))).collect(),
            get_position: TriggerKey::POSITION.iter().map(|&key| (key, value(key))).collect(),
        }
    }

    pub fn layer_props(&self) -> LayerProps {
        LayerProps {
            id: match self.path {
                RenderPath::PointCloud => POINT_CLOUD_LAYER_ID,
                RenderPath::Scatter => SCATTER_LAYER_ID,
            },
            point_count: self.point_count(),
            opacity: self.opacity,
            point_size: self.point_size,
            pickable: self.path == RenderPath::Scatter,
            update_triggers: self.update_triggers(),
        }
    }

    pub fn resolver(&self) -> ColourResolver<'_> {
        ColourResolver::new(&self.snapshot, &self.state, self.path)
    }

    /// Colours of every drawn point, in draw order.
    pub fn colour_buffer(&self) -> Vec<Rgba> {
        let resolver = self.resolver();
        match &self.members {
            Some(members) => resolver.resolve_indices(members),
            None => {
                let mut colours = vec![[0u8; 4]; self.snapshot.point_count()];
                resolver.fill(&mut colours);
                colours
            }
        }
    }

    /// Colour buffer as tightly packed bytes for GPU upload.
    pub fn colour_bytes(&self) -> Vec<u8> {
        bytemuck::cast_slice(&self.colour_buffer()).to_vec()
    }

    /// Positions of every drawn point, in draw order.
    pub fn position_buffer(&self) -> Vec<[f32; 3]> {
        let position = |idx: usize| {
            let [x, y, z] = self.get_position(idx);
            [x as f32, y as f32, z as f32]
        };
        match &self.members {
            Some(members) => members.iter().map(|&idx| position(idx as usize)).collect(),
            None => (0..self.snapshot.point_count()).map(position).collect(),
        }
    }
}

/// Which accessors a redraw has to re-evaluate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Invalidation {
    pub colours: bool,
    pub positions: bool,
}

/// The renderer's memory of the triggers it last evaluated with.
#[derive(Debug, Default)]
pub struct TriggerCache {
    last: Option<UpdateTriggers>,
}

impl TriggerCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Compare against the previous frame and remember `triggers`.
    pub fn observe(&mut self, triggers: UpdateTriggers) -> Invalidation {
        let invalidation = match &self.last {
            None => Invalidation {
                colours: true,
                positions: true,
            },
            Some(previous) => Invalidation {
                colours: triggers.colour_changed(previous),
                positions: triggers.position_changed(previous),
            },
        };
        self.last = Some(triggers);
        invalidation
    }

    pub fn clear(&mut self) {
        self.last = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::annotation::{AnnotationDimension, CategoryCodes};
    use crate::colour::FallbackPolicy;
    use crate::continuous::{ContinuousField, SourceKind};
    use crate::layout::LayoutController;
    use crate::snapshot::{AttributeRepository, PointSet};
    use std::collections::BTreeMap;

    fn repository() -> AttributeRepository {
        let repo = AttributeRepository::new();
        repo.commit(|draft| {
            let positions = (0..12).map(|v| v as f64).collect();
            draft.replace_points(PointSet::new(positions, None));
            Arc::make_mut(&mut draft.annotations).insert(AnnotationDimension::new(
                "region",
                vec![],
                CategoryCodes::U8(vec![0, 1, 0, 1]),
            ));
            Arc::make_mut(&mut draft.continuous)
                .insert_checked(
                    ContinuousField::from_values("v", vec![1.0, 2.0, 3.0, 4.0], SourceKind::Obs),
                    4,
                )
                .unwrap();
        });
        repo
    }

    fn triggers(repo: &AttributeRepository, state: &ColourState) -> UpdateTriggers {
        LayerBinding::point_cloud(repo.snapshot(), Arc::new(state.clone())).update_triggers()
    }

    #[test]
    fn every_state_mutation_changes_a_colour_trigger() {
        type Mutation = Box<dyn Fn(&AttributeRepository, &mut ColourState)>;
        fn mutation(f: impl Fn(&AttributeRepository, &mut ColourState) + 'static) -> Mutation {
            Box::new(f)
        }
        let mutations: Vec<(&str, Mutation)> = vec![
            (
                "colour by",
                mutation(|repo, state| {
                    state.set_annotation_for_colouring("region", &repo.snapshot());
                }),
            ),
            ("select", mutation(|_, state| state.select_category("region", Some(1)))),
            ("clear selection", mutation(|_, state| state.clear_selection())),
            ("hide", mutation(|_, state| state.hide_category("region", 0))),
            ("show", mutation(|_, state| state.show_category("region", 0))),
            ("toggle", mutation(|_, state| {
                state.toggle_hidden("region", 1);
            })),
            ("custom", mutation(|_, state| state.set_custom_colour("region", 0, "#ff0000"))),
            ("clear custom", mutation(|_, state| state.clear_custom_colour("region", 0))),
            (
                "category colours",
                mutation(|_, state| state.set_category_colours("region", BTreeMap::from([(0, [1, 2, 3])]))),
            ),
            (
                "adopt colours",
                mutation(|repo, state| {
                    state.category_colours.clear();
                    state.adopt_category_colours(&repo.snapshot());
                    state.set_category_colours("region", BTreeMap::from([(1, [9, 9, 9])]));
                }),
            ),
            ("threshold", mutation(|_, state| state.set_threshold(2.5))),
            ("fallback", mutation(|_, state| state.set_fallback(FallbackPolicy::OriginalColour))),
            (
                "activate field",
                mutation(|repo, _| {
                    repo.commit(|draft| {
                        Arc::make_mut(&mut draft.continuous).activate("v");
                    });
                }),
            ),
            (
                "deactivate field",
                mutation(|repo, _| {
                    repo.commit(|draft| Arc::make_mut(&mut draft.continuous).deactivate());
                }),
            ),
            (
                "new annotation",
                mutation(|repo, _| {
                    repo.commit(|draft| {
                        Arc::make_mut(&mut draft.annotations).insert(AnnotationDimension::new(
                            "section",
                            vec![],
                            CategoryCodes::U8(vec![0, 0, 1, 1]),
                        ));
                    });
                }),
            ),
        ];

        let repo = repository();
        let mut state = ColourState::new();
        for (name, mutate) in mutations {
            let before = triggers(&repo, &state);
            mutate(&repo, &mut state);
            let after = triggers(&repo, &state);
            assert!(after.colour_changed(&before), "'{}' left colour triggers unchanged", name);
        }
    }

    #[test]
    fn unchanged_state_keeps_triggers() {
        let repo = repository();
        let state = ColourState::new();
        assert_eq!(triggers(&repo, &state), triggers(&repo, &state));
    }

    #[test]
    fn trigger_cache_reports_only_what_changed() {
        let repo = repository();
        let state = Arc::new(ColourState::new());
        let mut cache = TriggerCache::new();
        let binding = LayerBinding::point_cloud(repo.snapshot(), state.clone());

        let first = cache.observe(binding.update_triggers());
        assert!(first.colours && first.positions);
        let again = cache.observe(binding.update_triggers());
        assert!(!again.colours && !again.positions);

        let mut layout = LayoutController::new();
        let mut colouring = ColourState::new();
        colouring.set_annotation_for_colouring("region", &repo.snapshot());
        layout.toggle(&repo.snapshot(), colouring.colouring_annotation.as_deref());
        let flat = LayerBinding::point_cloud(repo.snapshot(), state)
            .with_layout(layout.mode(), layout.alternate().cloned());
        let changed = cache.observe(flat.update_triggers());
        assert!(changed.positions);
        assert!(!changed.colours);
    }

    #[test]
    fn positions_follow_layout_mode() {
        let repo = repository();
        let state = Arc::new(ColourState::new());
        let alternate = Arc::new(AlternateLayout {
            mode: LayoutMode::Treemap,
            positions: vec![9.0; 12],
            generation: 1,
        });

        let raw = LayerBinding::point_cloud(repo.snapshot(), state.clone());
        assert_eq!(raw.get_position(1), [3.0, 4.0, 5.0]);

        let flat = raw.clone().with_layout(LayoutMode::Treemap, Some(alternate.clone()));
        assert_eq!(flat.get_position(1), [9.0, 9.0, 9.0]);

        let back = flat.with_layout(LayoutMode::ThreeD, Some(alternate));
        assert_eq!(back.get_position(1), [3.0, 4.0, 5.0]);
    }

    #[test]
    fn scatter_layer_draws_section_members_flat() {
        let repo = repository();
        let binding = LayerBinding::section_scatter(
            repo.snapshot(),
            Arc::new(ColourState::new()),
            Arc::new(vec![1, 3]),
        );
        let props = binding.layer_props();
        assert_eq!(props.id, SCATTER_LAYER_ID);
        assert_eq!(props.point_count, 2);
        assert!(props.pickable);
        assert_eq!(binding.position_buffer(), vec![[3.0, 4.0, 0.0], [9.0, 10.0, 0.0]]);
        assert_eq!(binding.colour_buffer().len(), 2);
    }

    #[test]
    fn colour_bytes_are_packed_rgba() {
        let repo = repository();
        let binding = LayerBinding::point_cloud(repo.snapshot(), Arc::new(ColourState::new()));
        let bytes = binding.colour_bytes();
        assert_eq!(bytes.len(), 16);
        assert_eq!(&bytes[..4], &[200, 200, 200, 255]);
        assert_eq!(binding.layer_props().id, POINT_CLOUD_LAYER_ID);
    }
}
