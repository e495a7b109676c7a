use bevy::{prelude::*, render::view::NoFrustumCulling, window::PrimaryWindow};
use constants::preview::{BOUNDS_PADDING, PREVIEW_ZOOM_OFFSET};
use point_cloud_attributes::bounds::PointCloudBounds;
use point_cloud_attributes::camera::{frame_orthographic, frame_point_cloud};
use point_cloud_attributes::{
    AttributeRepository, CategoryCode, ColourState, HostBridge, LayerBinding, LayoutController,
    MemoryModel, PointSet, SectionBrowser, TriggerCache,
};
use std::sync::Arc;

use super::{
    camera::ViewportCamera,
    mesh::{create_point_mesh, vertex_colours, world_positions},
};

#[derive(Component)]
pub struct PointCloud;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ViewMode {
    #[default]
    ThreeD,
    Sections,
}

/// Everything the UI can change, plus the bridge holding the loaded data.
#[derive(Resource)]
pub struct ViewerState {
    pub bridge: HostBridge,
    pub colours: Arc<ColourState>,
    pub layout: LayoutController,
    pub sections: SectionBrowser,
    pub view: ViewMode,
}

impl ViewerState {
    pub fn new(bridge: HostBridge) -> Self {
        let global = bridge.global_config();
        let snapshot = bridge.snapshot();
        let mut colours = ColourState::new();
        colours.set_fallback(global.fallback);
        colours.adopt_category_colours(&snapshot);
        if let Some(default) = snapshot.annotations.default_dimension() {
            colours.set_annotation_for_colouring(default, &snapshot);
        }

        Self {
            bridge,
            colours: Arc::new(colours),
            layout: LayoutController::new(),
            sections: SectionBrowser::new(global.slice_key),
            view: ViewMode::ThreeD,
        }
    }

    pub fn empty() -> Self {
        let mut model = MemoryModel::new();
        let mut bridge = HostBridge::attach(&mut model, Arc::new(AttributeRepository::new()));
        bridge.detach(&mut model);
        Self::new(bridge)
    }

    pub fn colours_mut(&mut self) -> &mut ColourState {
        Arc::make_mut(&mut self.colours)
    }

    /// The layer to draw this frame.
    pub fn binding(&self) -> LayerBinding {
        let snapshot = self.bridge.snapshot();
        match self.view {
            ViewMode::Sections => {
                LayerBinding::section_scatter(snapshot, self.colours.clone(), self.sections.members())
            }
            ViewMode::ThreeD if self.layout.mode().is_flat() => {
                LayerBinding::point_cloud(snapshot, self.colours.clone())
                    .with_layout(self.layout.mode(), self.layout.alternate().cloned())
            }
            ViewMode::ThreeD => {
                let global = self.bridge.global_config();
                LayerBinding::point_cloud(snapshot, self.colours.clone())
                    .with_appearance(global.opacity, global.point_size)
            }
        }
    }

    /// Which layer is on screen. A change means a new layer, not an update.
    fn layer_key(&self) -> (ViewMode, Option<CategoryCode>) {
        match self.view {
            ViewMode::ThreeD => (ViewMode::ThreeD, None),
            ViewMode::Sections => (ViewMode::Sections, self.sections.current()),
        }
    }

    pub fn enter_sections(&mut self) -> usize {
        let snapshot = self.bridge.snapshot();
        let count = self.sections.enter(&snapshot).len();
        if count > 0 {
            self.view = ViewMode::Sections;
        }
        count
    }

    pub fn select_section(&mut self, section: CategoryCode) -> bool {
        let snapshot = self.bridge.snapshot();
        self.sections.select(section, &snapshot)
    }

    /// Step through the discovered sections, wrapping around.
    pub fn cycle_section(&mut self, forward: bool) -> bool {
        let available = self.sections.available();
        let Some(pos) = self
            .sections
            .current()
            .and_then(|id| available.iter().position(|&s| s == id))
        else {
            return false;
        };
        let len = available.len();
        let next = if forward { (pos + 1) % len } else { (pos + len - 1) % len };
        let section = available[next];
        self.select_section(section)
    }

    /// Drop per-dataset UI state after new points arrive.
    pub fn data_reloaded(&mut self) {
        self.layout.reset();
        self.sections.reset();
        self.view = ViewMode::ThreeD;
        let snapshot = self.bridge.snapshot();
        self.colours_mut().adopt_category_colours(&snapshot);
    }
}

/// The renderer's copy of the last evaluated triggers.
#[derive(Resource, Default)]
pub struct LayerTriggers {
    cache: TriggerCache,
    key: Option<(ViewMode, Option<CategoryCode>)>,
    points: Option<Arc<PointSet>>,
}

#[derive(Resource, Default)]
pub struct PointLayer {
    entity: Option<Entity>,
    mesh: Option<Handle<Mesh>>,
    material: Option<Handle<StandardMaterial>>,
}

/// Rebuild or patch the point mesh when the binding's triggers move.
pub fn sync_point_layer(
    mut commands: Commands,
    state: Res<ViewerState>,
    mut triggers: ResMut<LayerTriggers>,
    mut layer: ResMut<PointLayer>,
    mut meshes: ResMut<Assets<Mesh>>,
    mut materials: ResMut<Assets<StandardMaterial>>,
    windows: Query<&Window, With<PrimaryWindow>>,
) {
    let snapshot = state.bridge.snapshot();
    let key = state.layer_key();
    let same_points = triggers
        .points
        .as_ref()
        .is_some_and(|points| Arc::ptr_eq(points, &snapshot.points));
    let new_layer = triggers.key != Some(key) || !same_points;
    if new_layer {
        triggers.cache.clear();
        triggers.key = Some(key);
        triggers.points = Some(snapshot.points.clone());
    }

    let binding = state.binding();
    let props = binding.layer_props();
    let invalidation = triggers.cache.observe(props.update_triggers.clone());
    if !invalidation.colours && !invalidation.positions {
        return;
    }

    if props.point_count == 0 {
        if let Some(entity) = layer.entity.take() {
            commands.entity(entity).despawn();
        }
        layer.mesh = None;
        return;
    }

    if new_layer || layer.mesh.is_none() {
        let mesh = meshes.add(create_point_mesh(&binding.position_buffer(), &binding.colour_buffer()));
        let material = materials.add(StandardMaterial {
            base_color: Color::srgba(1.0, 1.0, 1.0, props.opacity),
            unlit: true,
            alpha_mode: AlphaMode::Blend,
            ..default()
        });
        if let Some(entity) = layer.entity.take() {
            commands.entity(entity).despawn();
        }
        let entity = commands
            .spawn((
                Mesh3d(mesh.clone()),
                MeshMaterial3d(material.clone()),
                Transform::IDENTITY,
                NoFrustumCulling,
                PointCloud,
            ))
            .id();
        layer.entity = Some(entity);
        layer.mesh = Some(mesh);
        layer.material = Some(material);

        let width = windows.single().map(|w| w.width()).unwrap_or(1280.0);
        let bounds = &snapshot.points.bounds;
        let camera = match key.0 {
            ViewMode::ThreeD => ViewportCamera::with_framing(&frame_point_cloud(bounds, width as f64), width, false),
            ViewMode::Sections => {
                let members = binding.data_indices();
                let section_bounds = PointCloudBounds::from_indices(&snapshot.points.positions, &members);
                let framing =
                    frame_orthographic(&section_bounds, width as f64, BOUNDS_PADDING, PREVIEW_ZOOM_OFFSET);
                ViewportCamera::with_framing(&framing, width, true)
            }
        };
        commands.insert_resource(camera);
        info!(
            "Spawned layer '{}' with {} points",
            props.id, props.point_count
        );
        return;
    }

    let Some(mesh) = layer.mesh.as_ref().and_then(|handle| meshes.get_mut(handle)) else {
        return;
    };
    if invalidation.positions {
        mesh.insert_attribute(Mesh::ATTRIBUTE_POSITION, world_positions(&binding.position_buffer()));
    }
    if invalidation.colours {
        mesh.insert_attribute(Mesh::ATTRIBUTE_COLOR, vertex_colours(&binding.colour_buffer()));
        if let Some(material) = layer.material.as_ref().and_then(|handle| materials.get_mut(handle)) {
            material.base_color = Color::srgba(1.0, 1.0, 1.0, props.opacity);
        }
    }
    debug!(
        "Layer '{}' updated: colours {}, positions {}",
        props.id, invalidation.colours, invalidation.positions
    );
}

/// T toggles the flat layout, S the section view, arrows step sections,
/// Escape clears the isolation filter.
pub fn view_shortcuts(keyboard: Res<ButtonInput<KeyCode>>, mut state: ResMut<ViewerState>) {
    if keyboard.just_pressed(KeyCode::KeyT) && state.view == ViewMode::ThreeD {
        let snapshot = state.bridge.snapshot();
        let dimension = state.colours.colouring_annotation.clone();
        state.layout.toggle(&snapshot, dimension.as_deref());
    }

    if keyboard.just_pressed(KeyCode::KeyS) {
        match state.view {
            ViewMode::ThreeD => {
                let count = state.enter_sections();
                info!("Section view: {} sections", count);
            }
            ViewMode::Sections => state.view = ViewMode::ThreeD,
        }
    }

    if state.view == ViewMode::Sections {
        if keyboard.just_pressed(KeyCode::ArrowRight) {
            state.cycle_section(true);
        }
        if keyboard.just_pressed(KeyCode::ArrowLeft) {
            state.cycle_section(false);
        }
    }

    if keyboard.just_pressed(KeyCode::Escape) {
        state.colours_mut().clear_selection();
    }
}
