use bevy::asset::AssetMetaCheck;
use bevy::diagnostic::{DiagnosticsStore, FrameTimeDiagnosticsPlugin};
use bevy::prelude::*;
use bevy::window::PresentMode;
use engine::{
    camera::{ViewportCamera, camera_controller},
    point_cloud::{LayerTriggers, PointLayer, ViewerState, sync_point_layer, view_shortcuts},
};
#[cfg(not(target_arch = "wasm32"))]
use engine::previews::{
    SectionPreviews, request_section_previews, section_thumb_clicks, show_section_previews,
};
use rpc::web_rpc::WebRpcPlugin;
mod engine;
mod rpc;

fn main() {
    let mut app = create_app();

    #[cfg(target_arch = "wasm32")]
    {
        wasm_bindgen_futures::spawn_local(async move {
            app.run();
        });
    }

    #[cfg(not(target_arch = "wasm32"))]
    {
        app.run();
    }
}

fn create_app() -> App {
    let mut app = App::new();

    app.add_plugins(create_default_plugins())
        .add_plugins(FrameTimeDiagnosticsPlugin::default())
        .add_plugins(WebRpcPlugin)
        .init_resource::<LayerTriggers>()
        .init_resource::<PointLayer>()
        .init_resource::<ViewportCamera>()
        .insert_resource(create_viewer_state())
        .add_systems(Startup, setup)
        .add_systems(
            Update,
            (
                view_shortcuts,
                sync_point_layer,
                camera_controller,
                fps_text_update_system,
            )
                .chain(),
        );

    #[cfg(not(target_arch = "wasm32"))]
    app.init_resource::<SectionPreviews>().add_systems(
        Update,
        (section_thumb_clicks, request_section_previews, show_section_previews)
            .chain()
            .after(view_shortcuts)
            .before(sync_point_layer),
    );

    app
}

#[cfg(not(target_arch = "wasm32"))]
fn create_viewer_state() -> ViewerState {
    let args: Vec<String> = std::env::args().collect();
    if args.len() < 2 {
        println!(
            "Usage: {} [<input.laz> [<annotation_config.json> <bins_dir> [global_config.json]]]",
            args[0]
        );
        return ViewerState::empty();
    }

    match dataset::load(&args[1..]) {
        Ok(state) => state,
        Err(e) => {
            error!("Failed to load dataset: {}", e);
            ViewerState::empty()
        }
    }
}

#[cfg(target_arch = "wasm32")]
fn create_viewer_state() -> ViewerState {
    ViewerState::empty()
}

#[cfg(not(target_arch = "wasm32"))]
mod dataset {
    use crate::engine::point_cloud::ViewerState;
    use constants::host::{ANNOTATION_BINS, ANNOTATION_CONFIG, GLOBAL_CONFIG, LAZ_BYTES};
    use point_cloud_attributes::host::BinMap;
    use point_cloud_attributes::{AttributeRepository, HostBridge, HostValue, MemoryModel};
    use std::fs;
    use std::path::Path;
    use std::sync::Arc;

    fn read_json(path: &str) -> Result<serde_json::Value, Box<dyn std::error::Error>> {
        Ok(serde_json::from_str(&fs::read_to_string(path)?)?)
    }

    fn read_bins(dir: &Path) -> Result<BinMap, Box<dyn std::error::Error>> {
        let mut bins = BinMap::new();
        for entry in fs::read_dir(dir)? {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) != Some("bin") {
                continue;
            }
            if let Some(name) = path.file_stem().and_then(|s| s.to_str()) {
                bins.insert(name.to_string(), Arc::from(fs::read(&path)?));
            }
        }
        Ok(bins)
    }

    /// `<input.laz> [<annotation_config.json> <bins_dir> [global_config.json]]`
    pub fn load(args: &[String]) -> Result<ViewerState, Box<dyn std::error::Error>> {
        let mut model = MemoryModel::new();
        model.set(LAZ_BYTES, HostValue::Bytes(Arc::from(fs::read(&args[0])?)));
        if let (Some(config), Some(bins)) = (args.get(1), args.get(2)) {
            model.set(ANNOTATION_CONFIG, HostValue::Json(read_json(config)?));
            model.set(ANNOTATION_BINS, HostValue::Bins(read_bins(Path::new(bins))?));
        }
        if let Some(global) = args.get(3) {
            model.set(GLOBAL_CONFIG, HostValue::Json(read_json(global)?));
        }

        let mut bridge = HostBridge::attach(&mut model, Arc::new(AttributeRepository::new()));
        bridge.detach(&mut model);
        for issue in bridge.issues() {
            println!("Warning: {:?}", issue);
        }
        println!("Loaded {} points", bridge.snapshot().point_count());
        Ok(ViewerState::new(bridge))
    }
}

fn create_default_plugins() -> impl PluginGroup {
    let window_config = WindowPlugin {
        primary_window: Some(create_window_config()),
        ..default()
    };

    let asset_config = AssetPlugin {
        meta_check: AssetMetaCheck::Never,
        ..default()
    };

    DefaultPlugins.set(window_config).set(asset_config)
}

fn create_window_config() -> Window {
    #[cfg(target_arch = "wasm32")]
    {
        Window {
            canvas: Some("#bevy".into()),
            fit_canvas_to_parent: true,
            prevent_default_event_handling: false,
            present_mode: PresentMode::AutoVsync,
            ..default()
        }
    }

    #[cfg(not(target_arch = "wasm32"))]
    {
        Window {
            title: "Point cloud viewer".into(),
            present_mode: PresentMode::AutoVsync,
            ..default()
        }
    }
}

#[derive(Component)]
struct FpsText;

fn setup(mut commands: Commands) {
    commands.spawn((
        Camera3d::default(),
        Transform::from_xyz(-2.5, 4.5, 9.0).looking_at(Vec3::ZERO, Vec3::Y),
    ));
    spawn_ui(&mut commands);
}

fn spawn_ui(commands: &mut Commands) {
    commands
        .spawn(Node {
            width: Val::Percent(100.0),
            height: Val::Percent(100.0),
            ..default()
        })
        .with_children(|parent| {
            parent.spawn((
                Text::new("FPS: "),
                TextFont {
                    font_size: 16.0,
                    ..default()
                },
                TextColor(Color::srgb(1., 0., 0.)),
                Node {
                    position_type: PositionType::Absolute,
                    bottom: Val::Px(12.0),
                    right: Val::Px(12.0),
                    ..default()
                },
                FpsText,
            ));
        });
}

fn fps_text_update_system(
    diagnostics: Res<DiagnosticsStore>,
    mut query: Query<&mut Text, With<FpsText>>,
) {
    for mut text in &mut query {
        if let Some(fps) = diagnostics.get(&FrameTimeDiagnosticsPlugin::FPS) {
            if let Some(value) = fps.smoothed() {
                text.0 = format!("FPS: {value:.1}");
            }
        }
    }
}
