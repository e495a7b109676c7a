//! Section thumbnails for the section view.
//!
//! Entering the section view hands every discovered section to a
//! [`PreviewScheduler`] on its own thread. Captured PNGs come back through an
//! inbox and land as buttons in a strip along the top edge; clicking one
//! isolates that section.
use bevy::image::{CompressedImageFormats, ImageSampler, ImageType};
use bevy::prelude::*;
use point_cloud_attributes::{CategoryCode, PointSet};
use section_preview::{CpuBackend, PreviewConfig, PreviewEvent, PreviewPalette, PreviewScheduler};
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use super::point_cloud::{ViewMode, ViewerState};

const THUMB_SIZE: f32 = 96.0;

/// Scheduler events tagged with the generation that requested them.
type Inbox = Arc<Mutex<Vec<(u64, PreviewEvent)>>>;

#[derive(Resource, Default)]
pub struct SectionPreviews {
    generation: u64,
    requested: Option<Arc<PointSet>>,
    inbox: Inbox,
    strip: Option<Entity>,
    thumbs: BTreeMap<CategoryCode, Entity>,
}

impl SectionPreviews {
    /// True until previews were requested for exactly these points.
    fn needs_request(&self, points: &Arc<PointSet>) -> bool {
        !self
            .requested
            .as_ref()
            .is_some_and(|requested| Arc::ptr_eq(requested, points))
    }

    /// Start a new generation. Events still arriving for older ones are dropped.
    fn begin(&mut self, points: Arc<PointSet>) -> (u64, Inbox) {
        self.generation += 1;
        self.requested = Some(points);
        (self.generation, self.inbox.clone())
    }

    fn drain(&self) -> Vec<PreviewEvent> {
        let Ok(mut inbox) = self.inbox.lock() else {
            return Vec::new();
        };
        let generation = self.generation;
        inbox
            .drain(..)
            .filter(|(tag, _)| *tag == generation)
            .map(|(_, event)| event)
            .collect()
    }
}

#[derive(Component)]
struct PreviewStrip;

#[derive(Component)]
pub struct SectionThumb(pub CategoryCode);

/// Kick off thumbnail rendering the first time the section view shows a dataset.
pub fn request_section_previews(
    mut commands: Commands,
    state: Res<ViewerState>,
    mut previews: ResMut<SectionPreviews>,
) {
    if state.view != ViewMode::Sections {
        return;
    }
    let snapshot = state.bridge.snapshot();
    if !previews.needs_request(&snapshot.points) {
        return;
    }

    for (_, thumb) in std::mem::take(&mut previews.thumbs) {
        commands.entity(thumb).despawn();
    }
    let (generation, inbox) = previews.begin(snapshot.points.clone());
    let sections = state.sections.available().to_vec();
    let palette = PreviewPalette::from_state(&snapshot, &state.colours);
    let config = PreviewConfig::from(&state.bridge.global_config());
    info!("Requesting previews for {} sections", sections.len());

    let spawned = std::thread::Builder::new()
        .name("section-previews".into())
        .spawn(move || {
            let runtime = match tokio::runtime::Builder::new_current_thread().enable_time().build() {
                Ok(runtime) => runtime,
                Err(e) => {
                    error!("Preview runtime failed to start: {}", e);
                    return;
                }
            };
            let scheduler = PreviewScheduler::new(CpuBackend::new(), config).with_observer(move |event| {
                if let Ok(mut inbox) = inbox.lock() {
                    inbox.push((generation, event.clone()));
                }
            });
            let summary = runtime.block_on(scheduler.submit(snapshot, &palette, &sections));
            info!(
                "Section previews: {} captured, {} failed, {} timed out",
                summary.captured, summary.failed, summary.timed_out
            );
        });
    if let Err(e) = spawned {
        error!("Failed to start preview thread: {}", e);
    }
}

/// Turn captured PNGs into thumbnail buttons. The strip only shows in the section view.
pub fn show_section_previews(
    mut commands: Commands,
    state: Res<ViewerState>,
    mut previews: ResMut<SectionPreviews>,
    mut images: ResMut<Assets<Image>>,
    mut strips: Query<&mut Visibility, With<PreviewStrip>>,
) {
    let strip = match previews.strip {
        Some(strip) => strip,
        None => {
            let strip = spawn_strip(&mut commands);
            previews.strip = Some(strip);
            strip
        }
    };

    for event in previews.drain() {
        match event {
            PreviewEvent::Captured { section, image } => {
                let decoded = match Image::from_buffer(
                    &image.png,
                    ImageType::Extension("png"),
                    CompressedImageFormats::NONE,
                    true,
                    ImageSampler::Default,
                    default(),
                ) {
                    Ok(decoded) => decoded,
                    Err(e) => {
                        warn!("Preview of section {} is not a readable PNG: {}", section, e);
                        continue;
                    }
                };
                let thumb = commands
                    .spawn((
                        Button,
                        ImageNode::new(images.add(decoded)),
                        Node {
                            width: Val::Px(THUMB_SIZE),
                            height: Val::Px(THUMB_SIZE),
                            margin: UiRect::all(Val::Px(4.0)),
                            ..default()
                        },
                        SectionThumb(section),
                    ))
                    .id();
                commands.entity(strip).add_child(thumb);
                if let Some(previous) = previews.thumbs.insert(section, thumb) {
                    commands.entity(previous).despawn();
                }
            }
            PreviewEvent::Failed { section, reason } => {
                warn!("Preview of section {} failed: {}", section, reason);
            }
            PreviewEvent::TimedOut { section } => warn!("Preview of section {} timed out", section),
            PreviewEvent::Started { .. } => {}
        }
    }

    if let Ok(mut visibility) = strips.get_mut(strip) {
        *visibility = match state.view {
            ViewMode::Sections => Visibility::Inherited,
            ViewMode::ThreeD => Visibility::Hidden,
        };
    }
}

pub fn section_thumb_clicks(
    thumbs: Query<(&Interaction, &SectionThumb), Changed<Interaction>>,
    mut state: ResMut<ViewerState>,
) {
    if state.view != ViewMode::Sections {
        return;
    }
    for (interaction, thumb) in &thumbs {
        if *interaction == Interaction::Pressed && state.select_section(thumb.0) {
            info!("Selected section {}", thumb.0);
        }
    }
}

fn spawn_strip(commands: &mut Commands) -> Entity {
    commands
        .spawn((
            Node {
                position_type: PositionType::Absolute,
                top: Val::Px(8.0),
                left: Val::Px(8.0),
                max_width: Val::Percent(100.0),
                flex_direction: FlexDirection::Row,
                flex_wrap: FlexWrap::Wrap,
                ..default()
            },
            Visibility::Hidden,
            PreviewStrip,
        ))
        .id()
}
