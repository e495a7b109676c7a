//! Per-point attribute stores and colour resolution for spatial point clouds.
//!
//! Host buffers are decoded once into versioned [`snapshot::AttributeSnapshot`]s.
//! Renderers read colours and positions through a [`binding::LayerBinding`],
//! which also declares the update triggers that tell them when to re-evaluate.

pub mod annotation;
pub mod binding;
pub mod bounds;
pub mod camera;
pub mod colour;
pub mod config;
pub mod continuous;
pub mod dtype;
pub mod error;
pub mod host;
pub mod layout;
pub mod laz;
pub mod section;
pub mod snapshot;

pub use annotation::{AnnotationDimension, AnnotationStore, CategoryCode, Rgb, Rgba};
pub use binding::{LayerBinding, LayerProps, TriggerCache, UpdateTriggers};
pub use colour::{resolve_colour, ColourResolver, ColourState, FallbackPolicy, RenderPath};
pub use config::GlobalConfig;
pub use error::{AttributeError, AttributeResult};
pub use host::{HostBridge, HostModel, HostValue, MemoryModel};
pub use layout::{LayoutController, LayoutMode};
pub use section::SectionBrowser;
pub use snapshot::{AttributeRepository, AttributeSnapshot, PointSet};
