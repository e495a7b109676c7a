/// Host configuration documents.
///
/// Field names follow the host exporter's JSON (`PascalCase` for the data
/// configs, `snake_case` for the runtime settings).
use crate::annotation::{AnnotationItem, CategoryCode, Rgb};
use crate::colour::FallbackPolicy;
use crate::continuous::SourceKind;
use constants::host::DEFAULT_SLICE_KEY;
use constants::preview::{
    CAPTURE_SETTLE_MS, CHUNK_DELAY_MS, MAX_CONCURRENT_PREVIEWS, PREVIEW_SIZE, PREVIEW_TIMEOUT_MS,
};
use constants::render_settings::{DEFAULT_OPACITY, DEFAULT_POINT_SIZE};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct AnnotationConfig {
    pub id: Option<String>,
    pub available_anno_types: Vec<String>,
    pub default_anno_type: Option<String>,
    pub anno_maps: BTreeMap<String, AnnotationMap>,
    /// Declared element type of each annotation buffer.
    pub anno_dtypes: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct AnnotationMap {
    pub items: Vec<AnnotationMapItem>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct AnnotationMapItem {
    pub name: String,
    pub code: CategoryCode,
    #[serde(default)]
    pub color: Option<Rgb>,
}

impl AnnotationConfig {
    /// Dimensions to load: the declared list, or every mapped dimension when
    /// the list is empty.
    pub fn dimension_names(&self) -> Vec<String> {
        if self.available_anno_types.is_empty() {
            self.anno_maps.keys().cloned().collect()
        } else {
            self.available_anno_types.clone()
        }
    }

    pub fn items(&self, dimension: &str) -> Vec<AnnotationItem> {
        self.anno_maps
            .get(dimension)
            .map(|map| {
                map.items
                    .iter()
                    .map(|item| AnnotationItem {
                        code: item.code,
                        name: item.name.clone(),
                        colour: item.color,
                    })
                    .collect()
            })
            .unwrap_or_default()
    }
}

/// Declared metadata of one continuous field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ContinuousTrait {
    #[serde(default)]
    pub source: SourceKind,
    #[serde(rename = "DType", default = "default_continuous_dtype")]
    pub dtype: String,
    pub min: f64,
    pub max: f64,
}

fn default_continuous_dtype() -> String {
    "float32".to_string()
}

pub type ContinuousConfig = BTreeMap<String, ContinuousTrait>;

/// Runtime settings. Every field is optional in the host document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GlobalConfig {
    pub preview_size: u32,
    pub max_concurrent_previews: usize,
    pub preview_timeout_ms: u64,
    pub chunk_delay_ms: u64,
    pub capture_settle_ms: u64,
    pub slice_key: String,
    pub fallback: FallbackPolicy,
    pub point_size: f32,
    pub opacity: f32,
}

impl Default for GlobalConfig {
    fn default() -> Self {
        Self {
            preview_size: PREVIEW_SIZE,
            max_concurrent_previews: MAX_CONCURRENT_PREVIEWS,
            preview_timeout_ms: PREVIEW_TIMEOUT_MS,
            chunk_delay_ms: CHUNK_DELAY_MS,
            capture_settle_ms: CAPTURE_SETTLE_MS,
            slice_key: DEFAULT_SLICE_KEY.to_string(),
            fallback: FallbackPolicy::default(),
            point_size: DEFAULT_POINT_SIZE,
            opacity: DEFAULT_OPACITY,
        }
    }
}
