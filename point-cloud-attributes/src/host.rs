//! Host synchronisation and ingestion.
//!
//! The embedding host owns raw buffers and exposes them as named properties.
//! [`HostBridge`] is the decode boundary: it turns property values into
//! attribute stores, logs and records every data error, and never lets one
//! escape to the caller.
use crate::annotation::{AnnotationDimension, AnnotationStore, CategoryCodes};
use crate::config::{AnnotationConfig, ContinuousConfig, GlobalConfig};
use crate::continuous::{ContinuousField, ContinuousStore};
use crate::dtype::{self, DType};
use crate::error::{AttributeError, AttributeResult};
use crate::laz;
use crate::snapshot::{AttributeRepository, AttributeSnapshot, PointSet};
use constants::host::{
    ANNOTATION_BINS, ANNOTATION_CONFIG, CONTINUOUS_BINS, CONTINUOUS_CONFIG, GLOBAL_CONFIG,
    LAZ_BYTES, OBSERVED_PROPERTIES,
};
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::sync::Arc;

/// Named binary buffers, one per attribute.
pub type BinMap = BTreeMap<String, Arc<[u8]>>;

/// Value of a host property.
#[derive(Debug, Clone, PartialEq)]
pub enum HostValue {
    Json(serde_json::Value),
    Bytes(Arc<[u8]>),
    Bins(BinMap),
}

impl HostValue {
    fn kind(&self) -> &'static str {
        match self {
            HostValue::Json(_) => "json",
            HostValue::Bytes(_) => "bytes",
            HostValue::Bins(_) => "bins",
        }
    }
}

pub type SubscriptionId = u64;
pub type ChangeHandler = Box<dyn FnMut(&HostValue) + Send>;

/// The host's observable key/value model.
pub trait HostModel {
    fn get(&self, name: &str) -> Option<HostValue>;

    /// Call `handler` with the new value whenever `name` changes.
    fn on(&mut self, name: &str, handler: ChangeHandler) -> SubscriptionId;

    fn off(&mut self, subscription: SubscriptionId) -> bool;
}

/// Accept both `name` and the `change:name` event spelling.
fn property_name(event: &str) -> &str {
    event.strip_prefix("change:").unwrap_or(event)
}

/// In-process host model.
#[derive(Default)]
pub struct MemoryModel {
    values: BTreeMap<String, HostValue>,
    handlers: Vec<(SubscriptionId, String, ChangeHandler)>,
    next_id: SubscriptionId,
}

impl MemoryModel {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store `value` and notify subscribers of `name`.
    pub fn set(&mut self, name: &str, value: HostValue) {
        for (_, property, handler) in self.handlers.iter_mut() {
            if property == name {
                handler(&value);
            }
        }
        self.values.insert(name.to_string(), value);
    }

    pub fn subscriber_count(&self) -> usize {
        self.handlers.len()
    }
}

impl HostModel for MemoryModel {
    fn get(&self, name: &str) -> Option<HostValue> {
        self.values.get(name).cloned()
    }

    fn on(&mut self, name: &str, handler: ChangeHandler) -> SubscriptionId {
        self.next_id += 1;
        self.handlers
            .push((self.next_id, property_name(name).to_string(), handler));
        self.next_id
    }

    fn off(&mut self, subscription: SubscriptionId) -> bool {
        let before = self.handlers.len();
        self.handlers.retain(|(id, _, _)| *id != subscription);
        self.handlers.len() != before
    }
}

/// A data problem found while ingesting a property.
#[derive(Debug, Clone, PartialEq)]
pub struct IngestIssue {
    pub property: String,
    /// Attribute that was skipped, `None` when the whole property was.
    pub field: Option<String>,
    pub message: String,
}

/// Element type of an annotation buffer: declared, or implied by the buffer
/// length when the config is silent.
fn annotation_dtype(
    config: &AnnotationConfig,
    name: &str,
    byte_len: usize,
    point_count: usize,
) -> AttributeResult<DType> {
    if let Some(declared) = config.anno_dtypes.get(name) {
        return declared.parse();
    }
    let implied = match (byte_len.checked_div(point_count), byte_len % point_count.max(1)) {
        (Some(1), 0) => DType::Uint8,
        (Some(2), 0) => DType::Uint16,
        (Some(4), 0) => DType::Uint32,
        _ => {
            return Err(AttributeError::MalformedProperty {
                name: name.to_string(),
                reason: format!("no dtype declared and {} bytes do not fit {} points", byte_len, point_count),
            });
        }
    };
    log::debug!("Annotation '{}' has no declared dtype, using {}", name, implied);
    Ok(implied)
}

/// Decode every configured annotation dimension. Dimensions that fail are
/// left out and returned with their error.
pub fn decode_annotations(
    config: &AnnotationConfig,
    bins: &BinMap,
    point_count: usize,
) -> (AnnotationStore, Vec<(String, AttributeError)>) {
    let mut store = AnnotationStore::new();
    let mut failures = Vec::new();

    for name in config.dimension_names() {
        let decoded = bins
            .get(&name)
            .ok_or_else(|| AttributeError::MissingBuffer(name.clone()))
            .and_then(|bytes| {
                let element = annotation_dtype(config, &name, bytes.len(), point_count)?;
                let codes = CategoryCodes::from_typed(&name, dtype::decode(bytes, element)?)?;
                let dimension = AnnotationDimension::new(name.clone(), config.items(&name), codes);
                store.insert_checked(dimension, point_count)
            });
        if let Err(err) = decoded {
            failures.push((name, err));
        }
    }

    let default = config
        .default_anno_type
        .clone()
        .filter(|name| store.contains(name));
    store.set_default_dimension(default);
    (store, failures)
}

/// Decode every configured continuous field.
pub fn decode_continuous(
    config: &ContinuousConfig,
    bins: &BinMap,
    point_count: usize,
) -> (Vec<ContinuousField>, Vec<(String, AttributeError)>) {
    let mut fields = Vec::new();
    let mut failures = Vec::new();

    for (name, declared) in config {
        let decoded = bins
            .get(name)
            .ok_or_else(|| AttributeError::MissingBuffer(name.clone()))
            .and_then(|bytes| dtype::decode_declared(bytes, &declared.dtype))
            .and_then(|buffer| {
                ContinuousField::from_typed(name, buffer, declared.min, declared.max, declared.source)
            })
            .and_then(|field| {
                if field.len() == point_count {
                    Ok(field)
                } else {
                    Err(AttributeError::LengthMismatch {
                        name: name.clone(),
                        expected: point_count,
                        actual: field.len(),
                    })
                }
            });
        match decoded {
            Ok(field) => fields.push(field),
            Err(err) => failures.push((name.clone(), err)),
        }
    }
    (fields, failures)
}

#[derive(Debug, Default)]
struct RawProperties {
    annotation_config: Option<AnnotationConfig>,
    annotation_bins: BinMap,
    continuous_config: ContinuousConfig,
    continuous_bins: BinMap,
}

#[derive(Debug, Default)]
struct BridgeState {
    raw: RawProperties,
    global: GlobalConfig,
    issues: Vec<IngestIssue>,
}

impl BridgeState {
    fn replace_issues(&mut self, property: &str, found: Vec<IngestIssue>) {
        self.issues.retain(|issue| issue.property != property);
        self.issues.extend(found);
    }
}

#[derive(Debug)]
struct BridgeCore {
    repository: Arc<AttributeRepository>,
    state: Mutex<BridgeState>,
}

impl BridgeCore {
    fn apply(&self, name: &str, value: &HostValue) {
        let mut state = self.state.lock();
        let result = match name {
            LAZ_BYTES => self.apply_laz(&mut state, value),
            ANNOTATION_CONFIG => json_property(name, value).map(|config| {
                state.raw.annotation_config = Some(config);
                self.ingest_annotations(&mut state);
            }),
            ANNOTATION_BINS => bins_property(name, value).map(|bins| {
                state.raw.annotation_bins = bins;
                self.ingest_annotations(&mut state);
            }),
            CONTINUOUS_CONFIG => json_property(name, value).map(|config| {
                state.raw.continuous_config = config;
                self.ingest_continuous(&mut state);
            }),
            CONTINUOUS_BINS => bins_property(name, value).map(|bins| {
                state.raw.continuous_bins = bins;
                self.ingest_continuous(&mut state);
            }),
            GLOBAL_CONFIG => json_property(name, value).map(|config| {
                log::info!("Global config updated: {:?}", config);
                state.global = config;
            }),
            other => {
                log::debug!("Ignoring host property '{}'", other);
                Ok(())
            }
        };

        match result {
            Ok(()) => state.issues.retain(|issue| issue.property != name || issue.field.is_some()),
            Err(err) => {
                log::error!("Skipping host property '{}': {}", name, err);
                state.replace_issues(
                    name,
                    vec![IngestIssue {
                        property: name.to_string(),
                        field: None,
                        message: err.to_string(),
                    }],
                );
            }
        }
    }

    fn apply_laz(&self, state: &mut BridgeState, value: &HostValue) -> AttributeResult<()> {
        let HostValue::Bytes(bytes) = value else {
            return Err(unexpected_kind(LAZ_BYTES, "bytes", value));
        };
        let points = laz::read_point_set(bytes)?;
        self.load_points(state, points);
        Ok(())
    }

    fn load_points(&self, state: &mut BridgeState, points: PointSet) {
        self.repository.commit(|draft| draft.replace_points(points));
        self.ingest_annotations(state);
        self.ingest_continuous(state);
    }

    fn ingest_annotations(&self, state: &mut BridgeState) {
        let Some(config) = state.raw.annotation_config.as_ref() else {
            return;
        };
        let point_count = self.repository.snapshot().point_count();
        if point_count == 0 || state.raw.annotation_bins.is_empty() {
            log::debug!("Annotations waiting for points and bins");
            return;
        }

        let (store, failures) = decode_annotations(config, &state.raw.annotation_bins, point_count);
        log::info!(
            "Loaded {} annotation dimensions, skipped {}",
            store.len(),
            failures.len()
        );
        let issues = collect_issues(ANNOTATION_BINS, failures);
        self.repository
            .commit(|draft| draft.annotations = Arc::new(store));
        state.replace_issues(ANNOTATION_BINS, issues);
    }

    fn ingest_continuous(&self, state: &mut BridgeState) {
        let point_count = self.repository.snapshot().point_count();
        if point_count == 0 || state.raw.continuous_config.is_empty() || state.raw.continuous_bins.is_empty() {
            return;
        }

        let (fields, failures) =
            decode_continuous(&state.raw.continuous_config, &state.raw.continuous_bins, point_count);
        log::info!(
            "Loaded {} continuous fields, skipped {}",
            fields.len(),
            failures.len()
        );
        let issues = collect_issues(CONTINUOUS_BINS, failures);
        self.repository.commit(|draft| {
            let active = draft.continuous.active_name().map(str::to_string);
            let mut store = ContinuousStore::new();
            for field in fields {
                store.insert(field);
            }
            if let Some(active) = active {
                store.activate(&active);
            }
            draft.continuous = Arc::new(store);
        });
        state.replace_issues(CONTINUOUS_BINS, issues);
    }
}

fn collect_issues(property: &str, failures: Vec<(String, AttributeError)>) -> Vec<IngestIssue> {
    failures
        .into_iter()
        .map(|(field, err)| {
            log::error!("Skipping '{}' from {}: {}", field, property, err);
            IngestIssue {
                property: property.to_string(),
                field: Some(field),
                message: err.to_string(),
            }
        })
        .collect()
}

fn unexpected_kind(name: &str, expected: &str, value: &HostValue) -> AttributeError {
    AttributeError::MalformedProperty {
        name: name.to_string(),
        reason: format!("expected {}, got {}", expected, value.kind()),
    }
}

fn json_property<T: serde::de::DeserializeOwned>(name: &str, value: &HostValue) -> AttributeResult<T> {
    match value {
        HostValue::Json(json) => Ok(T::deserialize(json)?),
        other => Err(unexpected_kind(name, "json", other)),
    }
}

fn bins_property(name: &str, value: &HostValue) -> AttributeResult<BinMap> {
    match value {
        HostValue::Bins(bins) => Ok(bins.clone()),
        other => Err(unexpected_kind(name, "bins", other)),
    }
}

/// Binds a [`HostModel`] to an [`AttributeRepository`].
#[derive(Debug)]
pub struct HostBridge {
    core: Arc<BridgeCore>,
    subscriptions: Vec<SubscriptionId>,
}

impl HostBridge {
    /// Ingest the current property values and subscribe to their changes.
    pub fn attach<M: HostModel + ?Sized>(model: &mut M, repository: Arc<AttributeRepository>) -> Self {
        let core = Arc::new(BridgeCore {
            repository,
            state: Mutex::new(BridgeState::default()),
        });

        for &name in OBSERVED_PROPERTIES {
            if let Some(value) = model.get(name) {
                core.apply(name, &value);
            }
        }

        let subscriptions = OBSERVED_PROPERTIES
            .iter()
            .map(|&name| {
                let core = core.clone();
                model.on(name, Box::new(move |value: &HostValue| core.apply(name, value)))
            })
            .collect();

        log::info!("Host bridge attached");
        Self { core, subscriptions }
    }

    /// Unsubscribe from the model. Loaded data stays in the repository.
    pub fn detach<M: HostModel + ?Sized>(&mut self, model: &mut M) {
        for subscription in self.subscriptions.drain(..) {
            model.off(subscription);
        }
        log::info!("Host bridge detached");
    }

    pub fn repository(&self) -> &Arc<AttributeRepository> {
        &self.core.repository
    }

    pub fn snapshot(&self) -> Arc<AttributeSnapshot> {
        self.core.repository.snapshot()
    }

    /// Feed one property value through the decode boundary.
    pub fn apply(&self, name: &str, value: &HostValue) {
        self.core.apply(property_name(name), value);
    }

    /// Install points decoded elsewhere, re-ingesting attributes against them.
    pub fn load_points(&self, points: PointSet) {
        let mut state = self.core.state.lock();
        self.core.load_points(&mut state, points);
    }

    /// Make `name` the active continuous field, or clear it with `None`.
    pub fn set_active_field(&self, name: Option<&str>) -> bool {
        let snapshot = self.snapshot();
        match name {
            Some(name) if snapshot.continuous.get(name).is_none() => {
                log::warn!("Continuous field '{}' is not loaded", name);
                false
            }
            Some(name) => {
                self.core
                    .repository
                    .commit(|draft| {
                        Arc::make_mut(&mut draft.continuous).activate(name);
                    });
                true
            }
            None => {
                self.core
                    .repository
                    .commit(|draft| Arc::make_mut(&mut draft.continuous).deactivate());
                true
            }
        }
    }

    pub fn global_config(&self) -> GlobalConfig {
        self.core.state.lock().global.clone()
    }

    pub fn issues(&self) -> Vec<IngestIssue> {
        self.core.state.lock().issues.clone()
    }

    /// Drop all data and cached properties.
    pub fn reset(&self) {
        let mut state = self.core.state.lock();
        *state = BridgeState::default();
        self.core.repository.reset();
    }
}
