/// Continuous per-point fields used for threshold colouring.
use crate::dtype::TypedBuffer;
use crate::error::{AttributeError, AttributeResult};
use constants::colour::RAMP_EPSILON;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;

/// Where the host took a continuous field from.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    /// Per-observation column.
    #[default]
    Obs,
    /// Gene expression vector.
    Gene,
    #[serde(other)]
    Other,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ContinuousField {
    pub name: String,
    pub values: Vec<f32>,
    /// Declared lower bound. Values are not guaranteed to respect it.
    pub min: f64,
    /// Declared upper bound.
    pub max: f64,
    pub source: SourceKind,
}

impl ContinuousField {
    pub fn new(
        name: impl Into<String>,
        values: Vec<f32>,
        min: f64,
        max: f64,
        source: SourceKind,
    ) -> Self {
        Self {
            name: name.into(),
            values,
            min,
            max,
            source,
        }
    }

    /// Build a field whose bounds are the finite extremes of `values`.
    pub fn from_values(name: impl Into<String>, values: Vec<f32>, source: SourceKind) -> Self {
        let (min, max) = values
            .iter()
            .filter(|v| v.is_finite())
            .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), &v| {
                (lo.min(v as f64), hi.max(v as f64))
            });
        let (min, max) = if min > max { (0.0, 0.0) } else { (min, max) };
        Self::new(name, values, min, max, source)
    }

    /// Accept a decoded float buffer with its declared bounds.
    pub fn from_typed(
        name: &str,
        buffer: TypedBuffer,
        min: f64,
        max: f64,
        source: SourceKind,
    ) -> AttributeResult<Self> {
        match buffer {
            TypedBuffer::F32(values) => Ok(Self::new(name, values, min, max, source)),
            _ => Err(AttributeError::NotContinuous(name.to_string())),
        }
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    #[inline]
    pub fn value_at(&self, index: usize) -> Option<f32> {
        self.values.get(index).copied()
    }

    /// Position of `value` in the declared range, clamped to `[0, 1]`.
    /// A degenerate range divides by `RAMP_EPSILON` instead of zero.
    #[inline]
    pub fn normalised(&self, value: f64) -> f64 {
        let range = (self.max - self.min).max(RAMP_EPSILON);
        let t = (value - self.min) / range;
        if t.is_nan() { 0.0 } else { t.clamp(0.0, 1.0) }
    }
}

/// Loaded continuous fields and the one currently driving colour.
#[derive(Debug, Clone, Default)]
pub struct ContinuousStore {
    fields: BTreeMap<String, Arc<ContinuousField>>,
    active: Option<String>,
}

impl ContinuousStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, field: ContinuousField) -> Option<Arc<ContinuousField>> {
        self.fields.insert(field.name.clone(), Arc::new(field))
    }

    pub fn insert_checked(
        &mut self,
        field: ContinuousField,
        point_count: usize,
    ) -> AttributeResult<()> {
        if field.len() != point_count {
            return Err(AttributeError::LengthMismatch {
                name: field.name.clone(),
                expected: point_count,
                actual: field.len(),
            });
        }
        self.fields.insert(field.name.clone(), Arc::new(field));
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<&Arc<ContinuousField>> {
        self.fields.get(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.fields.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Make `name` the active field. Unknown names leave the store unchanged.
    pub fn activate(&mut self, name: &str) -> bool {
        if self.fields.contains_key(name) {
            self.active = Some(name.to_string());
            true
        } else {
            false
        }
    }

    pub fn deactivate(&mut self) {
        self.active = None;
    }

    pub fn active(&self) -> Option<&Arc<ContinuousField>> {
        self.fields.get(self.active.as_deref()?)
    }

    pub fn active_name(&self) -> Option<&str> {
        self.active.as_deref()
    }

    /// Drop a field, deactivating it first if it was active.
    pub fn remove(&mut self, name: &str) -> Option<Arc<ContinuousField>> {
        if self.active.as_deref() == Some(name) {
            self.active = None;
        }
        self.fields.remove(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bounds_ignore_non_finite_values() {
        let field =
            ContinuousField::from_values("logp", vec![f32::NAN, 2.0, -1.0, f32::INFINITY], SourceKind::Obs);
        assert_eq!((field.min, field.max), (-1.0, 2.0));
    }

    #[test]
    fn normalises_with_clamping() {
        let field = ContinuousField::new("g", vec![], 0.0, 10.0, SourceKind::Gene);
        assert_eq!(field.normalised(5.0), 0.5);
        assert_eq!(field.normalised(-3.0), 0.0);
        assert!(field.normalised(25.0) <= 1.0);
    }

    #[test]
    fn constant_field_does_not_divide_by_zero() {
        let field = ContinuousField::new("c", vec![3.0], 3.0, 3.0, SourceKind::Obs);
        assert_eq!(field.normalised(3.0), 0.0);
    }

    #[test]
    fn activation_tracks_known_fields() {
        let mut store = ContinuousStore::new();
        store
            .insert_checked(ContinuousField::from_values("a", vec![1.0, 2.0], SourceKind::Obs), 2)
            .unwrap();
        assert!(!store.activate("missing"));
        assert!(store.activate("a"));
        assert_eq!(store.active().map(|f| f.name.as_str()), Some("a"));
        store.remove("a");
        assert!(store.active().is_none());
    }

    #[test]
    fn insert_replaces_fields_by_name() {
        let mut store = ContinuousStore::new();
        assert!(store.insert(ContinuousField::from_values("a", vec![1.0], SourceKind::Obs)).is_none());
        let previous = store.insert(ContinuousField::from_values("a", vec![2.0, 3.0], SourceKind::Obs));
        assert_eq!(previous.map(|f| f.len()), Some(1));
        assert_eq!(store.len(), 1);
        assert_eq!(store.get("a").map(|f| f.len()), Some(2));
        assert!(store
            .insert_checked(ContinuousField::from_values("b", vec![1.0], SourceKind::Obs), 2)
            .is_err());
    }

    #[test]
    fn integer_buffers_are_not_continuous() {
        assert!(matches!(
            ContinuousField::from_typed("x", TypedBuffer::U8(vec![1]), 0.0, 1.0, SourceKind::Obs),
            Err(AttributeError::NotContinuous(_))
        ));
    }

    #[test]
    fn source_kind_reads_host_spelling() {
        let kind: SourceKind = serde_json::from_str("\"gene\"").unwrap();
        assert_eq!(kind, SourceKind::Gene);
        let kind: SourceKind = serde_json::from_str("\"spatial\"").unwrap();
        assert_eq!(kind, SourceKind::Other);
    }
}
