/// Categorical annotation dimensions and their per-point membership.
use crate::dtype::TypedBuffer;
use crate::error::{AttributeError, AttributeResult};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;

/// Small integer identifying a category within one dimension.
pub type CategoryCode = u32;

pub type Rgb = [u8; 3];
pub type Rgba = [u8; 4];

/// Metadata for one category of a dimension.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnnotationItem {
    pub code: CategoryCode,
    pub name: String,
    pub colour: Option<Rgb>,
}

/// One category code per point, stored at the width the host declared.
#[derive(Debug, Clone, PartialEq)]
pub enum CategoryCodes {
    U8(Vec<u8>),
    U16(Vec<u16>),
    U32(Vec<u32>),
}

impl CategoryCodes {
    /// Accept an integer buffer as category codes. Float buffers are refused.
    pub fn from_typed(name: &str, buffer: TypedBuffer) -> AttributeResult<Self> {
        match buffer {
            TypedBuffer::U8(v) => Ok(CategoryCodes::U8(v)),
            TypedBuffer::U16(v) => Ok(CategoryCodes::U16(v)),
            TypedBuffer::U32(v) => Ok(CategoryCodes::U32(v)),
            TypedBuffer::F32(_) => Err(AttributeError::NotCategorical(name.to_string())),
        }
    }

    #[inline]
    pub fn get(&self, index: usize) -> Option<CategoryCode> {
        match self {
            CategoryCodes::U8(v) => v.get(index).map(|&c| c as CategoryCode),
            CategoryCodes::U16(v) => v.get(index).map(|&c| c as CategoryCode),
            CategoryCodes::U32(v) => v.get(index).copied(),
        }
    }

    pub fn len(&self) -> usize {
        match self {
            CategoryCodes::U8(v) => v.len(),
            CategoryCodes::U16(v) => v.len(),
            CategoryCodes::U32(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn iter(&self) -> impl Iterator<Item = CategoryCode> + '_ {
        (0..self.len()).filter_map(move |i| self.get(i))
    }
}

impl From<Vec<u8>> for CategoryCodes {
    fn from(codes: Vec<u8>) -> Self {
        CategoryCodes::U8(codes)
    }
}

impl From<Vec<u16>> for CategoryCodes {
    fn from(codes: Vec<u16>) -> Self {
        CategoryCodes::U16(codes)
    }
}

impl From<Vec<u32>> for CategoryCodes {
    fn from(codes: Vec<u32>) -> Self {
        CategoryCodes::U32(codes)
    }
}

/// Named categorical partition of the point set.
#[derive(Debug, Clone, PartialEq)]
pub struct AnnotationDimension {
    pub name: String,
    pub items: Vec<AnnotationItem>,
    pub codes: CategoryCodes,
}

impl AnnotationDimension {
    pub fn new(name: impl Into<String>, items: Vec<AnnotationItem>, codes: CategoryCodes) -> Self {
        Self {
            name: name.into(),
            items,
            codes,
        }
    }

    /// Number of points covered by the membership array.
    pub fn len(&self) -> usize {
        self.codes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.codes.is_empty()
    }

    #[inline]
    pub fn code_at(&self, index: usize) -> Option<CategoryCode> {
        self.codes.get(index)
    }

    /// Metadata for `code`, `None` for codes the host never described.
    pub fn item(&self, code: CategoryCode) -> Option<&AnnotationItem> {
        self.items.iter().find(|item| item.code == code)
    }

    pub fn display_name(&self, code: CategoryCode) -> Option<&str> {
        self.item(code).map(|item| item.name.as_str())
    }

    /// Distinct codes present in the membership array, ascending.
    pub fn unique_codes(&self) -> Vec<CategoryCode> {
        self.category_counts().into_keys().collect()
    }

    /// Indices of all points carrying `code`.
    pub fn indices_of(&self, code: CategoryCode) -> Vec<u32> {
        self.codes
            .iter()
            .enumerate()
            .filter(|&(_, c)| c == code)
            .map(|(i, _)| i as u32)
            .collect()
    }

    /// Point indices of every code, gathered in one pass.
    pub fn group_indices(&self) -> BTreeMap<CategoryCode, Vec<u32>> {
        let mut groups: BTreeMap<CategoryCode, Vec<u32>> = BTreeMap::new();
        for (idx, code) in self.codes.iter().enumerate() {
            groups.entry(code).or_default().push(idx as u32);
        }
        groups
    }

    pub fn category_counts(&self) -> BTreeMap<CategoryCode, usize> {
        let mut counts = BTreeMap::new();
        for code in self.codes.iter() {
            *counts.entry(code).or_insert(0) += 1;
        }
        counts
    }

    /// Colours declared in the host configuration.
    pub fn declared_colours(&self) -> BTreeMap<CategoryCode, Rgb> {
        self.items
            .iter()
            .filter_map(|item| item.colour.map(|c| (item.code, c)))
            .collect()
    }

    /// Declared colours, completed from the original per-point colours for
    /// categories the configuration leaves uncoloured. The first point seen in a
    /// category decides its colour.
    pub fn infer_colours(&self, original_colours: Option<&[Rgba]>) -> BTreeMap<CategoryCode, Rgb> {
        let mut colours = self.declared_colours();
        let Some(original) = original_colours else {
            return colours;
        };

        for (code, rgba) in self.codes.iter().zip(original.iter()) {
            colours
                .entry(code)
                .or_insert([rgba[0], rgba[1], rgba[2]]);
        }
        colours
    }
}

/// All loaded annotation dimensions, keyed by name.
#[derive(Debug, Clone, Default)]
pub struct AnnotationStore {
    dimensions: BTreeMap<String, Arc<AnnotationDimension>>,
    default_dimension: Option<String>,
}

impl AnnotationStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a dimension after checking it covers exactly `point_count` points.
    pub fn insert_checked(
        &mut self,
        dimension: AnnotationDimension,
        point_count: usize,
    ) -> AttributeResult<()> {
        if dimension.len() != point_count {
            return Err(AttributeError::LengthMismatch {
                name: dimension.name.clone(),
                expected: point_count,
                actual: dimension.len(),
            });
        }
        self.insert(dimension);
        Ok(())
    }

    pub fn insert(&mut self, dimension: AnnotationDimension) -> Option<Arc<AnnotationDimension>> {
        self.dimensions
            .insert(dimension.name.clone(), Arc::new(dimension))
    }

    pub fn remove(&mut self, name: &str) -> Option<Arc<AnnotationDimension>> {
        self.dimensions.remove(name)
    }

    pub fn get(&self, name: &str) -> Option<&Arc<AnnotationDimension>> {
        self.dimensions.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.dimensions.contains_key(name)
    }

    /// Category code of point `index` in dimension `name`.
    #[inline]
    pub fn code_at(&self, name: &str, index: usize) -> Option<CategoryCode> {
        self.dimensions.get(name)?.code_at(index)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.dimensions.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Arc<AnnotationDimension>)> {
        self.dimensions.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.dimensions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.dimensions.is_empty()
    }

    pub fn set_default_dimension(&mut self, name: Option<String>) {
        self.default_dimension = name;
    }

    /// Dimension the host marked as primary, used for thumbnails.
    pub fn default_dimension(&self) -> Option<&str> {
        self.default_dimension.as_deref()
    }
}
