/// Section discovery and 2D section browsing.
use crate::annotation::CategoryCode;
use crate::snapshot::AttributeSnapshot;
use std::sync::Arc;

/// Sorted distinct section ids under `slice_key`, empty when not loaded.
pub fn discover_sections(snapshot: &AttributeSnapshot, slice_key: &str) -> Vec<CategoryCode> {
    snapshot
        .annotations
        .get(slice_key)
        .map(|dimension| dimension.unique_codes())
        .unwrap_or_default()
}

/// Indices of the points belonging to `section`.
pub fn section_points(snapshot: &AttributeSnapshot, slice_key: &str, section: CategoryCode) -> Vec<u32> {
    snapshot
        .annotations
        .get(slice_key)
        .map(|dimension| dimension.indices_of(section))
        .unwrap_or_default()
}

/// Section list and the section shown in the 2D view.
///
/// Sections are discovered once, on first entry into 2D mode, and cached for
/// the session.
#[derive(Debug, Clone)]
pub struct SectionBrowser {
    slice_key: String,
    available: Option<Vec<CategoryCode>>,
    current: Option<CategoryCode>,
    members: Arc<Vec<u32>>,
}

impl SectionBrowser {
    pub fn new(slice_key: impl Into<String>) -> Self {
        Self {
            slice_key: slice_key.into(),
            available: None,
            current: None,
            members: Arc::default(),
        }
    }

    pub fn slice_key(&self) -> &str {
        &self.slice_key
    }

    /// Discover sections if needed and select the first one by default.
    pub fn enter(&mut self, snapshot: &AttributeSnapshot) -> &[CategoryCode] {
        if self.available.as_ref().is_none_or(Vec::is_empty) {
            let sections = discover_sections(snapshot, &self.slice_key);
            log::info!("Found {} sections under '{}'", sections.len(), self.slice_key);
            self.available = Some(sections);
        }

        let available = self.available.as_deref().unwrap_or_default();
        if self.current.is_none_or(|id| !available.contains(&id)) {
            self.current = available.first().copied();
            self.refilter(snapshot);
        }
        self.available.as_deref().unwrap_or_default()
    }

    pub fn available(&self) -> &[CategoryCode] {
        self.available.as_deref().unwrap_or_default()
    }

    pub fn current(&self) -> Option<CategoryCode> {
        self.current
    }

    /// Points of the current section.
    pub fn members(&self) -> Arc<Vec<u32>> {
        self.members.clone()
    }

    /// Handle a click on a section thumbnail. Returns whether the view changed.
    pub fn select(&mut self, section: CategoryCode, snapshot: &AttributeSnapshot) -> bool {
        if self.current == Some(section) || !self.available().contains(&section) {
            return false;
        }
        self.current = Some(section);
        self.refilter(snapshot);
        true
    }

    fn refilter(&mut self, snapshot: &AttributeSnapshot) {
        let members = match self.current {
            Some(section) => section_points(snapshot, &self.slice_key, section),
            None => Vec::new(),
        };
        log::debug!("Section {:?} has {} points", self.current, members.len());
        self.members = Arc::new(members);
    }

    /// Forget the cached section list, as after a data reload.
    pub fn reset(&mut self) {
        self.available = None;
        self.current = None;
        self.members = Arc::default();
    }
}
