//! Cached file list.
//!
//! The server owns every record; the catalog only ever holds the result of
//! the last full fetch and replaces it wholesale.

use protocol::{FileId, FileRecord};

#[derive(Debug, Clone, Default)]
pub struct FileCatalog {
    records: Vec<FileRecord>,
    filter: Option<String>,
}

impl FileCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the cache with a fresh listing.
    pub fn replace(&mut self, records: Vec<FileRecord>) {
        tracing::debug!("Catalog replaced: {} -> {} records", self.records.len(), records.len());
        self.records = records;
    }

    /// Narrow the visible records by name or tag. Blank clears the filter.
    pub fn set_filter(&mut self, query: Option<&str>) {
        self.filter = query
            .map(str::trim)
            .filter(|q| !q.is_empty())
            .map(str::to_string);
    }

    pub fn filter(&self) -> Option<&str> {
        self.filter.as_deref()
    }

    /// Records that pass the current filter, in server order.
    pub fn visible(&self) -> Vec<&FileRecord> {
        match &self.filter {
            Some(q) => self.records.iter().filter(|r| r.matches(q)).collect(),
            None => self.records.iter().collect(),
        }
    }

    pub fn visible_ids(&self) -> Vec<FileId> {
        self.visible().into_iter().map(|r| r.id.clone()).collect()
    }

    pub fn get(&self, id: &FileId) -> Option<&FileRecord> {
        self.records.iter().find(|r| &r.id == id)
    }

    pub fn records(&self) -> &[FileRecord] {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}
