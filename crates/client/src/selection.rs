//! Which file records are selected for bulk actions.

use protocol::FileId;

/// Ordered set of selected file ids.
///
/// Order is insertion order and becomes the order of ids in bulk requests.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SelectionModel {
    selected: Vec<FileId>,
}

impl SelectionModel {
    pub fn new() -> Self {
        Self::default()
    }

    /// Single-select replaces the selection, or empties it when `id` was the
    /// only selected item. Multi-select flips membership of `id`.
    pub fn toggle(&mut self, id: &FileId, multi_select: bool) -> &[FileId] {
        if multi_select {
            if let Some(pos) = self.selected.iter().position(|s| s == id) {
                self.selected.remove(pos);
            } else {
                self.selected.push(id.clone());
            }
        } else if self.selected.len() == 1 && self.selected[0] == *id {
            self.selected.clear();
        } else {
            self.selected = vec![id.clone()];
        }
        &self.selected
    }

    /// Selects every visible id, or nothing if the counts already match.
    pub fn select_all(&mut self, visible: &[FileId]) -> &[FileId] {
        if self.selected.len() == visible.len() {
            self.selected.clear();
        } else {
            self.selected = visible.to_vec();
        }
        &self.selected
    }

    pub fn clear(&mut self) {
        self.selected.clear();
    }

    /// Drops every id that is no longer visible.
    pub fn reconcile(&mut self, visible: &[FileId]) -> &[FileId] {
        let before = self.selected.len();
        self.selected.retain(|id| visible.contains(id));
        if self.selected.len() != before {
            tracing::debug!(
                "Selection reconciled: {} -> {} items",
                before,
                self.selected.len()
            );
        }
        &self.selected
    }

    pub fn contains(&self, id: &FileId) -> bool {
        self.selected.contains(id)
    }

    pub fn len(&self) -> usize {
        self.selected.len()
    }

    pub fn is_empty(&self) -> bool {
        self.selected.is_empty()
    }

    pub fn ids(&self) -> &[FileId] {
        &self.selected
    }

    /// Ids to drag when a drag starts on `id`: the whole selection if `id`
    /// is part of it, otherwise just `id`.
    pub fn drag_payload_for(&self, id: &FileId) -> Vec<FileId> {
        if self.contains(id) {
            self.selected.clone()
        } else {
            vec![id.clone()]
        }
    }
}
