//! Drag-and-drop of files onto folders.
//!
//! The controller is a small state machine. It never talks to the server:
//! [`DragController::drop`] hands back the single [`MoveRequest`] to send and
//! returns to idle before the caller has a chance to send it.

use std::fmt;

use protocol::{FileId, FolderId, MoveRequest};
use thiserror::Error;

/// Current drag state.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum DragState {
    #[default]
    Idle,
    Dragging {
        ids: Vec<FileId>,
    },
    Hovering {
        ids: Vec<FileId>,
        target: FolderId,
    },
}

impl DragState {
    fn name(&self) -> &'static str {
        match self {
            DragState::Idle => "idle",
            DragState::Dragging { .. } => "dragging",
            DragState::Hovering { .. } => "hovering",
        }
    }

    /// Ids being dragged; empty when idle.
    pub fn payload(&self) -> &[FileId] {
        match self {
            DragState::Idle => &[],
            DragState::Dragging { ids } | DragState::Hovering { ids, .. } => ids,
        }
    }
}

impl fmt::Display for DragState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Errors from drag transitions. State is unchanged when one is returned.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DragError {
    #[error("cannot {event} while {from}")]
    InvalidTransition {
        from: &'static str,
        event: &'static str,
    },

    #[error("cannot start a drag with no files")]
    EmptyPayload,
}

#[derive(Debug, Default)]
pub struct DragController {
    state: DragState,
}

impl DragController {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> &DragState {
        &self.state
    }

    pub fn is_active(&self) -> bool {
        self.state != DragState::Idle
    }

    fn invalid(&self, event: &'static str) -> DragError {
        DragError::InvalidTransition {
            from: self.state.name(),
            event,
        }
    }

    pub fn drag_start(&mut self, ids: Vec<FileId>) -> Result<(), DragError> {
        if self.is_active() {
            return Err(self.invalid("start a drag"));
        }
        if ids.is_empty() {
            return Err(DragError::EmptyPayload);
        }
        tracing::debug!("Drag started with {} file(s)", ids.len());
        self.state = DragState::Dragging { ids };
        Ok(())
    }

    pub fn drag_over(&mut self, target: FolderId) -> Result<(), DragError> {
        let ids = match &self.state {
            DragState::Idle => return Err(self.invalid("drag over a folder")),
            DragState::Dragging { ids } | DragState::Hovering { ids, .. } => ids.clone(),
        };
        self.state = DragState::Hovering { ids, target };
        Ok(())
    }

    pub fn drag_leave(&mut self) -> Result<(), DragError> {
        match std::mem::take(&mut self.state) {
            DragState::Hovering { ids, .. } => {
                self.state = DragState::Dragging { ids };
                Ok(())
            }
            other => {
                self.state = other;
                Err(self.invalid("leave a folder"))
            }
        }
    }

    /// Resolve the drag into one move request and return to idle.
    pub fn drop_on(&mut self, target: FolderId) -> Result<MoveRequest, DragError> {
        match std::mem::take(&mut self.state) {
            DragState::Dragging { ids } | DragState::Hovering { ids, .. } => {
                tracing::debug!("Dropped {} file(s) on folder {}", ids.len(), target);
                Ok(MoveRequest {
                    file_ids: ids,
                    folder_id: Some(target),
                })
            }
            DragState::Idle => Err(self.invalid("drop")),
        }
    }

    /// Abandon any drag.
    pub fn drag_end(&mut self) {
        if self.is_active() {
            tracing::debug!("Drag cancelled");
        }
        self.state = DragState::Idle;
    }
}
