//! User-visible upload notifications.
//!
//! One entry per transfer task, appended in enqueue order and kept after the
//! task settles until the user dismisses it. Dismissing a settled task also
//! drops it from the [`TransferManager`], so neither side grows without bound.

use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;

use crate::transfer::{
    FailureReason, TaskId, TransferEvent, TransferManager, TransferStatus, TransferTask,
};

/// A single notification entry.
#[derive(Debug, Clone, PartialEq)]
pub struct Notification {
    pub task_id: TaskId,
    pub file_name: String,
    pub size: u64,
    pub progress: u8,
    pub status: TransferStatus,
    pub failure: Option<FailureReason>,
}

impl Notification {
    fn from_task(task: &TransferTask) -> Self {
        Self {
            task_id: task.id.clone(),
            file_name: task.source.name.clone(),
            size: task.source.size,
            progress: task.progress,
            status: task.status,
            failure: task.failure.clone(),
        }
    }

    pub fn label(&self) -> String {
        match self.status {
            TransferStatus::Pending | TransferStatus::Active => {
                format!("Uploading... {}%", self.progress)
            }
            TransferStatus::Completed => "Upload completed".to_string(),
            TransferStatus::Failed => "Upload failed".to_string(),
            TransferStatus::Cancelled => "Upload cancelled".to_string(),
        }
    }
}

#[derive(Default)]
struct State {
    entries: Vec<Notification>,
    /// Dismissed tasks that have not settled yet.
    dismissed: HashSet<TaskId>,
}

impl State {
    fn entry_mut(&mut self, id: &TaskId) -> Option<&mut Notification> {
        self.entries.iter_mut().find(|n| &n.task_id == id)
    }

    /// Returns the id of a dismissed task that just settled.
    fn apply(&mut self, event: &TransferEvent) -> Option<TaskId> {
        let id = event.task_id();
        if self.dismissed.contains(id) {
            let settled = matches!(
                event,
                TransferEvent::Completed { .. }
                    | TransferEvent::Failed { .. }
                    | TransferEvent::Cancelled { .. }
            );
            if settled {
                self.dismissed.remove(id);
                return Some(id.clone());
            }
            return None;
        }
        match event {
            TransferEvent::Queued { id, name, size } => {
                if self.entry_mut(id).is_none() {
                    self.entries.push(Notification {
                        task_id: id.clone(),
                        file_name: name.clone(),
                        size: *size,
                        progress: 0,
                        status: TransferStatus::Pending,
                        failure: None,
                    });
                }
            }
            TransferEvent::Started { id } => {
                if let Some(n) = self.entry_mut(id) {
                    if n.status == TransferStatus::Pending {
                        n.status = TransferStatus::Active;
                    }
                }
            }
            TransferEvent::Progress { id, progress } => {
                if let Some(n) = self.entry_mut(id) {
                    if !n.status.is_terminal() && *progress > n.progress {
                        n.progress = *progress;
                    }
                }
            }
            TransferEvent::Completed { id, .. } => {
                if let Some(n) = self.entry_mut(id) {
                    n.status = TransferStatus::Completed;
                    n.progress = 100;
                }
            }
            TransferEvent::Failed { id, reason } => {
                if let Some(n) = self.entry_mut(id) {
                    if !n.status.is_terminal() {
                        n.status = TransferStatus::Failed;
                        n.failure = Some(reason.clone());
                    }
                }
            }
            TransferEvent::Cancelled { id } => {
                if let Some(n) = self.entry_mut(id) {
                    if !n.status.is_terminal() {
                        n.status = TransferStatus::Cancelled;
                    }
                }
            }
        }
        None
    }

    /// Bring entries in line with the manager after missed events.
    ///
    /// Returns dismissed tasks that settled in the meantime.
    fn resync(&mut self, tasks: &[TransferTask]) -> Vec<TaskId> {
        let mut settled = Vec::new();
        for task in tasks {
            if self.dismissed.contains(&task.id) {
                if task.status.is_terminal() {
                    self.dismissed.remove(&task.id);
                    settled.push(task.id.clone());
                }
                continue;
            }
            match self.entry_mut(&task.id) {
                Some(n) => *n = Notification::from_task(task),
                None => self.entries.push(Notification::from_task(task)),
            }
        }
        self.dismissed.retain(|id| tasks.iter().any(|t| &t.id == id));
        settled
    }
}

struct Shared {
    state: Mutex<State>,
    transfers: TransferManager,
    cancel_on_dismiss: bool,
    pump: Mutex<Option<JoinHandle<()>>>,
}

impl Shared {
    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn apply(&self, event: &TransferEvent) {
        let settled = self.state().apply(event);
        if let Some(id) = settled {
            self.transfers.forget(&id);
        }
    }

    fn resync(&self) {
        let settled = {
            // Snapshot under the state lock so a concurrent dismiss cannot
            // forget a task this resync would then re-add.
            let mut state = self.state();
            state.resync(&self.transfers.snapshot())
        };
        for id in settled {
            self.transfers.forget(&id);
        }
    }
}

impl Drop for Shared {
    fn drop(&mut self) {
        let pump = self.pump.get_mut().unwrap_or_else(PoisonError::into_inner);
        if let Some(handle) = pump.take() {
            handle.abort();
        }
    }
}

/// Projects transfer tasks into dismissible entries.
#[derive(Clone)]
pub struct NotificationCenter {
    shared: Arc<Shared>,
}

impl NotificationCenter {
    /// Create a center without following the manager's events.
    ///
    /// Entries only change through [`NotificationCenter::apply`].
    pub fn detached(transfers: TransferManager, cancel_on_dismiss: bool) -> Self {
        Self {
            shared: Arc::new(Shared {
                state: Mutex::new(State::default()),
                transfers,
                cancel_on_dismiss,
                pump: Mutex::new(None),
            }),
        }
    }

    /// Create a center that follows `transfers` from now on.
    ///
    /// Tasks that already exist are picked up from the manager's snapshot.
    /// Must be called from within a tokio runtime.
    pub fn attach(transfers: TransferManager, cancel_on_dismiss: bool) -> Self {
        let mut events = transfers.subscribe();
        let center = Self::detached(transfers, cancel_on_dismiss);
        center.shared.resync();

        let weak: Weak<Shared> = Arc::downgrade(&center.shared);
        let handle = tokio::spawn(async move {
            loop {
                let received = events.recv().await;
                let Some(shared) = weak.upgrade() else {
                    break;
                };
                match received {
                    Ok(event) => shared.apply(&event),
                    Err(RecvError::Lagged(missed)) => {
                        tracing::warn!("Notification pump lagged by {} events, resyncing", missed);
                        shared.resync();
                    }
                    Err(RecvError::Closed) => break,
                }
            }
            tracing::debug!("Notification pump stopped");
        });
        *center
            .shared
            .pump
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(handle);
        center
    }

    /// Apply a single transfer event.
    pub fn apply(&self, event: &TransferEvent) {
        self.shared.apply(event);
    }

    /// Remove the entry for `id`. Returns false if there was none.
    ///
    /// An in-flight transfer is cancelled as well when configured to. A
    /// settled one is dropped from the transfer manager.
    pub fn dismiss(&self, id: &TaskId) -> bool {
        let (removed, in_flight) = {
            let mut state = self.shared.state();
            let Some(pos) = state.entries.iter().position(|n| &n.task_id == id) else {
                return false;
            };
            let removed = state.entries.remove(pos);
            // The manager is authoritative; entries fed through `apply` for
            // tasks it never ran fall back to their own status.
            let in_flight = match self.shared.transfers.task(id) {
                Some(task) => !task.status.is_terminal(),
                None => !removed.status.is_terminal(),
            };
            if in_flight {
                state.dismissed.insert(id.clone());
            }
            (removed, in_flight)
        };
        tracing::debug!("Dismissed notification for {}", removed.file_name);

        if !in_flight {
            self.shared.transfers.forget(id);
        } else if self.shared.cancel_on_dismiss {
            if let Err(e) = self.shared.transfers.cancel(id) {
                tracing::debug!("Nothing to cancel for dismissed task: {}", e);
            }
        }
        true
    }

    pub fn entries(&self) -> Vec<Notification> {
        self.shared.state().entries.clone()
    }

    pub fn get(&self, id: &TaskId) -> Option<Notification> {
        self.shared
            .state()
            .entries
            .iter()
            .find(|n| &n.task_id == id)
            .cloned()
    }

    /// `(completed, total)` over the visible entries.
    pub fn summary(&self) -> (usize, usize) {
        let state = self.shared.state();
        let completed = state
            .entries
            .iter()
            .filter(|n| n.status == TransferStatus::Completed)
            .count();
        (completed, state.entries.len())
    }
}
