//! Concurrent upload transfers.
//!
//! Each enqueued file becomes a [`TransferTask`] driven by its own tokio
//! task. A semaphore bounds how many stream at once; the rest wait in
//! `pending`. Every state change is published as a [`TransferEvent`].

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use protocol::FileRecord;
use thiserror::Error;
use tokio::sync::{broadcast, Notify, Semaphore};
use tokio_util::sync::CancellationToken;

use super::task::{percent_of, FailureReason, TaskId, TransferStatus, TransferTask};
use crate::api::{ApiError, ProgressFn, StorageApi, UploadSource};
use crate::session::SessionHandle;

/// Size of the event broadcast buffer.
const EVENT_CHANNEL_SIZE: usize = 256;

/// Called once for every task that reaches a terminal state.
pub type SettledHook = Arc<dyn Fn(&TransferTask) + Send + Sync>;

/// Published on every task state change, in the order they happen.
#[derive(Debug, Clone, PartialEq)]
pub enum TransferEvent {
    Queued { id: TaskId, name: String, size: u64 },
    Started { id: TaskId },
    Progress { id: TaskId, progress: u8 },
    Completed { id: TaskId, record: FileRecord },
    Failed { id: TaskId, reason: FailureReason },
    Cancelled { id: TaskId },
}

impl TransferEvent {
    pub fn task_id(&self) -> &TaskId {
        match self {
            TransferEvent::Queued { id, .. }
            | TransferEvent::Started { id }
            | TransferEvent::Progress { id, .. }
            | TransferEvent::Completed { id, .. }
            | TransferEvent::Failed { id, .. }
            | TransferEvent::Cancelled { id } => id,
        }
    }
}

#[derive(Debug, Error, PartialEq)]
pub enum TransferError {
    #[error("upload task not found: {0}")]
    UnknownTask(TaskId),

    #[error("upload task {id} is {status:?} and cannot be retried")]
    NotRetryable { id: TaskId, status: TransferStatus },
}

enum Outcome {
    Completed(FileRecord),
    Failed(FailureReason),
    Cancelled,
}

struct Inner {
    api: Arc<dyn StorageApi>,
    session: SessionHandle,
    tasks: Mutex<Vec<TransferTask>>,
    cancels: Mutex<HashMap<TaskId, CancellationToken>>,
    permits: Arc<Semaphore>,
    events: broadcast::Sender<TransferEvent>,
    settled: Notify,
    on_settled: Option<SettledHook>,
}

/// Cloneable handle to the transfer queue.
#[derive(Clone)]
pub struct TransferManager {
    inner: Arc<Inner>,
}

impl TransferManager {
    pub fn new(
        api: Arc<dyn StorageApi>,
        session: SessionHandle,
        max_concurrent: usize,
        on_settled: Option<SettledHook>,
    ) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_SIZE);
        Self {
            inner: Arc::new(Inner {
                api,
                session,
                tasks: Mutex::new(Vec::new()),
                cancels: Mutex::new(HashMap::new()),
                permits: Arc::new(Semaphore::new(max_concurrent.max(1))),
                events,
                settled: Notify::new(),
                on_settled,
            }),
        }
    }

    /// Create one pending task per file and start each independently.
    ///
    /// Must be called from within a tokio runtime.
    pub fn enqueue(&self, sources: Vec<UploadSource>) -> Vec<TaskId> {
        sources
            .into_iter()
            .map(|source| self.spawn_task(source))
            .collect()
    }

    fn spawn_task(&self, source: UploadSource) -> TaskId {
        let task = TransferTask::new(source);
        let id = task.id.clone();
        let cancel = CancellationToken::new();
        self.inner.cancels().insert(id.clone(), cancel.clone());

        tracing::info!("Queued upload of {} ({} bytes) as {}", task.source.name, task.source.size, id);
        {
            let mut tasks = self.inner.tasks();
            self.inner.emit(TransferEvent::Queued {
                id: id.clone(),
                name: task.source.name.clone(),
                size: task.source.size,
            });
            tasks.push(task);
        }

        tokio::spawn(run(self.inner.clone(), id.clone(), cancel));
        id
    }

    /// Re-upload the source of a failed or cancelled task as a new task.
    pub fn retry(&self, id: &TaskId) -> Result<TaskId, TransferError> {
        let source = {
            let tasks = self.inner.tasks();
            let task = tasks
                .iter()
                .find(|t| &t.id == id)
                .ok_or_else(|| TransferError::UnknownTask(id.clone()))?;
            match task.status {
                TransferStatus::Failed | TransferStatus::Cancelled => task.source.clone(),
                status => {
                    return Err(TransferError::NotRetryable {
                        id: id.clone(),
                        status,
                    })
                }
            }
        };
        tracing::info!("Retrying upload {}", id);
        Ok(self.spawn_task(source))
    }

    /// Cancel a pending or active task.
    ///
    /// Returns `Ok(false)` if the task already finished.
    pub fn cancel(&self, id: &TaskId) -> Result<bool, TransferError> {
        if let Some(token) = self.inner.cancels().get(id) {
            tracing::debug!("Cancelling upload {}", id);
            token.cancel();
            return Ok(true);
        }
        if self.inner.tasks().iter().any(|t| &t.id == id) {
            Ok(false)
        } else {
            Err(TransferError::UnknownTask(id.clone()))
        }
    }

    /// Drop a settled task from the list.
    ///
    /// Returns false if the task is unknown or still pending or active.
    pub fn forget(&self, id: &TaskId) -> bool {
        let mut tasks = self.inner.tasks();
        match tasks
            .iter()
            .position(|t| &t.id == id && t.status.is_terminal())
        {
            Some(pos) => {
                tasks.remove(pos);
                tracing::debug!("Forgot upload task {}", id);
                true
            }
            None => false,
        }
    }

    /// All tasks in enqueue order.
    pub fn snapshot(&self) -> Vec<TransferTask> {
        self.inner.tasks().clone()
    }

    pub fn task(&self, id: &TaskId) -> Option<TransferTask> {
        self.inner.tasks().iter().find(|t| &t.id == id).cloned()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<TransferEvent> {
        self.inner.events.subscribe()
    }

    /// Whether any task is pending or active.
    pub fn is_busy(&self) -> bool {
        self.inner.tasks().iter().any(|t| !t.status.is_terminal())
    }

    /// Resolves once no task is pending or active.
    pub async fn wait_idle(&self) {
        loop {
            let settled = self.inner.settled.notified();
            if !self.is_busy() {
                return;
            }
            settled.await;
        }
    }
}

impl Inner {
    fn tasks(&self) -> MutexGuard<'_, Vec<TransferTask>> {
        self.tasks.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn cancels(&self) -> MutexGuard<'_, HashMap<TaskId, CancellationToken>> {
        self.cancels.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn emit(&self, event: TransferEvent) {
        // Ignore send errors - no receivers is fine
        let _ = self.events.send(event);
    }

    /// Move a pending task to active, returning its source.
    fn start(&self, id: &TaskId) -> Option<UploadSource> {
        let mut tasks = self.tasks();
        let task = tasks.iter_mut().find(|t| &t.id == id)?;
        if !task.start() {
            return None;
        }
        self.emit(TransferEvent::Started { id: id.clone() });
        Some(task.source.clone())
    }

    fn bind_session(&self, id: &TaskId, epoch: u64) {
        if let Some(task) = self.tasks().iter_mut().find(|t| &t.id == id) {
            task.session_epoch = Some(epoch);
        }
    }

    fn advance(&self, id: &TaskId, percent: u8) {
        let mut tasks = self.tasks();
        if let Some(task) = tasks.iter_mut().find(|t| &t.id == id) {
            if task.advance(percent) {
                self.emit(TransferEvent::Progress {
                    id: id.clone(),
                    progress: task.progress,
                });
            }
        }
    }

    fn finish(&self, id: &TaskId, outcome: Outcome) {
        let settled = {
            let mut tasks = self.tasks();
            let Some(task) = tasks.iter_mut().find(|t| &t.id == id) else {
                return;
            };
            let event = match outcome {
                Outcome::Completed(record) => task
                    .complete(record.clone())
                    .then(|| TransferEvent::Completed {
                        id: id.clone(),
                        record,
                    }),
                Outcome::Failed(reason) => task
                    .fail(reason.clone())
                    .then(|| TransferEvent::Failed {
                        id: id.clone(),
                        reason,
                    }),
                Outcome::Cancelled => task
                    .cancel()
                    .then(|| TransferEvent::Cancelled { id: id.clone() }),
            };
            let Some(event) = event else {
                return;
            };
            self.emit(event);
            task.clone()
        };
        self.cancels().remove(id);

        match settled.status {
            TransferStatus::Completed => {
                tracing::info!("Upload of {} completed", settled.source.name)
            }
            TransferStatus::Failed => tracing::error!(
                "Upload of {} failed: {:?}",
                settled.source.name,
                settled.failure
            ),
            _ => tracing::info!("Upload of {} cancelled", settled.source.name),
        }

        if let Some(hook) = &self.on_settled {
            hook(&settled);
        }
        self.settled.notify_waiters();
    }
}

async fn run(inner: Arc<Inner>, id: TaskId, cancel: CancellationToken) {
    let permit = tokio::select! {
        biased;
        _ = cancel.cancelled() => {
            inner.finish(&id, Outcome::Cancelled);
            return;
        }
        permit = inner.permits.clone().acquire_owned() => permit,
    };
    let _permit = match permit {
        Ok(permit) => permit,
        Err(e) => {
            inner.finish(
                &id,
                Outcome::Failed(FailureReason::Io(format!("transfer queue closed: {}", e))),
            );
            return;
        }
    };

    // The session may have ended while this task waited for a slot.
    let session = inner.session.snapshot();
    inner.bind_session(&id, session.epoch);
    let Some(token) = session.token().map(str::to_string) else {
        inner.finish(&id, Outcome::Failed(FailureReason::Unauthorized));
        return;
    };
    let Some(source) = inner.start(&id) else {
        return;
    };
    tracing::debug!("Upload {} started", id);

    let progress: ProgressFn = {
        let inner = inner.clone();
        let id = id.clone();
        Arc::new(move |sent, total| inner.advance(&id, percent_of(sent, total)))
    };

    let outcome = match inner
        .api
        .upload(&token, &source, progress, cancel.clone())
        .await
    {
        Ok(record) => Outcome::Completed(record),
        Err(ApiError::Cancelled) => Outcome::Cancelled,
        Err(e) => Outcome::Failed(e.into()),
    };
    inner.finish(&id, outcome);
}
