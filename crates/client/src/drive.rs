//! The engine facade.
//!
//! [`Drive`] owns one of each component around the cached file list and
//! implements the committed actions. Every mutating action is followed by a
//! full refetch; every authentication failure tears the session down.

use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use futures_util::future::join_all;
use protocol::{FileId, FileRecord, Folder, FolderId, MoveRequest, UsageStats};
use thiserror::Error;
use tokio::sync::{broadcast, mpsc, RwLock};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::api::{ApiError, StorageApi, UploadSource};
use crate::catalog::FileCatalog;
use crate::config::TransferConfig;
use crate::drag::{DragController, DragError, DragState};
use crate::notifications::NotificationCenter;
use crate::selection::SelectionModel;
use crate::session::{SessionGuard, SessionHandle};
use crate::transfer::{
    FailureReason, SettledHook, TaskId, TransferManager, TransferStatus, TransferTask,
};
use crate::validation::{validate_folder_name, ValidationErrors};

const EVENT_CHANNEL_SIZE: usize = 64;

struct Credentials {
    token: String,
    epoch: u64,
}

/// Signals for whoever renders the drive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DriveEvent {
    /// The session is gone; show the login screen.
    RedirectToLogin,
    /// The file list was replaced.
    CatalogRefreshed { count: usize },
}

#[derive(Debug, Error)]
pub enum DriveError {
    #[error(transparent)]
    Api(#[from] ApiError),

    #[error(transparent)]
    Drag(#[from] DragError),

    #[error(transparent)]
    Validation(#[from] ValidationErrors),

    #[error("cannot upload {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

impl DriveError {
    pub fn is_auth(&self) -> bool {
        matches!(self, DriveError::Api(e) if e.is_auth())
    }
}

pub struct Drive {
    api: Arc<dyn StorageApi>,
    session: SessionHandle,
    guard: Arc<SessionGuard>,
    catalog: RwLock<FileCatalog>,
    selection: Mutex<SelectionModel>,
    drag: Mutex<DragController>,
    transfers: TransferManager,
    notifications: NotificationCenter,
    events: broadcast::Sender<DriveEvent>,
    settled_worker: Mutex<Option<JoinHandle<()>>>,
}

impl Drive {
    /// Build the engine around `api` and `session`.
    ///
    /// Must be called from within a tokio runtime.
    pub fn new(
        api: Arc<dyn StorageApi>,
        session: SessionHandle,
        config: &TransferConfig,
    ) -> Arc<Self> {
        let (settled_tx, settled_rx) = mpsc::unbounded_channel::<TransferTask>();
        let hook: SettledHook = Arc::new(move |task: &TransferTask| {
            // Ignore send errors - the drive is shutting down
            let _ = settled_tx.send(task.clone());
        });

        let transfers = TransferManager::new(
            api.clone(),
            session.clone(),
            config.max_concurrent_uploads,
            Some(hook),
        );
        let notifications = NotificationCenter::attach(transfers.clone(), config.cancel_on_dismiss);
        let (events, _) = broadcast::channel(EVENT_CHANNEL_SIZE);

        Arc::new_cyclic(|weak: &Weak<Drive>| {
            let worker = tokio::spawn(settled_worker(weak.clone(), settled_rx));
            Drive {
                guard: Arc::new(SessionGuard::new(api.clone(), session.clone())),
                api,
                session,
                catalog: RwLock::new(FileCatalog::new()),
                selection: Mutex::new(SelectionModel::new()),
                drag: Mutex::new(DragController::new()),
                transfers,
                notifications,
                events,
                settled_worker: Mutex::new(Some(worker)),
            }
        })
    }

    pub fn session(&self) -> &SessionHandle {
        &self.session
    }

    pub fn guard(&self) -> &Arc<SessionGuard> {
        &self.guard
    }

    pub fn transfers(&self) -> &TransferManager {
        &self.transfers
    }

    pub fn notifications(&self) -> &NotificationCenter {
        &self.notifications
    }

    pub fn subscribe(&self) -> broadcast::Receiver<DriveEvent> {
        self.events.subscribe()
    }

    fn emit(&self, event: DriveEvent) {
        // Ignore send errors - no receivers is fine
        let _ = self.events.send(event);
    }

    fn selection(&self) -> MutexGuard<'_, SelectionModel> {
        self.selection.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn drag(&self) -> MutexGuard<'_, DragController> {
        self.drag.lock().unwrap_or_else(PoisonError::into_inner)
    }

    // ========================================================================
    // Session
    // ========================================================================

    /// Read the token together with the epoch it belongs to.
    fn credentials(&self) -> Result<Credentials, DriveError> {
        let snapshot = self.session.snapshot();
        match snapshot.token() {
            Some(token) => Ok(Credentials {
                token: token.to_string(),
                epoch: snapshot.epoch,
            }),
            None => Err(self.fail("request", snapshot.epoch, ApiError::Unauthorized)),
        }
    }

    /// Drop the session the rejected request was sent under and ask for a login.
    ///
    /// A rejection that arrives after the user logged out and back in belongs
    /// to a superseded session and leaves the current one alone.
    fn teardown(&self, epoch: u64) {
        match self.session.clear_if_epoch(epoch) {
            Ok(true) => self.emit(DriveEvent::RedirectToLogin),
            Ok(false) => {
                tracing::debug!("Ignoring rejection from superseded session (epoch {})", epoch)
            }
            Err(e) => {
                tracing::warn!("Failed to clear session: {}", e);
                self.emit(DriveEvent::RedirectToLogin);
            }
        }
    }

    /// Log an API failure, tear down on auth errors, and wrap it.
    fn fail(&self, action: &str, epoch: u64, err: ApiError) -> DriveError {
        match &err {
            ApiError::Unauthorized => {
                tracing::info!("{} rejected: session is no longer valid", action);
                self.teardown(epoch);
            }
            ApiError::Network(_) => tracing::warn!("{} failed: {}", action, err),
            _ => tracing::error!("{} failed: {}", action, err),
        }
        DriveError::Api(err)
    }

    // ========================================================================
    // Catalog
    // ========================================================================

    /// Refetch the full file list.
    pub async fn refresh(&self) -> Result<usize, DriveError> {
        let creds = self.credentials()?;
        let records = self
            .api
            .list_files(&creds.token)
            .await
            .map_err(|e| self.fail("List files", creds.epoch, e))?;
        Ok(self.apply_listing(records).await)
    }

    /// Replace the list with the server's search results.
    ///
    /// A blank query refetches everything.
    pub async fn search(&self, query: &str) -> Result<usize, DriveError> {
        let query = query.trim();
        if query.is_empty() {
            return self.refresh().await;
        }
        let creds = self.credentials()?;
        let records = self
            .api
            .search_files(&creds.token, query)
            .await
            .map_err(|e| self.fail("Search", creds.epoch, e))?;
        Ok(self.apply_listing(records).await)
    }

    async fn apply_listing(&self, records: Vec<FileRecord>) -> usize {
        let count = records.len();
        let visible = {
            let mut catalog = self.catalog.write().await;
            catalog.replace(records);
            catalog.visible_ids()
        };
        self.selection().reconcile(&visible);
        self.emit(DriveEvent::CatalogRefreshed { count });
        count
    }

    async fn refresh_after(&self, action: &str) {
        if let Err(e) = self.refresh().await {
            tracing::debug!("Refresh after {} failed: {}", action, e);
        }
    }

    /// Narrow the visible records locally without contacting the server.
    pub async fn set_filter(&self, query: Option<&str>) {
        let visible = {
            let mut catalog = self.catalog.write().await;
            catalog.set_filter(query);
            catalog.visible_ids()
        };
        self.selection().reconcile(&visible);
    }

    pub async fn visible(&self) -> Vec<FileRecord> {
        self.catalog
            .read()
            .await
            .visible()
            .into_iter()
            .cloned()
            .collect()
    }

    pub async fn file(&self, id: &FileId) -> Option<FileRecord> {
        self.catalog.read().await.get(id).cloned()
    }

    // ========================================================================
    // Selection
    // ========================================================================

    pub fn toggle(&self, id: &FileId, multi_select: bool) -> Vec<FileId> {
        self.selection().toggle(id, multi_select).to_vec()
    }

    pub async fn select_all(&self) -> Vec<FileId> {
        let visible = self.catalog.read().await.visible_ids();
        self.selection().select_all(&visible).to_vec()
    }

    pub fn clear_selection(&self) {
        self.selection().clear();
    }

    pub fn selected(&self) -> Vec<FileId> {
        self.selection().ids().to_vec()
    }

    /// Delete every selected file, then refetch.
    ///
    /// Deletes run concurrently. The selection is cleared only when all of
    /// them succeed. When several fail, an authentication failure is the
    /// one reported. Returns how many were deleted.
    pub async fn delete_selected(&self) -> Result<usize, DriveError> {
        let ids = self.selected();
        if ids.is_empty() {
            return Ok(0);
        }
        let creds = self.credentials()?;
        tracing::info!("Deleting {} file(s)", ids.len());

        let results = join_all(ids.iter().map(|id| self.api.delete_file(&creds.token, id))).await;
        let mut deleted = 0;
        let mut first_error: Option<ApiError> = None;
        for (id, result) in ids.iter().zip(results) {
            match result {
                Ok(()) => deleted += 1,
                Err(e) => {
                    tracing::debug!("Delete of {} failed: {}", id, e);
                    let replace = match &first_error {
                        None => true,
                        Some(prev) => e.is_auth() && !prev.is_auth(),
                    };
                    if replace {
                        first_error = Some(e);
                    }
                }
            }
        }

        if let Some(err) = first_error {
            let err = self.fail("Delete", creds.epoch, err);
            if !err.is_auth() && deleted > 0 {
                self.refresh_after("delete").await;
            }
            return Err(err);
        }

        self.refresh_after("delete").await;
        self.selection().clear();
        Ok(deleted)
    }

    /// Move every selected file into `folder`, or to the root for `None`.
    pub async fn move_selected(&self, folder: Option<FolderId>) -> Result<(), DriveError> {
        let ids = self.selected();
        if ids.is_empty() {
            return Ok(());
        }
        let request = MoveRequest {
            file_ids: ids,
            folder_id: folder,
        };
        self.send_move(&request).await?;
        self.selection().clear();
        Ok(())
    }

    async fn send_move(&self, request: &MoveRequest) -> Result<(), DriveError> {
        let creds = self.credentials()?;
        tracing::info!("Moving {} file(s)", request.file_ids.len());
        self.api
            .move_files(&creds.token, request)
            .await
            .map_err(|e| self.fail("Move", creds.epoch, e))?;
        self.refresh_after("move").await;
        Ok(())
    }

    // ========================================================================
    // Drag and drop
    // ========================================================================

    /// Start dragging `id`, carrying the whole selection if `id` is in it.
    pub fn drag_start(&self, id: &FileId) -> Result<Vec<FileId>, DriveError> {
        let payload = self.selection().drag_payload_for(id);
        self.drag().drag_start(payload.clone())?;
        Ok(payload)
    }

    pub fn drag_over(&self, target: FolderId) -> Result<(), DriveError> {
        Ok(self.drag().drag_over(target)?)
    }

    pub fn drag_leave(&self) -> Result<(), DriveError> {
        Ok(self.drag().drag_leave()?)
    }

    pub fn drag_end(&self) {
        self.drag().drag_end();
    }

    pub fn drag_state(&self) -> DragState {
        self.drag().state().clone()
    }

    /// Drop the dragged files on `target` and send one move request.
    ///
    /// The drag is back to idle before the request is sent.
    pub async fn drop_on(&self, target: FolderId) -> Result<(), DriveError> {
        let request = self.drag().drop_on(target)?;
        self.send_move(&request).await
    }

    // ========================================================================
    // Transfers
    // ========================================================================

    /// Queue local files for upload. Each becomes an independent task.
    ///
    /// Nothing is queued if any path cannot be read.
    pub fn upload(&self, paths: &[PathBuf]) -> Result<Vec<TaskId>, DriveError> {
        let sources = paths
            .iter()
            .map(|path| {
                UploadSource::from_path(path).map_err(|source| DriveError::Io {
                    path: path.clone(),
                    source,
                })
            })
            .collect::<Result<Vec<_>, _>>()?;
        tracing::info!("Queueing {} upload(s)", sources.len());
        Ok(self.transfers.enqueue(sources))
    }

    pub async fn download(&self, id: &FileId, dest: &Path) -> Result<u64, DriveError> {
        self.download_with_cancel(id, dest, CancellationToken::new())
            .await
    }

    pub async fn download_with_cancel(
        &self,
        id: &FileId,
        dest: &Path,
        cancel: CancellationToken,
    ) -> Result<u64, DriveError> {
        let creds = self.credentials()?;
        let written = self
            .api
            .download(&creds.token, id, dest, cancel)
            .await
            .map_err(|e| self.fail("Download", creds.epoch, e))?;
        tracing::info!("Downloaded {} ({} bytes) to {}", id, written, dest.display());
        Ok(written)
    }

    async fn on_settled(&self, task: TransferTask) {
        match (task.status, &task.failure) {
            (TransferStatus::Completed, _) => self.refresh_after("upload").await,
            (TransferStatus::Failed, Some(FailureReason::Unauthorized)) => {
                self.teardown(task.session_epoch.unwrap_or_else(|| self.session.epoch()))
            }
            _ => {}
        }
    }

    // ========================================================================
    // Folders and usage
    // ========================================================================

    pub async fn create_folder(&self, name: &str) -> Result<Folder, DriveError> {
        let name = validate_folder_name(name)?;
        let creds = self.credentials()?;
        let folder = self
            .api
            .create_folder(&creds.token, &name)
            .await
            .map_err(|e| self.fail("Create folder", creds.epoch, e))?;
        tracing::info!("Created folder {} ({})", folder.name, folder.id);
        self.refresh_after("create folder").await;
        Ok(folder)
    }

    pub async fn folders(&self) -> Result<Vec<Folder>, DriveError> {
        let creds = self.credentials()?;
        self.api
            .list_folders(&creds.token)
            .await
            .map_err(|e| self.fail("List folders", creds.epoch, e))
    }

    pub async fn stats(&self) -> Result<UsageStats, DriveError> {
        let creds = self.credentials()?;
        self.api
            .stats(&creds.token)
            .await
            .map_err(|e| self.fail("Usage stats", creds.epoch, e))
    }
}

impl Drop for Drive {
    fn drop(&mut self) {
        let worker = self
            .settled_worker
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner);
        if let Some(handle) = worker.take() {
            handle.abort();
        }
    }
}

/// Reacts to settled uploads one at a time.
async fn settled_worker(drive: Weak<Drive>, mut settled: mpsc::UnboundedReceiver<TransferTask>) {
    while let Some(task) = settled.recv().await {
        let Some(drive) = drive.upgrade() else {
            break;
        };
        drive.on_settled(task).await;
    }
    tracing::debug!("Upload settle worker stopped");
}
