//! Scripted [`StorageApi`] double for engine tests.

use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::{Arc, Mutex};

use protocol::{
    FileId, FileRecord, Folder, FolderId, LoginRequest, LoginResponse, MoveRequest,
    SignupRequest, UsageStats, User, UserId,
};
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;

use super::{ApiError, ApiFuture, ProgressFn, StorageApi, UploadSource};

/// One recorded call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Call {
    Verify(String),
    Login(String),
    Signup(String),
    ListFiles,
    Search(String),
    Delete(FileId),
    Move(MoveRequest),
    Upload(String),
    Download(FileId),
    CreateFolder(String),
    ListFolders,
    Stats,
}

#[derive(Default)]
struct Script {
    files: Vec<FileRecord>,
    list_error: Option<ApiError>,
    move_error: Option<ApiError>,
    delete_errors: HashMap<FileId, ApiError>,
    upload_errors: HashMap<String, ApiError>,
    valid_tokens: HashSet<String>,
    verify_error: Option<ApiError>,
    login: Option<Result<LoginResponse, ApiError>>,
    verify_gate: Option<Arc<Semaphore>>,
    upload_gate: Option<Arc<Semaphore>>,
}

/// Records every call and answers from a script.
#[derive(Default)]
pub(crate) struct MockStorageApi {
    calls: Mutex<Vec<Call>>,
    script: Mutex<Script>,
}

pub(crate) fn record(id: &str, name: &str) -> FileRecord {
    FileRecord {
        id: FileId::new(id),
        name: name.to_string(),
        size: 0,
        mime_type: String::new(),
        created_at: None,
        tags: Vec::new(),
        owner: None,
        thumbnail: None,
    }
}

impl MockStorageApi {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    pub(crate) fn count(&self, pred: impl Fn(&Call) -> bool) -> usize {
        self.calls.lock().unwrap().iter().filter(|c| pred(c)).count()
    }

    pub(crate) fn set_files(&self, files: Vec<FileRecord>) {
        self.script.lock().unwrap().files = files;
    }

    pub(crate) fn fail_list(&self, err: Option<ApiError>) {
        self.script.lock().unwrap().list_error = err;
    }

    pub(crate) fn fail_move(&self, err: ApiError) {
        self.script.lock().unwrap().move_error = Some(err);
    }

    pub(crate) fn fail_delete(&self, id: &str, err: ApiError) {
        self.script
            .lock()
            .unwrap()
            .delete_errors
            .insert(FileId::new(id), err);
    }

    pub(crate) fn fail_upload(&self, name: &str, err: ApiError) {
        self.script
            .lock()
            .unwrap()
            .upload_errors
            .insert(name.to_string(), err);
    }

    pub(crate) fn accept_token(&self, token: &str) {
        self.script
            .lock()
            .unwrap()
            .valid_tokens
            .insert(token.to_string());
    }

    pub(crate) fn fail_verify(&self, err: ApiError) {
        self.script.lock().unwrap().verify_error = Some(err);
    }

    pub(crate) fn set_login(&self, result: Result<LoginResponse, ApiError>) {
        self.script.lock().unwrap().login = Some(result);
    }

    /// Verification blocks until a permit is added to the returned gate.
    pub(crate) fn gate_verify(&self) -> Arc<Semaphore> {
        let gate = Arc::new(Semaphore::new(0));
        self.script.lock().unwrap().verify_gate = Some(gate.clone());
        gate
    }

    /// Uploads block after streaming until a permit is added to the gate.
    pub(crate) fn gate_uploads(&self) -> Arc<Semaphore> {
        let gate = Arc::new(Semaphore::new(0));
        self.script.lock().unwrap().upload_gate = Some(gate.clone());
        gate
    }

    fn log(&self, call: Call) {
        self.calls.lock().unwrap().push(call);
    }
}

async fn pass(gate: Option<Arc<Semaphore>>) {
    if let Some(gate) = gate {
        if let Ok(permit) = gate.acquire().await {
            permit.forget();
        }
    }
}

impl StorageApi for MockStorageApi {
    fn verify_token(&self, token: &str) -> ApiFuture<'_, ()> {
        self.log(Call::Verify(token.to_string()));
        let token = token.to_string();
        Box::pin(async move {
            let gate = self.script.lock().unwrap().verify_gate.clone();
            pass(gate).await;
            let script = self.script.lock().unwrap();
            if let Some(err) = &script.verify_error {
                return Err(err.clone());
            }
            if script.valid_tokens.contains(&token) {
                Ok(())
            } else {
                Err(ApiError::Unauthorized)
            }
        })
    }

    fn login(&self, request: &LoginRequest) -> ApiFuture<'_, LoginResponse> {
        self.log(Call::Login(request.username.clone()));
        let username = request.username.clone();
        Box::pin(async move {
            let scripted = self.script.lock().unwrap().login.clone();
            scripted.unwrap_or_else(|| {
                Ok(LoginResponse {
                    token: format!("token-{}", username),
                    user: User {
                        id: UserId::new("1"),
                        username,
                        email: String::new(),
                    },
                })
            })
        })
    }

    fn signup(&self, request: &SignupRequest) -> ApiFuture<'_, ()> {
        self.log(Call::Signup(request.username.clone()));
        Box::pin(async move { Ok(()) })
    }

    fn list_files(&self, _token: &str) -> ApiFuture<'_, Vec<FileRecord>> {
        self.log(Call::ListFiles);
        Box::pin(async move {
            let script = self.script.lock().unwrap();
            match &script.list_error {
                Some(err) => Err(err.clone()),
                None => Ok(script.files.clone()),
            }
        })
    }

    fn search_files(&self, _token: &str, query: &str) -> ApiFuture<'_, Vec<FileRecord>> {
        self.log(Call::Search(query.to_string()));
        let query = query.to_string();
        Box::pin(async move {
            let script = self.script.lock().unwrap();
            Ok(script
                .files
                .iter()
                .filter(|f| f.matches(&query))
                .cloned()
                .collect())
        })
    }

    fn delete_file(&self, _token: &str, id: &FileId) -> ApiFuture<'_, ()> {
        self.log(Call::Delete(id.clone()));
        let id = id.clone();
        Box::pin(async move {
            let mut script = self.script.lock().unwrap();
            if let Some(err) = script.delete_errors.get(&id) {
                return Err(err.clone());
            }
            script.files.retain(|f| f.id != id);
            Ok(())
        })
    }

    fn move_files(&self, _token: &str, request: &MoveRequest) -> ApiFuture<'_, ()> {
        self.log(Call::Move(request.clone()));
        Box::pin(async move {
            match &self.script.lock().unwrap().move_error {
                Some(err) => Err(err.clone()),
                None => Ok(()),
            }
        })
    }

    fn upload(
        &self,
        _token: &str,
        source: &UploadSource,
        progress: ProgressFn,
        cancel: CancellationToken,
    ) -> ApiFuture<'_, FileRecord> {
        self.log(Call::Upload(source.name.clone()));
        let source = source.clone();
        Box::pin(async move {
            let total = source.size.max(4);
            for step in 1..=4u64 {
                if cancel.is_cancelled() {
                    return Err(ApiError::Cancelled);
                }
                progress(total * step / 4, total);
                tokio::task::yield_now().await;
            }

            let gate = self.script.lock().unwrap().upload_gate.clone();
            tokio::select! {
                _ = cancel.cancelled() => return Err(ApiError::Cancelled),
                _ = pass(gate) => {}
            }

            let scripted = self
                .script
                .lock()
                .unwrap()
                .upload_errors
                .get(&source.name)
                .cloned();
            match scripted {
                Some(err) => Err(err),
                None => {
                    let mut created = record(&format!("up-{}", source.name), &source.name);
                    created.size = source.size;
                    Ok(created)
                }
            }
        })
    }

    fn download(
        &self,
        _token: &str,
        id: &FileId,
        dest: &Path,
        _cancel: CancellationToken,
    ) -> ApiFuture<'_, u64> {
        self.log(Call::Download(id.clone()));
        let dest = dest.to_path_buf();
        Box::pin(async move {
            tokio::fs::write(&dest, b"data").await?;
            Ok(4)
        })
    }

    fn create_folder(&self, _token: &str, name: &str) -> ApiFuture<'_, Folder> {
        self.log(Call::CreateFolder(name.to_string()));
        let name = name.to_string();
        Box::pin(async move {
            Ok(Folder {
                id: FolderId::new("folder-1"),
                name,
                parent_id: None,
                created_at: None,
            })
        })
    }

    fn list_folders(&self, _token: &str) -> ApiFuture<'_, Vec<Folder>> {
        self.log(Call::ListFolders);
        Box::pin(async move { Ok(Vec::new()) })
    }

    fn stats(&self, _token: &str) -> ApiFuture<'_, UsageStats> {
        self.log(Call::Stats);
        Box::pin(async move { Ok(UsageStats::default()) })
    }
}
