//! Transport to the storage server.
//!
//! [`StorageApi`] abstracts the REST contract so the engine can run against
//! the real HTTP client ([`HttpStorageApi`]) or a scripted double in tests.
//! Every authenticated call takes the bearer token explicitly; callers read
//! it from the [`SessionHandle`](crate::session::SessionHandle) at call time.

mod http;
#[cfg(test)]
pub(crate) mod mock;

use std::fs;
use std::future::Future;
use std::io;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::sync::Arc;

use protocol::{
    FileId, FileRecord, Folder, LoginRequest, LoginResponse, MoveRequest, ProtocolError,
    SignupRequest, UsageStats,
};
use thiserror::Error;
use tokio_util::sync::CancellationToken;

pub use http::HttpStorageApi;

/// Errors surfaced by the transport.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ApiError {
    /// Missing token, HTTP 401, or failed verification.
    #[error("not authenticated")]
    Unauthorized,

    /// The request never produced an HTTP response.
    #[error("network error: {0}")]
    Network(String),

    /// The server answered with a non-success status.
    #[error("server rejected request ({status}): {message}")]
    Server { status: u16, message: String },

    /// The response body did not match the wire schema.
    #[error("invalid response: {0}")]
    Schema(String),

    /// The operation was cancelled locally.
    #[error("operation cancelled")]
    Cancelled,

    /// A local file could not be read or written.
    #[error("I/O error: {0}")]
    Io(String),

    /// The configured server URL cannot address API endpoints.
    #[error("invalid server URL: {0}")]
    InvalidUrl(String),
}

impl ApiError {
    /// Whether this error must tear the session down.
    pub fn is_auth(&self) -> bool {
        matches!(self, ApiError::Unauthorized)
    }
}

impl From<ProtocolError> for ApiError {
    fn from(err: ProtocolError) -> Self {
        ApiError::Schema(err.to_string())
    }
}

impl From<io::Error> for ApiError {
    fn from(err: io::Error) -> Self {
        ApiError::Io(err.to_string())
    }
}

/// Result type for transport operations.
pub type ApiResult<T> = Result<T, ApiError>;

/// Boxed future returned by [`StorageApi`] methods.
pub type ApiFuture<'a, T> = Pin<Box<dyn Future<Output = ApiResult<T>> + Send + 'a>>;

/// Progress callback for streamed uploads: `(bytes_sent, bytes_total)`.
pub type ProgressFn = Arc<dyn Fn(u64, u64) + Send + Sync>;

/// A local file picked for upload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadSource {
    /// Path on the local filesystem.
    pub path: PathBuf,
    /// Name sent to the server.
    pub name: String,
    /// Size in bytes at the time it was picked.
    pub size: u64,
}

impl UploadSource {
    /// Describe a local file, reading its size from the filesystem.
    pub fn from_path(path: impl AsRef<Path>) -> io::Result<Self> {
        let path = path.as_ref();
        let metadata = fs::metadata(path)?;
        if !metadata.is_file() {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("{} is not a regular file", path.display()),
            ));
        }
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .ok_or_else(|| {
                io::Error::new(
                    io::ErrorKind::InvalidInput,
                    format!("{} has no file name", path.display()),
                )
            })?;

        Ok(Self {
            path: path.to_path_buf(),
            name,
            size: metadata.len(),
        })
    }
}

/// The storage server's REST contract.
///
/// Methods return boxed futures so the trait stays object safe and can be
/// shared as `Arc<dyn StorageApi>` across spawned tasks.
pub trait StorageApi: Send + Sync {
    /// `GET /verify-token`. `Ok` only on HTTP 200.
    fn verify_token(&self, token: &str) -> ApiFuture<'_, ()>;

    /// `POST /login`.
    fn login(&self, request: &LoginRequest) -> ApiFuture<'_, LoginResponse>;

    /// `POST /signup`.
    fn signup(&self, request: &SignupRequest) -> ApiFuture<'_, ()>;

    /// `GET /files`.
    fn list_files(&self, token: &str) -> ApiFuture<'_, Vec<FileRecord>>;

    /// `GET /files/search?name=<query>`.
    fn search_files(&self, token: &str, query: &str) -> ApiFuture<'_, Vec<FileRecord>>;

    /// `DELETE /files/{id}`.
    fn delete_file(&self, token: &str, id: &FileId) -> ApiFuture<'_, ()>;

    /// `POST /files/move`.
    fn move_files(&self, token: &str, request: &MoveRequest) -> ApiFuture<'_, ()>;

    /// `POST /upload`, streaming the file as the multipart `file` field.
    ///
    /// `progress` is called after each chunk is handed to the transport.
    /// Cancelling `cancel` aborts the request with [`ApiError::Cancelled`].
    fn upload(
        &self,
        token: &str,
        source: &UploadSource,
        progress: ProgressFn,
        cancel: CancellationToken,
    ) -> ApiFuture<'_, FileRecord>;

    /// `GET /files/{id}/download`, written to `dest`. Returns bytes written.
    fn download(
        &self,
        token: &str,
        id: &FileId,
        dest: &Path,
        cancel: CancellationToken,
    ) -> ApiFuture<'_, u64>;

    /// `POST /folders`.
    fn create_folder(&self, token: &str, name: &str) -> ApiFuture<'_, Folder>;

    /// `GET /folders`.
    fn list_folders(&self, token: &str) -> ApiFuture<'_, Vec<Folder>>;

    /// `GET /stats`.
    fn stats(&self, token: &str) -> ApiFuture<'_, UsageStats>;
}
