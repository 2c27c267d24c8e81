//! reqwest-backed implementation of [`StorageApi`].

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures_util::StreamExt;
use protocol::{
    CreateFolderRequest, CreateFolderResponse, ErrorBody, FileId, FileListResponse, FileRecord,
    Folder, FolderListResponse, LoginRequest, LoginResponse, MoveRequest, SignupRequest,
    UsageStats, Validate,
};
use reqwest::multipart::{Form, Part};
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use tokio::io::AsyncWriteExt;
use tokio_util::io::ReaderStream;
use tokio_util::sync::CancellationToken;
use url::Url;

use super::{ApiError, ApiFuture, ApiResult, ProgressFn, StorageApi, UploadSource};
use crate::config::ServerConfig;

/// HTTP client for the storage server.
#[derive(Clone)]
pub struct HttpStorageApi {
    client: Client,
    base_url: Url,
    request_timeout: Duration,
    chunk_size: usize,
}

impl HttpStorageApi {
    /// Build a client for the configured server.
    ///
    /// `chunk_size` is the read size used when streaming upload bodies and
    /// therefore the granularity of progress reports.
    pub fn new(config: &ServerConfig, chunk_size: usize) -> ApiResult<Self> {
        let base_url = Url::parse(&config.base_url)
            .map_err(|e| ApiError::InvalidUrl(format!("{}: {}", config.base_url, e)))?;
        if base_url.cannot_be_a_base() {
            return Err(ApiError::InvalidUrl(config.base_url.clone()));
        }

        let client = Client::builder()
            .connect_timeout(Duration::from_secs(config.connect_timeout_secs))
            .build()
            .map_err(|e| ApiError::Network(e.to_string()))?;

        Ok(Self {
            client,
            base_url,
            request_timeout: Duration::from_secs(config.request_timeout_secs),
            chunk_size: chunk_size.max(1),
        })
    }

    /// Resolve an endpoint below the base URL, percent-encoding each segment.
    fn endpoint(&self, segments: &[&str]) -> ApiResult<Url> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| ApiError::InvalidUrl(self.base_url.to_string()))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    /// Send a non-streaming request and map the status.
    async fn send(&self, request: RequestBuilder) -> ApiResult<Response> {
        let response = request
            .timeout(self.request_timeout)
            .send()
            .await
            .map_err(network_error)?;
        check_status(response).await
    }

    async fn send_json<T>(&self, request: RequestBuilder) -> ApiResult<T>
    where
        T: DeserializeOwned + Validate,
    {
        let response = self.send(request).await?;
        let body = response.bytes().await.map_err(network_error)?;
        Ok(protocol::decode(&body)?)
    }
}

fn network_error(err: reqwest::Error) -> ApiError {
    ApiError::Network(err.to_string())
}

/// Map non-success statuses. 401 is the only status given meaning.
async fn check_status(response: Response) -> ApiResult<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    if status == StatusCode::UNAUTHORIZED {
        return Err(ApiError::Unauthorized);
    }

    let body = response.bytes().await.unwrap_or_default();
    let message = ErrorBody::parse(&body).unwrap_or_else(|| {
        status
            .canonical_reason()
            .unwrap_or("unknown status")
            .to_string()
    });
    Err(ApiError::Server {
        status: status.as_u16(),
        message,
    })
}

/// Sibling path the download is streamed into before the final rename.
fn partial_path(dest: &Path) -> PathBuf {
    let mut name = dest.as_os_str().to_owned();
    name.push(".part");
    PathBuf::from(name)
}

impl StorageApi for HttpStorageApi {
    fn verify_token(&self, token: &str) -> ApiFuture<'_, ()> {
        let token = token.to_string();
        Box::pin(async move {
            let url = self.endpoint(&["verify-token"])?;
            let response = self
                .client
                .get(url)
                .bearer_auth(&token)
                .timeout(self.request_timeout)
                .send()
                .await
                .map_err(network_error)?;

            // Anything but 200 means the token is not valid.
            if response.status() == StatusCode::OK {
                Ok(())
            } else {
                tracing::debug!("Token rejected with status {}", response.status());
                Err(ApiError::Unauthorized)
            }
        })
    }

    fn login(&self, request: &LoginRequest) -> ApiFuture<'_, LoginResponse> {
        let request = request.clone();
        Box::pin(async move {
            let url = self.endpoint(&["login"])?;
            self.send_json(self.client.post(url).json(&request)).await
        })
    }

    fn signup(&self, request: &SignupRequest) -> ApiFuture<'_, ()> {
        let request = request.clone();
        Box::pin(async move {
            let url = self.endpoint(&["signup"])?;
            self.send(self.client.post(url).json(&request)).await?;
            Ok(())
        })
    }

    fn list_files(&self, token: &str) -> ApiFuture<'_, Vec<FileRecord>> {
        let token = token.to_string();
        Box::pin(async move {
            let url = self.endpoint(&["files"])?;
            let list: FileListResponse =
                self.send_json(self.client.get(url).bearer_auth(&token)).await?;
            Ok(list.files)
        })
    }

    fn search_files(&self, token: &str, query: &str) -> ApiFuture<'_, Vec<FileRecord>> {
        let token = token.to_string();
        let query = query.to_string();
        Box::pin(async move {
            let url = self.endpoint(&["files", "search"])?;
            let request = self
                .client
                .get(url)
                .bearer_auth(&token)
                .query(&[("name", query.as_str())]);
            let list: FileListResponse = self.send_json(request).await?;
            Ok(list.files)
        })
    }

    fn delete_file(&self, token: &str, id: &FileId) -> ApiFuture<'_, ()> {
        let token = token.to_string();
        let id = id.clone();
        Box::pin(async move {
            let url = self.endpoint(&["files", id.as_str()])?;
            self.send(self.client.delete(url).bearer_auth(&token)).await?;
            Ok(())
        })
    }

    fn move_files(&self, token: &str, request: &MoveRequest) -> ApiFuture<'_, ()> {
        let token = token.to_string();
        let request = request.clone();
        Box::pin(async move {
            let url = self.endpoint(&["files", "move"])?;
            self.send(self.client.post(url).bearer_auth(&token).json(&request))
                .await?;
            Ok(())
        })
    }

    fn upload(
        &self,
        token: &str,
        source: &UploadSource,
        progress: ProgressFn,
        cancel: CancellationToken,
    ) -> ApiFuture<'_, FileRecord> {
        let token = token.to_string();
        let source = source.clone();
        Box::pin(async move {
            let url = self.endpoint(&["upload"])?;
            let file = tokio::fs::File::open(&source.path).await?;

            let total = source.size;
            let sent = Arc::new(AtomicU64::new(0));
            let stream = ReaderStream::with_capacity(file, self.chunk_size).map(move |chunk| {
                if let Ok(bytes) = &chunk {
                    let so_far =
                        sent.fetch_add(bytes.len() as u64, Ordering::Relaxed) + bytes.len() as u64;
                    progress(so_far, total);
                }
                chunk
            });

            let part = Part::stream_with_length(reqwest::Body::wrap_stream(stream), total)
                .file_name(source.name.clone())
                .mime_str("application/octet-stream")
                .map_err(network_error)?;
            let form = Form::new().part("file", part);

            // No whole-request timeout: large bodies legitimately take long.
            let request = self
                .client
                .post(url)
                .bearer_auth(&token)
                .multipart(form)
                .send();

            let response = tokio::select! {
                _ = cancel.cancelled() => return Err(ApiError::Cancelled),
                result = request => result.map_err(network_error)?,
            };
            let response = check_status(response).await?;
            let body = response.bytes().await.map_err(network_error)?;
            Ok(protocol::decode::<FileRecord>(&body)?)
        })
    }

    fn download(
        &self,
        token: &str,
        id: &FileId,
        dest: &Path,
        cancel: CancellationToken,
    ) -> ApiFuture<'_, u64> {
        let token = token.to_string();
        let id = id.clone();
        let dest = dest.to_path_buf();
        Box::pin(async move {
            let url = self.endpoint(&["files", id.as_str(), "download"])?;
            let request = self.client.get(url).bearer_auth(&token).send();
            let response = tokio::select! {
                _ = cancel.cancelled() => return Err(ApiError::Cancelled),
                result = request => result.map_err(network_error)?,
            };
            let response = check_status(response).await?;

            let tmp = partial_path(&dest);
            let mut file = tokio::fs::File::create(&tmp).await?;
            let mut stream = Box::pin(response.bytes_stream());

            let copied: ApiResult<u64> = async {
                let mut written = 0u64;
                loop {
                    let next = tokio::select! {
                        _ = cancel.cancelled() => return Err(ApiError::Cancelled),
                        next = stream.next() => next,
                    };
                    match next {
                        Some(Ok(bytes)) => {
                            file.write_all(&bytes).await?;
                            written += bytes.len() as u64;
                        }
                        Some(Err(e)) => return Err(network_error(e)),
                        None => break,
                    }
                }
                file.flush().await?;
                file.sync_all().await?;
                Ok(written)
            }
            .await;
            drop(file);

            match copied {
                Ok(written) => {
                    tokio::fs::rename(&tmp, &dest).await?;
                    tracing::debug!("Downloaded {} ({} bytes) to {:?}", id, written, dest);
                    Ok(written)
                }
                Err(e) => {
                    if let Err(cleanup) = tokio::fs::remove_file(&tmp).await {
                        tracing::warn!("Failed to remove partial download {:?}: {}", tmp, cleanup);
                    }
                    Err(e)
                }
            }
        })
    }

    fn create_folder(&self, token: &str, name: &str) -> ApiFuture<'_, Folder> {
        let token = token.to_string();
        let request = CreateFolderRequest {
            name: name.to_string(),
        };
        Box::pin(async move {
            let url = self.endpoint(&["folders"])?;
            let created: CreateFolderResponse = self
                .send_json(self.client.post(url).bearer_auth(&token).json(&request))
                .await?;
            Ok(created.into_folder(&request.name))
        })
    }

    fn list_folders(&self, token: &str) -> ApiFuture<'_, Vec<Folder>> {
        let token = token.to_string();
        Box::pin(async move {
            let url = self.endpoint(&["folders"])?;
            let list: FolderListResponse =
                self.send_json(self.client.get(url).bearer_auth(&token)).await?;
            Ok(list.folders)
        })
    }

    fn stats(&self, token: &str) -> ApiFuture<'_, UsageStats> {
        let token = token.to_string();
        Box::pin(async move {
            let url = self.endpoint(&["stats"])?;
            self.send_json(self.client.get(url).bearer_auth(&token))
                .await
        })
    }
}
