//! REST message definitions for FileDeck.
//!
//! This module defines the request and response bodies exchanged with the
//! storage server. Responses are decoded through [`decode`], which runs serde
//! deserialization followed by the [`Validate`] checks for the target type, so
//! nothing past the HTTP boundary ever sees a half-formed payload.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer, Serialize};

use crate::error::{ProtocolError, Result};
use crate::ids::{FileId, FolderId, UserId};

/// Treats an explicit JSON `null` the same as a missing field.
fn null_as_default<'de, D, T>(deserializer: D) -> std::result::Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

/// Post-deserialization schema checks for a response body.
pub trait Validate {
    /// Returns an error if the decoded value violates the wire schema.
    fn validate(&self) -> Result<()>;
}

/// Decode and validate a response body.
pub fn decode<T>(body: &[u8]) -> Result<T>
where
    T: DeserializeOwned + Validate,
{
    let value: T = serde_json::from_slice(body)?;
    value.validate()?;
    Ok(value)
}

// ============================================================================
// File Records
// ============================================================================

/// Server-owned descriptor of a stored file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileRecord {
    /// File identifier.
    #[serde(alias = "file_id")]
    pub id: FileId,
    /// Display name.
    #[serde(alias = "filename")]
    pub name: String,
    /// Size in bytes.
    #[serde(default)]
    pub size: u64,
    /// MIME type as detected by the server.
    #[serde(rename = "type", alias = "mime", default)]
    pub mime_type: String,
    /// Creation time.
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
    /// User-assigned tags.
    #[serde(default, deserialize_with = "null_as_default")]
    pub tags: Vec<String>,
    /// Owner display name, when shared.
    #[serde(default)]
    pub owner: Option<String>,
    /// Thumbnail reference, when the server generated one.
    #[serde(default)]
    pub thumbnail: Option<String>,
}

impl FileRecord {
    /// Case-insensitive match against the name or any tag.
    pub fn matches(&self, query: &str) -> bool {
        let query = query.to_lowercase();
        self.name.to_lowercase().contains(&query)
            || self.tags.iter().any(|t| t.to_lowercase().contains(&query))
    }
}

impl Validate for FileRecord {
    fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(ProtocolError::InvalidField {
                field: "name",
                reason: format!("file {} has an empty name", self.id),
            });
        }
        Ok(())
    }
}

/// Response body of `GET /files` and `GET /files/search`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileListResponse {
    /// Matching files. The server emits `null` when there are none.
    #[serde(default, deserialize_with = "null_as_default")]
    pub files: Vec<FileRecord>,
}

impl Validate for FileListResponse {
    fn validate(&self) -> Result<()> {
        self.files.iter().try_for_each(Validate::validate)
    }
}

/// Request body of `POST /files/move`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MoveRequest {
    /// Files to relocate.
    pub file_ids: Vec<FileId>,
    /// Destination folder; `None` moves to the root.
    pub folder_id: Option<FolderId>,
}

// ============================================================================
// Folders
// ============================================================================

/// A folder owned by the current user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Folder {
    /// Folder identifier.
    pub id: FolderId,
    /// Display name.
    pub name: String,
    /// Parent folder, `None` at the root.
    #[serde(default)]
    pub parent_id: Option<FolderId>,
    /// Creation time.
    #[serde(default, alias = "created")]
    pub created_at: Option<DateTime<Utc>>,
}

impl Validate for Folder {
    fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(ProtocolError::InvalidField {
                field: "name",
                reason: format!("folder {} has an empty name", self.id),
            });
        }
        Ok(())
    }
}

/// Response body of `GET /folders`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FolderListResponse {
    /// All folders.
    #[serde(default, deserialize_with = "null_as_default")]
    pub folders: Vec<Folder>,
}

impl Validate for FolderListResponse {
    fn validate(&self) -> Result<()> {
        self.folders.iter().try_for_each(Validate::validate)
    }
}

/// Request body of `POST /folders`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateFolderRequest {
    /// Name of the new folder.
    pub name: String,
}

/// Response body of `POST /folders`.
///
/// Some servers echo the whole folder; others answer with just
/// `{"folder_id": N}`, in which case the requested name fills the gap.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct CreateFolderResponse {
    #[serde(alias = "folder_id")]
    pub id: FolderId,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub parent_id: Option<FolderId>,
    #[serde(default, alias = "created")]
    pub created_at: Option<DateTime<Utc>>,
}

impl CreateFolderResponse {
    pub fn into_folder(self, requested_name: &str) -> Folder {
        Folder {
            id: self.id,
            name: self
                .name
                .filter(|n| !n.trim().is_empty())
                .unwrap_or_else(|| requested_name.to_string()),
            parent_id: self.parent_id,
            created_at: self.created_at,
        }
    }
}

impl Validate for CreateFolderResponse {
    fn validate(&self) -> Result<()> {
        if self.id.as_str().is_empty() {
            return Err(ProtocolError::MissingField {
                field: "id",
                context: "created folder",
            });
        }
        Ok(())
    }
}

// ============================================================================
// Usage Statistics
// ============================================================================

/// Per-category storage usage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CategoryUsage {
    /// Category label (e.g. "Documents").
    pub name: String,
    /// Number of files in the category.
    #[serde(default)]
    pub files: u64,
    /// Bytes used by the category.
    #[serde(default)]
    pub size: u64,
    /// Category kind key.
    #[serde(rename = "type", default)]
    pub kind: String,
}

/// Response body of `GET /stats`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UsageStats {
    /// Bytes used.
    #[serde(alias = "total_used")]
    pub used: u64,
    /// Bytes allowed.
    #[serde(default)]
    pub quota: u64,
    /// Breakdown by category.
    #[serde(default, alias = "breakdown", deserialize_with = "categories_or_breakdown")]
    pub categories: Vec<CategoryUsage>,
}

/// Accepts a list of categories or a `{mime type: bytes}` map.
fn categories_or_breakdown<'de, D>(
    deserializer: D,
) -> std::result::Result<Vec<CategoryUsage>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Wire {
        List(Vec<CategoryUsage>),
        BySize(BTreeMap<String, u64>),
    }

    Ok(match Option::<Wire>::deserialize(deserializer)? {
        None => Vec::new(),
        Some(Wire::List(categories)) => categories,
        Some(Wire::BySize(sizes)) => sizes
            .into_iter()
            .map(|(mime, size)| CategoryUsage {
                kind: mime.split('/').next().unwrap_or_default().to_string(),
                name: mime,
                files: 0,
                size,
            })
            .collect(),
    })
}

impl UsageStats {
    /// Percentage of the quota in use; zero when no quota is configured.
    pub fn used_percent(&self) -> f64 {
        if self.quota == 0 {
            return 0.0;
        }
        self.used as f64 / self.quota as f64 * 100.0
    }
}

impl Validate for UsageStats {
    fn validate(&self) -> Result<()> {
        Ok(())
    }
}

// ============================================================================
// Authentication
// ============================================================================

/// Authenticated user profile.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    /// Account identifier.
    pub id: UserId,
    /// Login name.
    pub username: String,
    /// Contact address.
    #[serde(default)]
    pub email: String,
}

/// Request body of `POST /login`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoginRequest {
    pub username: String,
    pub password: String,
}

/// Response body of a successful `POST /login`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoginResponse {
    /// Bearer token for subsequent calls.
    pub token: String,
    /// The authenticated user.
    pub user: User,
}

impl Validate for LoginResponse {
    fn validate(&self) -> Result<()> {
        if self.token.is_empty() {
            return Err(ProtocolError::MissingField {
                field: "token",
                context: "login response",
            });
        }
        if self.user.username.is_empty() {
            return Err(ProtocolError::MissingField {
                field: "user.username",
                context: "login response",
            });
        }
        Ok(())
    }
}

/// Request body of `POST /signup`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignupRequest {
    pub username: String,
    pub email: String,
    pub password: String,
}

// ============================================================================
// Errors
// ============================================================================

/// Error body returned by the server alongside a non-success status.
///
/// Only used to enrich log and display messages; callers must not branch on
/// its contents.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorBody {
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
}

impl ErrorBody {
    /// Best-effort extraction of a human-readable message.
    pub fn parse(body: &[u8]) -> Option<String> {
        let parsed: ErrorBody = serde_json::from_slice(body).ok()?;
        parsed.error.or(parsed.message)
    }
}
