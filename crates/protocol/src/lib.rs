//! # FileDeck Protocol Library
//!
//! This crate provides the wire types for the FileDeck storage REST API.
//!
//! ## Overview
//!
//! The protocol crate is the schema boundary between the client engine and
//! the storage server, providing:
//!
//! - **Message Definitions**: Request and response bodies for files, folders,
//!   usage statistics and authentication
//! - **Identifiers**: `FileId`, `FolderId` and `UserId` newtypes that accept
//!   both string and integer encodings
//! - **Schema Validation**: [`decode`] deserializes and validates a response
//!   in one step
//!
//! ## Example Usage
//!
//! ```rust
//! use protocol::{decode, FileListResponse};
//!
//! let body = br#"{"files": [{"id": 1, "name": "notes.txt", "size": 12}]}"#;
//! let list: FileListResponse = decode(body).unwrap();
//! assert_eq!(list.files[0].id.as_str(), "1");
//! ```
//!
//! ## Modules
//!
//! - [`messages`]: Request/response definitions
//! - [`ids`]: Identifier newtypes
//! - [`error`]: Error types

pub mod error;
pub mod ids;
pub mod messages;

pub use error::{ProtocolError, Result};
pub use ids::{FileId, FolderId, UserId};
pub use messages::{
    decode, CategoryUsage, CreateFolderRequest, CreateFolderResponse, ErrorBody, FileListResponse, FileRecord, Folder,
    FolderListResponse, LoginRequest, LoginResponse, MoveRequest, SignupRequest, UsageStats, User,
    Validate,
};
