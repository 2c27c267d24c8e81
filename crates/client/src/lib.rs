//! # FileDeck Client Library
//!
//! This crate provides the client engine for FileDeck: browsing, uploading
//! and organizing files kept on a remote storage server.
//!
//! ## Overview
//!
//! The engine sits between a front end and the storage REST API:
//!
//! - **Session**: token verification, login/logout and durable persistence
//! - **Selection & Drag**: bulk selection and drag-to-folder moves
//! - **Transfers**: bounded concurrent uploads with progress and cancellation
//! - **Notifications**: dismissible per-upload status entries
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                       Front end / CLI                        │
//! ├──────────────────────────────────────────────────────────────┤
//! │                           Drive                              │
//! │  ┌────────────┐ ┌───────────┐ ┌──────────┐ ┌──────────────┐  │
//! │  │ Session    │ │ Catalog + │ │  Drag    │ │ Transfers +  │  │
//! │  │ Guard      │ │ Selection │ │Controller│ │ Notifications│  │
//! │  └────────────┘ └───────────┘ └──────────┘ └──────────────┘  │
//! ├──────────────────────────────────────────────────────────────┤
//! │       StorageApi (reqwest)     │   SessionStore (SQLite /    │
//! │                                │   OS keychain)              │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use filedeck_client::{open_store, ClientConfig, Drive, HttpStorageApi, SessionHandle};
//!
//! # async fn run() -> anyhow::Result<()> {
//! let config = ClientConfig::load_default()?;
//! let api = Arc::new(HttpStorageApi::new(&config.server, config.transfer.chunk_size)?);
//! let session = SessionHandle::load(open_store(&config.storage)?)?;
//! let drive = Drive::new(api, session, &config.transfer);
//!
//! drive.refresh().await?;
//! for file in drive.visible().await {
//!     println!("{} {}", file.id, file.name);
//! }
//! # Ok(())
//! # }
//! ```
//!
//! ## Modules
//!
//! - [`api`]: REST transport
//! - [`session`]: session state, verification and persistence
//! - [`transfer`]: upload tasks and the transfer manager
//! - [`storage`]: SQLite database and keychain access

pub mod api;
pub mod catalog;
pub mod config;
pub mod drag;
pub mod drive;
pub mod notifications;
pub mod selection;
pub mod session;
pub mod storage;
pub mod transfer;
pub mod validation;

// Re-export protocol for convenience
pub use protocol;

pub use api::{ApiError, HttpStorageApi, StorageApi, UploadSource};
pub use catalog::FileCatalog;
pub use config::{ClientConfig, ConfigError, SessionBackend};
pub use drag::{DragController, DragError, DragState};
pub use drive::{Drive, DriveError, DriveEvent};
pub use notifications::{Notification, NotificationCenter};
pub use selection::SelectionModel;
pub use session::{
    open_store, AuthError, AuthStatus, GuardEvent, Session, SessionGuard, SessionHandle,
    SessionStore,
};
pub use transfer::{FailureReason, TaskId, TransferEvent, TransferManager, TransferStatus};
pub use validation::{Field, ValidationErrors};
