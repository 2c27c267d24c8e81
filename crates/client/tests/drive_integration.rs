//! End-to-end tests of the engine against an HTTP test server.
//!
//! These tests verify complete flows work correctly:
//! - Login and session persistence
//! - Uploads with per-task outcomes and list refreshes
//! - Drag-to-folder moves and selection reconciliation
//! - Session teardown on rejected tokens

use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use filedeck_client::config::{ServerConfig, TransferConfig};
use filedeck_client::session::{CheckOutcome, DatabaseSessionStore, SessionStoreError};
use filedeck_client::storage::Database;
use filedeck_client::{
    Drive, DriveEvent, HttpStorageApi, Session, SessionHandle, SessionStore, TransferStatus,
};
use mockito::{Matcher, Server, ServerGuard};
use protocol::{FileId, FolderId};
use tempfile::TempDir;

/// In-process store so tests can start logged in without touching disk.
#[derive(Default)]
struct TestStore {
    slot: Mutex<Option<Session>>,
}

impl SessionStore for TestStore {
    fn load(&self) -> Result<Option<Session>, SessionStoreError> {
        Ok(self.slot.lock().unwrap().clone())
    }

    fn save(&self, session: &Session) -> Result<(), SessionStoreError> {
        *self.slot.lock().unwrap() = Some(session.clone());
        Ok(())
    }

    fn clear(&self) -> Result<(), SessionStoreError> {
        *self.slot.lock().unwrap() = None;
        Ok(())
    }
}

fn api_for(server: &ServerGuard) -> Arc<HttpStorageApi> {
    let config = ServerConfig {
        base_url: server.url(),
        ..ServerConfig::default()
    };
    Arc::new(HttpStorageApi::new(&config, 4096).unwrap())
}

fn session_with(token: &str) -> SessionHandle {
    let store = Arc::new(TestStore::default());
    store
        .save(&Session {
            token: token.to_string(),
            user: serde_json::from_str(r#"{"id": 7, "username": "alice", "email": "a@x.io"}"#)
                .unwrap(),
        })
        .unwrap();
    SessionHandle::load(store).unwrap()
}

fn write_files(dir: &TempDir, names: &[&str]) -> Vec<PathBuf> {
    names
        .iter()
        .map(|name| {
            let path = dir.path().join(name);
            std::fs::write(&path, format!("contents of {}", name)).unwrap();
            path
        })
        .collect()
}

async fn wait_for_refreshes(events: &mut tokio::sync::broadcast::Receiver<DriveEvent>, n: usize) {
    tokio::time::timeout(Duration::from_secs(10), async {
        let mut seen = 0;
        while seen < n {
            if let Ok(DriveEvent::CatalogRefreshed { .. }) = events.recv().await {
                seen += 1;
            }
        }
    })
    .await
    .expect("timed out waiting for refreshes");
}

// =============================================================================
// Session Tests
// =============================================================================

#[tokio::test]
async fn test_login_persists_session_across_restart() {
    let mut server = Server::new_async().await;
    let login = server
        .mock("POST", "/login")
        .match_body(Matcher::Json(serde_json::json!({
            "username": "alice",
            "password": "secret1"
        })))
        .with_status(200)
        .with_body(r#"{"token": "tok-1", "user": {"id": 1, "username": "alice", "email": "a@x.io"}}"#)
        .create_async()
        .await;
    let verify = server
        .mock("GET", "/verify-token")
        .match_header("authorization", "Bearer tok-1")
        .with_status(200)
        .create_async()
        .await;

    let dir = TempDir::new().unwrap();
    let db_path = dir.path().join("filedeck.db");
    let store = Arc::new(DatabaseSessionStore::new(Database::open(&db_path).unwrap()));
    let session = SessionHandle::load(store).unwrap();
    let drive = Drive::new(api_for(&server), session, &TransferConfig::default());

    let logged_in = drive.guard().login("alice", "secret1").await.unwrap();
    assert_eq!(logged_in.token, "tok-1");
    login.assert_async().await;
    drop(drive);

    let reopened = Arc::new(DatabaseSessionStore::new(Database::open(&db_path).unwrap()));
    let session = SessionHandle::load(reopened).unwrap();
    assert_eq!(session.token().as_deref(), Some("tok-1"));

    let drive = Drive::new(api_for(&server), session, &TransferConfig::default());
    assert_eq!(drive.guard().check().await, CheckOutcome::Authenticated);
    verify.assert_async().await;
}

#[tokio::test]
async fn test_rejected_token_redirects_to_login() {
    let mut server = Server::new_async().await;
    server
        .mock("GET", "/files")
        .with_status(401)
        .with_body(r#"{"error": "invalid token"}"#)
        .create_async()
        .await;

    let drive = Drive::new(api_for(&server), session_with("stale"), &TransferConfig::default());
    let mut events = drive.subscribe();

    let err = drive.refresh().await.unwrap_err();
    assert!(err.is_auth());
    assert!(!drive.session().is_authenticated());
    assert_eq!(events.recv().await.unwrap(), DriveEvent::RedirectToLogin);
}

// =============================================================================
// Upload Tests
// =============================================================================

#[tokio::test]
async fn test_three_uploads_one_rejected() {
    let mut server = Server::new_async().await;
    for (id, name) in [(11, "one.txt"), (13, "three.txt")] {
        server
            .mock("POST", "/upload")
            .match_header("authorization", "Bearer tok")
            .match_body(Matcher::Regex(format!(r#"filename="{}""#, name)))
            .with_status(201)
            .with_body(format!(r#"{{"id": {}, "name": "{}", "size": 20}}"#, id, name))
            .create_async()
            .await;
    }
    server
        .mock("POST", "/upload")
        .match_body(Matcher::Regex(r#"filename="two.txt""#.to_string()))
        .with_status(507)
        .with_body(r#"{"error": "quota exceeded"}"#)
        .create_async()
        .await;
    let listing = server
        .mock("GET", "/files")
        .with_status(200)
        .with_body(r#"{"files": [{"id": 11, "name": "one.txt"}, {"id": 13, "name": "three.txt"}]}"#)
        .expect(2)
        .create_async()
        .await;

    let dir = TempDir::new().unwrap();
    let paths = write_files(&dir, &["one.txt", "two.txt", "three.txt"]);
    let drive = Drive::new(api_for(&server), session_with("tok"), &TransferConfig::default());
    let mut events = drive.subscribe();

    drive.upload(&paths).unwrap();
    drive.transfers().wait_idle().await;
    wait_for_refreshes(&mut events, 2).await;

    let tasks = drive.transfers().snapshot();
    assert_eq!(tasks[0].status, TransferStatus::Completed);
    assert_eq!(tasks[0].progress, 100);
    assert_eq!(tasks[0].result.as_ref().unwrap().id, FileId::new("11"));
    assert_eq!(tasks[1].status, TransferStatus::Failed);
    assert_eq!(
        tasks[1].failure.as_ref().unwrap().to_string(),
        "quota exceeded (507)"
    );
    assert_eq!(tasks[2].status, TransferStatus::Completed);
    assert_eq!(tasks[2].progress, 100);

    listing.assert_async().await;
    assert_eq!(drive.visible().await.len(), 2);
    assert_eq!(drive.notifications().summary(), (2, 3));
}

// =============================================================================
// Drag and Selection Tests
// =============================================================================

#[tokio::test]
async fn test_drag_selection_to_folder_sends_one_move() {
    let mut server = Server::new_async().await;
    server
        .mock("GET", "/files")
        .with_status(200)
        .with_body(r#"{"files": [{"id": 1, "name": "a"}, {"id": 2, "name": "b"}, {"id": 3, "name": "c"}]}"#)
        .create_async()
        .await;
    let moved = server
        .mock("POST", "/files/move")
        .match_header("authorization", "Bearer tok")
        .match_body(Matcher::Json(serde_json::json!({
            "file_ids": ["1", "2"],
            "folder_id": "F"
        })))
        .with_status(200)
        .expect(1)
        .create_async()
        .await;

    let drive = Drive::new(api_for(&server), session_with("tok"), &TransferConfig::default());
    drive.refresh().await.unwrap();
    drive.toggle(&FileId::new("1"), true);
    drive.toggle(&FileId::new("2"), true);

    drive.drag_start(&FileId::new("1")).unwrap();
    drive.drag_over(FolderId::new("F")).unwrap();
    drive.drop_on(FolderId::new("F")).await.unwrap();

    moved.assert_async().await;
    assert_eq!(drive.drag_state(), filedeck_client::DragState::Idle);
}

#[tokio::test]
async fn test_selection_follows_refetched_list() {
    let mut server = Server::new_async().await;
    let first = server
        .mock("GET", "/files")
        .with_status(200)
        .with_body(r#"{"files": [{"id": "x", "name": "x"}, {"id": "y", "name": "y"}, {"id": "z", "name": "z"}]}"#)
        .expect(1)
        .create_async()
        .await;

    let drive = Drive::new(api_for(&server), session_with("tok"), &TransferConfig::default());
    drive.refresh().await.unwrap();
    drive.select_all().await;
    first.assert_async().await;
    first.remove_async().await;

    server
        .mock("GET", "/files")
        .with_status(200)
        .with_body(r#"{"files": [{"id": "x", "name": "x"}, {"id": "z", "name": "z"}]}"#)
        .create_async()
        .await;
    drive.refresh().await.unwrap();

    assert_eq!(drive.selected(), vec![FileId::new("x"), FileId::new("z")]);
}
