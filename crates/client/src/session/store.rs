//! Durable persistence of the login.
//!
//! Both backends keep the whole session in one record, so a save or a clear
//! either happens completely or not at all.

use std::sync::{Arc, Mutex};

use protocol::User;
use thiserror::Error;

use super::Session;
use crate::config::{SessionBackend, StorageConfig};
use crate::storage::{
    Database, DatabaseError, KeychainBackend, KeychainError, KeychainManager, SessionRecord,
};

/// Errors from a [`SessionStore`].
#[derive(Debug, Error)]
pub enum SessionStoreError {
    #[error("session database error: {0}")]
    Database(#[from] DatabaseError),

    #[error("session keychain error: {0}")]
    Keychain(#[from] KeychainError),

    #[error("stored session is corrupt: {0}")]
    Corrupt(String),

    #[error("session store lock poisoned")]
    LockPoisoned,
}

/// Load/save/clear for the single persisted session.
pub trait SessionStore: Send + Sync {
    /// Read the persisted session, if any.
    fn load(&self) -> Result<Option<Session>, SessionStoreError>;

    /// Replace the persisted session.
    fn save(&self, session: &Session) -> Result<(), SessionStoreError>;

    /// Remove the persisted session. Clearing an empty store is not an error.
    fn clear(&self) -> Result<(), SessionStoreError>;
}

/// Open the store selected by `config.session_backend`.
pub fn open_store(config: &StorageConfig) -> Result<Arc<dyn SessionStore>, SessionStoreError> {
    match config.session_backend {
        SessionBackend::Database => {
            let db = Database::open(config.database_path())?;
            tracing::debug!("Session stored in {}", config.database_path().display());
            Ok(Arc::new(DatabaseSessionStore::new(db)))
        }
        SessionBackend::Keychain => {
            tracing::debug!("Session stored in the OS keychain");
            Ok(Arc::new(KeychainSessionStore::new(KeychainManager::system())))
        }
    }
}

// ============================================================================
// SQLite
// ============================================================================

/// Session persisted in the client database.
pub struct DatabaseSessionStore {
    db: Mutex<Database>,
}

impl DatabaseSessionStore {
    pub fn new(db: Database) -> Self {
        Self { db: Mutex::new(db) }
    }
}

impl SessionStore for DatabaseSessionStore {
    fn load(&self) -> Result<Option<Session>, SessionStoreError> {
        let db = self.db.lock().map_err(|_| SessionStoreError::LockPoisoned)?;
        let Some(record) = db.load_session()? else {
            return Ok(None);
        };
        let user: User = serde_json::from_str(&record.user_json)
            .map_err(|e| SessionStoreError::Corrupt(e.to_string()))?;
        Ok(Some(Session {
            token: record.token,
            user,
        }))
    }

    fn save(&self, session: &Session) -> Result<(), SessionStoreError> {
        let user_json = serde_json::to_string(&session.user)
            .map_err(|e| SessionStoreError::Corrupt(e.to_string()))?;
        let record = SessionRecord {
            token: session.token.clone(),
            user_json,
            saved_at: chrono::Utc::now().timestamp(),
        };
        let db = self.db.lock().map_err(|_| SessionStoreError::LockPoisoned)?;
        db.store_session(&record)?;
        Ok(())
    }

    fn clear(&self) -> Result<(), SessionStoreError> {
        let db = self.db.lock().map_err(|_| SessionStoreError::LockPoisoned)?;
        db.clear_session()?;
        Ok(())
    }
}

// ============================================================================
// Keychain
// ============================================================================

/// Session persisted as one JSON secret in the OS keychain.
pub struct KeychainSessionStore<B: KeychainBackend> {
    keychain: KeychainManager<B>,
}

impl<B: KeychainBackend> KeychainSessionStore<B> {
    pub fn new(keychain: KeychainManager<B>) -> Self {
        Self { keychain }
    }
}

impl<B: KeychainBackend> SessionStore for KeychainSessionStore<B> {
    fn load(&self) -> Result<Option<Session>, SessionStoreError> {
        match self.keychain.get()? {
            Some(json) => serde_json::from_str(&json)
                .map(Some)
                .map_err(|e| SessionStoreError::Corrupt(e.to_string())),
            None => Ok(None),
        }
    }

    fn save(&self, session: &Session) -> Result<(), SessionStoreError> {
        let json = serde_json::to_string(session)
            .map_err(|e| SessionStoreError::Corrupt(e.to_string()))?;
        self.keychain.store(&json)?;
        Ok(())
    }

    fn clear(&self) -> Result<(), SessionStoreError> {
        self.keychain.delete()?;
        Ok(())
    }
}

// ============================================================================
// In-memory
// ============================================================================

/// Non-durable store for tests.
#[cfg(test)]
#[derive(Default)]
pub struct MemorySessionStore {
    slot: Mutex<Option<Session>>,
}

#[cfg(test)]
impl SessionStore for MemorySessionStore {
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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::keychain::MockKeychain;
    use protocol::UserId;
    use tempfile::TempDir;

    fn session(token: &str) -> Session {
        Session {
            token: token.to_string(),
            user: User {
                id: UserId::new("42"),
                username: "alice".to_string(),
                email: "alice@example.com".to_string(),
            },
        }
    }

    fn exercise(store: &dyn SessionStore) {
        assert!(store.load().unwrap().is_none());

        store.save(&session("tok-1")).unwrap();
        assert_eq!(store.load().unwrap(), Some(session("tok-1")));

        store.save(&session("tok-2")).unwrap();
        assert_eq!(store.load().unwrap().unwrap().token, "tok-2");

        store.clear().unwrap();
        assert!(store.load().unwrap().is_none());
        store.clear().unwrap();
    }

    #[test]
    fn test_database_store_roundtrip() {
        let dir = TempDir::new().unwrap();
        let db = Database::open(dir.path().join("filedeck.db")).unwrap();
        exercise(&DatabaseSessionStore::new(db));
    }

    #[test]
    fn test_database_store_survives_reopen() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("filedeck.db");

        DatabaseSessionStore::new(Database::open(&path).unwrap())
            .save(&session("persisted"))
            .unwrap();

        let reopened = DatabaseSessionStore::new(Database::open(&path).unwrap());
        assert_eq!(reopened.load().unwrap(), Some(session("persisted")));
    }

    #[test]
    fn test_keychain_store_roundtrip() {
        let store = KeychainSessionStore::new(KeychainManager::new(MockKeychain::new()));
        exercise(&store);
    }

    #[test]
    fn test_keychain_store_corrupt_entry() {
        let keychain = KeychainManager::new(MockKeychain::new());
        keychain.store("{not json").unwrap();
        let store = KeychainSessionStore::new(keychain);
        assert!(matches!(store.load(), Err(SessionStoreError::Corrupt(_))));
    }

    #[test]
    fn test_keychain_store_surfaces_locked_keychain() {
        let backend = MockKeychain::new();
        backend.lock();
        let store = KeychainSessionStore::new(KeychainManager::new(backend));
        assert!(matches!(
            store.load(),
            Err(SessionStoreError::Keychain(KeychainError::AccessDenied(_)))
        ));
    }

    #[test]
    fn test_open_store_uses_database_backend() {
        let dir = TempDir::new().unwrap();
        let config = StorageConfig {
            data_dir: dir.path().to_path_buf(),
            session_backend: SessionBackend::Database,
        };

        open_store(&config).unwrap().save(&session("tok")).unwrap();
        assert!(config.database_path().exists());
        assert_eq!(
            open_store(&config).unwrap().load().unwrap(),
            Some(session("tok"))
        );
    }

    #[test]
    fn test_memory_store_roundtrip() {
        exercise(&MemorySessionStore::default());
    }
}
