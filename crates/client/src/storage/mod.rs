//! Local persistence for the FileDeck client.
//!
//! This module provides SQLite-based persistence for:
//! - The saved login (token and profile)
//! - Application settings
//!
//! And OS keychain storage as an alternative home for the login.

mod database;
pub mod keychain;

pub use database::{Database, DatabaseError, SessionRecord, StorageResult};

pub use keychain::{KeychainBackend, KeychainError, KeychainManager, KeychainResult, SystemKeychain};

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn create_test_db() -> (Database, TempDir) {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let db_path = temp_dir.path().join("nested").join("filedeck.db");
        let db = Database::open(&db_path).expect("Failed to open database");
        (db, temp_dir)
    }

    #[test]
    fn test_database_creation() {
        let (db, _temp_dir) = create_test_db();
        let version = db
            .get_schema_version()
            .expect("Failed to get schema version");
        assert!(version > 0, "Schema version should be greater than 0");
    }

    #[test]
    fn test_session_and_settings_are_independent() {
        let (db, _temp_dir) = create_test_db();
        db.set_setting("theme", "dark").expect("Failed to set setting");
        db.store_session(&SessionRecord {
            token: "tok".to_string(),
            user_json: "{}".to_string(),
            saved_at: 1,
        })
        .expect("Failed to store session");

        assert!(db.clear_session().expect("Failed to clear session"));
        assert_eq!(
            db.get_setting("theme").expect("Failed to get setting"),
            Some("dark".to_string())
        );
    }
}
