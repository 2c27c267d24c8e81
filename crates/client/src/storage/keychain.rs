//! Keychain integration for the persisted login.
//!
//! This module provides cross-platform keychain access using the `keyring` crate:
//! - macOS: Keychain
//! - Windows: Credential Manager
//! - Linux: Secret Service (via D-Bus)

use thiserror::Error;

/// The service name used for keychain entries.
const SERVICE_NAME: &str = "filedeck";

/// The entry holding the serialized session.
const DEFAULT_KEY_NAME: &str = "session";

/// Errors that can occur during keychain operations.
#[derive(Debug, Error)]
pub enum KeychainError {
    /// The requested entry was not found in the keychain.
    #[error("Entry not found in keychain: {0}")]
    NotFound(String),

    /// Access to the keychain was denied.
    #[error("Keychain access denied: {0}")]
    AccessDenied(String),

    /// The keychain service is unavailable.
    #[error("Keychain service unavailable: {0}")]
    ServiceUnavailable(String),

    /// The stored value could not be encoded or decoded.
    #[error("Entry encoding error: {0}")]
    EncodingError(String),

    /// A platform-specific keychain error occurred.
    #[error("Keychain error: {0}")]
    PlatformError(String),
}

/// Result type for keychain operations.
pub type KeychainResult<T> = Result<T, KeychainError>;

/// Trait for keychain backend implementations.
///
/// This trait allows for different keychain implementations, including
/// a mock backend for testing purposes.
pub trait KeychainBackend: Send + Sync {
    /// Retrieve a secret from the keychain.
    fn get_secret(&self, service: &str, key: &str) -> KeychainResult<String>;

    /// Store a secret in the keychain.
    fn set_secret(&self, service: &str, key: &str, value: &str) -> KeychainResult<()>;

    /// Delete a secret from the keychain.
    fn delete_secret(&self, service: &str, key: &str) -> KeychainResult<()>;
}

/// The OS keychain, through `keyring`.
pub struct SystemKeychain;

impl SystemKeychain {
    fn entry(service: &str, key: &str) -> KeychainResult<keyring::Entry> {
        keyring::Entry::new(service, key).map_err(|e| KeychainError::PlatformError(e.to_string()))
    }
}

/// Translate a `keyring` failure for the entry named `key`.
fn keyring_error(err: keyring::Error, key: &str) -> KeychainError {
    match err {
        keyring::Error::NoEntry => KeychainError::NotFound(key.to_string()),
        keyring::Error::NoStorageAccess(e) => KeychainError::AccessDenied(e.to_string()),
        keyring::Error::PlatformFailure(e) => KeychainError::ServiceUnavailable(e.to_string()),
        keyring::Error::BadEncoding(_) => {
            KeychainError::EncodingError(format!("{} is not valid UTF-8", key))
        }
        keyring::Error::TooLong(field, limit) => {
            KeychainError::EncodingError(format!("{} longer than {} bytes", field, limit))
        }
        other => KeychainError::PlatformError(other.to_string()),
    }
}

impl KeychainBackend for SystemKeychain {
    fn get_secret(&self, service: &str, key: &str) -> KeychainResult<String> {
        Self::entry(service, key)?
            .get_password()
            .map_err(|e| keyring_error(e, key))
    }

    fn set_secret(&self, service: &str, key: &str, value: &str) -> KeychainResult<()> {
        Self::entry(service, key)?
            .set_password(value)
            .map_err(|e| keyring_error(e, key))
    }

    fn delete_secret(&self, service: &str, key: &str) -> KeychainResult<()> {
        Self::entry(service, key)?
            .delete_credential()
            .map_err(|e| keyring_error(e, key))
    }
}

/// In-memory keychain for tests. Can be switched into a locked state.
#[cfg(test)]
#[derive(Default)]
pub struct MockKeychain {
    entries: std::sync::Mutex<std::collections::HashMap<(String, String), String>>,
    locked: std::sync::atomic::AtomicBool,
}

#[cfg(test)]
impl MockKeychain {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every later call fail with [`KeychainError::AccessDenied`].
    pub fn lock(&self) {
        self.locked.store(true, std::sync::atomic::Ordering::SeqCst);
    }

    fn check(&self) -> KeychainResult<()> {
        if self.locked.load(std::sync::atomic::Ordering::SeqCst) {
            return Err(KeychainError::AccessDenied("keychain is locked".to_string()));
        }
        Ok(())
    }
}

#[cfg(test)]
impl KeychainBackend for MockKeychain {
    fn get_secret(&self, service: &str, key: &str) -> KeychainResult<String> {
        self.check()?;
        self.entries
            .lock()
            .unwrap()
            .get(&(service.to_string(), key.to_string()))
            .cloned()
            .ok_or_else(|| KeychainError::NotFound(key.to_string()))
    }

    fn set_secret(&self, service: &str, key: &str, value: &str) -> KeychainResult<()> {
        self.check()?;
        self.entries
            .lock()
            .unwrap()
            .insert((service.to_string(), key.to_string()), value.to_string());
        Ok(())
    }

    fn delete_secret(&self, service: &str, key: &str) -> KeychainResult<()> {
        self.check()?;
        self.entries
            .lock()
            .unwrap()
            .remove(&(service.to_string(), key.to_string()))
            .map(|_| ())
            .ok_or_else(|| KeychainError::NotFound(key.to_string()))
    }
}

/// Keychain manager for a single named secret.
pub struct KeychainManager<B: KeychainBackend> {
    backend: B,
    service: String,
    key_name: String,
}

impl<B: KeychainBackend> KeychainManager<B> {
    /// Create a new KeychainManager with the given backend.
    pub fn new(backend: B) -> Self {
        Self {
            backend,
            service: SERVICE_NAME.to_string(),
            key_name: DEFAULT_KEY_NAME.to_string(),
        }
    }

    /// Create a new KeychainManager with custom service and key names.
    pub fn with_names(backend: B, service: impl Into<String>, key_name: impl Into<String>) -> Self {
        Self {
            backend,
            service: service.into(),
            key_name: key_name.into(),
        }
    }

    /// Read the secret. A missing entry is `Ok(None)`.
    pub fn get(&self) -> KeychainResult<Option<String>> {
        match self.backend.get_secret(&self.service, &self.key_name) {
            Ok(value) => Ok(Some(value)),
            Err(KeychainError::NotFound(_)) => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Store the secret, replacing any previous value.
    pub fn store(&self, value: &str) -> KeychainResult<()> {
        self.backend.set_secret(&self.service, &self.key_name, value)
    }

    /// Delete the secret. Deleting a missing entry is not an error.
    pub fn delete(&self) -> KeychainResult<()> {
        match self.backend.delete_secret(&self.service, &self.key_name) {
            Ok(()) | Err(KeychainError::NotFound(_)) => Ok(()),
            Err(e) => Err(e),
        }
    }
}

impl KeychainManager<SystemKeychain> {
    /// Create a new KeychainManager with the system keychain backend.
    pub fn system() -> Self {
        Self::new(SystemKeychain)
    }
}
