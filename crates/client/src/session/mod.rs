//! Authentication state shared by every component.
//!
//! [`SessionHandle`] is the single owner of the bearer token. Other
//! components read the token at call time and subscribe to changes; only
//! the handle writes it, and every write goes to durable storage first.

mod guard;
mod store;

use std::sync::{Arc, Mutex};

use protocol::User;
use serde::{Deserialize, Serialize};
use tokio::sync::watch;

pub use guard::{AuthError, AuthStatus, CheckOutcome, GuardEvent, SessionGuard};
#[cfg(test)]
pub use store::MemorySessionStore;
pub use store::{
    open_store, DatabaseSessionStore, KeychainSessionStore, SessionStore, SessionStoreError,
};

/// Bearer token plus the authenticated profile.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    pub token: String,
    pub user: User,
}

/// What subscribers observe: the session and the epoch it was published in.
///
/// The epoch increases on every login and logout, so a result computed
/// against one epoch can be recognised as stale once it has moved on.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SessionSnapshot {
    pub epoch: u64,
    pub session: Option<Session>,
}

impl SessionSnapshot {
    pub fn token(&self) -> Option<&str> {
        self.session.as_ref().map(|s| s.token.as_str())
    }
}

struct Inner {
    tx: watch::Sender<SessionSnapshot>,
    store: Arc<dyn SessionStore>,
    // Serializes store write + publish so the two never interleave.
    write: Mutex<()>,
}

/// Cloneable handle to the current session.
#[derive(Clone)]
pub struct SessionHandle {
    inner: Arc<Inner>,
}

impl SessionHandle {
    /// Start from whatever the store holds.
    pub fn load(store: Arc<dyn SessionStore>) -> Result<Self, SessionStoreError> {
        let session = store.load()?;
        if let Some(s) = &session {
            tracing::debug!("Restored session for {}", s.user.username);
        }
        let (tx, _rx) = watch::channel(SessionSnapshot { epoch: 0, session });
        Ok(Self {
            inner: Arc::new(Inner {
                tx,
                store,
                write: Mutex::new(()),
            }),
        })
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        self.inner.tx.borrow().clone()
    }

    pub fn current(&self) -> Option<Session> {
        self.inner.tx.borrow().session.clone()
    }

    /// The bearer token, read fresh on every call.
    pub fn token(&self) -> Option<String> {
        self.inner.tx.borrow().token().map(str::to_string)
    }

    pub fn epoch(&self) -> u64 {
        self.inner.tx.borrow().epoch
    }

    pub fn is_authenticated(&self) -> bool {
        self.inner.tx.borrow().session.is_some()
    }

    pub fn subscribe(&self) -> watch::Receiver<SessionSnapshot> {
        self.inner.tx.subscribe()
    }

    /// Persist and publish a new session.
    pub fn establish(&self, session: Session) -> Result<(), SessionStoreError> {
        let _write = self
            .inner
            .write
            .lock()
            .map_err(|_| SessionStoreError::LockPoisoned)?;
        self.inner.store.save(&session)?;
        self.inner.tx.send_modify(|snap| {
            snap.epoch += 1;
            snap.session = Some(session);
        });
        tracing::debug!("Session established (epoch {})", self.epoch());
        Ok(())
    }

    /// Clear memory and storage. Always advances the epoch.
    pub fn clear(&self) -> Result<(), SessionStoreError> {
        let _write = self
            .inner
            .write
            .lock()
            .map_err(|_| SessionStoreError::LockPoisoned)?;
        self.clear_locked()
    }

    /// Clear only if nothing has been published since `epoch`.
    ///
    /// Returns whether the clear happened. Storage is wiped either way when
    /// the epoch matches, but subscribers are only notified if a session was
    /// actually present.
    pub fn clear_if_epoch(&self, epoch: u64) -> Result<bool, SessionStoreError> {
        let _write = self
            .inner
            .write
            .lock()
            .map_err(|_| SessionStoreError::LockPoisoned)?;
        let snapshot = self.snapshot();
        if snapshot.epoch != epoch {
            return Ok(false);
        }
        if snapshot.session.is_none() {
            self.inner.store.clear()?;
            return Ok(true);
        }
        self.clear_locked()?;
        Ok(true)
    }

    fn clear_locked(&self) -> Result<(), SessionStoreError> {
        self.inner.store.clear()?;
        self.inner.tx.send_modify(|snap| {
            snap.epoch += 1;
            snap.session = None;
        });
        tracing::debug!("Session cleared (epoch {})", self.epoch());
        Ok(())
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use protocol::UserId;

    pub(crate) fn session(token: &str) -> Session {
        Session {
            token: token.to_string(),
            user: User {
                id: UserId::new("1"),
                username: "alice".to_string(),
                email: "alice@example.com".to_string(),
            },
        }
    }

    pub(crate) fn logged_in(token: &str) -> SessionHandle {
        let store = Arc::new(MemorySessionStore::default());
        store.save(&session(token)).unwrap();
        SessionHandle::load(store).unwrap()
    }

    pub(crate) fn logged_out() -> SessionHandle {
        SessionHandle::load(Arc::new(MemorySessionStore::default())).unwrap()
    }
}

#[cfg(test)]
mod tests {
    use super::test_support::*;
    use super::*;

    #[test]
    fn test_load_restores_persisted_session() {
        let handle = logged_in("tok");
        assert_eq!(handle.token().as_deref(), Some("tok"));
        assert_eq!(handle.epoch(), 0);
        assert!(handle.is_authenticated());
    }

    #[test]
    fn test_establish_persists_and_bumps_epoch() {
        let store = Arc::new(MemorySessionStore::default());
        let handle = SessionHandle::load(store.clone()).unwrap();

        handle.establish(session("new")).unwrap();
        assert_eq!(handle.epoch(), 1);
        assert_eq!(store.load().unwrap(), Some(session("new")));
    }

    #[test]
    fn test_clear_removes_memory_and_storage() {
        let store = Arc::new(MemorySessionStore::default());
        store.save(&session("tok")).unwrap();
        let handle = SessionHandle::load(store.clone()).unwrap();

        handle.clear().unwrap();
        assert!(handle.token().is_none());
        assert!(store.load().unwrap().is_none());
        assert_eq!(handle.epoch(), 1);
    }

    #[test]
    fn test_clear_if_epoch_ignores_stale_epoch() {
        let handle = logged_in("old");
        let stale = handle.epoch();
        handle.establish(session("fresh")).unwrap();

        assert!(!handle.clear_if_epoch(stale).unwrap());
        assert_eq!(handle.token().as_deref(), Some("fresh"));
    }

    #[test]
    fn test_clear_if_epoch_without_session_does_not_publish() {
        let handle = logged_out();
        let rx = handle.subscribe();

        assert!(handle.clear_if_epoch(0).unwrap());
        assert_eq!(handle.epoch(), 0);
        assert!(!rx.has_changed().unwrap());
    }

    #[tokio::test]
    async fn test_subscribers_see_changes() {
        let handle = logged_out();
        let mut rx = handle.subscribe();

        handle.establish(session("t1")).unwrap();
        rx.changed().await.unwrap();
        assert_eq!(rx.borrow().token(), Some("t1"));

        handle.clear().unwrap();
        rx.changed().await.unwrap();
        assert!(rx.borrow().session.is_none());
        assert_eq!(rx.borrow().epoch, 2);
    }
}
