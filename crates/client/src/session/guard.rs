//! Token verification and the redirect-to-login decision.

use std::sync::Arc;

use protocol::{LoginRequest, SignupRequest};
use thiserror::Error;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::{Session, SessionHandle, SessionStoreError};
use crate::api::{ApiError, StorageApi};
use crate::validation::{validate_login, validate_signup, ValidationErrors};

/// Result of verifying a token.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthStatus {
    Authenticated,
    Unauthenticated,
}

/// Result of [`SessionGuard::check`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CheckOutcome {
    Authenticated,
    Unauthenticated,
    /// The session changed while the check was in flight; its result was dropped.
    Superseded,
}

/// Signals published by the guard.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GuardEvent {
    Authenticated { username: String },
    RedirectToLogin,
}

/// Errors from interactive login and signup.
#[derive(Debug, Error)]
pub enum AuthError {
    #[error("{0}")]
    Validation(#[from] ValidationErrors),

    #[error("invalid username or password")]
    InvalidCredentials,

    #[error(transparent)]
    Api(ApiError),

    #[error("failed to persist session: {0}")]
    Store(#[from] SessionStoreError),
}

impl From<ApiError> for AuthError {
    fn from(err: ApiError) -> Self {
        match err {
            ApiError::Unauthorized => AuthError::InvalidCredentials,
            other => AuthError::Api(other),
        }
    }
}

const EVENT_CHANNEL_SIZE: usize = 16;

/// Owns verification of the current token.
pub struct SessionGuard {
    api: Arc<dyn StorageApi>,
    session: SessionHandle,
    events: broadcast::Sender<GuardEvent>,
}

impl SessionGuard {
    pub fn new(api: Arc<dyn StorageApi>, session: SessionHandle) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_SIZE);
        Self {
            api,
            session,
            events,
        }
    }

    pub fn session(&self) -> &SessionHandle {
        &self.session
    }

    pub fn subscribe(&self) -> broadcast::Receiver<GuardEvent> {
        self.events.subscribe()
    }

    fn emit(&self, event: GuardEvent) {
        // Ignore send errors - no receivers is fine
        let _ = self.events.send(event);
    }

    /// Ask the server whether `token` is valid. Fails closed.
    pub async fn verify(&self, token: Option<&str>) -> AuthStatus {
        let Some(token) = token else {
            return AuthStatus::Unauthenticated;
        };
        match self.api.verify_token(token).await {
            Ok(()) => AuthStatus::Authenticated,
            Err(e) => {
                tracing::debug!("Token verification failed: {}", e);
                AuthStatus::Unauthenticated
            }
        }
    }

    /// Verify the current session and act on the result.
    ///
    /// On failure the persisted session is cleared and
    /// [`GuardEvent::RedirectToLogin`] is published, unless a login or
    /// logout happened while the request was in flight.
    pub async fn check(&self) -> CheckOutcome {
        let snapshot = self.session.snapshot();
        let status = self.verify(snapshot.token()).await;

        if self.session.epoch() != snapshot.epoch {
            tracing::debug!("Discarding verification result from epoch {}", snapshot.epoch);
            return CheckOutcome::Superseded;
        }

        match status {
            AuthStatus::Authenticated => {
                if let Some(session) = snapshot.session {
                    self.emit(GuardEvent::Authenticated {
                        username: session.user.username,
                    });
                }
                CheckOutcome::Authenticated
            }
            AuthStatus::Unauthenticated => {
                match self.session.clear_if_epoch(snapshot.epoch) {
                    Ok(true) => {}
                    Ok(false) => return CheckOutcome::Superseded,
                    Err(e) => tracing::warn!("Failed to clear persisted session: {}", e),
                }
                self.emit(GuardEvent::RedirectToLogin);
                CheckOutcome::Unauthenticated
            }
        }
    }

    /// Check once now and again whenever the token value changes.
    pub fn watch(self: &Arc<Self>, shutdown: CancellationToken) -> JoinHandle<()> {
        let guard = Arc::clone(self);
        let mut rx = guard.session.subscribe();

        tokio::spawn(async move {
            let mut last = rx.borrow_and_update().token().map(str::to_string);
            guard.check().await;

            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    changed = rx.changed() => {
                        if changed.is_err() {
                            break;
                        }
                    }
                }

                let current = rx.borrow_and_update().token().map(str::to_string);
                if current == last {
                    continue;
                }
                last = current;
                guard.check().await;
            }
            tracing::debug!("Session watcher stopped");
        })
    }

    /// Validate, authenticate, then persist the new session.
    pub async fn login(&self, username: &str, password: &str) -> Result<Session, AuthError> {
        validate_login(username, password)?;

        let response = self
            .api
            .login(&LoginRequest {
                username: username.trim().to_string(),
                password: password.to_string(),
            })
            .await?;

        let session = Session {
            token: response.token,
            user: response.user,
        };
        self.session.establish(session.clone())?;
        tracing::info!("Logged in as {}", session.user.username);
        Ok(session)
    }

    /// Validate and create an account. Does not log in.
    pub async fn signup(
        &self,
        username: &str,
        email: &str,
        password: &str,
        confirm_password: &str,
    ) -> Result<(), AuthError> {
        validate_signup(username, email, password, confirm_password)?;

        self.api
            .signup(&SignupRequest {
                username: username.trim().to_string(),
                email: email.trim().to_string(),
                password: password.to_string(),
            })
            .await
            .map_err(AuthError::Api)?;
        tracing::info!("Created account {}", username.trim());
        Ok(())
    }

    pub fn logout(&self) -> Result<(), SessionStoreError> {
        self.session.clear()?;
        tracing::info!("Logged out");
        Ok(())
    }
}
