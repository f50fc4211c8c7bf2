//! Session management
//!
//! Owns the authenticated session shared by all workers. A session is
//! created lazily on first use; when a worker reports it expired, it is
//! discarded and the next caller creates a fresh one. Concurrent expiry
//! reports for the same session coalesce into a single re-authentication.

use crate::api::{ApiError, Credential, SearchApi};
use crate::crawler::retry::RetryPolicy;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::Mutex;

/// Session creation failed for good
#[derive(Debug, Clone, Error)]
pub enum AuthError {
    /// The server refused the identifier or app password
    #[error("credentials rejected: {0}")]
    Rejected(String),

    /// Transient failures persisted past the attempt limit
    #[error("could not create a session after {attempts} attempts: {last}")]
    Unavailable { attempts: u32, last: String },
}

/// An authenticated session
#[derive(Debug)]
pub struct Session {
    credential: Credential,
    generation: u64,
}

impl Session {
    pub fn credential(&self) -> &Credential {
        &self.credential
    }

    /// Increases by one every time a session is created
    pub fn generation(&self) -> u64 {
        self.generation
    }
}

#[derive(Default)]
struct SessionSlot {
    session: Option<Arc<Session>>,
    /// Set once session creation failed for good; later callers get it too
    failure: Option<AuthError>,
}

/// Creates, shares and replaces the crawl's session
pub struct SessionManager {
    api: Arc<dyn SearchApi>,
    identifier: String,
    password: String,
    policy: RetryPolicy,
    max_attempts: u32,
    current: Mutex<SessionSlot>,
    generation: AtomicU64,
}

impl SessionManager {
    /// # Arguments
    ///
    /// * `api` - The search API
    /// * `identifier` - Handle or email of the account
    /// * `password` - App password
    /// * `policy` - Backoff used between transient failures
    /// * `max_attempts` - Session creation attempts before giving up
    pub fn new(
        api: Arc<dyn SearchApi>,
        identifier: impl Into<String>,
        password: impl Into<String>,
        policy: RetryPolicy,
        max_attempts: u32,
    ) -> Self {
        Self {
            api,
            identifier: identifier.into(),
            password: password.into(),
            policy,
            max_attempts: max_attempts.max(1),
            current: Mutex::new(SessionSlot::default()),
            generation: AtomicU64::new(0),
        }
    }

    /// Returns the current session, creating one if there is none
    ///
    /// Callers arriving while a session is being created wait for it
    /// instead of creating their own. Once creation has failed for good,
    /// every caller gets the same error without contacting the server.
    pub async fn acquire(&self) -> Result<Arc<Session>, AuthError> {
        let mut current = self.current.lock().await;
        if let Some(failure) = &current.failure {
            return Err(failure.clone());
        }
        if let Some(session) = &current.session {
            return Ok(Arc::clone(session));
        }

        let credential = match self.authenticate().await {
            Ok(credential) => credential,
            Err(e) => {
                current.failure = Some(e.clone());
                return Err(e);
            }
        };
        let generation = self.generation.fetch_add(1, Ordering::AcqRel) + 1;
        tracing::info!(
            "Authenticated as {} (session {})",
            credential.handle,
            generation
        );

        let session = Arc::new(Session {
            credential,
            generation,
        });
        current.session = Some(Arc::clone(&session));
        Ok(session)
    }

    /// Discards `session` after it was reported expired
    ///
    /// Does nothing when a newer session has already replaced it.
    pub async fn invalidate(&self, session: &Session) {
        let mut current = self.current.lock().await;
        if current
            .session
            .as_ref()
            .is_some_and(|active| active.generation == session.generation)
        {
            tracing::info!("Session {} expired, re-authenticating", session.generation);
            current.session = None;
        }
    }

    /// Ends the current session, if any
    ///
    /// Teardown is best effort; failures are logged and ignored.
    pub async fn close(&self) {
        let Some(session) = self.current.lock().await.session.take() else {
            return;
        };

        match self.api.close_session(&session.credential).await {
            Ok(()) => tracing::debug!("Closed session {}", session.generation),
            Err(e) => tracing::debug!("Failed to close session {}: {}", session.generation, e),
        }
    }

    /// Number of sessions created so far
    pub fn sessions_created(&self) -> u64 {
        self.generation.load(Ordering::Acquire)
    }

    async fn authenticate(&self) -> Result<Credential, AuthError> {
        let mut attempt = 0;
        loop {
            attempt += 1;
            let error = match self.api.authenticate(&self.identifier, &self.password).await {
                Ok(credential) => return Ok(credential),
                Err(ApiError::Unauthorized { message, .. })
                | Err(ApiError::Rejected { message, .. }) => {
                    return Err(AuthError::Rejected(message))
                }
                Err(e) => e,
            };

            if attempt >= self.max_attempts {
                return Err(AuthError::Unavailable {
                    attempts: attempt,
                    last: error.to_string(),
                });
            }

            let hint = match &error {
                ApiError::RateLimited { retry_after } => *retry_after,
                _ => None,
            };
            let delay = self.policy.backoff_with_hint(attempt - 1, hint);
            tracing::warn!(
                "Session creation failed (attempt {}/{}): {}; retrying in {:?}",
                attempt,
                self.max_attempts,
                error,
                delay
            );
            tokio::time::sleep(delay).await;
        }
    }
}
