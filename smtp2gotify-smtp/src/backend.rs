use std::{borrow::Cow, fmt, net::SocketAddr, sync::Arc};

use smtp2gotify_common::{Signal, traits::sink::NotificationSink};
use tokio::sync::{Semaphore, TryAcquireError, broadcast};

use crate::{auth::Credentials, error::SessionError, session::Session};

/// Size and count limits applied to every session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Limits {
    pub max_message_bytes: usize,
    pub max_recipients: usize,
    pub max_connections: usize,
}

impl Default for Limits {
    fn default() -> Self {
        Self {
            max_message_bytes: 1024 * 1024,
            max_recipients: 50,
            max_connections: 100,
        }
    }
}

/// Source of session identifiers, used to correlate log lines.
pub trait IdGenerator: Send + Sync {
    fn generate(&self) -> String;
}

/// Lexicographically sortable identifiers, so sessions order by start time.
#[derive(Debug, Default, Clone, Copy)]
pub struct UlidGenerator;

impl IdGenerator for UlidGenerator {
    fn generate(&self) -> String {
        ulid::Ulid::new().to_string()
    }
}

/// Creates a [`Session`] for every accepted connection.
///
/// Everything a session receives from here is shared read-only; the backend
/// keeps nothing about individual connections beyond the permit that caps how
/// many run at once.
#[derive(Clone)]
pub struct Backend {
    credentials: Arc<Credentials>,
    sink: Arc<dyn NotificationSink>,
    ids: Arc<dyn IdGenerator>,
    limits: Limits,
    shutdown: broadcast::Sender<Signal>,
    connections: Arc<Semaphore>,
}

impl fmt::Debug for Backend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Backend")
            .field("username", &self.credentials.username())
            .field("limits", &self.limits)
            .field("available", &self.connections.available_permits())
            .finish_non_exhaustive()
    }
}

impl Backend {
    #[must_use]
    pub fn new(
        credentials: Arc<Credentials>,
        sink: Arc<dyn NotificationSink>,
        limits: Limits,
        shutdown: broadcast::Sender<Signal>,
    ) -> Self {
        Self {
            credentials,
            sink,
            ids: Arc::new(UlidGenerator),
            limits,
            shutdown,
            connections: Arc::new(Semaphore::new(
                limits.max_connections.min(Semaphore::MAX_PERMITS),
            )),
        }
    }

    #[must_use]
    pub fn with_id_generator(mut self, ids: Arc<dyn IdGenerator>) -> Self {
        self.ids = ids;
        self
    }

    #[must_use]
    pub const fn limits(&self) -> Limits {
        self.limits
    }

    ///
    /// Create the session for a newly accepted connection
    ///
    /// # Errors
    /// [`SessionError::Rejected`] if the connection limit has been reached
    ///
    pub fn new_session(&self, peer: SocketAddr) -> Result<Session, SessionError> {
        let permit = Arc::clone(&self.connections)
            .try_acquire_owned()
            .map_err(|err| match err {
                TryAcquireError::NoPermits => {
                    tracing::warn!(%peer, "Connection limit reached, rejecting");
                    SessionError::Rejected(Cow::Borrowed("Too many connections, try again later"))
                }
                TryAcquireError::Closed => {
                    SessionError::Rejected(Cow::Borrowed("Server shutting down"))
                }
            })?;

        let id = self.ids.generate();
        tracing::debug!(%id, %peer, "New session");

        Ok(Session::new(
            id,
            peer,
            Arc::clone(&self.credentials),
            Arc::clone(&self.sink),
            self.limits,
            self.shutdown.subscribe(),
            permit,
        ))
    }
}
