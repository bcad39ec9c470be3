//! The per-connection session.
//!
//! A [`Session`] holds the authentication state and the mail transaction of a
//! single connection. The protocol engine calls it once per accepted command,
//! strictly in order; nothing here is shared with other connections except
//! read-only configuration.

use std::{net::SocketAddr, sync::Arc};

use smtp2gotify_common::{
    Signal, shutdown_signalled,
    traits::sink::NotificationSink,
};
use tokio::{
    io::{AsyncRead, AsyncReadExt},
    sync::{OwnedSemaphorePermit, broadcast},
};

use crate::{auth::{self, Credentials}, backend::Limits, error::SessionError, message};

/// What the transport should do once a command has been handled.
#[derive(PartialEq, Eq, Debug, Clone, Copy)]
pub enum Event {
    ConnectionClose,
    ConnectionKeepAlive,
}

/// The message being assembled between `MAIL` and the end of `DATA`.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Transaction {
    sender: String,
    recipients: Vec<String>,
    body: Vec<u8>,
}

impl Transaction {
    /// Reverse path, empty for the null sender.
    #[must_use]
    pub fn sender(&self) -> &str {
        &self.sender
    }

    #[must_use]
    pub fn recipients(&self) -> &[String] {
        &self.recipients
    }

    #[must_use]
    pub fn body(&self) -> &[u8] {
        &self.body
    }
}

pub struct Session {
    id: String,
    peer: SocketAddr,
    authenticated: bool,
    transaction: Option<Transaction>,
    credentials: Arc<Credentials>,
    sink: Arc<dyn NotificationSink>,
    limits: Limits,
    shutdown: broadcast::Receiver<Signal>,
    _permit: OwnedSemaphorePermit,
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("peer", &self.peer)
            .field("authenticated", &self.authenticated)
            .field("transaction", &self.transaction)
            .finish_non_exhaustive()
    }
}

impl Session {
    pub(crate) fn new(
        id: String,
        peer: SocketAddr,
        credentials: Arc<Credentials>,
        sink: Arc<dyn NotificationSink>,
        limits: Limits,
        shutdown: broadcast::Receiver<Signal>,
        permit: OwnedSemaphorePermit,
    ) -> Self {
        Self {
            id,
            peer,
            authenticated: false,
            transaction: None,
            credentials,
            sink,
            limits,
            shutdown,
            _permit: permit,
        }
    }

    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    #[must_use]
    pub const fn peer(&self) -> SocketAddr {
        self.peer
    }

    #[must_use]
    pub const fn limits(&self) -> Limits {
        self.limits
    }

    #[must_use]
    pub const fn is_authenticated(&self) -> bool {
        self.authenticated
    }

    #[must_use]
    pub const fn transaction(&self) -> Option<&Transaction> {
        self.transaction.as_ref()
    }

    /// SASL mechanisms this session accepts.
    #[must_use]
    pub const fn auth_mechanisms(&self) -> &'static [&'static str] {
        &auth::MECHANISMS
    }

    ///
    /// Check a `PLAIN` username and password
    ///
    /// A successful check authenticates the session for the rest of the
    /// connection. A failed one leaves the state as it was. The hash is
    /// checked on the blocking pool so other sessions keep running.
    ///
    /// # Errors
    /// [`SessionError::AuthFailed`], whichever of the two didn't match
    ///
    pub async fn auth_plain(&mut self, username: &str, password: &str) -> Result<(), SessionError> {
        let credentials = Arc::clone(&self.credentials);
        let (user, pass) = (username.to_owned(), password.to_owned());

        let verified = tokio::task::spawn_blocking(move || credentials.verify(&user, &pass))
            .await
            .unwrap_or_else(|err| {
                tracing::error!(id = %self.id, "Password check did not complete: {err}");
                false
            });

        if verified {
            self.authenticated = true;
            tracing::info!(id = %self.id, %username, "Authenticated");
            Ok(())
        } else {
            tracing::debug!(id = %self.id, %username, "Authentication failed");
            Err(SessionError::AuthFailed)
        }
    }

    ///
    /// Begin a transaction from `sender`
    ///
    /// Any transaction already in progress is replaced.
    ///
    /// # Errors
    /// [`SessionError::AuthRequired`] before authentication
    ///
    pub fn mail(&mut self, sender: impl Into<String>) -> Result<(), SessionError> {
        self.ensure_authenticated()?;

        self.transaction = Some(Transaction {
            sender: sender.into(),
            ..Transaction::default()
        });

        Ok(())
    }

    ///
    /// Add a recipient to the current transaction
    ///
    /// # Errors
    /// [`SessionError::AuthRequired`] before authentication,
    /// [`SessionError::NoTransaction`] without a prior [`Session::mail`], and
    /// [`SessionError::TooManyRecipients`] past the configured limit
    ///
    pub fn rcpt(&mut self, recipient: impl Into<String>) -> Result<(), SessionError> {
        self.ensure_authenticated()?;

        let max = self.limits.max_recipients;
        let transaction = self
            .transaction
            .as_mut()
            .ok_or(SessionError::NoTransaction)?;

        if transaction.recipients.len() >= max {
            return Err(SessionError::TooManyRecipients { max });
        }

        transaction.recipients.push(recipient.into());
        Ok(())
    }

    ///
    /// Read the message body from `reader`, then [`flush`](Session::flush) it
    ///
    /// The body is read until `reader` reports end of file, up to the
    /// configured maximum size. A server shutdown cancels the read. Whenever
    /// an error is returned after reading started, the transaction is gone.
    ///
    /// Notification delivery problems are not reported here.
    ///
    /// # Errors
    /// [`SessionError::AuthRequired`] and [`SessionError::NoTransaction`]
    /// before anything is read; [`SessionError::Read`],
    /// [`SessionError::MessageTooLarge`] or [`SessionError::Cancelled`] if
    /// the body couldn't be taken
    ///
    #[tracing::instrument(level = tracing::Level::TRACE, skip_all, fields(id = %self.id), err)]
    pub async fn data<R: AsyncRead + Unpin + Send>(
        &mut self,
        reader: R,
    ) -> Result<(), SessionError> {
        self.ensure_authenticated()?;

        if self.transaction.is_none() {
            return Err(SessionError::NoTransaction);
        }

        let max = self.limits.max_message_bytes;
        let limit = u64::try_from(max).unwrap_or(u64::MAX).saturating_add(1);
        let mut body = Vec::new();

        let mut limited = reader.take(limit);

        let read = tokio::select! {
            read = limited.read_to_end(&mut body) => read.map_err(SessionError::Read),
            () = shutdown_signalled(&mut self.shutdown) => Err(SessionError::Cancelled),
        };

        let result = read.and_then(|_| {
            if body.len() > max {
                Err(SessionError::MessageTooLarge { max })
            } else {
                Ok(())
            }
        });

        if let Err(err) = result {
            tracing::debug!(id = %self.id, "Discarding transaction: {err}");
            self.transaction = None;
            return Err(err);
        }

        if let Some(transaction) = self.transaction.as_mut() {
            transaction.body = body;
        }

        self.flush().await;
        Ok(())
    }

    /// Hand the finished transaction to the notification sink.
    ///
    /// The transaction is always cleared, whether or not delivery worked.
    /// Delivery failures are logged and otherwise ignored.
    pub async fn flush(&mut self) {
        let Some(transaction) = self.transaction.take() else {
            return;
        };

        let notification = message::notification(&transaction.body);

        tracing::info!(
            id = %self.id,
            sender = %transaction.sender,
            recipients = transaction.recipients.len(),
            "Forwarding message"
        );

        if let Err(err) = self.sink.send(&notification).await {
            tracing::error!(id = %self.id, "Failed to deliver notification: {err}");
        }
    }

    /// Abandon the current transaction. Authentication is kept.
    pub fn reset(&mut self) {
        self.transaction = None;
    }

    /// Abandon the current transaction and ask for the connection to close.
    pub fn logout(&mut self) -> Event {
        self.reset();
        Event::ConnectionClose
    }

    const fn ensure_authenticated(&self) -> Result<(), SessionError> {
        if self.authenticated {
            Ok(())
        } else {
            Err(SessionError::AuthRequired)
        }
    }
}
