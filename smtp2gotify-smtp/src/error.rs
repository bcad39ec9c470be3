//! Error types for the SMTP side of the relay.
//!
//! [`SessionError`] is what the session hands back to the protocol engine for
//! a single command; [`ConnectionError`] ends the connection.

use std::{borrow::Cow, io};

use smtp2gotify_common::status::Status;
use thiserror::Error;

/// A command the session refused, or a body it couldn't take.
#[derive(Debug, Error)]
pub enum SessionError {
    /// A mail transaction command arrived before `AUTH`.
    #[error("Authentication required")]
    AuthRequired,

    /// Username or password didn't match; which one is never revealed.
    #[error("Authentication failed")]
    AuthFailed,

    /// `RCPT` or `DATA` without a preceding `MAIL`.
    #[error("No mail transaction in progress")]
    NoTransaction,

    #[error("Too many recipients (maximum {max})")]
    TooManyRecipients { max: usize },

    #[error("Message exceeds {max} bytes")]
    MessageTooLarge { max: usize },

    /// Reading the message body failed or timed out.
    #[error("Failed to read message body: {0}")]
    Read(#[source] io::Error),

    /// The server began shutting down while the body was being read.
    #[error("Cancelled by server shutdown")]
    Cancelled,

    /// The connection wasn't accepted.
    #[error("Connection rejected: {0}")]
    Rejected(Cow<'static, str>),
}

impl SessionError {
    /// The reply sent to the client for this error.
    #[must_use]
    pub fn reply(&self) -> (Status, Cow<'static, str>) {
        match self {
            Self::AuthRequired => (Status::AuthRequired, Cow::Borrowed("Authentication required")),
            Self::AuthFailed => (
                Status::AuthFailed,
                Cow::Borrowed("Authentication credentials invalid"),
            ),
            Self::NoTransaction => (
                Status::InvalidCommandSequence,
                Cow::Borrowed("No mail transaction in progress"),
            ),
            Self::TooManyRecipients { max } => (
                Status::InsufficientStorage,
                Cow::Owned(format!("Too many recipients, at most {max} allowed")),
            ),
            Self::MessageTooLarge { max } => (
                Status::ExceededStorage,
                Cow::Owned(format!("Message exceeds maximum size of {max} bytes")),
            ),
            Self::Read(err) if err.kind() == io::ErrorKind::TimedOut => (
                Status::Unavailable,
                Cow::Borrowed("Timed out waiting for message data"),
            ),
            Self::Read(_) => (
                Status::TransactionFailed,
                Cow::Borrowed("Error reading message data"),
            ),
            Self::Cancelled => (Status::Unavailable, Cow::Borrowed("Server shutting down")),
            Self::Rejected(reason) => (Status::Unavailable, reason.clone()),
        }
    }
}

/// The message body has no empty line between headers and content.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("Message has no header/content separator")]
pub struct MalformedBody;

/// Errors that end a connection.
#[derive(Debug, Error)]
pub enum ConnectionError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// The client said nothing for too long.
    #[error("Timed out after {0} seconds")]
    Timeout(u64),

    #[error("Command line longer than {max} bytes")]
    LineTooLong { max: usize },

    /// Connection was closed by peer.
    #[error("Connection closed by peer")]
    Closed,

    /// The session refused the connection or couldn't carry on.
    #[error(transparent)]
    Session(#[from] SessionError),
}

pub type ConnectionResult<T> = Result<T, ConnectionError>;

#[cfg(test)]
mod tests {
    use std::error::Error as _;

    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn replies() {
        assert_eq!(
            SessionError::AuthRequired.reply(),
            (Status::AuthRequired, Cow::Borrowed("Authentication required"))
        );
        assert_eq!(SessionError::AuthFailed.reply().0, Status::AuthFailed);
        assert_eq!(
            SessionError::TooManyRecipients { max: 2 }.reply(),
            (
                Status::InsufficientStorage,
                Cow::Borrowed("Too many recipients, at most 2 allowed")
            )
        );
        assert_eq!(
            SessionError::MessageTooLarge { max: 10 }.reply().0,
            Status::ExceededStorage
        );
        assert_eq!(SessionError::Cancelled.reply().0, Status::Unavailable);
    }

    #[test]
    fn read_timeout_is_temporary() {
        let timeout = SessionError::Read(io::Error::from(io::ErrorKind::TimedOut));
        assert!(timeout.reply().0.is_temporary());

        let eof = SessionError::Read(io::Error::from(io::ErrorKind::UnexpectedEof));
        assert_eq!(eof.reply().0, Status::TransactionFailed);
        assert!(eof.source().is_some());
    }

    #[test]
    fn connection_error_display() {
        assert_eq!(
            ConnectionError::Closed.to_string(),
            "Connection closed by peer"
        );
        assert_eq!(
            ConnectionError::LineTooLong { max: 512 }.to_string(),
            "Command line longer than 512 bytes"
        );
        assert_eq!(
            ConnectionError::from(SessionError::Rejected(Cow::Borrowed("Too many connections")))
                .to_string(),
            "Connection rejected: Too many connections"
        );
    }
}
