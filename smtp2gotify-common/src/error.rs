//! Error types shared by the smtp2gotify crates.
//!
//! Protocol sessions have their own error types; the ones here cover
//! startup (configuration, listener binding) and the notification sink seam.

use std::{io, path::PathBuf};

use thiserror::Error;

/// Errors that can occur while validating a protocol before serving it.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// A configuration value is invalid.
    #[error("Invalid configuration for {field}: {reason}")]
    InvalidConfiguration { field: &'static str, reason: String },
}

/// Errors that can occur in the listener.
#[derive(Debug, Error)]
pub enum ListenerError {
    /// Failed to bind to socket address.
    #[error("Failed to bind to {address}: {source}")]
    BindFailed {
        address: String,
        #[source]
        source: io::Error,
    },

    /// Failed to accept an incoming connection.
    #[error("Failed to accept connection: {0}")]
    AcceptFailed(#[from] io::Error),

    /// The protocol refused to start.
    #[error("Protocol validation failed: {0}")]
    Protocol(#[from] ProtocolError),
}

/// Errors raised while loading or validating configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The configuration file could not be read.
    #[error("Failed to read config from {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// The configuration file is not valid RON.
    #[error("Failed to parse config: {0}")]
    Parse(#[from] ron::error::SpannedError),

    /// A required field was left empty.
    #[error("Missing required field: {0}")]
    MissingField(&'static str),

    /// A field holds a value that cannot be used.
    #[error("Invalid value for {field}: {reason}")]
    Invalid { field: &'static str, reason: String },
}

/// Errors reported by a notification sink.
///
/// These never reach the mail client; the session logs them and moves on.
#[derive(Debug, Error)]
pub enum SinkError {
    /// The request never completed (DNS, connect, TLS, timeout, ...).
    #[error("Notification transport failed: {0}")]
    Transport(#[source] Box<dyn std::error::Error + Send + Sync>),

    /// The remote service answered with a non-success status.
    #[error("Notification rejected with status {status}: {message}")]
    Rejected { status: u16, message: String },
}

#[cfg(test)]
mod tests {
    use std::error::Error as StdError;

    use super::*;

    #[test]
    fn config_error_display() {
        let err = ConfigError::MissingField("smtp.username");
        assert_eq!(err.to_string(), "Missing required field: smtp.username");

        let err = ConfigError::Invalid {
            field: "smtp.port",
            reason: "not a number".to_string(),
        };
        assert_eq!(err.to_string(), "Invalid value for smtp.port: not a number");

        let err = ConfigError::Read {
            path: PathBuf::from("/nowhere/smtp2gotify.config.ron"),
            source: io::Error::new(io::ErrorKind::NotFound, "gone"),
        };
        assert_eq!(
            err.to_string(),
            "Failed to read config from /nowhere/smtp2gotify.config.ron: gone"
        );
        assert!(err.source().is_some());
    }

    #[test]
    fn sink_error_display() {
        let err = SinkError::Rejected {
            status: 401,
            message: "invalid token".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "Notification rejected with status 401: invalid token"
        );

        let err = SinkError::Transport(Box::new(io::Error::new(
            io::ErrorKind::ConnectionRefused,
            "refused",
        )));
        assert_eq!(err.to_string(), "Notification transport failed: refused");
    }

    #[test]
    fn listener_error_source_chain() {
        let bind_err = ListenerError::BindFailed {
            address: "0.0.0.0:25".to_string(),
            source: io::Error::new(io::ErrorKind::PermissionDenied, "access denied"),
        };

        assert!(bind_err.source().is_some());
        assert_eq!(
            bind_err.to_string(),
            "Failed to bind to 0.0.0.0:25: access denied"
        );
    }
}
