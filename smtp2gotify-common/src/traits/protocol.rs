use std::net::SocketAddr;

use tokio::net::TcpStream;

use crate::{Signal, error::ProtocolError};

/// One accepted connection, ready to be driven to completion.
pub trait SessionHandler {
    type Error: std::error::Error + Send + Sync + 'static;

    fn run(
        self,
        signal: tokio::sync::broadcast::Receiver<Signal>,
    ) -> impl std::future::Future<Output = Result<(), Self::Error>> + Send;
}

/// A protocol served by a [`Listener`](crate::listener::Listener).
pub trait Protocol: Send + Sync + 'static {
    type Session: SessionHandler + Send + 'static;

    ///
    /// Build the session for a freshly accepted connection
    ///
    /// # Errors
    /// The protocol may refuse the connection, in which case the stream is dropped.
    ///
    fn handle(
        &self,
        stream: TcpStream,
        peer: SocketAddr,
    ) -> Result<Self::Session, <Self::Session as SessionHandler>::Error>;

    ///
    /// Validate the protocol's settings before the listener binds
    ///
    /// # Errors
    /// Any setting that would make every session fail, e.g. a zero message size limit.
    ///
    fn validate(&self) -> Result<(), ProtocolError>;

    fn ty() -> &'static str;
}
