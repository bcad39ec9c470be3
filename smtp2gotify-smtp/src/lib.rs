pub mod auth;
pub mod backend;
pub mod command;
pub mod connection;
pub mod data;
pub mod error;
pub mod handler;
pub mod message;
pub mod session;
pub mod state;

use std::{net::SocketAddr, sync::Arc, time::Duration};

use smtp2gotify_common::{
    Signal, outgoing,
    config::ServerTimeouts,
    error::ProtocolError,
    traits::protocol::{Protocol, SessionHandler},
};
use tokio::{
    io::{AsyncRead, AsyncWrite, AsyncWriteExt},
    net::TcpStream,
};

pub use crate::{
    backend::{Backend, Limits},
    error::{ConnectionError, SessionError},
    handler::Handler,
    session::Session,
};

/// SMTP submission, served by a [`Listener`](smtp2gotify_common::listener::Listener).
#[derive(Debug, Clone)]
pub struct Smtp {
    backend: Backend,
    banner: Arc<str>,
    timeouts: ServerTimeouts,
}

impl Smtp {
    #[must_use]
    pub fn new(backend: Backend, banner: impl Into<Arc<str>>, timeouts: ServerTimeouts) -> Self {
        Self {
            backend,
            banner: banner.into(),
            timeouts,
        }
    }
}

impl Protocol for Smtp {
    type Session = Handler<TcpStream>;

    fn ty() -> &'static str {
        "SMTP"
    }

    #[tracing::instrument(level = tracing::Level::TRACE, skip(self, stream))]
    fn handle(&self, stream: TcpStream, peer: SocketAddr) -> Result<Self::Session, ConnectionError> {
        match self.backend.new_session(peer) {
            Ok(session) => Ok(Handler::new(
                session,
                stream,
                Arc::clone(&self.banner),
                self.timeouts,
            )),
            Err(err) => {
                let (status, text) = err.reply();
                tokio::spawn(refuse(
                    stream,
                    peer,
                    format!("{status} {text}"),
                    self.timeouts.write(),
                ));
                Err(ConnectionError::Session(err))
            }
        }
    }

    fn validate(&self) -> Result<(), ProtocolError> {
        let limits = self.backend.limits();

        for (field, value) in [
            ("max_message_bytes", limits.max_message_bytes),
            ("max_recipients", limits.max_recipients),
            ("max_connections", limits.max_connections),
        ] {
            if value == 0 {
                return Err(ProtocolError::InvalidConfiguration {
                    field,
                    reason: String::from("must be greater than zero"),
                });
            }
        }

        if self.banner.trim().is_empty() {
            return Err(ProtocolError::InvalidConfiguration {
                field: "host",
                reason: String::from("banner hostname is empty"),
            });
        }

        Ok(())
    }
}

/// Tell a refused client why, then close the connection.
async fn refuse(mut stream: TcpStream, peer: SocketAddr, reply: String, timeout: Duration) {
    let write = async {
        stream.write_all(format!("{reply}\r\n").as_bytes()).await?;
        stream.flush().await?;
        stream.shutdown().await
    };

    match tokio::time::timeout(timeout, write).await {
        Ok(Ok(())) => outgoing!("{reply}"),
        Ok(Err(err)) => tracing::warn!(%peer, "Failed to send refusal: {err}"),
        Err(_) => tracing::warn!(%peer, "Timed out sending refusal"),
    }
}

impl<Stream: AsyncRead + AsyncWrite + Unpin + Send + 'static> SessionHandler for Handler<Stream> {
    type Error = ConnectionError;

    async fn run(self, signal: tokio::sync::broadcast::Receiver<Signal>) -> Result<(), Self::Error> {
        Self::run(self, signal).await
    }
}
