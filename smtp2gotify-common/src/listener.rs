use std::{io, net::SocketAddr, time::Duration};

use futures_util::future::join_all;
use tokio::{net::TcpListener, sync::broadcast::Receiver};

use crate::{
    Signal,
    error::ListenerError,
    internal, shutdown_signalled,
    traits::protocol::{Protocol, SessionHandler},
};

/// Accepts TCP connections for a protocol and runs one task per session.
pub struct Listener<Proto: Protocol> {
    handler: Proto,
    socket: SocketAddr,
}

impl<Proto: Protocol> Listener<Proto> {
    #[must_use]
    pub const fn new(handler: Proto, socket: SocketAddr) -> Self {
        Self { handler, socket }
    }

    #[must_use]
    pub const fn socket(&self) -> SocketAddr {
        self.socket
    }

    ///
    /// Validate the protocol before binding
    ///
    /// # Errors
    /// Whatever the protocol rejects about its own settings
    ///
    pub fn init(&self) -> Result<(), ListenerError> {
        internal!("Initialising {} listener on {}", Proto::ty(), self.socket);
        self.handler.validate().map_err(ListenerError::from)
    }

    ///
    /// Bind the configured socket and serve until shutdown
    ///
    /// # Errors
    /// If the socket can't be bound
    ///
    #[tracing::instrument(level = tracing::Level::TRACE, skip_all, fields(socket = %self.socket), err)]
    pub async fn serve(&self, shutdown: Receiver<Signal>) -> Result<(), ListenerError> {
        let listener =
            TcpListener::bind(self.socket)
                .await
                .map_err(|source| ListenerError::BindFailed {
                    address: self.socket.to_string(),
                    source,
                })?;

        self.serve_on(listener, shutdown).await
    }

    ///
    /// Serve an already bound socket until shutdown
    ///
    /// Once [`Signal::Shutdown`] arrives no new connections are accepted, and
    /// the call returns after every running session has finished. A failed
    /// `accept` is logged and the loop carries on.
    ///
    /// # Errors
    /// If the socket's local address can't be read
    ///
    pub async fn serve_on(
        &self,
        listener: TcpListener,
        mut shutdown: Receiver<Signal>,
    ) -> Result<(), ListenerError> {
        let local = listener.local_addr()?;
        internal!(level = INFO, "{} listening on {local}", Proto::ty());

        let mut sessions = Vec::default();

        loop {
            tokio::select! {
                () = shutdown_signalled(&mut shutdown) => {
                    internal!(
                        level = INFO,
                        "{} Listener {local} received Shutdown signal, finishing sessions ...",
                        Proto::ty()
                    );
                    join_all(sessions).await;
                    return Ok(());
                }

                connection = listener.accept() => {
                    let (stream, peer) = match connection {
                        Ok(accepted) => accepted,
                        Err(err) => {
                            internal!(level = WARN, "Failed to accept connection on {local}: {err}");
                            tokio::time::sleep(accept_backoff(&err)).await;
                            continue;
                        }
                    };
                    tracing::debug!("Connection received on {local} from {peer}");

                    match self.handler.handle(stream, peer) {
                        Ok(session) => {
                            let signal = shutdown.resubscribe();
                            sessions.retain(|task: &tokio::task::JoinHandle<()>| !task.is_finished());
                            sessions.push(tokio::spawn(async move {
                                if let Err(err) = session.run(signal).await {
                                    internal!(level = ERROR, "Session with {peer} failed: {err}");
                                }
                            }));
                        }
                        Err(err) => {
                            internal!(level = WARN, "Refused connection from {peer}: {err}");
                        }
                    }
                }
            }
        }
    }
}

/// How long to pause after a failed `accept`.
///
/// Errors tied to a single connection are retried straight away; anything
/// else (usually running out of descriptors) waits for sessions to finish.
fn accept_backoff(err: &io::Error) -> Duration {
    match err.kind() {
        io::ErrorKind::ConnectionAborted
        | io::ErrorKind::ConnectionReset
        | io::ErrorKind::Interrupted
        | io::ErrorKind::WouldBlock => Duration::ZERO,
        _ => Duration::from_millis(100),
    }
}
