pub mod config;
pub mod error;
pub mod listener;
pub mod logging;
pub mod status;
pub mod traits;

pub use tracing;

/// Process-wide lifecycle signal, broadcast to every listener and session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Signal {
    Shutdown,
}

/// Wait until [`Signal::Shutdown`] is broadcast.
///
/// Missed messages are skipped over. If every sender is gone no shutdown can
/// arrive any more, so this never completes.
pub async fn shutdown_signalled(receiver: &mut tokio::sync::broadcast::Receiver<Signal>) {
    use tokio::sync::broadcast::error::RecvError;

    loop {
        match receiver.recv().await {
            Ok(Signal::Shutdown) => return,
            Err(RecvError::Lagged(_)) => {}
            Err(RecvError::Closed) => std::future::pending::<()>().await,
        }
    }
}
