use std::sync::{Arc, LazyLock};

use anyhow::Context;
use smtp2gotify_common::{
    Signal, config::Config, internal, listener::Listener, traits::sink::NotificationSink,
};
use smtp2gotify_gotify::GotifyClient;
use smtp2gotify_smtp::{Backend, Limits, Smtp, auth::Credentials};
use tokio::sync::broadcast;

pub static SHUTDOWN_BROADCAST: LazyLock<broadcast::Sender<Signal>> = LazyLock::new(|| {
    let (sender, _receiver) = broadcast::channel(64);
    sender
});

/// Wait for SIGINT or SIGTERM, then tell everything to shut down.
#[tracing::instrument(level = tracing::Level::TRACE)]
async fn shutdown() -> anyhow::Result<()> {
    let mut terminate = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())?;

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            internal!(level = INFO, "CTRL+C entered, shutting down");
        }
        _ = terminate.recv() => {
            internal!(level = INFO, "Terminate Signal received, shutting down");
        }
    };

    SHUTDOWN_BROADCAST
        .send(Signal::Shutdown)
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::Interrupted, e.to_string()))?;

    Ok(())
}

///
/// Build the SMTP listener for `config`, delivering to `sink`
///
/// # Errors
/// If the password hash in the configuration is unusable, or the protocol
/// settings fail validation
///
pub fn listener(
    config: &Config,
    sink: Arc<dyn NotificationSink>,
    shutdown: broadcast::Sender<Signal>,
) -> anyhow::Result<Listener<Smtp>> {
    let smtp = &config.smtp;

    let credentials = Credentials::new(smtp.username.as_str(), smtp.password_hash.as_str())
        .context("Invalid smtp.password_hash")?;

    let backend = Backend::new(
        Arc::new(credentials),
        sink,
        Limits {
            max_message_bytes: smtp.max_message_bytes,
            max_recipients: smtp.max_recipients,
            max_connections: smtp.max_connections,
        },
        shutdown,
    );

    let listener = Listener::new(
        Smtp::new(backend, smtp.host.as_str(), smtp.timeouts),
        smtp.socket(),
    );
    listener.init()?;

    Ok(listener)
}

/// The relay: one SMTP listener feeding one Gotify server.
pub struct Relay {
    config: Config,
}

impl Relay {
    #[must_use]
    pub const fn new(config: Config) -> Self {
        Self { config }
    }

    /// Run the relay until SIGINT or SIGTERM
    ///
    /// # Errors
    ///
    /// This function will return an error if the configuration is unusable or
    /// the listener can't be bound.
    #[tracing::instrument(level = tracing::Level::TRACE, skip_all, err)]
    pub async fn run(self) -> anyhow::Result<()> {
        self.config.validate()?;

        internal!("Controller running");

        let gotify = &self.config.gotify;
        let client = GotifyClient::new(&gotify.url, gotify.token.as_str(), gotify.priority)?;

        match client.version().await {
            Ok(version) => {
                tracing::info!(version = %version.version, "Connected to Gotify server");
            }
            Err(err) => tracing::warn!("Failed to fetch Gotify server version: {err}"),
        }

        let listener = listener(
            &self.config,
            Arc::new(client),
            SHUTDOWN_BROADCAST.clone(),
        )?;

        let signals = tokio::spawn(shutdown());
        let served = listener.serve(SHUTDOWN_BROADCAST.subscribe()).await;
        signals.abort();

        internal!(level = INFO, "Shut down");

        Ok(served?)
    }
}
