//! The SMTP dialogue for one connection.
//!
//! [`Handler`] reads commands, checks them against the [`Phase`] of the
//! dialogue, hands the accepted ones to the [`Session`] and writes the
//! replies. It owns the connection; the session never sees the wire.

use core::fmt::Display;
use std::sync::Arc;

use base64::{Engine, engine::general_purpose::STANDARD};
use smtp2gotify_common::{
    Signal, config::ServerTimeouts, incoming, internal, outgoing, shutdown_signalled,
    status::Status, traits::fsm::FiniteStateMachine,
};
use tokio::{
    io::{AsyncRead, AsyncWrite},
    sync::broadcast,
};

use crate::{
    command::{Command, HeloVariant, MailParameters},
    connection::Connection,
    error::{ConnectionError, ConnectionResult, SessionError},
    session::Session,
    state::{Greeting, Phase, Step},
};

const HELP: &str = "Supported commands: HELO EHLO AUTH MAIL RCPT DATA RSET NOOP HELP QUIT";

pub struct Handler<Stream: AsyncRead + AsyncWrite + Unpin + Send> {
    session: Session,
    connection: Connection<Stream>,
    phase: Phase,
    greeting: Greeting,
    banner: Arc<str>,
    timeouts: ServerTimeouts,
}

impl<Stream: AsyncRead + AsyncWrite + Unpin + Send> Handler<Stream> {
    pub fn new(
        session: Session,
        stream: Stream,
        banner: Arc<str>,
        timeouts: ServerTimeouts,
    ) -> Self {
        Self {
            session,
            connection: Connection::new(stream, timeouts.write()),
            phase: Phase::default(),
            greeting: Greeting::default(),
            banner,
            timeouts,
        }
    }

    #[must_use]
    pub const fn phase(&self) -> Phase {
        self.phase
    }

    #[must_use]
    pub const fn session(&self) -> &Session {
        &self.session
    }

    ///
    /// Serve the connection until the client quits, goes away or the server
    /// shuts down
    ///
    /// # Errors
    /// Timeouts, I/O failures and a DATA section that couldn't be read. The
    /// client closing the connection between commands is not an error.
    ///
    #[tracing::instrument(
        level = tracing::Level::TRACE,
        skip_all,
        fields(id = %self.session.id(), peer = %self.session.peer()),
        err
    )]
    pub async fn run(mut self, mut signal: broadcast::Receiver<Signal>) -> ConnectionResult<()> {
        internal!("Connected");

        let result = self.serve(&mut signal).await;
        self.session.logout();

        internal!("Connection closed");

        match result {
            Err(ConnectionError::Closed) => Ok(()),
            other => other,
        }
    }

    async fn serve(&mut self, signal: &mut broadcast::Receiver<Signal>) -> ConnectionResult<()> {
        let ready = format!("{} ESMTP smtp2gotify ready", self.banner);
        self.reply(Status::ServiceReady, ready).await?;

        while !self.phase.is_terminal() {
            let timeout = self.timeouts.command();

            let line = tokio::select! {
                () = shutdown_signalled(signal) => None,
                line = self.connection.read_line(timeout) => Some(line),
            };

            let Some(line) = line else {
                internal!(level = DEBUG, "Shutdown while waiting for a command");
                self.reply(Status::Unavailable, "Server shutting down").await?;
                return Ok(());
            };

            match line {
                Ok(line) => self.dispatch(&line).await?,
                Err(ConnectionError::Timeout(secs)) => {
                    tracing::warn!(id = %self.session.id(), phase = %self.phase, "Client timed out after {secs} seconds");
                    self.reply_quietly(Status::Unavailable, "Timed out waiting for command")
                        .await;
                    return Err(ConnectionError::Timeout(secs));
                }
                Err(err @ ConnectionError::LineTooLong { .. }) => {
                    self.reply_quietly(Status::SyntaxError, "Line too long").await;
                    return Err(err);
                }
                Err(err) => return Err(err),
            }
        }

        Ok(())
    }

    async fn dispatch(&mut self, line: &str) -> ConnectionResult<()> {
        let command = Command::try_from(line).unwrap_or_else(|invalid| invalid);
        incoming!("{command}");

        if let Err(reason) = self.phase.permits(&command) {
            return self.reply(Status::InvalidCommandSequence, reason).await;
        }

        match command {
            Command::Helo(variant) => self.helo(variant).await,
            Command::Auth { mechanism, initial } => self.auth(&mechanism, initial).await,
            Command::MailFrom(sender, params) => self.mail(sender, &params).await,
            Command::RcptTo(recipient) => match self.session.rcpt(recipient) {
                Ok(()) => {
                    self.step(Step::Rcpt);
                    self.reply(Status::Ok, "OK").await
                }
                Err(err) => self.reply_error(&err).await,
            },
            Command::Data => self.data().await,
            Command::Rset => {
                self.session.reset();
                self.step(Step::Reset);
                self.reply(Status::Ok, "OK").await
            }
            Command::Noop => self.reply(Status::Ok, "OK").await,
            Command::Help => self.reply(Status::HelpMessage, HELP).await,
            Command::Quit => {
                self.session.logout();
                self.step(Step::Quit);
                let bye = format!("{} closing connection", self.banner);
                self.reply(Status::GoodBye, bye).await
            }
            Command::Invalid(reason) => self.reply(Status::ParameterError, reason).await,
            Command::Unrecognised(_) => {
                self.reply(Status::SyntaxError, "Command not recognised").await
            }
        }
    }

    async fn helo(&mut self, variant: HeloVariant) -> ConnectionResult<()> {
        self.session.reset();

        let extended = matches!(variant, HeloVariant::Ehlo(_));
        self.step(Step::Greet(variant));
        let greets = format!("{} greets {}", self.banner, self.greeting.client);

        if !extended {
            return self.reply(Status::Ok, greets).await;
        }

        let lines = [
            greets,
            format!("AUTH {}", self.session.auth_mechanisms().join(" ")),
            format!("SIZE {}", self.session.limits().max_message_bytes),
            String::from("8BITMIME"),
        ];

        for line in &lines {
            outgoing!("{} {line}", Status::Ok);
        }

        self.connection.send_multiline(Status::Ok, &lines).await
    }

    async fn auth(&mut self, mechanism: &str, initial: Option<String>) -> ConnectionResult<()> {
        if self.session.is_authenticated() {
            return self
                .reply(Status::InvalidCommandSequence, "Already authenticated")
                .await;
        }

        if !self.session.auth_mechanisms().contains(&mechanism) {
            return self
                .reply(
                    Status::ParameterNotImplemented,
                    "Unrecognised authentication mechanism",
                )
                .await;
        }

        let response = match initial {
            Some(initial) => initial,
            None => {
                self.reply(Status::AuthContinue, "").await?;
                // Not logged, this is the password
                self.connection.read_line(self.timeouts.command()).await?
            }
        };

        if response.trim() == "*" {
            return self
                .reply(Status::ParameterError, "Authentication cancelled")
                .await;
        }

        let Some((username, password)) = decode_plain(&response) else {
            return self
                .reply(Status::ParameterError, "Malformed authentication response")
                .await;
        };

        match self.session.auth_plain(&username, &password).await {
            Ok(()) => {
                self.reply(Status::AuthSucceeded, "Authentication successful")
                    .await
            }
            Err(err) => self.reply_error(&err).await,
        }
    }

    async fn mail(&mut self, sender: String, params: &MailParameters) -> ConnectionResult<()> {
        let max = self.session.limits().max_message_bytes;

        if params.size().is_some_and(|size| size > max) {
            return self
                .reply_error(&SessionError::MessageTooLarge { max })
                .await;
        }

        match self.session.mail(sender) {
            Ok(()) => {
                self.step(Step::Mail);
                self.reply(Status::Ok, "OK").await
            }
            Err(err) => self.reply_error(&err).await,
        }
    }

    async fn data(&mut self) -> ConnectionResult<()> {
        if !self.session.is_authenticated() {
            return self.reply_error(&SessionError::AuthRequired).await;
        }

        self.reply(Status::StartMailInput, "End data with <CR><LF>.<CR><LF>")
            .await?;

        let (result, drained) = {
            let mut reader = self.connection.data_reader(self.timeouts.data());
            let result = self.session.data(&mut reader).await;

            // The rest of an oversized message still has to be read past
            let drained = if matches!(result, Err(SessionError::MessageTooLarge { .. }))
                && !reader.is_done()
            {
                tokio::io::copy(&mut reader, &mut tokio::io::sink())
                    .await
                    .map(|_| ())
            } else {
                Ok(())
            };

            (result, drained)
        };

        match result {
            Ok(()) => {
                self.step(Step::Delivered);
                self.reply(Status::Ok, "OK").await
            }
            Err(err @ SessionError::MessageTooLarge { .. }) => {
                if let Err(drain) = drained {
                    self.reply_quietly(Status::TransactionFailed, "Error reading message data")
                        .await;
                    return Err(ConnectionError::Io(drain));
                }

                self.step(Step::Reset);
                self.reply_error(&err).await
            }
            Err(SessionError::Cancelled) => {
                self.reply_error(&SessionError::Cancelled).await?;
                self.step(Step::Quit);
                Ok(())
            }
            Err(err @ SessionError::Read(_)) => {
                let (status, text) = err.reply();
                self.reply_quietly(status, text).await;
                Err(ConnectionError::Session(err))
            }
            Err(err) => {
                self.step(Step::Reset);
                self.reply_error(&err).await
            }
        }
    }

    fn step(&mut self, step: Step) {
        let from = self.phase;
        self.phase = self.phase.transition(step, &mut self.greeting);
        tracing::trace!(id = %self.session.id(), "Phase {from} -> {}", self.phase);
    }

    async fn reply<T: Display + Send + Sync>(
        &mut self,
        status: Status,
        text: T,
    ) -> ConnectionResult<()> {
        let response = format!("{status} {text}");
        outgoing!("{response}");
        self.connection.send(&response).await
    }

    async fn reply_error(&mut self, err: &SessionError) -> ConnectionResult<()> {
        let (status, text) = err.reply();
        self.reply(status, text).await
    }

    /// Reply on a connection that is about to be closed anyway.
    async fn reply_quietly<T: Display + Send + Sync>(&mut self, status: Status, text: T) {
        if let Err(err) = self.reply(status, text).await {
            internal!(level = DEBUG, "Unable to send final reply: {err}");
        }
    }
}

/// Split an `AUTH PLAIN` response (RFC 4616) into username and password.
///
/// `=` stands for an empty response. The authorization identity is ignored.
fn decode_plain(response: &str) -> Option<(String, String)> {
    let response = response.trim();
    let decoded = if response == "=" {
        Vec::new()
    } else {
        STANDARD.decode(response).ok()?
    };

    let decoded = String::from_utf8(decoded).ok()?;
    let mut parts = decoded.splitn(3, '\0');

    match (parts.next(), parts.next(), parts.next()) {
        (Some(_authzid), Some(authcid), Some(password)) => {
            Some((authcid.to_string(), password.to_string()))
        }
        _ => None,
    }
}
