//! A small SMTP submission client, used to check a running relay end to end.

use std::io;

use base64::{Engine, engine::general_purpose::STANDARD};
use smtp2gotify_common::{incoming, outgoing};
use thiserror::Error;
use tokio::{
    io::{AsyncBufReadExt, AsyncWriteExt, BufStream},
    net::TcpStream,
};

#[derive(Error, Debug)]
pub enum ClientError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// Failed to parse an SMTP response from the server.
    #[error("Failed to parse SMTP response: {0}")]
    Parse(String),

    #[error("Unexpected SMTP response to {command}: {code} {message}")]
    UnexpectedResponse {
        command: String,
        code: u16,
        message: String,
    },

    #[error("Connection closed unexpectedly")]
    ConnectionClosed,
}

pub type Result<T> = std::result::Result<T, ClientError>;

/// A complete, possibly multi-line, SMTP reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    pub code: u16,
    pub lines: Vec<String>,
}

impl Response {
    /// Returns the complete message with lines joined by newlines.
    #[must_use]
    pub fn message(&self) -> String {
        self.lines.join("\n")
    }

    /// Split one reply line into code, whether it is the last line, and text.
    ///
    /// # Errors
    /// If the line doesn't start with a three digit code followed by ` `, `-`
    /// or nothing at all
    pub fn parse_line(line: &str) -> Result<(u16, bool, &str)> {
        let code = line
            .get(..3)
            .and_then(|code| code.parse::<u16>().ok())
            .ok_or_else(|| ClientError::Parse(format!("Invalid status code in '{line}'")))?;

        match line.as_bytes().get(3) {
            None => Ok((code, true, "")),
            Some(b' ') => Ok((code, true, &line[4..])),
            Some(b'-') => Ok((code, false, &line[4..])),
            Some(_) => Err(ClientError::Parse(format!(
                "Invalid separator character in '{line}'"
            ))),
        }
    }

    fn expect(self, command: &str, code: u16) -> Result<Self> {
        if self.code == code {
            Ok(self)
        } else {
            Err(ClientError::UnexpectedResponse {
                command: command.to_string(),
                code: self.code,
                message: self.message(),
            })
        }
    }
}

/// Format a message for the DATA section: CRLF line endings, leading dots
/// doubled, and the terminating `.` line appended.
#[must_use]
pub fn dot_stuff(message: &str) -> String {
    let mut out = String::with_capacity(message.len() + 8);

    for line in message.lines() {
        if line.starts_with('.') {
            out.push('.');
        }
        out.push_str(line);
        out.push_str("\r\n");
    }

    out.push_str(".\r\n");
    out
}

pub struct SmtpClient {
    stream: BufStream<TcpStream>,
}

impl SmtpClient {
    /// Connect and read the server greeting.
    ///
    /// # Errors
    /// If the connection fails or the server doesn't greet with `220`
    pub async fn connect(address: &str) -> Result<Self> {
        let stream = TcpStream::connect(address).await?;
        let mut client = Self {
            stream: BufStream::new(stream),
        };

        client.read_response().await?.expect("greeting", 220)?;
        Ok(client)
    }

    async fn read_response(&mut self) -> Result<Response> {
        let mut lines = Vec::new();

        loop {
            let mut line = String::new();
            if self.stream.read_line(&mut line).await? == 0 {
                return Err(ClientError::ConnectionClosed);
            }

            let line = line.trim_end_matches(['\r', '\n']);
            incoming!("{line}");

            let (code, last, text) = Response::parse_line(line)?;
            lines.push(text.to_string());

            if last {
                return Ok(Response { code, lines });
            }
        }
    }

    async fn write(&mut self, data: &str) -> Result<()> {
        self.stream.write_all(data.as_bytes()).await?;
        self.stream.flush().await?;
        Ok(())
    }

    ///
    /// Send one command line and read the reply
    ///
    /// # Errors
    /// If writing or reading fails
    ///
    pub async fn command(&mut self, command: &str) -> Result<Response> {
        outgoing!("{command}");
        self.write(&format!("{command}\r\n")).await?;
        self.read_response().await
    }

    ///
    /// # Errors
    /// If the server doesn't accept the greeting
    ///
    pub async fn ehlo(&mut self, domain: &str) -> Result<Response> {
        self.command(&format!("EHLO {domain}"))
            .await?
            .expect("EHLO", 250)
    }

    ///
    /// Authenticate with `AUTH PLAIN`, sending the credentials as the
    /// initial response
    ///
    /// # Errors
    /// If the server rejects the credentials
    ///
    pub async fn auth_plain(&mut self, username: &str, password: &str) -> Result<Response> {
        let payload = STANDARD.encode(format!("\0{username}\0{password}"));

        outgoing!("AUTH PLAIN <credentials>");
        self.write(&format!("AUTH PLAIN {payload}\r\n")).await?;
        self.read_response().await?.expect("AUTH", 235)
    }

    ///
    /// # Errors
    /// If the server refuses the sender
    ///
    pub async fn mail_from(&mut self, from: &str) -> Result<Response> {
        self.command(&format!("MAIL FROM:<{from}>"))
            .await?
            .expect("MAIL", 250)
    }

    ///
    /// # Errors
    /// If the server refuses the recipient
    ///
    pub async fn rcpt_to(&mut self, to: &str) -> Result<Response> {
        self.command(&format!("RCPT TO:<{to}>"))
            .await?
            .expect("RCPT", 250)
    }

    ///
    /// Send `DATA` followed by the message
    ///
    /// # Errors
    /// If the server doesn't invite the message or doesn't accept it
    ///
    pub async fn data(&mut self, message: &str) -> Result<Response> {
        self.command("DATA").await?.expect("DATA", 354)?;

        outgoing!("<{} bytes of message data>", message.len());
        self.write(&dot_stuff(message)).await?;
        self.read_response().await?.expect("message data", 250)
    }

    ///
    /// # Errors
    /// If the server doesn't say goodbye
    ///
    pub async fn quit(mut self) -> Result<Response> {
        self.command("QUIT").await?.expect("QUIT", 221)
    }
}
