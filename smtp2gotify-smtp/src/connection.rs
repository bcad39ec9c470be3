use core::fmt::Display;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufStream};

use crate::{
    data::DataReader,
    error::{ConnectionError, ConnectionResult},
};

/// Longest command line accepted, including the CRLF (RFC 5321 Section 4.5.3.1.4).
pub const MAX_LINE_LENGTH: usize = 512;

/// Buffered, line-oriented access to a client's stream.
pub struct Connection<Stream: AsyncRead + AsyncWrite + Unpin + Send> {
    stream: BufStream<Stream>,
    write_timeout: Duration,
}

impl<Stream: AsyncRead + AsyncWrite + Unpin + Send> Connection<Stream> {
    pub fn new(stream: Stream, write_timeout: Duration) -> Self {
        Self {
            stream: BufStream::new(stream),
            write_timeout,
        }
    }

    /// Send a single reply line, adding the CRLF.
    ///
    /// # Errors
    /// If writing fails or takes longer than the write timeout
    pub async fn send<S: Display + Send + Sync>(&mut self, response: &S) -> ConnectionResult<()> {
        self.write(format!("{response}\r\n").as_bytes()).await
    }

    /// Send a multi-line reply: every line but the last is `<code>-<text>`.
    ///
    /// # Errors
    /// If writing fails or takes longer than the write timeout
    pub async fn send_multiline<C: Display + Send + Sync>(
        &mut self,
        code: C,
        lines: &[String],
    ) -> ConnectionResult<()> {
        let last = lines.len().saturating_sub(1);
        let reply = lines
            .iter()
            .enumerate()
            .map(|(i, line)| {
                let separator = if i == last { ' ' } else { '-' };
                format!("{code}{separator}{line}\r\n")
            })
            .collect::<String>();

        self.write(reply.as_bytes()).await
    }

    async fn write(&mut self, bytes: &[u8]) -> ConnectionResult<()> {
        let timeout = self.write_timeout;
        let stream = &mut self.stream;
        let write = async move {
            stream.write_all(bytes).await?;
            stream.flush().await
        };

        tokio::time::timeout(timeout, write)
            .await
            .map_err(|_| ConnectionError::Timeout(timeout.as_secs()))?
            .map_err(ConnectionError::from)
    }

    /// Read one line, without its line ending.
    ///
    /// # Errors
    /// [`ConnectionError::Closed`] at end of stream,
    /// [`ConnectionError::Timeout`] when nothing complete arrives in time and
    /// [`ConnectionError::LineTooLong`] for lines over [`MAX_LINE_LENGTH`]
    pub async fn read_line(&mut self, timeout: Duration) -> ConnectionResult<String> {
        let mut line = Vec::with_capacity(128);
        let limit = u64::try_from(MAX_LINE_LENGTH).unwrap_or(u64::MAX);

        let mut reader = (&mut self.stream).take(limit);

        let read = tokio::time::timeout(timeout, reader.read_until(b'\n', &mut line))
            .await
            .map_err(|_| ConnectionError::Timeout(timeout.as_secs()))??;

        if read == 0 {
            return Err(ConnectionError::Closed);
        }

        if !line.ends_with(b"\n") {
            return Err(if line.len() >= MAX_LINE_LENGTH {
                ConnectionError::LineTooLong {
                    max: MAX_LINE_LENGTH,
                }
            } else {
                ConnectionError::Closed
            });
        }

        let line = String::from_utf8_lossy(&line);
        Ok(line.trim_end_matches(['\r', '\n']).to_string())
    }

    /// The DATA section that follows a `354` reply.
    pub fn data_reader(&mut self, idle: Duration) -> DataReader<'_, BufStream<Stream>> {
        DataReader::new(&mut self.stream, idle)
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use tokio::io::{AsyncReadExt, AsyncWriteExt, DuplexStream, duplex};

    use super::*;

    const TIMEOUT: Duration = Duration::from_secs(5);

    fn pair() -> (Connection<DuplexStream>, DuplexStream) {
        let (server, client) = duplex(4096);
        (Connection::new(server, TIMEOUT), client)
    }

    #[tokio::test]
    async fn reads_lines() {
        let (mut connection, mut client) = pair();
        client.write_all(b"EHLO client\r\nNOOP\n").await.unwrap();

        assert_eq!(connection.read_line(TIMEOUT).await.unwrap(), "EHLO client");
        assert_eq!(connection.read_line(TIMEOUT).await.unwrap(), "NOOP");

        drop(client);
        assert!(matches!(
            connection.read_line(TIMEOUT).await,
            Err(ConnectionError::Closed)
        ));
    }

    #[tokio::test]
    async fn partial_line_then_close() {
        let (mut connection, mut client) = pair();
        client.write_all(b"QUI").await.unwrap();
        drop(client);

        assert!(matches!(
            connection.read_line(TIMEOUT).await,
            Err(ConnectionError::Closed)
        ));
    }

    #[tokio::test]
    async fn rejects_long_lines() {
        let (mut connection, mut client) = pair();
        let long = format!("NOOP {}\r\n", "x".repeat(MAX_LINE_LENGTH));
        client.write_all(long.as_bytes()).await.unwrap();

        assert!(matches!(
            connection.read_line(TIMEOUT).await,
            Err(ConnectionError::LineTooLong { max: MAX_LINE_LENGTH })
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn read_timeout() {
        let (mut connection, _client) = pair();

        assert!(matches!(
            connection.read_line(Duration::from_secs(10)).await,
            Err(ConnectionError::Timeout(10))
        ));
    }

    #[tokio::test]
    async fn writes_replies() {
        let (mut connection, mut client) = pair();

        connection.send(&"250 OK").await.unwrap();
        connection
            .send_multiline(
                250,
                &[
                    String::from("relay.example.com"),
                    String::from("AUTH PLAIN"),
                    String::from("8BITMIME"),
                ],
            )
            .await
            .unwrap();
        drop(connection);

        let mut written = String::new();
        client.read_to_string(&mut written).await.unwrap();
        assert_eq!(
            written,
            "250 OK\r\n250-relay.example.com\r\n250-AUTH PLAIN\r\n250 8BITMIME\r\n"
        );
    }
}
