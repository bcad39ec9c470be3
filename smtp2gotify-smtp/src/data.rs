//! Reading the message body after `354`.
//!
//! [`DataReader`] turns the dot-stuffed, dot-terminated DATA section into a
//! plain byte stream (RFC 5321 Section 4.5.2): a leading `.` on a line is
//! removed, and the line holding a single `.` ends the stream.

use std::{
    io,
    pin::Pin,
    task::{Context, Poll, ready},
    time::Duration,
};

use tokio::{
    io::{AsyncBufRead, AsyncRead, ReadBuf},
    time::{Instant, Sleep},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    /// At the start of a line.
    LineStart,
    /// Inside a line.
    Body,
    /// After a `\r` inside a line.
    Cr,
    /// After a `.` at the start of a line.
    Dot,
    /// After `.\r` at the start of a line.
    DotCr,
    /// The terminating `.` line has been consumed.
    Done,
}

/// Yields the body of a DATA section, then end of file.
///
/// The peer closing the connection before the terminating line is an
/// [`io::ErrorKind::UnexpectedEof`] error, and going quiet for longer than
/// `idle` is [`io::ErrorKind::TimedOut`].
pub struct DataReader<'a, R> {
    inner: &'a mut R,
    state: State,
    idle: Duration,
    deadline: Pin<Box<Sleep>>,
}

impl<'a, R: AsyncBufRead + Unpin> DataReader<'a, R> {
    pub fn new(inner: &'a mut R, idle: Duration) -> Self {
        Self {
            inner,
            state: State::LineStart,
            idle,
            deadline: Box::pin(tokio::time::sleep(idle)),
        }
    }

    /// Whether the terminating `.` line has been read.
    #[must_use]
    pub fn is_done(&self) -> bool {
        self.state == State::Done
    }
}

/// Feed `input` through the unstuffing state machine into `out`.
///
/// Returns how many input bytes were consumed; this stops early when `out` is
/// full or the end of the data is reached.
fn unstuff(state: &mut State, input: &[u8], out: &mut ReadBuf<'_>) -> usize {
    let mut consumed = 0;

    while consumed < input.len() && out.remaining() > 0 && *state != State::Done {
        let byte = input[consumed];

        *state = match (*state, byte) {
            (State::LineStart, b'.') => State::Dot,
            (State::DotCr, b'\n') => State::Done,
            (State::DotCr, _) => {
                // `.\r` then something else: the dot was stuffing, the `\r`
                // is data, and `byte` is looked at again
                out.put_slice(b"\r");
                *state = State::Cr;
                continue;
            }
            (State::Dot, b'\r') => State::DotCr,
            (State::LineStart | State::Body | State::Cr, b'\r') => {
                out.put_slice(b"\r");
                State::Cr
            }
            (State::Cr, b'\n') => {
                out.put_slice(b"\n");
                State::LineStart
            }
            (_, byte) => {
                out.put_slice(&[byte]);
                State::Body
            }
        };

        consumed += 1;
    }

    consumed
}

impl<R: AsyncBufRead + Unpin> AsyncRead for DataReader<'_, R> {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = self.get_mut();

        loop {
            if this.state == State::Done || buf.remaining() == 0 {
                return Poll::Ready(Ok(()));
            }

            let available = match Pin::new(&mut *this.inner).poll_fill_buf(cx) {
                Poll::Ready(result) => result?,
                Poll::Pending => {
                    ready!(this.deadline.as_mut().poll(cx));
                    return Poll::Ready(Err(io::Error::new(
                        io::ErrorKind::TimedOut,
                        format!("No data for {} seconds", this.idle.as_secs()),
                    )));
                }
            };

            if available.is_empty() {
                return Poll::Ready(Err(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    "Connection closed before end of data",
                )));
            }

            let filled = buf.filled().len();
            let consumed = unstuff(&mut this.state, available, buf);
            Pin::new(&mut *this.inner).consume(consumed);

            this.deadline.as_mut().reset(Instant::now() + this.idle);

            if buf.filled().len() > filled || this.state == State::Done {
                return Poll::Ready(Ok(()));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use tokio::io::{AsyncReadExt, AsyncWriteExt, BufReader};

    use super::*;

    async fn read(wire: &[u8]) -> (io::Result<Vec<u8>>, Vec<u8>) {
        let mut inner = BufReader::new(wire);
        let mut reader = DataReader::new(&mut inner, Duration::from_secs(5));
        let mut body = Vec::new();
        let result = reader.read_to_end(&mut body).await.map(|_| body);
        drop(reader);

        let mut rest = Vec::new();
        inner.read_to_end(&mut rest).await.unwrap();
        (result, rest)
    }

    #[tokio::test]
    async fn stops_at_terminator() {
        let (body, rest) = read(b"Subject: Hello\r\n\r\nWorld\r\n.\r\nQUIT\r\n").await;
        assert_eq!(body.unwrap(), b"Subject: Hello\r\n\r\nWorld\r\n");
        assert_eq!(rest, b"QUIT\r\n");
    }

    #[tokio::test]
    async fn empty_body() {
        let (body, rest) = read(b".\r\n").await;
        assert_eq!(body.unwrap(), b"");
        assert!(rest.is_empty());
    }

    #[tokio::test]
    async fn removes_dot_stuffing() {
        let (body, _) = read(b"..leading\r\n...\r\nmid.dle\r\n.\r\n").await;
        assert_eq!(body.unwrap(), b".leading\r\n..\r\nmid.dle\r\n");
    }

    #[tokio::test]
    async fn dot_cr_without_lf_is_data() {
        let (body, _) = read(b".\rx\r\n.\r\n").await;
        assert_eq!(body.unwrap(), b"\rx\r\n");
    }

    #[tokio::test]
    async fn eof_before_terminator() {
        let (body, _) = read(b"Subject: Hello\r\n\r\nWorld\r\n").await;
        assert_eq!(body.unwrap_err().kind(), io::ErrorKind::UnexpectedEof);
    }

    #[tokio::test]
    async fn small_reads() {
        let (client, server) = tokio::io::duplex(1);
        let writer = tokio::spawn(async move {
            let mut client = client;
            client.write_all(b"a\r\n..b\r\n.\r\n").await.unwrap();
            client
        });

        let mut inner = BufReader::new(server);
        let mut reader = DataReader::new(&mut inner, Duration::from_secs(5));
        let mut out = [0; 1];
        let mut body = Vec::new();
        loop {
            let n = reader.read(&mut out).await.unwrap();
            if n == 0 {
                break;
            }
            body.extend_from_slice(&out[..n]);
        }

        assert_eq!(body, b"a\r\n.b\r\n");
        assert!(reader.is_done());
        drop(writer.await.unwrap());
    }

    #[tokio::test(start_paused = true)]
    async fn idle_timeout() {
        let (_client, server) = tokio::io::duplex(64);
        let mut inner = BufReader::new(server);
        let mut reader = DataReader::new(&mut inner, Duration::from_secs(10));

        let mut body = Vec::new();
        let err = reader.read_to_end(&mut body).await.unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::TimedOut);
    }
}
