//! Turning a received message body into a notification.
//!
//! Only the `Subject` header matters here, so headers are read with a simple
//! `Key: value` split rather than a full RFC 5322 parser. Folded headers and
//! encoded words are passed through as they arrive.

use ahash::AHashMap;
use smtp2gotify_common::traits::sink::Notification;

use crate::error::MalformedBody;

const SEPARATOR: &str = "\r\n\r\n";

/// A body split into its header block and content.
#[derive(Debug, PartialEq, Eq)]
pub struct Message<'a> {
    headers: AHashMap<&'a str, &'a str>,
    content: &'a str,
}

impl<'a> Message<'a> {
    ///
    /// Split `body` at the first empty line
    ///
    /// Header lines without `": "` are skipped; when a header repeats, the
    /// last value wins.
    ///
    /// # Errors
    /// If there is no empty line
    ///
    pub fn parse(body: &'a str) -> Result<Self, MalformedBody> {
        let (head, content) = body.split_once(SEPARATOR).ok_or(MalformedBody)?;

        let headers = head
            .lines()
            .filter_map(|line| line.split_once(": "))
            .collect();

        Ok(Self { headers, content })
    }

    #[must_use]
    pub fn header(&self, name: &str) -> Option<&'a str> {
        self.headers.get(name).copied()
    }

    /// The `Subject` header, matched exactly, or empty.
    #[must_use]
    pub fn subject(&self) -> &'a str {
        self.header("Subject").unwrap_or_default()
    }

    #[must_use]
    pub const fn content(&self) -> &'a str {
        self.content
    }
}

/// Build the notification for a message body.
///
/// A body without a header/content separator becomes a notification with an
/// empty title and the whole body as its text.
#[must_use]
pub fn notification(body: &[u8]) -> Notification {
    let body = String::from_utf8_lossy(body);

    match Message::parse(&body) {
        Ok(message) => Notification::new(message.subject(), message.content()),
        Err(err) => {
            tracing::warn!("{err}, forwarding the whole body");
            Notification::new("", body.as_ref())
        }
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn subject_and_content() {
        assert_eq!(
            notification(b"Subject: Hello\r\nFrom: x\r\n\r\nWorld"),
            Notification::new("Hello", "World")
        );
    }

    #[test]
    fn missing_subject() {
        assert_eq!(
            notification(b"From: x\r\nTo: y\r\n\r\nWorld\r\n"),
            Notification::new("", "World\r\n")
        );
    }

    #[test]
    fn no_separator_forwards_everything() {
        let body = b"Subject: Hello\r\nWorld\r\n";

        for _ in 0..3 {
            assert_eq!(
                notification(body),
                Notification::new("", "Subject: Hello\r\nWorld\r\n")
            );
        }

        assert_eq!(
            Message::parse("Subject: Hello"),
            Err(MalformedBody)
        );
    }

    #[test]
    fn first_empty_line_splits() {
        let message = Message::parse("Subject: a\r\n\r\nfirst\r\n\r\nsecond").unwrap();
        assert_eq!(message.subject(), "a");
        assert_eq!(message.content(), "first\r\n\r\nsecond");
    }

    #[test]
    fn duplicate_headers_last_wins() {
        let message = Message::parse("Subject: one\r\nSubject: two\r\n\r\n").unwrap();
        assert_eq!(message.subject(), "two");
        assert_eq!(message.content(), "");
    }

    #[test]
    fn header_lookup_is_exact() {
        let message =
            Message::parse("subject: lower\r\nX-Note:no-space\r\nX-Tag: a: b\r\n\r\nbody").unwrap();

        assert_eq!(message.subject(), "");
        assert_eq!(message.header("subject"), Some("lower"));
        assert_eq!(message.header("X-Note"), None);
        assert_eq!(message.header("X-Tag"), Some("a: b"));
    }

    #[test]
    fn invalid_utf8_is_replaced() {
        let notification = notification(b"Subject: caf\xe9\r\n\r\nok");
        assert_eq!(notification.title, "caf\u{fffd}");
        assert_eq!(notification.body, "ok");
    }
}
