//! Delivers notifications to a [Gotify](https://gotify.net) server.
//!
//! Messages are created through the application API: `POST <url>/message`,
//! authenticated with the application token in the `X-Gotify-Key` header.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use smtp2gotify_common::{
    error::SinkError,
    traits::sink::{Notification, NotificationSink},
};
use thiserror::Error;
use url::Url;

const TOKEN_HEADER: &str = "X-Gotify-Key";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("Invalid Gotify URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    #[error("Unsupported scheme '{0}' in Gotify URL, expected http or https")]
    UnsupportedScheme(String),

    #[error("Gotify token is empty")]
    MissingToken,

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Gotify answered with status {status}: {message}")]
    Status { status: u16, message: String },
}

#[derive(Debug, Serialize)]
struct CreateMessage<'a> {
    title: &'a str,
    message: &'a str,
    priority: i64,
}

/// What `GET /version` reports.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Version {
    pub version: String,
    #[serde(default)]
    pub commit: String,
    #[serde(default)]
    pub build_date: String,
}

/// Error body Gotify sends with non-success responses.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ErrorBody {
    #[serde(default)]
    error: String,
    #[serde(default)]
    error_description: String,
}

#[derive(Debug, Clone)]
pub struct GotifyClient {
    client: reqwest::Client,
    message_url: Url,
    version_url: Url,
    token: String,
    priority: i64,
}

/// `path` below `base`, keeping any path prefix `base` already has.
fn endpoint(base: &Url, path: &str) -> Result<Url, url::ParseError> {
    let mut base = base.clone();

    if !base.path().ends_with('/') {
        let directory = format!("{}/", base.path());
        base.set_path(&directory);
    }

    base.join(path)
}

impl GotifyClient {
    ///
    /// Create a client for the server at `url`
    ///
    /// # Errors
    /// If the URL can't be parsed or isn't http(s), the token is empty, or the
    /// HTTP client can't be built
    ///
    pub fn new(url: &str, token: impl Into<String>, priority: i64) -> Result<Self, ClientError> {
        let base = Url::parse(url)?;

        if !matches!(base.scheme(), "http" | "https") {
            return Err(ClientError::UnsupportedScheme(base.scheme().to_string()));
        }

        let token = token.into();
        if token.is_empty() {
            return Err(ClientError::MissingToken);
        }

        Ok(Self {
            client: reqwest::Client::builder()
                .timeout(REQUEST_TIMEOUT)
                .user_agent(concat!("smtp2gotify/", env!("CARGO_PKG_VERSION")))
                .build()?,
            message_url: endpoint(&base, "message")?,
            version_url: endpoint(&base, "version")?,
            token,
            priority,
        })
    }

    #[must_use]
    pub const fn message_url(&self) -> &Url {
        &self.message_url
    }

    ///
    /// Ask the server for its version
    ///
    /// # Errors
    /// If the request fails or the server doesn't answer with a version
    ///
    #[tracing::instrument(level = tracing::Level::TRACE, skip(self), err)]
    pub async fn version(&self) -> Result<Version, ClientError> {
        let response = self.client.get(self.version_url.clone()).send().await?;

        let status = response.status();
        if !status.is_success() {
            return Err(ClientError::Status {
                status: status.as_u16(),
                message: describe(response).await,
            });
        }

        Ok(response.json().await?)
    }

    ///
    /// Create a message on the server
    ///
    /// # Errors
    /// If the request fails or the server rejects the message
    ///
    pub async fn create_message(&self, title: &str, message: &str) -> Result<(), ClientError> {
        let response = self
            .client
            .post(self.message_url.clone())
            .header(TOKEN_HEADER, &self.token)
            .json(&CreateMessage {
                title,
                message,
                priority: self.priority,
            })
            .send()
            .await?;

        let status = response.status();
        if status.is_success() {
            tracing::debug!("Sent message to Gotify server");
            Ok(())
        } else {
            Err(ClientError::Status {
                status: status.as_u16(),
                message: describe(response).await,
            })
        }
    }
}

/// A readable reason for a failed response.
async fn describe(response: reqwest::Response) -> String {
    let reason = response
        .status()
        .canonical_reason()
        .unwrap_or("Unknown")
        .to_string();

    match response.json::<ErrorBody>().await {
        Ok(body) if !body.error_description.is_empty() => body.error_description,
        Ok(body) if !body.error.is_empty() => body.error,
        _ => reason,
    }
}

#[async_trait]
impl NotificationSink for GotifyClient {
    async fn send(&self, notification: &Notification) -> Result<(), SinkError> {
        self.create_message(&notification.title, &notification.body)
            .await
            .map_err(|err| match err {
                ClientError::Status { status, message } => SinkError::Rejected { status, message },
                other => SinkError::Transport(Box::new(other)),
            })
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn endpoints() {
        let client = GotifyClient::new("https://push.example.com", "token", 0).unwrap();
        assert_eq!(client.message_url.as_str(), "https://push.example.com/message");
        assert_eq!(client.version_url.as_str(), "https://push.example.com/version");

        let client = GotifyClient::new("http://example.com/gotify", "token", 0).unwrap();
        assert_eq!(client.message_url.as_str(), "http://example.com/gotify/message");

        let client = GotifyClient::new("http://example.com/gotify/", "token", 0).unwrap();
        assert_eq!(client.message_url.as_str(), "http://example.com/gotify/message");
    }

    #[test]
    fn rejects_bad_settings() {
        assert!(matches!(
            GotifyClient::new("not a url", "token", 0),
            Err(ClientError::InvalidUrl(_))
        ));
        assert!(matches!(
            GotifyClient::new("ftp://example.com", "token", 0),
            Err(ClientError::UnsupportedScheme(scheme)) if scheme == "ftp"
        ));
        assert!(matches!(
            GotifyClient::new("https://example.com", "", 0),
            Err(ClientError::MissingToken)
        ));
    }

    #[test]
    fn message_payload() {
        let payload = serde_json::to_value(CreateMessage {
            title: "Hello",
            message: "World",
            priority: 5,
        })
        .unwrap();

        assert_eq!(
            payload,
            serde_json::json!({"title": "Hello", "message": "World", "priority": 5})
        );
    }
}
