//! Configuration for the relay.
//!
//! Configuration is read from a RON file when one can be found, and from
//! the environment otherwise:
//!
//! 1. the file named by `SMTP2GOTIFY_CONFIG`
//! 2. `./smtp2gotify.config.ron`
//! 3. `/etc/smtp2gotify/smtp2gotify.config.ron`
//! 4. `SMTP_HOST`, `SMTP_PORT`, `SMTP_USERNAME`, `SMTP_PASSWORD`,
//!    `GOTIFY_URL` and `GOTIFY_API_TOKEN`
//!
//! ```ron
//! Config(
//!     smtp: (
//!         host: "relay.example.com",
//!         port: 2525,
//!         username: "admin",
//!         password_hash: "$argon2id$v=19$m=19456,t=2,p=1$...",
//!         timeouts: (data_secs: 30),
//!     ),
//!     gotify: (
//!         url: "https://gotify.example.com",
//!         token: "AbCdEf",
//!     ),
//! )
//! ```

pub mod password;
pub mod timeouts;

use std::{
    net::{IpAddr, SocketAddr},
    path::{Path, PathBuf},
};

use serde::{Deserialize, Serialize};

pub use password::HashScheme;
pub use timeouts::ServerTimeouts;

use crate::error::ConfigError;

pub const CONFIG_ENV: &str = "SMTP2GOTIFY_CONFIG";

const DEFAULT_PATHS: [&str; 2] = [
    "./smtp2gotify.config.ron",
    "/etc/smtp2gotify/smtp2gotify.config.ron",
];

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Config {
    pub smtp: SmtpConfig,
    pub gotify: GotifyConfig,
}

/// Settings for the SMTP side of the relay.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SmtpConfig {
    /// Hostname announced in the greeting and the EHLO reply.
    #[serde(default = "defaults::host")]
    pub host: String,

    #[serde(default = "defaults::port")]
    pub port: u16,

    #[serde(default = "defaults::address")]
    pub address: IpAddr,

    pub username: String,

    /// Argon2 PHC string, as printed by `smtp2gotify hash-password`, or a
    /// bcrypt hash.
    pub password_hash: String,

    #[serde(default = "defaults::max_message_bytes")]
    pub max_message_bytes: usize,

    #[serde(default = "defaults::max_recipients")]
    pub max_recipients: usize,

    /// Connections served at once; further clients are turned away with a 421.
    #[serde(default = "defaults::max_connections")]
    pub max_connections: usize,

    #[serde(default)]
    pub timeouts: ServerTimeouts,
}

impl Default for SmtpConfig {
    fn default() -> Self {
        Self {
            host: defaults::host(),
            port: defaults::port(),
            address: defaults::address(),
            username: String::default(),
            password_hash: String::default(),
            max_message_bytes: defaults::max_message_bytes(),
            max_recipients: defaults::max_recipients(),
            max_connections: defaults::max_connections(),
            timeouts: ServerTimeouts::default(),
        }
    }
}

impl SmtpConfig {
    #[must_use]
    pub const fn socket(&self) -> SocketAddr {
        SocketAddr::new(self.address, self.port)
    }
}

/// Where notifications are pushed.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GotifyConfig {
    pub url: String,

    /// Application token, sent as `X-Gotify-Key`.
    pub token: String,

    #[serde(default)]
    pub priority: i64,
}

impl Config {
    ///
    /// Load the configuration from the first file found, or from the
    /// process environment if there is none
    ///
    /// # Errors
    /// If `SMTP2GOTIFY_CONFIG` names a missing file, a file can't be read
    /// or parsed, or an environment value is malformed
    ///
    pub fn load() -> Result<Self, ConfigError> {
        if let Some(path) = std::env::var_os(CONFIG_ENV) {
            return Self::from_file(Path::new(&path));
        }

        if let Some(path) = DEFAULT_PATHS.iter().map(Path::new).find(|p| p.exists()) {
            return Self::from_file(path);
        }

        Self::from_env_with(|key| std::env::var(key).ok())
    }

    ///
    /// Read and parse a RON configuration file
    ///
    /// # Errors
    /// If the file can't be read or isn't a valid configuration
    ///
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: PathBuf::from(path),
            source,
        })?;

        Self::from_ron(&content)
    }

    ///
    /// Parse a RON configuration
    ///
    /// # Errors
    /// If the text isn't a valid configuration
    ///
    pub fn from_ron(content: &str) -> Result<Self, ConfigError> {
        Ok(ron::from_str(content)?)
    }

    ///
    /// Build the configuration from environment variables, using `lookup`
    /// to resolve each one
    ///
    /// Unset or empty variables fall back to their defaults; required ones
    /// are caught later by [`Config::validate`].
    ///
    /// # Errors
    /// If `SMTP_PORT` is set but isn't a port number
    ///
    pub fn from_env_with(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let var = |key: &str| lookup(key).filter(|value| !value.is_empty());

        let mut config = Self::default();

        if let Some(host) = var("SMTP_HOST") {
            config.smtp.host = host;
        }

        if let Some(port) = var("SMTP_PORT") {
            config.smtp.port = port.parse().map_err(|err| ConfigError::Invalid {
                field: "SMTP_PORT",
                reason: format!("{port:?}: {err}"),
            })?;
        }

        config.smtp.username = var("SMTP_USERNAME").unwrap_or_default();
        config.smtp.password_hash = var("SMTP_PASSWORD").unwrap_or_default();
        config.gotify.url = var("GOTIFY_URL").unwrap_or_default();
        config.gotify.token = var("GOTIFY_API_TOKEN").unwrap_or_default();

        Ok(config)
    }

    ///
    /// Check that the relay can run with this configuration
    ///
    /// # Errors
    /// The first missing or unusable field found
    ///
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.smtp.username.is_empty() {
            return Err(ConfigError::MissingField("smtp.username"));
        }

        if self.smtp.password_hash.is_empty() {
            return Err(ConfigError::MissingField("smtp.password_hash"));
        }

        HashScheme::detect(&self.smtp.password_hash).map_err(|reason| ConfigError::Invalid {
            field: "smtp.password_hash",
            reason,
        })?;

        if self.smtp.max_message_bytes == 0 {
            return Err(ConfigError::Invalid {
                field: "smtp.max_message_bytes",
                reason: String::from("must be greater than zero"),
            });
        }

        if self.smtp.max_recipients == 0 {
            return Err(ConfigError::Invalid {
                field: "smtp.max_recipients",
                reason: String::from("must be greater than zero"),
            });
        }

        if self.smtp.max_connections == 0 {
            return Err(ConfigError::Invalid {
                field: "smtp.max_connections",
                reason: String::from("must be greater than zero"),
            });
        }

        if self.gotify.url.is_empty() {
            return Err(ConfigError::MissingField("gotify.url"));
        }

        if self.gotify.token.is_empty() {
            return Err(ConfigError::MissingField("gotify.token"));
        }

        Ok(())
    }
}

mod defaults {
    use std::net::{IpAddr, Ipv4Addr};

    pub fn host() -> String {
        String::from("localhost")
    }
    pub const fn port() -> u16 {
        25
    }
    pub const fn address() -> IpAddr {
        IpAddr::V4(Ipv4Addr::UNSPECIFIED)
    }
    pub const fn max_message_bytes() -> usize {
        1024 * 1024
    }
    pub const fn max_recipients() -> usize {
        50
    }
    pub const fn max_connections() -> usize {
        100
    }
}
