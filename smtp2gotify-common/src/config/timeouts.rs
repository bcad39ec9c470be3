//! Timeouts applied by the SMTP listener.
//!
//! The relay is a short-hop submission endpoint (usually a device or
//! script on the same network), so the defaults are far tighter than the
//! RFC 5321 recommendations for public MTAs.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Server-side SMTP timeout configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerTimeouts {
    /// How long to wait for the next command line.
    ///
    /// Default: 10 seconds
    #[serde(default = "defaults::command_secs")]
    pub command_secs: u64,

    /// How long the client may stay silent while sending a message body.
    ///
    /// Default: 10 seconds
    #[serde(default = "defaults::data_secs")]
    pub data_secs: u64,

    /// How long a reply may take to be written.
    ///
    /// Default: 10 seconds
    #[serde(default = "defaults::write_secs")]
    pub write_secs: u64,
}

impl Default for ServerTimeouts {
    fn default() -> Self {
        Self {
            command_secs: defaults::command_secs(),
            data_secs: defaults::data_secs(),
            write_secs: defaults::write_secs(),
        }
    }
}

impl ServerTimeouts {
    #[must_use]
    pub const fn command(&self) -> Duration {
        Duration::from_secs(self.command_secs)
    }

    #[must_use]
    pub const fn data(&self) -> Duration {
        Duration::from_secs(self.data_secs)
    }

    #[must_use]
    pub const fn write(&self) -> Duration {
        Duration::from_secs(self.write_secs)
    }
}

mod defaults {
    pub const fn command_secs() -> u64 {
        10
    }
    pub const fn data_secs() -> u64 {
        10
    }
    pub const fn write_secs() -> u64 {
        10
    }
}
