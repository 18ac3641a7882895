//! Server configuration, read from TOML.
//!
//! ```toml
//! hostname = "mx.example.com"
//! listen = "0.0.0.0:25"
//! max_connections = 200
//! size_limit = 10485760
//! queue_decline = "fatal"
//!
//! [timeouts]
//! idle_secs = 30
//! data_secs = 180
//!
//! [spool]
//! rollover_bytes = 262144
//! directory = "/var/spool/waymark/tmp"
//!
//! [[plugin]]
//! type = "relay"
//! domains = ["example.com"]
//!
//! [[plugin]]
//! type = "queue_dir"
//! path = "/var/spool/waymark/queue"
//! ```

use std::{
    net::{IpAddr, SocketAddr},
    path::{Path, PathBuf},
    time::Duration,
};

use serde::Deserialize;

use crate::error::ConfigError;

/// What to do when nothing in the `queue` stage accepts a message
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueueDecline {
    /// Reply 451 and keep the connection
    #[default]
    Temporary,
    /// Require a queue handler at startup; at runtime reply 421 and close
    Fatal,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Timeouts {
    /// Longest wait for a command line
    #[serde(default = "defaults::idle_secs")]
    pub idle_secs: u64,

    /// Longest wait for each line of message data
    #[serde(default = "defaults::data_secs")]
    pub data_secs: u64,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            idle_secs: defaults::idle_secs(),
            data_secs: defaults::data_secs(),
        }
    }
}

impl Timeouts {
    #[must_use]
    pub const fn idle(&self) -> Duration {
        Duration::from_secs(self.idle_secs)
    }

    #[must_use]
    pub const fn data(&self) -> Duration {
        Duration::from_secs(self.data_secs)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct SpoolConfig {
    /// Bodies larger than this move from memory to a temporary file
    #[serde(default = "defaults::rollover_bytes")]
    pub rollover_bytes: usize,

    /// Where temporary files are created; the system default if unset
    #[serde(default)]
    pub directory: Option<PathBuf>,
}

impl Default for SpoolConfig {
    fn default() -> Self {
        Self {
            rollover_bytes: defaults::rollover_bytes(),
            directory: None,
        }
    }
}

/// A handler bundle to load, selected by its `type`
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PluginConfig {
    Relay {
        #[serde(default)]
        domains: Vec<String>,
        #[serde(default)]
        clients: Vec<IpAddr>,
    },
    CheckLoop {
        #[serde(default = "defaults::max_hops")]
        max_hops: usize,
    },
    QueueDir {
        path: PathBuf,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Config {
    #[serde(default = "defaults::hostname")]
    pub hostname: String,

    #[serde(default = "defaults::listen")]
    pub listen: SocketAddr,

    /// Concurrent session cap; unlimited when unset
    #[serde(default)]
    pub max_connections: Option<usize>,

    /// Largest accepted message in bytes, 0 for no limit
    #[serde(default)]
    pub size_limit: usize,

    /// Consecutive unrecognised commands tolerated, 0 for no limit
    #[serde(default = "defaults::max_unrecognized_commands")]
    pub max_unrecognized_commands: usize,

    #[serde(default)]
    pub queue_decline: QueueDecline,

    #[serde(default)]
    pub timeouts: Timeouts,

    #[serde(default)]
    pub spool: SpoolConfig,

    #[serde(default, rename = "plugin")]
    pub plugins: Vec<PluginConfig>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            hostname: defaults::hostname(),
            listen: defaults::listen(),
            max_connections: None,
            size_limit: 0,
            max_unrecognized_commands: defaults::max_unrecognized_commands(),
            queue_decline: QueueDecline::default(),
            timeouts: Timeouts::default(),
            spool: SpoolConfig::default(),
            plugins: Vec::new(),
        }
    }
}

impl Config {
    /// Read and validate the configuration at `path`.
    ///
    /// # Errors
    /// If the file cannot be read or parsed, or fails [`Config::validate`].
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;

        let config: Self = toml::from_str(&contents)?;
        config.validate()?;

        Ok(config)
    }

    /// Reject values the server cannot run with.
    ///
    /// # Errors
    /// [`ConfigError::Invalid`] naming the first offending field.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.hostname.trim().is_empty() || self.hostname.contains(char::is_whitespace) {
            return Err(ConfigError::Invalid {
                field: "hostname",
                reason: format!("'{}' is not a host name", self.hostname),
            });
        }

        if self.max_connections == Some(0) {
            return Err(ConfigError::Invalid {
                field: "max_connections",
                reason: "must be at least 1 when set".to_string(),
            });
        }

        if self.timeouts.idle_secs == 0 {
            return Err(ConfigError::Invalid {
                field: "timeouts.idle_secs",
                reason: "must be greater than 0".to_string(),
            });
        }

        if self.timeouts.data_secs == 0 {
            return Err(ConfigError::Invalid {
                field: "timeouts.data_secs",
                reason: "must be greater than 0".to_string(),
            });
        }

        if let Some(directory) = &self.spool.directory {
            if !directory.is_dir() {
                return Err(ConfigError::Invalid {
                    field: "spool.directory",
                    reason: format!("{} is not a directory", directory.display()),
                });
            }
        }

        for plugin in &self.plugins {
            if let PluginConfig::CheckLoop { max_hops: 0 } = plugin {
                return Err(ConfigError::Invalid {
                    field: "plugin.max_hops",
                    reason: "must be greater than 0".to_string(),
                });
            }
        }

        Ok(())
    }
}

mod defaults {
    use std::net::{IpAddr, Ipv4Addr, SocketAddr};

    pub fn hostname() -> String {
        std::env::var("HOSTNAME")
            .ok()
            .filter(|hostname| !hostname.trim().is_empty())
            .unwrap_or_else(|| "localhost".to_string())
    }

    pub const fn listen() -> SocketAddr {
        SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), 2525)
    }

    pub const fn max_unrecognized_commands() -> usize {
        4
    }

    pub const fn idle_secs() -> u64 {
        30
    }

    pub const fn data_secs() -> u64 {
        180
    }

    pub const fn rollover_bytes() -> usize {
        crate::smtp::spool::DEFAULT_ROLLOVER
    }

    pub const fn max_hops() -> usize {
        100
    }
}
