//! Session configuration.
//!
//! Configuration can be built in code or parsed from TOML:
//!
//! ```toml
//! connection_pool_size = 10
//! connect_timeout_secs = 60
//! app_name = "backup-tool"
//! proxy = "http://127.0.0.1:3128"
//! ```

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::DEFAULT_CONNECTION_POOL_SIZE;
use crate::error::Error;

/// Transport session configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Idle connections kept per host.
    #[serde(default = "default_pool_size")]
    pub connection_pool_size: usize,

    /// TCP connect timeout in seconds.
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,

    /// Appended to the `User-Agent` header when non-empty.
    #[serde(default)]
    pub app_name: String,

    /// Proxy URL used when a request does not name its own.
    #[serde(default)]
    pub proxy: Option<String>,
}

fn default_pool_size() -> usize {
    DEFAULT_CONNECTION_POOL_SIZE
}

fn default_connect_timeout() -> u64 {
    60
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            connection_pool_size: default_pool_size(),
            connect_timeout_secs: default_connect_timeout(),
            app_name: String::new(),
            proxy: None,
        }
    }
}

impl SessionConfig {
    /// Parses configuration from a TOML document; missing keys use defaults.
    pub fn from_toml_str(content: &str) -> Result<Self, Error> {
        Ok(toml::from_str(content)?)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }
}
