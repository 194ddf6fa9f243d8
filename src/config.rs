//! Server configuration and its YAML loader.
//!
//! ```yaml
//! host: 127.0.0.1
//! port: 8080
//! max_connections: 64
//! input_polling_interval_ms: 100
//! console_input: true
//! root_directory: ./public
//! ```
//! Every key is optional; missing keys take the [`Default`] value.

use crate::errors::Error;
use serde::{Deserialize, Serialize};
use std::{
    fs,
    net::{IpAddr, Ipv4Addr, SocketAddr},
    path::{Path, PathBuf},
    time::Duration,
};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ServerConfig {
    /// Address to bind (default: `0.0.0.0`)
    pub host: IpAddr,

    /// TCP port, `1..=65535` (default: `8080`)
    pub port: u16,

    /// Worker threads and listen backlog (default: `64`)
    ///
    /// Also the number of connections served at the same time.
    pub max_connections: usize,

    /// How often the console thread re-checks the server state (default: `100`)
    pub input_polling_interval_ms: u64,

    /// Listen for stop commands on stdin (default: `true`)
    pub console_input: bool,

    /// Directory served under `/static/{file}` by the binary (default: none)
    pub root_directory: Option<PathBuf>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            port: 8080,
            max_connections: 64,
            input_polling_interval_ms: 100,
            console_input: true,
            root_directory: None,
        }
    }
}

impl ServerConfig {
    /// Parses and validates a YAML document.
    ///
    /// ```
    /// use mill_web::ServerConfig;
    ///
    /// let config = ServerConfig::from_yaml_str("port: 3000\nconsole_input: false").unwrap();
    /// assert_eq!(config.port, 3000);
    /// assert_eq!(config.max_connections, 64);
    ///
    /// assert!(ServerConfig::from_yaml_str("port: 0").is_err());
    /// assert!(ServerConfig::from_yaml_str("colour: blue").is_err());
    /// ```
    pub fn from_yaml_str(source: &str) -> Result<Self, Error> {
        // An empty document deserializes as `null`, not as an empty map.
        let config = match source.trim().is_empty() {
            true => Self::default(),
            false => serde_yaml::from_str(source)?,
        };

        config.validate()?;
        Ok(config)
    }

    /// Reads, parses and validates the YAML file at `path`.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, Error> {
        let source = fs::read_to_string(path)?;
        Self::from_yaml_str(&source)
    }

    /// Checks value ranges that the types alone do not enforce.
    pub fn validate(&self) -> Result<(), Error> {
        if self.port == 0 {
            return Err(Error::InvalidConfig("port must be in 1..=65535".into()));
        }
        if self.max_connections == 0 {
            return Err(Error::InvalidConfig(
                "max_connections must be greater than 0".into(),
            ));
        }

        Ok(())
    }

    #[inline]
    pub fn socket_addr(&self) -> SocketAddr {
        SocketAddr::new(self.host, self.port)
    }

    #[inline]
    pub fn input_polling_interval(&self) -> Duration {
        Duration::from_millis(self.input_polling_interval_ms)
    }
}
