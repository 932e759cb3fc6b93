// ecowitt_statsd - StatsD and Prometheus metrics bridge for Ecowitt weather gateways
//
// Copyright 2023 Nick Pillitteri
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License
// along with this program.  If not, see <http://www.gnu.org/licenses/>.
//

use serde::{Deserialize, Serialize};
use std::error;
use std::fmt;
use std::fs;
use std::io;
use std::path::Path;

#[derive(Debug)]
pub enum ConfigError {
    Io(io::Error),
    Parse(serde_json::Error),
    MissingHost,
    InvalidPort(i64),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Io(e) => write!(f, "unable to read config: {}", e),
            Self::Parse(e) => write!(f, "invalid config: {}", e),
            Self::MissingHost => write!(f, "invalid config: gateway host is required"),
            Self::InvalidPort(p) => write!(f, "invalid config: gateway port {} must be between 0 and 65535", p),
        }
    }
}

impl error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn error::Error + 'static)> {
        match self {
            Self::Io(e) => Some(e),
            Self::Parse(e) => Some(e),
            Self::MissingHost | Self::InvalidPort(_) => None,
        }
    }
}

/// Settings read from a JSON config file, for example:
///
/// ```json
/// {
///   "statsServer": "127.0.0.1:8125",
///   "host": "192.168.1.20",
///   "port": 80,
///   "defaultTags": ["site:home"]
/// }
/// ```
///
/// An empty `statsServer` disables sending metrics to StatsD. `port` is read as any
/// integer but must fit in a TCP port to be accepted by `Config::from_slice`.
#[derive(Serialize, Deserialize, Debug, Default, Clone, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct Config {
    pub stats_server: String,
    pub host: String,
    pub port: i64,
    pub default_tags: Vec<String>,
}

impl Config {
    pub fn from_path<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let bytes = fs::read(path).map_err(ConfigError::Io)?;
        Self::from_slice(&bytes)
    }

    pub fn from_slice(bytes: &[u8]) -> Result<Self, ConfigError> {
        let config: Config = serde_json::from_slice(bytes).map_err(ConfigError::Parse)?;
        if config.host.is_empty() {
            return Err(ConfigError::MissingHost);
        }

        if u16::try_from(config.port).is_err() {
            return Err(ConfigError::InvalidPort(config.port));
        }

        Ok(config)
    }

    /// Port of the gateway, `0` if the configured value doesn't fit in a TCP port
    /// (which `from_slice` rejects).
    pub fn gateway_port(&self) -> u16 {
        u16::try_from(self.port).unwrap_or(0)
    }

    pub fn stats_enabled(&self) -> bool {
        !self.stats_server.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::{Config, ConfigError};

    #[test]
    fn test_config_full() {
        let config = Config::from_slice(
            br#"{"statsServer": "localhost:8125", "host": "192.168.1.20", "port": 80, "defaultTags": ["site:home", "env:prod"]}"#,
        )
        .unwrap();

        assert_eq!(
            Config {
                stats_server: "localhost:8125".to_owned(),
                host: "192.168.1.20".to_owned(),
                port: 80,
                default_tags: vec!["site:home".to_owned(), "env:prod".to_owned()],
            },
            config
        );
        assert!(config.stats_enabled());
    }

    #[test]
    fn test_config_minimal() {
        let config = Config::from_slice(br#"{"host": "gateway.local"}"#).unwrap();

        assert_eq!("gateway.local", config.host);
        assert_eq!(0, config.port);
        assert!(config.default_tags.is_empty());
        assert!(!config.stats_enabled());
    }

    #[test]
    fn test_config_missing_host() {
        let res = Config::from_slice(br#"{"statsServer": "localhost:8125"}"#);
        assert!(matches!(res, Err(ConfigError::MissingHost)));
    }

    #[test]
    fn test_config_port_negative() {
        let res = Config::from_slice(br#"{"host": "gateway.local", "port": -1}"#);
        assert!(matches!(res, Err(ConfigError::InvalidPort(-1))));
    }

    #[test]
    fn test_config_port_too_large() {
        let res = Config::from_slice(br#"{"host": "gateway.local", "port": 70000}"#);
        assert!(matches!(res, Err(ConfigError::InvalidPort(70000))));
    }

    #[test]
    fn test_config_port_max() {
        let config = Config::from_slice(br#"{"host": "gateway.local", "port": 65535}"#).unwrap();
        assert_eq!(65535, config.gateway_port());
    }

    #[test]
    fn test_config_malformed() {
        let res = Config::from_slice(br#"{"host": "#);
        assert!(matches!(res, Err(ConfigError::Parse(_))));
    }

    #[test]
    fn test_config_missing_file() {
        let res = Config::from_path("/this/path/does/not/exist/config.json");
        assert!(matches!(res, Err(ConfigError::Io(_))));
    }
}
