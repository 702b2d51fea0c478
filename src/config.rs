//! Server configuration: loaded once at startup from a YAML file, with
//! every field falling back to the defaults from the external-interfaces
//! contract when absent.

use std::fs;
use std::io;
use std::net::SocketAddr;
use std::path::Path;

use serde::Deserialize;

fn default_domain() -> String {
    "localhost".to_owned()
}

fn default_bind() -> SocketAddr {
    "0.0.0.0:6667".parse().unwrap()
}

fn default_nick_minlen() -> u8 {
    1
}

fn default_nick_maxlen() -> u8 {
    9
}

fn default_chan_minlen() -> u8 {
    1
}

fn default_chan_maxlen() -> u8 {
    16
}

fn default_client_maxchans() -> usize {
    10
}

fn default_read_chunk_size() -> usize {
    4096
}

#[derive(Debug, Deserialize)]
pub struct Operator {
    pub name: String,
    pub password: String,
}

/// Mirrors the daemon's external-interfaces contract (§6): every default
/// here is the one a config-less startup must produce.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct Config {
    #[serde(default = "default_domain")]
    pub domain: String,

    #[serde(default = "default_bind")]
    pub bind: SocketAddr,

    #[serde(default = "default_nick_minlen")]
    pub nick_minlen: u8,

    #[serde(default = "default_nick_maxlen")]
    pub nick_maxlen: u8,

    #[serde(default = "default_chan_minlen")]
    pub chan_minlen: u8,

    #[serde(default = "default_chan_maxlen")]
    pub chan_maxlen: u8,

    #[serde(default = "default_client_maxchans")]
    pub client_maxchans: usize,

    #[serde(default = "default_read_chunk_size")]
    pub read_chunk_size: usize,

    pub motd_file: Option<String>,

    #[serde(default)]
    pub operators: Vec<Operator>,
}

impl Default for Config {
    fn default() -> Config {
        Config {
            domain: default_domain(),
            bind: default_bind(),
            nick_minlen: default_nick_minlen(),
            nick_maxlen: default_nick_maxlen(),
            chan_minlen: default_chan_minlen(),
            chan_maxlen: default_chan_maxlen(),
            client_maxchans: default_client_maxchans(),
            read_chunk_size: default_read_chunk_size(),
            motd_file: None,
            operators: Vec::new(),
        }
    }
}

#[derive(Debug)]
pub enum ConfigError {
    Io(io::Error),
    Yaml(serde_yaml::Error),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::Io(e) => write!(f, "could not read configuration file: {}", e),
            ConfigError::Yaml(e) => write!(f, "could not parse configuration file: {}", e),
        }
    }
}

impl std::error::Error for ConfigError {}

impl Config {
    /// Loads configuration from `path`. A malformed file is a startup
    /// error (`Err`); there is no separate "missing file" case here — the
    /// caller decides whether a missing path means "use defaults" (no path
    /// given on the command line) or is itself an error (an explicit path
    /// was given and isn't there).
    pub fn load(path: impl AsRef<Path>) -> Result<Config, ConfigError> {
        let text = fs::read_to_string(path).map_err(ConfigError::Io)?;
        serde_yaml::from_str(&text).map_err(ConfigError::Yaml)
    }

    /// Reads the configured MOTD file, if any. A missing file is logged by
    /// the caller and treated as "no MOTD" (`ERR_NOMOTD`), not fatal.
    pub fn motd(&self) -> Option<Vec<String>> {
        let path = self.motd_file.as_ref()?;
        match fs::read_to_string(path) {
            Ok(text) => Some(text.lines().map(str::to_owned).collect()),
            Err(e) => {
                log::warn!("could not read MOTD file {}: {}", path, e);
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_external_interfaces_contract() {
        let config = Config::default();
        assert_eq!(config.nick_maxlen, 9);
        assert_eq!(config.chan_maxlen, 16);
        assert_eq!(config.client_maxchans, 10);
        assert_eq!(config.domain, "localhost");
    }

    #[test]
    fn partial_yaml_fills_in_defaults() {
        let config: Config = serde_yaml::from_str("nick_maxlen: 5\n").unwrap();
        assert_eq!(config.nick_maxlen, 5);
        assert_eq!(config.chan_maxlen, 16);
    }

    #[test]
    fn malformed_yaml_is_an_error() {
        let result: Result<Config, _> = serde_yaml::from_str("nick_maxlen: [this, is, a, list]\n");
        assert!(result.is_err());
    }
}
