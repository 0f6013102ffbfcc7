//! Configuration file handling for greylistproxy.

use crate::spam_status::BULK_SCORE_MANY;
use serde::de::Error as _;
use serde::{Deserialize, Deserializer};
use std::fmt;
use std::path::Path;
use std::time::Duration;

/// Value of `relay` that disables delivery altogether.
const NO_RELAY: &str = "None";

/// Port used when `relay` does not name one.
const DEFAULT_RELAY_PORT: u16 = 25;

/// Smallest bulk threshold the detector can express.
const MIN_BULK_THRESHOLD: u64 = 2;

/// Proxy configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default = "Config::default_listen_host")]
    pub listen_host: String,
    #[serde(default = "Config::default_listen_port")]
    pub listen_port: u16,
    /// Where accepted mail goes. `None` drops it after the decision is made.
    #[serde(deserialize_with = "deserialize_relay")]
    pub relay: Option<RelayTarget>,
    #[serde(
        default = "Config::default_spam_threshold",
        deserialize_with = "deserialize_spam_threshold"
    )]
    pub spam_threshold: f64,
    #[serde(
        default = "Config::default_bulk_threshold",
        deserialize_with = "deserialize_bulk_threshold"
    )]
    pub bulk_threshold: u64,
    #[serde(default = "Config::default_policy_host")]
    pub policy_host: String,
    #[serde(default = "Config::default_policy_port")]
    pub policy_port: u16,
    #[serde(default = "Config::default_policy_timeout")]
    policy_timeout: u64,
    #[serde(default = "Config::default_relay_timeout")]
    relay_timeout: u64,
    #[serde(default = "Config::default_max_message_size")]
    pub max_message_size: usize,
}

#[derive(Debug, Clone, Deserialize)]
struct ConfigWrapper {
    // Everything lives in the `proxy` section.
    pub proxy: Config,
}

/// Host and port of the downstream relay.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelayTarget {
    pub host: String,
    pub port: u16,
}

impl fmt::Display for RelayTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

impl RelayTarget {
    /// Parses `host[:port]`, defaulting to the SMTP port.
    fn parse(value: &str) -> Option<Self> {
        let value = value.trim();
        let (host, port) = match value.rsplit_once(':') {
            Some((host, port)) => (host, port.parse().ok()?),
            None => (value, DEFAULT_RELAY_PORT),
        };
        if host.is_empty() {
            return None;
        }
        Some(Self {
            host: host.to_string(),
            port,
        })
    }
}

fn deserialize_relay<'de, D>(deserializer: D) -> Result<Option<RelayTarget>, D::Error>
where
    D: Deserializer<'de>,
{
    let s: String = Deserialize::deserialize(deserializer)?;
    if s.trim() == NO_RELAY {
        return Ok(None);
    }
    RelayTarget::parse(&s)
        .map(Some)
        .ok_or_else(|| D::Error::custom(format!("relay must be host[:port] or None: {s}")))
}

fn deserialize_spam_threshold<'de, D>(deserializer: D) -> Result<f64, D::Error>
where
    D: Deserializer<'de>,
{
    let s: String = Deserialize::deserialize(deserializer)?;
    s.trim()
        .parse()
        .map_err(|e| D::Error::custom(format!("spam_threshold must be a number: {e}")))
}

/// Accepts an integer or `many`, rejecting anything below 2.
fn deserialize_bulk_threshold<'de, D>(deserializer: D) -> Result<u64, D::Error>
where
    D: Deserializer<'de>,
{
    let s: String = Deserialize::deserialize(deserializer)?;
    let value = match s.trim() {
        "many" => BULK_SCORE_MANY,
        other => other.parse().map_err(|_| {
            D::Error::custom(format!(
                "bulk_threshold must be either an integer or \"many\": {other}"
            ))
        })?,
    };
    if value < MIN_BULK_THRESHOLD {
        return Err(D::Error::custom(format!(
            "bulk_threshold must be greater than 1: {value}"
        )));
    }
    Ok(value)
}

impl Config {
    /// Load configuration from a file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, crate::error::Error> {
        let content = std::fs::read_to_string(path)?;
        Self::parse(&content)
    }

    /// Parse configuration from the contents of an INI file.
    pub fn parse(content: &str) -> Result<Self, crate::error::Error> {
        let wrapped_config: ConfigWrapper = serini::from_str(content)?;
        Ok(wrapped_config.proxy)
    }

    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.listen_host, self.listen_port)
    }

    pub fn policy_timeout(&self) -> Duration {
        Duration::from_secs(self.policy_timeout)
    }

    pub fn relay_timeout(&self) -> Duration {
        Duration::from_secs(self.relay_timeout)
    }

    // Following are needed since serde does not support default literals.

    fn default_listen_host() -> String {
        "127.0.0.1".to_string()
    }
    const fn default_listen_port() -> u16 {
        10025
    }
    const fn default_spam_threshold() -> f64 {
        1.0
    }
    const fn default_bulk_threshold() -> u64 {
        MIN_BULK_THRESHOLD
    }
    fn default_policy_host() -> String {
        "127.0.0.1".to_string()
    }
    const fn default_policy_port() -> u16 {
        10023
    }
    const fn default_policy_timeout() -> u64 {
        10
    }
    const fn default_relay_timeout() -> u64 {
        60
    }
    const fn default_max_message_size() -> usize {
        31457280
    }
}
