//! Server address configuration.
//!
//! The address is read from a properties file:
//!
//! ```text
//! # GameServer connection
//! server.protocol = tcp
//! server.address  = 127.0.0.1
//! server.port     = 4800
//! ```
//!
//! All whitespace is stripped from every line; lines starting with `#` or
//! `!` and blank lines are ignored.

use std::collections::HashMap;
use std::fmt;
use std::path::Path;
use std::time::Duration;

use url::Url;

use crate::error::ClientError;
use crate::pending::DEFAULT_REQUEST_TIMEOUT;

pub const PROTOCOL_KEY: &str = "server.protocol";
pub const ADDRESS_KEY: &str = "server.address";
pub const PORT_KEY: &str = "server.port";

/// Parse properties text into a key/value map.
///
/// A line without `=` maps its key to an empty value. Later duplicates win.
pub fn parse_properties(text: &str) -> HashMap<String, String> {
    let mut properties = HashMap::new();

    for line in text.lines() {
        let line: String = line.chars().filter(|c| !c.is_whitespace()).collect();
        if line.is_empty() || line.starts_with('#') || line.starts_with('!') {
            continue;
        }

        let (key, value) = line.split_once('=').unwrap_or((line.as_str(), ""));
        properties.insert(key.to_string(), value.to_string());
    }

    properties
}

/// Read and parse a properties file.
///
/// # Errors
///
/// Returns `ClientError::Io` if the file cannot be read.
pub async fn load_properties(path: &Path) -> Result<HashMap<String, String>, ClientError> {
    let text = tokio::fs::read_to_string(path).await?;
    Ok(parse_properties(&text))
}

/// Resolved connection address.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerAddress {
    pub protocol: String,
    pub host: String,
    pub port: u16,
}

impl ServerAddress {
    /// Build from the `server.*` keys of a properties map.
    ///
    /// # Errors
    ///
    /// Returns `ClientError::Config` if a key is missing or the port is not
    /// a valid number.
    pub fn from_properties(properties: &HashMap<String, String>) -> Result<Self, ClientError> {
        let get = |key: &str| {
            properties
                .get(key)
                .filter(|value| !value.is_empty())
                .cloned()
                .ok_or_else(|| ClientError::Config(format!("Missing property: {}", key)))
        };

        let port = get(PORT_KEY)?;
        let port = port
            .parse()
            .map_err(|_| ClientError::Config(format!("Invalid {} value: {}", PORT_KEY, port)))?;

        Ok(Self {
            protocol: get(PROTOCOL_KEY)?,
            host: get(ADDRESS_KEY)?,
            port,
        })
    }

    /// Load from a properties file.
    pub async fn load(path: &Path) -> Result<Self, ClientError> {
        Self::from_properties(&load_properties(path).await?)
    }

    /// Parse a `protocol://host:port` address.
    pub fn parse(address: &str) -> Result<Self, ClientError> {
        let url = Url::parse(address)
            .map_err(|e| ClientError::Config(format!("Invalid address {}: {}", address, e)))?;
        let host = url
            .host_str()
            .ok_or_else(|| ClientError::Config(format!("Address has no host: {}", address)))?;
        let port = url
            .port_or_known_default()
            .ok_or_else(|| ClientError::Config(format!("Address has no port: {}", address)))?;

        Ok(Self {
            protocol: url.scheme().to_string(),
            host: host.to_string(),
            port,
        })
    }

    /// Render and validate as a URL.
    pub fn url(&self) -> Result<Url, ClientError> {
        Url::parse(&self.to_string())
            .map_err(|e| ClientError::Config(format!("Invalid address {}: {}", self, e)))
    }
}

impl fmt::Display for ServerAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}://{}:{}", self.protocol, self.host, self.port)
    }
}

/// Tunables for a connection manager.
#[derive(Debug, Clone)]
pub struct ClientOptions {
    /// How long a request may stay pending before it is rejected.
    pub request_timeout: Duration,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
        }
    }
}
