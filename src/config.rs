//! Server configuration.
//!
//! Settings come from an optional YAML file named by `EVENTHTTP_CONFIG`,
//! with the listen addresses overridable through `LISTEN`
//! (`host:port[,host:port...]`). Missing keys take their defaults.

use std::net::Ipv6Addr;
use std::path::Path;
use std::time::Duration;

use anyhow::{Context, bail};
use serde::Deserialize;

use crate::http::connection::ConnectionSettings;
use crate::http::parser::Limits;
use crate::http::request::Method;
use crate::server::listener::DEFAULT_BACKLOG;

pub const CONFIG_ENV: &str = "EVENTHTTP_CONFIG";
pub const LISTEN_ENV: &str = "LISTEN";

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ListenConfig {
    pub host: String,
    pub port: u16,
}

impl ListenConfig {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub backlog: i32,
    pub max_headers_size: usize,
    pub max_body_size: usize,
    /// Seconds a connection may stay idle; 0 disables the timeout.
    pub idle_timeout_secs: u64,
    pub keep_alive: bool,
    pub workers: usize,
    pub allowed_methods: Option<Vec<Method>>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        let limits = Limits::default();
        Self {
            backlog: DEFAULT_BACKLOG,
            max_headers_size: limits.max_headers_size,
            max_body_size: limits.max_body_size,
            idle_timeout_secs: 60,
            keep_alive: true,
            workers: 0,
            allowed_methods: None,
        }
    }
}

impl ServerConfig {
    pub fn connection_settings(&self) -> ConnectionSettings {
        ConnectionSettings {
            limits: Limits {
                max_headers_size: self.max_headers_size,
                max_body_size: self.max_body_size,
            },
            keep_alive: self.keep_alive,
            idle_timeout: (self.idle_timeout_secs > 0)
                .then(|| Duration::from_secs(self.idle_timeout_secs)),
            allowed_methods: self.allowed_methods.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct Config {
    pub listen: Vec<ListenConfig>,
    pub server: ServerConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            listen: vec![
                ListenConfig::new("127.0.0.1", 8088),
                ListenConfig::new("127.0.0.1", 8089),
            ],
            server: ServerConfig::default(),
        }
    }
}

impl Config {
    /// Loads the file named by `EVENTHTTP_CONFIG`, if any, then applies `LISTEN`.
    pub fn load() -> anyhow::Result<Self> {
        let mut config = match std::env::var(CONFIG_ENV) {
            Ok(path) => Self::from_file(&path)?,
            Err(_) => Self::default(),
        };

        if let Ok(listen) = std::env::var(LISTEN_ENV) {
            config.listen = parse_listen(&listen)
                .with_context(|| format!("invalid {} value {:?}", LISTEN_ENV, listen))?;
        }

        Ok(config)
    }

    pub fn from_file(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file {}", path.display()))?;
        Self::from_yaml(&text)
            .with_context(|| format!("failed to parse config file {}", path.display()))
    }

    pub fn from_yaml(text: &str) -> anyhow::Result<Self> {
        let config: Config = serde_yaml::from_str(text)?;
        if config.listen.is_empty() {
            bail!("no listen addresses configured");
        }
        Ok(config)
    }
}

/// Parses a comma separated list of `host:port` pairs.
///
/// IPv6 hosts are written in brackets, e.g. `[::1]:8088`.
pub fn parse_listen(value: &str) -> anyhow::Result<Vec<ListenConfig>> {
    let mut listen = Vec::new();

    for item in value.split(',').map(str::trim).filter(|s| !s.is_empty()) {
        let (host, port) = item
            .rsplit_once(':')
            .with_context(|| format!("{:?} is missing a port", item))?;
        let port: u16 = port
            .parse()
            .with_context(|| format!("{:?} has an invalid port", item))?;

        let host = match host.strip_prefix('[').and_then(|h| h.strip_suffix(']')) {
            Some(v6) => {
                v6.parse::<Ipv6Addr>()
                    .with_context(|| format!("{:?} is not an IPv6 address", v6))?;
                v6
            }
            None if host.contains(':') => bail!("IPv6 host in {:?} must be bracketed", item),
            None if host.is_empty() => bail!("{:?} is missing a host", item),
            None => host,
        };

        listen.push(ListenConfig::new(host, port));
    }

    if listen.is_empty() {
        bail!("no listen addresses given");
    }
    Ok(listen)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_timeout_disables_idle_expiry() {
        let server = ServerConfig {
            idle_timeout_secs: 0,
            ..ServerConfig::default()
        };
        assert_eq!(server.connection_settings().idle_timeout, None);
    }

    #[test]
    fn bracketed_ipv6_listen() {
        let listen = parse_listen("[::1]:9000").unwrap();
        assert_eq!(listen, vec![ListenConfig::new("::1", 9000)]);
    }
}
