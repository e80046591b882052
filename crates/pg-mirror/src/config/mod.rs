//! Configuration loading and validation.

mod types;
mod validation;

pub use types::*;

use crate::error::{MirrorError, Result};
use std::path::Path;
use std::str::FromStr;
use tokio_postgres::config::Host;
use tokio_postgres::Config as PgConfig;

impl Config {
    /// Load configuration from a YAML file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml(&content)
    }

    /// Parse configuration from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let config: Config = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<()> {
        validation::validate(self)
    }
}

impl EndpointConfig {
    /// Create an endpoint with default pool settings.
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ssl_mode: "disable".to_string(),
            max_connections: 4,
        }
    }

    /// Parse the connection string into a tokio-postgres config.
    pub fn pg_config(&self) -> Result<PgConfig> {
        PgConfig::from_str(&self.url).map_err(|e| {
            MirrorError::Config(format!(
                "invalid connection string '{}': {}",
                redact_url(&self.url),
                e
            ))
        })
    }

    /// Host/port/database identity used to refuse mirroring a database onto itself.
    pub fn identity(&self) -> Result<EndpointIdentity> {
        let cfg = self.pg_config()?;

        let hosts: Vec<String> = cfg
            .get_hosts()
            .iter()
            .map(|h| match h {
                Host::Tcp(name) => name.to_lowercase(),
                #[cfg(unix)]
                Host::Unix(path) => path.display().to_string(),
            })
            .map(|h| if h == "127.0.0.1" || h == "::1" { "localhost".to_string() } else { h })
            .collect();

        let ports: Vec<u16> = if cfg.get_ports().is_empty() {
            vec![5432]
        } else {
            cfg.get_ports().to_vec()
        };

        let database = cfg
            .get_dbname()
            .or_else(|| cfg.get_user())
            .unwrap_or_default()
            .to_string();

        Ok(EndpointIdentity {
            hosts: if hosts.is_empty() { vec!["localhost".to_string()] } else { hosts },
            ports,
            database,
        })
    }
}

/// Where a connection string points.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EndpointIdentity {
    pub hosts: Vec<String>,
    pub ports: Vec<u16>,
    pub database: String,
}

impl std::fmt::Display for EndpointIdentity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let ports: Vec<String> = self.ports.iter().map(|p| p.to_string()).collect();
        write!(f, "{}:{}/{}", self.hosts.join(","), ports.join(","), self.database)
    }
}
