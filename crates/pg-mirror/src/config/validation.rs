//! Configuration validation.

use super::{Config, EndpointConfig};
use crate::error::{MirrorError, Result};
use crate::tls::SslMode;

/// Validate the configuration.
pub fn validate(config: &Config) -> Result<()> {
    validate_endpoint("source", &config.source)?;
    validate_endpoint("target", &config.target)?;

    // Cannot mirror a database onto itself
    let source = config.source.identity()?;
    let target = config.target.identity()?;
    if source == target {
        return Err(MirrorError::Config(format!(
            "source and target cannot be the same database ({})",
            source
        )));
    }

    if config.mirror.batch_size == 0 {
        return Err(MirrorError::Config(
            "mirror.batch_size must be at least 1".into(),
        ));
    }

    for pattern in &config.mirror.exclude_tables {
        if pattern.is_empty() {
            return Err(MirrorError::Config(
                "mirror.exclude_tables entries cannot be empty".into(),
            ));
        }
    }

    Ok(())
}

fn validate_endpoint(label: &str, endpoint: &EndpointConfig) -> Result<()> {
    if endpoint.url.trim().is_empty() {
        return Err(MirrorError::Config(format!("{}.url is required", label)));
    }
    if endpoint.max_connections == 0 {
        return Err(MirrorError::Config(format!(
            "{}.max_connections must be at least 1",
            label
        )));
    }
    SslMode::parse(&endpoint.ssl_mode)?;
    endpoint.pg_config()?;
    Ok(())
}
