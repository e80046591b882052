//! Connection pools for the two endpoints.

use deadpool_postgres::{Manager, ManagerConfig, Pool, RecyclingMethod};
use serde::Serialize;
use std::time::Instant;
use tokio_postgres::NoTls;
use tracing::{info, warn};

use crate::config::{redact_url, Config, EndpointConfig};
use crate::error::{MirrorError, Result};
use crate::source::PgSourcePool;
use crate::target::PgTargetPool;
use crate::tls::SslMode;

/// Build a pool for one endpoint and probe it with `SELECT 1`.
///
/// `label` ("source" or "target") names the endpoint in errors and logs.
pub async fn build_pool(label: &str, endpoint: &EndpointConfig) -> Result<Pool> {
    let pg_config = endpoint.pg_config()?;
    let ssl_mode = SslMode::parse(&endpoint.ssl_mode)?;

    let mgr_config = ManagerConfig {
        recycling_method: RecyclingMethod::Fast,
    };

    let mgr = match ssl_mode.connector()? {
        Some(tls) => Manager::from_config(pg_config, tls, mgr_config),
        None => {
            warn!(
                "{} connection has TLS disabled; credentials travel in plaintext",
                label
            );
            Manager::from_config(pg_config, NoTls, mgr_config)
        }
    };

    let pool = Pool::builder(mgr)
        .max_size(endpoint.max_connections)
        .build()
        .map_err(|e| MirrorError::pool(e, format!("creating {} pool", label)))?;

    let client = pool
        .get()
        .await
        .map_err(|e| MirrorError::connection(label, e))?;
    client
        .simple_query("SELECT 1")
        .await
        .map_err(|e| MirrorError::connection(label, crate::error::describe_db_error(&e)))?;

    info!(
        "Connected to {} {} (ssl_mode={})",
        label,
        redact_url(&endpoint.url),
        ssl_mode
    );

    Ok(pool)
}

/// Connect to both endpoints.
///
/// Refuses to proceed when both connection strings resolve to the same
/// database, even if configuration validation was bypassed.
pub async fn connect(config: &Config) -> Result<(PgSourcePool, PgTargetPool)> {
    let source_id = config.source.identity()?;
    let target_id = config.target.identity()?;
    if source_id == target_id {
        return Err(MirrorError::Config(format!(
            "source and target cannot be the same database ({})",
            source_id
        )));
    }

    let source = PgSourcePool::new(build_pool("source", &config.source).await?);
    let target = match build_pool("target", &config.target).await {
        Ok(pool) => PgTargetPool::new(pool),
        Err(e) => {
            source.pool().close();
            return Err(e);
        }
    };

    Ok((source, target))
}

/// Connectivity of both endpoints.
#[derive(Debug, Clone, Serialize)]
pub struct HealthCheckResult {
    pub source_connected: bool,
    pub source_latency_ms: u64,
    pub source_error: Option<String>,
    pub target_connected: bool,
    pub target_latency_ms: u64,
    pub target_error: Option<String>,
    pub healthy: bool,
}

/// Probe each endpoint independently; never fails.
pub async fn health_check(config: &Config) -> HealthCheckResult {
    let (source_connected, source_latency_ms, source_error) =
        probe("source", &config.source).await;
    let (target_connected, target_latency_ms, target_error) =
        probe("target", &config.target).await;

    HealthCheckResult {
        source_connected,
        source_latency_ms,
        source_error,
        target_connected,
        target_latency_ms,
        target_error,
        healthy: source_connected && target_connected,
    }
}

async fn probe(label: &str, endpoint: &EndpointConfig) -> (bool, u64, Option<String>) {
    let start = Instant::now();
    match build_pool(label, endpoint).await {
        Ok(pool) => {
            let elapsed = start.elapsed().as_millis() as u64;
            pool.close();
            (true, elapsed, None)
        }
        Err(e) => (false, start.elapsed().as_millis() as u64, Some(e.to_string())),
    }
}
