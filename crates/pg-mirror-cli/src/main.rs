//! pg-mirror CLI - PostgreSQL to PostgreSQL schema and data mirroring.

use clap::{Parser, Subcommand};
use pg_mirror::{health_check, Config, MirrorError, Orchestrator, RunStatus};
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::{info, Level};
use tracing_subscriber::fmt::format::FmtSpan;

#[derive(Parser)]
#[command(name = "pg-mirror")]
#[command(about = "Mirror schema and data from one PostgreSQL database to another")]
#[command(version)]
struct Cli {
    /// Path to YAML configuration file
    #[arg(short, long, default_value = "config.yaml")]
    config: PathBuf,

    /// Output JSON result to stdout
    #[arg(long)]
    output_json: bool,

    /// Log format: text or json
    #[arg(long, default_value = "text")]
    log_format: String,

    /// Log verbosity: debug, info, warn, error
    #[arg(long, default_value = "info")]
    verbosity: String,

    /// Print per-table outcomes as JSON lines to stderr
    #[arg(long)]
    progress: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create missing structure on the target and copy all data
    Run {
        /// Drop the planned target tables first (destructive)
        #[arg(long)]
        drop_existing: bool,

        /// Override rows per batch
        #[arg(long)]
        batch_size: Option<usize>,

        /// Dry run: discover and show the plan without touching the target
        #[arg(long)]
        dry_run: bool,

        /// Restrict the run to a schema (repeatable)
        #[arg(long = "schema")]
        schemas: Vec<String>,
    },

    /// Compare row counts between source and target
    Verify,

    /// Test database connections
    HealthCheck,
}

#[tokio::main]
async fn main() -> ExitCode {
    match run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{}", e.format_detailed());
            ExitCode::from(e.exit_code())
        }
    }
}

async fn run() -> Result<(), MirrorError> {
    let cli = Cli::parse();

    setup_logging(&cli.verbosity, &cli.log_format);

    let mut config = Config::load(&cli.config)?;
    apply_env_overrides(&mut config);
    info!("Loaded configuration from {:?}", cli.config);

    match cli.command {
        Commands::Run {
            drop_existing,
            batch_size,
            dry_run,
            schemas,
        } => {
            if drop_existing {
                config.mirror.drop_existing = true;
            }
            if let Some(size) = batch_size {
                config.mirror.batch_size = size;
            }
            if !schemas.is_empty() {
                config.mirror.schemas = schemas;
            }
            config.validate()?;

            let orchestrator = Orchestrator::new(config)
                .await?
                .with_progress(cli.progress);
            let result = orchestrator.run(dry_run).await;
            orchestrator.close().await;
            let report = result?;

            if cli.output_json {
                println!("{}", report.to_json()?);
            } else {
                println!("{}", report.render_summary());
            }

            if report.status != RunStatus::Completed {
                return Err(MirrorError::PartialFailure(
                    report.tables_with_errors().len(),
                ));
            }
        }

        Commands::Verify => {
            config.validate()?;
            let orchestrator = Orchestrator::new(config).await?;
            let result = orchestrator.verify().await;
            orchestrator.close().await;
            let entries = result?;

            if cli.output_json {
                println!("{}", serde_json::to_string_pretty(&entries)?);
            } else {
                println!("Row count verification:");
                for entry in &entries {
                    println!(
                        "  {} {}.{} (source: {}, target: {})",
                        if entry.matches { "OK  " } else { "DIFF" },
                        entry.schema,
                        entry.table,
                        count_or_unknown(entry.source_rows),
                        count_or_unknown(entry.target_rows)
                    );
                }
            }

            let mismatched = entries.iter().filter(|e| !e.matches).count();
            if mismatched > 0 {
                return Err(MirrorError::PartialFailure(mismatched));
            }
        }

        Commands::HealthCheck => {
            config.validate()?;
            let result = health_check(&config).await;

            if cli.output_json {
                println!("{}", serde_json::to_string_pretty(&result)?);
            } else {
                println!("Health Check Results:");
                println!(
                    "  Source: {} ({}ms)",
                    if result.source_connected { "OK" } else { "FAILED" },
                    result.source_latency_ms
                );
                if let Some(ref err) = result.source_error {
                    println!("    Error: {}", err);
                }
                println!(
                    "  Target: {} ({}ms)",
                    if result.target_connected { "OK" } else { "FAILED" },
                    result.target_latency_ms
                );
                if let Some(ref err) = result.target_error {
                    println!("    Error: {}", err);
                }
                println!(
                    "\n  Overall: {}",
                    if result.healthy { "HEALTHY" } else { "UNHEALTHY" }
                );
            }

            if !result.healthy {
                return Err(MirrorError::connection(
                    "health check",
                    "one or more endpoints are unreachable",
                ));
            }
        }
    }

    Ok(())
}

/// Connection strings from the environment win over the file.
fn apply_env_overrides(config: &mut Config) {
    if let Ok(url) = std::env::var("PG_MIRROR_SOURCE_URL") {
        if !url.is_empty() {
            config.source.url = url;
        }
    }
    if let Ok(url) = std::env::var("PG_MIRROR_TARGET_URL") {
        if !url.is_empty() {
            config.target.url = url;
        }
    }
}

fn count_or_unknown(count: Option<i64>) -> String {
    count.map_or_else(|| "?".to_string(), |n| n.to_string())
}

fn setup_logging(verbosity: &str, format: &str) {
    let level = match verbosity.to_lowercase().as_str() {
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    // Logs go to stderr so stdout stays clean for --output-json
    let subscriber = tracing_subscriber::fmt()
        .with_max_level(level)
        .with_span_events(FmtSpan::CLOSE)
        .with_target(false)
        .with_writer(std::io::stderr);

    if format == "json" {
        subscriber.json().init();
    } else {
        subscriber.init();
    }
}
