//! # pg-mirror
//!
//! Schema and data mirroring between two PostgreSQL databases.
//!
//! The source catalog is introspected at run time (schemas, tables, columns,
//! keys, indexes, sequences) and reproduced on the target together with all
//! row data:
//!
//! - **Structure** is created with `IF NOT EXISTS`, so reruns are no-ops
//! - **Data** is copied in conflict-tolerant batches from a single snapshot
//! - **Constraints** and indexes are applied once all data is present
//! - **Sequences** are advanced past the copied values
//!
//! The default mode is additive. Mirror mode (`drop_existing`) drops the
//! planned target tables first and must be requested explicitly.
//!
//! ## Example
//!
//! ```rust,no_run
//! use pg_mirror::{Config, Orchestrator};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), pg_mirror::MirrorError> {
//!     let config = Config::load("config.yaml")?;
//!     let orchestrator = Orchestrator::new(config).await?;
//!     let report = orchestrator.run(false).await;
//!     orchestrator.close().await;
//!     let report = report?;
//!     println!("{}", report.render_summary());
//!     Ok(())
//! }
//! ```

pub mod catalog;
pub mod config;
pub mod constraints;
pub mod ddl;
pub mod error;
pub mod orchestrator;
pub mod plan;
pub mod pool;
pub mod report;
pub mod schema;
pub mod sequence;
pub mod source;
pub mod target;
pub mod tls;
pub mod transfer;
pub mod typemap;

// Re-exports for convenient access
pub use catalog::{
    ColumnDescriptor, ForeignKeyDescriptor, IdentityKind, IndexDescriptor, SchemaRef,
    SequenceRef, TableDescriptor,
};
pub use config::{Config, EndpointConfig, MirrorConfig, RunMode};
pub use error::{MirrorError, Result};
pub use orchestrator::Orchestrator;
pub use plan::RunPlan;
pub use pool::{health_check, HealthCheckResult};
pub use report::{MirrorReport, Phase, RunStatus, TableOutcome, VerificationEntry};
pub use source::{CellValue, PgSourcePool, Row, SourcePool};
pub use target::{PgTargetPool, TargetPool};
pub use transfer::{TransferConfig, TransferEngine};
