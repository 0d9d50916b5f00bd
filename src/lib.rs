//! # goldcopy
//!
//! Local golden-copy replicas of a PostgreSQL source database, cloned on demand
//! into per-workspace databases whose migration state is checked against the
//! workspace checkout.
//!
//! See the README for the command surface and configuration.

pub mod analyzer;
pub mod clone;
pub mod config;
pub mod connection;
pub mod error;
pub mod executor;
pub mod golden;
pub mod ledger;
pub mod migration;
pub mod ordering;
pub mod policy;
pub mod server;
pub mod transfer;

pub use clone::{CloneEngine, CloneResult};
pub use config::{EngineConfig, ProjectConfig, RowFilter, Settings, SourceConfig, ToolPaths};
pub use connection::{
    build_connection_string, generate_database_name, golden_database_name, mask_connection_string,
    parse_connection_string, sanitize_identifier, ConnectionError, ConnectionInfo,
};
pub use error::{EngineError, SyncStep};
pub use executor::{DbError, PgExecutor, SqlExecutor};
pub use golden::{GoldenCopyManager, GoldenStatus, SyncResult};
pub use ledger::SyncMetadata;
pub use migration::{Compatibility, MigrationBaseline, MigrationState};
pub use policy::{SyncDecision, DEFAULT_COOLDOWN};
pub use transfer::CancelToken;
