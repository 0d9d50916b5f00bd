//! Migration compatibility detection
//!
//! Compares a workspace database's applied migrations (the `_prisma_migrations`
//! ledger) with the migration directories of a checkout, or two captured
//! baselines with each other.
//!
//! # Example
//!
//! ```rust,no_run
//! use goldcopy::migration::{compute_state, discover_migrations, Compatibility};
//! use std::path::Path;
//!
//! let on_disk = discover_migrations(Path::new("prisma/migrations"))?;
//! let state = compute_state(&[], &on_disk);
//! if state.compatibility == Compatibility::Forward {
//!     println!("{}", state.recommended_action);
//! }
//! # Ok::<(), goldcopy::migration::MigrationError>(())
//! ```

pub mod baseline;
pub mod checksum;
pub mod error;
pub mod file;
pub mod record;
pub mod status;

pub use baseline::{compare_baselines, MigrationBaseline};
pub use checksum::{calculate_checksum, checksum_bytes};
pub use error::MigrationError;
pub use file::{discover_migrations, uses_migration_convention, MigrationFile, MIGRATION_SCRIPT};
pub use record::{applied_migrations, AppliedMigration, MIGRATIONS_TABLE};
pub use status::{classify, compute_state, detect, recommended_action, Compatibility, MigrationState};
