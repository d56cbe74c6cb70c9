//! # Schemaguard
//!
//! Versioned, all-or-nothing SQL schema migrations for PostgreSQL on the `may`
//! runtime.
//!
//! A database records its schema version; a schema root on disk declares the
//! version it should be at. Schemaguard resolves the SQL files bridging the
//! two, executes them in one transaction and records the new version, or
//! leaves the database untouched. See [`migration`] for the layout and the
//! run protocol.

pub mod config;
pub mod connection;
pub mod executor;
pub mod migration;
pub mod source;
pub mod test_helpers;
pub mod trace;
pub mod transaction;
pub mod version;

pub use config::MigrateConfig;
pub use connection::{connect, validate_connection_string, ConnectionError, PgConnection};
pub use executor::{Connection, DbError, Executor, Row, SqlValue, Transaction};
pub use migration::{
    CancellationToken, MigrationError, Migrator, Phase, Reporter, RunError, RunOutcome,
};
pub use source::{DirEntry, LocalFs, SchemaSource};
pub use transaction::{IsolationLevel, PgTransaction};
pub use version::{Version, VersionParseError, MAX_SEGMENT};
