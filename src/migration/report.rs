//! Structured progress events
//!
//! Every component receives a [`Reporter`] explicitly and emits
//! [`MigrationEvent`]s instead of printing. [`LogReporter`] forwards them to
//! the `log` facade; the CLI renders them in color.

use crate::executor::DbError;
use crate::version::Version;
use std::path::Path;

/// Something observable that happened during a run
#[derive(Debug, Clone, Copy)]
pub enum MigrationEvent<'a> {
    /// The recorded and desired versions were read
    VersionsCompared {
        database: &'a Version,
        schema: &'a Version,
    },
    /// The schema version is not newer than the database version
    UpToDate {
        database: &'a Version,
        schema: &'a Version,
    },
    /// A migration directory is within bounds and contributes files
    MigrationIncluded { path: &'a Path, version: &'a Version },
    /// A migration directory is out of bounds and contributes nothing
    MigrationSkipped { path: &'a Path, version: &'a Version },
    /// A migration directory name is not a version
    InvalidMigrationDirectory { path: &'a Path },
    /// Execution moved on to files of another directory
    EnteringDirectory { path: &'a Path },
    /// A schema file is about to be executed
    ExecutingFile { path: &'a Path },
    /// A schema file failed; `detail` is the database-supplied detail text
    ExecutionFailed {
        path: &'a Path,
        error: &'a DbError,
        detail: Option<&'a str>,
    },
    /// Cancellation was observed
    Canceled,
    /// The transaction was rolled back
    RolledBack,
    /// Rolling back failed; the run error still stands
    RollbackFailed { error: &'a DbError },
    /// The transaction was committed
    Committed,
    /// The new version was written to the database
    VersionRecorded { version: &'a Version },
}

/// Receives progress events
pub trait Reporter {
    fn report(&self, event: &MigrationEvent<'_>);
}

/// [`Reporter`] that writes events to the `log` facade
#[derive(Debug, Clone, Copy, Default)]
pub struct LogReporter;

impl Reporter for LogReporter {
    fn report(&self, event: &MigrationEvent<'_>) {
        match *event {
            MigrationEvent::VersionsCompared { database, schema } => {
                log::info!("Database: v{database} => Schema: v{schema}");
            }
            MigrationEvent::UpToDate { .. } => {
                log::warn!("No migration operation will be performed. Check settings.");
            }
            MigrationEvent::MigrationIncluded { path, version } => {
                log::debug!("Including migration v{version}: {}", path.display());
            }
            MigrationEvent::MigrationSkipped { path, .. } => {
                log::warn!("Skipping migration directory: {}", path.display());
            }
            MigrationEvent::InvalidMigrationDirectory { path } => {
                log::error!("Invalid migration directory: {}", path.display());
            }
            MigrationEvent::EnteringDirectory { path } => {
                log::info!("Running folder: {}", path.display());
            }
            MigrationEvent::ExecutingFile { path } => {
                log::info!("Executing file: {}", path.display());
            }
            MigrationEvent::ExecutionFailed { path, error, detail } => {
                log::error!("Failed executing {}: {error}", path.display());
                if let Some(detail) = detail {
                    log::warn!("DETAILS: {detail}");
                }
            }
            MigrationEvent::Canceled => log::warn!("Migration canceled"),
            MigrationEvent::RolledBack => {
                log::info!("Successfully performed rollback on transaction");
            }
            MigrationEvent::RollbackFailed { error } => {
                log::error!("Unexpected error rolling back transaction: {error}");
            }
            MigrationEvent::Committed => log::debug!("Transaction committed"),
            MigrationEvent::VersionRecorded { version } => {
                log::info!("Updated db_version to {version}");
            }
        }
    }
}

impl<R: Reporter + ?Sized> Reporter for &R {
    fn report(&self, event: &MigrationEvent<'_>) {
        (**self).report(event);
    }
}

impl<R: Reporter + ?Sized> Reporter for std::sync::Arc<R> {
    fn report(&self, event: &MigrationEvent<'_>) {
        (**self).report(event);
    }
}
