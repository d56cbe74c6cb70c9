//! Migration-specific error types

use crate::executor::DbError;
use crate::version::VersionParseError;
use std::fmt;
use std::io;
use std::path::PathBuf;

/// Migration-specific errors
#[derive(Debug)]
pub enum MigrationError {
    /// Malformed version string
    Parse(VersionParseError),
    /// Migration directory whose name is not a version
    InvalidMigrationDirectory {
        path: PathBuf,
        source: VersionParseError,
    },
    /// Missing or unreadable file or directory
    Io { path: PathBuf, source: io::Error },
    /// Query, connection or transaction failure
    Database(DbError),
    /// A schema file failed to execute
    Execution { file: PathBuf, source: DbError },
    /// The version update routine is not installed
    PersistenceNotConfigured(String),
    /// The run was canceled by the caller
    Canceled,
}

impl MigrationError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: io::Error) -> Self {
        MigrationError::Io {
            path: path.into(),
            source,
        }
    }

    /// Database-supplied detail text for the failure, if any
    #[must_use]
    pub fn detail(&self) -> Option<&str> {
        match self {
            MigrationError::Database(e) | MigrationError::Execution { source: e, .. } => e.detail(),
            _ => None,
        }
    }
}

impl fmt::Display for MigrationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MigrationError::Parse(e) => write!(f, "{e}"),
            MigrationError::InvalidMigrationDirectory { path, source } => {
                write!(f, "Invalid migration directory {}: {source}", path.display())
            }
            MigrationError::Io { path, source } => write!(f, "{}: {source}", path.display()),
            MigrationError::Database(e) => write!(f, "Database error: {e}"),
            MigrationError::Execution { file, source } => {
                write!(f, "Executing file {} failed: {source}", file.display())
            }
            MigrationError::PersistenceNotConfigured(msg) => {
                write!(f, "Cannot update on db_version: {msg}")
            }
            MigrationError::Canceled => write!(f, "Migration canceled"),
        }
    }
}

impl std::error::Error for MigrationError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            MigrationError::Parse(e) | MigrationError::InvalidMigrationDirectory { source: e, .. } => {
                Some(e)
            }
            MigrationError::Io { source, .. } => Some(source),
            MigrationError::Database(e) | MigrationError::Execution { source: e, .. } => Some(e),
            MigrationError::PersistenceNotConfigured(_) | MigrationError::Canceled => None,
        }
    }
}

impl From<DbError> for MigrationError {
    fn from(error: DbError) -> Self {
        MigrationError::Database(error)
    }
}

impl From<VersionParseError> for MigrationError {
    fn from(error: VersionParseError) -> Self {
        MigrationError::Parse(error)
    }
}

/// Step of a run that produced an error
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    ReadDatabaseVersion,
    ReadSchemaVersion,
    ResolveFiles,
    Execute,
    PersistVersion,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Phase::ReadDatabaseVersion => "reading db version",
            Phase::ReadSchemaVersion => "reading schema version",
            Phase::ResolveFiles => "getting sql files from path",
            Phase::Execute => "executing migration",
            Phase::PersistVersion => "updating db_version",
        };
        f.write_str(label)
    }
}

/// A failed run: the phase it failed in and why
#[derive(Debug)]
pub struct RunError {
    pub phase: Phase,
    pub source: MigrationError,
}

impl RunError {
    #[must_use]
    pub fn new(phase: Phase, source: MigrationError) -> Self {
        Self { phase, source }
    }

    /// Whether the run stopped because it was canceled rather than failed
    #[must_use]
    pub fn is_canceled(&self) -> bool {
        matches!(self.source, MigrationError::Canceled)
    }
}

impl fmt::Display for RunError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Error {}: {}", self.phase, self.source)
    }
}

impl std::error::Error for RunError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.source)
    }
}

/// Attach a phase label to a phase's result
pub(crate) trait PhaseContext<T> {
    fn phase(self, phase: Phase) -> Result<T, RunError>;
}

impl<T, E: Into<MigrationError>> PhaseContext<T> for Result<T, E> {
    fn phase(self, phase: Phase) -> Result<T, RunError> {
        self.map_err(|e| RunError::new(phase, e.into()))
    }
}
