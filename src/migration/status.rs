//! Migration status and outcomes

use crate::version::Version;
use std::path::PathBuf;

/// How a successful run ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunOutcome {
    /// The schema version is not newer than the database version; nothing ran
    UpToDate { database: Version, schema: Version },
    /// Files were applied and the version recorded
    Applied {
        from: Version,
        to: Version,
        files: Vec<PathBuf>,
    },
}

impl RunOutcome {
    #[must_use]
    pub fn is_up_to_date(&self) -> bool {
        matches!(self, RunOutcome::UpToDate { .. })
    }

    /// Number of files executed
    #[must_use]
    pub fn applied_count(&self) -> usize {
        match self {
            RunOutcome::UpToDate { .. } => 0,
            RunOutcome::Applied { files, .. } => files.len(),
        }
    }
}

/// Recorded and desired versions of a database
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MigrationStatus {
    /// Version recorded in the database, `0.0.0` if never migrated
    pub database: Version,

    /// Version in the schema descriptor file
    pub schema: Version,

    /// Whether a run would apply anything
    pub pending: bool,
}

impl MigrationStatus {
    #[must_use]
    pub fn new(database: Version, schema: Version) -> Self {
        let pending = schema.greater_than(&database);
        Self {
            database,
            schema,
            pending,
        }
    }

    #[must_use]
    pub fn is_up_to_date(&self) -> bool {
        !self.pending
    }
}

/// What a run would do, without doing it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MigrationPlan {
    pub status: MigrationStatus,

    /// Files a run would execute, in order; empty when up to date
    pub files: Vec<PathBuf>,
}
