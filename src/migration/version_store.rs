//! Recorded database version
//!
//! The schema itself owns version bookkeeping: a read routine returning the
//! current version row and an update routine recording a new one. Both may be
//! missing on a fresh database, so every operation first negotiates the
//! capability with [`Executor::routine_exists`]:
//!
//! - read routine absent → the database was never migrated, version `0.0.0`
//! - update routine absent → fatal, the schema cannot record versions

use crate::executor::{DbError, Executor, Row, SqlValue};
use crate::migration::MigrationError;
use crate::version::Version;
use serde::Deserialize;

/// Names and calls of the version routines
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct VersionRoutines {
    /// Signature probed before reading, in `to_regprocedure` form
    pub read_signature: String,
    /// Query returning `id, major, minor, patch, started_at, finished_at`
    pub read_query: String,
    /// Signature probed before writing, in `to_regprocedure` form
    pub write_signature: String,
    /// Statement taking `$1, $2, $3` as major, minor, patch
    pub write_call: String,
}

impl Default for VersionRoutines {
    fn default() -> Self {
        Self {
            read_signature: "get_db_version()".to_string(),
            read_query: "SELECT id, major, minor, patch, started_at, finished_at FROM get_db_version()"
                .to_string(),
            write_signature: "db.update_db_version(integer,integer,integer,timestamp,timestamp)"
                .to_string(),
            write_call: "SELECT db.update_db_version($1,$2,$3)".to_string(),
        }
    }
}

/// Result of probing the read routine
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VersionProbe {
    /// The read routine is not installed
    Absent,
    /// The routine exists but returned no row
    Empty,
    /// The routine returned a version
    Present(Version),
}

impl VersionProbe {
    /// The version this probe stands for; absent and empty mean `0.0.0`
    #[must_use]
    pub fn into_version(self) -> Version {
        match self {
            VersionProbe::Present(version) => version,
            VersionProbe::Absent | VersionProbe::Empty => Version::default(),
        }
    }
}

/// Reads and writes the version recorded in the database
#[derive(Debug, Clone, Default)]
pub struct VersionStore {
    routines: VersionRoutines,
}

impl VersionStore {
    #[must_use]
    pub fn new(routines: VersionRoutines) -> Self {
        Self { routines }
    }

    #[must_use]
    pub fn routines(&self) -> &VersionRoutines {
        &self.routines
    }

    /// Negotiate the read capability and fetch the recorded version
    ///
    /// # Errors
    ///
    /// Returns `DbError` if the probe or the query fails, or the row cannot be
    /// decoded.
    pub fn probe<E: Executor + ?Sized>(&self, executor: &E) -> Result<VersionProbe, DbError> {
        if !executor.routine_exists(&self.routines.read_signature)? {
            return Ok(VersionProbe::Absent);
        }

        match executor.query_opt(&self.routines.read_query, &[])? {
            Some(row) => decode_version(&row).map(VersionProbe::Present),
            None => Ok(VersionProbe::Empty),
        }
    }

    /// Read the recorded version, `0.0.0` if never migrated
    ///
    /// # Errors
    ///
    /// Returns `MigrationError::Database` for any failure other than the read
    /// routine being absent or returning no row.
    pub fn read_current<E: Executor + ?Sized>(
        &self,
        executor: &E,
    ) -> Result<Version, MigrationError> {
        Ok(self.probe(executor)?.into_version())
    }

    /// Record `version` as the database version
    ///
    /// # Errors
    ///
    /// Returns `MigrationError::PersistenceNotConfigured` if the update routine
    /// is not installed, and `MigrationError::Database` if calling it fails.
    pub fn write_new<E: Executor + ?Sized>(
        &self,
        executor: &E,
        version: &Version,
    ) -> Result<(), MigrationError> {
        if !executor.routine_exists(&self.routines.write_signature)? {
            return Err(MigrationError::PersistenceNotConfigured(format!(
                "routine {} does not exist",
                self.routines.write_signature
            )));
        }

        let params = [
            to_int(version.major)?,
            to_int(version.minor)?,
            to_int(version.patch)?,
        ];
        executor.execute(&self.routines.write_call, &params)?;
        Ok(())
    }
}

fn to_int(segment: u32) -> Result<SqlValue, DbError> {
    i32::try_from(segment)
        .map(SqlValue::Int)
        .map_err(|_| DbError::Decode(format!("version segment {segment} does not fit in INTEGER")))
}

fn to_segment(row: &Row, idx: usize) -> Result<u32, DbError> {
    let value = row.get_i32(idx)?;
    u32::try_from(value)
        .map_err(|_| DbError::Decode(format!("column {idx}: negative version segment {value}")))
}

fn decode_version(row: &Row) -> Result<Version, DbError> {
    Ok(Version {
        id: row.get_opt_i32(0)?,
        major: to_segment(row, 1)?,
        minor: to_segment(row, 2)?,
        patch: to_segment(row, 3)?,
        started_at: row.get_opt_timestamp(4)?,
        finished_at: row.get_opt_timestamp(5)?,
    })
}
