//! In-memory backends for tests
//!
//! - [`MemoryDatabase`]: a [`Connection`] with real transaction semantics
//!   (statements become visible on commit and vanish on rollback), installable
//!   version routines, and failure / cancellation injection.
//! - [`MemorySource`]: a [`SchemaSource`] over an in-memory file tree.
//! - [`RecordingReporter`]: a [`Reporter`] that keeps every event as a line of
//!   text.

use crate::executor::{Connection, DbError, Executor, Row, SqlValue, Transaction};
use crate::migration::report::{MigrationEvent, Reporter};
use crate::migration::{CancellationToken, VersionRoutines};
use crate::source::{DirEntry, SchemaSource};
use crate::version::Version;
use std::cell::RefCell;
use std::collections::{BTreeMap, BTreeSet};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

#[derive(Debug, Clone)]
struct Failure {
    needle: String,
    error: DbError,
    close_connection: bool,
}

#[derive(Debug, Default)]
struct DbState {
    read_routine: bool,
    write_routine: bool,
    version: Option<Version>,
    applied: Vec<String>,
    journal: Vec<String>,
    failure: Option<Failure>,
    cancel_on: Option<(String, CancellationToken)>,
    commit_error: Option<DbError>,
    rollback_error: Option<DbError>,
    closed: bool,
}

/// In-memory [`Connection`]
#[derive(Debug, Default)]
pub struct MemoryDatabase {
    routines: VersionRoutines,
    state: RefCell<DbState>,
}

impl MemoryDatabase {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Install both version routines
    #[must_use]
    pub fn with_version_routines(self) -> Self {
        {
            let mut state = self.state.borrow_mut();
            state.read_routine = true;
            state.write_routine = true;
        }
        self
    }

    /// Install only the read routine
    #[must_use]
    pub fn with_read_routine_only(self) -> Self {
        self.state.borrow_mut().read_routine = true;
        self
    }

    /// Seed the recorded version
    #[must_use]
    pub fn with_version(self, version: Version) -> Self {
        self.state.borrow_mut().version = Some(Version { id: Some(1), ..version });
        self
    }

    /// Fail any statement whose text contains `needle`
    #[must_use]
    pub fn fail_on(self, needle: &str, message: &str) -> Self {
        self.fail_on_with(
            needle,
            DbError::Postgres {
                message: message.to_string(),
                code: Some("XX000".to_string()),
                detail: None,
            },
        )
    }

    /// Fail any statement whose text contains `needle` with a specific error
    #[must_use]
    pub fn fail_on_with(self, needle: &str, error: DbError) -> Self {
        self.state.borrow_mut().failure = Some(Failure {
            needle: needle.to_string(),
            error,
            close_connection: false,
        });
        self
    }

    /// Fail the statement containing `needle` and drop the connection
    #[must_use]
    pub fn fail_and_close_on(self, needle: &str) -> Self {
        self.state.borrow_mut().failure = Some(Failure {
            needle: needle.to_string(),
            error: DbError::ConnectionClosed,
            close_connection: true,
        });
        self
    }

    /// Trip `token` while executing the statement containing `needle`
    #[must_use]
    pub fn cancel_on(self, needle: &str, token: CancellationToken) -> Self {
        self.state.borrow_mut().cancel_on = Some((needle.to_string(), token));
        self
    }

    #[must_use]
    pub fn fail_commit(self, message: &str) -> Self {
        self.state.borrow_mut().commit_error = Some(DbError::Other(message.to_string()));
        self
    }

    #[must_use]
    pub fn fail_rollback(self, error: DbError) -> Self {
        self.state.borrow_mut().rollback_error = Some(error);
        self
    }

    /// Statements that reached the database, in commit order
    #[must_use]
    pub fn applied(&self) -> Vec<String> {
        self.state.borrow().applied.clone()
    }

    /// Every statement and transaction command attempted, in order
    #[must_use]
    pub fn journal(&self) -> Vec<String> {
        self.state.borrow().journal.clone()
    }

    #[must_use]
    pub fn recorded_version(&self) -> Option<Version> {
        self.state.borrow().version.clone()
    }

    fn check(&self, sql: &str) -> Result<(), DbError> {
        let mut state = self.state.borrow_mut();
        state.journal.push(sql.to_string());
        if state.closed {
            return Err(DbError::ConnectionClosed);
        }
        if let Some((needle, token)) = &state.cancel_on {
            if sql.contains(needle.as_str()) {
                token.cancel();
            }
        }
        if let Some(failure) = state.failure.clone() {
            if sql.contains(&failure.needle) {
                if failure.close_connection {
                    state.closed = true;
                }
                return Err(failure.error);
            }
        }
        Ok(())
    }

    fn routine_installed(&self, signature: &str) -> Result<bool, DbError> {
        let state = self.state.borrow();
        if state.closed {
            return Err(DbError::ConnectionClosed);
        }
        Ok((signature == self.routines.read_signature && state.read_routine)
            || (signature == self.routines.write_signature && state.write_routine))
    }

    fn next_version(&self, current: Option<&Version>, params: &[SqlValue]) -> Result<Version, DbError> {
        let segment = |idx: usize| match params.get(idx) {
            Some(SqlValue::Int(v)) => u32::try_from(*v)
                .map_err(|_| DbError::Other(format!("negative segment {v}"))),
            other => Err(DbError::Other(format!("bad parameter {idx}: {other:?}"))),
        };
        let mut next = Version::new(segment(0)?, segment(1)?, segment(2)?);
        next.id = Some(current.and_then(|v| v.id).unwrap_or(0) + 1);
        Ok(next)
    }

    fn version_row(version: &Version) -> Row {
        let int = |v: u32| SqlValue::BigInt(i64::from(v));
        Row::new(vec![
            version.id.map_or(SqlValue::Null, SqlValue::Int),
            int(version.major),
            int(version.minor),
            int(version.patch),
            version.started_at.map_or(SqlValue::Null, SqlValue::Timestamp),
            version.finished_at.map_or(SqlValue::Null, SqlValue::Timestamp),
        ])
    }

    fn read_version(&self, query: &str, pending: Option<&Version>) -> Result<Option<Row>, DbError> {
        self.check(query)?;
        if query != self.routines.read_query {
            return Ok(None);
        }
        if !self.state.borrow().read_routine {
            return Err(DbError::Postgres {
                message: "function get_db_version() does not exist".to_string(),
                code: Some("42883".to_string()),
                detail: None,
            });
        }
        let state = self.state.borrow();
        Ok(pending.or(state.version.as_ref()).map(Self::version_row))
    }

    fn call_write(&self, query: &str, params: &[SqlValue]) -> Result<Option<Version>, DbError> {
        self.check(query)?;
        if query != self.routines.write_call {
            return Ok(None);
        }
        if !self.state.borrow().write_routine {
            return Err(DbError::Postgres {
                message: "function db.update_db_version does not exist".to_string(),
                code: Some("42883".to_string()),
                detail: None,
            });
        }
        let current = self.state.borrow().version.clone();
        self.next_version(current.as_ref(), params).map(Some)
    }
}

impl Executor for MemoryDatabase {
    fn execute(&self, query: &str, params: &[SqlValue]) -> Result<u64, DbError> {
        match self.call_write(query, params)? {
            Some(version) => self.state.borrow_mut().version = Some(version),
            None => self.state.borrow_mut().applied.push(query.to_string()),
        }
        Ok(1)
    }

    fn batch_execute(&self, sql: &str) -> Result<(), DbError> {
        self.check(sql)?;
        self.state.borrow_mut().applied.push(sql.to_string());
        Ok(())
    }

    fn query_opt(&self, query: &str, _params: &[SqlValue]) -> Result<Option<Row>, DbError> {
        self.read_version(query, None)
    }

    fn routine_exists(&self, signature: &str) -> Result<bool, DbError> {
        self.routine_installed(signature)
    }
}

impl Connection for MemoryDatabase {
    fn begin(&self) -> Result<Box<dyn Transaction + '_>, DbError> {
        self.check("BEGIN")?;
        Ok(Box::new(MemoryTransaction {
            db: self,
            statements: RefCell::new(Vec::new()),
            version: RefCell::new(None),
        }))
    }
}

/// Transaction over a [`MemoryDatabase`]; buffers until commit
struct MemoryTransaction<'a> {
    db: &'a MemoryDatabase,
    statements: RefCell<Vec<String>>,
    version: RefCell<Option<Version>>,
}

impl Executor for MemoryTransaction<'_> {
    fn execute(&self, query: &str, params: &[SqlValue]) -> Result<u64, DbError> {
        match self.db.call_write(query, params)? {
            Some(version) => *self.version.borrow_mut() = Some(version),
            None => self.statements.borrow_mut().push(query.to_string()),
        }
        Ok(1)
    }

    fn batch_execute(&self, sql: &str) -> Result<(), DbError> {
        self.db.check(sql)?;
        self.statements.borrow_mut().push(sql.to_string());
        Ok(())
    }

    fn query_opt(&self, query: &str, _params: &[SqlValue]) -> Result<Option<Row>, DbError> {
        let pending = self.version.borrow().clone();
        self.db.read_version(query, pending.as_ref())
    }

    fn routine_exists(&self, signature: &str) -> Result<bool, DbError> {
        self.db.routine_installed(signature)
    }
}

impl Transaction for MemoryTransaction<'_> {
    fn commit(self: Box<Self>) -> Result<(), DbError> {
        self.db.check("COMMIT")?;
        let mut state = self.db.state.borrow_mut();
        if let Some(error) = state.commit_error.clone() {
            return Err(error);
        }
        state.applied.extend(self.statements.into_inner());
        if let Some(version) = self.version.into_inner() {
            state.version = Some(version);
        }
        Ok(())
    }

    fn rollback(self: Box<Self>) -> Result<(), DbError> {
        let mut state = self.db.state.borrow_mut();
        state.journal.push("ROLLBACK".to_string());
        if state.closed {
            return Err(DbError::TransactionClosed);
        }
        match state.rollback_error.clone() {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }

    fn is_connection_closed(&self) -> bool {
        self.db.state.borrow().closed
    }
}

/// In-memory [`SchemaSource`]
#[derive(Debug, Clone, Default)]
pub struct MemorySource {
    files: BTreeMap<PathBuf, String>,
    dirs: BTreeSet<PathBuf>,
}

impl MemorySource {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a file, creating its parent directories
    #[must_use]
    pub fn with_file(mut self, path: impl AsRef<Path>, contents: &str) -> Self {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            self.add_dirs(parent);
        }
        self.files.insert(path.to_path_buf(), contents.to_string());
        self
    }

    /// Add an empty directory and its parents
    #[must_use]
    pub fn with_dir(mut self, path: impl AsRef<Path>) -> Self {
        self.add_dirs(path.as_ref());
        self
    }

    fn add_dirs(&mut self, path: &Path) {
        for ancestor in path.ancestors() {
            if ancestor.as_os_str().is_empty() {
                continue;
            }
            self.dirs.insert(ancestor.to_path_buf());
        }
    }
}

impl SchemaSource for MemorySource {
    fn read_to_string(&self, path: &Path) -> io::Result<String> {
        self.files.get(path).cloned().ok_or_else(|| {
            io::Error::new(io::ErrorKind::NotFound, format!("{} not found", path.display()))
        })
    }

    fn list_dir(&self, path: &Path) -> io::Result<Vec<DirEntry>> {
        if !self.dirs.contains(path) {
            return Err(io::Error::new(
                io::ErrorKind::NotFound,
                format!("{} not found", path.display()),
            ));
        }

        let name_of = |child: &Path| {
            child
                .file_name()
                .map(|name| name.to_string_lossy().into_owned())
        };
        let mut entries: BTreeMap<String, bool> = BTreeMap::new();
        for dir in self.dirs.iter().filter(|d| d.parent() == Some(path)) {
            if let Some(name) = name_of(dir) {
                entries.insert(name, true);
            }
        }
        for file in self.files.keys().filter(|f| f.parent() == Some(path)) {
            if let Some(name) = name_of(file) {
                entries.insert(name, false);
            }
        }

        Ok(entries
            .into_iter()
            .map(|(name, is_dir)| DirEntry { name, is_dir })
            .collect())
    }
}

/// [`Reporter`] that records events as text lines
///
/// Lines look like `executing_file /s/ddl/a.sql` or `migration_skipped 1.0.0`.
#[derive(Debug, Default)]
pub struct RecordingReporter {
    lines: Mutex<Vec<String>>,
}

impl RecordingReporter {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn lines(&self) -> Vec<String> {
        self.lines.lock().map(|lines| lines.to_vec()).unwrap_or_default()
    }

    #[must_use]
    pub fn contains(&self, line: &str) -> bool {
        self.lines().iter().any(|l| l == line)
    }
}

impl Reporter for RecordingReporter {
    fn report(&self, event: &MigrationEvent<'_>) {
        let line = match *event {
            MigrationEvent::VersionsCompared { database, schema } => {
                format!("versions {database} {schema}")
            }
            MigrationEvent::UpToDate { database, schema } => {
                format!("up_to_date {database} {schema}")
            }
            MigrationEvent::MigrationIncluded { version, .. } => {
                format!("migration_included {version}")
            }
            MigrationEvent::MigrationSkipped { version, .. } => {
                format!("migration_skipped {version}")
            }
            MigrationEvent::InvalidMigrationDirectory { path } => {
                format!("invalid_migration_directory {}", path.display())
            }
            MigrationEvent::EnteringDirectory { path } => {
                format!("entering_directory {}", path.display())
            }
            MigrationEvent::ExecutingFile { path } => {
                format!("executing_file {}", path.display())
            }
            MigrationEvent::ExecutionFailed { path, detail, .. } => match detail {
                Some(detail) => format!("execution_failed {} ({detail})", path.display()),
                None => format!("execution_failed {}", path.display()),
            },
            MigrationEvent::Canceled => "canceled".to_string(),
            MigrationEvent::RolledBack => "rolled_back".to_string(),
            MigrationEvent::RollbackFailed { error } => format!("rollback_failed {error}"),
            MigrationEvent::Committed => "committed".to_string(),
            MigrationEvent::VersionRecorded { version } => format!("version_recorded {version}"),
        };
        if let Ok(mut lines) = self.lines.lock() {
            lines.push(line);
        }
    }
}
