//! Transactional apply
//!
//! One run owns one transaction. Every resolved file is read and executed as a
//! single batch; the first failure stops the sequence and the transaction is
//! rolled back. [`TransactionGuard`] guarantees the transaction reaches a
//! terminal state on every exit path, including panics.

use crate::executor::{Connection, DbError, Executor, Transaction};
use crate::migration::error::{PhaseContext, RunError};
use crate::migration::report::{MigrationEvent, Reporter};
use crate::migration::{CancellationToken, MigrationError, Phase};
use crate::source::SchemaSource;
use std::path::{Path, PathBuf};

#[cfg(feature = "tracing")]
use crate::trace::tracing_helpers;

/// How a rollback attempt ended
#[derive(Debug)]
pub enum RollbackOutcome {
    RolledBack,
    /// The driver had already closed the connection, nothing to roll back
    AlreadyClosed,
    Failed(DbError),
}

/// Owns an open transaction until it is committed or rolled back
///
/// Dropping the guard without calling [`commit`](Self::commit) rolls back.
pub struct TransactionGuard<'a> {
    tx: Option<Box<dyn Transaction + 'a>>,
}

impl<'a> TransactionGuard<'a> {
    /// Begin a transaction on `conn`
    ///
    /// # Errors
    ///
    /// Returns `DbError` if the database refuses to begin.
    pub fn begin<C: Connection + ?Sized>(conn: &'a C) -> Result<Self, DbError> {
        Ok(Self {
            tx: Some(conn.begin()?),
        })
    }

    /// The open transaction
    ///
    /// # Errors
    ///
    /// Returns `DbError::TransactionClosed` once the guard has been finished.
    pub fn transaction(&self) -> Result<&(dyn Transaction + 'a), DbError> {
        self.tx.as_deref().ok_or(DbError::TransactionClosed)
    }

    /// Commit the transaction
    ///
    /// # Errors
    ///
    /// Returns the commit error; the transaction is gone either way.
    pub fn commit(mut self) -> Result<(), DbError> {
        let tx = self.tx.take().ok_or(DbError::TransactionClosed)?;
        tx.commit()
    }

    /// Roll the transaction back, checking first whether the connection is
    /// still there to roll back on
    pub fn rollback(mut self) -> RollbackOutcome {
        self.finish_rollback()
    }

    fn finish_rollback(&mut self) -> RollbackOutcome {
        let Some(tx) = self.tx.take() else {
            return RollbackOutcome::AlreadyClosed;
        };
        if tx.is_connection_closed() {
            return RollbackOutcome::AlreadyClosed;
        }
        match tx.rollback() {
            Ok(()) => RollbackOutcome::RolledBack,
            Err(DbError::TransactionClosed | DbError::ConnectionClosed) => {
                RollbackOutcome::AlreadyClosed
            }
            Err(e) => RollbackOutcome::Failed(e),
        }
    }
}

impl Drop for TransactionGuard<'_> {
    fn drop(&mut self) {
        if let RollbackOutcome::Failed(e) = self.finish_rollback() {
            log::error!("Unexpected error rolling back abandoned transaction: {e}");
        }
    }
}

/// Execute `files` in order against `executor`
///
/// Cancellation is checked before each file. A directory-change event is
/// emitted whenever the parent directory differs from the previous file's.
///
/// # Errors
///
/// Returns `MigrationError::Canceled`, `MigrationError::Io` if a file cannot
/// be read, or `MigrationError::Execution` naming the first file that failed.
pub fn apply<E: Executor + ?Sized>(
    executor: &E,
    source: &dyn SchemaSource,
    files: &[PathBuf],
    reporter: &dyn Reporter,
    cancel: &CancellationToken,
) -> Result<(), MigrationError> {
    let mut folder: Option<&Path> = None;

    for file in files {
        if cancel.is_canceled() {
            reporter.report(&MigrationEvent::Canceled);
            return Err(MigrationError::Canceled);
        }

        let parent = file.parent();
        if parent != folder {
            if let Some(path) = parent {
                reporter.report(&MigrationEvent::EnteringDirectory { path });
            }
            folder = parent;
        }

        reporter.report(&MigrationEvent::ExecutingFile { path: file });
        let sql = source
            .read_to_string(file)
            .map_err(|e| MigrationError::io(file, e))?;

        #[cfg(feature = "tracing")]
        let _span = tracing_helpers::apply_file_span(file).entered();

        if let Err(error) = executor.batch_execute(&sql) {
            reporter.report(&MigrationEvent::ExecutionFailed {
                path: file,
                error: &error,
                detail: error.detail(),
            });
            return Err(MigrationError::Execution {
                file: file.clone(),
                source: error,
            });
        }
    }

    Ok(())
}

/// [`apply`] inside one transaction, then commit
///
/// # Errors
///
/// See [`run_with`].
pub fn run<C: Connection + ?Sized>(
    conn: &C,
    source: &dyn SchemaSource,
    files: &[PathBuf],
    reporter: &dyn Reporter,
    cancel: &CancellationToken,
) -> Result<(), RunError> {
    run_with(conn, source, files, reporter, cancel, |_| Ok(()))
}

/// [`apply`] inside one transaction, run `before_commit` on the same
/// transaction, then commit
///
/// On any failure the transaction is rolled back and the first error is
/// returned. A failing rollback is reported but never replaces that error.
///
/// # Arguments
///
/// * `conn` - Connection to open the transaction on
/// * `source` - Where file contents are read from
/// * `files` - Resolved files, in execution order
/// * `reporter` - Receives progress events
/// * `cancel` - Polled before each file and before commit
/// * `before_commit` - Last step inside the transaction, e.g. recording the
///   new version
///
/// # Errors
///
/// Returns a `RunError` in the `Execute` phase for begin, file, cancellation
/// and commit failures; errors from `before_commit` are returned as is.
pub fn run_with<C, F>(
    conn: &C,
    source: &dyn SchemaSource,
    files: &[PathBuf],
    reporter: &dyn Reporter,
    cancel: &CancellationToken,
    before_commit: F,
) -> Result<(), RunError>
where
    C: Connection + ?Sized,
    F: FnOnce(&dyn Transaction) -> Result<(), RunError>,
{
    let guard = TransactionGuard::begin(conn).phase(Phase::Execute)?;

    let result = guard
        .transaction()
        .map_err(MigrationError::from)
        .and_then(|tx| apply(tx, source, files, reporter, cancel))
        .phase(Phase::Execute)
        .and_then(|()| before_commit(guard.transaction().phase(Phase::Execute)?))
        .and_then(|()| {
            if cancel.is_canceled() {
                reporter.report(&MigrationEvent::Canceled);
                return Err(RunError::new(Phase::Execute, MigrationError::Canceled));
            }
            Ok(())
        });

    match result {
        Ok(()) => {
            guard.commit().phase(Phase::Execute)?;
            reporter.report(&MigrationEvent::Committed);
            Ok(())
        }
        Err(err) => {
            match guard.rollback() {
                RollbackOutcome::RolledBack => reporter.report(&MigrationEvent::RolledBack),
                RollbackOutcome::AlreadyClosed => {
                    log::debug!("Transaction already closed by the driver, skipping rollback");
                }
                RollbackOutcome::Failed(error) => {
                    reporter.report(&MigrationEvent::RollbackFailed { error: &error });
                }
            }
            Err(err)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_helpers::{MemoryDatabase, MemorySource, RecordingReporter};

    fn three_files() -> (MemorySource, Vec<PathBuf>) {
        let source = MemorySource::new()
            .with_file("/s/ddl/a.sql", "CREATE TABLE a();")
            .with_file("/s/ddl/b.sql", "CREATE TABLE b();")
            .with_file("/s/dml/c.sql", "INSERT INTO a DEFAULT VALUES;");
        let files = vec![
            PathBuf::from("/s/ddl/a.sql"),
            PathBuf::from("/s/ddl/b.sql"),
            PathBuf::from("/s/dml/c.sql"),
        ];
        (source, files)
    }

    #[test]
    fn test_run_commits_all_files_in_order() {
        let db = MemoryDatabase::new();
        let (source, files) = three_files();
        let reporter = RecordingReporter::new();

        run(&db, &source, &files, &reporter, &CancellationToken::new()).unwrap();

        assert_eq!(
            db.applied(),
            vec![
                "CREATE TABLE a();",
                "CREATE TABLE b();",
                "INSERT INTO a DEFAULT VALUES;"
            ]
        );
        assert!(reporter.contains("committed"));
    }

    #[test]
    fn test_directory_changes_are_reported_once_per_folder() {
        let db = MemoryDatabase::new();
        let (source, files) = three_files();
        let reporter = RecordingReporter::new();

        run(&db, &source, &files, &reporter, &CancellationToken::new()).unwrap();

        let folders: Vec<_> = reporter
            .lines()
            .into_iter()
            .filter(|l| l.starts_with("entering_directory"))
            .collect();
        assert_eq!(
            folders,
            vec!["entering_directory /s/ddl", "entering_directory /s/dml"]
        );
    }

    #[test]
    fn test_failure_rolls_back_and_stops() {
        let db = MemoryDatabase::new().fail_on("CREATE TABLE b", "relation \"b\" already exists");
        let (source, files) = three_files();
        let reporter = RecordingReporter::new();

        let err = run(&db, &source, &files, &reporter, &CancellationToken::new()).unwrap_err();

        assert_eq!(err.phase, Phase::Execute);
        match &err.source {
            MigrationError::Execution { file, .. } => {
                assert_eq!(file, &PathBuf::from("/s/ddl/b.sql"));
            }
            other => panic!("expected execution error, got {other:?}"),
        }
        assert!(db.applied().is_empty());
        assert!(!db.journal().iter().any(|s| s.starts_with("INSERT")));
        assert!(reporter.contains("rolled_back"));
    }

    #[test]
    fn test_failure_detail_is_reported() {
        let db = MemoryDatabase::new().fail_on_with(
            "INSERT",
            DbError::Postgres {
                message: "insert violates foreign key".to_string(),
                code: Some("23503".to_string()),
                detail: Some("Key (id)=(1) is not present.".to_string()),
            },
        );
        let (source, files) = three_files();
        let reporter = RecordingReporter::new();

        let err = run(&db, &source, &files, &reporter, &CancellationToken::new()).unwrap_err();

        assert_eq!(err.source.detail(), Some("Key (id)=(1) is not present."));
        assert!(reporter.contains("execution_failed /s/dml/c.sql (Key (id)=(1) is not present.)"));
    }

    #[test]
    fn test_missing_file_is_io_error() {
        let db = MemoryDatabase::new();
        let (source, mut files) = three_files();
        files.insert(1, PathBuf::from("/s/ddl/missing.sql"));

        let err = run(&db, &source, &files, &RecordingReporter::new(), &CancellationToken::new())
            .unwrap_err();

        assert!(matches!(err.source, MigrationError::Io { .. }));
        assert!(db.applied().is_empty());
    }

    #[test]
    fn test_cancellation_before_start_executes_nothing() {
        let db = MemoryDatabase::new();
        let (source, files) = three_files();
        let cancel = CancellationToken::new();
        cancel.cancel();

        let err = run(&db, &source, &files, &RecordingReporter::new(), &cancel).unwrap_err();

        assert!(err.is_canceled());
        assert_eq!(db.journal(), vec!["BEGIN", "ROLLBACK"]);
    }

    #[test]
    fn test_cancellation_mid_run_rolls_back() {
        let cancel = CancellationToken::new();
        let db = MemoryDatabase::new().cancel_on("CREATE TABLE b", cancel.clone());
        let (source, files) = three_files();
        let reporter = RecordingReporter::new();

        let err = run(&db, &source, &files, &reporter, &cancel).unwrap_err();

        assert!(err.is_canceled());
        assert!(db.applied().is_empty());
        assert!(!db.journal().iter().any(|s| s.starts_with("INSERT")));
        assert!(reporter.contains("canceled"));
        assert!(reporter.contains("rolled_back"));
    }

    #[test]
    fn test_rollback_failure_keeps_primary_error() {
        let db = MemoryDatabase::new()
            .fail_on("CREATE TABLE a", "syntax error")
            .fail_rollback(DbError::Other("network unreachable".to_string()));
        let (source, files) = three_files();
        let reporter = RecordingReporter::new();

        let err = run(&db, &source, &files, &reporter, &CancellationToken::new()).unwrap_err();

        assert!(matches!(err.source, MigrationError::Execution { .. }));
        assert!(reporter.contains("rollback_failed Execution error: network unreachable"));
    }

    #[test]
    fn test_closed_connection_skips_rollback() {
        let db = MemoryDatabase::new().fail_and_close_on("CREATE TABLE b");
        let (source, files) = three_files();
        let reporter = RecordingReporter::new();

        let err = run(&db, &source, &files, &reporter, &CancellationToken::new()).unwrap_err();

        assert!(matches!(
            err.source,
            MigrationError::Execution {
                source: DbError::ConnectionClosed,
                ..
            }
        ));
        assert!(!reporter.lines().iter().any(|l| l.starts_with("rollback_failed")));
        assert!(!db.journal().contains(&"ROLLBACK".to_string()));
    }

    #[test]
    fn test_commit_failure_is_terminal() {
        let db = MemoryDatabase::new().fail_commit("could not serialize access");
        let (source, files) = three_files();

        let err = run(&db, &source, &files, &RecordingReporter::new(), &CancellationToken::new())
            .unwrap_err();

        assert_eq!(err.phase, Phase::Execute);
        assert!(matches!(err.source, MigrationError::Database(DbError::Other(_))));
        assert!(db.applied().is_empty());
    }

    #[test]
    fn test_before_commit_runs_in_the_same_transaction() {
        let db = MemoryDatabase::new();
        let (source, files) = three_files();

        let err = run_with(
            &db,
            &source,
            &files,
            &RecordingReporter::new(),
            &CancellationToken::new(),
            |tx| {
                tx.batch_execute("-- marker").phase(Phase::PersistVersion)?;
                Err(RunError::new(
                    Phase::PersistVersion,
                    MigrationError::PersistenceNotConfigured("missing".to_string()),
                ))
            },
        )
        .unwrap_err();

        assert_eq!(err.phase, Phase::PersistVersion);
        assert!(db.applied().is_empty());
    }

    #[test]
    fn test_dropped_guard_rolls_back() {
        let db = MemoryDatabase::new();
        {
            let guard = TransactionGuard::begin(&db).unwrap();
            guard.transaction().unwrap().batch_execute("CREATE TABLE t();").unwrap();
        }
        assert!(db.applied().is_empty());
        assert_eq!(db.journal().last().map(String::as_str), Some("ROLLBACK"));
    }
}
