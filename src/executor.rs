//! Database capability consumed by the migration engine
//!
//! The engine never talks to a driver directly. It executes statements,
//! queries single rows and opens transactions through the traits in this
//! module. [`crate::connection::PgConnection`] implements them over
//! `may_postgres`; [`crate::test_helpers::MemoryDatabase`] implements them in
//! memory for tests.

use chrono::NaiveDateTime;
use std::fmt;

/// A bound parameter or a decoded column value
#[derive(Debug, Clone, PartialEq)]
pub enum SqlValue {
    Null,
    Bool(bool),
    Int(i32),
    BigInt(i64),
    Text(String),
    Timestamp(NaiveDateTime),
}

/// A single result row, decoded from the driver's representation
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Row {
    values: Vec<SqlValue>,
}

impl Row {
    #[must_use]
    pub fn new(values: Vec<SqlValue>) -> Self {
        Self { values }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.values.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Raw access to a column value
    ///
    /// # Errors
    ///
    /// Returns `DbError::Decode` if `idx` is out of range.
    pub fn value(&self, idx: usize) -> Result<&SqlValue, DbError> {
        self.values.get(idx).ok_or_else(|| {
            DbError::Decode(format!(
                "column index {idx} out of range for row with {} columns",
                self.values.len()
            ))
        })
    }

    /// Read a nullable integer column
    ///
    /// `SMALLINT`, `INTEGER` and in-range `BIGINT` values are accepted.
    ///
    /// # Errors
    ///
    /// Returns `DbError::Decode` if the column has another type or overflows.
    pub fn get_opt_i32(&self, idx: usize) -> Result<Option<i32>, DbError> {
        match self.value(idx)? {
            SqlValue::Null => Ok(None),
            SqlValue::Int(v) => Ok(Some(*v)),
            SqlValue::BigInt(v) => i32::try_from(*v)
                .map(Some)
                .map_err(|_| DbError::Decode(format!("column {idx}: {v} does not fit in INTEGER"))),
            other => Err(DbError::Decode(format!("column {idx}: expected integer, got {other:?}"))),
        }
    }

    /// Read a non-null integer column
    ///
    /// # Errors
    ///
    /// Returns `DbError::Decode` on NULL, type mismatch or overflow.
    pub fn get_i32(&self, idx: usize) -> Result<i32, DbError> {
        self.get_opt_i32(idx)?
            .ok_or_else(|| DbError::Decode(format!("column {idx}: unexpected NULL")))
    }

    /// Read a non-null boolean column
    ///
    /// # Errors
    ///
    /// Returns `DbError::Decode` on NULL or type mismatch.
    pub fn get_bool(&self, idx: usize) -> Result<bool, DbError> {
        match self.value(idx)? {
            SqlValue::Bool(v) => Ok(*v),
            other => Err(DbError::Decode(format!("column {idx}: expected boolean, got {other:?}"))),
        }
    }

    /// Read a nullable timestamp column
    ///
    /// # Errors
    ///
    /// Returns `DbError::Decode` on type mismatch.
    pub fn get_opt_timestamp(&self, idx: usize) -> Result<Option<NaiveDateTime>, DbError> {
        match self.value(idx)? {
            SqlValue::Null => Ok(None),
            SqlValue::Timestamp(ts) => Ok(Some(*ts)),
            other => Err(DbError::Decode(format!("column {idx}: expected timestamp, got {other:?}"))),
        }
    }
}

/// Database error type
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DbError {
    /// Error reported by the server, with SQLSTATE and optional detail text
    Postgres {
        message: String,
        code: Option<String>,
        detail: Option<String>,
    },
    /// The transaction has already been committed or rolled back
    TransactionClosed,
    /// The underlying connection is gone
    ConnectionClosed,
    /// A value could not be converted to or from its SQL representation
    Decode(String),
    /// Other driver errors
    Other(String),
}

impl DbError {
    /// Detail text supplied by the database, if any
    #[must_use]
    pub fn detail(&self) -> Option<&str> {
        match self {
            DbError::Postgres { detail, .. } => detail.as_deref().filter(|d| !d.is_empty()),
            _ => None,
        }
    }

    /// SQLSTATE code supplied by the database, if any
    #[must_use]
    pub fn code(&self) -> Option<&str> {
        match self {
            DbError::Postgres { code, .. } => code.as_deref(),
            _ => None,
        }
    }
}

impl fmt::Display for DbError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DbError::Postgres { message, code, .. } => match code {
                Some(code) => write!(f, "PostgreSQL error: {message} (SQLSTATE {code})"),
                None => write!(f, "PostgreSQL error: {message}"),
            },
            DbError::TransactionClosed => {
                write!(f, "Transaction has already been committed or rolled back")
            }
            DbError::ConnectionClosed => write!(f, "Connection is closed"),
            DbError::Decode(s) => write!(f, "Decode error: {s}"),
            DbError::Other(s) => write!(f, "Execution error: {s}"),
        }
    }
}

impl std::error::Error for DbError {}

/// Statement execution
///
/// Implemented by connections and by open transactions, so the same code can
/// run inside or outside a transaction.
pub trait Executor {
    /// Execute a single parameterised statement and return the rows affected
    ///
    /// # Errors
    ///
    /// Returns `DbError` if the statement fails.
    fn execute(&self, query: &str, params: &[SqlValue]) -> Result<u64, DbError>;

    /// Execute SQL text verbatim, possibly containing several statements
    ///
    /// No parameters are bound and nothing is rewritten.
    ///
    /// # Errors
    ///
    /// Returns `DbError` as soon as one statement of the batch fails.
    fn batch_execute(&self, sql: &str) -> Result<(), DbError>;

    /// Query at most one row
    ///
    /// # Errors
    ///
    /// Returns `DbError` if the query fails.
    fn query_opt(&self, query: &str, params: &[SqlValue]) -> Result<Option<Row>, DbError>;

    /// Check whether a database routine with the given signature exists
    ///
    /// `signature` uses the `name(argtype, ...)` form understood by
    /// `to_regprocedure`, e.g. `get_db_version()`.
    ///
    /// # Errors
    ///
    /// Returns `DbError` if the lookup itself fails.
    fn routine_exists(&self, signature: &str) -> Result<bool, DbError>;
}

/// An open transaction
///
/// Consumed by `commit` or `rollback`, so a transaction reaches exactly one
/// terminal state.
pub trait Transaction: Executor {
    /// Commit all statements executed in this transaction
    ///
    /// # Errors
    ///
    /// Returns `DbError` if the commit fails.
    fn commit(self: Box<Self>) -> Result<(), DbError>;

    /// Discard all statements executed in this transaction
    ///
    /// # Errors
    ///
    /// Returns `DbError::TransactionClosed` if the driver already closed it,
    /// or another `DbError` if the rollback fails.
    fn rollback(self: Box<Self>) -> Result<(), DbError>;

    /// Whether the connection underneath this transaction is already closed
    fn is_connection_closed(&self) -> bool;
}

/// A connection that can open transactions
pub trait Connection: Executor {
    /// Begin a new transaction
    ///
    /// # Errors
    ///
    /// Returns `DbError` if the transaction cannot be started.
    fn begin(&self) -> Result<Box<dyn Transaction + '_>, DbError>;
}
