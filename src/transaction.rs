//! PostgreSQL transactions
//!
//! [`PgTransaction`] issues `BEGIN`, `COMMIT` and `ROLLBACK` on a cloned
//! `may_postgres::Client` and implements [`Executor`] so statements can run
//! inside it. A transaction is closed after the first commit or rollback.

use crate::connection;
use crate::executor::{DbError, Executor, Row, SqlValue, Transaction};
use may_postgres::Client;
use std::cell::Cell;

#[cfg(feature = "tracing")]
use crate::trace::tracing_helpers;

/// Transaction isolation level
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum IsolationLevel {
    /// Read committed (PostgreSQL default)
    #[default]
    ReadCommitted,
    /// Repeatable read
    RepeatableRead,
    /// Serializable
    Serializable,
}

impl IsolationLevel {
    fn to_sql(self) -> &'static str {
        match self {
            IsolationLevel::ReadCommitted => "READ COMMITTED",
            IsolationLevel::RepeatableRead => "REPEATABLE READ",
            IsolationLevel::Serializable => "SERIALIZABLE",
        }
    }
}

/// A top-level PostgreSQL transaction
pub struct PgTransaction {
    client: Client,
    closed: Cell<bool>,
}

impl PgTransaction {
    /// Start a transaction with the default isolation level
    ///
    /// # Errors
    ///
    /// Returns `DbError` if `BEGIN` fails.
    pub fn begin(client: Client) -> Result<Self, DbError> {
        Self::begin_with_isolation(client, IsolationLevel::default())
    }

    /// Start a transaction with a specific isolation level
    ///
    /// # Errors
    ///
    /// Returns `DbError` if `BEGIN` fails.
    pub fn begin_with_isolation(
        client: Client,
        isolation_level: IsolationLevel,
    ) -> Result<Self, DbError> {
        #[cfg(feature = "tracing")]
        let _span = tracing_helpers::begin_transaction_span().entered();

        let begin_sql = format!("BEGIN ISOLATION LEVEL {}", isolation_level.to_sql());
        client.batch_execute(&begin_sql)?;

        Ok(Self {
            client,
            closed: Cell::new(false),
        })
    }

    /// Check if the transaction is closed
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed.get()
    }

    fn ensure_open(&self) -> Result<(), DbError> {
        if self.closed.get() {
            return Err(DbError::TransactionClosed);
        }
        Ok(())
    }

    fn finish(&self, sql: &str) -> Result<(), DbError> {
        self.ensure_open()?;
        // Closed either way: a failed COMMIT/ROLLBACK leaves nothing to retry
        self.closed.set(true);
        self.client.batch_execute(sql)?;
        Ok(())
    }
}

impl Executor for PgTransaction {
    fn execute(&self, query: &str, params: &[SqlValue]) -> Result<u64, DbError> {
        self.ensure_open()?;
        connection::execute(&self.client, query, params)
    }

    fn batch_execute(&self, sql: &str) -> Result<(), DbError> {
        self.ensure_open()?;
        connection::batch_execute(&self.client, sql)
    }

    fn query_opt(&self, query: &str, params: &[SqlValue]) -> Result<Option<Row>, DbError> {
        self.ensure_open()?;
        connection::query_opt(&self.client, query, params)
    }

    fn routine_exists(&self, signature: &str) -> Result<bool, DbError> {
        self.ensure_open()?;
        connection::routine_exists(&self.client, signature)
    }
}

impl Transaction for PgTransaction {
    fn commit(self: Box<Self>) -> Result<(), DbError> {
        #[cfg(feature = "tracing")]
        let _span = tracing_helpers::commit_transaction_span().entered();

        self.finish("COMMIT")
    }

    fn rollback(self: Box<Self>) -> Result<(), DbError> {
        #[cfg(feature = "tracing")]
        let _span = tracing_helpers::rollback_transaction_span().entered();

        self.finish("ROLLBACK")
    }

    fn is_connection_closed(&self) -> bool {
        self.client.is_closed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_isolation_level_to_sql() {
        assert_eq!(IsolationLevel::ReadCommitted.to_sql(), "READ COMMITTED");
        assert_eq!(IsolationLevel::RepeatableRead.to_sql(), "REPEATABLE READ");
        assert_eq!(IsolationLevel::Serializable.to_sql(), "SERIALIZABLE");
    }

    #[test]
    fn test_isolation_level_default() {
        assert_eq!(IsolationLevel::default(), IsolationLevel::ReadCommitted);
        assert_ne!(IsolationLevel::default(), IsolationLevel::Serializable);
    }
}
