//! Span helpers for the optional `tracing` feature

#[cfg(feature = "tracing")]
pub mod tracing_helpers {
    use tracing::{info_span, Span};

    /// Longest statement prefix recorded on a span
    const MAX_STATEMENT_LEN: usize = 120;

    pub fn connect_span() -> Span {
        info_span!("schemaguard.connect")
    }

    pub fn begin_transaction_span() -> Span {
        info_span!("schemaguard.transaction.begin")
    }

    pub fn commit_transaction_span() -> Span {
        info_span!("schemaguard.transaction.commit")
    }

    pub fn rollback_transaction_span() -> Span {
        info_span!("schemaguard.transaction.rollback")
    }

    pub fn execute_query_span(query: &str) -> Span {
        info_span!("schemaguard.execute", statement = %truncate(query))
    }

    pub fn apply_file_span(path: &std::path::Path) -> Span {
        info_span!("schemaguard.apply_file", file = %path.display())
    }

    fn truncate(query: &str) -> &str {
        let query = query.trim();
        match query.char_indices().nth(MAX_STATEMENT_LEN) {
            Some((idx, _)) => &query[..idx],
            None => query,
        }
    }

}
