use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("failed to {op}: {source}")]
    Query {
        op: &'static str,
        #[source]
        source: sqlx::Error,
    },

    /// A stored byte blob with a fixed expected size did not match it.
    /// Signals storage corruption or a schema mismatch; never coerced.
    #[error("database returned byte array with illegal length (expected {expected}, got {got})")]
    InvalidLength { expected: usize, got: usize },

    #[error("migration error: {0}")]
    Migration(String),
}

impl StoreError {
    pub(crate) fn query(op: &'static str, source: sqlx::Error) -> Self {
        Self::Query { op, source }
    }
}
