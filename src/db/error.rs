use diesel::ConnectionError;
use diesel::result::{DatabaseErrorKind, Error as DieselError};
use log::error;
use thiserror::Error;

/// Errors raised at the repository boundary.
#[derive(Debug, Error)]
pub enum StoreError {
    /// A connection could not be established for the call.
    #[error("database connection failed: {0}")]
    Connection(#[from] ConnectionError),
    /// A statement failed; `context` names the operation.
    #[error("{context}: {source}")]
    Query {
        context: &'static str,
        source: DieselError,
    },
}

impl From<DieselError> for StoreError {
    fn from(source: DieselError) -> Self {
        StoreError::Query {
            context: "transaction failed",
            source,
        }
    }
}

impl StoreError {
    /// Error mapper for `map_err` that logs the failure with its context.
    pub fn query(context: &'static str) -> impl FnOnce(DieselError) -> StoreError {
        move |source| {
            error!("{}: {}", context, source);
            StoreError::Query { context, source }
        }
    }

    /// True when storage itself is unreachable and continuing the run is pointless.
    pub fn is_connection_failure(&self) -> bool {
        match self {
            StoreError::Connection(_) => true,
            StoreError::Query { source, .. } => matches!(
                source,
                DieselError::DatabaseError(DatabaseErrorKind::ClosedConnection, _)
                    | DieselError::BrokenTransactionManager
            ),
        }
    }
}
