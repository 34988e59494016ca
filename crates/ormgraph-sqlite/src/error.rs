//! Errors of the SQLite driver.

use ormgraph_core::DriverError;
use rusqlite::ErrorCode;

/// SQLite driver errors.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Error from SQLite itself.
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// Error from the mapping layer.
    #[error(transparent)]
    Core(#[from] ormgraph_core::Error),
}

/// Result type for driver operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Report a rusqlite failure through the driver seam. Busy and locked
/// databases are retryable.
pub(crate) fn driver_error(err: rusqlite::Error) -> DriverError {
    let retryable = matches!(
        err.sqlite_error_code(),
        Some(ErrorCode::DatabaseBusy | ErrorCode::DatabaseLocked)
    );
    let code = match &err {
        rusqlite::Error::SqliteFailure(failure, _) => Some(failure.extended_code),
        _ => None,
    };
    let mut driver = DriverError::new(err.to_string());
    if let Some(code) = code {
        driver = driver.with_sql_state(code.to_string());
    }
    if retryable {
        driver = driver.retryable();
    }
    driver
}
