// sqlx::Error -> AppError

use steadfast_core::error::AppError;

/// Convert sqlx::Error to AppError with structured information
pub(crate) fn map_sqlx_error(err: sqlx::Error) -> AppError {
    match &err {
        sqlx::Error::Database(db_err) => {
            // SQLite error codes: https://www.sqlite.org/rescode.html
            match db_err.code().as_deref() {
                // UNIQUE / PRIMARY KEY constraint failed
                Some(code @ ("2067" | "1555")) => {
                    AppError::Conflict(format!("Unique constraint violation: {} ({})", db_err.message(), code))
                }
                Some("5") => AppError::Database(format!("Database locked (SQLITE_BUSY): {}", db_err.message())),
                Some("13") => AppError::Database(format!("Database full: {}", db_err.message())),
                Some(code) => AppError::Database(format!("Database error [{}]: {}", code, db_err.message())),
                None => AppError::Database(format!("Database error: {}", db_err.message())),
            }
        }
        sqlx::Error::RowNotFound => AppError::Database("Row not found".to_string()),
        sqlx::Error::ColumnNotFound(col) => AppError::Database(format!("Column not found: {}", col)),
        // Connection, pool, protocol errors
        _ => AppError::Database(err.to_string()),
    }
}

/// Stored integers are i64; values outside that range saturate
pub(crate) fn to_i64(value: u64) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}

pub(crate) fn to_u32(column: &str, value: i64) -> Result<u32, AppError> {
    u32::try_from(value).map_err(|_| AppError::Database(format!("column {} out of range: {}", column, value)))
}

pub(crate) fn to_u64(column: &str, value: i64) -> Result<u64, AppError> {
    u64::try_from(value).map_err(|_| AppError::Database(format!("column {} out of range: {}", column, value)))
}
