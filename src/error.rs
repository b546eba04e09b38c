use sea_orm::{DbErr, SqlErr};
use thiserror::Error;

pub type Result<T, E = CatalogError> = std::result::Result<T, E>;

/// Every failure the catalog core can report.
///
/// Callers match on [`CatalogError::kind`] (or the variant directly); the payload
/// carries context for logs and API responses.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CatalogError {
    #[error("Not found: {0}")]
    NotFound(String),
    #[error("Validation failed: {0}")]
    Validation(String),
    #[error("Duplicate: {0}")]
    Duplicate(String),
    #[error("Cache unavailable: {0}")]
    CacheUnavailable(String),
    #[error("Storage error: {0}")]
    Storage(String),
    #[error("Internal error: {0}")]
    Internal(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    NotFound,
    Validation,
    Duplicate,
    CacheUnavailable,
    Storage,
    Internal,
}

impl CatalogError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            CatalogError::NotFound(_) => ErrorKind::NotFound,
            CatalogError::Validation(_) => ErrorKind::Validation,
            CatalogError::Duplicate(_) => ErrorKind::Duplicate,
            CatalogError::CacheUnavailable(_) => ErrorKind::CacheUnavailable,
            CatalogError::Storage(_) => ErrorKind::Storage,
            CatalogError::Internal(_) => ErrorKind::Internal,
        }
    }

    pub fn not_found(what: impl Into<String>) -> Self {
        CatalogError::NotFound(what.into())
    }

    pub fn validation(msg: impl Into<String>) -> Self {
        CatalogError::Validation(msg.into())
    }
}

impl From<DbErr> for CatalogError {
    fn from(err: DbErr) -> Self {
        if let DbErr::RecordNotFound(msg) = &err {
            return CatalogError::NotFound(msg.clone());
        }
        match err.sql_err() {
            Some(SqlErr::UniqueConstraintViolation(detail)) => CatalogError::Duplicate(detail),
            _ => CatalogError::Internal(format!("Database error: {err}")),
        }
    }
}

impl From<serde_json::Error> for CatalogError {
    fn from(err: serde_json::Error) -> Self {
        CatalogError::Internal(format!("JSON serialization/deserialization error: {err}"))
    }
}

impl From<std::io::Error> for CatalogError {
    fn from(err: std::io::Error) -> Self {
        CatalogError::Storage(err.to_string())
    }
}

impl From<redis::RedisError> for CatalogError {
    fn from(err: redis::RedisError) -> Self {
        CatalogError::CacheUnavailable(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_not_found_maps_to_not_found() {
        let err: CatalogError = DbErr::RecordNotFound("image 3".to_string()).into();
        assert_eq!(err, CatalogError::NotFound("image 3".to_string()));
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }

    #[test]
    fn test_other_db_errors_are_internal() {
        let err: CatalogError = DbErr::Custom("boom".to_string()).into();
        assert_eq!(err.kind(), ErrorKind::Internal);
    }
}
