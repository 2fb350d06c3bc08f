//! Errors surfaced to callers of on-demand operations.

use crate::authorize::AuthorizeError;
use crate::db::DbError;
use crate::notify::DeliveryError;
use serde::Serialize;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum MonitorError {
    #[error("{0}")]
    Validation(String),
    #[error("{0}")]
    Authorization(String),
    #[error("{0} not found")]
    NotFound(&'static str),
    #[error("delivery failed: {0}")]
    Delivery(#[from] DeliveryError),
    #[error("storage error: {0}")]
    Storage(DbError),
}

impl MonitorError {
    /// Stable machine-readable kind.
    pub fn kind(&self) -> &'static str {
        match self {
            MonitorError::Validation(_) => "validation",
            MonitorError::Authorization(_) => "authorization",
            MonitorError::NotFound(_) => "not_found",
            MonitorError::Delivery(_) => "delivery",
            MonitorError::Storage(_) => "storage",
        }
    }

    /// Map a store error, naming the missing record on `NotFound`.
    pub fn from_db(entity: &'static str) -> impl Fn(DbError) -> MonitorError {
        move |e| match e {
            DbError::NotFound => MonitorError::NotFound(entity),
            DbError::Duplicate(what) => MonitorError::Validation(format!("{} is already monitored", what)),
            other => MonitorError::Storage(other),
        }
    }
}

impl From<AuthorizeError> for MonitorError {
    fn from(e: AuthorizeError) -> Self {
        match e {
            AuthorizeError::Validation(msg) => MonitorError::Validation(msg),
            e @ (AuthorizeError::PageUnreachable(_) | AuthorizeError::PageStatus(_)) => {
                MonitorError::Validation(e.to_string())
            }
            other => MonitorError::Authorization(other.to_string()),
        }
    }
}

/// Wire form of an error: stable kind plus human-readable message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ErrorBody {
    pub kind: &'static str,
    pub message: String,
}

impl From<&MonitorError> for ErrorBody {
    fn from(e: &MonitorError) -> Self {
        Self {
            kind: e.kind(),
            message: e.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kinds_are_stable() {
        assert_eq!(MonitorError::Validation("x".into()).kind(), "validation");
        assert_eq!(MonitorError::NotFound("site").kind(), "not_found");
        assert_eq!(MonitorError::NotFound("site").to_string(), "site not found");

        let err = MonitorError::from_db("alert")(DbError::NotFound);
        assert!(matches!(err, MonitorError::NotFound("alert")));

        let err: MonitorError = AuthorizeError::Validation("bad url".into()).into();
        assert_eq!(err.kind(), "validation");

        let err: MonitorError = AuthorizeError::TokenMismatch.into();
        assert_eq!(err.kind(), "authorization");

        let err: MonitorError = AuthorizeError::PageStatus(500).into();
        assert_eq!(
            ErrorBody::from(&err),
            ErrorBody {
                kind: "validation",
                message: "site page returned HTTP 500".to_string()
            }
        );
    }
}
