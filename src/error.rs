use chrono::NaiveDate;
use thiserror::Error;

use crate::models::MessageType;

/// Failure reported by a storage or delivery collaborator.
///
/// `status` follows HTTP conventions (404 missing, 413 scan too large, 500
/// backend failure) so callers can branch on it without parsing messages.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("store error {status}: {message}")]
pub struct StoreError {
    pub status: u16,
    pub message: String,
}

impl StoreError {
    pub fn new(status: u16, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(404, message)
    }

    pub fn backend(message: impl Into<String>) -> Self {
        Self::new(500, message)
    }
}

impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::RowNotFound => Self::not_found("row not found"),
            other => Self::backend(other.to_string()),
        }
    }
}

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("no active template for message type {message_type}")]
    NoActiveTemplate { message_type: MessageType },

    #[error("no participants qualified for the status report on {report_date}")]
    NoEligibleParticipants { report_date: NaiveDate },

    #[error("{service} failed: {message}")]
    ExternalService { service: String, message: String },

    #[error("cohort {name} starts on {start} after it ends on {end}")]
    InvalidCohort {
        name: String,
        start: NaiveDate,
        end: NaiveDate,
    },

    #[error(transparent)]
    Store(#[from] StoreError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn store_error_carries_status() {
        let err = StoreError::not_found("participant 1a");
        assert_eq!(err.status, 404);
        assert_eq!(err.to_string(), "store error 404: participant 1a");
    }
}
