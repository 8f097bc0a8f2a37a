//! Error types for raster statistics processing.

use thiserror::Error;

use crate::record::InvariantViolation;

/// Result type alias using ZonalError.
pub type ZonalResult<T> = Result<T, ZonalError>;

/// Where an error sits in the failure taxonomy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Bad raster, geometry, date or leadtime. Fails one unit only.
    Input,
    /// A computed statistic broke the record contract. The record is withheld.
    Invariant,
    /// Storage or network collaborator failed. Retryable by the caller.
    Collaborator,
}

/// Primary error type for zonal statistics operations.
#[derive(Debug, Error)]
pub enum ZonalError {
    // === Input Errors ===
    #[error("Invalid raster grid: {0}")]
    InvalidGrid(String),

    #[error("Invalid geometry for {pcode}: {message}")]
    InvalidGeometry { pcode: String, message: String },

    #[error("Invalid ISO3 code: {0}")]
    InvalidIso3(String),

    #[error("Invalid admin level: {0} (expected 0-4)")]
    InvalidAdminLevel(i64),

    #[error("Invalid time specification: {0}")]
    InvalidTime(String),

    #[error("Leadtime {0} is outside 0-6")]
    LeadtimeOutOfRange(i32),

    #[error("Unknown dataset: {0}")]
    UnknownDataset(String),

    // === Contract Errors ===
    #[error("Invariant violated: {0}")]
    Invariant(#[from] InvariantViolation),

    // === Collaborator Errors ===
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Collaborator unavailable: {0}")]
    Unavailable(String),
}

impl ZonalError {
    /// Classify the error for unit-level failure handling.
    pub fn kind(&self) -> ErrorKind {
        match self {
            ZonalError::Invariant(_) => ErrorKind::Invariant,
            ZonalError::Unavailable(_) => ErrorKind::Collaborator,
            _ => ErrorKind::Input,
        }
    }

    /// Only collaborator outages are worth retrying; the core never retries itself.
    pub fn is_retryable(&self) -> bool {
        self.kind() == ErrorKind::Collaborator
    }

    pub fn invalid_geometry(pcode: impl Into<String>, message: impl Into<String>) -> Self {
        ZonalError::InvalidGeometry {
            pcode: pcode.into(),
            message: message.into(),
        }
    }
}

impl From<std::io::Error> for ZonalError {
    fn from(err: std::io::Error) -> Self {
        match err.kind() {
            std::io::ErrorKind::NotFound => ZonalError::NotFound(err.to_string()),
            _ => ZonalError::Unavailable(err.to_string()),
        }
    }
}

impl From<serde_json::Error> for ZonalError {
    fn from(err: serde_json::Error) -> Self {
        ZonalError::InvalidGrid(format!("JSON error: {}", err))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_kinds() {
        assert_eq!(ZonalError::InvalidIso3("ab".into()).kind(), ErrorKind::Input);
        assert_eq!(ZonalError::NotFound("x".into()).kind(), ErrorKind::Input);
        assert_eq!(
            ZonalError::Unavailable("db down".into()).kind(),
            ErrorKind::Collaborator
        );
        assert!(ZonalError::Unavailable("db down".into()).is_retryable());
        assert!(!ZonalError::LeadtimeOutOfRange(7).is_retryable());
    }

    #[test]
    fn test_io_error_mapping() {
        let missing = std::io::Error::new(std::io::ErrorKind::NotFound, "gone");
        assert!(matches!(ZonalError::from(missing), ZonalError::NotFound(_)));

        let refused = std::io::Error::new(std::io::ErrorKind::ConnectionRefused, "refused");
        assert!(ZonalError::from(refused).is_retryable());
    }
}
