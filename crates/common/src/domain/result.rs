use thiserror::Error;

pub type DomainResult<T> = Result<T, DomainError>;

#[derive(Error, Debug)]
pub enum DomainError {
    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Invalid window: start {start} is after end {end}")]
    InvalidWindow {
        start: chrono::DateTime<chrono::Utc>,
        end: chrono::DateTime<chrono::Utc>,
    },

    #[error("Device not found: {0}")]
    DeviceNotFound(String),

    #[error("No readings for device {device_id} in the requested window")]
    NoReadingsInWindow { device_id: String },

    #[error("Correlation link not found: meter {meter_id} <-> vehicle {vehicle_id}")]
    CorrelationLinkNotFound { meter_id: String, vehicle_id: String },

    #[error("Correlation conflict: meter {meter_id} <-> vehicle {vehicle_id} collides with another active link")]
    CorrelationConflict { meter_id: String, vehicle_id: String },

    #[error("Correlation lookup failed: {0}")]
    CorrelationLookupFailure(anyhow::Error),

    #[error("History record already exists: {0}")]
    DuplicateHistoryRecord(String),

    #[error("Storage operation timed out: {0}")]
    StorageTimeout(String),

    #[error("Batch cancelled after {processed} readings")]
    BatchCancelled { processed: usize },

    #[error("Repository error: {0}")]
    RepositoryError(#[from] anyhow::Error),
}

impl DomainError {
    /// Whether resubmitting the same request later can succeed without changes
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            DomainError::StorageTimeout(_)
                | DomainError::RepositoryError(_)
                | DomainError::CorrelationLookupFailure(_)
                | DomainError::CorrelationConflict { .. }
        )
    }

    /// Whether the error means "no data" rather than a failure
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            DomainError::DeviceNotFound(_)
                | DomainError::NoReadingsInWindow { .. }
                | DomainError::CorrelationLinkNotFound { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_classification() {
        assert!(DomainError::StorageTimeout("upsert".to_string()).is_transient());
        assert!(DomainError::RepositoryError(anyhow::anyhow!("connection reset")).is_transient());
        assert!(!DomainError::ValidationError("meter_id: length is lower than 1".to_string())
            .is_transient());
        assert!(!DomainError::DeviceNotFound("M1".to_string()).is_transient());
    }

    #[test]
    fn test_not_found_classification() {
        assert!(DomainError::NoReadingsInWindow {
            device_id: "V1".to_string()
        }
        .is_not_found());
        assert!(!DomainError::BatchCancelled { processed: 3 }.is_not_found());
    }
}
