//! Garde validation helpers mapping reports onto DomainError.

use crate::domain::DomainError;
use garde::{Report, Validate};

/// Validate a value, flattening the garde report into a ValidationError
pub fn validate_struct<T>(value: &T) -> Result<(), DomainError>
where
    T: Validate,
    T::Context: Default,
{
    value
        .validate()
        .map_err(|report| DomainError::ValidationError(format_validation_errors(&report)))
}

/// Validate one element of a batch; the message is prefixed with its position
pub fn validate_batch_item<T>(index: usize, value: &T) -> Result<(), DomainError>
where
    T: Validate,
    T::Context: Default,
{
    value.validate().map_err(|report| {
        DomainError::ValidationError(format!(
            "record {}: {}",
            index,
            format_validation_errors(&report)
        ))
    })
}

fn format_validation_errors(report: &Report) -> String {
    report
        .iter()
        .map(|(path, error)| {
            let path = path.to_string();
            if path.is_empty() {
                error.message().to_string()
            } else {
                format!("{}: {}", path, error.message())
            }
        })
        .collect::<Vec<_>>()
        .join(", ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Validate)]
    struct Sample {
        #[garde(length(min = 1))]
        device_id: String,
        #[garde(range(min = 0.0, max = 100.0))]
        soc_percent: f64,
    }

    #[test]
    fn test_validate_success() {
        let sample = Sample {
            device_id: "V1".to_string(),
            soc_percent: 42.0,
        };
        assert!(validate_struct(&sample).is_ok());
    }

    #[test]
    fn test_validate_failure_names_field() {
        let sample = Sample {
            device_id: "".to_string(),
            soc_percent: 42.0,
        };
        match validate_struct(&sample) {
            Err(DomainError::ValidationError(msg)) => assert!(msg.contains("device_id")),
            other => panic!("expected ValidationError, got {:?}", other),
        }
    }

    #[test]
    fn test_batch_item_message_carries_index() {
        let sample = Sample {
            device_id: "V1".to_string(),
            soc_percent: 140.0,
        };
        match validate_batch_item(3, &sample) {
            Err(DomainError::ValidationError(msg)) => {
                assert!(msg.starts_with("record 3:"));
                assert!(msg.contains("soc_percent"));
            }
            other => panic!("expected ValidationError, got {:?}", other),
        }
    }
}
