use common::domain::{DomainError, DomainResult};
use std::future::Future;
use std::time::Duration;
use tracing::warn;

/// Run one storage call under the configured deadline.
///
/// An elapsed deadline surfaces as `StorageTimeout`; the call is not retried.
pub async fn with_storage_timeout<T, F>(limit: Duration, operation: &'static str, call: F) -> DomainResult<T>
where
    F: Future<Output = DomainResult<T>>,
{
    match tokio::time::timeout(limit, call).await {
        Ok(result) => result,
        Err(_) => {
            warn!(
                operation = operation,
                timeout_ms = limit.as_millis() as u64,
                "storage operation timed out"
            );
            Err(DomainError::StorageTimeout(operation.to_string()))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_elapsed_call_becomes_storage_timeout() {
        let result: DomainResult<()> = with_storage_timeout(Duration::from_millis(20), "scan", async {
            tokio::time::sleep(Duration::from_secs(10)).await;
            Ok(())
        })
        .await;
        assert!(matches!(result, Err(DomainError::StorageTimeout(op)) if op == "scan"));
    }

    #[tokio::test]
    async fn test_inner_error_passes_through() {
        let result: DomainResult<()> = with_storage_timeout(Duration::from_secs(1), "scan", async {
            Err(DomainError::DeviceNotFound("M1".to_string()))
        })
        .await;
        assert!(matches!(result, Err(DomainError::DeviceNotFound(_))));
    }
}
