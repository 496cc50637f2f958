use common::domain::DomainResult;
use garde::Validate;
use serde::Deserialize;
use std::time::Duration;

/// Tunables of the ingestion, status and analytics services
#[derive(Debug, Clone, Deserialize, Validate)]
pub struct EngineConfig {
    /// Age after which a device reads as offline
    #[serde(default = "default_freshness_threshold_secs")]
    #[garde(range(min = 1, max = 604_800))]
    pub freshness_threshold_secs: u64,

    #[serde(default = "default_warning_threshold")]
    #[garde(range(min = 0.0, max = 1.0), custom(exceeds(&self.critical_threshold)))]
    pub warning_threshold: f64,

    #[serde(default = "default_critical_threshold")]
    #[garde(range(min = 0.0, max = 1.0))]
    pub critical_threshold: f64,

    /// Upper bound for every storage round trip issued by the engine
    #[serde(default = "default_storage_timeout_ms")]
    #[garde(range(min = 1))]
    pub storage_timeout_ms: u64,
}

fn default_freshness_threshold_secs() -> u64 {
    300
}

fn default_warning_threshold() -> f64 {
    0.85
}

fn default_critical_threshold() -> f64 {
    0.75
}

fn default_storage_timeout_ms() -> u64 {
    5000
}

fn exceeds(critical: &f64) -> impl FnOnce(&f64, &()) -> garde::Result + '_ {
    move |warning, _| {
        if warning > critical {
            Ok(())
        } else {
            Err(garde::Error::new(format!(
                "must be greater than the critical threshold ({})",
                critical
            )))
        }
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            freshness_threshold_secs: default_freshness_threshold_secs(),
            warning_threshold: default_warning_threshold(),
            critical_threshold: default_critical_threshold(),
            storage_timeout_ms: default_storage_timeout_ms(),
        }
    }
}

impl EngineConfig {
    pub fn validated(self) -> DomainResult<Self> {
        common::garde::validate_struct(&self)?;
        Ok(self)
    }

    pub fn freshness(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.freshness_threshold_secs as i64)
    }

    pub fn storage_timeout(&self) -> Duration {
        Duration::from_millis(self.storage_timeout_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::domain::DomainError;

    #[test]
    fn test_defaults_are_valid() {
        let config = EngineConfig::default().validated().unwrap();
        assert_eq!(config.freshness(), chrono::Duration::minutes(5));
        assert_eq!(config.storage_timeout(), Duration::from_secs(5));
    }

    #[test]
    fn test_deserialize_partial_uses_defaults() {
        let config: EngineConfig = serde_json::from_str(r#"{"warning_threshold":0.9}"#).unwrap();
        assert_eq!(config.warning_threshold, 0.9);
        assert_eq!(config.critical_threshold, 0.75);
        assert_eq!(config.freshness_threshold_secs, 300);
    }

    #[test]
    fn test_warning_must_exceed_critical() {
        let config = EngineConfig {
            warning_threshold: 0.7,
            critical_threshold: 0.75,
            ..EngineConfig::default()
        };
        match config.validated() {
            Err(DomainError::ValidationError(msg)) => assert!(msg.contains("warning_threshold")),
            other => panic!("expected ValidationError, got {:?}", other),
        }
    }

    #[test]
    fn test_zero_timeout_rejected() {
        let config = EngineConfig {
            storage_timeout_ms: 0,
            ..EngineConfig::default()
        };
        assert!(config.validated().is_err());
    }
}
