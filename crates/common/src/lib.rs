pub mod domain;
pub mod garde;
pub mod memory;
pub mod postgres;
pub mod telemetry;

// Re-export mocks when testing feature is enabled
#[cfg(any(test, feature = "testing"))]
pub use domain::MockCorrelationRepository;
#[cfg(any(test, feature = "testing"))]
pub use domain::MockHistoryRepository;
#[cfg(any(test, feature = "testing"))]
pub use domain::MockStatusRepository;
#[cfg(any(test, feature = "testing"))]
pub use domain::MockTelemetryStore;
#[cfg(any(test, feature = "testing"))]
pub use domain::MockTelemetryTransaction;
