use crate::config::EngineConfig;
use crate::domain::{
    with_storage_timeout, AnalyticsService, BatchReport, CorrelationPairInput, CorrelationService,
    CorrelationView, DeviceSummary, DeviceSummaryInput, EfficiencyThresholds, FleetSummary,
    IngestReceipt, IngestionService, StatusService, TemperatureWarning, TimeWindow, TrendBucket,
};
use chrono::{DateTime, Utc};
use common::domain::{
    CorrelationLink, CorrelationRepository, DeviceStatus, DomainResult, HistoryRepository,
    MeterHistoryRecord, MeterStatus, Reading, StatusRepository, StreamType, TelemetryStore,
    VehicleHistoryRecord, VehicleStatus,
};
use common::memory::InMemoryTelemetryStore;
use common::postgres::{
    PostgresClient, PostgresCorrelationRepository, PostgresHistoryRepository,
    PostgresStatusRepository, PostgresTelemetryStore,
};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Storage handles the engine runs against
#[derive(Clone)]
pub struct FleetStorage {
    pub telemetry_store: Arc<dyn TelemetryStore>,
    pub status_repository: Arc<dyn StatusRepository>,
    pub history_repository: Arc<dyn HistoryRepository>,
    pub correlation_repository: Arc<dyn CorrelationRepository>,
}

impl FleetStorage {
    pub fn postgres(client: PostgresClient) -> Self {
        Self {
            telemetry_store: Arc::new(PostgresTelemetryStore::new(client.clone())),
            status_repository: Arc::new(PostgresStatusRepository::new(client.clone())),
            history_repository: Arc::new(PostgresHistoryRepository::new(client.clone())),
            correlation_repository: Arc::new(PostgresCorrelationRepository::new(client)),
        }
    }

    pub fn in_memory() -> Self {
        let store = InMemoryTelemetryStore::new();
        Self {
            telemetry_store: Arc::new(store.clone()),
            status_repository: Arc::new(store.clone()),
            history_repository: Arc::new(store.clone()),
            correlation_repository: Arc::new(store),
        }
    }
}

/// Entry point for everything the transport layer may call
pub struct FleetEngine {
    ingestion: IngestionService,
    correlation: CorrelationService,
    status: StatusService,
    analytics: AnalyticsService,
    history_repository: Arc<dyn HistoryRepository>,
    storage_timeout: Duration,
}

impl FleetEngine {
    pub fn new(config: EngineConfig, storage: FleetStorage) -> DomainResult<Self> {
        let config = config.validated()?;
        let freshness = config.freshness();
        let storage_timeout = config.storage_timeout();

        debug!(
            freshness_secs = config.freshness_threshold_secs,
            warning_threshold = config.warning_threshold,
            critical_threshold = config.critical_threshold,
            "initializing fleet engine"
        );

        Ok(Self {
            ingestion: IngestionService::new(
                storage.telemetry_store,
                freshness,
                storage_timeout,
            ),
            correlation: CorrelationService::new(
                storage.correlation_repository.clone(),
                storage.status_repository.clone(),
                storage_timeout,
            ),
            status: StatusService::new(storage.status_repository, freshness, storage_timeout),
            analytics: AnalyticsService::new(
                storage.history_repository.clone(),
                storage.correlation_repository,
                EfficiencyThresholds::new(config.warning_threshold, config.critical_threshold),
                storage_timeout,
            ),
            history_repository: storage.history_repository,
            storage_timeout,
        })
    }

    pub async fn ingest_one(&self, reading: Reading) -> DomainResult<IngestReceipt> {
        self.ingestion.ingest_one(reading).await
    }

    pub async fn ingest_batch(
        &self,
        readings: Vec<Reading>,
        cancellation: CancellationToken,
    ) -> DomainResult<BatchReport> {
        self.ingestion.ingest_batch(readings, cancellation).await
    }

    pub async fn get_status(&self, device_id: &str) -> DomainResult<DeviceStatus> {
        self.status.get_status(device_id).await
    }

    pub async fn get_meter_status(&self, meter_id: &str) -> DomainResult<MeterStatus> {
        self.status.get_meter_status(meter_id).await
    }

    pub async fn get_vehicle_status(&self, vehicle_id: &str) -> DomainResult<VehicleStatus> {
        self.status.get_vehicle_status(vehicle_id).await
    }

    pub async fn list_online_devices(&self) -> DomainResult<Vec<DeviceStatus>> {
        self.status.list_online_devices().await
    }

    pub async fn list_charging_vehicles(&self) -> DomainResult<Vec<VehicleStatus>> {
        self.status.list_charging_vehicles().await
    }

    pub async fn list_temp_warnings(&self) -> DomainResult<Vec<TemperatureWarning>> {
        self.status.list_temp_warnings().await
    }

    pub async fn set_correlation(&self, meter_id: &str, vehicle_id: &str) -> DomainResult<CorrelationLink> {
        self.correlation
            .set_correlation(CorrelationPairInput {
                meter_id: meter_id.to_string(),
                vehicle_id: vehicle_id.to_string(),
            })
            .await
    }

    pub async fn deactivate_correlation(
        &self,
        meter_id: &str,
        vehicle_id: &str,
    ) -> DomainResult<CorrelationLink> {
        self.correlation
            .deactivate_correlation(CorrelationPairInput {
                meter_id: meter_id.to_string(),
                vehicle_id: vehicle_id.to_string(),
            })
            .await
    }

    pub async fn get_correlation(
        &self,
        stream_type: StreamType,
        device_id: &str,
    ) -> DomainResult<CorrelationView> {
        self.correlation.get_correlation(stream_type, device_id).await
    }

    pub async fn get_device_summary(&self, input: DeviceSummaryInput) -> DomainResult<DeviceSummary> {
        self.analytics.compute_device_summary(input).await
    }

    pub async fn get_fleet_summary(
        &self,
        window_start: DateTime<Utc>,
        window_end: DateTime<Utc>,
    ) -> DomainResult<FleetSummary> {
        self.analytics
            .compute_fleet_summary(window_start, window_end)
            .await
    }

    pub async fn get_trend(
        &self,
        vehicle_id: &str,
        window_start: DateTime<Utc>,
        window_end: DateTime<Utc>,
    ) -> DomainResult<Vec<TrendBucket>> {
        self.analytics
            .compute_trend(vehicle_id, window_start, window_end)
            .await
    }

    /// Raw meter history in `[from, to]`, ordered by device timestamp
    pub async fn scan_meter_history(
        &self,
        meter_id: &str,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> DomainResult<Vec<MeterHistoryRecord>> {
        let window = TimeWindow::new(from, to)?;
        with_storage_timeout(
            self.storage_timeout,
            "scan_meter_range",
            self.history_repository
                .scan_meter_range(meter_id, window.start, window.end),
        )
        .await
    }

    /// Raw vehicle history in `[from, to]`, ordered by device timestamp
    pub async fn scan_vehicle_history(
        &self,
        vehicle_id: &str,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> DomainResult<Vec<VehicleHistoryRecord>> {
        let window = TimeWindow::new(from, to)?;
        with_storage_timeout(
            self.storage_timeout,
            "scan_vehicle_range",
            self.history_repository
                .scan_vehicle_range(vehicle_id, window.start, window.end),
        )
        .await
    }
}
