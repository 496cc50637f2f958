use crate::domain::with_storage_timeout;
use chrono::{DateTime, Utc};
use common::domain::{
    DomainError, DomainResult, MeterHistoryRecord, MeterStatusUpsert, Reading, StreamType,
    TelemetryStore, TelemetryTransaction, VehicleHistoryRecord, VehicleStatusUpsert,
};
use common::garde::{validate_batch_item, validate_struct};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

/// Outcome of one committed reading
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IngestReceipt {
    pub device_id: String,
    pub stream_type: StreamType,
    pub history_id: String,
    /// Correlated peer recorded on the history row, if a link was active
    pub peer_id: Option<String>,
}

/// A reading of a batch that was rejected without aborting the batch
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BatchFailure {
    pub index: usize,
    pub device_id: String,
    pub reason: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct BatchReport {
    pub success_count: usize,
    pub failed_count: usize,
    pub failures: Vec<BatchFailure>,
}

/// Ingestion Engine: writes the Cold Store row and the Hot Store upsert of
/// each reading inside one storage transaction.
///
/// Flow per reading:
/// 1. Validate the reading
/// 2. Resolve the correlated peer inside the transaction
/// 3. Append the history row tagged with the peer
/// 4. Apply the conditional status upsert
/// 5. Commit (or roll back on any failure)
pub struct IngestionService {
    store: Arc<dyn TelemetryStore>,
    freshness: chrono::Duration,
    storage_timeout: Duration,
}

type PeerCache = HashMap<(StreamType, String), Option<String>>;

impl IngestionService {
    pub fn new(
        store: Arc<dyn TelemetryStore>,
        freshness: chrono::Duration,
        storage_timeout: Duration,
    ) -> Self {
        Self {
            store,
            freshness,
            storage_timeout,
        }
    }

    #[instrument(skip(self, reading), fields(stream_type = %reading.stream_type(), device_id = %reading.device_id()))]
    pub async fn ingest_one(&self, reading: Reading) -> DomainResult<IngestReceipt> {
        validate_reading(&reading)?;

        let mut tx = self.begin().await?;
        let mut peers = PeerCache::new();

        let applied = self.apply(tx.as_mut(), &reading, &mut peers, Utc::now()).await;
        let receipt = match applied {
            Ok(receipt) => receipt,
            Err(e) => {
                self.abort(tx).await;
                return Err(e);
            }
        };

        with_storage_timeout(self.storage_timeout, "commit", tx.commit()).await?;

        debug!(history_id = %receipt.history_id, peer_id = ?receipt.peer_id, "reading committed");
        Ok(receipt)
    }

    /// Ingest readings in one transaction.
    ///
    /// Readings that fail validation are reported and skipped. Any storage
    /// failure, or cancellation observed between readings, rolls back the
    /// whole batch and is returned as the error.
    #[instrument(skip(self, readings, cancellation), fields(batch_size = readings.len()))]
    pub async fn ingest_batch(
        &self,
        readings: Vec<Reading>,
        cancellation: CancellationToken,
    ) -> DomainResult<BatchReport> {
        let mut report = BatchReport::default();
        let mut valid = Vec::with_capacity(readings.len());

        for (index, reading) in readings.into_iter().enumerate() {
            match validate_reading_at(index, &reading) {
                Ok(()) => valid.push(reading),
                Err(e) => {
                    debug!(index = index, error = %e, "skipping invalid reading");
                    report.failed_count += 1;
                    report.failures.push(BatchFailure {
                        index,
                        device_id: reading.device_id().to_string(),
                        reason: e.to_string(),
                    });
                }
            }
        }

        if valid.is_empty() {
            info!(failed = report.failed_count, "batch contained no valid readings");
            return Ok(report);
        }

        if cancellation.is_cancelled() {
            return Err(DomainError::BatchCancelled { processed: 0 });
        }

        let mut tx = self.begin().await?;
        let mut peers = PeerCache::new();
        let now = Utc::now();

        for reading in &valid {
            if cancellation.is_cancelled() {
                warn!(processed = report.success_count, "batch cancelled, rolling back");
                self.abort(tx).await;
                return Err(DomainError::BatchCancelled {
                    processed: report.success_count,
                });
            }

            let applied = self.apply(tx.as_mut(), reading, &mut peers, now).await;
            if let Err(e) = applied {
                error!(
                    device_id = %reading.device_id(),
                    processed = report.success_count,
                    error = %e,
                    "storage failure, rolling back batch"
                );
                self.abort(tx).await;
                return Err(e);
            }
            report.success_count += 1;
        }

        with_storage_timeout(self.storage_timeout, "commit", tx.commit()).await?;

        info!(
            succeeded = report.success_count,
            failed = report.failed_count,
            "batch committed"
        );
        Ok(report)
    }

    async fn begin(&self) -> DomainResult<Box<dyn TelemetryTransaction>> {
        with_storage_timeout(self.storage_timeout, "begin", self.store.begin()).await
    }

    async fn abort(&self, mut tx: Box<dyn TelemetryTransaction>) {
        if let Err(e) = with_storage_timeout(self.storage_timeout, "rollback", tx.rollback()).await {
            // dropping the transaction still discards it
            warn!(error = %e, "rollback failed");
        }
    }

    async fn apply(
        &self,
        tx: &mut dyn TelemetryTransaction,
        reading: &Reading,
        peers: &mut PeerCache,
        now: DateTime<Utc>,
    ) -> DomainResult<IngestReceipt> {
        let peer_id = self.resolve_peer(tx, reading, peers).await?;
        let history_id = xid::new().to_string();

        match reading {
            Reading::Meter(meter) => {
                let record =
                    MeterHistoryRecord::from_reading(history_id.clone(), meter, now, peer_id.clone());
                with_storage_timeout(
                    self.storage_timeout,
                    "append_meter_history",
                    tx.append_meter_history(&record),
                )
                .await?;

                let upsert =
                    MeterStatusUpsert::from_reading(meter, peer_id.clone(), now, self.freshness);
                let status = with_storage_timeout(
                    self.storage_timeout,
                    "upsert_meter_status",
                    tx.upsert_meter_status(&upsert),
                )
                .await?;

                debug!(
                    meter_id = %status.meter_id,
                    daily_kwh_consumed = status.daily_kwh_consumed,
                    state = %status.state,
                    "meter status upserted"
                );
            }
            Reading::Vehicle(vehicle) => {
                let record = VehicleHistoryRecord::from_reading(
                    history_id.clone(),
                    vehicle,
                    now,
                    peer_id.clone(),
                );
                with_storage_timeout(
                    self.storage_timeout,
                    "append_vehicle_history",
                    tx.append_vehicle_history(&record),
                )
                .await?;

                let upsert =
                    VehicleStatusUpsert::from_reading(vehicle, peer_id.clone(), now, self.freshness);
                let status = with_storage_timeout(
                    self.storage_timeout,
                    "upsert_vehicle_status",
                    tx.upsert_vehicle_status(&upsert),
                )
                .await?;

                debug!(
                    vehicle_id = %status.vehicle_id,
                    daily_kwh_delivered = status.daily_kwh_delivered,
                    state = %status.state,
                    "vehicle status upserted"
                );
            }
        }

        Ok(IngestReceipt {
            device_id: reading.device_id().to_string(),
            stream_type: reading.stream_type(),
            history_id,
            peer_id,
        })
    }

    async fn resolve_peer(
        &self,
        tx: &mut dyn TelemetryTransaction,
        reading: &Reading,
        peers: &mut PeerCache,
    ) -> DomainResult<Option<String>> {
        let key = (reading.stream_type(), reading.device_id().to_string());
        if let Some(peer) = peers.get(&key) {
            return Ok(peer.clone());
        }

        let lookup = match reading {
            Reading::Meter(meter) => {
                with_storage_timeout(
                    self.storage_timeout,
                    "find_active_vehicle_for",
                    tx.find_active_vehicle_for(&meter.meter_id),
                )
                .await
            }
            Reading::Vehicle(vehicle) => {
                with_storage_timeout(
                    self.storage_timeout,
                    "find_active_meter_for",
                    tx.find_active_meter_for(&vehicle.vehicle_id),
                )
                .await
            }
        };

        let peer = lookup.map_err(|e| match e {
            DomainError::StorageTimeout(_) => e,
            other => DomainError::CorrelationLookupFailure(other.into()),
        })?;

        peers.insert(key, peer.clone());
        Ok(peer)
    }
}

fn validate_reading(reading: &Reading) -> DomainResult<()> {
    match reading {
        Reading::Meter(meter) => validate_struct(meter),
        Reading::Vehicle(vehicle) => validate_struct(vehicle),
    }
}

fn validate_reading_at(index: usize, reading: &Reading) -> DomainResult<()> {
    match reading {
        Reading::Meter(meter) => validate_batch_item(index, meter),
        Reading::Vehicle(vehicle) => validate_batch_item(index, vehicle),
    }
}
