use crate::domain::{
    DomainError, DomainResult, MeterHistoryRecord, MeterStatus, MeterStatusUpsert,
    TelemetryStore, TelemetryTransaction, VehicleHistoryRecord, VehicleStatus,
    VehicleStatusUpsert,
};
use crate::postgres::correlation_repository::{active_meter_for, active_vehicle_for};
use crate::postgres::rows::is_unique_violation;
use crate::postgres::status_repository::{upsert_meter_status, upsert_vehicle_status};
use crate::postgres::PostgresClient;
use async_trait::async_trait;
use tracing::{debug, instrument, warn};

/// PostgreSQL implementation of TelemetryStore.
///
/// Cold appends and Hot upserts of one transaction share a pooled session
/// between `BEGIN` and `COMMIT`.
#[derive(Clone)]
pub struct PostgresTelemetryStore {
    client: PostgresClient,
}

impl PostgresTelemetryStore {
    pub fn new(client: PostgresClient) -> Self {
        Self { client }
    }
}

#[async_trait]
impl TelemetryStore for PostgresTelemetryStore {
    #[instrument(skip(self))]
    async fn begin(&self) -> DomainResult<Box<dyn TelemetryTransaction>> {
        let conn = self
            .client
            .get_connection()
            .await
            .map_err(DomainError::RepositoryError)?;

        // owned before BEGIN is awaited so a cancelled begin still detaches the session
        let mut transaction = PostgresTelemetryTransaction { conn: Some(conn) };
        let started = transaction.conn()?.batch_execute("BEGIN").await;
        if let Err(e) = started {
            transaction.discard();
            return Err(DomainError::RepositoryError(e.into()));
        }

        Ok(Box::new(transaction))
    }
}

/// Open transaction holding its pooled session.
///
/// A session whose transaction was neither committed nor rolled back is
/// detached from the pool and closed, which makes the server abort it.
pub struct PostgresTelemetryTransaction {
    conn: Option<deadpool_postgres::Client>,
}

impl PostgresTelemetryTransaction {
    fn conn(&self) -> DomainResult<&deadpool_postgres::Client> {
        self.conn.as_ref().ok_or_else(|| {
            DomainError::RepositoryError(anyhow::anyhow!("transaction already finished"))
        })
    }

    async fn finish(&mut self, statement: &str) -> DomainResult<()> {
        // the session stays owned until the statement returns, so a cancelled
        // finish falls through to Drop
        let result = self.conn()?.batch_execute(statement).await;
        match result {
            Ok(()) => {
                self.conn = None;
                Ok(())
            }
            Err(e) => {
                // session state is unknown, keep it out of the pool
                self.discard();
                Err(DomainError::RepositoryError(e.into()))
            }
        }
    }

    fn discard(&mut self) {
        if let Some(conn) = self.conn.take() {
            drop(deadpool_postgres::Client::take(conn));
        }
    }
}

impl Drop for PostgresTelemetryTransaction {
    fn drop(&mut self) {
        if self.conn.is_some() {
            warn!("telemetry transaction dropped while open, discarding session");
            self.discard();
        }
    }
}

#[async_trait]
impl TelemetryTransaction for PostgresTelemetryTransaction {
    async fn find_active_vehicle_for(&mut self, meter_id: &str) -> DomainResult<Option<String>> {
        active_vehicle_for(self.conn()?, meter_id).await
    }

    async fn find_active_meter_for(&mut self, vehicle_id: &str) -> DomainResult<Option<String>> {
        active_meter_for(self.conn()?, vehicle_id).await
    }

    async fn append_meter_history(&mut self, record: &MeterHistoryRecord) -> DomainResult<()> {
        let result = self
            .conn()?
            .execute(
                "INSERT INTO meter_history (id, meter_id, kwh_consumed_ac, voltage, current_a, device_timestamp, ingested_at, vehicle_id)
                 VALUES ($1, $2, $3, $4, $5, $6, $7, $8)",
                &[
                    &record.id,
                    &record.meter_id,
                    &record.kwh_consumed_ac,
                    &record.voltage,
                    &record.current_a,
                    &record.device_timestamp,
                    &record.ingested_at,
                    &record.vehicle_id,
                ],
            )
            .await;

        match result {
            Ok(_) => {
                debug!(record_id = %record.id, meter_id = %record.meter_id, "appended meter history");
                Ok(())
            }
            Err(e) if is_unique_violation(&e) => {
                Err(DomainError::DuplicateHistoryRecord(record.id.clone()))
            }
            Err(e) => Err(DomainError::RepositoryError(e.into())),
        }
    }

    async fn append_vehicle_history(&mut self, record: &VehicleHistoryRecord) -> DomainResult<()> {
        let result = self
            .conn()?
            .execute(
                "INSERT INTO vehicle_history (id, vehicle_id, soc_percent, kwh_delivered_dc, battery_temp_c, charge_power_kw, device_timestamp, ingested_at, meter_id)
                 VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)",
                &[
                    &record.id,
                    &record.vehicle_id,
                    &record.soc_percent,
                    &record.kwh_delivered_dc,
                    &record.battery_temp_c,
                    &record.charge_power_kw,
                    &record.device_timestamp,
                    &record.ingested_at,
                    &record.meter_id,
                ],
            )
            .await;

        match result {
            Ok(_) => {
                debug!(record_id = %record.id, vehicle_id = %record.vehicle_id, "appended vehicle history");
                Ok(())
            }
            Err(e) if is_unique_violation(&e) => {
                Err(DomainError::DuplicateHistoryRecord(record.id.clone()))
            }
            Err(e) => Err(DomainError::RepositoryError(e.into())),
        }
    }

    async fn upsert_meter_status(&mut self, upsert: &MeterStatusUpsert) -> DomainResult<MeterStatus> {
        upsert_meter_status(self.conn()?, upsert).await
    }

    async fn upsert_vehicle_status(
        &mut self,
        upsert: &VehicleStatusUpsert,
    ) -> DomainResult<VehicleStatus> {
        upsert_vehicle_status(self.conn()?, upsert).await
    }

    async fn commit(&mut self) -> DomainResult<()> {
        self.finish("COMMIT").await
    }

    async fn rollback(&mut self) -> DomainResult<()> {
        self.finish("ROLLBACK").await
    }
}
