use crate::domain::{
    DomainError, DomainResult, MeterStatus, MeterStatusUpsert, StatusRepository, VehicleStatus,
    VehicleStatusUpsert,
};
use crate::postgres::rows::{
    meter_status_from_row, vehicle_status_from_row, METER_STATUS_COLUMNS, VEHICLE_STATUS_COLUMNS,
};
use crate::postgres::PostgresClient;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tracing::{debug, instrument};

/// Conditional upsert of a meter row.
///
/// The `CASE` arms evaluate against the locked existing row, so concurrent
/// writers for one meter serialise on the row lock and each applies its own
/// increment exactly once. Older readings only refresh the peer.
pub(crate) const UPSERT_METER_STATUS_SQL: &str = "
INSERT INTO meter_status AS s
    (meter_id, kwh_consumed_ac, voltage, current_a, last_reading_at, daily_kwh_consumed, vehicle_id, state, updated_at)
VALUES ($1, $2, $3, $4, $5, $2, $6, $7, $8)
ON CONFLICT (meter_id) DO UPDATE SET
    daily_kwh_consumed = CASE
        WHEN EXCLUDED.last_reading_at < s.last_reading_at THEN s.daily_kwh_consumed
        WHEN (EXCLUDED.last_reading_at AT TIME ZONE 'UTC')::date > (s.last_reading_at AT TIME ZONE 'UTC')::date
            THEN EXCLUDED.kwh_consumed_ac
        WHEN EXCLUDED.kwh_consumed_ac >= s.kwh_consumed_ac
            THEN s.daily_kwh_consumed + (EXCLUDED.kwh_consumed_ac - s.kwh_consumed_ac)
        ELSE s.daily_kwh_consumed + EXCLUDED.kwh_consumed_ac
    END,
    kwh_consumed_ac = CASE WHEN EXCLUDED.last_reading_at < s.last_reading_at THEN s.kwh_consumed_ac ELSE EXCLUDED.kwh_consumed_ac END,
    voltage = CASE WHEN EXCLUDED.last_reading_at < s.last_reading_at THEN s.voltage ELSE EXCLUDED.voltage END,
    current_a = CASE WHEN EXCLUDED.last_reading_at < s.last_reading_at THEN s.current_a ELSE EXCLUDED.current_a END,
    state = CASE WHEN EXCLUDED.last_reading_at < s.last_reading_at THEN s.state ELSE EXCLUDED.state END,
    last_reading_at = GREATEST(s.last_reading_at, EXCLUDED.last_reading_at),
    vehicle_id = EXCLUDED.vehicle_id,
    updated_at = EXCLUDED.updated_at
RETURNING meter_id, kwh_consumed_ac, voltage, current_a, last_reading_at, daily_kwh_consumed, vehicle_id, state, updated_at";

/// Conditional upsert of a vehicle row; delivered energy is additive within a
/// UTC day, including readings that arrive late from the same day
pub(crate) const UPSERT_VEHICLE_STATUS_SQL: &str = "
INSERT INTO vehicle_status AS s
    (vehicle_id, soc_percent, kwh_delivered_dc, battery_temp_c, charge_power_kw, last_reading_at, daily_kwh_delivered, meter_id, state, updated_at)
VALUES ($1, $2, $3, $4, $5, $6, $3, $7, $8, $9)
ON CONFLICT (vehicle_id) DO UPDATE SET
    daily_kwh_delivered = CASE
        WHEN (EXCLUDED.last_reading_at AT TIME ZONE 'UTC')::date < (s.last_reading_at AT TIME ZONE 'UTC')::date
            THEN s.daily_kwh_delivered
        WHEN (EXCLUDED.last_reading_at AT TIME ZONE 'UTC')::date > (s.last_reading_at AT TIME ZONE 'UTC')::date
            THEN EXCLUDED.kwh_delivered_dc
        ELSE s.daily_kwh_delivered + EXCLUDED.kwh_delivered_dc
    END,
    soc_percent = CASE WHEN EXCLUDED.last_reading_at < s.last_reading_at THEN s.soc_percent ELSE EXCLUDED.soc_percent END,
    kwh_delivered_dc = CASE WHEN EXCLUDED.last_reading_at < s.last_reading_at THEN s.kwh_delivered_dc ELSE EXCLUDED.kwh_delivered_dc END,
    battery_temp_c = CASE WHEN EXCLUDED.last_reading_at < s.last_reading_at THEN s.battery_temp_c ELSE EXCLUDED.battery_temp_c END,
    charge_power_kw = CASE WHEN EXCLUDED.last_reading_at < s.last_reading_at THEN s.charge_power_kw ELSE EXCLUDED.charge_power_kw END,
    state = CASE WHEN EXCLUDED.last_reading_at < s.last_reading_at THEN s.state ELSE EXCLUDED.state END,
    last_reading_at = GREATEST(s.last_reading_at, EXCLUDED.last_reading_at),
    meter_id = EXCLUDED.meter_id,
    updated_at = EXCLUDED.updated_at
RETURNING vehicle_id, soc_percent, kwh_delivered_dc, battery_temp_c, charge_power_kw, last_reading_at, daily_kwh_delivered, meter_id, state, updated_at";

pub(crate) async fn upsert_meter_status(
    client: &tokio_postgres::Client,
    upsert: &MeterStatusUpsert,
) -> DomainResult<MeterStatus> {
    let row = client
        .query_one(
            UPSERT_METER_STATUS_SQL,
            &[
                &upsert.meter_id,
                &upsert.kwh_consumed_ac,
                &upsert.voltage,
                &upsert.current_a,
                &upsert.reading_at,
                &upsert.vehicle_id,
                &upsert.state.as_str(),
                &upsert.updated_at,
            ],
        )
        .await
        .map_err(|e| DomainError::RepositoryError(e.into()))?;

    meter_status_from_row(&row)
}

pub(crate) async fn upsert_vehicle_status(
    client: &tokio_postgres::Client,
    upsert: &VehicleStatusUpsert,
) -> DomainResult<VehicleStatus> {
    let row = client
        .query_one(
            UPSERT_VEHICLE_STATUS_SQL,
            &[
                &upsert.vehicle_id,
                &upsert.soc_percent,
                &upsert.kwh_delivered_dc,
                &upsert.battery_temp_c,
                &upsert.charge_power_kw,
                &upsert.reading_at,
                &upsert.meter_id,
                &upsert.state.as_str(),
                &upsert.updated_at,
            ],
        )
        .await
        .map_err(|e| DomainError::RepositoryError(e.into()))?;

    vehicle_status_from_row(&row)
}

/// PostgreSQL implementation of StatusRepository
#[derive(Clone)]
pub struct PostgresStatusRepository {
    client: PostgresClient,
}

impl PostgresStatusRepository {
    pub fn new(client: PostgresClient) -> Self {
        Self { client }
    }

    async fn connection(&self) -> DomainResult<deadpool_postgres::Client> {
        self.client
            .get_connection()
            .await
            .map_err(DomainError::RepositoryError)
    }
}

#[async_trait]
impl StatusRepository for PostgresStatusRepository {
    #[instrument(skip(self), fields(meter_id = %meter_id))]
    async fn get_meter_status(&self, meter_id: &str) -> DomainResult<Option<MeterStatus>> {
        let conn = self.connection().await?;
        let row = conn
            .query_opt(
                &format!("SELECT {} FROM meter_status WHERE meter_id = $1", METER_STATUS_COLUMNS),
                &[&meter_id],
            )
            .await
            .map_err(|e| DomainError::RepositoryError(e.into()))?;

        row.as_ref().map(meter_status_from_row).transpose()
    }

    #[instrument(skip(self), fields(vehicle_id = %vehicle_id))]
    async fn get_vehicle_status(&self, vehicle_id: &str) -> DomainResult<Option<VehicleStatus>> {
        let conn = self.connection().await?;
        let row = conn
            .query_opt(
                &format!(
                    "SELECT {} FROM vehicle_status WHERE vehicle_id = $1",
                    VEHICLE_STATUS_COLUMNS
                ),
                &[&vehicle_id],
            )
            .await
            .map_err(|e| DomainError::RepositoryError(e.into()))?;

        row.as_ref().map(vehicle_status_from_row).transpose()
    }

    #[instrument(skip(self))]
    async fn list_meter_statuses_since(&self, cutoff: DateTime<Utc>) -> DomainResult<Vec<MeterStatus>> {
        let conn = self.connection().await?;
        let rows = conn
            .query(
                &format!(
                    "SELECT {} FROM meter_status WHERE last_reading_at >= $1 ORDER BY meter_id",
                    METER_STATUS_COLUMNS
                ),
                &[&cutoff],
            )
            .await
            .map_err(|e| DomainError::RepositoryError(e.into()))?;

        debug!(row_count = rows.len(), "listed fresh meter statuses");
        rows.iter().map(meter_status_from_row).collect()
    }

    #[instrument(skip(self))]
    async fn list_vehicle_statuses_since(
        &self,
        cutoff: DateTime<Utc>,
    ) -> DomainResult<Vec<VehicleStatus>> {
        let conn = self.connection().await?;
        let rows = conn
            .query(
                &format!(
                    "SELECT {} FROM vehicle_status WHERE last_reading_at >= $1 ORDER BY vehicle_id",
                    VEHICLE_STATUS_COLUMNS
                ),
                &[&cutoff],
            )
            .await
            .map_err(|e| DomainError::RepositoryError(e.into()))?;

        debug!(row_count = rows.len(), "listed fresh vehicle statuses");
        rows.iter().map(vehicle_status_from_row).collect()
    }

    #[instrument(skip(self))]
    async fn list_vehicles_with_temperature_at_least(
        &self,
        min_temp_c: f64,
    ) -> DomainResult<Vec<VehicleStatus>> {
        let conn = self.connection().await?;
        let rows = conn
            .query(
                &format!(
                    "SELECT {} FROM vehicle_status WHERE battery_temp_c >= $1
                     ORDER BY battery_temp_c DESC, vehicle_id",
                    VEHICLE_STATUS_COLUMNS
                ),
                &[&min_temp_c],
            )
            .await
            .map_err(|e| DomainError::RepositoryError(e.into()))?;

        rows.iter().map(vehicle_status_from_row).collect()
    }

    #[instrument(skip(self), fields(meter_id = %meter_id))]
    async fn set_meter_peer(&self, meter_id: &str, vehicle_id: Option<String>) -> DomainResult<bool> {
        let conn = self.connection().await?;
        let updated = conn
            .execute(
                "UPDATE meter_status SET vehicle_id = $2, updated_at = $3 WHERE meter_id = $1",
                &[&meter_id, &vehicle_id, &Utc::now()],
            )
            .await
            .map_err(|e| DomainError::RepositoryError(e.into()))?;

        Ok(updated > 0)
    }

    #[instrument(skip(self), fields(vehicle_id = %vehicle_id))]
    async fn set_vehicle_peer(&self, vehicle_id: &str, meter_id: Option<String>) -> DomainResult<bool> {
        let conn = self.connection().await?;
        let updated = conn
            .execute(
                "UPDATE vehicle_status SET meter_id = $2, updated_at = $3 WHERE vehicle_id = $1",
                &[&vehicle_id, &meter_id, &Utc::now()],
            )
            .await
            .map_err(|e| DomainError::RepositoryError(e.into()))?;

        Ok(updated > 0)
    }
}
