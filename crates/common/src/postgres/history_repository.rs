use crate::domain::{
    DomainError, DomainResult, HistoryRepository, MeterHistoryRecord, VehicleHistoryRecord,
};
use crate::postgres::rows::{
    meter_history_from_row, vehicle_history_from_row, METER_HISTORY_COLUMNS,
    VEHICLE_HISTORY_COLUMNS,
};
use crate::postgres::PostgresClient;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio_postgres::types::ToSql;
use tracing::{debug, instrument};

/// PostgreSQL implementation of HistoryRepository.
///
/// Scans hit the monthly partitions of `meter_history` / `vehicle_history`
/// through the `(device, device_timestamp)` range indexes, so the cost follows
/// the matched rows and the partitions covered by the window.
#[derive(Clone)]
pub struct PostgresHistoryRepository {
    client: PostgresClient,
}

impl PostgresHistoryRepository {
    pub fn new(client: PostgresClient) -> Self {
        Self { client }
    }

    async fn query_rows(
        &self,
        sql: &str,
        params: &[&(dyn ToSql + Sync)],
    ) -> DomainResult<Vec<tokio_postgres::Row>> {
        let conn = self
            .client
            .get_connection()
            .await
            .map_err(DomainError::RepositoryError)?;

        conn.query(sql, params)
            .await
            .map_err(|e| DomainError::RepositoryError(e.into()))
    }
}

#[async_trait]
impl HistoryRepository for PostgresHistoryRepository {
    #[instrument(skip(self), fields(meter_id = %meter_id))]
    async fn scan_meter_range(
        &self,
        meter_id: &str,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> DomainResult<Vec<MeterHistoryRecord>> {
        let sql = format!(
            "SELECT {} FROM meter_history
             WHERE meter_id = $1 AND device_timestamp BETWEEN $2 AND $3
             ORDER BY device_timestamp, id",
            METER_HISTORY_COLUMNS
        );
        let rows = self.query_rows(&sql, &[&meter_id, &from, &to]).await?;
        debug!(row_count = rows.len(), "scanned meter history");
        Ok(rows.iter().map(meter_history_from_row).collect())
    }

    #[instrument(skip(self), fields(vehicle_id = %vehicle_id))]
    async fn scan_meter_range_by_vehicle(
        &self,
        vehicle_id: &str,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> DomainResult<Vec<MeterHistoryRecord>> {
        let sql = format!(
            "SELECT {} FROM meter_history
             WHERE vehicle_id = $1 AND device_timestamp BETWEEN $2 AND $3
             ORDER BY device_timestamp, id",
            METER_HISTORY_COLUMNS
        );
        let rows = self.query_rows(&sql, &[&vehicle_id, &from, &to]).await?;
        debug!(row_count = rows.len(), "scanned meter history by vehicle tag");
        Ok(rows.iter().map(meter_history_from_row).collect())
    }

    #[instrument(skip(self), fields(vehicle_id = %vehicle_id))]
    async fn scan_vehicle_range(
        &self,
        vehicle_id: &str,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> DomainResult<Vec<VehicleHistoryRecord>> {
        let sql = format!(
            "SELECT {} FROM vehicle_history
             WHERE vehicle_id = $1 AND device_timestamp BETWEEN $2 AND $3
             ORDER BY device_timestamp, id",
            VEHICLE_HISTORY_COLUMNS
        );
        let rows = self.query_rows(&sql, &[&vehicle_id, &from, &to]).await?;
        debug!(row_count = rows.len(), "scanned vehicle history");
        Ok(rows.iter().map(vehicle_history_from_row).collect())
    }

    #[instrument(skip(self))]
    async fn scan_meter_window(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> DomainResult<Vec<MeterHistoryRecord>> {
        let sql = format!(
            "SELECT {} FROM meter_history
             WHERE device_timestamp BETWEEN $1 AND $2
             ORDER BY device_timestamp, id",
            METER_HISTORY_COLUMNS
        );
        let rows = self.query_rows(&sql, &[&from, &to]).await?;
        debug!(row_count = rows.len(), "scanned meter history window");
        Ok(rows.iter().map(meter_history_from_row).collect())
    }

    #[instrument(skip(self))]
    async fn scan_vehicle_window(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> DomainResult<Vec<VehicleHistoryRecord>> {
        let sql = format!(
            "SELECT {} FROM vehicle_history
             WHERE device_timestamp BETWEEN $1 AND $2
             ORDER BY device_timestamp, id",
            VEHICLE_HISTORY_COLUMNS
        );
        let rows = self.query_rows(&sql, &[&from, &to]).await?;
        debug!(row_count = rows.len(), "scanned vehicle history window");
        Ok(rows.iter().map(vehicle_history_from_row).collect())
    }
}
