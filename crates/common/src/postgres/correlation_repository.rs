use crate::domain::{
    pick_canonical_link, CorrelationLink, CorrelationRepository, DomainError, DomainResult,
};
use crate::postgres::rows::{is_unique_violation, link_from_row, LINK_COLUMNS};
use crate::postgres::PostgresClient;
use async_trait::async_trait;
use chrono::Utc;
use tracing::{debug, info, instrument};

pub(crate) async fn active_vehicle_for(
    client: &tokio_postgres::Client,
    meter_id: &str,
) -> DomainResult<Option<String>> {
    let rows = client
        .query(
            &format!(
                "SELECT {} FROM correlation_links WHERE meter_id = $1 AND is_active",
                LINK_COLUMNS
            ),
            &[&meter_id],
        )
        .await
        .map_err(|e| DomainError::RepositoryError(e.into()))?;

    let links = rows.iter().map(link_from_row).collect();
    Ok(pick_canonical_link(meter_id, links).map(|link| link.vehicle_id))
}

pub(crate) async fn active_meter_for(
    client: &tokio_postgres::Client,
    vehicle_id: &str,
) -> DomainResult<Option<String>> {
    let rows = client
        .query(
            &format!(
                "SELECT {} FROM correlation_links WHERE vehicle_id = $1 AND is_active",
                LINK_COLUMNS
            ),
            &[&vehicle_id],
        )
        .await
        .map_err(|e| DomainError::RepositoryError(e.into()))?;

    let links = rows.iter().map(link_from_row).collect();
    Ok(pick_canonical_link(vehicle_id, links).map(|link| link.meter_id))
}

/// PostgreSQL implementation of CorrelationRepository.
///
/// Partial unique indexes on `correlation_links` keep at most one active link
/// per meter and per vehicle.
#[derive(Clone)]
pub struct PostgresCorrelationRepository {
    client: PostgresClient,
}

impl PostgresCorrelationRepository {
    pub fn new(client: PostgresClient) -> Self {
        Self { client }
    }
}

#[async_trait]
impl CorrelationRepository for PostgresCorrelationRepository {
    #[instrument(skip(self), fields(meter_id = %meter_id, vehicle_id = %vehicle_id))]
    async fn set_link(&self, meter_id: &str, vehicle_id: &str) -> DomainResult<CorrelationLink> {
        let mut conn = self
            .client
            .get_connection()
            .await
            .map_err(DomainError::RepositoryError)?;

        let transaction = conn
            .transaction()
            .await
            .map_err(|e| DomainError::RepositoryError(e.into()))?;

        let now = Utc::now();

        // Retire any other active link of either device first
        let retired = transaction
            .execute(
                "UPDATE correlation_links SET is_active = FALSE, updated_at = $3
                 WHERE is_active
                   AND ((meter_id = $1 AND vehicle_id <> $2) OR (vehicle_id = $2 AND meter_id <> $1))",
                &[&meter_id, &vehicle_id, &now],
            )
            .await
            .map_err(|e| DomainError::RepositoryError(e.into()))?;

        let result = transaction
            .query_one(
                &format!(
                    "INSERT INTO correlation_links (meter_id, vehicle_id, is_active, created_at, updated_at)
                     VALUES ($1, $2, TRUE, $3, $3)
                     ON CONFLICT (meter_id, vehicle_id)
                     DO UPDATE SET is_active = TRUE, updated_at = EXCLUDED.updated_at
                     RETURNING {}",
                    LINK_COLUMNS
                ),
                &[&meter_id, &vehicle_id, &now],
            )
            .await;

        let row = match result {
            Ok(row) => row,
            Err(e) if is_unique_violation(&e) => {
                return Err(DomainError::CorrelationConflict {
                    meter_id: meter_id.to_string(),
                    vehicle_id: vehicle_id.to_string(),
                });
            }
            Err(e) => return Err(DomainError::RepositoryError(e.into())),
        };

        transaction
            .commit()
            .await
            .map_err(|e| {
                if is_unique_violation(&e) {
                    DomainError::CorrelationConflict {
                        meter_id: meter_id.to_string(),
                        vehicle_id: vehicle_id.to_string(),
                    }
                } else {
                    DomainError::RepositoryError(e.into())
                }
            })?;

        info!(retired_links = retired, "correlation link activated");
        Ok(link_from_row(&row))
    }

    #[instrument(skip(self), fields(meter_id = %meter_id, vehicle_id = %vehicle_id))]
    async fn deactivate_link(
        &self,
        meter_id: &str,
        vehicle_id: &str,
    ) -> DomainResult<Option<CorrelationLink>> {
        let conn = self
            .client
            .get_connection()
            .await
            .map_err(DomainError::RepositoryError)?;

        let row = conn
            .query_opt(
                &format!(
                    "UPDATE correlation_links SET is_active = FALSE, updated_at = $3
                     WHERE meter_id = $1 AND vehicle_id = $2
                     RETURNING {}",
                    LINK_COLUMNS
                ),
                &[&meter_id, &vehicle_id, &Utc::now()],
            )
            .await
            .map_err(|e| DomainError::RepositoryError(e.into()))?;

        debug!(found = row.is_some(), "correlation link deactivation");
        Ok(row.as_ref().map(link_from_row))
    }

    #[instrument(skip(self), fields(meter_id = %meter_id))]
    async fn find_active_vehicle_for(&self, meter_id: &str) -> DomainResult<Option<String>> {
        let conn = self
            .client
            .get_connection()
            .await
            .map_err(DomainError::RepositoryError)?;

        active_vehicle_for(&conn, meter_id).await
    }

    #[instrument(skip(self), fields(vehicle_id = %vehicle_id))]
    async fn find_active_meter_for(&self, vehicle_id: &str) -> DomainResult<Option<String>> {
        let conn = self
            .client
            .get_connection()
            .await
            .map_err(DomainError::RepositoryError)?;

        active_meter_for(&conn, vehicle_id).await
    }

    #[instrument(skip(self), fields(meter_id = %meter_id))]
    async fn list_links_for_meter(&self, meter_id: &str) -> DomainResult<Vec<CorrelationLink>> {
        let conn = self
            .client
            .get_connection()
            .await
            .map_err(DomainError::RepositoryError)?;

        let rows = conn
            .query(
                &format!(
                    "SELECT {} FROM correlation_links WHERE meter_id = $1
                     ORDER BY created_at, vehicle_id",
                    LINK_COLUMNS
                ),
                &[&meter_id],
            )
            .await
            .map_err(|e| DomainError::RepositoryError(e.into()))?;

        Ok(rows.iter().map(link_from_row).collect())
    }

    #[instrument(skip(self), fields(vehicle_id = %vehicle_id))]
    async fn list_links_for_vehicle(&self, vehicle_id: &str) -> DomainResult<Vec<CorrelationLink>> {
        let conn = self
            .client
            .get_connection()
            .await
            .map_err(DomainError::RepositoryError)?;

        let rows = conn
            .query(
                &format!(
                    "SELECT {} FROM correlation_links WHERE vehicle_id = $1
                     ORDER BY created_at, meter_id",
                    LINK_COLUMNS
                ),
                &[&vehicle_id],
            )
            .await
            .map_err(|e| DomainError::RepositoryError(e.into()))?;

        Ok(rows.iter().map(link_from_row).collect())
    }

    #[instrument(skip(self))]
    async fn list_active_links(&self) -> DomainResult<Vec<CorrelationLink>> {
        let conn = self
            .client
            .get_connection()
            .await
            .map_err(DomainError::RepositoryError)?;

        let rows = conn
            .query(
                &format!(
                    "SELECT {} FROM correlation_links WHERE is_active
                     ORDER BY created_at, meter_id, vehicle_id",
                    LINK_COLUMNS
                ),
                &[],
            )
            .await
            .map_err(|e| DomainError::RepositoryError(e.into()))?;

        Ok(rows.iter().map(link_from_row).collect())
    }
}
