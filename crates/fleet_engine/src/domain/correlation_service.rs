use crate::domain::with_storage_timeout;
use common::domain::{
    CorrelationLink, CorrelationRepository, DomainError, DomainResult, StatusRepository,
    StreamType,
};
use garde::Validate;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, instrument, warn};

#[derive(Debug, Clone, Validate)]
pub struct CorrelationPairInput {
    #[garde(length(min = 1, max = 64))]
    pub meter_id: String,
    #[garde(length(min = 1, max = 64))]
    pub vehicle_id: String,
}

/// Active peer and link history of one device
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CorrelationView {
    pub device_id: String,
    pub stream_type: StreamType,
    pub active_peer: Option<String>,
    pub links: Vec<CorrelationLink>,
}

/// Explicit meter/vehicle pairing.
///
/// Link changes are the only writes to the Correlation Store. After a change
/// the peer column of the affected status rows is refreshed best-effort:
/// failures there are logged and never undo the link change.
pub struct CorrelationService {
    correlation_repository: Arc<dyn CorrelationRepository>,
    status_repository: Arc<dyn StatusRepository>,
    storage_timeout: Duration,
}

impl CorrelationService {
    pub fn new(
        correlation_repository: Arc<dyn CorrelationRepository>,
        status_repository: Arc<dyn StatusRepository>,
        storage_timeout: Duration,
    ) -> Self {
        Self {
            correlation_repository,
            status_repository,
            storage_timeout,
        }
    }

    #[instrument(skip(self), fields(meter_id = %input.meter_id, vehicle_id = %input.vehicle_id))]
    pub async fn set_correlation(&self, input: CorrelationPairInput) -> DomainResult<CorrelationLink> {
        common::garde::validate_struct(&input)?;
        let CorrelationPairInput {
            meter_id,
            vehicle_id,
        } = input;

        // peers that lose their link once this one is active
        let previous_vehicle = self.active_vehicle_for(&meter_id).await?;
        let previous_meter = self.active_meter_for(&vehicle_id).await?;

        let link = with_storage_timeout(
            self.storage_timeout,
            "set_link",
            self.correlation_repository.set_link(&meter_id, &vehicle_id),
        )
        .await?;

        if let Some(old_vehicle) = previous_vehicle.filter(|v| *v != vehicle_id) {
            self.clear_vehicle_peer_if(&old_vehicle, &meter_id).await;
        }
        if let Some(old_meter) = previous_meter.filter(|m| *m != meter_id) {
            self.clear_meter_peer_if(&old_meter, &vehicle_id).await;
        }

        self.backfill_meter_peer(&meter_id, Some(vehicle_id.clone())).await;
        self.backfill_vehicle_peer(&vehicle_id, Some(meter_id.clone())).await;

        info!("correlation set");
        Ok(link)
    }

    #[instrument(skip(self), fields(meter_id = %input.meter_id, vehicle_id = %input.vehicle_id))]
    pub async fn deactivate_correlation(
        &self,
        input: CorrelationPairInput,
    ) -> DomainResult<CorrelationLink> {
        common::garde::validate_struct(&input)?;

        let link = with_storage_timeout(
            self.storage_timeout,
            "deactivate_link",
            self.correlation_repository
                .deactivate_link(&input.meter_id, &input.vehicle_id),
        )
        .await?
        .ok_or_else(|| DomainError::CorrelationLinkNotFound {
            meter_id: input.meter_id.clone(),
            vehicle_id: input.vehicle_id.clone(),
        })?;

        self.clear_meter_peer_if(&input.meter_id, &input.vehicle_id).await;
        self.clear_vehicle_peer_if(&input.vehicle_id, &input.meter_id).await;

        info!("correlation deactivated");
        Ok(link)
    }

    #[instrument(skip(self))]
    pub async fn get_correlation(
        &self,
        stream_type: StreamType,
        device_id: &str,
    ) -> DomainResult<CorrelationView> {
        let (active_peer, links) = match stream_type {
            StreamType::Meter => (
                self.active_vehicle_for(device_id).await?,
                with_storage_timeout(
                    self.storage_timeout,
                    "list_links_for_meter",
                    self.correlation_repository.list_links_for_meter(device_id),
                )
                .await?,
            ),
            StreamType::Vehicle => (
                self.active_meter_for(device_id).await?,
                with_storage_timeout(
                    self.storage_timeout,
                    "list_links_for_vehicle",
                    self.correlation_repository.list_links_for_vehicle(device_id),
                )
                .await?,
            ),
        };

        if links.is_empty() {
            return Err(DomainError::DeviceNotFound(device_id.to_string()));
        }

        Ok(CorrelationView {
            device_id: device_id.to_string(),
            stream_type,
            active_peer,
            links,
        })
    }

    pub(crate) async fn active_meter_for(&self, vehicle_id: &str) -> DomainResult<Option<String>> {
        with_storage_timeout(
            self.storage_timeout,
            "find_active_meter_for",
            self.correlation_repository.find_active_meter_for(vehicle_id),
        )
        .await
    }

    async fn active_vehicle_for(&self, meter_id: &str) -> DomainResult<Option<String>> {
        with_storage_timeout(
            self.storage_timeout,
            "find_active_vehicle_for",
            self.correlation_repository.find_active_vehicle_for(meter_id),
        )
        .await
    }

    async fn backfill_meter_peer(&self, meter_id: &str, vehicle_id: Option<String>) {
        let result = with_storage_timeout(
            self.storage_timeout,
            "set_meter_peer",
            self.status_repository.set_meter_peer(meter_id, vehicle_id),
        )
        .await;
        match result {
            Ok(true) => debug!(meter_id = %meter_id, "meter peer refreshed"),
            Ok(false) => debug!(meter_id = %meter_id, "no meter status yet, peer not back-filled"),
            Err(e) => warn!(meter_id = %meter_id, error = %e, "failed to refresh meter peer"),
        }
    }

    async fn backfill_vehicle_peer(&self, vehicle_id: &str, meter_id: Option<String>) {
        let result = with_storage_timeout(
            self.storage_timeout,
            "set_vehicle_peer",
            self.status_repository.set_vehicle_peer(vehicle_id, meter_id),
        )
        .await;
        match result {
            Ok(true) => debug!(vehicle_id = %vehicle_id, "vehicle peer refreshed"),
            Ok(false) => debug!(vehicle_id = %vehicle_id, "no vehicle status yet, peer not back-filled"),
            Err(e) => warn!(vehicle_id = %vehicle_id, error = %e, "failed to refresh vehicle peer"),
        }
    }

    /// Clear the meter's peer only while it still points at `vehicle_id`
    async fn clear_meter_peer_if(&self, meter_id: &str, vehicle_id: &str) {
        let current = with_storage_timeout(
            self.storage_timeout,
            "get_meter_status",
            self.status_repository.get_meter_status(meter_id),
        )
        .await;
        match current {
            Ok(Some(status)) if status.vehicle_id.as_deref() == Some(vehicle_id) => {
                self.backfill_meter_peer(meter_id, None).await;
            }
            Ok(_) => {}
            Err(e) => warn!(meter_id = %meter_id, error = %e, "failed to read meter status for peer cleanup"),
        }
    }

    /// Clear the vehicle's peer only while it still points at `meter_id`
    async fn clear_vehicle_peer_if(&self, vehicle_id: &str, meter_id: &str) {
        let current = with_storage_timeout(
            self.storage_timeout,
            "get_vehicle_status",
            self.status_repository.get_vehicle_status(vehicle_id),
        )
        .await;
        match current {
            Ok(Some(status)) if status.meter_id.as_deref() == Some(meter_id) => {
                self.backfill_vehicle_peer(vehicle_id, None).await;
            }
            Ok(_) => {}
            Err(e) => warn!(vehicle_id = %vehicle_id, error = %e, "failed to read vehicle status for peer cleanup"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use common::domain::{MockCorrelationRepository, MockStatusRepository};

    fn link(meter_id: &str, vehicle_id: &str, is_active: bool) -> CorrelationLink {
        let now = Utc::now();
        CorrelationLink {
            meter_id: meter_id.to_string(),
            vehicle_id: vehicle_id.to_string(),
            is_active,
            created_at: now,
            updated_at: now,
        }
    }

    fn pair(meter_id: &str, vehicle_id: &str) -> CorrelationPairInput {
        CorrelationPairInput {
            meter_id: meter_id.to_string(),
            vehicle_id: vehicle_id.to_string(),
        }
    }

    fn service(
        correlation: MockCorrelationRepository,
        status: MockStatusRepository,
    ) -> CorrelationService {
        CorrelationService::new(Arc::new(correlation), Arc::new(status), Duration::from_secs(5))
    }

    #[tokio::test]
    async fn test_set_correlation_backfills_both_status_rows() {
        let mut correlation = MockCorrelationRepository::new();
        correlation
            .expect_find_active_vehicle_for()
            .returning(|_| Ok(None));
        correlation
            .expect_find_active_meter_for()
            .returning(|_| Ok(None));
        correlation
            .expect_set_link()
            .withf(|meter_id: &str, vehicle_id: &str| meter_id == "M1" && vehicle_id == "V1")
            .times(1)
            .returning(|m, v| Ok(link(m, v, true)));

        let mut status = MockStatusRepository::new();
        status
            .expect_set_meter_peer()
            .withf(|meter_id: &str, vehicle_id: &Option<String>| {
                meter_id == "M1" && vehicle_id.as_deref() == Some("V1")
            })
            .times(1)
            .returning(|_, _| Ok(true));
        // vehicle has not reported yet
        status
            .expect_set_vehicle_peer()
            .times(1)
            .returning(|_, _| Ok(false));

        let created = service(correlation, status)
            .set_correlation(pair("M1", "V1"))
            .await
            .unwrap();
        assert!(created.is_active);
    }

    #[tokio::test]
    async fn test_backfill_failure_does_not_fail_link() {
        let mut correlation = MockCorrelationRepository::new();
        correlation
            .expect_find_active_vehicle_for()
            .returning(|_| Ok(None));
        correlation
            .expect_find_active_meter_for()
            .returning(|_| Ok(None));
        correlation
            .expect_set_link()
            .returning(|m, v| Ok(link(m, v, true)));

        let mut status = MockStatusRepository::new();
        status
            .expect_set_meter_peer()
            .returning(|_, _| Err(DomainError::RepositoryError(anyhow::anyhow!("timeout"))));
        status.expect_set_vehicle_peer().returning(|_, _| Ok(true));

        assert!(service(correlation, status)
            .set_correlation(pair("M1", "V1"))
            .await
            .is_ok());
    }

    #[tokio::test]
    async fn test_relinking_clears_stale_peer() {
        let mut correlation = MockCorrelationRepository::new();
        correlation
            .expect_find_active_vehicle_for()
            .returning(|_| Ok(Some("V1".to_string())));
        correlation
            .expect_find_active_meter_for()
            .returning(|_| Ok(None));
        correlation
            .expect_set_link()
            .returning(|m, v| Ok(link(m, v, true)));

        let mut status = MockStatusRepository::new();
        status.expect_get_vehicle_status().returning(|vehicle_id| {
            let now = Utc::now();
            Ok(Some(common::domain::VehicleStatus {
                vehicle_id: vehicle_id.to_string(),
                soc_percent: 40.0,
                kwh_delivered_dc: 0.0,
                battery_temp_c: 25.0,
                charge_power_kw: None,
                last_reading_at: now,
                daily_kwh_delivered: 0.0,
                meter_id: Some("M1".to_string()),
                state: common::domain::DeviceState::Idle,
                updated_at: now,
            }))
        });
        status
            .expect_set_vehicle_peer()
            .withf(|vehicle_id: &str, meter_id: &Option<String>| {
                vehicle_id == "V1" && meter_id.is_none()
            })
            .times(1)
            .returning(|_, _| Ok(true));
        status
            .expect_set_vehicle_peer()
            .withf(|vehicle_id: &str, _: &Option<String>| vehicle_id == "V2")
            .times(1)
            .returning(|_, _| Ok(true));
        status.expect_set_meter_peer().times(1).returning(|_, _| Ok(true));

        service(correlation, status)
            .set_correlation(pair("M1", "V2"))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_deactivate_unknown_link_is_not_found() {
        let mut correlation = MockCorrelationRepository::new();
        correlation
            .expect_deactivate_link()
            .returning(|_, _| Ok(None));

        let result = service(correlation, MockStatusRepository::new())
            .deactivate_correlation(pair("M1", "V9"))
            .await;
        assert!(matches!(
            result,
            Err(DomainError::CorrelationLinkNotFound { .. })
        ));
    }

    #[tokio::test]
    async fn test_empty_ids_rejected() {
        let result = service(MockCorrelationRepository::new(), MockStatusRepository::new())
            .set_correlation(pair("", "V1"))
            .await;
        assert!(matches!(result, Err(DomainError::ValidationError(_))));
    }

    #[tokio::test]
    async fn test_get_correlation_reports_active_peer_and_history() {
        let mut correlation = MockCorrelationRepository::new();
        correlation
            .expect_find_active_meter_for()
            .returning(|_| Ok(Some("M2".to_string())));
        correlation
            .expect_list_links_for_vehicle()
            .returning(|v| Ok(vec![link("M1", v, false), link("M2", v, true)]));

        let view = service(correlation, MockStatusRepository::new())
            .get_correlation(StreamType::Vehicle, "V1")
            .await
            .unwrap();
        assert_eq!(view.active_peer.as_deref(), Some("M2"));
        assert_eq!(view.links.len(), 2);
    }
}
