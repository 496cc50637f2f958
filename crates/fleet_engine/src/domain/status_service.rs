use crate::domain::with_storage_timeout;
use chrono::Utc;
use common::domain::{
    DeviceState, DeviceStatus, DomainError, DomainResult, MeterStatus, StatusRepository,
    TemperatureLevel, VehicleStatus, TEMP_ELEVATED_C,
};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, instrument, warn};

/// Vehicle whose latest battery temperature is elevated or critical
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TemperatureWarning {
    pub level: TemperatureLevel,
    pub status: VehicleStatus,
}

/// Live device state read straight from the Hot Store.
///
/// Offline classification is applied at read time from `last_reading_at`
/// and never written back.
pub struct StatusService {
    status_repository: Arc<dyn StatusRepository>,
    freshness: chrono::Duration,
    storage_timeout: Duration,
}

impl StatusService {
    pub fn new(
        status_repository: Arc<dyn StatusRepository>,
        freshness: chrono::Duration,
        storage_timeout: Duration,
    ) -> Self {
        Self {
            status_repository,
            freshness,
            storage_timeout,
        }
    }

    #[instrument(skip(self), fields(meter_id = %meter_id))]
    pub async fn get_meter_status(&self, meter_id: &str) -> DomainResult<MeterStatus> {
        let status = with_storage_timeout(
            self.storage_timeout,
            "get_meter_status",
            self.status_repository.get_meter_status(meter_id),
        )
        .await?
        .ok_or_else(|| DomainError::DeviceNotFound(meter_id.to_string()))?;

        Ok(status.observed(Utc::now(), self.freshness))
    }

    #[instrument(skip(self), fields(vehicle_id = %vehicle_id))]
    pub async fn get_vehicle_status(&self, vehicle_id: &str) -> DomainResult<VehicleStatus> {
        let status = with_storage_timeout(
            self.storage_timeout,
            "get_vehicle_status",
            self.status_repository.get_vehicle_status(vehicle_id),
        )
        .await?
        .ok_or_else(|| DomainError::DeviceNotFound(vehicle_id.to_string()))?;

        Ok(status.observed(Utc::now(), self.freshness))
    }

    /// Status of a device of either kind; a meter wins if both kinds share the id
    #[instrument(skip(self), fields(device_id = %device_id))]
    pub async fn get_status(&self, device_id: &str) -> DomainResult<DeviceStatus> {
        let (meter, vehicle) = tokio::try_join!(
            with_storage_timeout(
                self.storage_timeout,
                "get_meter_status",
                self.status_repository.get_meter_status(device_id),
            ),
            with_storage_timeout(
                self.storage_timeout,
                "get_vehicle_status",
                self.status_repository.get_vehicle_status(device_id),
            ),
        )?;

        let now = Utc::now();
        match (meter, vehicle) {
            (Some(meter), vehicle) => {
                if vehicle.is_some() {
                    warn!("device id is used by both a meter and a vehicle, returning the meter");
                }
                Ok(DeviceStatus::Meter(meter.observed(now, self.freshness)))
            }
            (None, Some(vehicle)) => Ok(DeviceStatus::Vehicle(vehicle.observed(now, self.freshness))),
            (None, None) => Err(DomainError::DeviceNotFound(device_id.to_string())),
        }
    }

    /// Every meter and vehicle that reported within the freshness threshold
    #[instrument(skip(self))]
    pub async fn list_online_devices(&self) -> DomainResult<Vec<DeviceStatus>> {
        let now = Utc::now();
        let cutoff = now - self.freshness;

        let (meters, vehicles) = tokio::try_join!(
            with_storage_timeout(
                self.storage_timeout,
                "list_meter_statuses_since",
                self.status_repository.list_meter_statuses_since(cutoff),
            ),
            with_storage_timeout(
                self.storage_timeout,
                "list_vehicle_statuses_since",
                self.status_repository.list_vehicle_statuses_since(cutoff),
            ),
        )?;

        let devices: Vec<DeviceStatus> = meters
            .into_iter()
            .map(|m| DeviceStatus::Meter(m.observed(now, self.freshness)))
            .chain(
                vehicles
                    .into_iter()
                    .map(|v| DeviceStatus::Vehicle(v.observed(now, self.freshness))),
            )
            .filter(|d| d.state() != DeviceState::Offline)
            .collect();

        debug!(online = devices.len(), "listed online devices");
        Ok(devices)
    }

    #[instrument(skip(self))]
    pub async fn list_charging_vehicles(&self) -> DomainResult<Vec<VehicleStatus>> {
        let now = Utc::now();
        let vehicles = with_storage_timeout(
            self.storage_timeout,
            "list_vehicle_statuses_since",
            self.status_repository
                .list_vehicle_statuses_since(now - self.freshness),
        )
        .await?;

        Ok(vehicles
            .into_iter()
            .map(|v| v.observed(now, self.freshness))
            .filter(|v| v.state == DeviceState::Charging)
            .collect())
    }

    /// Fresh vehicles at or above the elevated temperature, hottest first.
    /// A vehicle that went offline no longer raises a warning.
    #[instrument(skip(self))]
    pub async fn list_temp_warnings(&self) -> DomainResult<Vec<TemperatureWarning>> {
        let now = Utc::now();
        let cutoff = now - self.freshness;
        let vehicles = with_storage_timeout(
            self.storage_timeout,
            "list_vehicles_with_temperature_at_least",
            self.status_repository
                .list_vehicles_with_temperature_at_least(TEMP_ELEVATED_C),
        )
        .await?;

        Ok(vehicles
            .into_iter()
            .filter(|v| v.last_reading_at >= cutoff)
            .map(|v| {
                let status = v.observed(now, self.freshness);
                TemperatureWarning {
                    level: status.temperature_level(),
                    status,
                }
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::DateTime;
    use common::domain::MockStatusRepository;

    fn vehicle(id: &str, last_reading_at: DateTime<Utc>, state: DeviceState, temp: f64) -> VehicleStatus {
        VehicleStatus {
            vehicle_id: id.to_string(),
            soc_percent: 60.0,
            kwh_delivered_dc: 1.0,
            battery_temp_c: temp,
            charge_power_kw: Some(11.0),
            last_reading_at,
            daily_kwh_delivered: 4.0,
            meter_id: None,
            state,
            updated_at: last_reading_at,
        }
    }

    fn meter(id: &str, last_reading_at: DateTime<Utc>) -> MeterStatus {
        MeterStatus {
            meter_id: id.to_string(),
            kwh_consumed_ac: 12.0,
            voltage: 240.0,
            current_a: None,
            last_reading_at,
            daily_kwh_consumed: 12.0,
            vehicle_id: None,
            state: DeviceState::Online,
            updated_at: last_reading_at,
        }
    }

    fn service(repo: MockStatusRepository) -> StatusService {
        StatusService::new(
            Arc::new(repo),
            chrono::Duration::minutes(5),
            Duration::from_secs(5),
        )
    }

    #[tokio::test]
    async fn test_stale_status_reads_offline() {
        let stale_at = Utc::now() - chrono::Duration::minutes(30);
        let mut repo = MockStatusRepository::new();
        repo.expect_get_vehicle_status()
            .returning(move |id| Ok(Some(vehicle(id, stale_at, DeviceState::Charging, 30.0))));

        let status = service(repo).get_vehicle_status("V1").await.unwrap();
        assert_eq!(status.state, DeviceState::Offline);
    }

    #[tokio::test]
    async fn test_get_status_not_found() {
        let mut repo = MockStatusRepository::new();
        repo.expect_get_meter_status().returning(|_| Ok(None));
        repo.expect_get_vehicle_status().returning(|_| Ok(None));

        let result = service(repo).get_status("X1").await;
        assert!(matches!(result, Err(DomainError::DeviceNotFound(id)) if id == "X1"));
    }

    #[tokio::test]
    async fn test_get_status_finds_vehicle() {
        let now = Utc::now();
        let mut repo = MockStatusRepository::new();
        repo.expect_get_meter_status().returning(|_| Ok(None));
        repo.expect_get_vehicle_status()
            .returning(move |id| Ok(Some(vehicle(id, now, DeviceState::Idle, 20.0))));

        let status = service(repo).get_status("V1").await.unwrap();
        assert_eq!(status.device_id(), "V1");
        assert_eq!(status.state(), DeviceState::Idle);
    }

    #[tokio::test]
    async fn test_online_and_charging_lists() {
        let now = Utc::now();
        let mut repo = MockStatusRepository::new();
        repo.expect_list_meter_statuses_since()
            .returning(move |_| Ok(vec![meter("M1", now)]));
        repo.expect_list_vehicle_statuses_since().returning(move |_| {
            Ok(vec![
                vehicle("V1", now, DeviceState::Charging, 30.0),
                vehicle("V2", now, DeviceState::Idle, 30.0),
            ])
        });

        let service = service(repo);
        let online = service.list_online_devices().await.unwrap();
        assert_eq!(online.len(), 3);

        let charging = service.list_charging_vehicles().await.unwrap();
        assert_eq!(charging.len(), 1);
        assert_eq!(charging[0].vehicle_id, "V1");
    }

    #[tokio::test]
    async fn test_temperature_warnings_carry_level() {
        let now = Utc::now();
        let mut repo = MockStatusRepository::new();
        repo.expect_list_vehicles_with_temperature_at_least()
            .withf(|min: &f64| *min == TEMP_ELEVATED_C)
            .returning(move |_| {
                Ok(vec![
                    vehicle("V2", now, DeviceState::Charging, 58.0),
                    vehicle("V1", now, DeviceState::Idle, 46.5),
                ])
            });

        let warnings = service(repo).list_temp_warnings().await.unwrap();
        assert_eq!(warnings[0].level, TemperatureLevel::Critical);
        assert_eq!(warnings[1].level, TemperatureLevel::Elevated);
    }

    #[tokio::test]
    async fn test_temperature_warnings_skip_offline_vehicles() {
        let now = Utc::now();
        let last_week = now - chrono::Duration::days(7);
        let mut repo = MockStatusRepository::new();
        repo.expect_list_vehicles_with_temperature_at_least()
            .returning(move |_| {
                Ok(vec![
                    vehicle("V9", last_week, DeviceState::Charging, 61.0),
                    vehicle("V1", now, DeviceState::Idle, 46.5),
                ])
            });

        let warnings = service(repo).list_temp_warnings().await.unwrap();
        assert_eq!(warnings.len(), 1);
        assert_eq!(warnings[0].status.vehicle_id, "V1");
    }
}
