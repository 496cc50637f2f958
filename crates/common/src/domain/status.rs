use crate::domain::reading::{register_increment, utc_day, MeterReading, StreamType, VehicleReading};
use crate::domain::result::{DomainError, DomainResult};
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Battery temperature at which a vehicle is reported as running warm
pub const TEMP_ELEVATED_C: f64 = 45.0;

/// Battery temperature at which a vehicle is reported as critical
pub const TEMP_CRITICAL_C: f64 = 55.0;

/// Derived live classification of a device
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeviceState {
    Online,
    Charging,
    Idle,
    Offline,
}

impl DeviceState {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeviceState::Online => "online",
            DeviceState::Charging => "charging",
            DeviceState::Idle => "idle",
            DeviceState::Offline => "offline",
        }
    }

    pub fn classify_meter(reading_at: DateTime<Utc>, now: DateTime<Utc>, freshness: Duration) -> Self {
        if is_stale(reading_at, now, freshness) {
            DeviceState::Offline
        } else {
            DeviceState::Online
        }
    }

    pub fn classify_vehicle(reading: &VehicleReading, now: DateTime<Utc>, freshness: Duration) -> Self {
        if is_stale(reading.timestamp, now, freshness) {
            DeviceState::Offline
        } else if reading.is_charging() {
            DeviceState::Charging
        } else {
            DeviceState::Idle
        }
    }
}

impl fmt::Display for DeviceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DeviceState {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "online" => Ok(DeviceState::Online),
            "charging" => Ok(DeviceState::Charging),
            "idle" => Ok(DeviceState::Idle),
            "offline" => Ok(DeviceState::Offline),
            other => Err(DomainError::RepositoryError(anyhow::anyhow!(
                "unknown device state: {}",
                other
            ))),
        }
    }
}

fn is_stale(reading_at: DateTime<Utc>, now: DateTime<Utc>, freshness: Duration) -> bool {
    now - reading_at > freshness
}

/// Battery temperature band of a vehicle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TemperatureLevel {
    Normal,
    Elevated,
    Critical,
}

impl TemperatureLevel {
    pub fn of(temp_c: f64) -> Self {
        if temp_c >= TEMP_CRITICAL_C {
            TemperatureLevel::Critical
        } else if temp_c >= TEMP_ELEVATED_C {
            TemperatureLevel::Elevated
        } else {
            TemperatureLevel::Normal
        }
    }
}

/// Current state of a meter (one row per meter)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MeterStatus {
    pub meter_id: String,
    pub kwh_consumed_ac: f64,
    pub voltage: f64,
    pub current_a: Option<f64>,
    pub last_reading_at: DateTime<Utc>,
    pub daily_kwh_consumed: f64,
    pub vehicle_id: Option<String>,
    pub state: DeviceState,
    pub updated_at: DateTime<Utc>,
}

/// Current state of a vehicle (one row per vehicle)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VehicleStatus {
    pub vehicle_id: String,
    pub soc_percent: f64,
    pub kwh_delivered_dc: f64,
    pub battery_temp_c: f64,
    pub charge_power_kw: Option<f64>,
    pub last_reading_at: DateTime<Utc>,
    pub daily_kwh_delivered: f64,
    pub meter_id: Option<String>,
    pub state: DeviceState,
    pub updated_at: DateTime<Utc>,
}

impl MeterStatus {
    /// Result of applying an upsert on top of the current row.
    ///
    /// Mirrors the conditional `ON CONFLICT` update of the PostgreSQL store.
    pub fn apply(current: Option<&MeterStatus>, upsert: &MeterStatusUpsert) -> MeterStatus {
        let Some(current) = current else {
            return MeterStatus {
                meter_id: upsert.meter_id.clone(),
                kwh_consumed_ac: upsert.kwh_consumed_ac,
                voltage: upsert.voltage,
                current_a: upsert.current_a,
                last_reading_at: upsert.reading_at,
                daily_kwh_consumed: upsert.kwh_consumed_ac,
                vehicle_id: upsert.vehicle_id.clone(),
                state: upsert.state,
                updated_at: upsert.updated_at,
            };
        };

        if upsert.reading_at < current.last_reading_at {
            return MeterStatus {
                vehicle_id: upsert.vehicle_id.clone(),
                updated_at: upsert.updated_at,
                ..current.clone()
            };
        }

        let increment = register_increment(
            Some((current.last_reading_at, current.kwh_consumed_ac)),
            upsert.reading_at,
            upsert.kwh_consumed_ac,
        );
        let daily_kwh_consumed = if utc_day(upsert.reading_at) > utc_day(current.last_reading_at) {
            increment
        } else {
            current.daily_kwh_consumed + increment
        };

        MeterStatus {
            meter_id: current.meter_id.clone(),
            kwh_consumed_ac: upsert.kwh_consumed_ac,
            voltage: upsert.voltage,
            current_a: upsert.current_a,
            last_reading_at: upsert.reading_at,
            daily_kwh_consumed,
            vehicle_id: upsert.vehicle_id.clone(),
            state: upsert.state,
            updated_at: upsert.updated_at,
        }
    }

    /// Status as observed at `now`; stale rows read as offline
    pub fn observed(mut self, now: DateTime<Utc>, freshness: Duration) -> Self {
        if is_stale(self.last_reading_at, now, freshness) {
            self.state = DeviceState::Offline;
        }
        self
    }
}

impl VehicleStatus {
    /// Result of applying an upsert on top of the current row.
    ///
    /// Mirrors the conditional `ON CONFLICT` update of the PostgreSQL store.
    pub fn apply(current: Option<&VehicleStatus>, upsert: &VehicleStatusUpsert) -> VehicleStatus {
        let Some(current) = current else {
            return VehicleStatus {
                vehicle_id: upsert.vehicle_id.clone(),
                soc_percent: upsert.soc_percent,
                kwh_delivered_dc: upsert.kwh_delivered_dc,
                battery_temp_c: upsert.battery_temp_c,
                charge_power_kw: upsert.charge_power_kw,
                last_reading_at: upsert.reading_at,
                daily_kwh_delivered: upsert.kwh_delivered_dc,
                meter_id: upsert.meter_id.clone(),
                state: upsert.state,
                updated_at: upsert.updated_at,
            };
        };

        // late same-day energy still counts; latest fields stay untouched
        if upsert.reading_at < current.last_reading_at {
            let daily_kwh_delivered = if utc_day(upsert.reading_at) == utc_day(current.last_reading_at) {
                current.daily_kwh_delivered + upsert.kwh_delivered_dc
            } else {
                current.daily_kwh_delivered
            };
            return VehicleStatus {
                daily_kwh_delivered,
                meter_id: upsert.meter_id.clone(),
                updated_at: upsert.updated_at,
                ..current.clone()
            };
        }

        let daily_kwh_delivered = if utc_day(upsert.reading_at) > utc_day(current.last_reading_at) {
            upsert.kwh_delivered_dc
        } else {
            current.daily_kwh_delivered + upsert.kwh_delivered_dc
        };

        VehicleStatus {
            vehicle_id: current.vehicle_id.clone(),
            soc_percent: upsert.soc_percent,
            kwh_delivered_dc: upsert.kwh_delivered_dc,
            battery_temp_c: upsert.battery_temp_c,
            charge_power_kw: upsert.charge_power_kw,
            last_reading_at: upsert.reading_at,
            daily_kwh_delivered,
            meter_id: upsert.meter_id.clone(),
            state: upsert.state,
            updated_at: upsert.updated_at,
        }
    }

    /// Status as observed at `now`; stale rows read as offline
    pub fn observed(mut self, now: DateTime<Utc>, freshness: Duration) -> Self {
        if is_stale(self.last_reading_at, now, freshness) {
            self.state = DeviceState::Offline;
        }
        self
    }

    pub fn temperature_level(&self) -> TemperatureLevel {
        TemperatureLevel::of(self.battery_temp_c)
    }
}

/// Status of either device kind
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "stream_type", rename_all = "snake_case")]
pub enum DeviceStatus {
    Meter(MeterStatus),
    Vehicle(VehicleStatus),
}

impl DeviceStatus {
    pub fn stream_type(&self) -> StreamType {
        match self {
            DeviceStatus::Meter(_) => StreamType::Meter,
            DeviceStatus::Vehicle(_) => StreamType::Vehicle,
        }
    }

    pub fn device_id(&self) -> &str {
        match self {
            DeviceStatus::Meter(m) => &m.meter_id,
            DeviceStatus::Vehicle(v) => &v.vehicle_id,
        }
    }

    pub fn state(&self) -> DeviceState {
        match self {
            DeviceStatus::Meter(m) => m.state,
            DeviceStatus::Vehicle(v) => v.state,
        }
    }
}

/// Values written to the meter status row for one reading
#[derive(Debug, Clone, PartialEq)]
pub struct MeterStatusUpsert {
    pub meter_id: String,
    pub kwh_consumed_ac: f64,
    pub voltage: f64,
    pub current_a: Option<f64>,
    pub reading_at: DateTime<Utc>,
    pub vehicle_id: Option<String>,
    pub state: DeviceState,
    pub updated_at: DateTime<Utc>,
}

impl MeterStatusUpsert {
    pub fn from_reading(
        reading: &MeterReading,
        vehicle_id: Option<String>,
        now: DateTime<Utc>,
        freshness: Duration,
    ) -> Self {
        Self {
            meter_id: reading.meter_id.clone(),
            kwh_consumed_ac: reading.kwh_consumed_ac,
            voltage: reading.voltage,
            current_a: reading.current_a,
            reading_at: reading.timestamp,
            vehicle_id,
            state: DeviceState::classify_meter(reading.timestamp, now, freshness),
            updated_at: now,
        }
    }
}

/// Values written to the vehicle status row for one reading
#[derive(Debug, Clone, PartialEq)]
pub struct VehicleStatusUpsert {
    pub vehicle_id: String,
    pub soc_percent: f64,
    pub kwh_delivered_dc: f64,
    pub battery_temp_c: f64,
    pub charge_power_kw: Option<f64>,
    pub reading_at: DateTime<Utc>,
    pub meter_id: Option<String>,
    pub state: DeviceState,
    pub updated_at: DateTime<Utc>,
}

impl VehicleStatusUpsert {
    pub fn from_reading(
        reading: &VehicleReading,
        meter_id: Option<String>,
        now: DateTime<Utc>,
        freshness: Duration,
    ) -> Self {
        Self {
            vehicle_id: reading.vehicle_id.clone(),
            soc_percent: reading.soc_percent,
            kwh_delivered_dc: reading.kwh_delivered_dc,
            battery_temp_c: reading.battery_temp_c,
            charge_power_kw: reading.charge_power_kw,
            reading_at: reading.timestamp,
            meter_id,
            state: DeviceState::classify_vehicle(reading, now, freshness),
            updated_at: now,
        }
    }
}

/// Read side of the Hot Store plus peer back-fill
#[cfg_attr(any(test, feature = "testing"), mockall::automock)]
#[async_trait]
pub trait StatusRepository: Send + Sync {
    async fn get_meter_status(&self, meter_id: &str) -> DomainResult<Option<MeterStatus>>;

    async fn get_vehicle_status(&self, vehicle_id: &str) -> DomainResult<Option<VehicleStatus>>;

    /// Meters whose last reading is at or after `cutoff`
    async fn list_meter_statuses_since(&self, cutoff: DateTime<Utc>) -> DomainResult<Vec<MeterStatus>>;

    /// Vehicles whose last reading is at or after `cutoff`
    async fn list_vehicle_statuses_since(
        &self,
        cutoff: DateTime<Utc>,
    ) -> DomainResult<Vec<VehicleStatus>>;

    /// Vehicles whose latest battery temperature is at or above `min_temp_c`
    async fn list_vehicles_with_temperature_at_least(
        &self,
        min_temp_c: f64,
    ) -> DomainResult<Vec<VehicleStatus>>;

    /// Overwrite the correlated vehicle of a meter row. Returns false when the row is absent.
    async fn set_meter_peer(&self, meter_id: &str, vehicle_id: Option<String>) -> DomainResult<bool>;

    /// Overwrite the correlated meter of a vehicle row. Returns false when the row is absent.
    async fn set_vehicle_peer(&self, vehicle_id: &str, meter_id: Option<String>) -> DomainResult<bool>;
}
